//! Driver configuration

use std::{fmt, path::PathBuf};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{
    error::{DriverError, Result},
    version::SOLC_OFFLINE_ENV,
};

/// The configuration record of a driver run
///
/// The wire format rejects unknown fields; remaining constraints are checked
/// by [`Self::validate()`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct CompilerConfig {
    /// Project root containing the contract files
    pub contracts_dir: PathBuf,
    /// Where artifacts are written
    pub artifacts_dir: PathBuf,
    /// Either every contract in the project (`"*"`) or a list of basenames
    pub contracts: ContractsSelection,
    /// Version pin; overrides auto-selection unless the env pin is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solc_version: Option<String>,
    /// Opaque settings passed to the back-end wrappers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler_settings: Option<Value>,
    /// Hint to the binary manager to run the back-end in a container
    pub use_dockerised_solc: bool,
    /// Forbid network access for the version list
    pub is_offline_mode: bool,
    /// Also persist the standard-JSON input in every artifact
    pub should_save_standard_input: bool,
    /// One compilation unit per requested contract instead of one per version
    pub should_compile_independently: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            contracts_dir: PathBuf::from("./contracts"),
            artifacts_dir: PathBuf::from("./artifacts"),
            contracts: ContractsSelection::All,
            solc_version: None,
            compiler_settings: None,
            use_dockerised_solc: false,
            is_offline_mode: false,
            should_save_standard_input: false,
            should_compile_independently: false,
        }
    }
}

impl CompilerConfig {
    /// Parses a configuration from its JSON representation, rejecting unknown
    /// fields and validating the result
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|err| DriverError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the constraints the serde layer cannot express
    pub fn validate(&self) -> Result<()> {
        if let ContractsSelection::Named(names) = &self.contracts {
            if names.is_empty() {
                return Err(DriverError::Config("contracts list is empty".to_string()))
            }
            if let Some(bad) = names.iter().find(|name| name.is_empty() || *name == "*") {
                return Err(DriverError::Config(format!(
                    "invalid contract name \"{}\" in contracts list",
                    bad
                )))
            }
        }
        if self.contracts_dir.as_os_str().is_empty() {
            return Err(DriverError::Config("contractsDir is empty".to_string()))
        }
        if self.artifacts_dir.as_os_str().is_empty() {
            return Err(DriverError::Config("artifactsDir is empty".to_string()))
        }
        Ok(())
    }

    /// Whether the run must not touch the network, honoring the env override
    pub fn offline(&self) -> bool {
        self.is_offline_mode ||
            std::env::var(SOLC_OFFLINE_ENV).map(|v| !v.is_empty()).unwrap_or(false)
    }

    /// The contracts dir resolved to an absolute path
    pub fn absolute_contracts_dir(&self) -> Result<PathBuf> {
        crate::utils::canonicalize(&self.contracts_dir)
    }

    /// The path an artifact for the given requested/contract name pair is
    /// expected at
    pub fn artifact_path(&self, requested: &str, contract: &str) -> PathBuf {
        self.artifacts_dir.join(format!("{}-{}.json", requested, contract))
    }
}

/// The `contracts` field: the literal `"*"` or an explicit list of basenames
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractsSelection {
    All,
    Named(Vec<String>),
}

impl Default for ContractsSelection {
    fn default() -> Self {
        ContractsSelection::All
    }
}

impl Serialize for ContractsSelection {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ContractsSelection::All => serializer.serialize_str("*"),
            ContractsSelection::Named(names) => names.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ContractsSelection {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SelectionVisitor;

        impl<'de> de::Visitor<'de> for SelectionVisitor {
            type Value = ContractsSelection;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("the string \"*\" or a list of contract names")
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value == "*" {
                    Ok(ContractsSelection::All)
                } else {
                    Err(de::Error::invalid_value(de::Unexpected::Str(value), &self))
                }
            }

            fn visit_seq<A>(self, seq: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let names =
                    Vec::deserialize(de::value::SeqAccessDeserializer::new(seq))?;
                Ok(ContractsSelection::Named(names))
            }
        }

        deserializer.deserialize_any(SelectionVisitor)
    }
}

impl From<&str> for ContractsSelection {
    fn from(value: &str) -> Self {
        if value == "*" {
            ContractsSelection::All
        } else {
            ContractsSelection::Named(vec![value.to_string()])
        }
    }
}

impl From<Vec<String>> for ContractsSelection {
    fn from(names: Vec<String>) -> Self {
        ContractsSelection::Named(names)
    }
}

/// Builder for programmatic configuration in the same shape the JSON surface
/// provides
#[derive(Debug, Default)]
pub struct CompilerConfigBuilder {
    config: CompilerConfig,
}

impl CompilerConfigBuilder {
    #[must_use]
    pub fn contracts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.contracts_dir = dir.into();
        self
    }

    #[must_use]
    pub fn artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.artifacts_dir = dir.into();
        self
    }

    #[must_use]
    pub fn contracts(mut self, contracts: impl Into<ContractsSelection>) -> Self {
        self.config.contracts = contracts.into();
        self
    }

    #[must_use]
    pub fn solc_version(mut self, version: impl Into<String>) -> Self {
        self.config.solc_version = Some(version.into());
        self
    }

    #[must_use]
    pub fn compiler_settings(mut self, settings: Value) -> Self {
        self.config.compiler_settings = Some(settings);
        self
    }

    #[must_use]
    pub fn dockerised_solc(mut self) -> Self {
        self.config.use_dockerised_solc = true;
        self
    }

    #[must_use]
    pub fn offline(mut self) -> Self {
        self.config.is_offline_mode = true;
        self
    }

    #[must_use]
    pub fn save_standard_input(mut self) -> Self {
        self.config.should_save_standard_input = true;
        self
    }

    #[must_use]
    pub fn compile_independently(mut self) -> Self {
        self.config.should_compile_independently = true;
        self
    }

    pub fn build(self) -> Result<CompilerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl CompilerConfig {
    pub fn builder() -> CompilerConfigBuilder {
        CompilerConfigBuilder::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_a_full_config() {
        let config = CompilerConfig::from_json_str(
            r#"{
                "contractsDir": "./src",
                "artifactsDir": "./out",
                "contracts": ["Token", "Escrow"],
                "solcVersion": "0.6.12",
                "compilerSettings": { "optimizer": { "enabled": true } },
                "shouldCompileIndependently": true
            }"#,
        )
        .unwrap();
        assert_eq!(config.contracts_dir, PathBuf::from("./src"));
        assert_eq!(
            config.contracts,
            ContractsSelection::Named(vec!["Token".to_string(), "Escrow".to_string()])
        );
        assert_eq!(config.solc_version.as_deref(), Some("0.6.12"));
        assert!(config.should_compile_independently);
    }

    #[test]
    fn defaults_apply() {
        let config = CompilerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, CompilerConfig::default());
        assert_eq!(config.contracts, ContractsSelection::All);
    }

    #[test]
    fn wildcard_contracts_parse() {
        let config = CompilerConfig::from_json_str(r#"{ "contracts": "*" }"#).unwrap();
        assert_eq!(config.contracts, ContractsSelection::All);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = CompilerConfig::from_json_str(r#"{ "unknownKnob": true }"#).unwrap_err();
        assert!(matches!(err, DriverError::Config(_)));
    }

    #[test]
    fn empty_contract_list_is_rejected() {
        let err = CompilerConfig::from_json_str(r#"{ "contracts": [] }"#).unwrap_err();
        assert!(matches!(err, DriverError::Config(_)));
    }

    #[test]
    fn artifact_paths_are_pair_named() {
        let config = CompilerConfig::default();
        assert_eq!(
            config.artifact_path("A", "L"),
            PathBuf::from("./artifacts").join("A-L.json")
        );
    }
}
