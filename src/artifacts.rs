//! Standard-JSON wire types and the persisted artifact format

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{DriverIoError, Result},
    remappings::ImportRemappings,
    utils,
};

/// The schema version stamped into every artifact this crate writes.
///
/// Artifacts carrying any other value are rebuilt unconditionally.
pub const ARTIFACT_SCHEMA_VERSION: &str = "2.0.0";

/// The `name` recorded in the artifact's `compiler` block
pub const COMPILER_NAME: &str = "solc";

/// A map of source file path -> source content, the shape of a compilation
/// unit submitted to one back-end invocation
pub type Sources = BTreeMap<PathBuf, Source>;

/// Content of a single source file
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct Source {
    pub content: String,
}

impl Source {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into() }
    }

    /// Reads the file content
    pub fn read(file: impl AsRef<Path>) -> Result<Self> {
        let file = file.as_ref();
        Ok(Self {
            content: fs::read_to_string(file)
                .map_err(|err| DriverIoError::new(err, file))?,
        })
    }

    /// async version of `Self::read`
    pub async fn async_read(file: impl AsRef<Path>) -> Result<Self> {
        let file = file.as_ref();
        Ok(Self {
            content: tokio::fs::read_to_string(file)
                .await
                .map_err(|err| DriverIoError::new(err, file))?,
        })
    }

    /// Returns all import statements of the file
    pub fn parse_imports(&self) -> Vec<&str> {
        utils::find_import_paths(&self.content)
    }

    /// Returns all version pragmas of the file, in source order
    pub fn parse_version_pragmas(&self) -> Vec<&str> {
        utils::find_version_pragmas(&self.content)
    }
}

impl AsRef<str> for Source {
    fn as_ref(&self) -> &str {
        &self.content
    }
}

/// Input type the back-end compiler expects
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CompilerInput {
    pub language: String,
    pub sources: Sources,
    pub settings: Value,
}

impl CompilerInput {
    /// Creates a new input with the given sources and empty settings
    pub fn with_sources(sources: Sources) -> Self {
        Self {
            language: "Solidity".to_string(),
            sources,
            settings: Value::Object(Default::default()),
        }
    }

    /// Sets the settings object, keeping it opaque
    #[must_use]
    pub fn settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    /// Ensures an output selection is present, so the back-end emits the
    /// contract records the artifact writer reads
    #[must_use]
    pub fn with_default_output_selection(mut self) -> Self {
        if let Value::Object(ref mut settings) = self.settings {
            settings.entry("outputSelection").or_insert_with(|| {
                serde_json::json!({ "*": { "*": ["abi", "evm.bytecode", "evm.deployedBytecode"] } })
            });
        }
        self
    }

    /// Adds the run's import remappings to the settings
    #[must_use]
    pub fn with_remappings(mut self, remappings: &ImportRemappings) -> Self {
        if remappings.is_empty() {
            return self
        }
        if let Value::Object(ref mut settings) = self.settings {
            settings.insert(
                "remappings".to_string(),
                Value::Array(
                    remappings.to_strings().into_iter().map(Value::String).collect(),
                ),
            );
        }
        self
    }
}

/// Output type the back-end compiler produces
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CompilerOutput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Error>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceFile>,
    #[serde(default)]
    pub contracts: BTreeMap<String, BTreeMap<String, Value>>,
}

impl CompilerOutput {
    /// Whether the output contains an error-severity diagnostic
    pub fn has_error(&self) -> bool {
        self.errors_count() > 0
    }

    /// Number of diagnostics at `error` severity; warnings are not counted
    pub fn errors_count(&self) -> usize {
        self.errors.iter().filter(|err| err.severity == "error").count()
    }
}

/// A diagnostic emitted by the back-end
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Error {
    #[serde(default)]
    pub severity: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_message: Option<String>,
}

/// Per-file metadata in the compiler output
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct SourceFile {
    pub id: u32,
}

/// The `compiler` block of a persisted artifact
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CompilerInfo {
    pub name: String,
    pub version: String,
    pub settings: Value,
}

/// The persisted output for one contract
///
/// One artifact file is written per contract, named
/// `<requested>-<contract>.json` under the artifacts directory. Artifacts are
/// the only durable state the driver owns.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
    pub schema_version: String,
    pub contract_name: String,
    pub source_tree_hash_hex: String,
    /// The full standard-JSON request, present only when
    /// `should_save_standard_input` is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_input: Option<CompilerInput>,
    /// The compiler output record for this contract
    pub compiler_output: Value,
    /// Metadata for every file of the unit this contract was compiled in
    pub sources: BTreeMap<String, SourceFile>,
    pub compiler: CompilerInfo,
    /// Deployment addresses per chain; always written empty
    #[serde(default)]
    pub chains: BTreeMap<String, Value>,
}

impl ContractArtifact {
    /// Reads the artifact json file from the given path
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(|err| DriverIoError::new(err, path))?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Writes the artifact with the fixed formatting: 4-space indent, stable
    /// key order
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = fs::File::create(path).map_err(|err| DriverIoError::new(err, path))?;
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(file, formatter);
        Ok(self.serialize(&mut ser)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_parse_compiler_output() {
        let out = r#"{
            "errors": [
                { "severity": "warning", "type": "Warning", "message": "unused variable" },
                { "severity": "error", "type": "TypeError", "message": "boom" }
            ],
            "sources": { "/a/A.sol": { "id": 0 } },
            "contracts": { "/a/A.sol": { "A": { "abi": [] } } }
        }"#;
        let output: CompilerOutput = serde_json::from_str(out).unwrap();
        assert_eq!(output.errors_count(), 1);
        assert!(output.has_error());
        assert_eq!(output.sources["/a/A.sol"].id, 0);
    }

    #[test]
    fn artifact_roundtrips_with_fixed_formatting() {
        let artifact = ContractArtifact {
            schema_version: ARTIFACT_SCHEMA_VERSION.to_string(),
            contract_name: "A".to_string(),
            source_tree_hash_hex: format!("0x{}", "00".repeat(32)),
            standard_input: None,
            compiler_output: serde_json::json!({ "abi": [] }),
            sources: BTreeMap::from([("/a/A.sol".to_string(), SourceFile { id: 0 })]),
            compiler: CompilerInfo {
                name: COMPILER_NAME.to_string(),
                version: "0.6.12+commit.27d51765".to_string(),
                settings: serde_json::json!({}),
            },
            chains: BTreeMap::new(),
        };

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("A-A.json");
        artifact.write(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n    \"schemaVersion\": \"2.0.0\""));
        assert!(raw.contains("\"chains\": {}"));

        let read = ContractArtifact::read(&path).unwrap();
        assert_eq!(read, artifact);
    }

    #[test]
    fn default_output_selection_is_not_overwritten() {
        let input = CompilerInput::with_sources(Default::default())
            .settings(serde_json::json!({ "outputSelection": { "*": { "*": ["abi"] } } }))
            .with_default_output_selection();
        assert_eq!(
            input.settings["outputSelection"],
            serde_json::json!({ "*": { "*": ["abi"] } })
        );
    }
}
