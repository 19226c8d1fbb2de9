//! Back-end wrappers and the concurrent dispatcher
//!
//! Every supported compiler version belongs to one of a closed set of
//! families selected by prefix match on the normalized version. A wrapper is
//! constructed per version through the [`WrapperFactory`] and cached in the
//! driver's [`WrapperRegistry`] for the lifetime of the driver.

use std::{fmt, path::PathBuf, process::Stdio, sync::Arc};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{Map, Value};

use crate::{
    artifacts::{CompilerInput, CompilerOutput, Sources},
    error::{DriverError, Result},
    plan::CompilationPlan,
    remappings::ImportRemappings,
    version::{normalize_version, SOLCJS_PATH_ENV},
};

/// The name of the `solc` binary on the system
pub const SOLC: &str = "solc";

/// The container image used for dockerised back-ends
pub const SOLC_DOCKER_IMAGE: &str = "ethereum/solc";

/// The supported back-end families, selected by prefix match on the
/// normalized version
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SolcFamily {
    V0_1,
    V0_2,
    V0_3,
    V0_4,
    V0_5,
    V0_6,
    V0_7,
    V0_8,
}

impl SolcFamily {
    /// Detects the family of a normalized version string
    pub fn detect(version: &str) -> Result<Self> {
        let version = normalize_version(version);
        let family = [
            ("0.1.", SolcFamily::V0_1),
            ("0.2.", SolcFamily::V0_2),
            ("0.3.", SolcFamily::V0_3),
            ("0.4.", SolcFamily::V0_4),
            ("0.5.", SolcFamily::V0_5),
            ("0.6", SolcFamily::V0_6),
            ("0.7", SolcFamily::V0_7),
            ("0.8", SolcFamily::V0_8),
        ]
        .into_iter()
        .find_map(|(prefix, family)| version.starts_with(prefix).then_some(family));
        family.ok_or(DriverError::UnsupportedVersion(version))
    }

    /// The oldest family returns a single anonymous contract keyed under an
    /// empty string
    pub fn is_legacy(&self) -> bool {
        matches!(self, SolcFamily::V0_1)
    }
}

impl fmt::Display for SolcFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SolcFamily::V0_1 => "0.1",
            SolcFamily::V0_2 => "0.2",
            SolcFamily::V0_3 => "0.3",
            SolcFamily::V0_4 => "0.4",
            SolcFamily::V0_5 => "0.5",
            SolcFamily::V0_6 => "0.6",
            SolcFamily::V0_7 => "0.7",
            SolcFamily::V0_8 => "0.8",
        };
        f.write_str(s)
    }
}

/// A single back-end invocation: the standard-JSON request actually sent and
/// the compiler's response
#[derive(Clone, Debug)]
pub struct Compiled {
    pub input: CompilerInput,
    pub output: CompilerOutput,
}

/// The capability every back-end wrapper provides
///
/// A wrapper is constructed for exactly one normalized version. Besides
/// compiling it owns the settings-equality decision, because only the wrapper
/// knows which settings fields are irrelevant for artifact reuse.
#[async_trait]
pub trait SolcWrapper: fmt::Debug + Send + Sync {
    /// The normalized version this wrapper was constructed for
    fn version(&self) -> &str;

    fn family(&self) -> SolcFamily;

    /// Compiles one unit with the run's shared remappings
    async fn compile(
        &self,
        sources: &Sources,
        remappings: &ImportRemappings,
    ) -> Result<Compiled>;

    /// Whether a cached artifact's settings match the currently configured
    /// ones
    fn settings_equal(&self, other: &Value) -> bool;
}

/// Creates wrapper instances on first use of a version
pub trait WrapperFactory: fmt::Debug + Send + Sync {
    fn create(&self, version: &str) -> Result<Arc<dyn SolcWrapper>>;
}

/// The per-driver wrapper cache, keyed by normalized version
///
/// Entries are created on first use and reused for the lifetime of the
/// driver; insertion is idempotent by construction.
#[derive(Debug)]
pub struct WrapperRegistry {
    factory: Box<dyn WrapperFactory>,
    wrappers: std::collections::BTreeMap<String, Arc<dyn SolcWrapper>>,
}

impl WrapperRegistry {
    pub fn new(factory: Box<dyn WrapperFactory>) -> Self {
        Self { factory, wrappers: Default::default() }
    }

    /// Returns the wrapper for the version, creating it on first use
    pub fn get_or_create(&mut self, version: &str) -> Result<Arc<dyn SolcWrapper>> {
        let version = normalize_version(version);
        if let Some(wrapper) = self.wrappers.get(&version) {
            return Ok(wrapper.clone())
        }
        tracing::trace!("creating back-end wrapper for \"{}\"", version);
        let wrapper = self.factory.create(&version)?;
        self.wrappers.insert(version, wrapper.clone());
        Ok(wrapper)
    }
}

/// How the default wrapper reaches its compiler
#[derive(Clone, Debug)]
enum Invocation {
    /// A compiler executable on this machine
    Binary(PathBuf),
    /// `docker run <image>:<short version>`
    Docker(String),
}

/// The default process-backed wrapper: drives a compiler executable (or a
/// dockerised one) over the standard-JSON protocol
///
/// Locating or installing version-specific binaries is the binary manager's
/// job; this wrapper only invokes what `SOLCJS_PATH` or the system `solc`
/// provides.
#[derive(Debug)]
pub struct SolcProcess {
    version: String,
    family: SolcFamily,
    settings: Value,
    invocation: Invocation,
}

impl SolcProcess {
    pub fn new(version: impl Into<String>, settings: Value, dockerised: bool) -> Result<Self> {
        let version = normalize_version(&version.into());
        let family = SolcFamily::detect(&version)?;
        let invocation = if dockerised {
            // the container registry tags images with the short version
            let short = version.split('+').next().unwrap_or(&version).to_string();
            Invocation::Docker(format!("{SOLC_DOCKER_IMAGE}:{short}"))
        } else {
            let binary = std::env::var_os(SOLCJS_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(SOLC));
            Invocation::Binary(binary)
        };
        Ok(Self { version, family, settings, invocation })
    }

    fn command(&self) -> tokio::process::Command {
        match &self.invocation {
            Invocation::Binary(path) => {
                let mut cmd = tokio::process::Command::new(path);
                cmd.arg("--standard-json");
                cmd
            }
            Invocation::Docker(image) => {
                let mut cmd = tokio::process::Command::new("docker");
                cmd.args(["run", "-i", "--rm", image.as_str(), "--standard-json"]);
                cmd
            }
        }
    }

    async fn run(&self, input: &CompilerInput) -> Result<CompilerOutput> {
        use tokio::io::AsyncWriteExt;

        let content = serde_json::to_vec(input)?;
        let mut child = self
            .command()
            .stdin(Stdio::piped())
            .stderr(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|err| DriverError::io(err, self.describe()))?;
        let stdin = child.stdin.as_mut().expect("stdin is piped");
        stdin.write_all(&content).await.map_err(|err| DriverError::io(err, self.describe()))?;
        stdin.flush().await.map_err(|err| DriverError::io(err, self.describe()))?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|err| DriverError::io(err, self.describe()))?;

        if !output.status.success() {
            return Err(DriverError::msg(String::from_utf8_lossy(&output.stderr).to_string()))
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    fn describe(&self) -> PathBuf {
        match &self.invocation {
            Invocation::Binary(path) => path.clone(),
            Invocation::Docker(image) => PathBuf::from(image),
        }
    }
}

#[async_trait]
impl SolcWrapper for SolcProcess {
    fn version(&self) -> &str {
        &self.version
    }

    fn family(&self) -> SolcFamily {
        self.family
    }

    async fn compile(
        &self,
        sources: &Sources,
        remappings: &ImportRemappings,
    ) -> Result<Compiled> {
        let input = CompilerInput::with_sources(sources.clone())
            .settings(self.settings.clone())
            .with_default_output_selection()
            .with_remappings(remappings);
        tracing::trace!(
            "compiling {} sources with \"{}\"",
            input.sources.len(),
            self.version
        );
        let output = self.run(&input).await?;
        Ok(Compiled { input, output })
    }

    fn settings_equal(&self, other: &Value) -> bool {
        normalized_settings(&self.settings) == normalized_settings(other)
    }
}

/// Strips the settings fields that do not affect artifact reuse: the output
/// selection, path rewrites and unset entries
pub fn normalized_settings(settings: &Value) -> Value {
    fn prune(value: &Value) -> Option<Value> {
        match value {
            Value::Null => None,
            Value::Object(map) => {
                let pruned: Map<String, Value> = map
                    .iter()
                    .filter(|(key, _)| key.as_str() != "outputSelection" && key.as_str() != "remappings")
                    .filter_map(|(key, value)| prune(value).map(|v| (key.clone(), v)))
                    .collect();
                if pruned.is_empty() {
                    None
                } else {
                    Some(Value::Object(pruned))
                }
            }
            other => Some(other.clone()),
        }
    }
    prune(settings).unwrap_or_else(|| Value::Object(Default::default()))
}

/// The default factory used by the driver: one [`SolcProcess`] per version
#[derive(Debug)]
pub struct ProcessWrapperFactory {
    settings: Value,
    dockerised: bool,
}

impl ProcessWrapperFactory {
    pub fn new(settings: Value, dockerised: bool) -> Self {
        Self { settings, dockerised }
    }
}

impl WrapperFactory for ProcessWrapperFactory {
    fn create(&self, version: &str) -> Result<Arc<dyn SolcWrapper>> {
        Ok(Arc::new(SolcProcess::new(version, self.settings.clone(), self.dockerised)?))
    }
}

/// The compiled result of one unit, in plan order
#[derive(Clone, Debug)]
pub struct UnitOutcome {
    pub version: String,
    pub unit_index: usize,
    pub compiled: Compiled,
}

/// Runs every unit of the plan concurrently: across versions and, within a
/// version, across units
///
/// All invocations are awaited jointly; on failure the in-flight calls
/// complete and their results are discarded. Diagnostics at `error` severity
/// anywhere in the run surface as [`DriverError::Compilation`] with the total
/// error count.
pub async fn dispatch(
    plan: &CompilationPlan,
    registry: &mut WrapperRegistry,
    remappings: &ImportRemappings,
) -> Result<Vec<UnitOutcome>> {
    let mut batches = Vec::with_capacity(plan.batches.len());
    for batch in &plan.batches {
        let wrapper = registry.get_or_create(&batch.version)?;
        batches.push((batch, wrapper));
    }

    tracing::trace!("dispatching {} unit(s) in {} version batch(es)", plan.units(), batches.len());
    let compiled = join_all(batches.iter().map(|(batch, wrapper)| async move {
        join_all(batch.units.iter().map(|unit| wrapper.compile(unit, remappings))).await
    }))
    .await;

    let mut outcomes = Vec::new();
    let mut errors_count = 0;
    for ((batch, _), results) in batches.iter().zip(compiled) {
        for (unit_index, result) in results.into_iter().enumerate() {
            let compiled = result?;
            errors_count += compiled.output.errors_count();
            outcomes.push(UnitOutcome {
                version: batch.version.clone(),
                unit_index,
                compiled,
            });
        }
    }

    if errors_count > 0 {
        return Err(DriverError::Compilation { errors_count })
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_families_by_prefix() {
        for (version, family) in [
            ("0.1.7", SolcFamily::V0_1),
            ("v0.4.26+commit.4563c3fc", SolcFamily::V0_4),
            ("0.6.12+commit.27d51765", SolcFamily::V0_6),
            ("0.8.9", SolcFamily::V0_8),
        ] {
            assert_eq!(SolcFamily::detect(version).unwrap(), family);
        }
        assert!(SolcFamily::detect("9.9.9").is_err());
        assert!(SolcFamily::V0_1.is_legacy());
        assert!(!SolcFamily::V0_6.is_legacy());
    }

    #[test]
    fn settings_comparison_ignores_irrelevant_fields() {
        let wrapper = SolcProcess::new(
            "0.6.12",
            json!({ "optimizer": { "enabled": true, "runs": 200 } }),
            false,
        )
        .unwrap();

        assert!(wrapper.settings_equal(&json!({
            "optimizer": { "enabled": true, "runs": 200 },
            "outputSelection": { "*": { "*": ["abi"] } },
            "remappings": ["@foo/bar=/elsewhere/"],
            "metadata": null
        })));
        assert!(!wrapper.settings_equal(&json!({
            "optimizer": { "enabled": false, "runs": 200 }
        })));
    }

    #[test]
    fn empty_settings_compare_equal_after_normalization() {
        let wrapper = SolcProcess::new("0.6.12", json!({}), false).unwrap();
        assert!(wrapper.settings_equal(&json!({
            "outputSelection": { "*": { "*": ["abi"] } },
            "remappings": []
        })));
    }
}
