//! Build driver for versioned Solidity compilers
//!
//! Given a project of contract files, the driver resolves each requested
//! contract plus the transitive closure of its imports, reads the version
//! pragmas to pick a concrete back-end per file, groups the survivors of the
//! artifact-cache gate into per-version compilation units and invokes the
//! back-ends concurrently. One artifact is persisted per contract; when the
//! same file was compiled in several units, the artifact from the smallest
//! unit wins.
//!
//! ```no_run
//! use solc_driver::{Compiler, CompilerConfig};
//!
//! # async fn demo() -> solc_driver::Result<()> {
//! let config = CompilerConfig::builder()
//!     .contracts_dir("./contracts")
//!     .artifacts_dir("./artifacts")
//!     .build()?;
//! let mut compiler = Compiler::new(config)?;
//! let run = compiler.compile().await?;
//! println!("wrote {} artifact(s)", run.artifacts.len());
//! # Ok(())
//! # }
//! ```

pub mod artifacts;
mod cache;
pub mod compile;
pub mod config;
pub mod error;
pub mod plan;
pub mod remappings;
pub mod resolver;
pub mod utils;
pub mod version;
pub mod walker;
mod watch;

use std::{
    collections::BTreeSet,
    fs,
    path::PathBuf,
    time::Duration,
};

use futures_util::future::join_all;
use serde_json::Value;

pub use crate::{
    artifacts::{
        CompilerInput, CompilerOutput, ContractArtifact, Source, Sources,
        ARTIFACT_SCHEMA_VERSION,
    },
    compile::{Compiled, SolcFamily, SolcWrapper, WrapperFactory},
    config::{CompilerConfig, ContractsSelection},
    error::{DriverError, DriverIoError, Result},
    plan::{BuildPlan, CompilationPlan, ContractData},
    remappings::ImportRemappings,
    resolver::{ContractSource, FallthroughResolver, Resolve},
    version::ReleaseIndex,
};

use crate::{
    artifacts::{CompilerInfo, COMPILER_NAME},
    cache::PersistedArtifactCache,
    compile::{ProcessWrapperFactory, UnitOutcome, WrapperRegistry},
    plan::Planner,
};

/// The driver: plans, dispatches and persists one project's builds
///
/// A `Compiler` owns the resolver chain, the per-driver wrapper registry and
/// the release index of one project; artifacts under the configured artifacts
/// directory are the only durable state it writes.
#[derive(Debug)]
pub struct Compiler {
    config: CompilerConfig,
    resolver: FallthroughResolver,
    registry: WrapperRegistry,
    release_index: Option<ReleaseIndex>,
    /// Union of absolute paths the last planning pass discovered
    watched: BTreeSet<PathBuf>,
}

impl Compiler {
    /// Creates a driver with the default resolver chain and the
    /// process-backed wrappers
    pub fn new(config: CompilerConfig) -> Result<Self> {
        CompilerBuilder::default().config(config).build()
    }

    /// Convenience function to call `CompilerBuilder::default()`
    pub fn builder() -> CompilerBuilder {
        CompilerBuilder::default()
    }

    /// The active configuration
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// The absolute paths the last planning pass discovered; the watch
    /// adapter observes exactly this set
    pub fn watched_paths(&self) -> &BTreeSet<PathBuf> {
        &self.watched
    }

    /// Compiles the contracts the configuration requests
    ///
    /// `"*"` expands to every contract the project-wide name index returns,
    /// each requested under its basename.
    pub async fn compile(&mut self) -> Result<CompileRun> {
        let names = match &self.config.contracts {
            ContractsSelection::All => {
                let mut stems: Vec<String> = self
                    .resolver
                    .get_all()?
                    .iter()
                    .filter_map(ContractSource::contract_name)
                    .collect();
                stems.sort();
                stems.dedup();
                stems
            }
            ContractsSelection::Named(names) => {
                let mut seen = BTreeSet::new();
                names.iter().filter(|name| seen.insert(name.as_str())).cloned().collect()
            }
        };
        self.compile_contracts(&names).await
    }

    /// Compiles the given requested contract names
    #[tracing::instrument(skip_all, name = "compile")]
    pub async fn compile_contracts(&mut self, names: &[String]) -> Result<CompileRun> {
        self.config.validate()?;
        tracing::trace!("compiling {} requested contract(s): {:?}", names.len(), names);

        let pin = self.version_pin();
        self.ensure_release_index(pin.is_none()).await?;

        let mut planned = Planner {
            config: &self.config,
            resolver: &self.resolver,
            registry: &mut self.registry,
            release_index: self.release_index.as_ref(),
            pin: pin.as_deref(),
        }
        .plan(names)
        .await?;
        self.watched = std::mem::take(&mut planned.watched);

        if planned.plan.is_empty() {
            tracing::trace!("every requested contract is up to date");
            return Ok(CompileRun::default())
        }

        let outcomes =
            compile::dispatch(&planned.plan, &mut self.registry, &planned.remappings).await?;
        let artifacts = self.write_artifacts(&planned, &outcomes)?;
        Ok(CompileRun { artifacts, compiled_units: outcomes.len() })
    }

    /// Compiles pre-assembled standard-JSON bundles
    ///
    /// This entry point skips the import-closure walk and uses each bundle's
    /// embedded sources directly. Unlike batched planning, the version
    /// constraint is the intersection across *all* files of a bundle. No
    /// artifacts are written; the raw exchanges are returned instead.
    pub async fn compile_standard_json(
        &mut self,
        bundles: Vec<CompilerInput>,
    ) -> Result<Vec<Compiled>> {
        let pin = self.version_pin();
        self.ensure_release_index(pin.is_none()).await?;

        let mut jobs = Vec::with_capacity(bundles.len());
        for bundle in bundles {
            let version = match pin.as_deref() {
                Some(pin) => version::normalize_version(pin),
                None => {
                    let pragmas: Vec<&str> = bundle
                        .sources
                        .values()
                        .flat_map(|source| source.parse_version_pragmas())
                        .collect();
                    let req = version::intersect_version_reqs(pragmas)?;
                    let index = self.release_index.as_ref().expect("loaded above");
                    version::pick_version(index, &req, None)?
                }
            };
            let wrapper = self.registry.get_or_create(&version)?;
            jobs.push((wrapper, bundle));
        }

        // bundles embed their sources directly; no remappings apply
        let remappings = ImportRemappings::default();
        let results = join_all(
            jobs.iter()
                .map(|(wrapper, bundle)| wrapper.compile(&bundle.sources, &remappings)),
        )
        .await;

        let mut compiled = Vec::with_capacity(results.len());
        let mut errors_count = 0;
        for result in results {
            let exchange = result?;
            errors_count += exchange.output.errors_count();
            compiled.push(exchange);
        }
        if errors_count > 0 {
            return Err(DriverError::Compilation { errors_count })
        }
        Ok(compiled)
    }

    /// Re-plans on every change to the watched path set until cancelled
    ///
    /// Build failures are reported and watching continues; changes arriving
    /// while a build runs coalesce into the next poll.
    pub async fn watch(&mut self, interval: Duration) -> Result<()> {
        watch::watch(self, interval).await
    }

    /// The dominant version pin: the env pin wins over the configured one
    fn version_pin(&self) -> Option<String> {
        version::env_version_pin().or_else(|| self.config.solc_version.clone())
    }

    /// Loads the release index once per run when auto-selection needs it
    async fn ensure_release_index(&mut self, required: bool) -> Result<()> {
        if required && self.release_index.is_none() {
            self.release_index = Some(ReleaseIndex::load(self.config.offline()).await?);
        }
        Ok(())
    }

    /// Persists one artifact per contract, iterating units in plan order
    ///
    /// A file compiled in several units keeps the artifact from the smallest
    /// one; ties keep the first written.
    fn write_artifacts(
        &self,
        planned: &BuildPlan,
        outcomes: &[UnitOutcome],
    ) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.config.artifacts_dir)
            .map_err(|err| DriverError::io(err, &self.config.artifacts_dir))?;

        let mut persisted = PersistedArtifactCache::default();
        let mut written = Vec::new();

        for outcome in outcomes {
            let batch = planned
                .plan
                .batches
                .iter()
                .find(|batch| batch.version == outcome.version)
                .expect("outcome stems from the plan");
            let unit = &batch.units[outcome.unit_index];
            let legacy = SolcFamily::detect(&outcome.version)
                .map(|family| family.is_legacy())
                .unwrap_or(false);
            let output = &outcome.compiled.output;

            for path in unit.keys() {
                let data = match planned.contract_data.get(path) {
                    Some(data) => data,
                    None => continue,
                };
                let contract_name = utils::source_stem(path)
                    .ok_or_else(|| DriverError::msg(format!("invalid path {}", path.display())))?;
                let path_key = path.to_string_lossy();

                // the oldest family emits a single contract keyed under an
                // empty string; the two shapes are never merged
                let record = match output.contracts.get(path_key.as_ref()) {
                    Some(contracts) => contracts.get(&contract_name),
                    None if legacy => {
                        output.contracts.get("").and_then(|contracts| contracts.get(&contract_name))
                    }
                    None => None,
                };
                let record = record.ok_or_else(|| DriverError::MissingContract {
                    name: contract_name.clone(),
                    path: path.clone(),
                })?;

                if !persisted.should_persist(path, unit.len()) {
                    tracing::trace!(
                        "keeping artifact from a smaller unit for \"{}\"",
                        path.display()
                    );
                    continue
                }

                let artifact = ContractArtifact {
                    schema_version: ARTIFACT_SCHEMA_VERSION.to_string(),
                    contract_name: contract_name.clone(),
                    source_tree_hash_hex: data.source_tree_hash_hex.clone(),
                    standard_input: self
                        .config
                        .should_save_standard_input
                        .then(|| outcome.compiled.input.clone()),
                    compiler_output: record.clone(),
                    sources: unit
                        .keys()
                        .map(|unit_path| {
                            let key = unit_path.to_string_lossy().into_owned();
                            let meta = output.sources.get(&key).cloned().unwrap_or_default();
                            (key, meta)
                        })
                        .collect(),
                    compiler: CompilerInfo {
                        name: COMPILER_NAME.to_string(),
                        version: outcome.version.clone(),
                        settings: outcome.compiled.input.settings.clone(),
                    },
                    chains: Default::default(),
                };

                let file = self.config.artifact_path(&data.contract_name, &contract_name);
                tracing::trace!("writing artifact \"{}\"", file.display());
                artifact.write(&file)?;
                written.push(file);
            }
        }
        Ok(written)
    }
}

/// The outcome of one `compile` run
#[derive(Debug, Default)]
pub struct CompileRun {
    /// Paths of every artifact written, in write order
    pub artifacts: Vec<PathBuf>,
    /// How many units were actually submitted to a back-end
    pub compiled_units: usize,
}

impl CompileRun {
    /// Whether the cache gate skipped every requested contract
    pub fn is_unchanged(&self) -> bool {
        self.compiled_units == 0
    }
}

/// Builder with injection points for embedders and tests: a custom wrapper
/// factory, a pre-loaded release index and extra resolver strategies
#[derive(Debug, Default)]
pub struct CompilerBuilder {
    config: Option<CompilerConfig>,
    factory: Option<Box<dyn WrapperFactory>>,
    release_index: Option<ReleaseIndex>,
    custom_resolvers: Vec<Box<dyn Resolve>>,
}

impl CompilerBuilder {
    #[must_use]
    pub fn config(mut self, config: CompilerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Overrides how back-end wrappers are constructed
    #[must_use]
    pub fn wrapper_factory(mut self, factory: Box<dyn WrapperFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Presets the release index, bypassing fetch and cache entirely
    #[must_use]
    pub fn release_index(mut self, index: ReleaseIndex) -> Self {
        self.release_index = Some(index);
        self
    }

    /// Registers an additional resolution strategy, tried before the final
    /// name-index fallback
    #[must_use]
    pub fn resolver(mut self, resolver: Box<dyn Resolve>) -> Self {
        self.custom_resolvers.push(resolver);
        self
    }

    pub fn build(self) -> Result<Compiler> {
        let Self { config, factory, release_index, custom_resolvers } = self;

        let config = config.unwrap_or_default();
        config.validate()?;

        let mut resolver = FallthroughResolver::new(&config.contracts_dir);
        for custom in custom_resolvers {
            resolver.register(custom);
        }

        let factory = factory.unwrap_or_else(|| {
            Box::new(ProcessWrapperFactory::new(
                config.compiler_settings.clone().unwrap_or_else(|| Value::Object(Default::default())),
                config.use_dockerised_solc,
            ))
        });

        Ok(Compiler {
            config,
            resolver,
            registry: WrapperRegistry::new(factory),
            release_index,
            watched: BTreeSet::new(),
        })
    }
}
