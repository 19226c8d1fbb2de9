//! The build planner
//!
//! Planning walks every requested contract, decides per contract whether a
//! rebuild is needed, selects a back-end version per root and groups the
//! surviving source trees into compilation units: one growing unit per
//! version in batched mode, one unit per requested root in independent mode.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    sync::Arc,
};

use crate::{
    artifacts::{ContractArtifact, Sources},
    cache,
    compile::WrapperRegistry,
    config::CompilerConfig,
    error::{DriverError, Result},
    remappings::ImportRemappings,
    resolver::{ContractSource, FallthroughResolver},
    version::{self, ReleaseIndex},
    walker,
};

/// Planner bookkeeping for one requested contract
///
/// The record is registered under every absolute path the root's walk
/// visited, so the writer can attribute imported files to the root they were
/// first discovered through. The first walk wins, except that a root always
/// owns its own path.
#[derive(Clone, Debug)]
pub struct ContractData {
    /// The requested basename, without extension
    pub contract_name: String,
    /// The root source file
    pub absolute_path: PathBuf,
    /// The artifact a previous run persisted for this root, if any
    pub current_artifact: Option<ContractArtifact>,
    /// Tree hash over the root and its transitive imports, `0x`-prefixed hex
    pub source_tree_hash_hex: String,
}

/// All units planned for one back-end version
#[derive(Clone, Debug)]
pub struct VersionBatch {
    /// The normalized fully qualified version
    pub version: String,
    pub units: Vec<Sources>,
}

/// The mapping from compiler version to the ordered units for that version
///
/// Version keys keep insertion order and units keep index order, so the
/// writer observes a deterministic sequence and the smallest-unit-wins policy
/// is deterministic given the plan.
#[derive(Clone, Debug, Default)]
pub struct CompilationPlan {
    pub batches: Vec<VersionBatch>,
}

impl CompilationPlan {
    /// Adds the sources to the plan for the version
    ///
    /// Batched mode accumulates into the single unit of the version;
    /// independent mode always allocates a new unit.
    fn insert(&mut self, version: &str, sources: Sources, independently: bool) {
        let batch = match self.batches.iter_mut().find(|batch| batch.version == version) {
            Some(batch) => batch,
            None => {
                self.batches.push(VersionBatch {
                    version: version.to_string(),
                    units: Vec::new(),
                });
                self.batches.last_mut().expect("just pushed")
            }
        };
        if independently || batch.units.is_empty() {
            batch.units.push(sources);
        } else {
            batch.units[0].extend(sources);
        }
    }

    /// Total number of units across all versions
    pub fn units(&self) -> usize {
        self.batches.iter().map(|batch| batch.units.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Everything one planning pass produces
#[derive(Debug, Default)]
pub struct BuildPlan {
    pub plan: CompilationPlan,
    /// absolute path -> the root record the path was first discovered through
    pub contract_data: BTreeMap<PathBuf, Arc<ContractData>>,
    /// Shared by all units of the run
    pub remappings: ImportRemappings,
    /// Union of all absolute paths discovered, including up-to-date roots;
    /// the watch adapter observes exactly this set
    pub watched: BTreeSet<PathBuf>,
}

/// One planning pass over the requested names
pub(crate) struct Planner<'a> {
    pub config: &'a CompilerConfig,
    pub resolver: &'a FallthroughResolver,
    pub registry: &'a mut WrapperRegistry,
    /// Loaded once per run; only required when no pin is set
    pub release_index: Option<&'a ReleaseIndex>,
    /// Env pin or configured pin, already normalized
    pub pin: Option<&'a str>,
}

impl Planner<'_> {
    pub(crate) async fn plan(mut self, names: &[String]) -> Result<BuildPlan> {
        let mut out = BuildPlan::default();
        let mut resolved = Vec::new();

        for name in names {
            let walked = walker::walk(self.resolver, name).await?;
            out.watched.extend(walked.sources.iter().map(|s| s.absolute_path.clone()));

            let requested = crate::utils::source_stem(crate::utils::with_sol_extension(name))
                .ok_or_else(|| DriverError::NameResolution(name.clone()))?;
            let artifact_path = self.config.artifact_path(&requested, &requested);
            let data = ContractData {
                contract_name: requested,
                absolute_path: walked.root().absolute_path.clone(),
                current_artifact: cache::read_current_artifact(&artifact_path),
                source_tree_hash_hex: walked.tree_hash_hex(),
            };

            if !cache::should_compile(&data, self.registry) {
                tracing::trace!("\"{}\" is up to date, skipping", data.contract_name);
                resolved.extend(walked.sources);
                continue
            }

            let version = self.select_version(walked.root())?;
            tracing::trace!(
                "planning \"{}\" with {} source(s) for \"{}\"",
                data.contract_name,
                walked.sources.len(),
                version
            );

            let data = Arc::new(data);
            let mut unit = Sources::new();
            for (depth, source) in walked.sources.iter().enumerate() {
                unit.insert(source.absolute_path.clone(), source.source.clone());
                if depth == 0 {
                    // a root always owns its own record, even when an earlier
                    // walk already discovered the file as an import
                    out.contract_data.insert(source.absolute_path.clone(), data.clone());
                } else {
                    out.contract_data
                        .entry(source.absolute_path.clone())
                        .or_insert_with(|| data.clone());
                }
            }
            out.plan.insert(&version, unit, self.config.should_compile_independently);
            resolved.extend(walked.sources);
        }

        out.remappings = ImportRemappings::from_sources(resolved.iter());
        Ok(out)
    }

    /// Picks the back-end version for a root: the pin verbatim when present,
    /// otherwise the maximum release satisfying the root's own constraint.
    ///
    /// Batched planning deliberately consults only the root's pragmas, not
    /// those of its imports; the standard-JSON entry point intersects across
    /// a whole bundle instead.
    fn select_version(&mut self, root: &ContractSource) -> Result<String> {
        if let Some(pin) = self.pin {
            return Ok(version::normalize_version(pin))
        }
        let req = version::intersect_version_reqs(root.source.parse_version_pragmas())?;
        let index = self
            .release_index
            .ok_or_else(|| DriverError::msg("release index was not loaded"))?;
        version::pick_version(index, &req, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::Source;

    fn sources(paths: &[&str]) -> Sources {
        paths
            .iter()
            .map(|p| (PathBuf::from(p), Source::new(format!("// {p}"))))
            .collect()
    }

    #[test]
    fn batched_mode_accumulates_one_unit_per_version() {
        let mut plan = CompilationPlan::default();
        plan.insert("0.6.12", sources(&["/p/A.sol", "/p/L.sol"]), false);
        plan.insert("0.6.12", sources(&["/p/B.sol", "/p/L.sol"]), false);
        plan.insert("0.8.9", sources(&["/p/C.sol"]), false);

        assert_eq!(plan.batches.len(), 2);
        assert_eq!(plan.batches[0].version, "0.6.12");
        assert_eq!(plan.batches[0].units.len(), 1);
        assert_eq!(plan.batches[0].units[0].len(), 3);
        assert_eq!(plan.batches[1].units.len(), 1);
        assert_eq!(plan.units(), 2);
    }

    #[test]
    fn independent_mode_allocates_one_unit_per_root() {
        let mut plan = CompilationPlan::default();
        plan.insert("0.6.12", sources(&["/p/A.sol", "/p/L.sol"]), true);
        plan.insert("0.6.12", sources(&["/p/B.sol", "/p/L.sol"]), true);

        assert_eq!(plan.batches.len(), 1);
        assert_eq!(plan.batches[0].units.len(), 2);
        assert_eq!(plan.batches[0].units[0].len(), 2);
        assert_eq!(plan.batches[0].units[1].len(), 2);
    }

    #[test]
    fn version_keys_keep_insertion_order() {
        let mut plan = CompilationPlan::default();
        plan.insert("0.8.9", sources(&["/p/C.sol"]), false);
        plan.insert("0.4.26", sources(&["/p/D.sol"]), false);
        let versions: Vec<_> =
            plan.batches.iter().map(|batch| batch.version.as_str()).collect();
        assert_eq!(versions, ["0.8.9", "0.4.26"]);
    }
}
