//! Incremental-build decisions
//!
//! The cache gate compares a freshly computed source-tree hash and the
//! currently configured compiler settings against the artifact persisted by a
//! previous run. Settings comparison is delegated to the wrapper constructed
//! for the artifact's recorded version, because only the wrapper knows which
//! fields are irrelevant.

use std::{collections::HashMap, path::PathBuf};

use crate::{
    artifacts::{ContractArtifact, ARTIFACT_SCHEMA_VERSION},
    compile::WrapperRegistry,
    plan::ContractData,
};

/// Answers whether the given contract must be rebuilt
///
/// Rebuild when any of: no artifact exists, the artifact's schema version
/// differs from the current constant, the wrapper reports changed settings,
/// or the source tree hash changed. A recorded compiler version no wrapper
/// family supports also answers "rebuild": the stale artifact cannot be
/// validated, so it is replaced.
pub(crate) fn should_compile(data: &ContractData, registry: &mut WrapperRegistry) -> bool {
    let artifact = match &data.current_artifact {
        Some(artifact) => artifact,
        None => {
            tracing::trace!("no artifact for \"{}\", compiling", data.contract_name);
            return true
        }
    };
    if artifact.schema_version != ARTIFACT_SCHEMA_VERSION {
        tracing::trace!(
            "artifact schema \"{}\" is outdated for \"{}\", compiling",
            artifact.schema_version,
            data.contract_name
        );
        return true
    }
    match registry.get_or_create(&artifact.compiler.version) {
        Ok(wrapper) => {
            if !wrapper.settings_equal(&artifact.compiler.settings) {
                tracing::trace!(
                    "compiler settings changed for \"{}\", compiling",
                    data.contract_name
                );
                return true
            }
        }
        Err(err) => {
            tracing::warn!(
                "cannot validate artifact of \"{}\" ({}), compiling",
                data.contract_name,
                err
            );
            return true
        }
    }
    if artifact.source_tree_hash_hex != data.source_tree_hash_hex {
        tracing::trace!("source tree of \"{}\" changed, compiling", data.contract_name);
        return true
    }
    false
}

/// Per-run bookkeeping of which artifact files were already written and from
/// how large a unit
///
/// The same file often appears in several units because multiple roots import
/// it. The artifact produced from the smallest unit wins: its recorded
/// sources and compiler input are the most focused, so an existing artifact
/// is only overwritten by one from a strictly smaller unit.
#[derive(Debug, Default)]
pub(crate) struct PersistedArtifactCache {
    unit_sizes: HashMap<PathBuf, usize>,
}

impl PersistedArtifactCache {
    /// Whether an artifact produced from a unit of `unit_size` files should
    /// be persisted for `path`, recording the size when it should
    pub(crate) fn should_persist(&mut self, path: &PathBuf, unit_size: usize) -> bool {
        match self.unit_sizes.get(path) {
            Some(&existing) if existing <= unit_size => false,
            _ => {
                self.unit_sizes.insert(path.clone(), unit_size);
                true
            }
        }
    }
}

/// Loads the artifact previously written for the given path, if any
pub(crate) fn read_current_artifact(path: &PathBuf) -> Option<ContractArtifact> {
    if !path.exists() {
        return None
    }
    match ContractArtifact::read(path) {
        Ok(artifact) => Some(artifact),
        Err(err) => {
            // an unreadable artifact is treated like a missing one
            tracing::warn!("discarding unreadable artifact \"{}\": {}", path.display(), err);
            None
        }
    }
}
