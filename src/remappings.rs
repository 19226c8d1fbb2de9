//! Import remappings shared by all units of a run

use std::{
    collections::BTreeMap,
    fmt,
    path::{Component, Path, PathBuf},
};

use crate::resolver::ContractSource;

/// A mapping from a bare dependency prefix (e.g. `@foo/bar`) to the
/// filesystem root the package was resolved from.
///
/// The back-end compiler can only reference files that exist locally, so
/// imports through a dependency registry are rewritten as
/// `prefix=target` remappings in every standard-JSON input of the run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportRemappings(BTreeMap<String, PathBuf>);

impl ImportRemappings {
    /// Derives the remappings from the union of all sources resolved during
    /// planning.
    ///
    /// A source whose logical path is a bare package path (neither relative
    /// nor absolute) contributes its leading package prefix, mapped to the
    /// directory the package was found in. Scoped packages (`@scope/name`)
    /// keep both leading segments as the prefix.
    pub fn from_sources<'a>(sources: impl IntoIterator<Item = &'a ContractSource>) -> Self {
        let mut remappings = Self::default();
        for source in sources {
            if let Some((prefix, root)) = package_prefix(&source.logical_path, &source.absolute_path)
            {
                remappings.0.entry(prefix).or_insert(root);
            }
        }
        remappings
    }

    pub fn insert(&mut self, prefix: impl Into<String>, root: impl Into<PathBuf>) {
        self.0.insert(prefix.into(), root.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, prefix: &str) -> Option<&PathBuf> {
        self.0.get(prefix)
    }

    /// Renders the remappings in the `prefix=target/` form the back-end
    /// understands
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|(name, path)| format!("{}={}/", name, path.display())).collect()
    }
}

impl fmt::Display for ImportRemappings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_strings().join(","))
    }
}

/// Extracts `(prefix, package_root)` from a logical package path and the
/// absolute path it resolved to, `@foo/bar/baz.sol` -> `@foo/bar`.
fn package_prefix(logical: &Path, absolute: &Path) -> Option<(String, PathBuf)> {
    let mut components = logical.components();
    let first = match components.next()? {
        Component::Normal(first) => first.to_str()?,
        // relative and absolute logical paths are part of the project itself
        _ => return None,
    };
    if first.starts_with("http") {
        return None
    }

    let prefix = if first.starts_with('@') {
        match components.next() {
            Some(Component::Normal(second)) => format!("{}/{}", first, second.to_str()?),
            _ => return None,
        }
    } else {
        // a bare file name is not a package import
        logical.parent().filter(|p| !p.as_os_str().is_empty())?;
        first.to_string()
    };

    // the absolute path ends with the logical path; stripping it yields the
    // directory the package was found in
    let mut registry_root = absolute.to_path_buf();
    for _ in logical.components() {
        registry_root = registry_root.parent()?.to_path_buf();
    }
    // a project-relative logical path can look like a bare package path; only
    // sources found under a registry directory are actual packages
    if registry_root.file_name()? != "node_modules" {
        return None
    }
    Some((prefix.clone(), registry_root.join(prefix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::Source;

    fn source(logical: &str, absolute: &str) -> ContractSource {
        ContractSource {
            logical_path: logical.into(),
            absolute_path: absolute.into(),
            source: Source::new(""),
        }
    }

    #[test]
    fn derives_scoped_package_prefix() {
        let remappings = ImportRemappings::from_sources([&source(
            "@foo/bar/contracts/Token.sol",
            "/proj/node_modules/@foo/bar/contracts/Token.sol",
        )]);
        assert_eq!(
            remappings.get("@foo/bar"),
            Some(&PathBuf::from("/proj/node_modules/@foo/bar"))
        );
        assert_eq!(
            remappings.to_strings(),
            vec!["@foo/bar=/proj/node_modules/@foo/bar/".to_string()]
        );
    }

    #[test]
    fn derives_unscoped_package_prefix() {
        let remappings = ImportRemappings::from_sources([&source(
            "pkg/Token.sol",
            "/proj/node_modules/pkg/Token.sol",
        )]);
        assert_eq!(remappings.get("pkg"), Some(&PathBuf::from("/proj/node_modules/pkg")));
    }

    #[test]
    fn project_sources_contribute_nothing() {
        let remappings = ImportRemappings::from_sources([
            &source("./Token.sol", "/proj/contracts/Token.sol"),
            &source("/abs/Token.sol", "/abs/Token.sol"),
            &source("Token.sol", "/proj/contracts/Token.sol"),
            // project-relative, not a package even though the shape matches
            &source("lib/Math.sol", "/proj/contracts/lib/Math.sol"),
        ]);
        assert!(remappings.is_empty());
    }
}
