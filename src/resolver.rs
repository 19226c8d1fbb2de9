//! Resolution of logical contract names to source records
//!
//! A name reaching the driver can be a URL, a bare package path installed
//! under a dependency registry, a project-relative path, an absolute path or
//! just a contract's basename. Each of these shapes is handled by one
//! strategy; the [`FallthroughResolver`] tries them in a fixed order and the
//! first applicable strategy wins.
//!
//! Non-applicability (`Ok(None)`) is distinct from a hard failure (`Err`):
//! only the former falls through to the next strategy.

use std::{fmt, path::PathBuf};

use async_trait::async_trait;

use crate::{
    artifacts::Source,
    error::{DriverError, Result},
    utils,
};

/// A resolved source record
///
/// Identity is the absolute path: two records with equal absolute paths refer
/// to the same file regardless of the logical name they were reached through.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContractSource {
    /// The name the source was requested under, project-relative where
    /// applicable
    pub logical_path: PathBuf,
    /// Where the source actually lives
    pub absolute_path: PathBuf,
    pub source: Source,
}

impl ContractSource {
    /// The contract name the file is expected to define
    pub fn contract_name(&self) -> Option<String> {
        utils::source_stem(&self.absolute_path)
    }
}

/// The capability every resolution strategy provides
///
/// `resolve` answers `Ok(None)` when the strategy does not apply to the given
/// name; `get_all` enumerates every source the strategy knows about and is
/// only non-empty for the project-wide name index.
#[async_trait]
pub trait Resolve: fmt::Debug + Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Option<ContractSource>>;

    fn get_all(&self) -> Result<Vec<ContractSource>> {
        Ok(Vec::new())
    }
}

/// Fetches `http(s)://` names
#[derive(Debug)]
pub struct UrlResolver {
    client: reqwest::Client,
}

impl UrlResolver {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for UrlResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resolve for UrlResolver {
    async fn resolve(&self, name: &str) -> Result<Option<ContractSource>> {
        if !name.starts_with("http://") && !name.starts_with("https://") {
            return Ok(None)
        }
        tracing::trace!("fetching source from \"{}\"", name);
        let content = self.client.get(name).send().await?.error_for_status()?.text().await?;
        Ok(Some(ContractSource {
            logical_path: name.into(),
            absolute_path: name.into(),
            source: Source::new(content),
        }))
    }
}

/// Looks bare package paths up under the dependency registry directories of
/// the project root and each of its ancestors
#[derive(Debug)]
pub struct RegistryResolver {
    root: PathBuf,
    registry_dir: String,
}

impl RegistryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), registry_dir: "node_modules".to_string() }
    }
}

#[async_trait]
impl Resolve for RegistryResolver {
    async fn resolve(&self, name: &str) -> Result<Option<ContractSource>> {
        let path = PathBuf::from(name);
        if path.is_absolute() || name.starts_with("./") || name.starts_with("../") {
            return Ok(None)
        }
        // a package path has at least `<package>/<file>`
        if path.components().count() < 2 {
            return Ok(None)
        }
        for dir in self.root.ancestors() {
            let candidate = dir.join(&self.registry_dir).join(&path);
            if candidate.is_file() {
                tracing::trace!("resolved \"{}\" at \"{}\"", name, candidate.display());
                return Ok(Some(ContractSource {
                    logical_path: path,
                    absolute_path: utils::canonicalize(&candidate)?,
                    source: Source::async_read(&candidate).await?,
                }))
            }
        }
        Ok(None)
    }
}

/// Resolves names relative to the project directory
#[derive(Debug)]
pub struct RelativeResolver {
    root: PathBuf,
}

impl RelativeResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Resolve for RelativeResolver {
    async fn resolve(&self, name: &str) -> Result<Option<ContractSource>> {
        let path = utils::with_sol_extension(name);
        if path.is_absolute() {
            return Ok(None)
        }
        let candidate = self.root.join(&path);
        if !candidate.is_file() {
            return Ok(None)
        }
        Ok(Some(ContractSource {
            logical_path: path,
            absolute_path: utils::canonicalize(&candidate)?,
            source: Source::async_read(&candidate).await?,
        }))
    }
}

/// Resolves names that already are absolute filesystem paths
#[derive(Debug)]
pub struct AbsoluteResolver;

#[async_trait]
impl Resolve for AbsoluteResolver {
    async fn resolve(&self, name: &str) -> Result<Option<ContractSource>> {
        let path = PathBuf::from(name);
        if !path.is_absolute() || !path.is_file() {
            return Ok(None)
        }
        Ok(Some(ContractSource {
            logical_path: path.clone(),
            absolute_path: utils::canonicalize(&path)?,
            source: Source::async_read(&path).await?,
        }))
    }
}

/// The project-wide name index: walks the project directory and matches
/// sources by basename
///
/// This strategy is the last in the chain and doubles as the `get_all`
/// provider used when the configuration requests `"*"`.
#[derive(Debug)]
pub struct NameResolver {
    root: PathBuf,
}

impl NameResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record(&self, file: PathBuf, source: Source) -> ContractSource {
        let logical = file.strip_prefix(&self.root).map(Into::into).unwrap_or_else(|_| file.clone());
        ContractSource { logical_path: logical, absolute_path: file, source }
    }
}

#[async_trait]
impl Resolve for NameResolver {
    async fn resolve(&self, name: &str) -> Result<Option<ContractSource>> {
        let wanted = utils::with_sol_extension(name);
        let wanted = match wanted.file_name() {
            Some(file_name) => file_name.to_os_string(),
            None => return Ok(None),
        };
        for file in utils::source_files(&self.root) {
            if file.file_name() == Some(wanted.as_os_str()) {
                let source = Source::async_read(&file).await?;
                return Ok(Some(self.record(utils::canonicalize(&file)?, source)))
            }
        }
        Ok(None)
    }

    fn get_all(&self) -> Result<Vec<ContractSource>> {
        let mut sources = Vec::new();
        for file in utils::source_files(&self.root) {
            let source = Source::read(&file)?;
            sources.push(self.record(utils::canonicalize(&file)?, source));
        }
        Ok(sources)
    }
}

/// The built-in strategies plus the registration point for user supplied ones
#[derive(Debug)]
pub enum Strategy {
    Url(UrlResolver),
    Registry(RegistryResolver),
    Relative(RelativeResolver),
    Absolute(AbsoluteResolver),
    Name(NameResolver),
    Custom(Box<dyn Resolve>),
}

#[async_trait]
impl Resolve for Strategy {
    async fn resolve(&self, name: &str) -> Result<Option<ContractSource>> {
        match self {
            Strategy::Url(resolver) => resolver.resolve(name).await,
            Strategy::Registry(resolver) => resolver.resolve(name).await,
            Strategy::Relative(resolver) => resolver.resolve(name).await,
            Strategy::Absolute(resolver) => resolver.resolve(name).await,
            Strategy::Name(resolver) => resolver.resolve(name).await,
            Strategy::Custom(resolver) => resolver.resolve(name).await,
        }
    }

    fn get_all(&self) -> Result<Vec<ContractSource>> {
        match self {
            Strategy::Url(resolver) => resolver.get_all(),
            Strategy::Registry(resolver) => resolver.get_all(),
            Strategy::Relative(resolver) => resolver.get_all(),
            Strategy::Absolute(resolver) => resolver.get_all(),
            Strategy::Name(resolver) => resolver.get_all(),
            Strategy::Custom(resolver) => resolver.get_all(),
        }
    }
}

/// An ordered sequence of strategies tried until one applies
#[derive(Debug)]
pub struct FallthroughResolver {
    strategies: Vec<Strategy>,
}

impl FallthroughResolver {
    /// The default chain for a project rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            strategies: vec![
                Strategy::Url(UrlResolver::new()),
                Strategy::Registry(RegistryResolver::new(&root)),
                Strategy::Relative(RelativeResolver::new(&root)),
                Strategy::Absolute(AbsoluteResolver),
                Strategy::Name(NameResolver::new(root)),
            ],
        }
    }

    /// Registers a user supplied strategy, tried right before the final
    /// name-index fallback
    pub fn register(&mut self, resolver: Box<dyn Resolve>) {
        let at = self.strategies.len().saturating_sub(1);
        self.strategies.insert(at, Strategy::Custom(resolver));
    }

    /// Resolves the name through the chain; exhaustion is an error
    pub async fn resolve_source(&self, name: &str) -> Result<ContractSource> {
        for strategy in &self.strategies {
            if let Some(source) = strategy.resolve(name).await? {
                return Ok(source)
            }
        }
        Err(DriverError::NameResolution(name.to_string()))
    }

    /// Enumerates every source the chain knows about
    pub fn get_all(&self) -> Result<Vec<ContractSource>> {
        let mut all = Vec::new();
        for strategy in &self.strategies {
            all.extend(strategy.get_all()?);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project() -> (tempfile::TempDir, FallthroughResolver) {
        let tmp = tempfile::tempdir().unwrap();
        let contracts = tmp.path().join("contracts");
        fs::create_dir_all(contracts.join("lib")).unwrap();
        fs::write(contracts.join("Token.sol"), "pragma solidity ^0.6.0;\n").unwrap();
        fs::write(contracts.join("lib/Math.sol"), "pragma solidity ^0.6.0;\n").unwrap();
        let resolver = FallthroughResolver::new(&contracts);
        (tmp, resolver)
    }

    #[tokio::test]
    async fn resolves_relative_names() {
        let (_tmp, resolver) = project();
        let source = resolver.resolve_source("./Token.sol").await.unwrap();
        assert_eq!(source.contract_name().as_deref(), Some("Token"));
    }

    #[tokio::test]
    async fn falls_through_to_name_index() {
        let (_tmp, resolver) = project();
        // `Math.sol` lives in a subdirectory and only the basename is known
        let source = resolver.resolve_source("Math").await.unwrap();
        assert!(source.absolute_path.ends_with("lib/Math.sol"));
    }

    #[tokio::test]
    async fn resolves_registry_packages() {
        let tmp = tempfile::tempdir().unwrap();
        let contracts = tmp.path().join("contracts");
        let pkg = tmp.path().join("node_modules/@scope/pkg");
        fs::create_dir_all(&contracts).unwrap();
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("Lib.sol"), "pragma solidity ^0.6.0;\n").unwrap();

        let resolver = FallthroughResolver::new(&contracts);
        let source = resolver.resolve_source("@scope/pkg/Lib.sol").await.unwrap();
        assert_eq!(source.logical_path, PathBuf::from("@scope/pkg/Lib.sol"));
        assert!(source.absolute_path.ends_with("node_modules/@scope/pkg/Lib.sol"));
    }

    #[tokio::test]
    async fn exhaustion_is_an_error() {
        let (_tmp, resolver) = project();
        let err = resolver.resolve_source("Missing").await.unwrap_err();
        assert!(matches!(err, DriverError::NameResolution(name) if name == "Missing"));
    }

    #[test]
    fn get_all_enumerates_the_project() {
        let (_tmp, resolver) = project();
        let all = resolver.get_all().unwrap();
        let mut names: Vec<_> =
            all.iter().filter_map(ContractSource::contract_name).collect();
        names.sort();
        assert_eq!(names, ["Math", "Token"]);
    }
}
