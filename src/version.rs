//! Compiler version selection
//!
//! The release index maps short versions (`0.6.12`) to the fully qualified
//! version-with-commit the back-end project publishes
//! (`v0.6.12+commit.27d51765`). It is loaded once per run: fetched and cached
//! on disk when online, served from the cache in offline mode.

use std::{collections::BTreeMap, fs, path::PathBuf, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

/// Where the published release list is fetched from
pub const RELEASE_LIST_URL: &str = "https://binaries.soliditylang.org/bin/list.json";

/// Env var pinning the back-end: the file name encodes the version
pub const SOLCJS_PATH_ENV: &str = "SOLCJS_PATH";

/// Env var forcing offline mode when set to any non-empty value
pub const SOLC_OFFLINE_ENV: &str = "SOLC_OFFLINE";

/// Matches a version embedded in a file name, e.g.
/// `soljson-v0.6.12+commit.27d51765.js` or `solc-0.8.9`
static RE_EMBEDDED_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"v?(?P<version>\d+\.\d+\.\d+(?:\+commit\.[0-9a-f]+)?)").unwrap()
});

/// A list of upstream compiler releases
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReleaseIndex {
    /// short version -> fully qualified version with commit
    pub releases: BTreeMap<String, String>,
}

impl ReleaseIndex {
    /// The on-disk cache location, `~/.solc-driver/releases.json`
    pub fn cache_file() -> Option<PathBuf> {
        home::home_dir().map(|dir| dir.join(".solc-driver").join("releases.json"))
    }

    /// Reads the index from the on-disk cache
    pub fn read_cached() -> Result<Self> {
        let path = Self::cache_file()
            .ok_or_else(|| DriverError::msg("home directory not found"))?;
        let content = fs::read_to_string(&path).map_err(|err| DriverError::io(err, &path))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Writes the index to the on-disk cache
    pub fn write_cache(&self) -> Result<()> {
        let path = Self::cache_file()
            .ok_or_else(|| DriverError::msg("home directory not found"))?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|err| DriverError::io(err, dir))?;
        }
        fs::write(&path, serde_json::to_vec_pretty(self)?)
            .map_err(|err| DriverError::io(err, &path))?;
        Ok(())
    }

    /// Fetches the published release list
    pub async fn fetch() -> Result<Self> {
        tracing::trace!("fetching release list from \"{}\"", RELEASE_LIST_URL);

        #[derive(Deserialize)]
        struct RawList {
            releases: BTreeMap<String, String>,
        }

        let raw: RawList = reqwest::get(RELEASE_LIST_URL).await?.error_for_status()?.json().await?;
        let releases = raw
            .releases
            .into_iter()
            .map(|(short, full)| {
                // the upstream list publishes `soljson-<version>.js` names
                let full = full
                    .trim_start_matches("soljson-")
                    .trim_end_matches(".js")
                    .to_string();
                (short, full)
            })
            .collect();
        Ok(Self { releases })
    }

    /// Loads the index once per run: cache-only in offline mode, otherwise
    /// fetch-then-cache with a fallback to the cache on fetch failure
    pub async fn load(offline: bool) -> Result<Self> {
        if offline {
            tracing::trace!("offline mode, loading release index from cache");
            return Self::read_cached()
        }
        match Self::fetch().await {
            Ok(index) => {
                if let Err(err) = index.write_cache() {
                    tracing::warn!("failed to cache release index: {}", err);
                }
                Ok(index)
            }
            Err(err) => {
                tracing::warn!("release list fetch failed, trying cache: {}", err);
                Self::read_cached().map_err(|_| err)
            }
        }
    }

    /// The normalized fully qualified version for a short version
    pub fn full_version(&self, short: &str) -> Option<String> {
        self.releases.get(short).map(|full| normalize_version(full))
    }

    /// Returns the maximum short version satisfying the requirement, together
    /// with its normalized fully qualified form
    pub fn max_satisfying(&self, req: &VersionReq) -> Option<(Version, String)> {
        self.releases
            .keys()
            .filter_map(|short| Version::from_str(short).ok())
            .filter(|version| req.matches(version))
            .max()
            .map(|version| {
                let full = self.full_version(&version.to_string()).expect("key exists");
                (version, full)
            })
    }
}

/// Strips a leading `v` from the given version string
pub fn normalize_version(version: &str) -> String {
    version.trim().trim_start_matches('v').to_string()
}

/// Returns the SemVer version requirement for a solidity pragma expression
///
/// Solidity defines version ranges with a space, whereas the semver package
/// requires them to be separated with a comma. A bare version without an
/// operator is exact in solidity, but semver treats a missing operator as
/// caret, so the operator is patched manually.
pub fn version_req(pragma: &str) -> Result<VersionReq> {
    let pragma = pragma.trim().replace(' ', ",");
    let exact = !matches!(&pragma[0..1], "*" | "^" | "=" | ">" | "<" | "~");
    let mut req = VersionReq::parse(&pragma)?;
    if exact {
        req.comparators[0].op = semver::Op::Exact;
    }
    Ok(req)
}

/// Intersects the given pragma expressions into one requirement
///
/// An empty iterator yields the wildcard requirement (no constraint).
pub fn intersect_version_reqs<'a>(
    pragmas: impl IntoIterator<Item = &'a str>,
) -> Result<VersionReq> {
    let mut comparators = Vec::new();
    for pragma in pragmas {
        comparators.extend(version_req(pragma)?.comparators);
    }
    Ok(VersionReq { comparators })
}

/// The version pin encoded in the `SOLCJS_PATH` env var's file name, if set
pub fn env_version_pin() -> Option<String> {
    let path = std::env::var_os(SOLCJS_PATH_ENV)?;
    let file_name = PathBuf::from(&path).file_name()?.to_string_lossy().into_owned();
    RE_EMBEDDED_VERSION
        .captures(&file_name)
        .and_then(|cap| cap.name("version"))
        .map(|m| m.as_str().to_string())
}

/// Picks the concrete back-end version for a constraint
///
/// A pin always wins, used verbatim after normalization; otherwise the
/// maximum release satisfying the requirement is chosen.
pub fn pick_version(
    index: &ReleaseIndex,
    req: &VersionReq,
    pin: Option<&str>,
) -> Result<String> {
    if let Some(pin) = pin {
        return Ok(normalize_version(pin))
    }
    index
        .max_satisfying(req)
        .map(|(_, full)| full)
        .ok_or_else(|| DriverError::UnsatisfiableVersion(req.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> ReleaseIndex {
        ReleaseIndex {
            releases: BTreeMap::from([
                ("0.4.26".to_string(), "v0.4.26+commit.4563c3fc".to_string()),
                ("0.6.10".to_string(), "v0.6.10+commit.00c0fcaf".to_string()),
                ("0.6.12".to_string(), "v0.6.12+commit.27d51765".to_string()),
                ("0.8.9".to_string(), "v0.8.9+commit.e5eed63a".to_string()),
            ]),
        }
    }

    #[test]
    fn test_version_req() {
        let versions = ["=0.1.2", "^0.5.6", ">=0.7.1", ">0.8.0"];
        for version in versions {
            let req = version_req(version).unwrap();
            assert_eq!(req, VersionReq::from_str(version).unwrap());
        }

        // Solidity defines version ranges with a space, whereas the semver
        // package requires them to be separated with a comma
        let req = version_req(">=0.8.0 <0.9.0").unwrap();
        assert_eq!(req, VersionReq::from_str(">=0.8.0,<0.9.0").unwrap());

        // a bare version is exact
        let req = version_req("0.4.14").unwrap();
        assert!(req.matches(&Version::new(0, 4, 14)));
        assert!(!req.matches(&Version::new(0, 4, 15)));
    }

    #[test]
    fn picks_the_maximum_satisfying_release() {
        let req = version_req("^0.6.0").unwrap();
        let picked = pick_version(&index(), &req, None).unwrap();
        assert_eq!(picked, "0.6.12+commit.27d51765");
    }

    #[test]
    fn unsatisfiable_constraint_is_an_error() {
        let req = version_req("^9.9.9").unwrap();
        let err = pick_version(&index(), &req, None).unwrap_err();
        assert!(matches!(err, DriverError::UnsatisfiableVersion(_)));
    }

    #[test]
    fn pin_dominates_constraints() {
        let req = version_req("^0.6.0").unwrap();
        let picked = pick_version(&index(), &req, Some("v0.4.11")).unwrap();
        assert_eq!(picked, "0.4.11");
    }

    #[test]
    fn no_constraint_selects_the_latest() {
        let req = intersect_version_reqs([]).unwrap();
        let picked = pick_version(&index(), &req, None).unwrap();
        assert_eq!(picked, "0.8.9+commit.e5eed63a");
    }

    #[test]
    fn intersection_narrows_the_range() {
        let req = intersect_version_reqs([">=0.6.0", "<0.6.12"]).unwrap();
        let (short, _) = index().max_satisfying(&req).unwrap();
        assert_eq!(short, Version::new(0, 6, 10));
    }

    #[test]
    fn parses_embedded_versions() {
        for (file, expected) in [
            ("soljson-v0.6.12+commit.27d51765.js", "0.6.12+commit.27d51765"),
            ("solc-0.8.9", "0.8.9"),
        ] {
            let cap = RE_EMBEDDED_VERSION.captures(file).unwrap();
            assert_eq!(&cap["version"], expected);
        }
    }
}
