//! Utility functions

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{DriverError, Result};

/// A regex that matches the import path of any solidity import statement form,
/// with the named groups "p1".."p4".
pub static RE_SOL_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"import\s+(?:(?:"(?P<p1>[^;]*)"|'(?P<p2>[^;]*)')(?:;|\s+as\s+[^;]*;)|.+from\s+(?:"(?P<p3>.*)"|'(?P<p4>.*)');)"#).unwrap()
});

/// A regex that matches the version part of a solidity pragma
/// as follows: `pragma solidity ^0.5.2;` => `^0.5.2`
pub static RE_SOL_PRAGMA_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"pragma\s+solidity\s+(?P<version>.+?);").unwrap());

/// Returns all path parts from any solidity import statement in a string,
/// `import "./contracts/Contract.sol";` -> `"./contracts/Contract.sol"`.
///
/// See also <https://docs.soliditylang.org/en/v0.8.9/grammar.html>
pub fn find_import_paths(contract: &str) -> Vec<&str> {
    RE_SOL_IMPORT
        .captures_iter(contract)
        .filter_map(|cap| {
            cap.name("p1")
                .or_else(|| cap.name("p2"))
                .or_else(|| cap.name("p3"))
                .or_else(|| cap.name("p4"))
        })
        .map(|m| m.as_str())
        .collect()
}

/// Returns every version pragma in the given input, in source order:
/// `pragma solidity ^0.5.2;` => `^0.5.2`
///
/// A file may carry more than one pragma; the constraint of the file is their
/// intersection.
pub fn find_version_pragmas(contract: &str) -> Vec<&str> {
    RE_SOL_PRAGMA_VERSION
        .captures_iter(contract)
        .filter_map(|cap| cap.name("version"))
        .map(|m| m.as_str())
        .collect()
}

/// Returns the first version pragma of the given input, if any
pub fn find_version_pragma(contract: &str) -> Option<&str> {
    find_version_pragmas(contract).into_iter().next()
}

/// Returns a list of absolute paths to all the solidity files under the root,
/// in a deterministic walk order
///
/// NOTE: this does not resolve imports from other locations
pub fn source_files(root: impl AsRef<Path>) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|ext| ext == "sol").unwrap_or_default())
        .map(|e| e.path().into())
        .collect()
}

/// Returns the file name without the `.sol` extension
pub fn source_stem(path: impl AsRef<Path>) -> Option<String> {
    path.as_ref().file_stem().map(|stem| stem.to_string_lossy().into_owned())
}

/// Canonicalize the path, returning an error carrying the offending path
pub fn canonicalize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    std::fs::canonicalize(path).map_err(|err| DriverError::io(err, path))
}

/// Returns the given name as a path, appending the `.sol` extension if the
/// name carries none
pub fn with_sol_extension(name: &str) -> PathBuf {
    let path = Path::new(name);
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension("sol")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir_all, File};

    #[test]
    fn can_find_solidity_sources() {
        let tmp_dir = tempfile::tempdir().unwrap();

        let file_a = tmp_dir.path().join("a.sol");
        let nested = tmp_dir.path().join("nested");
        let nested_deep = nested.join("deep");
        let file_b = nested.join("b.sol");
        let file_c = nested_deep.join("c.sol");
        File::create(&file_a).unwrap();
        create_dir_all(&nested_deep).unwrap();
        File::create(&file_b).unwrap();
        File::create(&file_c).unwrap();

        let files: std::collections::HashSet<_> =
            source_files(tmp_dir.path()).into_iter().collect();
        let expected: std::collections::HashSet<_> = [file_a, file_b, file_c].into();
        assert_eq!(files, expected);
    }

    #[test]
    fn can_find_import_paths() {
        let s = r##"//SPDX-License-Identifier: Unlicense
pragma solidity ^0.8.0;
import "hardhat/console.sol";
import "../contract/Contract.sol";
import { T } from './Types.sol';
"##;
        assert_eq!(
            vec!["hardhat/console.sol", "../contract/Contract.sol", "./Types.sol"],
            find_import_paths(s)
        );
    }

    #[test]
    fn can_find_version_pragmas() {
        let s = r##"//SPDX-License-Identifier: Unlicense
pragma solidity >=0.6.0;
pragma solidity <0.8.0;
"##;
        assert_eq!(vec![">=0.6.0", "<0.8.0"], find_version_pragmas(s));
        assert_eq!(Some(">=0.6.0"), find_version_pragma(s));
    }

    #[test]
    fn appends_sol_extension() {
        assert_eq!(with_sol_extension("Token"), PathBuf::from("Token.sol"));
        assert_eq!(with_sol_extension("./lib/Token.sol"), PathBuf::from("./lib/Token.sol"));
    }
}
