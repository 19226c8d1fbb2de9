//! Source-tree traversal and hashing
//!
//! A single depth-first walk from a root both computes the content-addressed
//! tree hash and records every source the root transitively depends on. The
//! recorded set is the planner's knowledge of the unit the root belongs to,
//! so no second traversal is needed.

use std::collections::{HashSet, VecDeque};

use sha2::{Digest, Sha256};

use crate::{
    error::Result,
    resolver::{ContractSource, FallthroughResolver},
};

/// The outcome of one traversal
#[derive(Clone, Debug)]
pub struct SourceWalk {
    /// Digest over the root and its transitive imports
    pub tree_hash: [u8; 32],
    /// Every unique source visited, in depth-first visit order; the root is
    /// first
    pub sources: Vec<ContractSource>,
}

impl SourceWalk {
    /// The tree hash as lowercase hex with a leading `0x`
    pub fn tree_hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.tree_hash))
    }

    /// The root source of the walk
    pub fn root(&self) -> &ContractSource {
        &self.sources[0]
    }
}

/// Walks the source tree rooted at `name`, resolving every import through the
/// given chain
///
/// Each unique file is hashed exactly once; the tree hash is the digest of
/// the per-file digests in visit order, so the hash is independent of import
/// statement reordering but sensitive to every byte of every file in the
/// closure. Cycles are broken by visited-set membership on absolute paths.
pub async fn walk(resolver: &FallthroughResolver, name: &str) -> Result<SourceWalk> {
    let root = resolver.resolve_source(name).await?;
    tracing::trace!(
        "walking source tree of \"{}\" at \"{}\"",
        name,
        root.absolute_path.display()
    );

    let mut visited = HashSet::new();
    let mut sources = Vec::new();
    let mut digests = Sha256::new();

    // depth-first with an explicit stack of pending import names per frame
    let mut stack: Vec<VecDeque<String>> = Vec::new();
    visit(root, &mut visited, &mut sources, &mut digests, &mut stack);

    while let Some(frame) = stack.last_mut() {
        let import = match frame.pop_front() {
            Some(import) => import,
            None => {
                stack.pop();
                continue
            }
        };
        let source = resolver.resolve_source(&import).await?;
        if visited.contains(&source.absolute_path) {
            continue
        }
        visit(source, &mut visited, &mut sources, &mut digests, &mut stack);
    }

    Ok(SourceWalk { tree_hash: digests.finalize().into(), sources })
}

fn visit(
    source: ContractSource,
    visited: &mut HashSet<std::path::PathBuf>,
    sources: &mut Vec<ContractSource>,
    digests: &mut Sha256,
    stack: &mut Vec<VecDeque<String>>,
) {
    visited.insert(source.absolute_path.clone());
    digests.update(Sha256::digest(source.source.content.as_bytes()));
    stack.push(source.source.parse_imports().iter().map(|s| s.to_string()).collect());
    sources.push(source);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &std::path::Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn project() -> (tempfile::TempDir, FallthroughResolver) {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = FallthroughResolver::new(tmp.path());
        (tmp, resolver)
    }

    #[tokio::test]
    async fn hash_is_deterministic() {
        let (tmp, resolver) = project();
        write(tmp.path(), "A.sol", "pragma solidity ^0.6.0;\nimport \"./B.sol\";\n");
        write(tmp.path(), "B.sol", "pragma solidity ^0.6.0;\n");

        let first = walk(&resolver, "A").await.unwrap();
        let second = walk(&resolver, "A").await.unwrap();
        assert_eq!(first.tree_hash, second.tree_hash);
        assert_eq!(first.sources.len(), 2);
        assert!(first.tree_hash_hex().starts_with("0x"));
        assert_eq!(first.tree_hash_hex().len(), 66);
    }

    #[tokio::test]
    async fn hash_covers_the_whole_closure() {
        let (tmp, resolver) = project();
        write(tmp.path(), "A.sol", "import \"./B.sol\";\n");
        write(tmp.path(), "B.sol", "import \"./C.sol\";\n");
        write(tmp.path(), "C.sol", "// leaf\n");

        let before = walk(&resolver, "A").await.unwrap();
        // a single byte change in a transitive import changes the root hash
        write(tmp.path(), "C.sol", "// leaf \n");
        let after = walk(&resolver, "A").await.unwrap();
        assert_ne!(before.tree_hash, after.tree_hash);
    }

    #[tokio::test]
    async fn cycles_are_broken() {
        let (tmp, resolver) = project();
        write(tmp.path(), "A.sol", "import \"./B.sol\";\n");
        write(tmp.path(), "B.sol", "import \"./A.sol\";\n");

        let walked = walk(&resolver, "A").await.unwrap();
        assert_eq!(walked.sources.len(), 2);
    }

    #[tokio::test]
    async fn shared_imports_are_hashed_once() {
        let (tmp, resolver) = project();
        write(tmp.path(), "A.sol", "import \"./B.sol\";\nimport \"./C.sol\";\n");
        write(tmp.path(), "B.sol", "import \"./C.sol\";\n");
        write(tmp.path(), "C.sol", "// shared\n");

        let walked = walk(&resolver, "A").await.unwrap();
        // A, B, C: C appears once even though two files import it
        assert_eq!(walked.sources.len(), 3);
        // depth-first: B is visited before C through B's import
        let names: Vec<_> =
            walked.sources.iter().filter_map(ContractSource::contract_name).collect();
        assert_eq!(names, ["A", "B", "C"]);
    }
}
