//! Differencing-disk ancestor chain walking.

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use ahash::AHashSet;
use tracing::warn;

use super::parse_parent;
use crate::error::Error;
use crate::utils::path::fold_path_key;

/// Object-safe reader handle for one open disk file.
pub trait DiskRead: Read + Seek + Send {}
impl<T: Read + Seek + Send> DiskRead for T {}

/// Result of one chain walk. Ancestors found before an error are kept;
/// a malformed disk mid-chain only loses the ancestors beyond it, and
/// everything already discovered still belongs in the exclusion set.
#[derive(Debug, Default)]
pub struct ChainWalk {
    /// Nearest parent first.
    pub ancestors: Vec<PathBuf>,
    pub error: Option<Error>,
}

/// Repeatedly parses headers from `start`, emitting each parent until a
/// root disk (no parent) is reached. Finite by construction: a visited
/// set over folded paths turns a corrupt self- or loop-referencing chain
/// into a `CyclicChain` error instead of an endless walk, since the
/// container formats define no cycle protection of their own.
pub fn walk_chain<F>(start: &Path, mut open: F) -> ChainWalk
where
    F: FnMut(&Path) -> Result<Box<dyn DiskRead>, Error>,
{
    let mut walk = ChainWalk::default();
    let mut visited: AHashSet<String> = AHashSet::new();
    visited.insert(fold_path_key(&start.to_string_lossy()));

    let mut current = start.to_path_buf();
    loop {
        let result = open(&current).and_then(|mut reader| parse_parent(&mut reader, &current));
        let header = match result {
            Ok(header) => header,
            Err(err) => {
                warn!("chain walk stopped at {}: {}", current.display(), err);
                walk.error = Some(err);
                break;
            }
        };

        let Some(parent) = header.parent_path else {
            break;
        };

        let parent_path = PathBuf::from(&parent);
        if !visited.insert(fold_path_key(&parent)) {
            walk.error = Some(Error::CyclicChain { path: parent_path });
            break;
        }
        walk.ancestors.push(parent_path.clone());
        current = parent_path;
    }
    walk
}

/// Convenience walk over the local filesystem.
pub fn walk_chain_local(start: &Path) -> ChainWalk {
    walk_chain(start, |path| {
        super::open_shared(path).map(|file| Box::new(file) as Box<dyn DiskRead>)
    })
}
