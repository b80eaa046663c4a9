use ahash::AHashSet;

use crate::utils::path::fold_path_key;

/// What a file is to the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// VM configuration, checkpoint or save-state file, GUID-named.
    Metadata,
    /// Virtual hard disk or floppy image.
    Disk,
    /// A directory the hypervisor owns wholesale (a shared config or
    /// checkpoint location recorded as one entry rather than per file).
    DirectoryRoot,
}

/// One file known to belong to the hypervisor. Rebuilt from scratch on
/// every inventory pass; never persisted across invocations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagedFileReference {
    /// Normalized absolute path.
    pub path: String,
    /// Owning host, or `None` for shared (SMB) storage: any host may
    /// mount a share, so shared paths have no single owner.
    pub owning_host: Option<String>,
    pub kind: FileKind,
    /// The VM the file belongs to, where known. Lets a share-side scan
    /// attribute shared entries even though they carry no host.
    pub owner_vm: Option<String>,
}

/// One filesystem root to be recursively searched for orphans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub path: String,
    /// Host that must perform the scan, or `None` for a share reachable
    /// by the invoking process directly.
    pub owner_host: Option<String>,
    /// Set when the owner is a non-primary cluster node whose local
    /// `ClusterStorage` mount is already covered by the primary node.
    pub skip_cluster_storage: bool,
}

impl ScanTarget {
    pub fn new(path: impl Into<String>, owner_host: Option<String>) -> Self {
        ScanTarget {
            path: path.into(),
            owner_host,
            skip_cluster_storage: false,
        }
    }
}

/// A file the reconciler judged orphaned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedFile {
    pub path: String,
    pub owning_host: Option<String>,
    pub kind: FileKind,
}

/// A scan root that could not be enumerated, distinct from "scanned,
/// zero orphans found".
#[derive(Debug)]
pub struct FailedRoot {
    pub target: ScanTarget,
    pub error: crate::error::Error,
}

/// A host whose inventory could not be collected; its contribution is
/// dropped while sibling hosts proceed.
#[derive(Debug)]
pub struct HostFailure {
    pub host: String,
    pub error: crate::error::Error,
}

type ExclusionKey = (String, Option<String>);

/// Two-partition index of known files (metadata and disks), each keyed
/// on the folded `(path, owner-host)` pair. A file is known iff its pair
/// appears in the partition for its kind; host-owned probes fall back to
/// the host-agnostic (shared) key.
#[derive(Debug, Default)]
pub struct ExclusionSet {
    metadata: AHashSet<ExclusionKey>,
    disks: AHashSet<ExclusionKey>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: &ManagedFileReference) {
        let key = Self::key(&reference.path, reference.owning_host.as_deref());
        match reference.kind {
            FileKind::Metadata => {
                self.metadata.insert(key);
            }
            FileKind::Disk => {
                self.disks.insert(key);
            }
            // Directory roots are ownership markers, not per-file
            // exclusions; files under them are inserted separately.
            FileKind::DirectoryRoot => {}
        }
    }

    pub fn contains_disk(&self, path: &str, host: Option<&str>) -> bool {
        Self::probe(&self.disks, path, host)
    }

    pub fn contains_metadata(&self, path: &str, host: Option<&str>) -> bool {
        Self::probe(&self.metadata, path, host)
    }

    pub fn disk_count(&self) -> usize {
        self.disks.len()
    }

    pub fn metadata_count(&self) -> usize {
        self.metadata.len()
    }

    fn key(path: &str, host: Option<&str>) -> ExclusionKey {
        (fold_path_key(path), host.map(|h| h.to_ascii_lowercase()))
    }

    fn probe(set: &AHashSet<ExclusionKey>, path: &str, host: Option<&str>) -> bool {
        let folded = fold_path_key(path);
        if let Some(host) = host {
            if set.contains(&(folded.clone(), Some(host.to_ascii_lowercase()))) {
                return true;
            }
        }
        set.contains(&(folded, None))
    }
}
