//! The seam between the inventory and the hypervisor: abstract
//! capabilities, not concrete management APIs. Production connects via
//! the platform's management interface; tests plug in a fake.

use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::vhd::chain::DiskRead;

/// Host-wide default locations reported by the hypervisor.
#[derive(Debug, Clone)]
pub struct HostDefaults {
    /// Default VM configuration path.
    pub vm_config_path: String,
    /// Default virtual hard disk path.
    pub virtual_disk_path: String,
    /// The host's VM-registration directory.
    pub registration_dir: String,
}

/// Failover-cluster membership as seen from one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub name: String,
    /// The node designated to own cluster-shared-volume scanning.
    pub primary_node: String,
    pub members: Vec<String>,
}

impl ClusterInfo {
    pub fn is_member(&self, host: &str) -> bool {
        self.members.iter().any(|m| m.eq_ignore_ascii_case(host))
    }

    pub fn is_primary(&self, host: &str) -> bool {
        self.primary_node.eq_ignore_ascii_case(host)
    }
}

/// A point-in-time VM state; its metadata files are named by its id.
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    pub id: String,
    /// Directory holding the checkpoint's metadata files.
    pub metadata_dir: String,
}

/// Everything the hypervisor reports about one registered VM.
#[derive(Debug, Clone)]
pub struct VmInfo {
    pub id: String,
    pub name: String,
    pub generation: u32,
    /// Full path of the VM's configuration file.
    pub config_path: String,
    pub checkpoints: Vec<CheckpointInfo>,
    /// Every attached virtual hard disk.
    pub disk_paths: Vec<String>,
    /// Attached floppy images; only meaningful for generation 1.
    pub floppy_paths: Vec<String>,
    pub smart_paging_path: Option<String>,
    pub smart_paging_in_use: bool,
}

/// Per-host capabilities the inventory needs. One session per host; the
/// host is the unit of isolation, so sessions share no mutable state.
pub trait HostSession: Send + Sync {
    fn defaults(&self) -> Result<HostDefaults, Error>;

    fn cluster(&self) -> Result<Option<ClusterInfo>, Error>;

    fn vms(&self) -> Result<Vec<VmInfo>, Error>;

    /// Locally mounted cluster-shared-volume roots under the system
    /// drive's `ClusterStorage` directory.
    fn cluster_storage_roots(&self) -> Result<Vec<String>, Error>;

    /// Opens a disk file for header reads, shared so the hypervisor can
    /// keep using it.
    fn open_disk(&self, path: &Path) -> Result<Box<dyn DiskRead>, Error>;

    /// Plain (non-recursive) file listing of a directory.
    fn list_files(&self, path: &Path) -> Result<Vec<PathBuf>, Error>;
}

/// Establishes sessions. A failed connect is the `UnreachableHost` case:
/// that host's contribution is dropped, siblings proceed.
pub trait HostConnector: Send + Sync {
    fn connect(&self, host: &str) -> Result<Box<dyn HostSession>, Error>;
}
