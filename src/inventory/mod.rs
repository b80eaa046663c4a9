//! Per-host ownership inventory: every file the hypervisor considers in
//! use, partitioned into locally-addressed and share-addressed entries,
//! plus the scan targets the host contributes.

pub mod local;
pub mod source;

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Error;
use crate::model::{FileKind, ManagedFileReference, ScanTarget};
use crate::scanner::is_disk_extension;
use crate::utils::path::{extension_lower, fold_path_key, is_unc_share, parent_dir};
use crate::vhd::chain::{walk_chain, ChainWalk};

use source::{HostSession, VmInfo};

/// One host's inventory pass. Immutable once collected; the engine merges
/// per-host results in a single reduction step.
#[derive(Debug)]
pub struct HostInventory {
    pub host: String,
    pub cluster: Option<source::ClusterInfo>,
    pub targets: Vec<ScanTarget>,
    pub known: Vec<ManagedFileReference>,
    /// Non-fatal trouble met along the way (unreadable directory, broken
    /// differencing chain); collected, never swallowed.
    pub warnings: Vec<Error>,
}

/// Collects the full ownership inventory for one host. A conceptually
/// remote call: errors here mean the whole host is dropped, while the
/// warnings inside a successful inventory are per-file.
pub fn collect(
    session: &dyn HostSession,
    host: &str,
    include_default_paths: bool,
    include_vm_paths: bool,
) -> Result<HostInventory, Error> {
    let mut inventory = HostInventory {
        host: host.to_string(),
        cluster: session.cluster()?,
        targets: Vec::new(),
        known: Vec::new(),
        warnings: Vec::new(),
    };

    if include_default_paths {
        let defaults = session.defaults()?;
        for path in [
            defaults.vm_config_path,
            defaults.virtual_disk_path,
            defaults.registration_dir,
        ] {
            push_target(&mut inventory, host, &path);
        }
    }

    for csv_root in session.cluster_storage_roots()? {
        // CSV mounts are local paths by construction, host-tagged even
        // though the backing volume is shared.
        inventory
            .targets
            .push(ScanTarget::new(csv_root, Some(host.to_string())));
    }

    for vm in session.vms()? {
        collect_vm(&mut inventory, session, host, &vm, include_vm_paths);
    }

    dedupe(&mut inventory);
    debug!(
        "inventory for '{}': {} known files, {} targets, {} warnings",
        host,
        inventory.known.len(),
        inventory.targets.len(),
        inventory.warnings.len()
    );
    Ok(inventory)
}

fn collect_vm(
    inventory: &mut HostInventory,
    session: &dyn HostSession,
    host: &str,
    vm: &VmInfo,
    include_vm_paths: bool,
) {
    // Configuration file plus its GUID-named siblings (runtime/save
    // state share the VM id as their stem).
    let config_dir = parent_dir(Path::new(&vm.config_path));
    record_metadata_file(inventory, host, vm, &vm.config_path);
    record_metadata_set(inventory, session, host, vm, &config_dir, &vm.id);

    for checkpoint in &vm.checkpoints {
        record_metadata_set(inventory, session, host, vm, &checkpoint.metadata_dir, &checkpoint.id);
    }

    for disk in &vm.disk_paths {
        record_disk_with_ancestors(inventory, session, host, vm, disk);
    }

    // Floppy images only exist on generation 1 hardware.
    if vm.generation == 1 {
        for floppy in &vm.floppy_paths {
            record_file(inventory, host, vm, floppy, FileKind::Disk);
        }
    }

    if vm.smart_paging_in_use {
        if let Some(dir) = &vm.smart_paging_path {
            record_metadata_set(inventory, session, host, vm, dir, &vm.id);
        }
    }

    if include_vm_paths {
        let mut vm_dirs: Vec<String> = vec![config_dir];
        vm_dirs.extend(
            vm.checkpoints
                .iter()
                .map(|c| c.metadata_dir.clone()),
        );
        vm_dirs.extend(
            vm.disk_paths
                .iter()
                .map(|d| parent_dir(Path::new(d))),
        );
        for dir in vm_dirs {
            if !dir.is_empty() {
                push_target(inventory, host, &dir);
            }
        }
    }
}

/// Records one metadata "set": every GUID-stemmed metadata file in `dir`
/// whose stem matches `stem_id`. Local directories are enumerated
/// individually; a shared directory additionally gets one host-agnostic
/// directory entry tagged with the owning VM, so a later share-side scan
/// can attribute it even if enumeration is racing the hypervisor.
fn record_metadata_set(
    inventory: &mut HostInventory,
    session: &dyn HostSession,
    host: &str,
    vm: &VmInfo,
    dir: &str,
    stem_id: &str,
) {
    if dir.is_empty() {
        return;
    }
    if is_unc_share(dir) {
        inventory.known.push(ManagedFileReference {
            path: dir.to_string(),
            owning_host: None,
            kind: FileKind::DirectoryRoot,
            owner_vm: Some(vm.name.clone()),
        });
    }
    let files = match session.list_files(Path::new(dir)) {
        Ok(files) => files,
        Err(err) => {
            warn!("cannot enumerate {} for VM '{}': {}", dir, vm.name, err);
            inventory.warnings.push(err);
            return;
        }
    };
    for file in files {
        if !stem_matches(&file, stem_id) {
            continue;
        }
        let ext = extension_lower(&file).unwrap_or_default();
        if is_disk_extension(&ext) {
            record_disk_with_ancestors(inventory, session, host, vm, &file.to_string_lossy());
        } else {
            // Metadata proper, plus save-state and smart-paging artifacts
            // that share the GUID stem but not a metadata extension.
            record_metadata_file(inventory, host, vm, &file.to_string_lossy());
        }
    }
}

fn record_disk_with_ancestors(
    inventory: &mut HostInventory,
    session: &dyn HostSession,
    host: &str,
    vm: &VmInfo,
    disk: &str,
) {
    record_file(inventory, host, vm, disk, FileKind::Disk);

    // The walker itself never decides where a share's chain is resolved;
    // this inventory opens everything through its own session, which is
    // the host that can reach the file.
    let ChainWalk { ancestors, error } =
        walk_chain(Path::new(disk), |path| session.open_disk(path));
    for ancestor in &ancestors {
        record_file(inventory, host, vm, &ancestor.to_string_lossy(), FileKind::Disk);
    }
    if let Some(err) = error {
        // The disk and the ancestors already found stay excluded; the
        // gap only affects further ancestors.
        inventory.warnings.push(err);
    }
}

fn record_metadata_file(inventory: &mut HostInventory, host: &str, vm: &VmInfo, path: &str) {
    record_file(inventory, host, vm, path, FileKind::Metadata);
}

fn record_file(
    inventory: &mut HostInventory,
    host: &str,
    vm: &VmInfo,
    path: &str,
    kind: FileKind,
) {
    // Each file is classified independently; one VM may mix local and
    // shared locations freely.
    let owning_host = if is_unc_share(path) {
        None
    } else {
        Some(host.to_string())
    };
    inventory.known.push(ManagedFileReference {
        path: path.to_string(),
        owning_host,
        kind,
        owner_vm: Some(vm.name.clone()),
    });
}

fn push_target(inventory: &mut HostInventory, host: &str, path: &str) {
    let owner_host = if is_unc_share(path) {
        None
    } else {
        Some(host.to_string())
    };
    inventory.targets.push(ScanTarget::new(path, owner_host));
}

fn stem_matches(file: &Path, stem_id: &str) -> bool {
    file.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.trim_matches(['{', '}']).eq_ignore_ascii_case(stem_id))
        .unwrap_or(false)
}

/// Collapses duplicate entries (a checkpoint directory shared between
/// checkpoints, the same parent disk reached through two chains). Keyed
/// on folded path + host so casing differences collapse too.
fn dedupe(inventory: &mut HostInventory) {
    let mut seen = ahash::AHashSet::new();
    inventory.known.retain(|reference| {
        seen.insert((
            fold_path_key(&reference.path),
            reference.owning_host.as_ref().map(|h| h.to_ascii_lowercase()),
            reference.kind,
        ))
    });

    let mut seen_targets = ahash::AHashSet::new();
    inventory.targets.retain(|target| {
        seen_targets.insert((
            fold_path_key(&target.path),
            target.owner_host.as_ref().map(|h| h.to_ascii_lowercase()),
        ))
    });
}

/// Expands one disk path into itself plus its full ancestor chain,
/// resolving through the local filesystem. The `chain` CLI command uses
/// this; inventory passes go through a session instead.
pub fn expand_disk_chain(path: &Path) -> (Vec<PathBuf>, Option<Error>) {
    let walk = crate::vhd::chain::walk_chain_local(path);
    let mut all = vec![path.to_path_buf()];
    all.extend(walk.ancestors);
    (all, walk.error)
}
