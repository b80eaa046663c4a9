//! Path reconciliation: recursive scan of each resolved root, reporting
//! every VM-artifact-shaped file absent from the exclusion set.

use std::path::Path;

use glob::Pattern;
use lazy_static::lazy_static;
use tracing::{error, warn};
use walkdir::WalkDir;

use crate::error::Error;
use crate::model::{ExclusionSet, FileKind, OrphanedFile, ScanTarget};
use crate::utils::path::{
    components, extension_lower, has_guid_stem, under_cluster_storage,
};

const DISK_EXTENSIONS: [&str; 5] = ["vhd", "vhdx", "avhd", "avhdx", "vfd"];
const METADATA_EXTENSIONS: [&str; 6] = ["xml", "bin", "vsv", "vmcx", "vmgs", "vmrs"];

lazy_static! {
    /// Directory components of known non-VM producers of GUID-named
    /// files: VSS writer registrations, the WinSxs store, and Hyper-V's
    /// own "Resource Types" directory.
    static ref NON_VM_METADATA_DIRS: Vec<&'static str> =
        vec!["winsxs", "vss", "resource types"];
}

pub fn is_disk_extension(ext: &str) -> bool {
    DISK_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e))
}

pub fn is_metadata_extension(ext: &str) -> bool {
    METADATA_EXTENSIONS
        .iter()
        .any(|e| ext.eq_ignore_ascii_case(e))
}

/// True when the file's directory belongs to a known non-VM producer of
/// GUID-named files; such files are never orphan candidates.
pub fn in_non_vm_metadata_dir(path: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    let parent = parent.to_string_lossy();
    let result = components(&parent).any(|component| {
        NON_VM_METADATA_DIRS
            .iter()
            .any(|known| component.eq_ignore_ascii_case(known))
    });
    result
}

/// Classifies one file as an orphan candidate.
fn classify(path: &Path) -> Option<FileKind> {
    let ext = extension_lower(path)?;
    if is_disk_extension(&ext) {
        return Some(FileKind::Disk);
    }
    if is_metadata_extension(&ext) && has_guid_stem(path) && !in_non_vm_metadata_dir(path) {
        return Some(FileKind::Metadata);
    }
    None
}

/// Recursively scans one root and subtracts the exclusion set. The root
/// itself must be enumerable: a missing or denied root is a failed-root
/// error, distinct from "scanned, zero orphans". Unreadable directories
/// deeper in the tree are logged and skipped, matching how a scan over
/// live storage has to behave.
pub fn scan_root(
    target: &ScanTarget,
    exclusions: &ExclusionSet,
    ignore_patterns: &[Pattern],
) -> Result<Vec<OrphanedFile>, Error> {
    let root = Path::new(&target.path);
    std::fs::metadata(root).map_err(|err| Error::for_root(root, err))?;

    let owner = target.owner_host.as_deref();
    let mut orphans = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                error!("error walking {}: {}", target.path, err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let path_str = path.to_string_lossy();

        if ignore_patterns.iter().any(|p| p.matches_path(path)) {
            continue;
        }
        if target.skip_cluster_storage && under_cluster_storage(&path_str) {
            // The primary node's inventory already covers this mount.
            continue;
        }

        let Some(kind) = classify(path) else {
            continue;
        };
        let known = match kind {
            FileKind::Disk => exclusions.contains_disk(&path_str, owner),
            _ => exclusions.contains_metadata(&path_str, owner),
        };
        if known {
            continue;
        }
        warn!("orphan candidate: {}", path_str);
        orphans.push(OrphanedFile {
            path: path_str.into_owned(),
            owning_host: target.owner_host.clone(),
            kind,
        });
    }
    Ok(orphans)
}

/// Compiles operator-supplied ignore globs, dropping invalid ones with a
/// logged error rather than failing the sweep.
pub fn compile_ignore_patterns(globs: &[String]) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                error!("Invalid glob pattern '{}': {}", glob, err);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn disk_extensions_match_case_insensitively() {
        for ext in ["vhd", "VHDX", "Avhd", "AVHDX", "vfd"] {
            assert!(is_disk_extension(ext), "{}", ext);
        }
        assert!(!is_disk_extension("iso"));
    }

    #[test]
    fn classify_requires_guid_stem_for_metadata() {
        assert_eq!(
            classify(&PathBuf::from(
                "/vms/2ddd67b0-2c2f-4d45-ab16-43b7fbbf3d51.xml"
            )),
            Some(FileKind::Metadata)
        );
        assert_eq!(classify(&PathBuf::from("/vms/notes.xml")), None);
        assert_eq!(
            classify(&PathBuf::from("/vms/anything.vhdx")),
            Some(FileKind::Disk)
        );
        assert_eq!(classify(&PathBuf::from("/vms/anything.txt")), None);
    }

    #[test]
    fn resource_types_directory_is_never_a_candidate() {
        let path = PathBuf::from(
            r"C:\ProgramData\Microsoft\Windows Hyper-V\Resource Types\2ddd67b0-2c2f-4d45-ab16-43b7fbbf3d51.xml",
        );
        assert_eq!(classify(&path), None);
        let winsxs = PathBuf::from(
            r"C:\Windows\WinSxS\manifests\2ddd67b0-2c2f-4d45-ab16-43b7fbbf3d51.xml",
        );
        assert_eq!(classify(&winsxs), None);
    }
}
