use std::path::Path;

use uuid::Uuid;

use crate::error::Error;

/// Characters that never appear in a well-formed Windows path.
const INVALID_PATH_CHARS: [char; 5] = ['<', '>', '|', '"', '\0'];

/// Normalizes a file path: strips surrounding quotes and whitespace,
/// rewrites a verbatim `\\?\` prefix to the device form `\\.\`, and drops
/// trailing separators. Rejects anything that is not absolute.
pub fn normalize_file_path(raw: &str) -> Result<String, Error> {
    let cleaned = clean(raw)?;
    Ok(cleaned.trim_end_matches(['\\', '/']).to_string())
}

/// Like [`normalize_file_path`] but keeps one trailing separator, the
/// canonical shape for directory roots.
pub fn normalize_dir_path(raw: &str) -> Result<String, Error> {
    let cleaned = clean(raw)?;
    let sep = if cleaned.contains('\\') { '\\' } else { '/' };
    let trimmed = cleaned.trim_end_matches(['\\', '/']);
    Ok(format!("{}{}", trimmed, sep))
}

fn clean(raw: &str) -> Result<String, Error> {
    let trimmed = raw.trim().trim_matches('"').trim();
    if trimmed.is_empty() {
        return Err(Error::MalformedPath {
            path: raw.to_string(),
        });
    }
    if trimmed.chars().any(|c| INVALID_PATH_CHARS.contains(&c)) {
        return Err(Error::MalformedPath {
            path: raw.to_string(),
        });
    }
    let rewritten = if let Some(rest) = trimmed.strip_prefix(r"\\?\") {
        format!(r"\\.\{}", rest)
    } else {
        trimmed.to_string()
    };
    if !is_absolute(&rewritten) {
        return Err(Error::MalformedPath {
            path: raw.to_string(),
        });
    }
    Ok(rewritten)
}

fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    if is_raw_volume(path) {
        return true;
    }
    if path.starts_with(r"\\") {
        // UNC needs at least \\server\share
        return path[2..].split(['\\', '/']).filter(|c| !c.is_empty()).count() >= 2;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// True for `\\?\` / `\\.\` raw volume identifier forms, which look like
/// UNC paths but address local devices.
pub fn is_raw_volume(path: &str) -> bool {
    path.starts_with(r"\\?\") || path.starts_with(r"\\.\")
}

/// The UNC-share test: `\\server\share...`, excluding raw volume
/// identifiers. Shared paths carry no owning host.
pub fn is_unc_share(path: &str) -> bool {
    path.starts_with(r"\\") && !is_raw_volume(path)
}

/// Folds a path into its exclusion-set key form: lowercased, forward
/// slashes unified to backslashes, trailing separators dropped. Windows
/// filesystems compare names case-insensitively, so both sides of every
/// membership probe go through this.
pub fn fold_path_key(path: &str) -> String {
    path.trim_end_matches(['\\', '/'])
        .replace('/', "\\")
        .to_ascii_lowercase()
}

/// Splits on either separator, skipping empty components.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(['\\', '/']).filter(|c| !c.is_empty())
}

/// True when `child` lies at or under `parent` (component-boundary,
/// case-insensitive: `C:\VMs2` is not under `C:\VMs`).
pub fn is_under(parent: &str, child: &str) -> bool {
    let parent_key = fold_path_key(parent);
    let child_key = fold_path_key(child);
    let mut parent_parts = components(&parent_key);
    let mut child_parts = components(&child_key);
    loop {
        match (parent_parts.next(), child_parts.next()) {
            (None, _) => return true,
            (Some(p), Some(c)) if p == c => continue,
            _ => return false,
        }
    }
}

/// True when the path has a `ClusterStorage` component, i.e. it addresses
/// a cluster-shared-volume mount point or something under one.
pub fn under_cluster_storage(path: &str) -> bool {
    components(path).any(|c| c.eq_ignore_ascii_case("ClusterStorage"))
}

/// Lowercased extension, if any.
pub fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// True when the file's stem parses as a GUID: the naming convention for
/// VM and checkpoint metadata files. Braced forms are accepted.
pub fn has_guid_stem(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| Uuid::parse_str(s.trim_matches(['{', '}'])).is_ok())
        .unwrap_or(false)
}

/// Parent directory as a string, empty when there is none.
pub fn parent_dir(path: &Path) -> String {
    path.parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}
