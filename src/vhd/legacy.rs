//! Legacy VHD (`conectix`) parent extraction.

use std::io::{Read, Seek};
use std::path::Path;

use super::{read_exact_at, root_disk, DiskFormat, DiskHeader};
use crate::error::Error;

/// Disk-type field in the footer copy at the head of the file.
const DISK_TYPE_OFFSET: u64 = 60;
const DISK_TYPE_DIFFERENCING: u32 = 4;

/// Parent unicode name field in the dynamic header: fixed width,
/// UTF-16 with each 16-bit unit stored byte-swapped, NUL padded.
const PARENT_NAME_OFFSET: u64 = 576;
const PARENT_NAME_LEN: usize = 512;

pub(super) fn parse<R: Read + Seek>(reader: &mut R, path: &Path) -> Result<DiskHeader, Error> {
    let mut type_bytes = [0u8; 4];
    read_exact_at(reader, DISK_TYPE_OFFSET, &mut type_bytes, path)?;
    if u32::from_be_bytes(type_bytes) != DISK_TYPE_DIFFERENCING {
        return Ok(root_disk(DiskFormat::Vhd));
    }

    let mut raw = [0u8; PARENT_NAME_LEN];
    read_exact_at(reader, PARENT_NAME_OFFSET, &mut raw, path)?;

    // Reverse each 2-byte unit, then decode as UTF-16.
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    let decoded = String::from_utf16_lossy(&units);
    let parent = clean_parent_field(&decoded);

    Ok(DiskHeader {
        format: DiskFormat::Vhd,
        parent_path: if parent.is_empty() { None } else { Some(parent) },
    })
}

/// The field is fixed-width and padded with NULs or garbage past the
/// real path. Cut at the first NUL, then at the parent's own extension:
/// `.vhd`, keeping a trailing `x` so a `.vhdx` parent survives intact.
fn clean_parent_field(decoded: &str) -> String {
    let text = decoded.split('\u{0}').next().unwrap_or("");
    let lower = text.to_ascii_lowercase();
    if let Some(pos) = lower.find(".vhd") {
        let mut end = pos + ".vhd".len();
        if matches!(lower.as_bytes().get(end), Some(&b'x')) {
            end += 1;
        }
        if text.is_char_boundary(end) {
            return text[..end].to_string();
        }
    }
    text.trim().to_string()
}
