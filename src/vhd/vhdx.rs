//! VHDX (`vhdxfile`) parent extraction: region table → metadata region
//! → parent locator → `absolute_win32_path` key/value pair.

use std::io::{Read, Seek};
use std::path::Path;

use super::{decode_utf16le, invalid_format, read_exact_at, root_disk, DiskFormat, DiskHeader};
use crate::error::Error;

/// The format keeps two redundant region tables for crash consistency.
const REGION_TABLE_OFFSETS: [u64; 2] = [196_608, 262_144];
const REGION_SIGNATURE: &[u8; 4] = b"regi";
const METADATA_SIGNATURE: &[u8; 8] = b"metadata";

/// Region entries: 16 bytes past the table header, 32 bytes each.
const REGION_ENTRIES_OFFSET: u64 = 16;
const REGION_ENTRY_LEN: usize = 32;
/// Hard ceiling from the format; anything above is corruption.
const REGION_ENTRY_MAX: u32 = 2047;

/// Metadata table entries: 32 bytes past the region header, 32 bytes each.
const METADATA_ENTRIES_OFFSET: u64 = 32;
const METADATA_ENTRY_LEN: usize = 32;

/// Raw on-disk byte order of the metadata-region GUID
/// (8B7CA206-4790-4B9A-B8FE-575F050F886E, mixed-endian as stored).
const METADATA_REGION_GUID: [u8; 16] = [
    0x06, 0xA2, 0x7C, 0x8B, 0x90, 0x47, 0x9A, 0x4B, 0xB8, 0xFE, 0x57, 0x5F, 0x05, 0x0F, 0x88,
    0x6E,
];

/// Raw on-disk byte order of the parent-locator entry GUID
/// (A8D35F2D-B30B-454D-ABF7-D3D84834AB0C, mixed-endian as stored).
const PARENT_LOCATOR_GUID: [u8; 16] = [
    0x2D, 0x5F, 0xD3, 0xA8, 0x0B, 0xB3, 0x4D, 0x45, 0xAB, 0xF7, 0xD3, 0xD8, 0x48, 0x34, 0xAB,
    0x0C,
];

/// Locator key naming the parent path in its native form.
const PARENT_PATH_KEY: &str = "absolute_win32_path";

pub(super) fn parse<R: Read + Seek>(reader: &mut R, path: &Path) -> Result<DiskHeader, Error> {
    let (table_offset, entry_count) = active_region_table(reader, path)?;

    let Some(metadata_offset) = metadata_region_offset(reader, path, table_offset, entry_count)?
    else {
        return Ok(root_disk(DiskFormat::Vhdx));
    };

    let Some(locator_offset) = parent_locator_offset(reader, path, metadata_offset)? else {
        return Ok(root_disk(DiskFormat::Vhdx));
    };

    let parent = locator_parent_path(reader, path, locator_offset)?;
    Ok(DiskHeader {
        format: DiskFormat::Vhdx,
        parent_path: parent.filter(|p| !p.is_empty()),
    })
}

/// Inspects both fixed region-table copies and picks whichever reports
/// the higher entry count; either works when they agree.
fn active_region_table<R: Read + Seek>(reader: &mut R, path: &Path) -> Result<(u64, u32), Error> {
    let mut best: Option<(u64, u32)> = None;
    for &offset in &REGION_TABLE_OFFSETS {
        let mut header = [0u8; 12];
        read_exact_at(reader, offset, &mut header, path)?;
        if &header[0..4] != REGION_SIGNATURE {
            continue;
        }
        // 4-byte checksum sits between the signature and the count
        let count = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        if count > REGION_ENTRY_MAX {
            return Err(invalid_format(path));
        }
        match best {
            Some((_, existing)) if existing >= count => {}
            _ => best = Some((offset, count)),
        }
    }
    best.ok_or_else(|| invalid_format(path))
}

fn metadata_region_offset<R: Read + Seek>(
    reader: &mut R,
    path: &Path,
    table_offset: u64,
    entry_count: u32,
) -> Result<Option<u64>, Error> {
    for index in 0..entry_count as u64 {
        let entry_offset = table_offset + REGION_ENTRIES_OFFSET + index * REGION_ENTRY_LEN as u64;
        let mut entry = [0u8; REGION_ENTRY_LEN];
        read_exact_at(reader, entry_offset, &mut entry, path)?;
        if entry[0..16] == METADATA_REGION_GUID {
            let file_offset = u64::from_le_bytes(entry[16..24].try_into().unwrap());
            return Ok(Some(file_offset));
        }
    }
    Ok(None)
}

fn parent_locator_offset<R: Read + Seek>(
    reader: &mut R,
    path: &Path,
    metadata_offset: u64,
) -> Result<Option<u64>, Error> {
    let mut header = [0u8; 12];
    read_exact_at(reader, metadata_offset, &mut header, path)?;
    if &header[0..8] != METADATA_SIGNATURE {
        return Err(invalid_format(path));
    }
    // 2 reserved bytes, then the entry count; 20 more header bytes follow
    let entry_count = u16::from_le_bytes([header[10], header[11]]);

    for index in 0..entry_count as u64 {
        let entry_offset =
            metadata_offset + METADATA_ENTRIES_OFFSET + index * METADATA_ENTRY_LEN as u64;
        let mut entry = [0u8; METADATA_ENTRY_LEN];
        read_exact_at(reader, entry_offset, &mut entry, path)?;
        if entry[0..16] == PARENT_LOCATOR_GUID {
            let offset = u32::from_le_bytes(entry[16..20].try_into().unwrap());
            return Ok(Some(metadata_offset + offset as u64));
        }
    }
    Ok(None)
}

/// Walks the locator's key/value pairs looking for the absolute parent
/// path. Pair records are 12 bytes: key offset, value offset (u32 LE,
/// relative to the locator start), key length, value length (u16 LE).
fn locator_parent_path<R: Read + Seek>(
    reader: &mut R,
    path: &Path,
    locator_offset: u64,
) -> Result<Option<String>, Error> {
    // Locator header: 16-byte type GUID + 2 reserved, then the pair count.
    let mut count_bytes = [0u8; 2];
    read_exact_at(reader, locator_offset + 18, &mut count_bytes, path)?;
    let pair_count = u16::from_le_bytes(count_bytes);

    for index in 0..pair_count as u64 {
        let record_offset = locator_offset + 20 + index * 12;
        let mut record = [0u8; 12];
        read_exact_at(reader, record_offset, &mut record, path)?;
        let key_offset = u32::from_le_bytes(record[0..4].try_into().unwrap());
        let value_offset = u32::from_le_bytes(record[4..8].try_into().unwrap());
        let key_len = u16::from_le_bytes(record[8..10].try_into().unwrap());
        let value_len = u16::from_le_bytes(record[10..12].try_into().unwrap());

        let mut key_bytes = vec![0u8; key_len as usize];
        read_exact_at(reader, locator_offset + key_offset as u64, &mut key_bytes, path)?;
        if decode_utf16le(&key_bytes) != PARENT_PATH_KEY {
            continue;
        }

        let mut value_bytes = vec![0u8; value_len as usize];
        read_exact_at(
            reader,
            locator_offset + value_offset as u64,
            &mut value_bytes,
            path,
        )?;
        return Ok(Some(decode_utf16le(&value_bytes)));
    }
    Ok(None)
}
