//! Directory entry codec: 8.3 short-name encode/decode/validate, on-disk
//! layout, and FAT <-> VFS attribute mapping.
//!
//! Grounded on the original driver's `fat_fs_retrieve_short_name` /
//! `fat_fs_generate_short_name` / `fat_fs_validate_83_name` /
//! `fat_to_vfs_attributes` / `vfs_to_fat_attributes`.

use core::fmt;

use crate::fs::error::FsError;

/// Size in bytes of one on-disk directory entry.
pub const ENTRY_SIZE: usize = 32;
/// Directory entries per 4 KiB cluster.
pub const ENTRIES_PER_CLUSTER: usize = 4096 / ENTRY_SIZE;

/// Synthetic name assigned to the root directory's in-memory node.
pub const NAME_ROOT: &str = "/";

// On-disk field offsets within one 32-byte entry.
const OFF_NAME: usize = 0;
const OFF_ATTR: usize = 11;
const OFF_CLUSTER_HIGH: usize = 20;
const OFF_CLUSTER_LOW: usize = 26;
const OFF_FILE_SIZE: usize = 28;

/// Marks the end of a directory's used entries.
pub const ENTRY_FREE_END: u8 = 0x00;
/// Marks a deleted entry whose slot may be reused.
pub const ENTRY_DELETED: u8 = 0xE5;
/// Escape value stored in byte 0 when a file's actual first name byte is
/// `0xE5` (which would otherwise be confused with a deleted marker).
const ENTRY_DELETED_ESCAPE: u8 = 0x05;

// FAT on-disk attribute bits.
pub const FAT_ATTR_READ_ONLY: u8 = 0x01;
pub const FAT_ATTR_HIDDEN: u8 = 0x02;
pub const FAT_ATTR_SYSTEM: u8 = 0x04;
pub const FAT_ATTR_VOLUME_ID: u8 = 0x08;
pub const FAT_ATTR_DIRECTORY: u8 = 0x10;
pub const FAT_ATTR_ARCHIVE: u8 = 0x20;
pub const FAT_ATTR_LONG_NAME: u8 = 0x0F;

// VFS-side attribute bits (independent namespace from the on-disk FAT
// attribute byte).
pub const VFS_ATTR_WRITE: u8 = 0x01;
pub const VFS_ATTR_HIDDEN: u8 = 0x02;
pub const VFS_ATTR_DIRECTORY: u8 = 0x04;

/// Maps an on-disk FAT attribute byte to the VFS attribute bitset.
///
/// The archive bit is intentionally not mapped, matching the original
/// driver — nothing downstream of the VFS layer consumes it.
pub fn fat_to_vfs_attributes(fat_attr: u8) -> u8 {
    let mut vfs_attr = 0u8;
    if fat_attr & FAT_ATTR_READ_ONLY == 0 {
        vfs_attr |= VFS_ATTR_WRITE;
    }
    if fat_attr & FAT_ATTR_HIDDEN != 0 {
        vfs_attr |= VFS_ATTR_HIDDEN;
    }
    if fat_attr & FAT_ATTR_DIRECTORY != 0 {
        vfs_attr |= VFS_ATTR_DIRECTORY;
    }
    vfs_attr
}

/// Maps a VFS attribute bitset back to an on-disk FAT attribute byte.
pub fn vfs_to_fat_attributes(vfs_attr: u8) -> u8 {
    let mut fat_attr = 0u8;
    if vfs_attr & VFS_ATTR_WRITE == 0 {
        fat_attr |= FAT_ATTR_READ_ONLY;
    }
    if vfs_attr & VFS_ATTR_HIDDEN != 0 {
        fat_attr |= FAT_ATTR_HIDDEN;
    }
    if vfs_attr & VFS_ATTR_DIRECTORY != 0 {
        fat_attr |= FAT_ATTR_DIRECTORY;
    }
    fat_attr
}

/// Decoded view of one on-disk 32-byte directory entry.
#[derive(Clone, Copy, Debug)]
pub struct DirEntry {
    pub short_name: [u8; 11],
    pub attributes: u8,
    pub first_cluster: u32,
    pub file_size: u32,
}

/// Classification of a raw directory entry slot before it is decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntrySlot {
    /// Byte 0 is `0x00`: no further used entries follow in this directory.
    End,
    /// Entry is deleted (`0xE5`) or an LFN/volume-label helper entry.
    Free,
    /// A live 8.3 entry.
    Active,
}

/// Classifies the 32-byte slot at `bytes` without fully decoding it.
pub fn classify(bytes: &[u8; ENTRY_SIZE]) -> EntrySlot {
    match bytes[OFF_NAME] {
        ENTRY_FREE_END => EntrySlot::End,
        ENTRY_DELETED => EntrySlot::Free,
        _ if bytes[OFF_ATTR] == FAT_ATTR_LONG_NAME || bytes[OFF_ATTR] & FAT_ATTR_VOLUME_ID != 0 => {
            EntrySlot::Free
        }
        _ => EntrySlot::Active,
    }
}

/// Decodes a 32-byte slot already known to be [`EntrySlot::Active`].
pub fn decode(bytes: &[u8; ENTRY_SIZE]) -> DirEntry {
    let mut short_name = [0u8; 11];
    short_name.copy_from_slice(&bytes[OFF_NAME..OFF_NAME + 11]);
    if short_name[0] == ENTRY_DELETED_ESCAPE {
        short_name[0] = ENTRY_DELETED;
    }

    let cluster_high = u16::from_le_bytes([bytes[OFF_CLUSTER_HIGH], bytes[OFF_CLUSTER_HIGH + 1]]);
    let cluster_low = u16::from_le_bytes([bytes[OFF_CLUSTER_LOW], bytes[OFF_CLUSTER_LOW + 1]]);
    let first_cluster = ((cluster_high as u32) << 16) | cluster_low as u32;

    let file_size = u32::from_le_bytes([
        bytes[OFF_FILE_SIZE],
        bytes[OFF_FILE_SIZE + 1],
        bytes[OFF_FILE_SIZE + 2],
        bytes[OFF_FILE_SIZE + 3],
    ]);

    DirEntry {
        short_name,
        attributes: bytes[OFF_ATTR],
        first_cluster,
        file_size,
    }
}

/// Encodes `entry` into a fresh 32-byte slot. Timestamp fields are left
/// zeroed; this driver does not model FAT timestamps (non-goal).
pub fn encode(entry: &DirEntry) -> [u8; ENTRY_SIZE] {
    let mut bytes = [0u8; ENTRY_SIZE];
    let mut short_name = entry.short_name;
    if short_name[0] == ENTRY_DELETED {
        short_name[0] = ENTRY_DELETED_ESCAPE;
    }
    bytes[OFF_NAME..OFF_NAME + 11].copy_from_slice(&short_name);
    bytes[OFF_ATTR] = entry.attributes;

    let cluster_high = (entry.first_cluster >> 16) as u16;
    let cluster_low = entry.first_cluster as u16;
    bytes[OFF_CLUSTER_HIGH..OFF_CLUSTER_HIGH + 2].copy_from_slice(&cluster_high.to_le_bytes());
    bytes[OFF_CLUSTER_LOW..OFF_CLUSTER_LOW + 2].copy_from_slice(&cluster_low.to_le_bytes());
    bytes[OFF_FILE_SIZE..OFF_FILE_SIZE + 4].copy_from_slice(&entry.file_size.to_le_bytes());

    bytes
}

/// Marks a 32-byte slot deleted in place.
pub fn mark_deleted(bytes: &mut [u8; ENTRY_SIZE]) {
    bytes[OFF_NAME] = ENTRY_DELETED;
}

/// Marks a 32-byte slot as the end-of-directory sentinel in place.
pub fn mark_end(bytes: &mut [u8; ENTRY_SIZE]) {
    bytes[OFF_NAME] = ENTRY_FREE_END;
}

/// Bytes disallowed anywhere in an 8.3 short name: `" * + , / : ; < = > ? [ \ ] |`.
const BAD_SHORT_NAME_BYTES: [u8; 15] = [
    0x22, 0x2A, 0x2B, 0x2C, 0x2F, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E, 0x3F, 0x5B, 0x5C, 0x5D, 0x7C,
];

fn is_valid_short_name_byte(b: u8, index: usize) -> bool {
    if b < 0x20 {
        return index == 0 && b == ENTRY_DELETED_ESCAPE;
    }
    !BAD_SHORT_NAME_BYTES.contains(&b)
}

/// Validates that `short_name` (11 raw on-disk bytes, already space-padded)
/// contains only characters legal in an 8.3 short name.
pub fn validate_83_name(short_name: &[u8; 11]) -> Result<(), FsError> {
    for (idx, &b) in short_name.iter().enumerate() {
        if !is_valid_short_name_byte(b, idx) {
            return Err(FsError::BadArguments);
        }
    }
    Ok(())
}

/// Generates the raw 11-byte on-disk short name for a human-readable
/// `"BASE.EXT"` string, space-padding and uppercasing it.
pub fn generate_short_name(name: &str) -> Result<[u8; 11], FsError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(FsError::BadArguments);
    }

    let mut parts = trimmed.splitn(2, '.');
    let base = parts.next().unwrap_or("");
    let extension = parts.next();

    if base.is_empty() || base.len() > 8 {
        return Err(FsError::BadArguments);
    }
    if let Some(ext) = extension {
        if ext.len() > 3 {
            return Err(FsError::BadArguments);
        }
    }

    let mut short_name = [b' '; 11];
    for (i, b) in base.bytes().enumerate() {
        short_name[i] = b.to_ascii_uppercase();
    }
    if let Some(ext) = extension {
        for (i, b) in ext.bytes().enumerate() {
            short_name[8 + i] = b.to_ascii_uppercase();
        }
    }

    validate_83_name(&short_name)?;
    Ok(short_name)
}

/// Recovers a human-readable `"base.ext"` (or `"base"` with no extension)
/// string from a raw 11-byte on-disk short name.
pub fn retrieve_short_name(short_name: &[u8; 11]) -> NameBuf {
    let mut out = [0u8; 13];
    let mut len = 0usize;

    for &b in &short_name[0..8] {
        if b != b' ' {
            out[len] = b;
            len += 1;
        }
    }

    // Only append the dot/extension if at least one extension byte is
    // non-space; an all-space extension drops the dot entirely.
    if short_name[8..11].iter().any(|&b| b != b' ') {
        out[len] = b'.';
        len += 1;
        for &b in &short_name[8..11] {
            if b != b' ' {
                out[len] = b;
                len += 1;
            }
        }
    }

    NameBuf { bytes: out, len }
}

/// Fixed-capacity decoded short-name buffer (avoids an `alloc` dependency
/// for the hot directory-listing path).
#[derive(Clone, Copy)]
pub struct NameBuf {
    bytes: [u8; 13],
    len: usize,
}

impl NameBuf {
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or("???")
    }
}

impl fmt::Display for NameBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
