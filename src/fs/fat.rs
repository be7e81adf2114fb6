//! FAT table access: cluster chain traversal, allocation, and chain
//! splicing.
//!
//! `decode_fat_entry`/`encode_fat_entry` are pure functions over an
//! explicit byte slice so the bit-twiddling can be unit tested without a
//! disk, mirroring the host project's own `fat12_next_cluster` pattern.
//! The I/O-touching operations borrow a single scratch buffer
//! (`gft::GFD_FAT_SPECIAL`) through [`FatCursorGuard`], which releases it
//! on every exit path including early returns.

use crate::fs::block_io;
use crate::fs::error::FsError;
use crate::fs::gft::GFD_FAT_SPECIAL;
use crate::fs::mount::FatVolume;
use crate::fs::page_cache::FrameBacking;

/// Number of 32-bit entries in one 4 KiB FAT block.
pub const FAT_ENTRIES_PER_BLOCK: u32 = (block_io::PAGE_SIZE / 4) as u32;

/// Smallest value that marks end-of-chain. FAT32 entries are 28 bits wide;
/// the top 4 bits are reserved and preserved across writes.
pub const FAT_EOF: u32 = 0x0FFF_FFF8;

/// An unallocated cluster.
pub const FAT_FREE: u32 = 0;

const FAT_VALUE_MASK: u32 = 0x0FFF_FFFF;

/// Decodes the 32-bit FAT entry at `index_in_block` within a 4 KiB FAT
/// block, masking off the reserved top 4 bits.
pub fn decode_fat_entry(block: &[u8], index_in_block: usize) -> u32 {
    let offset = index_in_block * 4;
    let raw = u32::from_le_bytes([
        block[offset],
        block[offset + 1],
        block[offset + 2],
        block[offset + 3],
    ]);
    raw & FAT_VALUE_MASK
}

/// Encodes `value` into the FAT entry at `index_in_block`, preserving
/// whatever is currently stored in the reserved top 4 bits of the slot.
pub fn encode_fat_entry(block: &mut [u8], index_in_block: usize, value: u32) {
    let offset = index_in_block * 4;
    let existing = u32::from_le_bytes([
        block[offset],
        block[offset + 1],
        block[offset + 2],
        block[offset + 3],
    ]);
    let reserved_bits = existing & !FAT_VALUE_MASK;
    let encoded = reserved_bits | (value & FAT_VALUE_MASK);
    block[offset..offset + 4].copy_from_slice(&encoded.to_le_bytes());
}

fn fat_offset(cluster: u32) -> (u32, usize) {
    (
        cluster / FAT_ENTRIES_PER_BLOCK,
        (cluster % FAT_ENTRIES_PER_BLOCK) as usize,
    )
}

/// Scoped RAII guard around the `GFD_FAT_SPECIAL` scratch buffer.
///
/// Replaces the ad hoc borrow/return discipline the original driver
/// required of every caller: acquiring a block loads it into the cache if
/// not already resident, and dropping the guard always releases the
/// buffer, regardless of which branch returned early.
struct FatCursorGuard<'a, B: FrameBacking> {
    volume: &'a FatVolume<B>,
    fat_block: u32,
    address: u64,
}

impl<'a, B: FrameBacking> FatCursorGuard<'a, B> {
    fn acquire(volume: &'a FatVolume<B>, fat_block: u32) -> Result<Self, FsError> {
        let lba = volume.fat_lba + fat_block * block_io::SECTORS_PER_PAGE as u32;

        let address = {
            let mut cache = volume.cache().lock();
            match cache.get_buffer(GFD_FAT_SPECIAL, fat_block) {
                Ok(existing) => existing,
                Err(_) => {
                    let address = cache.reserve_buffer(GFD_FAT_SPECIAL, fat_block)?;
                    // SAFETY: the buffer was just reserved exclusively for this
                    // slot and is `block_io::PAGE_SIZE` bytes long.
                    let buf = unsafe {
                        core::slice::from_raw_parts_mut(address as *mut u8, block_io::PAGE_SIZE)
                    };
                    block_io::read_4k(buf, lba)?;
                    address
                }
            }
        };

        Ok(Self {
            volume,
            fat_block,
            address,
        })
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: `address` points at a buffer reserved for the lifetime of
        // this guard.
        unsafe { core::slice::from_raw_parts(self.address as *const u8, block_io::PAGE_SIZE) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: `address` points at a buffer reserved for the lifetime of
        // this guard, and we hold the only reference to it.
        unsafe { core::slice::from_raw_parts_mut(self.address as *mut u8, block_io::PAGE_SIZE) }
    }

    fn flush(&self) -> Result<(), FsError> {
        let lba = self.volume.fat_lba + self.fat_block * block_io::SECTORS_PER_PAGE as u32;
        block_io::write_4k(self.bytes(), lba)
    }
}

impl<'a, B: FrameBacking> Drop for FatCursorGuard<'a, B> {
    fn drop(&mut self) {
        let mut cache = self.volume.cache().lock();
        let _ = cache.release_buffer(GFD_FAT_SPECIAL, self.fat_block);
    }
}

/// Returns the cluster that follows `cluster` in its chain.
pub fn next_cluster<B: FrameBacking>(volume: &FatVolume<B>, cluster: u32) -> Result<u32, FsError> {
    let (block, index) = fat_offset(cluster);
    let guard = FatCursorGuard::acquire(volume, block)?;
    Ok(decode_fat_entry(guard.bytes(), index))
}

/// Writes `value` into the FAT entry for `cluster` and returns the
/// previous value, matching the original's read-modify-write contract.
pub fn mark_cluster<B: FrameBacking>(
    volume: &FatVolume<B>,
    cluster: u32,
    value: u32,
) -> Result<u32, FsError> {
    let (block, index) = fat_offset(cluster);
    let mut guard = FatCursorGuard::acquire(volume, block)?;
    let previous = decode_fat_entry(guard.bytes(), index);
    encode_fat_entry(guard.bytes_mut(), index, value);
    guard.flush()?;
    Ok(previous)
}

/// Finds the first free cluster, marks it end-of-chain, and returns its
/// id.
///
/// The scan is bounded by `volume.total_clusters`, so a fully allocated
/// volume fails with [`FsError::NoSpace`] instead of looping forever —
/// the original C implementation's `fat_fs_reserve_first_cluster` scans
/// with an unconditional `while(true)`.
pub fn reserve_first_cluster<B: FrameBacking>(volume: &FatVolume<B>) -> Result<u32, FsError> {
    let total_blocks = (volume.total_clusters + 2).div_ceil(FAT_ENTRIES_PER_BLOCK);

    for block in 0..total_blocks {
        let found = {
            let guard = FatCursorGuard::acquire(volume, block)?;
            let mut found = None;
            for index in 0..FAT_ENTRIES_PER_BLOCK as usize {
                let cluster = block * FAT_ENTRIES_PER_BLOCK + index as u32;
                if cluster < 2 || cluster >= volume.total_clusters + 2 {
                    continue;
                }
                if decode_fat_entry(guard.bytes(), index) == FAT_FREE {
                    found = Some(cluster);
                    break;
                }
            }
            found
        };

        if let Some(cluster) = found {
            mark_cluster(volume, cluster, FAT_EOF)?;
            return Ok(cluster);
        }
    }

    Err(FsError::NoSpace)
}

/// Loads the full cluster chain starting at `first_cluster` into a
/// `layout` vector, following `next_cluster` until `FAT_EOF`.
pub fn load_chain<B: FrameBacking>(
    volume: &FatVolume<B>,
    first_cluster: u32,
) -> Result<alloc::vec::Vec<u32>, FsError> {
    let mut layout = alloc::vec::Vec::new();
    if first_cluster < 2 {
        return Ok(layout);
    }

    let mut current = first_cluster;
    loop {
        layout.push(current);
        let next = next_cluster(volume, current)?;
        if next >= FAT_EOF {
            break;
        }
        current = next;
    }

    Ok(layout)
}
