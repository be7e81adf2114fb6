//! Mount: MBR + volume-ID parsing, LBA geometry, and the mounted volume's
//! shared state (page cache pool, FAT/cluster geometry, root handle).
//!
//! Grounded on the original driver's `fat_fs_mount`.

use crate::fs::block_io;
use crate::fs::dirent;
use crate::fs::error::FsError;
use crate::fs::fat;
use crate::fs::gft;
use crate::fs::page_cache::{FrameBacking, PageCache, VmmBacking};
use crate::fs::vfs::VfsNode;
use crate::fs::walker;
use crate::sync::spinlock::SpinLock;

/// Offset of the MBR's first partition-table entry.
const MBR_PARTITION_TABLE_OFFSET: usize = 0x1BE;
/// Offset within a partition table entry of the partition's starting LBA.
const PARTITION_LBA_OFFSET: usize = 0x08;
/// Offset within a partition table entry of the partition's sector count.
const PARTITION_SECTORS_OFFSET: usize = 0x0C;

// BIOS Parameter Block field offsets within the FAT32 volume ID sector.
const BPB_BYTES_PER_SECTOR: usize = 0x0B;
const BPB_SECTORS_PER_CLUSTER: usize = 0x0D;
const BPB_RESERVED_SECTORS: usize = 0x0E;
const BPB_NUM_FATS: usize = 0x10;
const BPB_TOTAL_SECTORS_32: usize = 0x20;
const BPB_SECTORS_PER_FAT_32: usize = 0x24;
const BPB_ROOT_CLUSTER: usize = 0x2C;

/// Shared state for one mounted FAT32 volume.
pub struct FatVolume<B: FrameBacking = VmmBacking> {
    /// LBA of the first FAT block (FAT #1 only; FAT #2 is a mirror, unused).
    pub fat_lba: u32,
    /// LBA corresponding to data cluster 2.
    pub cluster_lba: u32,
    /// First cluster of the root directory.
    pub root_dir_first_cluster: u32,
    /// Total number of addressable data clusters, used to bound
    /// `fat::reserve_first_cluster`'s scan.
    pub total_clusters: u32,
    /// GFT handle under which the mount's root directory node is
    /// registered.
    pub root_gfd: usize,
    pub(crate) cache: SpinLock<PageCache<B>>,
}

impl<B: FrameBacking> FatVolume<B> {
    pub(crate) fn cache(&self) -> &SpinLock<PageCache<B>> {
        &self.cache
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Computes `(fat_lba, cluster_lba)` from a volume's partition offset and
/// BPB geometry fields. Pure so it can be unit tested without a disk.
pub fn compute_lbas(
    partition_offset: u32,
    reserved_sector_count: u32,
    num_fats: u32,
    sectors_per_fat: u32,
) -> (u32, u32) {
    let fat_lba = partition_offset + reserved_sector_count;
    let cluster_lba = fat_lba + num_fats * sectors_per_fat;
    (fat_lba, cluster_lba)
}

/// Reads the MBR at LBA 0 and returns `(partition_start_lba,
/// partition_sector_count)` for the first partition entry.
fn read_partition_geometry() -> Result<(u32, u32), FsError> {
    let mut mbr = [0u8; block_io::PAGE_SIZE];
    block_io::read_4k(&mut mbr, 0)?;

    let entry = MBR_PARTITION_TABLE_OFFSET;
    let start_lba = read_u32(&mbr, entry + PARTITION_LBA_OFFSET);
    let sector_count = read_u32(&mbr, entry + PARTITION_SECTORS_OFFSET);

    Ok((start_lba, sector_count))
}

/// Mounts the FAT32 volume found at the first MBR partition entry on the
/// primary ATA drive, walks its root directory, and returns the mounted
/// volume plus the populated root VFS node.
pub fn mount(backing: B) -> Result<(FatVolume<B>, VfsNode), FsError> {
    let (partition_lba, partition_sectors) = read_partition_geometry()?;

    let mut volume_id = [0u8; block_io::PAGE_SIZE];
    block_io::read_4k(&mut volume_id, partition_lba)?;

    let bytes_per_sector = read_u16(&volume_id, BPB_BYTES_PER_SECTOR) as u32;
    if bytes_per_sector != block_io::SECTOR_SIZE as u32 {
        return Err(FsError::CorruptEntry);
    }

    let sectors_per_cluster = volume_id[BPB_SECTORS_PER_CLUSTER] as u32;
    let reserved_sectors = read_u16(&volume_id, BPB_RESERVED_SECTORS) as u32;
    let num_fats = volume_id[BPB_NUM_FATS] as u32;
    let sectors_per_fat = read_u32(&volume_id, BPB_SECTORS_PER_FAT_32);
    let root_dir_first_cluster = read_u32(&volume_id, BPB_ROOT_CLUSTER);
    let total_sectors = read_u32(&volume_id, BPB_TOTAL_SECTORS_32);

    if sectors_per_cluster == 0 || num_fats == 0 || sectors_per_fat == 0 {
        return Err(FsError::CorruptEntry);
    }

    let (fat_lba, cluster_lba) = compute_lbas(partition_lba, reserved_sectors, num_fats, sectors_per_fat);

    let data_sectors = total_sectors.saturating_sub(cluster_lba - partition_lba);
    let total_clusters = data_sectors / sectors_per_cluster;

    let _ = partition_sectors; // retained for future partition-bounds validation

    let cache = SpinLock::new(PageCache::new(
        pool_base_address(),
        pool_buffer_count(),
        backing,
    ));

    let mut volume = FatVolume {
        fat_lba,
        cluster_lba,
        root_dir_first_cluster,
        total_clusters,
        root_gfd: gft::GFD_FAT_SPECIAL,
        cache,
    };

    volume.root_gfd = gft::insert();

    let root = walker::build_tree(&volume, root_dir_first_cluster, dirent::NAME_ROOT)?;

    Ok((volume, root))
}

/// Reserved kernel virtual address range backing the page cache pool.
///
/// Chosen in the same higher-half window the VMM identity/recursive
/// mappings leave free; pages are demand-allocated by
/// [`crate::fs::page_cache::VmmBacking`] on first reservation.
fn pool_base_address() -> u64 {
    0xFFFF_8100_0000_0000
}

/// Number of 4 KiB buffers in the page cache pool.
fn pool_buffer_count() -> usize {
    64
}

/// Mounts using the production VMM-backed page cache.
pub fn mount_default() -> Result<(FatVolume<VmmBacking>, VfsNode), FsError> {
    mount(VmmBacking)
}

// Re-export so callers referencing fat-table geometry through `mount` keep
// working without importing `fs::fat` directly.
pub use fat::FAT_EOF;
