//! Block I/O shim between the page cache and the ATA PIO driver.
//!
//! The host ATA driver transfers sector data directly into/out of a Rust
//! slice via port I/O (no DMA descriptor), so unlike the original C driver
//! this shim does not need to translate the page-cache buffer's virtual
//! address to a physical one before handing it to the storage driver —
//! that translation (`vmmngr_get_phys_addr`) is only needed by the page
//! cache's own anonymous-reservation bookkeeping.

use crate::drivers::ata;
use crate::fs::error::FsError;

pub const SECTOR_SIZE: usize = 512;
pub const SECTORS_PER_PAGE: u8 = 8;
pub const PAGE_SIZE: usize = SECTOR_SIZE * SECTORS_PER_PAGE as usize;

/// Reads one 4 KiB page (8 sectors) starting at `lba` into `buffer`.
pub fn read_4k(buffer: &mut [u8], lba: u32) -> Result<(), FsError> {
    debug_assert!(buffer.len() >= PAGE_SIZE);
    ata::read_sectors(&mut buffer[..PAGE_SIZE], lba, SECTORS_PER_PAGE)?;
    Ok(())
}

/// Writes one 4 KiB page (8 sectors) starting at `lba` from `buffer`.
pub fn write_4k(buffer: &[u8], lba: u32) -> Result<(), FsError> {
    debug_assert!(buffer.len() >= PAGE_SIZE);
    ata::write_sectors(&buffer[..PAGE_SIZE], lba, SECTORS_PER_PAGE)?;
    Ok(())
}

/// Converts a data cluster id (bias 2: cluster 2 is the first data
/// cluster) into its starting LBA relative to the volume's data area.
pub fn cluster_lba(cluster_lba_base: u32, cluster: u32) -> u32 {
    cluster_lba_base + (cluster - 2) * SECTORS_PER_PAGE as u32
}

pub fn read_by_cluster(buffer: &mut [u8], cluster_lba_base: u32, cluster: u32) -> Result<(), FsError> {
    read_4k(buffer, cluster_lba(cluster_lba_base, cluster))
}

pub fn write_by_cluster(buffer: &[u8], cluster_lba_base: u32, cluster: u32) -> Result<(), FsError> {
    write_4k(buffer, cluster_lba(cluster_lba_base, cluster))
}
