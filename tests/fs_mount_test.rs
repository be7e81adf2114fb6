//! Mount-time LBA arithmetic integration tests.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(fatos_kernel::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use fatos_kernel::fs::mount::compute_lbas;

#[no_mangle]
#[link_section = ".text.boot"]
pub extern "C" fn KernelMain(_kernel_size: u64) -> ! {
    fatos_kernel::drivers::serial::init();
    test_main();

    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    fatos_kernel::testing::test_panic_handler(info)
}

/// Contract: fat_lba/cluster_lba arithmetic for a representative volume
/// geometry (partition_offset=2048, reserved=32, FATs=2, sectors_per_FAT=1008).
#[test_case]
fn test_compute_lbas_named_scenario() {
    let (fat_lba, cluster_lba) = compute_lbas(2048, 32, 2, 1008);
    assert!(fat_lba == 2080);
    assert!(cluster_lba == 4096);
}

/// Contract: a single FAT (no mirror) still offsets the cluster area
/// correctly.
#[test_case]
fn test_compute_lbas_single_fat() {
    let (fat_lba, cluster_lba) = compute_lbas(0, 32, 1, 500);
    assert!(fat_lba == 32);
    assert!(cluster_lba == 532);
}
