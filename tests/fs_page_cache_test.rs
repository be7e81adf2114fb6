//! Page cache and Global File Table integration tests.
//!
//! Exercises the pool's free-list/dirty bookkeeping through
//! [`fatos_kernel::fs::page_cache::NullBacking`], without a real volume or
//! disk image.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(fatos_kernel::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use fatos_kernel::fs::gft;
use fatos_kernel::fs::page_cache::{NullBacking, PageCache};
use fatos_kernel::memory::{heap, pmm, vmm};

#[no_mangle]
#[link_section = ".text.boot"]
pub extern "C" fn KernelMain(_kernel_size: u64) -> ! {
    fatos_kernel::drivers::serial::init();
    pmm::init(false);
    vmm::init(false);
    heap::init(false);

    test_main();

    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    fatos_kernel::testing::test_panic_handler(info)
}

/// Contract: reserving a buffer for a fresh (gfd, page) makes it resident
/// and retrievable.
#[test_case]
fn test_reserve_buffer_makes_page_resident() {
    let mut cache: PageCache<NullBacking> = PageCache::new(0x5000_0000, 4, NullBacking);
    let gfd = gft::insert();

    let address = cache.reserve_buffer(gfd, 7).unwrap();
    assert!(cache.get_buffer(gfd, 7).unwrap() == address);

    gft::remove(gfd);
}

/// Contract: release_buffer frees the slot for reuse by a different page.
#[test_case]
fn test_release_buffer_frees_slot_for_reuse() {
    let mut cache: PageCache<NullBacking> = PageCache::new(0x5000_1000, 1, NullBacking);
    let gfd = gft::insert();

    let first = cache.reserve_buffer(gfd, 0).unwrap();
    cache.release_buffer(gfd, 0).unwrap();

    let second = cache.reserve_buffer(gfd, 1).unwrap();
    assert!(second == first, "freed single slot should be reused");

    cache.release_buffer(gfd, 1).unwrap();
    gft::remove(gfd);
}

/// Contract: reserving past the pool's capacity reports exhaustion.
#[test_case]
fn test_pool_exhaustion_reports_deplet() {
    let mut cache: PageCache<NullBacking> = PageCache::new(0x5000_2000, 2, NullBacking);
    let gfd = gft::insert();

    assert!(cache.reserve_buffer(gfd, 0).is_ok());
    assert!(cache.reserve_buffer(gfd, 1).is_ok());
    assert!(cache.reserve_buffer(gfd, 2).is_err());

    cache.release_buffer(gfd, 0).unwrap();
    cache.release_buffer(gfd, 1).unwrap();
    gft::remove(gfd);
}

/// Contract: make_dirty/is_page_dirty round trip through the GFT.
#[test_case]
fn test_dirty_flag_round_trip() {
    let mut cache: PageCache<NullBacking> = PageCache::new(0x5000_3000, 1, NullBacking);
    let gfd = gft::insert();

    cache.reserve_buffer(gfd, 0).unwrap();
    assert!(!cache.is_page_dirty(gfd, 0));

    cache.make_dirty(gfd, 0, true).unwrap();
    assert!(cache.is_page_dirty(gfd, 0));

    cache.make_dirty(gfd, 0, false).unwrap();
    assert!(!cache.is_page_dirty(gfd, 0));

    cache.release_buffer(gfd, 0).unwrap();
    gft::remove(gfd);
}

/// Contract: resident_pages_sorted returns pages in ascending page-index
/// order regardless of reservation order.
#[test_case]
fn test_resident_pages_sorted_ascending() {
    let mut cache: PageCache<NullBacking> = PageCache::new(0x5000_4000, 4, NullBacking);
    let gfd = gft::insert();

    cache.reserve_buffer(gfd, 3).unwrap();
    cache.reserve_buffer(gfd, 1).unwrap();
    cache.reserve_buffer(gfd, 2).unwrap();

    let pages = gft::resident_pages_sorted(gfd).unwrap();
    let indices: [u32; 3] = [pages[0].page, pages[1].page, pages[2].page];
    assert!(indices == [1, 2, 3]);

    cache.release_buffer(gfd, 1).unwrap();
    cache.release_buffer(gfd, 2).unwrap();
    cache.release_buffer(gfd, 3).unwrap();
    gft::remove(gfd);
}

/// Contract: an unknown gfd is rejected by the cache lookup path.
#[test_case]
fn test_unknown_gfd_is_rejected() {
    let cache: PageCache<NullBacking> = PageCache::new(0x5000_5000, 1, NullBacking);
    assert!(cache.get_buffer(999, 0).is_err());
}

/// Contract: a page that was never reserved on an otherwise-valid, in-use
/// gfd is rejected by both the read path and the release path, rather than
/// silently succeeding or panicking.
#[test_case]
fn test_unbuffered_page_on_live_gfd_is_rejected() {
    let mut cache: PageCache<NullBacking> = PageCache::new(0x5000_6000, 2, NullBacking);
    let gfd = gft::insert();

    cache.reserve_buffer(gfd, 0).unwrap();

    assert!(cache.get_buffer(gfd, 5).is_err());
    assert!(cache.release_buffer(gfd, 5).is_err());

    cache.release_buffer(gfd, 0).unwrap();
    gft::remove(gfd);
}
