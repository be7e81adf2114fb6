#![no_std]
#![no_main]

use core::panic::PanicInfo;

use fatos_kernel::arch::{gdt, interrupts};
use fatos_kernel::drivers::{ata, serial};
use fatos_kernel::fs;
use fatos_kernel::logging;
use fatos_kernel::memory::{heap, pmm, vmm};

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    fatos_kernel::testing::test_panic_handler(info)
}

/// Kernel entry point, invoked by the bootloader with the loaded kernel
/// image size.
#[no_mangle]
#[link_section = ".text.boot"]
pub extern "C" fn KernelMain(_kernel_size: u64) -> ! {
    serial::init();
    pmm::init(false);
    gdt::init();
    interrupts::init();
    vmm::init(false);
    heap::init(false);
    ata::init();

    logln_boot();

    match fs::mount::mount_default() {
        Ok((_volume, root)) => {
            let child_count = root.borrow().children.len();
            logging::logln(
                "fs",
                format_args!("mounted FAT32 volume, root has {} entries", child_count),
            );
        }
        Err(err) => {
            logging::logln("fs", format_args!("mount failed: {}", err));
        }
    }

    loop {
        core::hint::spin_loop();
    }
}

fn logln_boot() {
    logging::logln("kernel", format_args!("kaos FAT32 kernel starting"));
}
