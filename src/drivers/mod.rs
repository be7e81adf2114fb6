//! Hardware drivers for FatOS kernel

pub mod ata;
pub mod screen;
pub mod serial;
