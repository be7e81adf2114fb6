//! Global File Table: maps a handle (gfd) to the page cache's per-file
//! resident-page list.
//!
//! This mirrors the open-file table the page cache consults in the
//! original driver, stripped to exactly what the cache bookkeeping needs:
//! whether a handle is live, and the ordered list of pages it has
//! currently buffered.

use alloc::vec::Vec;

use crate::fs::error::CacheError;
use crate::sync::spinlock::SpinLock;

/// Reserved handle used exclusively for transient FAT-block scratch reads.
/// No ordinary open file is ever assigned this slot.
pub const GFD_FAT_SPECIAL: usize = 0;

#[derive(Clone, Copy)]
pub struct PageRecord {
    pub page: u32,
    pub buffer_index: u32,
    pub dirty: bool,
}

struct GftEntry {
    in_use: bool,
    pages: Vec<PageRecord>,
}

struct Gft {
    entries: Vec<GftEntry>,
}

impl Gft {
    fn new() -> Self {
        // Slot 0 is GFD_FAT_SPECIAL: always live, never returned by `insert`.
        let mut entries = Vec::new();
        entries.push(GftEntry {
            in_use: true,
            pages: Vec::new(),
        });
        Self { entries }
    }
}

static GFT: SpinLock<Option<Gft>> = SpinLock::new(None);

fn with_gft<R>(f: impl FnOnce(&mut Gft) -> R) -> R {
    let mut guard = GFT.lock();
    if guard.is_none() {
        *guard = Some(Gft::new());
    }
    f(guard.as_mut().unwrap())
}

/// Allocates a new handle, reusing the first free non-special slot.
pub fn insert() -> usize {
    with_gft(|gft| {
        for (idx, entry) in gft.entries.iter_mut().enumerate().skip(1) {
            if !entry.in_use {
                entry.in_use = true;
                entry.pages.clear();
                return idx;
            }
        }
        gft.entries.push(GftEntry {
            in_use: true,
            pages: Vec::new(),
        });
        gft.entries.len() - 1
    })
}

/// Releases `gfd` back to the free pool.
///
/// Callers must release every resident page for this handle first; this
/// does not itself touch the page cache pool.
pub fn remove(gfd: usize) {
    if gfd == GFD_FAT_SPECIAL {
        return;
    }
    with_gft(|gft| {
        if let Some(entry) = gft.entries.get_mut(gfd) {
            entry.in_use = false;
            entry.pages.clear();
        }
    });
}

pub fn find_page(gfd: usize, page: u32) -> Result<PageRecord, CacheError> {
    with_gft(|gft| {
        let entry = gft.entries.get(gfd).ok_or(CacheError::OutOfBounds)?;
        if !entry.in_use {
            return Err(CacheError::Invalid);
        }
        entry
            .pages
            .iter()
            .find(|r| r.page == page)
            .copied()
            .ok_or(CacheError::FinfoNotFound)
    })
}

pub fn push_page(gfd: usize, page: u32, buffer_index: u32) -> Result<(), CacheError> {
    with_gft(|gft| {
        let entry = gft.entries.get_mut(gfd).ok_or(CacheError::OutOfBounds)?;
        if !entry.in_use {
            return Err(CacheError::Invalid);
        }
        entry.pages.push(PageRecord {
            page,
            buffer_index,
            dirty: false,
        });
        Ok(())
    })
}

pub fn remove_page(gfd: usize, page: u32) -> Result<u32, CacheError> {
    with_gft(|gft| {
        let entry = gft.entries.get_mut(gfd).ok_or(CacheError::OutOfBounds)?;
        if entry.pages.is_empty() {
            return Err(CacheError::BadPages);
        }
        let pos = entry
            .pages
            .iter()
            .position(|r| r.page == page)
            .ok_or(CacheError::PageNotFound)?;
        Ok(entry.pages.remove(pos).buffer_index)
    })
}

pub fn set_dirty(gfd: usize, page: u32, dirty: bool) -> Result<(), CacheError> {
    with_gft(|gft| {
        let entry = gft.entries.get_mut(gfd).ok_or(CacheError::OutOfBounds)?;
        let record = entry
            .pages
            .iter_mut()
            .find(|r| r.page == page)
            .ok_or(CacheError::FinfoNotFound)?;
        record.dirty = dirty;
        Ok(())
    })
}

pub fn is_dirty(gfd: usize, page: u32) -> Result<bool, CacheError> {
    find_page(gfd, page).map(|r| r.dirty)
}

/// Snapshots every page currently resident for `gfd`, ascending by page
/// index, for use by `sync`.
pub fn resident_pages_sorted(gfd: usize) -> Result<Vec<PageRecord>, CacheError> {
    with_gft(|gft| {
        let entry = gft.entries.get(gfd).ok_or(CacheError::OutOfBounds)?;
        let mut pages = entry.pages.clone();
        pages.sort_by_key(|r| r.page);
        Ok(pages)
    })
}
