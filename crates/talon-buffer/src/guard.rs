//! RAII guards for page access.
//!
//! Guards pair a pinned frame with scoped release:
//! - [`PageGuard`] - pin only; latches the page per data access
//! - [`ReadPageGuard`] - pin plus the read latch for its whole lifetime
//! - [`WritePageGuard`] - pin plus the write latch, marks the page dirty
//!
//! All guards unpin the page when dropped. The latch-holding variants
//! release the latch first, then unpin.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use talon_common::page::{PageId, PAGE_SIZE};

use crate::frame::Frame;
use crate::pool::BufferPoolManager;
use crate::replacer::AccessType;

/// Scope guard over a pinned page.
///
/// Holds the pin without a latch; `data`/`data_mut` latch the page for the
/// duration of the returned borrow. Mutable access marks the page dirty for
/// the unpin on drop.
pub struct PageGuard<'a> {
    pool: &'a BufferPoolManager,
    frame: &'a Frame,
    page_id: PageId,
    is_dirty: bool,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(pool: &'a BufferPoolManager, frame: &'a Frame) -> Self {
        Self {
            pool,
            frame,
            page_id: frame.page_id(),
            is_dirty: false,
        }
    }

    /// Returns the guarded page's id.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Latches the page for reading.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }

    /// Latches the page for writing and marks it dirty.
    pub fn data_mut(&mut self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.is_dirty = true;
        self.frame.write_data()
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool
            .unpin_page(self.page_id, self.is_dirty, AccessType::Unknown);
    }
}

/// Guard for shared read access to a page.
///
/// Holds the frame's read latch for its whole lifetime; multiple read
/// guards for the same page can coexist.
pub struct ReadPageGuard<'a> {
    // Declared before the pin guard so the latch is released before the
    // unpin runs.
    data: RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>,
    guard: PageGuard<'a>,
}

impl<'a> ReadPageGuard<'a> {
    pub(crate) fn new(pool: &'a BufferPoolManager, frame: &'a Frame) -> Self {
        Self {
            data: frame.read_data(),
            guard: PageGuard::new(pool, frame),
        }
    }

    /// Returns the guarded page's id.
    pub fn page_id(&self) -> PageId {
        self.guard.page_id()
    }

    /// Returns the page bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..]
    }
}

impl Deref for ReadPageGuard<'_> {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }
}

/// Guard for exclusive write access to a page.
///
/// Holds the frame's write latch for its whole lifetime and unpins the
/// page as dirty.
pub struct WritePageGuard<'a> {
    // Same drop ordering as ReadPageGuard.
    data: RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>,
    guard: PageGuard<'a>,
}

impl<'a> WritePageGuard<'a> {
    pub(crate) fn new(pool: &'a BufferPoolManager, frame: &'a Frame) -> Self {
        let mut guard = PageGuard::new(pool, frame);
        guard.is_dirty = true;
        Self {
            data: frame.write_data(),
            guard,
        }
    }

    /// Returns the guarded page's id.
    pub fn page_id(&self) -> PageId {
        self.guard.page_id()
    }

    /// Returns the page bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..]
    }

    /// Returns the page bytes mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }
}

impl Deref for WritePageGuard<'_> {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }
}

impl DerefMut for WritePageGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }
}
