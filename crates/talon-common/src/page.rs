//! Page identifiers for TalonDB storage.

use serde::{Deserialize, Serialize};

/// Size of a disk page in bytes (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Unique identifier for a disk-resident page.
///
/// Page ids are allocated monotonically by the buffer pool and are never
/// reused within a process lifetime. [`PageId::INVALID`] marks "no page".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub i32);

impl PageId {
    /// Sentinel denoting the absence of a page.
    pub const INVALID: PageId = PageId(-1);

    /// Creates a new PageId.
    pub fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns true if this identifier refers to a real page.
    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }

    /// Byte offset of this page within the data file.
    pub fn byte_offset(&self) -> u64 {
        self.0 as u64 * PAGE_SIZE as u64
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page:{}", self.0)
    }
}
