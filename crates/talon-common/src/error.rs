//! Error types for TalonDB.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using TalonError.
pub type Result<T> = std::result::Result<T, TalonError>;

/// Errors that can occur in TalonDB operations.
#[derive(Debug, Error)]
pub enum TalonError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on {page_id}: {source}")]
    PageIo {
        page_id: PageId,
        source: std::io::Error,
    },

    // Contract violations by the caller
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
}

impl TalonError {
    /// Wraps an I/O error with the page it occurred on.
    pub fn page_io(page_id: PageId, source: std::io::Error) -> Self {
        Self::PageIo { page_id, source }
    }

    /// Attaches a page identifier to a bare I/O error; other variants pass
    /// through unchanged.
    pub fn for_page(self, page_id: PageId) -> Self {
        match self {
            Self::Io(source) => Self::PageIo { page_id, source },
            other => other,
        }
    }
}
