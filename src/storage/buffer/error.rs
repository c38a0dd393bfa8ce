//! Buffer pool errors.

use crate::storage::{DiskError, PageId};

/// Errors that can occur during buffer pool operations.
#[derive(Debug)]
pub enum BufferPoolError {
    /// Every frame is pinned; neither the free list nor the replacer can
    /// supply one. Callers retry after releasing pins.
    PoolExhausted,

    /// The requested page does not exist on disk.
    PageNotFound(PageId),

    /// Underlying disk I/O error.
    Disk(DiskError),
}

impl std::fmt::Display for BufferPoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferPoolError::PoolExhausted => {
                write!(f, "all frames are pinned; no page can be evicted")
            }
            BufferPoolError::PageNotFound(page_id) => {
                write!(f, "page not found: {}", page_id)
            }
            BufferPoolError::Disk(e) => write!(f, "disk error: {}", e),
        }
    }
}

impl std::error::Error for BufferPoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BufferPoolError::Disk(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DiskError> for BufferPoolError {
    fn from(e: DiskError) -> Self {
        match e {
            DiskError::PageNotFound(id) => BufferPoolError::PageNotFound(id),
            other => BufferPoolError::Disk(other),
        }
    }
}
