//! Disk manager implementations.
//!
//! This module provides the `DiskManager` trait for blocking page I/O,
//! along with MemoryDisk and FileDisk implementations.

mod file;
mod memory;

pub use file::FileDisk;
pub use memory::MemoryDisk;

use super::error::DiskError;
use super::page::PageId;

/// Blocking page I/O backend.
///
/// The disk manager owns page allocation and persistence; the buffer pool
/// consumes it through this narrow interface and never touches the file
/// format itself. All transfers use caller-owned buffers of exactly
/// `PAGE_SIZE` bytes.
///
/// # Blocking model
///
/// Every method may block the calling thread on I/O. The buffer pool is
/// explicitly allowed to call these while holding its own latch; the trait
/// therefore must not call back into the pool.
///
/// # Thread safety
///
/// Implementations must be `Send + Sync`; the pool shares one instance
/// across all client threads.
pub trait DiskManager: Send + Sync {
    /// Reads a page into a caller-provided buffer.
    ///
    /// # Errors
    ///
    /// Returns `DiskError::PageNotFound` if the page has not been allocated.
    /// Returns `DiskError::InvalidBufferSize` if `buf.len() != PAGE_SIZE`.
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), DiskError>;

    /// Writes a page from a caller-provided buffer.
    ///
    /// # Errors
    ///
    /// Returns `DiskError::PageNotFound` if the page has not been allocated.
    /// Returns `DiskError::InvalidBufferSize` if `buf.len() != PAGE_SIZE`.
    fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<(), DiskError>;

    /// Allocates a fresh page id, reusing deallocated ids when possible.
    ///
    /// The new page reads back as zeros until first written.
    fn allocate_page(&self) -> Result<PageId, DiskError>;

    /// Marks a page id free for reuse.
    ///
    /// Deallocating an id that was never allocated is a no-op: the buffer
    /// pool deallocates on delete even when the page is not resident.
    fn deallocate_page(&self, page_id: PageId);

    /// Returns the number of live (allocated, not deallocated) pages.
    fn page_count(&self) -> usize;

    /// Forces pending writes to durable storage.
    ///
    /// No-op for in-memory backends; fsync for file-backed ones.
    fn sync_all(&self) -> Result<(), DiskError>;
}
