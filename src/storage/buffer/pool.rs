//! Buffer pool manager: a fixed set of frames caching disk pages.
//!
//! The pool resolves page ids to frames through an extendible hash page
//! table, prefers never-used frames from the free list, and otherwise
//! evicts the least recently released page, writing it back first when
//! dirty.
//!
//! # Concurrency
//!
//! One coarse latch guards all pool bookkeeping: the page table, per-frame
//! metadata, the free list, and the replacer. Disk I/O runs while the latch
//! is held; no thread waits on another inside the latch except incidentally
//! on that I/O.
//!
//! Frame content sits behind per-frame latches so that pinned pages can be
//! read and written without the pool latch. Latch order is single
//! direction: the pool latch may be held while acquiring a frame latch,
//! never the reverse. Guards uphold this by releasing their frame latch
//! before unpinning (which takes the pool latch).

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::error::BufferPoolError;
use super::frame::{Frame, FrameId, FrameMeta};
use super::guard::{PageReadGuard, PageWriteGuard};
use super::page_table::ExtendibleHashTable;
use super::replacer::Replacer;
use crate::storage::disk::DiskManager;
use crate::storage::page::PageId;

/// Bucket capacity of the page table's hash directory.
const PAGE_TABLE_BUCKET_SIZE: usize = 32;

/// Buffer pool manager.
///
/// Generic over the disk backend and the replacement policy; the pool only
/// speaks to either through their traits.
///
/// # Pinning contract
///
/// `fetch_page`, `fetch_page_mut`, and `new_page` return guards that pin
/// the page: the frame will not be evicted or deleted while any guard on it
/// lives. Multiple read guards may share a page; a write guard is
/// exclusive. Dropping a guard releases the pin.
pub struct BufferPool<D: DiskManager, R: Replacer<FrameId>> {
    inner: BufferPoolInner<D, R>,
}

/// Pool internals, shared with the guards for unpinning.
pub(super) struct BufferPoolInner<D: DiskManager, R: Replacer<FrameId>> {
    disk: D,

    /// Frame content; the Vec itself is immutable after construction.
    frames: Vec<Frame>,

    /// All pool bookkeeping, under the one pool latch.
    state: Mutex<PoolState<R>>,

    pool_size: usize,
}

struct PoolState<R> {
    /// Residency: which frame holds a page, exactly one frame per page.
    page_table: ExtendibleHashTable<PageId, FrameId>,

    /// Metadata per frame, indexed by `FrameId`.
    meta: Vec<FrameMeta>,

    /// Frames that have never held a page or were explicitly deleted.
    free_list: VecDeque<FrameId>,

    /// Eviction candidates: resident frames with no pins.
    replacer: R,
}

impl<D: DiskManager, R: Replacer<FrameId>> BufferPool<D, R> {
    /// Creates a buffer pool of `pool_size` frames over `disk`.
    ///
    /// # Panics
    ///
    /// Panics if `pool_size` is 0.
    pub fn new(disk: D, replacer: R, pool_size: usize) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");

        let frames: Vec<_> = (0..pool_size).map(|_| Frame::new()).collect();
        let meta: Vec<_> = (0..pool_size).map(|_| FrameMeta::new()).collect();
        let free_list: VecDeque<_> = (0..pool_size).map(FrameId::new).collect();

        Self {
            inner: BufferPoolInner {
                disk,
                frames,
                state: Mutex::new(PoolState {
                    page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
                    meta,
                    free_list,
                    replacer,
                }),
                pool_size,
            },
        }
    }

    /// Fetches a page for reading, pinning it.
    ///
    /// # Errors
    ///
    /// - `BufferPoolError::PoolExhausted` if every frame is pinned
    /// - `BufferPoolError::PageNotFound` if the page was never allocated
    /// - `BufferPoolError::Disk` on I/O failure
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageReadGuard<'_, D, R>, BufferPoolError> {
        let frame_id = self.inner.pin_frame(page_id)?;
        let data = self.inner.frames[frame_id.as_usize()].data.read();
        Ok(PageReadGuard::new(&self.inner, frame_id, page_id, data))
    }

    /// Fetches a page for writing, pinning it.
    ///
    /// Same failure modes as [`BufferPool::fetch_page`]. The guard is
    /// exclusive: it waits for other guards on the page to drop.
    pub fn fetch_page_mut(
        &self,
        page_id: PageId,
    ) -> Result<PageWriteGuard<'_, D, R>, BufferPoolError> {
        let frame_id = self.inner.pin_frame(page_id)?;
        let data = self.inner.frames[frame_id.as_usize()].data.write();
        Ok(PageWriteGuard::new(&self.inner, frame_id, page_id, data))
    }

    /// Allocates a fresh page on disk and pins it in a zeroed frame.
    ///
    /// The frame is acquired before the disk allocation so an exhausted
    /// pool does not leak page ids.
    ///
    /// # Errors
    ///
    /// - `BufferPoolError::PoolExhausted` if every frame is pinned
    /// - `BufferPoolError::Disk` on allocation or write-back failure
    pub fn new_page(&self) -> Result<PageWriteGuard<'_, D, R>, BufferPoolError> {
        let inner = &self.inner;
        let (frame_id, page_id) = {
            let mut state = inner.state.lock();

            let frame_id = inner.take_frame(&mut state)?;
            let page_id = match inner.disk.allocate_page() {
                Ok(page_id) => page_id,
                Err(e) => {
                    state.free_list.push_back(frame_id);
                    return Err(e.into());
                }
            };

            inner.frames[frame_id.as_usize()].data.write().zero();
            state.page_table.insert(page_id, frame_id);
            state.meta[frame_id.as_usize()].reset_for(page_id);

            (frame_id, page_id)
        };

        let data = inner.frames[frame_id.as_usize()].data.write();
        Ok(PageWriteGuard::new(inner, frame_id, page_id, data))
    }

    /// Releases one pin on a page, optionally marking it dirty.
    ///
    /// This is the manual counterpart of dropping a guard, for callers that
    /// track pins themselves. The dirty flag only ever accumulates here; a
    /// `false` cannot clear a previous `true`.
    ///
    /// Returns `false` if the page is not resident or its pin count is
    /// already zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.inner.state.lock();
        let state = &mut *state;

        let Some(frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let meta = &mut state.meta[frame_id.as_usize()];
        if meta.pin_count == 0 {
            return false;
        }

        meta.pin_count -= 1;
        if is_dirty {
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            state.replacer.insert(frame_id);
        }
        true
    }

    /// Writes a resident page to disk and clears its dirty flag.
    ///
    /// Returns `Ok(false)` if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut state = self.inner.state.lock();

        let Some(frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };

        {
            let data = self.inner.frames[frame_id.as_usize()].data.read();
            self.inner.disk.write_page(page_id, data.as_slice())?;
        }
        state.meta[frame_id.as_usize()].is_dirty = false;
        Ok(true)
    }

    /// Writes every dirty resident page to disk, then syncs.
    ///
    /// Checkpoint/shutdown helper. Stops at the first I/O failure.
    pub fn flush_all(&self) -> Result<(), BufferPoolError> {
        let mut state = self.inner.state.lock();

        for frame_id in (0..self.inner.pool_size).map(FrameId::new) {
            let meta = &state.meta[frame_id.as_usize()];
            let Some(page_id) = meta.page_id else {
                continue;
            };
            if !meta.is_dirty {
                continue;
            }

            {
                let data = self.inner.frames[frame_id.as_usize()].data.read();
                self.inner.disk.write_page(page_id, data.as_slice())?;
            }
            state.meta[frame_id.as_usize()].is_dirty = false;
        }

        self.inner.disk.sync_all()?;
        Ok(())
    }

    /// Drops a page from the pool and deallocates it on disk.
    ///
    /// Returns `Ok(false)` if the page is resident and pinned. The disk
    /// deallocation happens even when the page is not resident.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut state = self.inner.state.lock();

        if let Some(frame_id) = state.page_table.get(&page_id) {
            if state.meta[frame_id.as_usize()].pin_count > 0 {
                return Ok(false);
            }

            state.page_table.remove(&page_id);
            state.replacer.erase(frame_id);
            state.meta[frame_id.as_usize()].clear();
            self.inner.frames[frame_id.as_usize()].data.write().zero();
            state.free_list.push_back(frame_id);
        }

        self.inner.disk.deallocate_page(page_id);
        Ok(true)
    }

    /// Number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.inner.pool_size
    }

    /// Number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.inner.state.lock().page_table.len()
    }

    /// Pin count of a resident page, or `None` if not resident.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.inner.state.lock();
        let frame_id = state.page_table.get(&page_id)?;
        Some(state.meta[frame_id.as_usize()].pin_count)
    }

    /// Dirty flag of a resident page, or `None` if not resident.
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let state = self.inner.state.lock();
        let frame_id = state.page_table.get(&page_id)?;
        Some(state.meta[frame_id.as_usize()].is_dirty)
    }
}

impl<D: DiskManager, R: Replacer<FrameId>> BufferPoolInner<D, R> {
    /// Resolves a page to a pinned frame, loading it from disk on a miss.
    fn pin_frame(&self, page_id: PageId) -> Result<FrameId, BufferPoolError> {
        let mut state = self.state.lock();
        let state = &mut *state;

        // Hit: pin and withdraw from eviction.
        if let Some(frame_id) = state.page_table.get(&page_id) {
            let meta = &mut state.meta[frame_id.as_usize()];
            meta.pin_count += 1;
            if meta.pin_count == 1 {
                state.replacer.erase(frame_id);
            }
            return Ok(frame_id);
        }

        trace!(page = %page_id, "page miss, loading from disk");

        let frame_id = self.take_frame(state)?;

        {
            let mut data = self.frames[frame_id.as_usize()].data.write();
            if let Err(e) = self.disk.read_page(page_id, data.as_mut_slice()) {
                drop(data);
                state.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        state.page_table.insert(page_id, frame_id);
        state.meta[frame_id.as_usize()].reset_for(page_id);
        Ok(frame_id)
    }

    /// Acquires a frame for a new resident: free list first, then LRU
    /// victim. A victim's page is written back when dirty and unbound from
    /// the page table.
    fn take_frame(&self, state: &mut PoolState<R>) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = state.replacer.victim() else {
            return Err(BufferPoolError::PoolExhausted);
        };

        let meta = &state.meta[frame_id.as_usize()];
        // A pinned frame is never in the replacer; a victim that claims
        // otherwise means the invariant broke, so refuse rather than evict.
        if meta.pin_count != 0 {
            return Err(BufferPoolError::PoolExhausted);
        }
        let old_page_id = meta.page_id.expect("victim frame must hold a page");

        if meta.is_dirty {
            debug!(page = %old_page_id, "writing back dirty page before eviction");
            let data = self.frames[frame_id.as_usize()].data.read();
            if let Err(e) = self.disk.write_page(old_page_id, data.as_slice()) {
                drop(data);
                // The victim stays resident; put it back up for eviction.
                state.replacer.insert(frame_id);
                return Err(e.into());
            }
        }

        state.page_table.remove(&old_page_id);
        state.meta[frame_id.as_usize()].clear();
        Ok(frame_id)
    }

    /// Releases one pin; called from guard teardown.
    ///
    /// The guard has already released its frame latch at this point.
    pub(super) fn unpin(&self, frame_id: FrameId, is_dirty: bool) {
        let mut state = self.state.lock();
        let state = &mut *state;
        let meta = &mut state.meta[frame_id.as_usize()];

        if meta.pin_count > 0 {
            meta.pin_count -= 1;
            if is_dirty {
                meta.is_dirty = true;
            }
            if meta.pin_count == 0 {
                state.replacer.insert(frame_id);
            }
        }
    }
}
