//! RAII guards for buffer pool page access.
//!
//! A guard is a pin: while it lives, the page cannot be evicted. Dropping
//! the guard unpins, so release happens on every exit path and a manual
//! unpin cannot be forgotten.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use super::frame::FrameId;
use super::pool::BufferPoolInner;
use super::replacer::Replacer;
use crate::storage::disk::DiskManager;
use crate::storage::page::{PageData, PageId};

/// Shared, read-only view of a pinned page.
///
/// Multiple read guards may exist for one page at a time.
pub struct PageReadGuard<'a, D: DiskManager, R: Replacer<FrameId>> {
    pool: &'a BufferPoolInner<D, R>,
    frame_id: FrameId,
    page_id: PageId,
    // Dropped by hand before unpinning; see Drop.
    data: ManuallyDrop<RwLockReadGuard<'a, PageData>>,
}

impl<'a, D: DiskManager, R: Replacer<FrameId>> PageReadGuard<'a, D, R> {
    pub(super) fn new(
        pool: &'a BufferPoolInner<D, R>,
        frame_id: FrameId,
        page_id: PageId,
        data: RwLockReadGuard<'a, PageData>,
    ) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            data: ManuallyDrop::new(data),
        }
    }

    /// The id of the pinned page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl<D: DiskManager, R: Replacer<FrameId>> Deref for PageReadGuard<'_, D, R> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data.as_slice()
    }
}

impl<D: DiskManager, R: Replacer<FrameId>> Drop for PageReadGuard<'_, D, R> {
    fn drop(&mut self) {
        // The frame latch must be released before the pool latch is taken:
        // another thread may hold the pool latch while waiting on this
        // frame latch.
        // SAFETY: data is dropped exactly once, here.
        unsafe {
            ManuallyDrop::drop(&mut self.data);
        }
        self.pool.unpin(self.frame_id, false);
    }
}

/// Exclusive, writable view of a pinned page.
///
/// Any write through the guard marks the page dirty; the dirty flag is
/// handed to the pool when the guard drops.
pub struct PageWriteGuard<'a, D: DiskManager, R: Replacer<FrameId>> {
    pool: &'a BufferPoolInner<D, R>,
    frame_id: FrameId,
    page_id: PageId,
    dirty: bool,
    // Dropped by hand before unpinning; see Drop.
    data: ManuallyDrop<RwLockWriteGuard<'a, PageData>>,
}

impl<'a, D: DiskManager, R: Replacer<FrameId>> PageWriteGuard<'a, D, R> {
    pub(super) fn new(
        pool: &'a BufferPoolInner<D, R>,
        frame_id: FrameId,
        page_id: PageId,
        data: RwLockWriteGuard<'a, PageData>,
    ) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            dirty: false,
            data: ManuallyDrop::new(data),
        }
    }

    /// The id of the pinned page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Marks the page as modified without writing through the guard.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl<D: DiskManager, R: Replacer<FrameId>> Deref for PageWriteGuard<'_, D, R> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data.as_slice()
    }
}

impl<D: DiskManager, R: Replacer<FrameId>> DerefMut for PageWriteGuard<'_, D, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.dirty = true;
        self.data.as_mut_slice()
    }
}

impl<D: DiskManager, R: Replacer<FrameId>> Drop for PageWriteGuard<'_, D, R> {
    fn drop(&mut self) {
        // Same ordering constraint as PageReadGuard: frame latch first,
        // pool latch second.
        // SAFETY: data is dropped exactly once, here.
        unsafe {
            ManuallyDrop::drop(&mut self.data);
        }
        self.pool.unpin(self.frame_id, self.dirty);
    }
}
