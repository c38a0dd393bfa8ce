//! Page replacement policies for the buffer pool.
//!
//! The replacer tracks evictable (unpinned) frames and picks victims when
//! the pool runs out of free frames.

use std::hash::Hash;

use hashlink::LinkedHashMap;
use parking_lot::Mutex;

/// Capability set of a replacement policy.
///
/// The buffer pool programs against this trait rather than a concrete
/// policy, so alternatives (CLOCK, 2Q) slot in without touching the pool.
///
/// Implementations carry their own latch; all methods take `&self`.
pub trait Replacer<T>: Send + Sync {
    /// Records `x` as most-recently-released. If already present, `x`
    /// moves to the most-recent position.
    fn insert(&self, x: T);

    /// Removes and returns the element least recently inserted, or `None`
    /// if the replacer is empty.
    fn victim(&self) -> Option<T>;

    /// Removes `x` if present (a page got pinned again before eviction).
    /// Returns whether `x` was present.
    fn erase(&self, x: T) -> bool;

    /// Number of elements currently eligible for eviction.
    fn len(&self) -> usize;

    /// Whether no element is eligible for eviction.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// LRU (Least Recently Used) replacement policy.
///
/// Backed by an insertion-ordered hash map: most-recent at the back, victim
/// popped from the front. `insert`, `victim`, and `erase` are all O(1).
pub struct LruReplacer<T> {
    inner: Mutex<LinkedHashMap<T, ()>>,
}

impl<T: Hash + Eq> LruReplacer<T> {
    /// Creates a new empty LRU replacer.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LinkedHashMap::new()),
        }
    }
}

impl<T: Hash + Eq> Default for LruReplacer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Hash + Eq + Copy + Send + Sync> Replacer<T> for LruReplacer<T> {
    fn insert(&self, x: T) {
        let mut order = self.inner.lock();
        // Remove-then-insert refreshes an existing element to the back.
        order.remove(&x);
        order.insert(x, ());
    }

    fn victim(&self) -> Option<T> {
        self.inner.lock().pop_front().map(|(x, ())| x)
    }

    fn erase(&self, x: T) -> bool {
        self.inner.lock().remove(&x).is_some()
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
