//! Extendible hashing, used as the buffer pool's page table.
//!
//! An extendible hash table keeps a directory of `2^I` slots (global depth
//! `I`), each pointing at a bucket with its own local depth `J ≤ I`. A full
//! bucket splits in isolation: only when the overflowing bucket is already
//! at the global depth does the directory double. Work stays confined to
//! the overflowing chain; there is no global rehash.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{BuildHasher, BuildHasherDefault, Hash};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Buckets never split past this local depth; beyond it, a bucket absorbs
/// overflow in place. Splitting further cannot separate keys whose hashes
/// agree on the low `MAX_DEPTH` bits.
const MAX_DEPTH: u32 = 32;

/// Associative map with extendible hashing and directory doubling.
///
/// `Find`/`Insert`/`Remove` run in constant expected time. Removal never
/// shrinks the directory. One internal mutex serializes all operations; the
/// table is shared by `&self`.
///
/// The hasher is pluggable the way `std::collections::HashMap`'s is, which
/// also makes directory layouts reproducible under a test hasher.
pub struct ExtendibleHashTable<K, V, S = BuildHasherDefault<DefaultHasher>> {
    bucket_size: usize,
    hasher: S,
    inner: Mutex<Directory<K, V>>,
}

/// Directory state: `dir[slot]` is an index into `buckets`.
///
/// Invariants, preserved by every split:
/// - `local_depth[b] <= global_depth` for every bucket `b`
/// - `buckets.len() <= 2^global_depth`
/// - two slots point at the same bucket `b` iff their indices agree on the
///   low `local_depth[b]` bits
struct Directory<K, V> {
    global_depth: u32,
    dir: Vec<usize>,
    local_depth: Vec<u32>,
    buckets: Vec<BTreeMap<K, V>>,
    len: usize,
}

impl<K: Hash + Eq + Ord, V> ExtendibleHashTable<K, V> {
    /// Creates a table with the given bucket capacity and the default
    /// hasher.
    ///
    /// # Panics
    ///
    /// Panics if `bucket_size` is 0.
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, BuildHasherDefault::default())
    }
}

impl<K: Hash + Eq + Ord, V, S: BuildHasher> ExtendibleHashTable<K, V, S> {
    /// Creates a table with the given bucket capacity and hasher.
    ///
    /// Initial state: global depth 1, two empty buckets, one directory slot
    /// each.
    ///
    /// # Panics
    ///
    /// Panics if `bucket_size` is 0.
    pub fn with_hasher(bucket_size: usize, hasher: S) -> Self {
        assert!(bucket_size > 0, "bucket_size must be > 0");

        Self {
            bucket_size,
            hasher,
            inner: Mutex::new(Directory {
                global_depth: 1,
                dir: vec![0, 1],
                local_depth: vec![1, 1],
                buckets: vec![BTreeMap::new(), BTreeMap::new()],
                len: 0,
            }),
        }
    }

    /// Looks up the value bound to `k`.
    pub fn get(&self, k: &K) -> Option<V>
    where
        V: Clone,
    {
        let hash = self.hasher.hash_one(k);
        let d = self.inner.lock();
        d.buckets[d.dir[d.slot_of(hash)]].get(k).cloned()
    }

    /// Binds `k` to `v`, replacing any existing binding. May split the
    /// target bucket one or more times.
    pub fn insert(&self, k: K, v: V) {
        let hash = self.hasher.hash_one(&k);
        let mut d = self.inner.lock();

        // An upsert of a present key changes no bucket occupancy.
        let bucket = d.dir[d.slot_of(hash)];
        if let Some(existing) = d.buckets[bucket].get_mut(&k) {
            *existing = v;
            return;
        }

        loop {
            let slot = d.slot_of(hash);
            let bucket = d.dir[slot];

            if d.buckets[bucket].len() < self.bucket_size {
                d.buckets[bucket].insert(k, v);
                d.len += 1;
                return;
            }

            if d.local_depth[bucket] >= MAX_DEPTH {
                // Every key in this bucket agrees with `k` on MAX_DEPTH bits
                // of hash; further splits cannot separate them. Absorb the
                // overflow instead of looping.
                warn!(
                    local_depth = d.local_depth[bucket],
                    "extendible hash bucket overflowing past depth cap"
                );
                d.buckets[bucket].insert(k, v);
                d.len += 1;
                return;
            }

            d.split(slot, &self.hasher);
        }
    }

    /// Removes any binding of `k`. Returns whether one existed. The
    /// directory never shrinks.
    pub fn remove(&self, k: &K) -> bool {
        let hash = self.hasher.hash_one(k);
        let mut d = self.inner.lock();
        let bucket = d.dir[d.slot_of(hash)];
        let removed = d.buckets[bucket].remove(k).is_some();
        if removed {
            d.len -= 1;
        }
        removed
    }

    /// Current global depth `I`; the directory has `2^I` slots.
    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    /// Local depth of bucket `bucket_id`.
    ///
    /// # Panics
    ///
    /// Panics if `bucket_id >= num_buckets()`.
    pub fn local_depth(&self, bucket_id: usize) -> u32 {
        self.inner.lock().local_depth[bucket_id]
    }

    /// Number of buckets allocated so far.
    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    /// Number of bindings in the table.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Whether the table holds no bindings.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Hash + Eq + Ord, V> Directory<K, V> {
    /// Directory slot for a hash: its low `global_depth` bits.
    fn slot_of(&self, hash: u64) -> usize {
        (hash & ((1u64 << self.global_depth) - 1)) as usize
    }

    /// Splits the bucket behind directory slot `slot`, doubling the
    /// directory when the bucket is already at global depth, then rehashes
    /// the bucket's entries across the split pair.
    fn split<S: BuildHasher>(&mut self, slot: usize, hasher: &S) {
        let bucket = self.dir[slot];
        let depth = self.local_depth[bucket];
        let new_bucket = self.buckets.len();

        self.buckets.push(BTreeMap::new());
        self.local_depth[bucket] = depth + 1;
        self.local_depth.push(depth + 1);

        if depth == self.global_depth {
            // The overflowing bucket owns its slot outright; grow the
            // directory by mirroring it, then point the mirrored slot of
            // the overflowing chain at the new bucket.
            let old_size = self.dir.len();
            self.global_depth += 1;
            self.dir.extend_from_within(0..old_size);
            self.dir[slot + old_size] = new_bucket;
        } else {
            // The bucket is shared by 2^(I - J) slots agreeing on its low
            // J bits; hand the half that disagrees on bit J to the new
            // bucket.
            let bit = 1usize << depth;
            for s in 0..self.dir.len() {
                if self.dir[s] == bucket && (s & bit) != (slot & bit) {
                    self.dir[s] = new_bucket;
                }
            }
        }

        debug!(
            global_depth = self.global_depth,
            bucket,
            new_bucket,
            local_depth = depth + 1,
            "split extendible hash bucket"
        );

        // Redistribute under the new directory; entries land in `bucket`
        // or `new_bucket` and nowhere else.
        let entries = std::mem::take(&mut self.buckets[bucket]);
        for (k, v) in entries {
            let target = self.dir[self.slot_of(hasher.hash_one(&k))];
            self.buckets[target].insert(k, v);
        }
    }
}
