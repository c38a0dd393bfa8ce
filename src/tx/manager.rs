//! Transaction lifecycle management.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::lock_manager::LockManager;
use super::transaction::Transaction;
use super::types::{RecordId, TxnId, TxnState};

/// Allocates transaction ids and drives begin/commit/abort.
///
/// Ids are handed out monotonically from 1; their order is the age order
/// the lock manager's wound-wait policy relies on.
pub struct TransactionManager {
    next_id: AtomicU64,
}

impl TransactionManager {
    /// Creates a new transaction manager.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Begins a new transaction in the growing phase.
    pub fn begin(&self) -> Transaction {
        let id = TxnId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(txn = %id, "begin transaction");
        Transaction::new(id)
    }

    /// Commits a transaction and releases every lock it holds.
    ///
    /// The state moves to `Committed` before the locks are released, so
    /// the releases are admissible under strict 2PL.
    ///
    /// # Panics
    ///
    /// Panics if the transaction already finished.
    pub fn commit(&self, txn: &mut Transaction, locks: &LockManager) {
        assert!(
            !txn.state().is_terminal(),
            "commit of a finished transaction"
        );
        txn.set_state(TxnState::Committed);
        debug!(txn = %txn.id(), "commit transaction");
        Self::release_all(txn, locks);
    }

    /// Aborts a transaction and releases every lock it holds.
    ///
    /// Aborting a wounded (already aborted) transaction is fine; this is
    /// the normal cleanup path after a refused lock request.
    ///
    /// # Panics
    ///
    /// Panics if the transaction committed.
    pub fn abort(&self, txn: &mut Transaction, locks: &LockManager) {
        assert_ne!(
            txn.state(),
            TxnState::Committed,
            "abort of a committed transaction"
        );
        txn.set_state(TxnState::Aborted);
        debug!(txn = %txn.id(), "abort transaction");
        Self::release_all(txn, locks);
    }

    fn release_all(txn: &mut Transaction, locks: &LockManager) {
        let held: Vec<RecordId> = txn
            .shared_locks()
            .iter()
            .chain(txn.exclusive_locks().iter())
            .copied()
            .collect();
        for rid in held {
            let released = locks.unlock(txn, rid);
            debug_assert!(released, "release of a held lock cannot be refused");
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PageId;

    fn rid(page: u64, slot: u32) -> RecordId {
        RecordId::new(PageId::new(page), slot)
    }

    #[test]
    fn test_ids_are_monotonic() {
        let tm = TransactionManager::new();
        let t1 = tm.begin();
        let t2 = tm.begin();
        let t3 = tm.begin();
        assert!(t1.id() < t2.id());
        assert!(t2.id() < t3.id());
    }

    #[test]
    fn test_commit_releases_locks_under_strict_2pl() {
        let tm = TransactionManager::new();
        let lm = LockManager::new(true);
        let mut t1 = tm.begin();

        assert!(lm.lock_exclusive(&mut t1, rid(1, 0)));
        assert!(lm.lock_shared(&mut t1, rid(2, 0)));

        tm.commit(&mut t1, &lm);
        assert_eq!(t1.state(), TxnState::Committed);
        assert!(t1.shared_locks().is_empty());
        assert!(t1.exclusive_locks().is_empty());
        assert!(!lm.is_locked(rid(1, 0)));
        assert!(!lm.is_locked(rid(2, 0)));
    }

    #[test]
    fn test_abort_after_wound_releases_held_locks() {
        let tm = TransactionManager::new();
        let lm = LockManager::new(false);
        let mut t1 = tm.begin();
        let mut t2 = tm.begin();

        // t2 holds a lock, then gets wounded on another record.
        assert!(lm.lock_exclusive(&mut t2, rid(1, 0)));
        assert!(lm.lock_exclusive(&mut t1, rid(2, 0)));
        assert!(!lm.lock_shared(&mut t2, rid(2, 0)));
        assert_eq!(t2.state(), TxnState::Aborted);

        tm.abort(&mut t2, &lm);
        assert!(!lm.is_locked(rid(1, 0)));
        assert!(t2.exclusive_locks().is_empty());
    }
}
