//! Record lock manager: shared/exclusive locks under two-phase locking
//! with wound-wait deadlock avoidance.
//!
//! Each locked record has a FIFO queue of requests. A transaction that
//! would have to wait behind an older transaction simply waits; a younger
//! one is wounded (aborted) at arrival instead of enqueueing. Wait-for
//! edges therefore always point from older to younger and no cycle can
//! form, so there is no deadlock detector.
//!
//! One mutex guards the whole lock table and one condition variable is
//! shared across all records; the grant predicates are scoped per record.

use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::transaction::Transaction;
use super::types::{LockMode, RecordId, TxnId, TxnState};

/// A queued lock request.
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

/// Per-record wait/grant queue.
///
/// Invariants: granted requests form a prefix of `requests`; at most one
/// granted exclusive; no granted shared coexists with a granted exclusive;
/// `oldest` is the minimum txn id among `requests`.
struct LockTableEntry {
    requests: Vec<LockRequest>,
    granted_exclusive: usize,
    oldest: TxnId,
}

impl LockTableEntry {
    fn new(first: LockRequest) -> Self {
        let oldest = first.txn_id;
        Self {
            requests: vec![first],
            granted_exclusive: 0,
            oldest,
        }
    }
}

/// Shared/exclusive record lock manager.
///
/// All operations return `bool`: `false` means the request was refused and,
/// for wounds and protocol violations, that the transaction is now
/// `Aborted`. Precondition violations (locking outside the growing phase,
/// unlocking a record that is not held) are caller bugs and assert.
pub struct LockManager {
    /// When set, unlock before commit/abort is a protocol violation.
    strict: bool,
    table: Mutex<HashMap<RecordId, LockTableEntry>>,
    grant_changed: Condvar,
}

impl LockManager {
    /// Creates a lock manager; `strict` selects strict 2PL.
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            table: Mutex::new(HashMap::new()),
            grant_changed: Condvar::new(),
        }
    }

    /// Acquires a shared lock on `rid`, blocking until granted.
    ///
    /// Returns `false` without enqueueing if the transaction is already
    /// aborted, or if it is wounded on arrival: an exclusive request is
    /// present and `txn` is younger than the oldest transaction at the
    /// record.
    ///
    /// # Panics
    ///
    /// Panics if `txn` is not in the growing phase or already holds a
    /// shared lock on `rid`.
    pub fn lock_shared(&self, txn: &mut Transaction, rid: RecordId) -> bool {
        let mut table = self.table.lock();

        if txn.state() == TxnState::Aborted {
            return false;
        }
        assert_eq!(
            txn.state(),
            TxnState::Growing,
            "lock request outside the growing phase"
        );
        assert!(
            !txn.holds_shared(rid),
            "shared lock already held on {}",
            rid
        );

        if let Some(entry) = table.get_mut(&rid) {
            // Without an exclusive request everything ahead is (or will
            // be) granted shared; nobody waits, so nobody can deadlock
            // and no wound is needed.
            let exclusive_present = entry
                .requests
                .iter()
                .any(|r| r.mode == LockMode::Exclusive);
            if exclusive_present && txn.id() > entry.oldest {
                debug!(txn = %txn.id(), record = %rid, "wounding younger shared requester");
                txn.set_state(TxnState::Aborted);
                return false;
            }

            if txn.id() < entry.oldest {
                entry.oldest = txn.id();
            }
            entry.requests.push(LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Shared,
                granted: false,
            });
        } else {
            table.insert(
                rid,
                LockTableEntry::new(LockRequest {
                    txn_id: txn.id(),
                    mode: LockMode::Shared,
                    granted: false,
                }),
            );
        }

        // Admissible once everything ahead of us is a granted shared
        // request.
        while !shared_admissible(&table[&rid], txn.id()) {
            self.grant_changed.wait(&mut table);
        }

        let entry = table.get_mut(&rid).expect("entry lives while a request is queued");
        own_request(entry, txn.id()).granted = true;
        txn.add_shared(rid);
        trace!(txn = %txn.id(), record = %rid, "shared lock granted");

        // Shared requests queued behind this one may now be admissible.
        self.grant_changed.notify_all();
        true
    }

    /// Acquires an exclusive lock on `rid`, blocking until granted.
    ///
    /// The wound rule is unconditional: arriving younger than the oldest
    /// transaction at the record aborts `txn`.
    ///
    /// # Panics
    ///
    /// Panics if `txn` is not in the growing phase or already holds a lock
    /// on `rid` (upgrade is the path from shared to exclusive).
    pub fn lock_exclusive(&self, txn: &mut Transaction, rid: RecordId) -> bool {
        let mut table = self.table.lock();

        if txn.state() == TxnState::Aborted {
            return false;
        }
        assert_eq!(
            txn.state(),
            TxnState::Growing,
            "lock request outside the growing phase"
        );
        assert!(
            !txn.holds_shared(rid) && !txn.holds_exclusive(rid),
            "lock already held on {}",
            rid
        );

        if let Some(entry) = table.get_mut(&rid) {
            if txn.id() > entry.oldest {
                debug!(txn = %txn.id(), record = %rid, "wounding younger exclusive requester");
                txn.set_state(TxnState::Aborted);
                return false;
            }

            entry.oldest = txn.id();
            entry.requests.push(LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Exclusive,
                granted: false,
            });
        } else {
            table.insert(
                rid,
                LockTableEntry::new(LockRequest {
                    txn_id: txn.id(),
                    mode: LockMode::Exclusive,
                    granted: false,
                }),
            );
        }

        // Admissible once ours is the head request.
        while !exclusive_admissible(&table[&rid], txn.id()) {
            self.grant_changed.wait(&mut table);
        }

        let entry = table.get_mut(&rid).expect("entry lives while a request is queued");
        own_request(entry, txn.id()).granted = true;
        entry.granted_exclusive += 1;
        txn.add_exclusive(rid);
        trace!(txn = %txn.id(), record = %rid, "exclusive lock granted");

        // An exclusive grant admits nothing else; no wakeup needed.
        true
    }

    /// Upgrades a held shared lock on `rid` to exclusive, blocking until
    /// every other granted request has been released.
    ///
    /// # Panics
    ///
    /// Panics if `txn` is not in the growing phase or does not hold a
    /// shared lock on `rid`.
    pub fn lock_upgrade(&self, txn: &mut Transaction, rid: RecordId) -> bool {
        let mut table = self.table.lock();

        if txn.state() == TxnState::Aborted {
            return false;
        }
        assert_eq!(
            txn.state(),
            TxnState::Growing,
            "lock request outside the growing phase"
        );
        assert!(
            txn.holds_shared(rid),
            "upgrade without a shared lock on {}",
            rid
        );

        // Ready once our request is at the head and is the sole granted
        // one. Two transactions upgrading the same record wait on each
        // other forever; callers serialize upgrades per record.
        while !upgrade_ready(&table[&rid], txn.id()) {
            self.grant_changed.wait(&mut table);
        }

        let entry = table.get_mut(&rid).expect("entry lives while a request is queued");
        let head = &mut entry.requests[0];
        head.mode = LockMode::Exclusive;
        entry.granted_exclusive += 1;
        txn.remove_shared(rid);
        txn.add_exclusive(rid);
        trace!(txn = %txn.id(), record = %rid, "lock upgraded to exclusive");
        true
    }

    /// Releases `txn`'s lock on `rid`.
    ///
    /// Under non-strict 2PL the first unlock moves the transaction from
    /// `Growing` to `Shrinking`. Under strict 2PL an unlock before
    /// commit/abort aborts the transaction and returns `false` without
    /// releasing.
    ///
    /// # Panics
    ///
    /// Panics if `txn` holds no lock on `rid`.
    pub fn unlock(&self, txn: &mut Transaction, rid: RecordId) -> bool {
        let mut table = self.table.lock();

        assert!(
            txn.holds_shared(rid) || txn.holds_exclusive(rid),
            "unlocking a record that is not held: {}",
            rid
        );

        if self.strict && !txn.state().is_terminal() {
            debug!(txn = %txn.id(), record = %rid, "unlock before end of transaction under strict 2PL");
            txn.set_state(TxnState::Aborted);
            return false;
        }
        if txn.state() == TxnState::Growing {
            txn.set_state(TxnState::Shrinking);
        }

        let entry = table.get_mut(&rid).expect("held lock must have a table entry");
        let pos = entry
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id())
            .expect("own request present");
        let request = entry.requests.remove(pos);

        match request.mode {
            LockMode::Shared => {
                txn.remove_shared(rid);
            }
            LockMode::Exclusive => {
                txn.remove_exclusive(rid);
                if request.granted {
                    entry.granted_exclusive -= 1;
                }
            }
        }

        let now_empty = entry.requests.is_empty();
        if !now_empty {
            entry.oldest = entry
                .requests
                .iter()
                .map(|r| r.txn_id)
                .min()
                .expect("non-empty request list");
        }
        if now_empty {
            table.remove(&rid);
        }

        self.grant_changed.notify_all();
        true
    }

    /// Whether any request (granted or waiting) exists for `rid`.
    pub fn is_locked(&self, rid: RecordId) -> bool {
        self.table.lock().contains_key(&rid)
    }
}

/// A shared request is admissible when everything ahead of it is a granted
/// shared request.
fn shared_admissible(entry: &LockTableEntry, txn_id: TxnId) -> bool {
    for r in &entry.requests {
        if r.txn_id == txn_id {
            return true;
        }
        if r.mode != LockMode::Shared || !r.granted {
            return false;
        }
    }
    unreachable!("request vanished from its queue")
}

/// An exclusive request is admissible at the head of the queue and nowhere
/// else. Requests leave the queue on unlock, so head means no request
/// precedes at all; admitting past an ungranted earlier request would
/// break FIFO order and the granted-prefix invariant.
fn exclusive_admissible(entry: &LockTableEntry, txn_id: TxnId) -> bool {
    match entry.requests.first() {
        Some(head) => head.txn_id == txn_id,
        None => unreachable!("request vanished from its queue"),
    }
}

/// An upgrade proceeds when the upgrader's request heads the queue and is
/// the sole granted request.
fn upgrade_ready(entry: &LockTableEntry, txn_id: TxnId) -> bool {
    match entry.requests.first() {
        Some(head) if head.txn_id == txn_id => entry.requests[1..].iter().all(|r| !r.granted),
        _ => false,
    }
}

fn own_request(entry: &mut LockTableEntry, txn_id: TxnId) -> &mut LockRequest {
    entry
        .requests
        .iter_mut()
        .find(|r| r.txn_id == txn_id)
        .expect("own request present")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PageId;
    use crate::tx::manager::TransactionManager;

    fn rid(page: u64, slot: u32) -> RecordId {
        RecordId::new(PageId::new(page), slot)
    }

    #[test]
    fn test_exclusive_lock_and_unlock_leaves_no_residue() {
        let tm = TransactionManager::new();
        let lm = LockManager::new(false);
        let mut t1 = tm.begin();
        let r = rid(1, 0);

        assert!(lm.lock_exclusive(&mut t1, r));
        assert!(t1.holds_exclusive(r));
        assert!(lm.is_locked(r));

        assert!(lm.unlock(&mut t1, r));
        assert!(!t1.holds_exclusive(r));
        assert!(!lm.is_locked(r));
        assert_eq!(t1.state(), TxnState::Shrinking);
    }

    #[test]
    fn test_shared_locks_coexist() {
        let tm = TransactionManager::new();
        let lm = LockManager::new(false);
        let mut t1 = tm.begin();
        let mut t2 = tm.begin();
        let r = rid(1, 0);

        assert!(lm.lock_shared(&mut t1, r));
        assert!(lm.lock_shared(&mut t2, r));
        assert!(t1.holds_shared(r));
        assert!(t2.holds_shared(r));
    }

    #[test]
    fn test_younger_shared_requester_is_wounded() {
        let tm = TransactionManager::new();
        let lm = LockManager::new(false);
        let mut t1 = tm.begin();
        let mut t2 = tm.begin();
        let r = rid(1, 0);

        assert!(lm.lock_exclusive(&mut t1, r));
        assert!(!lm.lock_shared(&mut t2, r));
        assert_eq!(t2.state(), TxnState::Aborted);
        // The wounded request never enqueued.
        assert!(!t2.holds_shared(r));
    }

    #[test]
    fn test_younger_exclusive_requester_is_wounded() {
        let tm = TransactionManager::new();
        let lm = LockManager::new(false);
        let mut t1 = tm.begin();
        let mut t2 = tm.begin();
        let r = rid(1, 0);

        assert!(lm.lock_shared(&mut t1, r));
        assert!(!lm.lock_exclusive(&mut t2, r));
        assert_eq!(t2.state(), TxnState::Aborted);
    }

    #[test]
    fn test_aborted_transaction_requests_short_circuit() {
        let tm = TransactionManager::new();
        let lm = LockManager::new(false);
        let mut t1 = tm.begin();
        let mut t2 = tm.begin();
        let r = rid(1, 0);

        assert!(lm.lock_exclusive(&mut t1, r));
        assert!(!lm.lock_shared(&mut t2, r));

        // Subsequent attempts by the wounded transaction fail immediately.
        assert!(!lm.lock_shared(&mut t2, rid(2, 0)));
        assert!(!lm.lock_exclusive(&mut t2, rid(3, 0)));
    }

    #[test]
    fn test_upgrade_sole_holder_is_immediate() {
        let tm = TransactionManager::new();
        let lm = LockManager::new(false);
        let mut t1 = tm.begin();
        let r = rid(1, 0);

        assert!(lm.lock_shared(&mut t1, r));
        assert!(lm.lock_upgrade(&mut t1, r));
        assert!(!t1.holds_shared(r));
        assert!(t1.holds_exclusive(r));

        assert!(lm.unlock(&mut t1, r));
        assert!(!lm.is_locked(r));
    }

    #[test]
    fn test_strict_2pl_rejects_early_unlock() {
        let tm = TransactionManager::new();
        let lm = LockManager::new(true);
        let mut t1 = tm.begin();
        let r = rid(1, 0);

        assert!(lm.lock_exclusive(&mut t1, r));
        assert!(!lm.unlock(&mut t1, r));
        assert_eq!(t1.state(), TxnState::Aborted);
        // The lock itself was not released by the refused unlock.
        assert!(lm.is_locked(r));
    }

    #[test]
    fn test_non_strict_unlock_starts_shrinking() {
        let tm = TransactionManager::new();
        let lm = LockManager::new(false);
        let mut t1 = tm.begin();
        let r1 = rid(1, 0);
        let r2 = rid(1, 1);

        assert!(lm.lock_shared(&mut t1, r1));
        assert!(lm.lock_shared(&mut t1, r2));
        assert!(lm.unlock(&mut t1, r1));
        assert_eq!(t1.state(), TxnState::Shrinking);

        // Second unlock keeps the state.
        assert!(lm.unlock(&mut t1, r2));
        assert_eq!(t1.state(), TxnState::Shrinking);
    }

    #[test]
    #[should_panic(expected = "growing phase")]
    fn test_lock_while_shrinking_is_a_caller_bug() {
        let tm = TransactionManager::new();
        let lm = LockManager::new(false);
        let mut t1 = tm.begin();

        assert!(lm.lock_shared(&mut t1, rid(1, 0)));
        assert!(lm.unlock(&mut t1, rid(1, 0)));
        lm.lock_shared(&mut t1, rid(2, 0));
    }

    #[test]
    fn test_oldest_tracks_minimum_after_unlock() {
        let tm = TransactionManager::new();
        let lm = LockManager::new(false);
        let mut t1 = tm.begin();
        let mut t2 = tm.begin();
        let r = rid(1, 0);

        // Older arrives second so the entry's oldest is updated downward.
        assert!(lm.lock_shared(&mut t2, r));
        assert!(lm.lock_shared(&mut t1, r));

        // After the older holder leaves, a third transaction younger than
        // t1 but older than nothing else present must not be wounded by a
        // stale oldest. t2 holds shared with no exclusive queued, so the
        // third shared is granted.
        assert!(lm.unlock(&mut t1, r));
        let mut t3 = tm.begin();
        assert!(lm.lock_shared(&mut t3, r));
    }
}
