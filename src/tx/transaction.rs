//! Transaction handles.

use std::collections::HashSet;

use super::types::{RecordId, TxnId, TxnState};

/// A transaction as the locking core sees it.
///
/// Owned by its worker thread; the lock manager mutates it through
/// `&mut Transaction`, so nothing here needs interior locking. The id is
/// assigned by the [`TransactionManager`](super::TransactionManager) and
/// never changes; smaller ids are older.
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    state: TxnState,
    shared_locks: HashSet<RecordId>,
    exclusive_locks: HashSet<RecordId>,
}

impl Transaction {
    /// Creates a transaction in the growing phase.
    pub(crate) fn new(id: TxnId) -> Self {
        Self {
            id,
            state: TxnState::Growing,
            shared_locks: HashSet::new(),
            exclusive_locks: HashSet::new(),
        }
    }

    /// The transaction's id.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// The transaction's 2PL state.
    pub fn state(&self) -> TxnState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TxnState) {
        self.state = state;
    }

    /// Records currently locked in shared mode.
    pub fn shared_locks(&self) -> &HashSet<RecordId> {
        &self.shared_locks
    }

    /// Records currently locked in exclusive mode.
    pub fn exclusive_locks(&self) -> &HashSet<RecordId> {
        &self.exclusive_locks
    }

    /// Whether this transaction holds a shared lock on `rid`.
    pub fn holds_shared(&self, rid: RecordId) -> bool {
        self.shared_locks.contains(&rid)
    }

    /// Whether this transaction holds an exclusive lock on `rid`.
    pub fn holds_exclusive(&self, rid: RecordId) -> bool {
        self.exclusive_locks.contains(&rid)
    }

    pub(crate) fn add_shared(&mut self, rid: RecordId) {
        self.shared_locks.insert(rid);
    }

    pub(crate) fn add_exclusive(&mut self, rid: RecordId) {
        self.exclusive_locks.insert(rid);
    }

    pub(crate) fn remove_shared(&mut self, rid: RecordId) -> bool {
        self.shared_locks.remove(&rid)
    }

    pub(crate) fn remove_exclusive(&mut self, rid: RecordId) -> bool {
        self.exclusive_locks.remove(&rid)
    }
}
