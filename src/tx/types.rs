//! Core transaction types: ids, states, record ids, lock modes.

use std::fmt;

use crate::storage::PageId;

/// Transaction ID (64-bit), allocated monotonically from 1.
///
/// A smaller id means an older transaction; the wound-wait policy compares
/// ids for age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(u64);

impl TxnId {
    /// Create a new transaction ID.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Two-phase-locking state of a transaction.
///
/// Transitions:
/// - `Growing → Shrinking` on the first successful unlock (non-strict 2PL)
/// - `Growing → Aborted` when wounded or on a protocol violation
/// - `Growing | Shrinking → Committed | Aborted` at the end of life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Acquiring locks; no lock released yet.
    Growing,
    /// At least one lock released; no further acquisition allowed.
    Shrinking,
    /// Terminal: committed.
    Committed,
    /// Terminal: rolled back, wounded, or protocol violation.
    Aborted,
}

impl TxnState {
    /// Whether the transaction has reached a terminal state.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }
}

/// Identifier of a record: the page holding it plus a slot within the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    /// Page the record lives in.
    pub page: PageId,
    /// Slot number within the page.
    pub slot: u32,
}

impl RecordId {
    /// Create a record id from page and slot.
    pub const fn new(page: PageId, slot: u32) -> Self {
        Self { page, slot }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.page, self.slot)
    }
}

/// Mode of a record lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared: coexists with other shared holders.
    Shared,
    /// Exclusive: sole holder.
    Exclusive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txn_id_ordering_is_age() {
        assert!(TxnId::new(1) < TxnId::new(2));
        assert_eq!(TxnId::new(3), TxnId::new(3));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TxnState::Growing.is_terminal());
        assert!(!TxnState::Shrinking.is_terminal());
        assert!(TxnState::Committed.is_terminal());
        assert!(TxnState::Aborted.is_terminal());
    }

    #[test]
    fn test_record_id_display() {
        let rid = RecordId::new(PageId::new(3), 7);
        assert_eq!(rid.to_string(), "3.7");
    }
}
