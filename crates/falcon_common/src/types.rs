use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction identifier as printed to monitoring consumers.
///
/// `TxnId(0)` means "no read-write id assigned yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl TxnId {
    pub const NONE: TxnId = TxnId(0);

    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(pub u64);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tablespace holding a record page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpaceId(pub u32);

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageNo(pub u32);

impl fmt::Display for PageNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row slot of a record inside its page. Slot 0 is the infimum and slot 1
/// the supremum pseudo-record; user records start at 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HeapNo(pub u32);

impl HeapNo {
    pub const INFIMUM: HeapNo = HeapNo(0);
    pub const SUPREMUM: HeapNo = HeapNo(1);
    pub const FIRST_USER_REC: HeapNo = HeapNo(2);

    pub fn is_supremum(&self) -> bool {
        *self == Self::SUPREMUM
    }
}

impl fmt::Display for HeapNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Instrumentation identity of the thread and statement event that created a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ThreadEvent {
    pub thread_id: u64,
    pub event_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txn_id_assignment() {
        assert!(!TxnId::NONE.is_assigned());
        assert!(TxnId(7).is_assigned());
        assert_eq!(TxnId(42).to_string(), "42");
    }

    #[test]
    fn test_heap_no_pseudo_records() {
        assert!(HeapNo::SUPREMUM.is_supremum());
        assert!(!HeapNo::INFIMUM.is_supremum());
        assert!(HeapNo::FIRST_USER_REC > HeapNo::SUPREMUM);
    }
}
