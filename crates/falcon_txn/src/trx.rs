use std::fmt;

use falcon_common::types::TxnId;

use crate::lock::LockHandle;

/// Synthetic ids for transactions without a read-write id have this bit set,
/// so they never collide with assigned ids.
pub const SYNTHETIC_TRX_ID_FLAG: u64 = 1 << 63;

/// Manager-internal transaction handle, stable for the life of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrxHandle(pub u64);

impl fmt::Display for TrxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrxState {
    NotStarted,
    Active,
}

/// Where a transaction comes from, which decides the lists it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrxOrigin {
    /// Client session: always on the client list, and on the read-write
    /// list once it is assigned a read-write id.
    Client,
    /// Background work: read-write from the start, never on the client list.
    Internal,
}

/// The two transaction populations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrxListKind {
    ReadWrite,
    Client,
}

/// Whether the transaction is running or blocked on a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrxQueState {
    #[default]
    Running,
    LockWait,
}

#[derive(Debug, Clone)]
pub struct Trx {
    pub(crate) handle: TrxHandle,
    pub(crate) id: TxnId,
    pub(crate) state: TrxState,
    pub(crate) read_only: bool,
    pub(crate) origin: TrxOrigin,
    pub(crate) thread_id: u64,
}

impl Trx {
    pub fn handle(&self) -> TrxHandle {
        self.handle
    }

    /// Read-write id, `TxnId::NONE` until one is assigned.
    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn is_started(&self) -> bool {
        self.state != TrxState::NotStarted
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn origin(&self) -> TrxOrigin {
        self.origin
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    /// Id shown to monitoring: the read-write id when assigned, otherwise a
    /// synthetic id derived from the handle.
    pub fn id_for_print(&self) -> TxnId {
        if self.id.is_assigned() {
            self.id
        } else {
            TxnId(self.handle.0 | SYNTHETIC_TRX_ID_FLAG)
        }
    }
}

/// Per-transaction lock state, guarded by the lock-subsystem mutex.
#[derive(Debug, Clone, Default)]
pub(crate) struct TrxLocks {
    /// Locks in acquisition order.
    pub(crate) locks: Vec<LockHandle>,
    pub(crate) wait_lock: Option<LockHandle>,
    pub(crate) que_state: TrxQueState,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trx(handle: u64, id: u64) -> Trx {
        Trx {
            handle: TrxHandle(handle),
            id: TxnId(id),
            state: TrxState::Active,
            read_only: false,
            origin: TrxOrigin::Client,
            thread_id: 1,
        }
    }

    #[test]
    fn test_id_for_print() {
        assert_eq!(trx(3, 77).id_for_print(), TxnId(77));
        let synthetic = trx(3, 0).id_for_print();
        assert_eq!(synthetic.0 & !SYNTHETIC_TRX_ID_FLAG, 3);
        assert!(synthetic.0 >= SYNTHETIC_TRX_ID_FLAG);
    }
}
