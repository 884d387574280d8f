//! Table and record locks, lock modes and the conflict rule.
//!
//! A record lock covers every row slot set in its bitmap; each set bit is an
//! independent row lock as far as monitoring is concerned. A waiting record
//! lock always carries exactly one bit.

use std::fmt;
use std::sync::Arc;

use falcon_common::types::{HeapNo, PageNo, SpaceId, TableId, ThreadEvent};
use roaring::RoaringBitmap;

use crate::trx::TrxHandle;

/// Manager-assigned identity of a lock struct. Also exposed to monitoring
/// as the lock's opaque identity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockHandle(pub u64);

impl fmt::Display for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lock modes, from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    Exclusive,
    AutoInc,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::IntentionShared => "IS",
            LockMode::IntentionExclusive => "IX",
            LockMode::Shared => "S",
            LockMode::Exclusive => "X",
            LockMode::AutoInc => "AUTO_INC",
        }
    }

    /// Compatibility matrix:
    ///
    /// ```text
    ///         IS  IX  S   X   AI
    ///     IS  +   +   +   -   +
    ///     IX  +   +   -   -   +
    ///     S   +   -   +   -   -
    ///     X   -   -   -   -   -
    ///     AI  +   +   -   -   -
    /// ```
    pub fn is_compatible(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (Exclusive, _) | (_, Exclusive) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (IntentionExclusive, AutoInc) | (AutoInc, IntentionExclusive) => true,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// Modes that imply the owner writes and therefore needs a read-write id.
    pub fn is_write_intent(self) -> bool {
        matches!(
            self,
            LockMode::Exclusive | LockMode::IntentionExclusive | LockMode::AutoInc
        )
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of the index interval a record lock protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecordLockPrecision {
    /// The record and the gap before it.
    #[default]
    NextKey,
    /// Only the gap before the record.
    Gap,
    /// Only the record.
    RecNotGap,
    /// Gap lock announcing an insert into the gap.
    InsertIntention,
}

impl RecordLockPrecision {
    pub fn is_gap(self) -> bool {
        matches!(self, RecordLockPrecision::Gap | RecordLockPrecision::InsertIntention)
    }

    pub fn is_insert_intention(self) -> bool {
        self == RecordLockPrecision::InsertIntention
    }

    fn suffix(self) -> &'static str {
        match self {
            RecordLockPrecision::NextKey => "",
            RecordLockPrecision::Gap => ",GAP",
            RecordLockPrecision::RecNotGap => ",REC_NOT_GAP",
            RecordLockPrecision::InsertIntention => ",GAP,INSERT_INTENTION",
        }
    }
}

/// A table registered with the lock system. `path` uses the
/// `schema/table[#P#partition[#SP#subpartition]]` layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub id: TableId,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordLock {
    pub space_id: SpaceId,
    pub page_no: PageNo,
    pub index_name: String,
    pub precision: RecordLockPrecision,
    pub(crate) heap_nos: RoaringBitmap,
}

impl RecordLock {
    /// Row slots covered, in increasing order.
    pub fn heap_nos(&self) -> impl Iterator<Item = HeapNo> + '_ {
        self.heap_nos.iter().map(HeapNo)
    }

    pub fn first_heap_no(&self) -> Option<HeapNo> {
        self.heap_nos.min().map(HeapNo)
    }

    pub fn has_heap_no(&self, heap_no: HeapNo) -> bool {
        self.heap_nos.contains(heap_no.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LockKind {
    Table { table_id: TableId },
    Record(RecordLock),
}

#[derive(Debug, Clone)]
pub struct Lock {
    pub(crate) handle: LockHandle,
    pub(crate) trx: TrxHandle,
    pub(crate) mode: LockMode,
    pub(crate) table: Arc<TableDef>,
    pub(crate) kind: LockKind,
    pub(crate) waiting: bool,
    pub(crate) origin: ThreadEvent,
}

impl Lock {
    pub fn handle(&self) -> LockHandle {
        self.handle
    }

    /// Owning transaction.
    pub fn trx(&self) -> TrxHandle {
        self.trx
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn table(&self) -> &TableDef {
        &self.table
    }

    pub fn kind(&self) -> &LockKind {
        &self.kind
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Thread and statement event that created the lock.
    pub fn thread_event(&self) -> ThreadEvent {
        self.origin
    }

    pub fn type_str(&self) -> &'static str {
        match self.kind {
            LockKind::Table { .. } => "TABLE",
            LockKind::Record(_) => "RECORD",
        }
    }

    /// Mode with record precision flags, e.g. `X,REC_NOT_GAP`.
    pub fn mode_str(&self) -> String {
        match &self.kind {
            LockKind::Table { .. } => self.mode.as_str().to_string(),
            LockKind::Record(rec) => format!("{}{}", self.mode.as_str(), rec.precision.suffix()),
        }
    }

    pub fn as_record(&self) -> Option<&RecordLock> {
        match &self.kind {
            LockKind::Record(rec) => Some(rec),
            LockKind::Table { .. } => None,
        }
    }

    /// Whether `self`, as a requested lock, must wait for `other` held or
    /// requested on the same resource.
    pub fn has_to_wait(&self, other: &Lock) -> bool {
        if self.trx == other.trx || self.mode.is_compatible(other.mode) {
            return false;
        }
        match (&self.kind, &other.kind) {
            (LockKind::Record(req), LockKind::Record(held)) => {
                let on_supremum = req.first_heap_no() == Some(HeapNo::SUPREMUM);
                record_has_to_wait(req.precision, held.precision, on_supremum)
            }
            _ => true,
        }
    }
}

/// Precision rules for two conflicting-mode record locks on the same slot.
fn record_has_to_wait(
    req: RecordLockPrecision,
    held: RecordLockPrecision,
    on_supremum: bool,
) -> bool {
    if (on_supremum || req.is_gap()) && !req.is_insert_intention() {
        // Plain gap locks never wait: they only stop inserts.
        return false;
    }
    if !req.is_insert_intention() && held.is_gap() {
        return false;
    }
    if req.is_gap() && held == RecordLockPrecision::RecNotGap {
        return false;
    }
    if held.is_insert_intention() {
        return false;
    }
    true
}
