//! Consumer side of the data-lock iterators.
//!
//! Every `accept_*` hook may return `false` to prune a row before further
//! work is spent on it. Hooks are called in row-building order: engine,
//! transaction, thread/event, object, lock id. The default implementations
//! accept everything.

use std::fmt;

use falcon_common::types::{ThreadEvent, TxnId};
use serde::Serialize;

use crate::table_path::TableObject;

/// GRANTED or WAITING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LockStatus {
    Granted,
    Waiting,
}

impl LockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::Granted => "GRANTED",
            LockStatus::Waiting => "WAITING",
        }
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `data_locks`: a table lock, or one row slot of a record lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataLockRow {
    pub engine: String,
    pub engine_lock_id: String,
    pub engine_transaction_id: TxnId,
    pub thread_id: u64,
    pub event_id: u64,
    pub object_schema: String,
    pub object_name: String,
    pub partition_name: Option<String>,
    pub subpartition_name: Option<String>,
    /// Record locks only.
    pub index_name: Option<String>,
    /// Engine-private identity of the lock struct.
    pub object_instance_begin: u64,
    /// `TABLE` or `RECORD`.
    pub lock_type: String,
    pub lock_mode: String,
    pub lock_status: LockStatus,
    pub lock_data: Option<String>,
}

/// One row of `data_lock_waits`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataLockWaitRow {
    pub engine: String,
    pub requesting_engine_lock_id: String,
    pub requesting_engine_transaction_id: TxnId,
    pub requesting_thread_id: u64,
    pub requesting_event_id: u64,
    pub requesting_object_instance_begin: u64,
    pub blocking_engine_lock_id: String,
    pub blocking_engine_transaction_id: TxnId,
    pub blocking_thread_id: u64,
    pub blocking_event_id: u64,
    pub blocking_object_instance_begin: u64,
}

pub trait DataLockSink {
    fn accept_engine(&mut self, _engine: &str) -> bool {
        true
    }

    fn accept_transaction_id(&mut self, _trx_id: TxnId) -> bool {
        true
    }

    fn accept_thread_event(&mut self, _event: ThreadEvent) -> bool {
        true
    }

    fn accept_object(&mut self, _object: &TableObject) -> bool {
        true
    }

    fn accept_lock_id(&mut self, _lock_id: &str) -> bool {
        true
    }

    fn emit_lock_row(&mut self, row: DataLockRow);
}

pub trait DataLockWaitSink {
    fn accept_engine(&mut self, _engine: &str) -> bool {
        true
    }

    fn accept_requesting_transaction_id(&mut self, _trx_id: TxnId) -> bool {
        true
    }

    fn accept_requesting_thread_event(&mut self, _event: ThreadEvent) -> bool {
        true
    }

    fn accept_requesting_lock_id(&mut self, _lock_id: &str) -> bool {
        true
    }

    fn accept_blocking_transaction_id(&mut self, _trx_id: TxnId) -> bool {
        true
    }

    fn accept_blocking_thread_event(&mut self, _event: ThreadEvent) -> bool {
        true
    }

    fn accept_blocking_lock_id(&mut self, _lock_id: &str) -> bool {
        true
    }

    fn emit_wait_row(&mut self, row: DataLockWaitRow);
}

/// Equality predicates pushed down into a `data_locks` scan. Unset fields
/// match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFilter {
    pub engine: Option<String>,
    pub trx_id: Option<TxnId>,
    pub thread_id: Option<u64>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub lock_id: Option<String>,
}

fn matches<T: PartialEq + ?Sized>(wanted: Option<&T>, actual: &T) -> bool {
    wanted.map_or(true, |w| w == actual)
}

/// Sink gathering `data_locks` rows that pass a [`RowFilter`].
#[derive(Debug, Default)]
pub struct DataLockCollector {
    filter: RowFilter,
    rows: Vec<DataLockRow>,
}

impl DataLockCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(filter: RowFilter) -> Self {
        Self {
            filter,
            rows: Vec::new(),
        }
    }

    pub fn rows(&self) -> &[DataLockRow] {
        &self.rows
    }

    pub fn take_rows(&mut self) -> Vec<DataLockRow> {
        std::mem::take(&mut self.rows)
    }
}

impl DataLockSink for DataLockCollector {
    fn accept_engine(&mut self, engine: &str) -> bool {
        matches(self.filter.engine.as_deref(), engine)
    }

    fn accept_transaction_id(&mut self, trx_id: TxnId) -> bool {
        matches(self.filter.trx_id.as_ref(), &trx_id)
    }

    fn accept_thread_event(&mut self, event: ThreadEvent) -> bool {
        matches(self.filter.thread_id.as_ref(), &event.thread_id)
    }

    fn accept_object(&mut self, object: &TableObject) -> bool {
        matches(self.filter.schema.as_deref(), object.schema.as_str())
            && matches(self.filter.table.as_deref(), object.table.as_str())
    }

    fn accept_lock_id(&mut self, lock_id: &str) -> bool {
        matches(self.filter.lock_id.as_deref(), lock_id)
    }

    fn emit_lock_row(&mut self, row: DataLockRow) {
        self.rows.push(row);
    }
}

/// Equality predicates pushed down into a `data_lock_waits` scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitRowFilter {
    pub engine: Option<String>,
    pub requesting_trx_id: Option<TxnId>,
    pub blocking_trx_id: Option<TxnId>,
    pub requesting_lock_id: Option<String>,
    pub blocking_lock_id: Option<String>,
}

/// Sink gathering `data_lock_waits` rows that pass a [`WaitRowFilter`].
#[derive(Debug, Default)]
pub struct DataLockWaitCollector {
    filter: WaitRowFilter,
    rows: Vec<DataLockWaitRow>,
}

impl DataLockWaitCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(filter: WaitRowFilter) -> Self {
        Self {
            filter,
            rows: Vec::new(),
        }
    }

    pub fn rows(&self) -> &[DataLockWaitRow] {
        &self.rows
    }

    pub fn take_rows(&mut self) -> Vec<DataLockWaitRow> {
        std::mem::take(&mut self.rows)
    }
}

impl DataLockWaitSink for DataLockWaitCollector {
    fn accept_engine(&mut self, engine: &str) -> bool {
        matches(self.filter.engine.as_deref(), engine)
    }

    fn accept_requesting_transaction_id(&mut self, trx_id: TxnId) -> bool {
        matches(self.filter.requesting_trx_id.as_ref(), &trx_id)
    }

    fn accept_requesting_lock_id(&mut self, lock_id: &str) -> bool {
        matches(self.filter.requesting_lock_id.as_deref(), lock_id)
    }

    fn accept_blocking_transaction_id(&mut self, trx_id: TxnId) -> bool {
        matches(self.filter.blocking_trx_id.as_ref(), &trx_id)
    }

    fn accept_blocking_lock_id(&mut self, lock_id: &str) -> bool {
        matches(self.filter.blocking_lock_id.as_deref(), lock_id)
    }

    fn emit_wait_row(&mut self, row: DataLockWaitRow) {
        self.rows.push(row);
    }
}
