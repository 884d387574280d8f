//! `data_locks`: one row per table lock and per locked row slot.

use std::sync::Arc;

use falcon_common::types::HeapNo;
use falcon_txn::{Lock, LockKind, LockSys, LockSysLatch, Trx};

use crate::list_scanner::{self, FetchOutcome, ListScanner, ScanProgress, TrxVisitor};
use crate::lock_id::LockIdKey;
use crate::scan_state::TrxScanState;
use crate::sink::{DataLockRow, DataLockSink, LockStatus};
use crate::table_path::TableObject;

pub trait DataLockIterator: Send {
    /// Emit the next batch of rows into `sink`.
    fn scan(&mut self, sink: &mut dyn DataLockSink, with_lock_data: bool) -> ScanProgress;

    /// Emit the row named by `engine_lock_id`, if that lock still exists.
    fn fetch(
        &mut self,
        sink: &mut dyn DataLockSink,
        engine_lock_id: &str,
        with_lock_data: bool,
    ) -> FetchOutcome;
}

pub struct FalconDataLockIterator {
    lock_sys: Arc<LockSys>,
    engine: String,
    scanner: ListScanner,
}

impl FalconDataLockIterator {
    pub fn new(lock_sys: Arc<LockSys>, engine: impl Into<String>, range_size: u64) -> Self {
        Self {
            lock_sys,
            engine: engine.into(),
            scanner: ListScanner::new(range_size),
        }
    }

    pub fn scan_state(&self) -> &TrxScanState {
        self.scanner.state()
    }
}

impl DataLockIterator for FalconDataLockIterator {
    fn scan(&mut self, sink: &mut dyn DataLockSink, with_lock_data: bool) -> ScanProgress {
        let mut rows = LockRows {
            sink,
            engine: &self.engine,
            with_lock_data,
            filter: None,
        };
        self.scanner.scan(&self.lock_sys, &mut rows)
    }

    fn fetch(
        &mut self,
        sink: &mut dyn DataLockSink,
        engine_lock_id: &str,
        with_lock_data: bool,
    ) -> FetchOutcome {
        if !sink.accept_engine(&self.engine) {
            return FetchOutcome::NotFound;
        }
        let key: LockIdKey = match engine_lock_id.parse() {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!(lock_id = engine_lock_id, "data lock fetch: {}", e);
                return FetchOutcome::NotFound;
            }
        };
        let mut rows = LockRows {
            sink,
            engine: &self.engine,
            with_lock_data,
            filter: Some(key),
        };
        FetchOutcome::from_rows(list_scanner::fetch(&self.lock_sys, key.trx_id(), &mut rows))
    }
}

/// Lock rows of one transaction, optionally restricted to a single lock id.
struct LockRows<'a, S: ?Sized> {
    sink: &'a mut S,
    engine: &'a str,
    with_lock_data: bool,
    filter: Option<LockIdKey>,
}

impl<S: DataLockSink + ?Sized> LockRows<'_, S> {
    fn emit(
        &mut self,
        lock: &Lock,
        key: LockIdKey,
        object: &TableObject,
        status: LockStatus,
        lock_data: Option<String>,
    ) {
        let event = lock.thread_event();
        self.sink.emit_lock_row(DataLockRow {
            engine: self.engine.to_string(),
            engine_lock_id: key.to_string(),
            engine_transaction_id: key.trx_id(),
            thread_id: event.thread_id,
            event_id: event.event_id,
            object_schema: object.schema.clone(),
            object_name: object.table.clone(),
            partition_name: object.partition.clone(),
            subpartition_name: object.subpartition.clone(),
            index_name: lock.as_record().map(|rec| rec.index_name.clone()),
            object_instance_begin: lock.handle().0,
            lock_type: lock.type_str().to_string(),
            lock_mode: lock.mode_str(),
            lock_status: status,
            lock_data,
        });
    }
}

impl<S: DataLockSink + ?Sized> TrxVisitor for LockRows<'_, S> {
    fn accept_engine(&mut self) -> bool {
        self.sink.accept_engine(self.engine)
    }

    fn visit(&mut self, latch: &LockSysLatch<'_>, trx: &Trx) -> usize {
        let trx_id = trx.id_for_print();
        if !self.sink.accept_transaction_id(trx_id) {
            return 0;
        }
        let wait_lock = latch.wait_lock(trx).map(Lock::handle);

        let mut found = 0;
        for lock in latch.trx_locks(trx) {
            if let Some(filter) = &self.filter {
                if !filter.matches_resource(lock) {
                    continue;
                }
            }
            if !self.sink.accept_thread_event(lock.thread_event()) {
                continue;
            }
            let object = TableObject::parse(&lock.table().path);
            if !self.sink.accept_object(&object) {
                continue;
            }
            let status = if wait_lock == Some(lock.handle()) {
                LockStatus::Waiting
            } else {
                LockStatus::Granted
            };

            match lock.kind() {
                LockKind::Table { .. } => {
                    let key = LockIdKey::of(lock, trx_id, HeapNo::INFIMUM);
                    if self.sink.accept_lock_id(&key.to_string()) {
                        self.emit(lock, key, &object, status, None);
                        found += 1;
                    }
                }
                LockKind::Record(rec) => {
                    let wanted = self.filter.and_then(|f| f.heap_no());
                    for heap_no in rec.heap_nos() {
                        if wanted.is_some_and(|w| w != heap_no) {
                            continue;
                        }
                        let key = LockIdKey::of(lock, trx_id, heap_no);
                        if !self.sink.accept_lock_id(&key.to_string()) {
                            continue;
                        }
                        let lock_data = if self.with_lock_data {
                            latch.lock_data(lock, heap_no)
                        } else {
                            None
                        };
                        self.emit(lock, key, &object, status, lock_data);
                        found += 1;
                    }
                }
            }
        }
        found
    }
}
