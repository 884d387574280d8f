//! `data_lock_waits`: one row per (requesting lock, blocking lock) pair.

use std::sync::Arc;

use falcon_common::types::HeapNo;
use falcon_txn::{Lock, LockKind, LockSys, LockSysLatch, Trx, TrxQueState};

use crate::list_scanner::{self, FetchOutcome, ListScanner, ScanProgress, TrxVisitor};
use crate::lock_id::LockIdKey;
use crate::scan_state::TrxScanState;
use crate::sink::{DataLockWaitRow, DataLockWaitSink};

pub trait DataLockWaitIterator: Send {
    /// Emit the next batch of wait rows into `sink`.
    fn scan(&mut self, sink: &mut dyn DataLockWaitSink) -> ScanProgress;

    /// Emit the wait row between two lock ids, if that wait still exists.
    fn fetch(
        &mut self,
        sink: &mut dyn DataLockWaitSink,
        requesting_lock_id: &str,
        blocking_lock_id: &str,
    ) -> FetchOutcome;
}

pub struct FalconDataLockWaitIterator {
    lock_sys: Arc<LockSys>,
    engine: String,
    scanner: ListScanner,
}

impl FalconDataLockWaitIterator {
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

impl DataLockWaitIterator for FalconDataLockWaitIterator {
    fn scan(&mut self, sink: &mut dyn DataLockWaitSink) -> ScanProgress {
        let mut rows = WaitRows {
            sink,
            engine: &self.engine,
            filter: None,
        };
        self.scanner.scan(&self.lock_sys, &mut rows)
    }

    fn fetch(
        &mut self,
        sink: &mut dyn DataLockWaitSink,
        requesting_lock_id: &str,
        blocking_lock_id: &str,
    ) -> FetchOutcome {
        if !sink.accept_engine(&self.engine) {
            return FetchOutcome::NotFound;
        }
        let parsed = requesting_lock_id
            .parse::<LockIdKey>()
            .and_then(|req| Ok((req, blocking_lock_id.parse::<LockIdKey>()?)));
        let (requesting, blocking) = match parsed {
            Ok(pair) => pair,
            Err(e) => {
                tracing::debug!(
                    requesting = requesting_lock_id,
                    blocking = blocking_lock_id,
                    "data lock wait fetch: {}",
                    e
                );
                return FetchOutcome::NotFound;
            }
        };
        let mut rows = WaitRows {
            sink,
            engine: &self.engine,
            filter: Some(WaitFilter {
                requesting,
                blocking,
            }),
        };
        FetchOutcome::from_rows(list_scanner::fetch(
            &self.lock_sys,
            requesting.trx_id(),
            &mut rows,
        ))
    }
}

#[derive(Debug, Clone, Copy)]
struct WaitFilter {
    requesting: LockIdKey,
    blocking: LockIdKey,
}

/// Wait rows of one transaction, optionally restricted to one pair of ids.
struct WaitRows<'a, S: ?Sized> {
    sink: &'a mut S,
    engine: &'a str,
    filter: Option<WaitFilter>,
}

/// Row slot a waiting lock is queued on. `None` for table locks.
///
/// # Panics
/// If a waiting record lock carries no row slot.
fn waiting_heap_no(lock: &Lock) -> Option<HeapNo> {
    match lock.kind() {
        LockKind::Table { .. } => None,
        LockKind::Record(rec) => match rec.first_heap_no() {
            Some(heap_no) => Some(heap_no),
            None => panic!("waiting record lock {} has no row slot", lock.handle()),
        },
    }
}

impl<S: DataLockWaitSink + ?Sized> TrxVisitor for WaitRows<'_, S> {
    fn accept_engine(&mut self) -> bool {
        self.sink.accept_engine(self.engine)
    }

    fn visit(&mut self, latch: &LockSysLatch<'_>, trx: &Trx) -> usize {
        if latch.que_state(trx) != TrxQueState::LockWait {
            return 0;
        }
        let Some(wait_lock) = latch.wait_lock(trx) else {
            panic!("transaction {} is in lock wait without a wait lock", trx.handle());
        };
        let heap_no = waiting_heap_no(wait_lock);

        if let Some(filter) = &self.filter {
            if !filter.requesting.matches_resource(wait_lock) || filter.requesting.heap_no() != heap_no {
                return 0;
            }
        }

        let requesting_trx_id = trx.id_for_print();
        if !self.sink.accept_requesting_transaction_id(requesting_trx_id) {
            return 0;
        }
        let requesting_event = wait_lock.thread_event();
        if !self.sink.accept_requesting_thread_event(requesting_event) {
            return 0;
        }
        let slot = heap_no.unwrap_or(HeapNo::INFIMUM);
        let requesting_id = LockIdKey::of(wait_lock, requesting_trx_id, slot).to_string();
        if !self.sink.accept_requesting_lock_id(&requesting_id) {
            return 0;
        }

        let mut found = 0;
        for blocking in latch.lock_queue_prev(wait_lock, heap_no) {
            let blocking_trx_id = latch.lock_trx_id(blocking);
            if let Some(filter) = &self.filter {
                if !filter.blocking.matches_resource(blocking)
                    || filter.blocking.trx_id() != blocking_trx_id
                    || filter.blocking.heap_no() != heap_no
                {
                    continue;
                }
            }
            if !wait_lock.has_to_wait(blocking) {
                continue;
            }
            if !self.sink.accept_blocking_transaction_id(blocking_trx_id) {
                continue;
            }
            let blocking_event = blocking.thread_event();
            if !self.sink.accept_blocking_thread_event(blocking_event) {
                continue;
            }
            let blocking_id = LockIdKey::of(blocking, blocking_trx_id, slot).to_string();
            if !self.sink.accept_blocking_lock_id(&blocking_id) {
                continue;
            }

            self.sink.emit_wait_row(DataLockWaitRow {
                engine: self.engine.to_string(),
                requesting_engine_lock_id: requesting_id.clone(),
                requesting_engine_transaction_id: requesting_trx_id,
                requesting_thread_id: requesting_event.thread_id,
                requesting_event_id: requesting_event.event_id,
                requesting_object_instance_begin: wait_lock.handle().0,
                blocking_engine_lock_id: blocking_id,
                blocking_engine_transaction_id: blocking_trx_id,
                blocking_thread_id: blocking_event.thread_id,
                blocking_event_id: blocking_event.event_id,
                blocking_object_instance_begin: blocking.handle().0,
            });
            found += 1;
        }
        found
    }
}
