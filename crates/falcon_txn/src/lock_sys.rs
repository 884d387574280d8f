//! In-memory lock system: transaction lists, lock queues and the two
//! mutexes guarding them.
//!
//! Two latches protect the state:
//! - the lock-subsystem mutex (`lock_sys`): lock structs, table and page
//!   queues, per-transaction lock state, record payloads;
//! - the transaction-list mutex (`trx_sys`): transactions and the
//!   read-write / client lists.
//!
//! They are always taken together, `lock_sys` first, through
//! [`LockSys::latch`]. Everything monitoring needs to observe is exposed on
//! the returned [`LockSysLatch`], so an observer cannot read the state
//! without holding both.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use falcon_common::error::LockSysError;
use falcon_common::lock_metrics::{InstrumentedMutex, LatchGuard, LockMetricsReport};
use falcon_common::types::{HeapNo, PageNo, SpaceId, TableId, ThreadEvent, TxnId};
use roaring::RoaringBitmap;

use crate::lock::{Lock, LockHandle, LockKind, LockMode, RecordLock, RecordLockPrecision, TableDef};
use crate::trx::{Trx, TrxHandle, TrxListKind, TrxLocks, TrxOrigin, TrxQueState, TrxState};

/// Name of the lock-subsystem mutex in latch metrics.
pub const LOCK_SYS_MUTEX: &str = "lock_sys";
/// Name of the transaction-list mutex in latch metrics.
pub const TRX_SYS_MUTEX: &str = "trx_sys";

const SUPREMUM_DATA: &str = "supremum pseudo-record";

/// Outcome of a lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockGrant {
    Granted(LockHandle),
    /// Enqueued behind a conflicting lock; the owner is now in lock wait.
    Waiting(LockHandle),
}

impl LockGrant {
    pub fn handle(&self) -> LockHandle {
        match self {
            LockGrant::Granted(h) | LockGrant::Waiting(h) => *h,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, LockGrant::Granted(_))
    }
}

/// A request for one row slot of one page.
#[derive(Debug, Clone)]
pub struct RecordLockRequest {
    pub table_id: TableId,
    pub space_id: SpaceId,
    pub page_no: PageNo,
    pub index_name: String,
    pub heap_no: HeapNo,
    pub mode: LockMode,
    pub precision: RecordLockPrecision,
}

/// Lock queue a lock belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum QueueKey {
    Table(TableId),
    Page(SpaceId, PageNo),
}

impl QueueKey {
    fn of(lock: &Lock) -> Self {
        match &lock.kind {
            LockKind::Table { table_id } => QueueKey::Table(*table_id),
            LockKind::Record(rec) => QueueKey::Page(rec.space_id, rec.page_no),
        }
    }
}

/// State guarded by the lock-subsystem mutex.
#[derive(Default)]
struct LockTable {
    locks: HashMap<LockHandle, Lock>,
    /// Queues in enqueue order, oldest first.
    queues: HashMap<QueueKey, Vec<LockHandle>>,
    trx_locks: HashMap<TrxHandle, TrxLocks>,
    tables: HashMap<TableId, Arc<TableDef>>,
    record_data: HashMap<(SpaceId, PageNo, HeapNo), String>,
    next_lock: u64,
    next_event: u64,
}

impl LockTable {
    fn queue(&self, key: QueueKey) -> &[LockHandle] {
        self.queues.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn table(&self, table_id: TableId) -> Result<Arc<TableDef>, LockSysError> {
        self.tables
            .get(&table_id)
            .cloned()
            .ok_or(LockSysError::UnknownTable(table_id))
    }

    /// Whether `lock` conflicts with any of `ahead` on the slot it requests.
    fn has_to_wait_for_any(&self, lock: &Lock, ahead: &[LockHandle]) -> bool {
        let slot = lock.as_record().and_then(RecordLock::first_heap_no);
        ahead
            .iter()
            .filter_map(|h| self.locks.get(h))
            .filter(|other| match (slot, other.as_record()) {
                (Some(heap_no), Some(rec)) => rec.has_heap_no(heap_no),
                _ => true,
            })
            .any(|other| lock.has_to_wait(other))
    }

    /// Assign identity to a prepared lock and append it to its queue.
    fn enqueue(&mut self, mut lock: Lock, waiting: bool) -> LockGrant {
        self.next_lock += 1;
        self.next_event += 1;
        let handle = LockHandle(self.next_lock);
        lock.handle = handle;
        lock.waiting = waiting;
        lock.origin.event_id = self.next_event;

        let trx = lock.trx;
        self.queues.entry(QueueKey::of(&lock)).or_default().push(handle);
        self.locks.insert(handle, lock);

        let state = self.trx_locks.entry(trx).or_default();
        state.locks.push(handle);
        if waiting {
            state.wait_lock = Some(handle);
            state.que_state = TrxQueState::LockWait;
            LockGrant::Waiting(handle)
        } else {
            LockGrant::Granted(handle)
        }
    }

    fn find_granted_table_lock(
        &self,
        trx: TrxHandle,
        table_id: TableId,
        mode: LockMode,
    ) -> Option<LockHandle> {
        let state = self.trx_locks.get(&trx)?;
        state.locks.iter().copied().find(|h| {
            self.locks.get(h).is_some_and(|l| {
                !l.waiting
                    && l.mode == mode
                    && matches!(l.kind, LockKind::Table { table_id: t } if t == table_id)
            })
        })
    }

    /// A granted record lock of `trx` that a new slot can be folded into.
    fn find_similar_record_lock(
        &self,
        trx: TrxHandle,
        req: &RecordLockRequest,
    ) -> Option<LockHandle> {
        let state = self.trx_locks.get(&trx)?;
        state.locks.iter().copied().find(|h| {
            self.locks.get(h).is_some_and(|l| {
                !l.waiting
                    && l.mode == req.mode
                    && l.as_record().is_some_and(|rec| {
                        rec.space_id == req.space_id
                            && rec.page_no == req.page_no
                            && rec.precision == req.precision
                            && rec.index_name == req.index_name
                    })
            })
        })
    }

    /// Drop every lock of `trx` and grant whatever became grantable.
    fn release_all(&mut self, trx: TrxHandle) -> usize {
        let state = self.trx_locks.remove(&trx).unwrap_or_default();
        let released = state.locks.len();
        let mut touched: Vec<QueueKey> = Vec::new();
        for handle in state.locks {
            let Some(lock) = self.locks.remove(&handle) else {
                continue;
            };
            let key = QueueKey::of(&lock);
            if let Some(queue) = self.queues.get_mut(&key) {
                queue.retain(|h| *h != handle);
            }
            if !touched.contains(&key) {
                touched.push(key);
            }
        }
        for key in touched {
            self.grant_waiters(key);
            if self.queue(key).is_empty() {
                self.queues.remove(&key);
            }
        }
        released
    }

    fn grant_waiters(&mut self, key: QueueKey) {
        let queue = self.queue(key);
        let grantable: Vec<LockHandle> = queue
            .iter()
            .enumerate()
            .filter(|(_, h)| self.locks.get(*h).is_some_and(|l| l.waiting))
            .filter(|(pos, h)| !self.has_to_wait_for_any(&self.locks[*h], &queue[..*pos]))
            .map(|(_, h)| *h)
            .collect();

        for handle in grantable {
            let Some(lock) = self.locks.get_mut(&handle) else {
                continue;
            };
            lock.waiting = false;
            let owner = lock.trx;
            if let Some(state) = self.trx_locks.get_mut(&owner) {
                if state.wait_lock == Some(handle) {
                    state.wait_lock = None;
                    state.que_state = TrxQueState::Running;
                }
            }
            tracing::debug!(lock = %handle, trx = %owner, "granted waiting lock");
        }
    }
}

/// State guarded by the transaction-list mutex.
struct TrxSys {
    trxs: HashMap<TrxHandle, Trx>,
    /// Newest first.
    rw_trx_list: VecDeque<TrxHandle>,
    /// Newest first.
    client_trx_list: VecDeque<TrxHandle>,
    next_trx_id: u64,
    next_handle: u64,
}

impl TrxSys {
    fn get(&self, handle: TrxHandle) -> Result<&Trx, LockSysError> {
        self.trxs.get(&handle).ok_or(LockSysError::TrxNotFound(handle.0))
    }

    fn get_mut(&mut self, handle: TrxHandle) -> Result<&mut Trx, LockSysError> {
        self.trxs
            .get_mut(&handle)
            .ok_or(LockSysError::TrxNotFound(handle.0))
    }

    fn assign_rw_id(&mut self, handle: TrxHandle) -> Result<TxnId, LockSysError> {
        let next = self.next_trx_id;
        let trx = self.get_mut(handle)?;
        if trx.id.is_assigned() {
            return Ok(trx.id);
        }
        if trx.read_only {
            return Err(LockSysError::ReadOnlyTrx(handle.0));
        }
        trx.id = TxnId(next);
        self.next_trx_id += 1;
        self.rw_trx_list.push_front(handle);
        Ok(TxnId(next))
    }
}

/// The lock system shared by sessions and monitoring.
pub struct LockSys {
    lock_mutex: InstrumentedMutex<LockTable>,
    trx_mutex: InstrumentedMutex<TrxSys>,
}

impl Default for LockSys {
    fn default() -> Self {
        Self::new()
    }
}

impl LockSys {
    pub fn new() -> Self {
        Self::with_first_trx_id(1)
    }

    /// Start read-write id assignment at `first` (0 is reserved and bumped to 1).
    pub fn with_first_trx_id(first: u64) -> Self {
        Self {
            lock_mutex: InstrumentedMutex::new(LOCK_SYS_MUTEX, LockTable::default()),
            trx_mutex: InstrumentedMutex::new(
                TRX_SYS_MUTEX,
                TrxSys {
                    trxs: HashMap::new(),
                    rw_trx_list: VecDeque::new(),
                    client_trx_list: VecDeque::new(),
                    next_trx_id: first.max(1),
                    next_handle: 1,
                },
            ),
        }
    }

    /// Acquire both mutexes, lock subsystem first.
    pub fn latch(&self) -> LockSysLatch<'_> {
        let locks = self.lock_mutex.lock();
        let trx_sys = self.trx_mutex.lock();
        LockSysLatch { trx_sys, locks }
    }

    /// Acquisition, wait and hold counters of both mutexes.
    pub fn latch_metrics(&self) -> LockMetricsReport {
        LockMetricsReport::from_snapshots(vec![
            self.lock_mutex.snapshot(),
            self.trx_mutex.snapshot(),
        ])
    }

    pub fn register_table(&self, id: TableId, path: impl Into<String>) {
        let def = Arc::new(TableDef {
            id,
            path: path.into(),
        });
        self.latch().locks.tables.insert(id, def);
    }

    /// Store the rendered key of a record, reported as lock data.
    pub fn set_record_data(
        &self,
        space_id: SpaceId,
        page_no: PageNo,
        heap_no: HeapNo,
        data: impl Into<String>,
    ) {
        self.latch()
            .locks
            .record_data
            .insert((space_id, page_no, heap_no), data.into());
    }

    /// Open a client session transaction. It stays on the client list, not
    /// started, until its first lock request or [`LockSys::start`].
    pub fn begin_session(&self, read_only: bool, thread_id: u64) -> TrxHandle {
        let mut latch = self.latch();
        let sys = &mut *latch.trx_sys;
        let handle = TrxHandle(sys.next_handle);
        sys.next_handle += 1;
        sys.trxs.insert(
            handle,
            Trx {
                handle,
                id: TxnId::NONE,
                state: TrxState::NotStarted,
                read_only,
                origin: TrxOrigin::Client,
                thread_id,
            },
        );
        sys.client_trx_list.push_front(handle);
        handle
    }

    /// Start a background transaction: active, read-write, on the read-write list only.
    pub fn begin_internal(&self, thread_id: u64) -> TrxHandle {
        let mut latch = self.latch();
        let sys = &mut *latch.trx_sys;
        let handle = TrxHandle(sys.next_handle);
        sys.next_handle += 1;
        sys.trxs.insert(
            handle,
            Trx {
                handle,
                id: TxnId::NONE,
                state: TrxState::Active,
                read_only: false,
                origin: TrxOrigin::Internal,
                thread_id,
            },
        );
        match sys.assign_rw_id(handle) {
            Ok(id) => tracing::debug!(trx = %handle, id = %id, "internal transaction started"),
            Err(e) => unreachable!("internal transaction {handle} refused a read-write id: {e}"),
        }
        handle
    }

    pub fn start(&self, trx: TrxHandle) -> Result<(), LockSysError> {
        let mut latch = self.latch();
        latch.trx_sys.get_mut(trx)?.state = TrxState::Active;
        Ok(())
    }

    /// Give `trx` a read-write id, moving it onto the read-write list.
    pub fn assign_rw_id(&self, trx: TrxHandle) -> Result<TxnId, LockSysError> {
        let mut latch = self.latch();
        latch.trx_sys.get_mut(trx)?.state = TrxState::Active;
        latch.trx_sys.assign_rw_id(trx)
    }

    pub fn lock_table(
        &self,
        trx: TrxHandle,
        table_id: TableId,
        mode: LockMode,
    ) -> Result<LockGrant, LockSysError> {
        let mut latch = self.latch();
        let (thread_id, table) = latch.prepare_request(trx, table_id, mode)?;

        if let Some(existing) = latch.locks.find_granted_table_lock(trx, table_id, mode) {
            return Ok(LockGrant::Granted(existing));
        }

        let lock = Lock {
            handle: LockHandle(0),
            trx,
            mode,
            table,
            kind: LockKind::Table { table_id },
            waiting: false,
            origin: ThreadEvent {
                thread_id,
                event_id: 0,
            },
        };
        let locks = &mut *latch.locks;
        let must_wait = locks.has_to_wait_for_any(&lock, locks.queue(QueueKey::of(&lock)));
        let grant = locks.enqueue(lock, must_wait);
        if must_wait {
            tracing::debug!(trx = %trx, table = %table_id, mode = %mode, "table lock wait");
        }
        Ok(grant)
    }

    pub fn lock_rec(
        &self,
        trx: TrxHandle,
        req: RecordLockRequest,
    ) -> Result<LockGrant, LockSysError> {
        let mut latch = self.latch();
        let (thread_id, table) = latch.prepare_request(trx, req.table_id, req.mode)?;

        let mut heap_nos = RoaringBitmap::new();
        heap_nos.insert(req.heap_no.0);
        let lock = Lock {
            handle: LockHandle(0),
            trx,
            mode: req.mode,
            table,
            kind: LockKind::Record(RecordLock {
                space_id: req.space_id,
                page_no: req.page_no,
                index_name: req.index_name.clone(),
                precision: req.precision,
                heap_nos,
            }),
            waiting: false,
            origin: ThreadEvent {
                thread_id,
                event_id: 0,
            },
        };

        let locks = &mut *latch.locks;
        let must_wait = locks.has_to_wait_for_any(&lock, locks.queue(QueueKey::of(&lock)));
        if must_wait {
            tracing::debug!(
                trx = %trx,
                space = %req.space_id,
                page = %req.page_no,
                heap_no = %req.heap_no,
                "record lock wait"
            );
            return Ok(locks.enqueue(lock, true));
        }

        if let Some(existing) = locks.find_similar_record_lock(trx, &req) {
            if let Some(LockKind::Record(rec)) = locks.locks.get_mut(&existing).map(|l| &mut l.kind) {
                rec.heap_nos.insert(req.heap_no.0);
            }
            return Ok(LockGrant::Granted(existing));
        }
        Ok(locks.enqueue(lock, false))
    }

    /// Release every lock of `trx` and end it. Session transactions return
    /// to the not-started state on the client list; internal ones disappear.
    pub fn commit(&self, trx: TrxHandle) -> Result<(), LockSysError> {
        let mut latch = self.latch();
        let origin = latch.trx_sys.get(trx)?.origin;
        let released = latch.locks.release_all(trx);

        let sys = &mut *latch.trx_sys;
        sys.rw_trx_list.retain(|h| *h != trx);
        match origin {
            TrxOrigin::Client => {
                let t = sys.get_mut(trx)?;
                t.state = TrxState::NotStarted;
                t.id = TxnId::NONE;
            }
            TrxOrigin::Internal => {
                sys.trxs.remove(&trx);
            }
        }
        tracing::debug!(trx = %trx, released, "transaction committed");
        Ok(())
    }

    /// Disconnect a session, committing whatever it still holds.
    pub fn close(&self, trx: TrxHandle) -> Result<(), LockSysError> {
        self.commit(trx)?;
        let mut latch = self.latch();
        let sys = &mut *latch.trx_sys;
        sys.client_trx_list.retain(|h| *h != trx);
        sys.trxs.remove(&trx);
        Ok(())
    }

    /// Id a monitoring consumer would see for `trx`.
    pub fn trx_id_for_print(&self, trx: TrxHandle) -> Option<TxnId> {
        self.latch().trx(trx).map(Trx::id_for_print)
    }
}

/// Both lock-system mutexes, held. Dropping releases them in reverse
/// acquisition order.
pub struct LockSysLatch<'a> {
    // Fields drop in declaration order.
    trx_sys: LatchGuard<'a, TrxSys>,
    locks: LatchGuard<'a, LockTable>,
}

impl<'a> LockSysLatch<'a> {
    /// Validate a lock request, then start the transaction. Nothing changes
    /// unless every check passes. Returns the thread to attribute the lock to
    /// and the locked table.
    fn prepare_request(
        &mut self,
        trx: TrxHandle,
        table_id: TableId,
        mode: LockMode,
    ) -> Result<(u64, Arc<TableDef>), LockSysError> {
        let waiting = self
            .locks
            .trx_locks
            .get(&trx)
            .is_some_and(|s| s.que_state == TrxQueState::LockWait);
        let t = self.trx_sys.get(trx)?;
        if waiting {
            return Err(LockSysError::AlreadyWaiting(trx.0));
        }
        if mode.is_write_intent() && t.read_only {
            return Err(LockSysError::ReadOnlyTrx(trx.0));
        }
        let thread_id = t.thread_id;
        let table = self.locks.table(table_id)?;

        self.trx_sys.get_mut(trx)?.state = TrxState::Active;
        if mode.is_write_intent() {
            self.trx_sys.assign_rw_id(trx)?;
        }
        Ok((thread_id, table))
    }

    /// Transactions of one list, newest first.
    pub fn trx_list(&self, list: TrxListKind) -> impl Iterator<Item = &Trx> + '_ {
        let handles = match list {
            TrxListKind::ReadWrite => &self.trx_sys.rw_trx_list,
            TrxListKind::Client => &self.trx_sys.client_trx_list,
        };
        handles.iter().filter_map(move |h| self.trx_sys.trxs.get(h))
    }

    pub fn trx_list_len(&self, list: TrxListKind) -> usize {
        match list {
            TrxListKind::ReadWrite => self.trx_sys.rw_trx_list.len(),
            TrxListKind::Client => self.trx_sys.client_trx_list.len(),
        }
    }

    pub fn trx(&self, handle: TrxHandle) -> Option<&Trx> {
        self.trx_sys.trxs.get(&handle)
    }

    /// Locks held or awaited by `trx`, in acquisition order.
    pub fn trx_locks(&self, trx: &Trx) -> impl Iterator<Item = &Lock> + '_ {
        self.locks
            .trx_locks
            .get(&trx.handle)
            .into_iter()
            .flat_map(|state| state.locks.iter())
            .filter_map(move |h| self.locks.locks.get(h))
    }

    pub fn que_state(&self, trx: &Trx) -> TrxQueState {
        self.locks
            .trx_locks
            .get(&trx.handle)
            .map(|s| s.que_state)
            .unwrap_or_default()
    }

    /// The lock `trx` is waiting for, if any.
    pub fn wait_lock(&self, trx: &Trx) -> Option<&Lock> {
        let handle = self.locks.trx_locks.get(&trx.handle)?.wait_lock?;
        self.locks.locks.get(&handle)
    }

    pub fn lock(&self, handle: LockHandle) -> Option<&Lock> {
        self.locks.locks.get(&handle)
    }

    /// Printed id of the lock's owner.
    ///
    /// # Panics
    /// If the owner is unknown: a lock never outlives its transaction.
    pub fn lock_trx_id(&self, lock: &Lock) -> TxnId {
        match self.trx_sys.trxs.get(&lock.trx) {
            Some(trx) => trx.id_for_print(),
            None => panic!("lock {} owned by unknown transaction {}", lock.handle, lock.trx),
        }
    }

    /// Locks queued ahead of `lock` on its resource, nearest first. For
    /// record locks only those covering `heap_no` are returned.
    pub fn lock_queue_prev(
        &self,
        lock: &Lock,
        heap_no: Option<HeapNo>,
    ) -> impl Iterator<Item = &Lock> + '_ {
        let queue = self.locks.queue(QueueKey::of(lock));
        let pos = queue.iter().position(|h| *h == lock.handle).unwrap_or(0);
        queue[..pos]
            .iter()
            .rev()
            .filter_map(move |h| self.locks.locks.get(h))
            .filter(move |other| match (heap_no, other.as_record()) {
                (Some(n), Some(rec)) => rec.has_heap_no(n),
                (Some(_), None) => false,
                (None, _) => true,
            })
    }

    /// Rendered key of the record under a record lock slot.
    pub fn lock_data(&self, lock: &Lock, heap_no: HeapNo) -> Option<String> {
        let rec = lock.as_record()?;
        if heap_no.is_supremum() {
            return Some(SUPREMUM_DATA.to_string());
        }
        self.locks
            .record_data
            .get(&(rec.space_id, rec.page_no, heap_no))
            .cloned()
    }
}
