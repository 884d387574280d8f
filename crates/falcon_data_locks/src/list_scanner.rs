//! Drives a [`TrxScanState`] across the two transaction lists.

use falcon_common::types::TxnId;
use falcon_txn::{LockSys, LockSysLatch, Trx, TrxListKind};

use crate::scan_state::{ScanPass, TrxScanState};

/// Result of one `scan` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanProgress {
    /// Call `scan` again for more rows.
    MorePending,
    Done,
}

impl ScanProgress {
    pub fn is_done(&self) -> bool {
        *self == ScanProgress::Done
    }
}

/// Result of a point lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Found { rows: usize },
    NotFound,
}

impl FetchOutcome {
    pub(crate) fn from_rows(rows: usize) -> Self {
        if rows == 0 {
            FetchOutcome::NotFound
        } else {
            FetchOutcome::Found { rows }
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, FetchOutcome::Found { .. })
    }
}

/// Per-transaction row producer run by the scanner while both lock-system
/// mutexes are held.
pub(crate) trait TrxVisitor {
    fn accept_engine(&mut self) -> bool;

    /// Emit the rows of `trx`, returning how many were emitted.
    fn visit(&mut self, latch: &LockSysLatch<'_>, trx: &Trx) -> usize;
}

/// Whether `trx` is skipped when walking `list`.
///
/// Transactions not started are never reported. On the client list, a
/// transaction with a read-write id that is not read-only is skipped: it is
/// reported from the read-write list.
pub fn discard_trx(trx: &Trx, list: TrxListKind) -> bool {
    if !trx.is_started() {
        return true;
    }
    list == TrxListKind::Client && trx.id().is_assigned() && !trx.is_read_only()
}

/// Find the reported transaction printed as `trx_id`, read-write list first.
pub(crate) fn find_trx<'l>(latch: &'l LockSysLatch<'_>, trx_id: TxnId) -> Option<&'l Trx> {
    [TrxListKind::ReadWrite, TrxListKind::Client]
        .into_iter()
        .find_map(|list| {
            latch
                .trx_list(list)
                .filter(|trx| !discard_trx(trx, list))
                .find(|trx| trx.id_for_print() == trx_id)
        })
}

#[derive(Debug, Clone)]
pub(crate) struct ListScanner {
    state: TrxScanState,
}

impl ListScanner {
    pub(crate) fn new(range_size: u64) -> Self {
        Self {
            state: TrxScanState::with_range_size(range_size),
        }
    }

    pub(crate) fn state(&self) -> &TrxScanState {
        &self.state
    }

    /// One bounded unit of work: sweep the lists window by window until a
    /// window produces rows or both lists are exhausted.
    pub(crate) fn scan<V: TrxVisitor>(&mut self, lock_sys: &LockSys, visitor: &mut V) -> ScanProgress {
        if self.state.pass() == ScanPass::NotStarted {
            if !visitor.accept_engine() {
                self.state.finish();
                return ScanProgress::Done;
            }
            self.state.advance();
        }
        if self.state.pass() == ScanPass::Done {
            return ScanProgress::Done;
        }

        let latch = lock_sys.latch();
        let mut found = 0;
        let mut windows = 0;
        for (pass, list) in [
            (ScanPass::ScanningRwTrxList, TrxListKind::ReadWrite),
            (ScanPass::ScanningClientTrxList, TrxListKind::Client),
        ] {
            while self.state.pass() == pass && found == 0 {
                found = self.scan_list(&latch, list, visitor);
                windows += 1;
                self.state.advance();
            }
        }
        drop(latch);

        tracing::debug!(
            pass = %self.state.pass(),
            next_start = self.state.range().start,
            windows,
            rows = found,
            "data lock scan batch"
        );

        if self.state.pass() == ScanPass::Done {
            ScanProgress::Done
        } else {
            ScanProgress::MorePending
        }
    }

    fn scan_list<V: TrxVisitor>(
        &mut self,
        latch: &LockSysLatch<'_>,
        list: TrxListKind,
        visitor: &mut V,
    ) -> usize {
        let mut found = 0;
        for trx in latch.trx_list(list) {
            if discard_trx(trx, list) {
                continue;
            }
            if !self.state.admit(trx.id_for_print().0) {
                continue;
            }
            found += visitor.visit(latch, trx);
        }
        found
    }
}

/// Run `visitor` on the transaction printed as `trx_id`, if it exists.
pub(crate) fn fetch<V: TrxVisitor>(lock_sys: &LockSys, trx_id: TxnId, visitor: &mut V) -> usize {
    let latch = lock_sys.latch();
    match find_trx(&latch, trx_id) {
        Some(trx) => visitor.visit(&latch, trx),
        None => 0,
    }
}
