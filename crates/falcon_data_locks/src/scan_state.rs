//! Restartable range/pass state of one data-lock scan.
//!
//! A scan walks the read-write list, then the client list. Each list is
//! covered in windows of `range_size` transaction ids: one call to the
//! iterator inspects every transaction of the list but reports only those
//! whose id falls in the current window. While walking, the smallest id seen
//! beyond the window is remembered; the next window starts at that id
//! rounded down to a multiple of `range_size`, so windows never leave gaps and
//! the list never needs sorting.

use std::fmt;
use std::ops::Range;

use falcon_common::config::DEFAULT_SCAN_RANGE_SIZE;

/// Which transaction list a scan is currently covering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScanPass {
    NotStarted,
    ScanningRwTrxList,
    ScanningClientTrxList,
    Done,
}

impl fmt::Display for ScanPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanPass::NotStarted => "not_started",
            ScanPass::ScanningRwTrxList => "rw_trx_list",
            ScanPass::ScanningClientTrxList => "client_trx_list",
            ScanPass::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrxScanState {
    pass: ScanPass,
    start: u64,
    range_size: u64,
    /// Smallest id observed past the current window during this sweep.
    next: Option<u64>,
}

impl Default for TrxScanState {
    fn default() -> Self {
        Self::new()
    }
}

impl TrxScanState {
    pub fn new() -> Self {
        Self::with_range_size(DEFAULT_SCAN_RANGE_SIZE)
    }

    /// # Panics
    /// If `range_size` is zero.
    pub fn with_range_size(range_size: u64) -> Self {
        assert!(range_size > 0, "scan range size must be positive");
        Self {
            pass: ScanPass::NotStarted,
            start: 0,
            range_size,
            next: None,
        }
    }

    pub fn pass(&self) -> ScanPass {
        self.pass
    }

    pub fn range_size(&self) -> u64 {
        self.range_size
    }

    /// Current id window. The end saturates at `u64::MAX`.
    pub fn range(&self) -> Range<u64> {
        self.start..self.start.saturating_add(self.range_size)
    }

    pub fn next_range_hint(&self) -> Option<u64> {
        self.next
    }

    /// Whether `id` falls in the current window.
    pub fn in_range(&self, id: u64) -> bool {
        id >= self.start && id - self.start < self.range_size
    }

    /// Record `id` as a candidate start for the next window if it lies past
    /// the current one and below every candidate seen so far.
    pub fn observe(&mut self, id: u64) {
        let beyond = id >= self.start && id - self.start >= self.range_size;
        if beyond && self.next.map_or(true, |next| id < next) {
            self.next = Some(id);
        }
    }

    /// `in_range` followed by `observe`, the per-transaction step of a sweep.
    pub fn admit(&mut self, id: u64) -> bool {
        if self.in_range(id) {
            return true;
        }
        self.observe(id);
        false
    }

    /// Move to the next window of the current pass, or to the next pass when
    /// nothing was observed past the current window.
    ///
    /// # Panics
    /// If the scan is already done.
    pub fn advance(&mut self) {
        if let Some(next) = self.next.take() {
            self.start = next - next % self.range_size;
            return;
        }
        self.pass = match self.pass {
            ScanPass::NotStarted => ScanPass::ScanningRwTrxList,
            ScanPass::ScanningRwTrxList => ScanPass::ScanningClientTrxList,
            ScanPass::ScanningClientTrxList => ScanPass::Done,
            ScanPass::Done => panic!("advance() called on a finished data lock scan"),
        };
        self.start = 0;
    }

    /// End the scan without covering the lists.
    pub fn finish(&mut self) {
        self.pass = ScanPass::Done;
        self.start = 0;
        self.next = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(state: &mut TrxScanState, ids: &[u64]) -> Vec<u64> {
        ids.iter().copied().filter(|id| state.admit(*id)).collect()
    }

    #[test]
    fn test_passes_in_order() {
        let mut state = TrxScanState::new();
        assert_eq!(state.pass(), ScanPass::NotStarted);
        state.advance();
        assert_eq!(state.pass(), ScanPass::ScanningRwTrxList);
        assert_eq!(state.range(), 0..256);
        state.advance();
        assert_eq!(state.pass(), ScanPass::ScanningClientTrxList);
        state.advance();
        assert_eq!(state.pass(), ScanPass::Done);
    }

    #[test]
    #[should_panic(expected = "finished data lock scan")]
    fn test_advance_past_done_panics() {
        let mut state = TrxScanState::new();
        for _ in 0..4 {
            state.advance();
        }
    }

    #[test]
    #[should_panic(expected = "must be positive")]
    fn test_zero_range_rejected() {
        TrxScanState::with_range_size(0);
    }

    #[test]
    fn test_in_range_is_pure() {
        let mut state = TrxScanState::with_range_size(10);
        state.advance();
        assert!(state.in_range(0));
        assert!(state.in_range(9));
        assert!(!state.in_range(10));
        assert_eq!(state.next_range_hint(), None);
    }

    #[test]
    fn test_hint_keeps_minimum() {
        let mut state = TrxScanState::with_range_size(10);
        state.advance();
        state.observe(57);
        state.observe(31);
        state.observe(44);
        state.observe(3);
        assert_eq!(state.next_range_hint(), Some(31));

        state.advance();
        assert_eq!(state.pass(), ScanPass::ScanningRwTrxList);
        assert_eq!(state.range(), 30..40);
        assert_eq!(state.next_range_hint(), None);

        // Ids below the window are already covered.
        state.observe(5);
        assert_eq!(state.next_range_hint(), None);
    }

    #[test]
    fn test_windows_cover_sparse_ids_once() {
        let ids = [700, 3, 255, 256, 1_000_000, 12, 513, 257];
        let mut state = TrxScanState::new();
        state.advance();

        let mut seen = Vec::new();
        let mut windows = Vec::new();
        while state.pass() == ScanPass::ScanningRwTrxList {
            windows.push(state.range());
            seen.extend(sweep(&mut state, &ids));
            state.advance();
        }
        seen.sort_unstable();
        let mut expected = ids.to_vec();
        expected.sort_unstable();
        assert_eq!(seen, expected);

        for pair in windows.windows(2) {
            assert!(pair[0].end <= pair[1].start, "{pair:?}");
        }
        assert_eq!(windows.len(), 4);
    }

    #[test]
    fn test_synthetic_ids_do_not_overflow() {
        let big = (1u64 << 63) | 17;
        let mut state = TrxScanState::new();
        state.advance();
        assert!(!state.admit(big));
        state.advance();
        assert!(state.in_range(big));
        assert_eq!(state.range().start, 1u64 << 63);

        let mut edge = TrxScanState::new();
        edge.advance();
        edge.observe(u64::MAX);
        edge.advance();
        assert!(edge.in_range(u64::MAX));
    }
}
