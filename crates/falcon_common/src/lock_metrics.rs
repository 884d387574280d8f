//! Latch instrumentation for the lock system.
//!
//! Every acquisition of an [`InstrumentedMutex`] records how long the caller
//! waited for it, and dropping the returned [`LatchGuard`] records how long it
//! was held. Monitoring scans hold both lock-system latches for one batch at
//! a time, so the hold counters are what shows whether a batch stayed short.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

/// Waits longer than this count as contention.
const CONTENTION_THRESHOLD: Duration = Duration::from_micros(100);

/// Point-in-time copy of one latch's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatchSnapshot {
    pub name: String,
    pub acquires: u64,
    pub contentions: u64,
    pub total_wait_us: u64,
    pub max_wait_us: u64,
    pub total_hold_us: u64,
    pub max_hold_us: u64,
}

#[derive(Default)]
struct Counter {
    total: AtomicU64,
    max: AtomicU64,
}

impl Counter {
    fn add(&self, d: Duration) {
        let us = d.as_micros() as u64;
        self.total.fetch_add(us, Ordering::Relaxed);
        self.max.fetch_max(us, Ordering::Relaxed);
    }

    fn load(&self) -> (u64, u64) {
        (
            self.total.load(Ordering::Relaxed),
            self.max.load(Ordering::Relaxed),
        )
    }
}

struct LatchStats {
    name: String,
    acquires: AtomicU64,
    contentions: AtomicU64,
    wait: Counter,
    hold: Counter,
}

impl LatchStats {
    fn snapshot(&self) -> LatchSnapshot {
        let (total_wait_us, max_wait_us) = self.wait.load();
        let (total_hold_us, max_hold_us) = self.hold.load();
        LatchSnapshot {
            name: self.name.clone(),
            acquires: self.acquires.load(Ordering::Relaxed),
            contentions: self.contentions.load(Ordering::Relaxed),
            total_wait_us,
            max_wait_us,
            total_hold_us,
            max_hold_us,
        }
    }
}

/// A `parking_lot::Mutex` that counts acquisitions, wait time and hold time.
pub struct InstrumentedMutex<T> {
    inner: Mutex<T>,
    stats: LatchStats,
}

impl<T> InstrumentedMutex<T> {
    pub fn new(name: &str, value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            stats: LatchStats {
                name: name.to_string(),
                acquires: AtomicU64::new(0),
                contentions: AtomicU64::new(0),
                wait: Counter::default(),
                hold: Counter::default(),
            },
        }
    }

    pub fn lock(&self) -> LatchGuard<'_, T> {
        let start = Instant::now();
        let guard = self.inner.lock();
        let waited = start.elapsed();
        self.stats.acquires.fetch_add(1, Ordering::Relaxed);
        self.stats.wait.add(waited);
        if waited > CONTENTION_THRESHOLD {
            self.stats.contentions.fetch_add(1, Ordering::Relaxed);
        }
        LatchGuard {
            guard,
            stats: &self.stats,
            acquired_at: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.stats.name
    }

    pub fn snapshot(&self) -> LatchSnapshot {
        self.stats.snapshot()
    }
}

/// Held latch. Records the hold time when dropped.
pub struct LatchGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    stats: &'a LatchStats,
    acquired_at: Instant,
}

impl<T> Deref for LatchGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for LatchGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for LatchGuard<'_, T> {
    fn drop(&mut self) {
        self.stats.hold.add(self.acquired_at.elapsed());
    }
}

/// Counters of all latches of one lock system.
#[derive(Debug, Clone, Default)]
pub struct LockMetricsReport {
    pub latches: Vec<LatchSnapshot>,
    pub total_contentions: u64,
    pub max_hold_us: u64,
}

impl LockMetricsReport {
    pub fn from_snapshots(latches: Vec<LatchSnapshot>) -> Self {
        Self {
            total_contentions: latches.iter().map(|s| s.contentions).sum(),
            max_hold_us: latches.iter().map(|s| s.max_hold_us).max().unwrap_or(0),
            latches,
        }
    }

    pub fn get(&self, name: &str) -> Option<&LatchSnapshot> {
        self.latches.iter().find(|s| s.name == name)
    }
}

impl std::fmt::Display for LockMetricsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "latches: contentions={} max_hold_us={}",
            self.total_contentions, self.max_hold_us
        )?;
        for s in &self.latches {
            write!(
                f,
                "; {} acquires={} wait_us={}/{} hold_us={}/{}",
                s.name, s.acquires, s.total_wait_us, s.max_wait_us, s.total_hold_us, s.max_hold_us,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_guard_gives_access_and_counts() {
        let m = InstrumentedMutex::new("trx_sys", vec![1, 2, 3]);
        m.lock().push(4);
        assert_eq!(m.lock().len(), 4);
        let snap = m.snapshot();
        assert_eq!(snap.name, "trx_sys");
        assert_eq!(snap.acquires, 2);
        assert_eq!(snap.contentions, 0);
    }

    #[test]
    fn test_hold_time_recorded_on_drop() {
        let m = InstrumentedMutex::new("lock_sys", ());
        {
            let _g = m.lock();
            std::thread::sleep(Duration::from_millis(2));
            assert_eq!(m.snapshot().total_hold_us, 0);
        }
        let snap = m.snapshot();
        assert!(snap.max_hold_us >= 2_000);
        assert_eq!(snap.total_hold_us, snap.max_hold_us);
    }

    #[test]
    fn test_blocked_acquire_counts_as_contention() {
        let m = Arc::new(InstrumentedMutex::new("lock_sys", 0u64));
        let held = m.lock();
        let m2 = Arc::clone(&m);
        let waiter = std::thread::spawn(move || {
            *m2.lock() += 1;
        });
        std::thread::sleep(Duration::from_millis(20));
        drop(held);
        waiter.join().unwrap();

        let snap = m.snapshot();
        assert_eq!(snap.acquires, 2);
        assert_eq!(snap.contentions, 1);
        assert!(snap.max_wait_us >= 1_000);
    }

    #[test]
    fn test_report_aggregates() {
        let report = LockMetricsReport::from_snapshots(vec![
            LatchSnapshot {
                name: "lock_sys".into(),
                acquires: 10,
                contentions: 2,
                max_hold_us: 40,
                ..Default::default()
            },
            LatchSnapshot {
                name: "trx_sys".into(),
                acquires: 10,
                contentions: 1,
                max_hold_us: 35,
                ..Default::default()
            },
        ]);
        assert_eq!(report.total_contentions, 3);
        assert_eq!(report.max_hold_us, 40);
        assert_eq!(report.get("trx_sys").map(|s| s.acquires), Some(10));
        assert!(report.get("buf_pool").is_none());
        let text = report.to_string();
        assert!(text.starts_with("latches: contentions=3 max_hold_us=40"));
        assert!(text.contains("; lock_sys acquires=10"));
    }
}
