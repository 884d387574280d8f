//! Paged, restartable reporting of the locks and lock waits held in a
//! [`falcon_txn::LockSys`].
//!
//! Each `scan` call holds both lock-system mutexes for one window of
//! transaction ids only. Consumers keep calling until [`ScanProgress::Done`].
//! No snapshot spans calls: rows from different calls may reflect different
//! states of the lock system.

pub mod inspector;
pub mod list_scanner;
pub mod lock_id;
pub mod lock_iter;
pub mod scan_state;
pub mod sink;
pub mod table_path;
pub mod wait_iter;


pub use inspector::{DataLockInspector, FalconDataLockInspector};
pub use list_scanner::{discard_trx, FetchOutcome, ScanProgress};
pub use lock_id::LockIdKey;
pub use lock_iter::{DataLockIterator, FalconDataLockIterator};
pub use scan_state::{ScanPass, TrxScanState};
pub use sink::{
    DataLockCollector, DataLockRow, DataLockSink, DataLockWaitCollector, DataLockWaitRow,
    DataLockWaitSink, LockStatus, RowFilter, WaitRowFilter,
};
pub use table_path::TableObject;
pub use wait_iter::{DataLockWaitIterator, FalconDataLockWaitIterator};
