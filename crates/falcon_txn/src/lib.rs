pub mod lock;
pub mod lock_sys;
pub mod trx;


pub use lock::{Lock, LockHandle, LockKind, LockMode, RecordLock, RecordLockPrecision, TableDef};
pub use lock_sys::{LockGrant, LockSys, LockSysLatch, RecordLockRequest, LOCK_SYS_MUTEX, TRX_SYS_MUTEX};
pub use trx::{Trx, TrxHandle, TrxListKind, TrxOrigin, TrxQueState, TrxState, SYNTHETIC_TRX_ID_FLAG};
