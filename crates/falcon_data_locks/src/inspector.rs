//! Factory handing out data-lock iterators over one lock system.

use std::sync::Arc;

use falcon_common::config::DataLockConfig;
use falcon_txn::LockSys;

use crate::lock_iter::{DataLockIterator, FalconDataLockIterator};
use crate::wait_iter::{DataLockWaitIterator, FalconDataLockWaitIterator};

/// Creates independent iterators. Each iterator owns its scan state; drop it
/// to end the scan.
pub trait DataLockInspector: Send + Sync {
    fn create_data_lock_iterator(&self) -> Box<dyn DataLockIterator>;
    fn create_data_lock_wait_iterator(&self) -> Box<dyn DataLockWaitIterator>;
}

pub struct FalconDataLockInspector {
    lock_sys: Arc<LockSys>,
    config: DataLockConfig,
}

impl FalconDataLockInspector {
    pub fn new(lock_sys: Arc<LockSys>, config: DataLockConfig) -> Self {
        Self { lock_sys, config }
    }

    pub fn config(&self) -> &DataLockConfig {
        &self.config
    }
}

impl DataLockInspector for FalconDataLockInspector {
    fn create_data_lock_iterator(&self) -> Box<dyn DataLockIterator> {
        Box::new(FalconDataLockIterator::new(
            self.lock_sys.clone(),
            self.config.engine_name.clone(),
            self.config.scan_range_size,
        ))
    }

    fn create_data_lock_wait_iterator(&self) -> Box<dyn DataLockWaitIterator> {
        Box::new(FalconDataLockWaitIterator::new(
            self.lock_sys.clone(),
            self.config.engine_name.clone(),
            self.config.scan_range_size,
        ))
    }
}
