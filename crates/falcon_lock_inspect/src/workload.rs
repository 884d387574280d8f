//! Deterministic synthetic lock workload for the inspect tool.

use falcon_common::config::WorkloadConfig;
use falcon_common::error::{ConfigError, FalconResult};
use falcon_common::types::{HeapNo, PageNo, SpaceId, TableId};
use falcon_txn::{LockMode, LockSys, RecordLockPrecision, RecordLockRequest, TrxHandle};

pub const ACCOUNTS_TABLE: TableId = TableId(1);
pub const HISTORY_TABLE: TableId = TableId(2);
const ACCOUNTS_SPACE: SpaceId = SpaceId(5);
const HISTORY_SPACE: SpaceId = SpaceId(6);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkloadSummary {
    pub rw_sessions: Vec<TrxHandle>,
    pub read_only_sessions: Vec<TrxHandle>,
    pub waiting_sessions: Vec<TrxHandle>,
}

/// Workload ordinal as a `u32` page or slot component.
fn ordinal(field: &'static str, n: usize) -> Result<u32, ConfigError> {
    u32::try_from(n).map_err(|_| ConfigError::Invalid {
        field,
        reason: format!("{} does not fit a page or slot number", n),
    })
}

fn account_slot(trx_no: u32, rec_no: u32) -> (PageNo, HeapNo) {
    (PageNo(trx_no), HeapNo(HeapNo::FIRST_USER_REC.0 + rec_no))
}

fn account_request(trx_no: u32, rec_no: u32, mode: LockMode) -> RecordLockRequest {
    let (page_no, heap_no) = account_slot(trx_no, rec_no);
    RecordLockRequest {
        table_id: ACCOUNTS_TABLE,
        space_id: ACCOUNTS_SPACE,
        page_no,
        index_name: "PRIMARY".to_string(),
        heap_no,
        mode,
        precision: RecordLockPrecision::RecNotGap,
    }
}

/// Populate `sys`:
/// - read-write sessions, each with an IX lock on `accounts` and exclusive
///   locks on their own rows;
/// - read-only sessions with shared next-key locks on `history`;
/// - waiters queued behind the first row of the first read-write sessions.
pub fn populate(sys: &LockSys, config: &WorkloadConfig) -> FalconResult<WorkloadSummary> {
    config.validate()?;
    sys.register_table(ACCOUNTS_TABLE, "demo/accounts");
    sys.register_table(HISTORY_TABLE, "demo/history#P#p2024");

    let mut summary = WorkloadSummary::default();
    let mut thread_id = 0u64;

    for trx_no in 0..config.rw_transactions {
        let trx_no = ordinal("workload.rw_transactions", trx_no)?;
        thread_id += 1;
        let trx = sys.begin_session(false, thread_id);
        sys.lock_table(trx, ACCOUNTS_TABLE, LockMode::IntentionExclusive)?;
        for rec_no in 0..config.records_per_transaction {
            let (page_no, heap_no) = account_slot(trx_no, rec_no);
            sys.set_record_data(
                ACCOUNTS_SPACE,
                page_no,
                heap_no,
                format!("{}", u64::from(trx_no) * 1000 + u64::from(rec_no)),
            );
            sys.lock_rec(trx, account_request(trx_no, rec_no, LockMode::Exclusive))?;
        }
        summary.rw_sessions.push(trx);
    }

    for ro_no in 0..config.read_only_transactions {
        let ro_no = ordinal("workload.read_only_transactions", ro_no)?;
        thread_id += 1;
        let trx = sys.begin_session(true, thread_id);
        sys.lock_table(trx, HISTORY_TABLE, LockMode::IntentionShared)?;
        sys.lock_rec(
            trx,
            RecordLockRequest {
                table_id: HISTORY_TABLE,
                space_id: HISTORY_SPACE,
                page_no: PageNo(0),
                index_name: "GEN_CLUST_INDEX".to_string(),
                heap_no: HeapNo(HeapNo::FIRST_USER_REC.0 + ro_no),
                mode: LockMode::Shared,
                precision: RecordLockPrecision::NextKey,
            },
        )?;
        summary.read_only_sessions.push(trx);
    }

    if config.records_per_transaction > 0 {
        for trx_no in 0..config.waiters {
            let trx_no = ordinal("workload.waiters", trx_no)?;
            thread_id += 1;
            let trx = sys.begin_session(false, thread_id);
            sys.lock_table(trx, ACCOUNTS_TABLE, LockMode::IntentionExclusive)?;
            let grant = sys.lock_rec(trx, account_request(trx_no, 0, LockMode::Exclusive))?;
            if !grant.is_granted() {
                summary.waiting_sessions.push(trx);
            }
        }
    }

    tracing::info!(
        rw = summary.rw_sessions.len(),
        read_only = summary.read_only_sessions.len(),
        waiting = summary.waiting_sessions.len(),
        "workload populated"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use falcon_common::error::{ErrorKind, FalconError};
    use falcon_txn::TrxListKind;

    #[test]
    fn test_populate_default_shape() {
        let sys = LockSys::new();
        let config = WorkloadConfig {
            rw_transactions: 10,
            read_only_transactions: 3,
            records_per_transaction: 2,
            waiters: 4,
        };
        let summary = populate(&sys, &config).unwrap();
        assert_eq!(summary.rw_sessions.len(), 10);
        assert_eq!(summary.read_only_sessions.len(), 3);
        assert_eq!(summary.waiting_sessions.len(), 4);

        let latch = sys.latch();
        assert_eq!(latch.trx_list_len(TrxListKind::ReadWrite), 14);
        assert_eq!(latch.trx_list_len(TrxListKind::Client), 17);
        let first = latch.trx(summary.rw_sessions[0]).unwrap();
        assert_eq!(latch.trx_locks(first).count(), 2);
    }

    #[test]
    fn test_invalid_workload_rejected_before_locking() {
        let sys = LockSys::new();
        let config = WorkloadConfig {
            rw_transactions: 1,
            waiters: 3,
            ..Default::default()
        };
        let err = populate(&sys, &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserError);
        assert!(matches!(
            err,
            FalconError::Config(ConfigError::Invalid {
                field: "workload.waiters",
                ..
            })
        ));
        assert_eq!(sys.latch().trx_list_len(TrxListKind::Client), 0);
    }

    #[test]
    fn test_ordinal_overflow_is_config_error() {
        assert_eq!(ordinal("workload.waiters", 7).unwrap(), 7);
        if let Ok(too_big) = usize::try_from(u64::from(u32::MAX) + 1) {
            assert!(matches!(
                ordinal("workload.rw_transactions", too_big),
                Err(ConfigError::Invalid { field: "workload.rw_transactions", .. })
            ));
        }
    }

    #[test]
    fn test_no_records_means_no_waiters() {
        let sys = LockSys::new();
        let config = WorkloadConfig {
            rw_transactions: 2,
            read_only_transactions: 0,
            records_per_transaction: 0,
            waiters: 2,
        };
        let summary = populate(&sys, &config).unwrap();
        assert!(summary.waiting_sessions.is_empty());
    }
}
