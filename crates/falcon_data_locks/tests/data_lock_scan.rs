//! End-to-end paging over a mixed workload through the public API.

use std::sync::Arc;

use falcon_common::config::DataLockConfig;
use falcon_common::types::{HeapNo, PageNo, SpaceId, TableId};
use falcon_data_locks::{
    DataLockCollector, DataLockInspector, DataLockWaitCollector, FalconDataLockInspector,
    FetchOutcome, LockIdKey, ScanPass, TrxScanState,
};
use falcon_txn::{LockMode, LockSys, RecordLockPrecision, RecordLockRequest};

fn mixed_workload() -> Arc<LockSys> {
    let sys = Arc::new(LockSys::new());
    sys.register_table(TableId(1), "app/accounts");
    sys.register_table(TableId(2), "app/ledger#P#y2024#SP#q1");

    for i in 0..40u32 {
        let trx = sys.begin_session(i % 5 == 0, i as u64);
        let mode = if i % 5 == 0 {
            LockMode::IntentionShared
        } else {
            LockMode::IntentionExclusive
        };
        sys.lock_table(trx, TableId(1 + (i % 2) as u64), mode).unwrap();
        let rec_mode = if i % 5 == 0 { LockMode::Shared } else { LockMode::Exclusive };
        sys.set_record_data(SpaceId(9), PageNo(i / 8), HeapNo(2 + i % 8), format!("{}", 1000 + i));
        sys.lock_rec(
            trx,
            RecordLockRequest {
                table_id: TableId(1),
                space_id: SpaceId(9),
                page_no: PageNo(i / 8),
                index_name: "PRIMARY".into(),
                heap_no: HeapNo(2 + i % 8),
                mode: rec_mode,
                precision: RecordLockPrecision::RecNotGap,
            },
        )
        .unwrap();
    }
    for _ in 0..10 {
        let trx = sys.begin_internal(99);
        sys.lock_table(trx, TableId(2), LockMode::IntentionExclusive).unwrap();
    }
    sys
}

fn inspector(sys: &Arc<LockSys>, range: u64) -> FalconDataLockInspector {
    FalconDataLockInspector::new(
        sys.clone(),
        DataLockConfig {
            scan_range_size: range,
            ..Default::default()
        },
    )
}

#[test]
fn every_scanned_row_can_be_fetched_back() {
    let sys = mixed_workload();
    let inspector = inspector(&sys, 8);
    let mut it = inspector.create_data_lock_iterator();

    let mut sink = DataLockCollector::new();
    while !it.scan(&mut sink, true).is_done() {}
    let rows = sink.take_rows();
    // 40 sessions with two locks each, 10 internal table locks.
    assert_eq!(rows.len(), 90);

    let mut lookup = inspector.create_data_lock_iterator();
    for row in &rows {
        let key: LockIdKey = row.engine_lock_id.parse().unwrap();
        assert_eq!(key.to_string(), row.engine_lock_id);
        assert_eq!(key.trx_id(), row.engine_transaction_id);
        assert_eq!(key.heap_no().is_some(), row.lock_type == "RECORD");

        let mut one = DataLockCollector::new();
        let outcome = lookup.fetch(&mut one, &row.engine_lock_id, true);
        assert_eq!(outcome, FetchOutcome::Found { rows: 1 }, "{}", row.engine_lock_id);
        assert_eq!(&one.rows()[0], row);
    }
}

#[test]
fn partition_and_subpartition_are_reported() {
    let sys = mixed_workload();
    let mut it = inspector(&sys, 256).create_data_lock_iterator();
    let mut sink = DataLockCollector::new();
    while !it.scan(&mut sink, false).is_done() {}
    let ledger = sink
        .rows()
        .iter()
        .find(|r| r.object_name == "ledger")
        .unwrap();
    assert_eq!(ledger.object_schema, "app");
    assert_eq!(ledger.partition_name.as_deref(), Some("y2024"));
    assert_eq!(ledger.subpartition_name.as_deref(), Some("q1"));
}

#[test]
fn rows_serialize_to_json() {
    let sys = mixed_workload();
    let mut it = inspector(&sys, 256).create_data_lock_iterator();
    let mut sink = DataLockCollector::new();
    it.scan(&mut sink, true);
    let json = serde_json::to_value(&sink.rows()[0]).unwrap();
    assert_eq!(json["engine"], "FALCON");
    assert!(json["lock_status"] == "GRANTED" || json["lock_status"] == "WAITING");
}

#[test]
fn waits_appear_and_clear() {
    let sys = mixed_workload();
    // Session 1 holds X on (9, 0, 3); a newcomer queues behind it.
    let waiter = sys.begin_session(false, 500);
    let grant = sys
        .lock_rec(
            waiter,
            RecordLockRequest {
                table_id: TableId(1),
                space_id: SpaceId(9),
                page_no: PageNo(0),
                index_name: "PRIMARY".into(),
                heap_no: HeapNo(3),
                mode: LockMode::Exclusive,
                precision: RecordLockPrecision::RecNotGap,
            },
        )
        .unwrap();
    assert!(!grant.is_granted());

    let inspector = inspector(&sys, 16);
    let mut waits = inspector.create_data_lock_wait_iterator();
    let mut sink = DataLockWaitCollector::new();
    while !waits.scan(&mut sink).is_done() {}
    assert_eq!(sink.rows().len(), 1);
    let row = sink.rows()[0].clone();
    assert!(row.requesting_engine_lock_id.ends_with(":9:0:3"));
    assert_eq!(row.requesting_thread_id, 500);
    assert_eq!(row.blocking_thread_id, 1);

    let mut lookup = inspector.create_data_lock_wait_iterator();
    let mut one = DataLockWaitCollector::new();
    assert_eq!(
        lookup.fetch(
            &mut one,
            &row.requesting_engine_lock_id,
            &row.blocking_engine_lock_id
        ),
        FetchOutcome::Found { rows: 1 }
    );
    assert_eq!(one.rows()[0], row);

    sys.close(waiter).unwrap();
    let mut gone = DataLockWaitCollector::new();
    assert_eq!(
        lookup.fetch(
            &mut gone,
            &row.requesting_engine_lock_id,
            &row.blocking_engine_lock_id
        ),
        FetchOutcome::NotFound
    );
}

#[test]
fn scan_state_visits_passes_in_order() {
    let mut state = TrxScanState::with_range_size(4);
    let mut passes = vec![state.pass()];
    let ids = [1u64, 9, 17, 3, 30];
    while state.pass() != ScanPass::Done {
        let mut last_start = None;
        loop {
            let start = state.range().start;
            if let Some(prev) = last_start {
                assert!(start > prev);
            }
            last_start = Some(start);
            if matches!(state.pass(), ScanPass::NotStarted) {
                break;
            }
            for id in ids {
                state.admit(id);
            }
            if state.next_range_hint().is_none() {
                break;
            }
            state.advance();
        }
        state.advance();
        if passes.last() != Some(&state.pass()) {
            passes.push(state.pass());
        }
    }
    assert_eq!(
        passes,
        vec![
            ScanPass::NotStarted,
            ScanPass::ScanningRwTrxList,
            ScanPass::ScanningClientTrxList,
            ScanPass::Done,
        ]
    );
}
