mod workload;

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use falcon_common::config::{FalconLockConfig, ObservabilityConfig};
use falcon_data_locks::{
    DataLockCollector, DataLockInspector, DataLockRow, DataLockWaitCollector, DataLockWaitRow,
    FalconDataLockInspector, FetchOutcome,
};
use falcon_txn::LockSys;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Table {
    /// One row per table lock and per locked row.
    Locks,
    /// One row per lock wait edge.
    Waits,
}

#[derive(Parser, Debug)]
#[command(
    name = "falcon-lock-inspect",
    about = "Page through the data locks and lock waits of a synthetic FalconDB workload"
)]
struct Cli {
    /// Config file path.
    #[arg(short, long, default_value = "falcon_locks.toml")]
    config: String,

    /// Table to read.
    #[arg(long, value_enum, default_value_t = Table::Locks)]
    table: Table,

    /// Print rows as JSON lines.
    #[arg(long)]
    json: bool,

    /// Look up rows by engine lock id instead of scanning. For waits use
    /// `REQUESTING,BLOCKING`.
    #[arg(long)]
    fetch: Vec<String>,

    /// Transaction-id window per scan call (overrides config).
    #[arg(long)]
    scan_range_size: Option<u64>,

    /// Leave the LOCK_DATA column empty.
    #[arg(long)]
    no_lock_data: bool,

    /// Metrics listen address (overrides config).
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Print the default configuration as TOML and exit.
    #[arg(long)]
    print_default_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_default_config {
        let toml_str = toml::to_string_pretty(&FalconLockConfig::default())
            .context("failed to serialize default config")?;
        println!("{}", toml_str);
        return Ok(());
    }

    let path = Path::new(&cli.config);
    let loaded = FalconLockConfig::load(path);
    let log_filter = match &loaded {
        Ok(config) => config.observability.log_filter.clone(),
        Err(_) => ObservabilityConfig::default().log_filter,
    };
    falcon_observability::init_tracing(&log_filter);
    let mut config = FalconLockConfig::or_default(path, loaded);

    if let Some(size) = cli.scan_range_size {
        config.data_locks.scan_range_size = size;
    }
    if cli.no_lock_data {
        config.data_locks.with_lock_data = false;
    }
    config.validate()?;
    tracing::debug!("Config: {:?}", config);

    let metrics_addr = cli
        .metrics_addr
        .clone()
        .unwrap_or_else(|| config.observability.metrics_listen_addr.clone());
    if !metrics_addr.is_empty() {
        if let Err(e) = falcon_observability::init_metrics(&metrics_addr) {
            tracing::warn!("Failed to initialize metrics: {}", e);
        }
    }

    let lock_sys = Arc::new(LockSys::new());
    if let Err(e) = workload::populate(&lock_sys, &config.workload) {
        tracing::error!(kind = ?e.kind(), "workload setup failed: {}", e);
        return Err(e).context("failed to build workload");
    }

    let inspector = FalconDataLockInspector::new(lock_sys.clone(), config.data_locks.clone());
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match (cli.table, cli.fetch.is_empty()) {
        (Table::Locks, true) => scan_locks(&inspector, cli.json, &mut out)?,
        (Table::Locks, false) => fetch_locks(&inspector, &cli.fetch, cli.json, &mut out)?,
        (Table::Waits, true) => scan_waits(&inspector, cli.json, &mut out)?,
        (Table::Waits, false) => fetch_waits(&inspector, &cli.fetch, cli.json, &mut out)?,
    }
    out.flush()?;

    let report = lock_sys.latch_metrics();
    falcon_observability::record_latch_metrics(&report);
    tracing::info!("{}", report);
    Ok(())
}

fn scan_locks(inspector: &FalconDataLockInspector, json: bool, out: &mut impl Write) -> Result<()> {
    let with_lock_data = inspector.config().with_lock_data;
    let mut it = inspector.create_data_lock_iterator();
    let mut sink = DataLockCollector::new();
    let mut batches = 0usize;
    let mut total = 0usize;
    loop {
        let progress = it.scan(&mut sink, with_lock_data);
        let rows = sink.take_rows();
        falcon_observability::record_data_lock_call("data_locks", "scan", rows.len());
        batches += 1;
        total += rows.len();
        for row in &rows {
            write_lock_row(out, row, json)?;
        }
        if progress.is_done() {
            break;
        }
    }
    tracing::info!(batches, rows = total, "data_locks scan complete");
    Ok(())
}

fn fetch_locks(
    inspector: &FalconDataLockInspector,
    ids: &[String],
    json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let with_lock_data = inspector.config().with_lock_data;
    let mut it = inspector.create_data_lock_iterator();
    for id in ids {
        let mut sink = DataLockCollector::new();
        let outcome = it.fetch(&mut sink, id, with_lock_data);
        falcon_observability::record_data_lock_call("data_locks", "fetch", sink.rows().len());
        match outcome {
            FetchOutcome::Found { .. } => {
                for row in sink.rows() {
                    write_lock_row(out, row, json)?;
                }
            }
            FetchOutcome::NotFound => writeln!(out, "{}: not found", id)?,
        }
    }
    Ok(())
}

fn scan_waits(inspector: &FalconDataLockInspector, json: bool, out: &mut impl Write) -> Result<()> {
    let mut it = inspector.create_data_lock_wait_iterator();
    let mut sink = DataLockWaitCollector::new();
    let mut batches = 0usize;
    let mut total = 0usize;
    loop {
        let progress = it.scan(&mut sink);
        let rows = sink.take_rows();
        falcon_observability::record_data_lock_call("data_lock_waits", "scan", rows.len());
        batches += 1;
        total += rows.len();
        for row in &rows {
            write_wait_row(out, row, json)?;
        }
        if progress.is_done() {
            break;
        }
    }
    tracing::info!(batches, rows = total, "data_lock_waits scan complete");
    Ok(())
}

fn fetch_waits(
    inspector: &FalconDataLockInspector,
    pairs: &[String],
    json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let mut it = inspector.create_data_lock_wait_iterator();
    for pair in pairs {
        let Some((requesting, blocking)) = pair.split_once(',') else {
            bail!("wait lookup '{}' must be REQUESTING,BLOCKING", pair);
        };
        let mut sink = DataLockWaitCollector::new();
        let outcome = it.fetch(&mut sink, requesting, blocking);
        falcon_observability::record_data_lock_call("data_lock_waits", "fetch", sink.rows().len());
        match outcome {
            FetchOutcome::Found { .. } => {
                for row in sink.rows() {
                    write_wait_row(out, row, json)?;
                }
            }
            FetchOutcome::NotFound => writeln!(out, "{}: not found", pair)?,
        }
    }
    Ok(())
}

fn write_lock_row(out: &mut impl Write, row: &DataLockRow, json: bool) -> Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string(row)?)?;
        return Ok(());
    }
    let mut object = format!("{}.{}", row.object_schema, row.object_name);
    if let Some(p) = &row.partition_name {
        object.push_str(&format!(" PARTITION {}", p));
    }
    if let Some(sp) = &row.subpartition_name {
        object.push_str(&format!(" SUBPARTITION {}", sp));
    }
    writeln!(
        out,
        "{:<28} {:>20} {:>6} {:<32} {:<16} {:<6} {:<24} {:<8} {}",
        row.engine_lock_id,
        row.engine_transaction_id,
        row.thread_id,
        object,
        row.index_name.as_deref().unwrap_or("-"),
        row.lock_type,
        row.lock_mode,
        row.lock_status,
        row.lock_data.as_deref().unwrap_or("-"),
    )?;
    Ok(())
}

fn write_wait_row(out: &mut impl Write, row: &DataLockWaitRow, json: bool) -> Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string(row)?)?;
        return Ok(());
    }
    writeln!(
        out,
        "{:<28} (trx {}, thread {}) waits for {:<28} (trx {}, thread {})",
        row.requesting_engine_lock_id,
        row.requesting_engine_transaction_id,
        row.requesting_thread_id,
        row.blocking_engine_lock_id,
        row.blocking_engine_transaction_id,
        row.blocking_thread_id,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use falcon_common::config::WorkloadConfig;

    fn inspector(workload: WorkloadConfig) -> FalconDataLockInspector {
        let sys = Arc::new(LockSys::new());
        workload::populate(&sys, &workload).unwrap();
        let mut config = FalconLockConfig::default();
        config.data_locks.scan_range_size = 4;
        FalconDataLockInspector::new(sys, config.data_locks)
    }

    fn small() -> WorkloadConfig {
        WorkloadConfig {
            rw_transactions: 6,
            read_only_transactions: 2,
            records_per_transaction: 2,
            waiters: 2,
        }
    }

    #[test]
    fn test_cli_parses_fetch_list() {
        let cli = Cli::parse_from([
            "falcon-lock-inspect",
            "--table",
            "waits",
            "--fetch",
            "7:5:0:2,1:5:0:2",
            "--json",
        ]);
        assert_eq!(cli.table, Table::Waits);
        assert_eq!(cli.fetch, vec!["7:5:0:2,1:5:0:2".to_string()]);
        assert!(cli.json);
    }

    #[test]
    fn test_scan_locks_prints_every_row() {
        let mut out = Vec::new();
        scan_locks(&inspector(small()), false, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        // 6 rw: table + 2 rows; 2 read-only: table + 1 row; 2 waiters: table + 1 row.
        assert_eq!(text.lines().count(), 6 * 3 + 2 * 2 + 2 * 2);
        assert!(text.contains("WAITING"));
        assert!(text.contains("demo.history PARTITION p2024"));
    }

    #[test]
    fn test_scan_waits_json() {
        let mut out = Vec::new();
        scan_waits(&inspector(small()), true, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let rows: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["engine"] == "FALCON"));
    }

    #[test]
    fn test_fetch_waits_requires_pair() {
        let mut out = Vec::new();
        let err = fetch_waits(&inspector(small()), &["1:1".to_string()], false, &mut out);
        assert!(err.is_err());
    }

    #[test]
    fn test_fetch_locks_reports_missing() {
        let mut out = Vec::new();
        fetch_locks(
            &inspector(small()),
            &["1:1".to_string(), "424242:1".to_string()],
            false,
            &mut out,
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("1:1 "));
        assert_eq!(lines[1], "424242:1: not found");
    }
}
