//! Resource governance under analytical saturation.
//!
//! A burst of analytical scans must not push transactional latency far past
//! what the same writes see on an idle engine.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use tandem_column::Aggregate;
use tandem_common::config::EngineConfig;
use tandem_common::types::{RowId, TableId, Value};
use tandem_common::TandemError;
use tandem_engine::{Engine, Query, Staleness, WorkloadClass};
use tandem_test::utils::{account_row, load_accounts, manual_engine};

const SCANS: usize = 100;
const PUTS: usize = 10;
const ROWS: u64 = 20_000;

fn saturation_engine() -> (Arc<Engine>, TableId) {
    let mut config = EngineConfig::for_testing();
    config.sync.batch_max_rows = 256;
    config.governor = config
        .governor
        .with_max_parallelism(4)
        .with_analytical_share(0.5)
        .with_admission_timeout(Duration::from_secs(30));
    config.governor.max_queued = 4 * SCANS;
    let (engine, table) = manual_engine(config);
    load_accounts(&engine, table, ROWS, 5);
    engine.sync_now().unwrap();
    (Arc::new(engine), table)
}

fn timed_put(engine: &Engine, table: TableId, i: usize) -> Duration {
    let start = Instant::now();
    engine
        .put(table, RowId::new(ROWS + 1 + i as u64), account_row(i as i128, "DEPOSIT"), engine.begin_txn())
        .unwrap();
    start.elapsed()
}

fn median(mut samples: Vec<Duration>) -> Duration {
    samples.sort();
    samples[samples.len() / 2]
}

#[test]
fn test_puts_stay_fast_under_scan_burst() {
    let (engine, table) = saturation_engine();
    let baseline = median((0..PUTS).map(|i| timed_put(&engine, table, i)).collect());

    let query = Query::aggregate(table, Aggregate::new().group_by("type").count().sum("amount"))
        .with_staleness(Staleness::Any);
    let start = Arc::new(Barrier::new(SCANS + 1));
    let scans: Vec<_> = (0..SCANS)
        .map(|_| {
            let (engine, query, start) = (Arc::clone(&engine), query.clone(), Arc::clone(&start));
            thread::spawn(move || {
                start.wait();
                match engine.query(&query) {
                    Ok(_) => true,
                    Err(TandemError::Rejected { .. }) => false,
                    Err(err) => panic!("scan failed: {}", err),
                }
            })
        })
        .collect();
    start.wait();
    thread::sleep(Duration::from_millis(5));

    let loaded: Vec<Duration> = (0..PUTS).map(|i| timed_put(&engine, table, PUTS + i)).collect();
    let completed = scans.into_iter().map(|s| s.join().unwrap()).filter(|&ok| ok).count();

    let loaded = median(loaded);
    let bound = (baseline * 50).max(Duration::from_millis(50));
    assert!(
        loaded <= bound,
        "median put latency {:?} under load exceeds {:?} (baseline {:?})",
        loaded,
        bound,
        baseline
    );
    assert!(completed > 0);

    let stats = engine.governor().stats();
    assert_eq!(stats.transactional_running, 0);
    assert_eq!(stats.analytical_running, 0);
    assert!(stats.analytical_admitted >= completed as u64);
}

#[test]
fn test_scans_yield_to_waiting_puts() {
    let (engine, table) = saturation_engine();
    let query = Query::aggregate(table, Aggregate::new().count()).with_staleness(Staleness::Any);

    let scans: Vec<_> = (0..8)
        .map(|_| {
            let (engine, query) = (Arc::clone(&engine), query.clone());
            thread::spawn(move || {
                let mut completed = 0;
                for _ in 0..5 {
                    match engine.query(&query) {
                        Ok(result) => {
                            assert_eq!(
                                result.aggregate().unwrap().scalar("count(*)"),
                                Some(&Value::Int64(ROWS as i64))
                            );
                            completed += 1;
                        }
                        Err(TandemError::Rejected { .. }) => {}
                        Err(err) => panic!("scan failed: {}", err),
                    }
                }
                completed
            })
        })
        .collect();
    for i in 0..200 {
        timed_put(&engine, table, 1_000 + i);
    }
    let completed: usize = scans.into_iter().map(|s| s.join().unwrap()).sum();
    assert!(completed > 0);
    let stats = engine.governor().stats();
    assert_eq!(stats.rejected as usize, 40 - completed);
    assert_eq!((stats.transactional_running, stats.analytical_running), (0, 0));

    let latest = engine.sync_now().unwrap();
    let count = engine
        .query(&query.clone().with_staleness(Staleness::AtLeast(latest)))
        .unwrap();
    assert_eq!(
        count.aggregate().unwrap().scalar("count(*)"),
        Some(&Value::Int64(ROWS as i64 + 200))
    );
}

#[test]
fn test_put_admitted_while_scan_yields() {
    let mut config = EngineConfig::for_testing();
    config.governor = config
        .governor
        .with_max_parallelism(2)
        .with_admission_timeout(Duration::from_secs(5))
        .with_max_yield(Duration::from_secs(5));
    let (engine, table) = manual_engine(config);
    let engine = Arc::new(engine);

    let busy = engine.governor().admit(WorkloadClass::Transactional).unwrap();
    let scan = engine.governor().admit(WorkloadClass::Analytical).unwrap();

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let seq = engine.put(table, RowId::new(7), account_row(700, "DEPOSIT"), engine.begin_txn())?;
            Ok::<_, TandemError>((seq, engine.governor().stats()))
        })
    };
    while engine.governor().stats().queued == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    let started = Instant::now();
    scan.checkpoint().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    let (seq, during) = writer.join().unwrap().unwrap();
    assert_eq!(seq, engine.last_committed());
    assert_eq!(during.analytical_running, 0);
    assert_eq!(during.borrowed, 1);
    assert_eq!(engine.governor().stats().analytical_running, 1);

    drop(scan);
    drop(busy);
    let row = engine
        .query(&Query::point(table, RowId::new(7)).with_staleness(Staleness::Fresh))
        .unwrap();
    assert_eq!(row.rows().unwrap().len(), 1);
}
