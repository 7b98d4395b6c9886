//! Durability, retention and compaction of a running engine.

use std::fs::OpenOptions;

use tandem_column::Aggregate;
use tandem_common::config::{EngineConfig, LogSyncMode};
use tandem_common::constants::MIN_LOG_SEGMENT_SIZE;
use tandem_common::types::{ColumnDef, ColumnType, RowId, SeqNo, Value};
use tandem_common::TandemError;
use tandem_engine::{Engine, Query, Staleness, SNAPSHOT_FILE};
use tandem_test::utils::{account_row, load_accounts, manual_engine, newest_segment, ACCOUNTS};

fn count_and_sum(engine: &Engine, table: tandem_common::types::TableId) -> (Value, Value) {
    let latest = engine.last_committed();
    let result = engine
        .query(
            &Query::aggregate(table, Aggregate::new().count().sum("amount"))
                .with_staleness(Staleness::AtLeast(latest)),
        )
        .unwrap();
    let aggregate = result.aggregate().unwrap();
    (
        aggregate.scalar("count(*)").cloned().unwrap(),
        aggregate.scalar("sum(amount)").cloned().unwrap(),
    )
}

#[test]
fn test_restart_replays_change_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::with_data_dir(dir.path());

    let (table, ledger, before, last) = {
        let (engine, table) = manual_engine(config.clone());
        let ledger = engine
            .create_table("ledger", vec![ColumnDef::new("entry", ColumnType::Text)])
            .unwrap();
        load_accounts(&engine, table, 500, 21);
        let before = engine.get(table, RowId::new(7)).unwrap();
        engine
            .put(table, RowId::new(7), account_row(1, "FEE"), engine.begin_txn())
            .unwrap();
        engine.delete(table, RowId::new(8), engine.begin_txn()).unwrap();
        engine
            .put(ledger, RowId::new(1), vec![Value::text("opened")], engine.begin_txn())
            .unwrap();
        engine.sync_now().unwrap();
        let totals = count_and_sum(&engine, table);
        engine.shutdown().unwrap();
        (table, ledger, (before, totals), engine.last_committed())
    };

    let (engine, reopened) = manual_engine(config);
    assert_eq!(reopened, table);
    assert_eq!(engine.table_id("ledger").unwrap(), ledger);
    assert_eq!(engine.last_committed(), last);
    assert_eq!(engine.watermark(), last);

    let (old_seven, totals) = before;
    assert_eq!(engine.get(table, RowId::new(7)).unwrap().values.as_ref(), &account_row(1, "FEE"));
    assert_eq!(
        engine.get_as_of(table, RowId::new(7), old_seven.seq).unwrap().values,
        old_seven.values
    );
    assert!(matches!(engine.get(table, RowId::new(8)), Err(TandemError::NotFound { .. })));
    assert_eq!(engine.get(ledger, RowId::new(1)).unwrap().values[0], Value::text("opened"));
    assert_eq!(count_and_sum(&engine, table), totals);

    let txn = engine.begin_txn();
    let seq = engine.put(table, RowId::new(9_999), account_row(5, "DEPOSIT"), txn).unwrap();
    assert_eq!(seq, last.next());
}

#[test]
fn test_torn_tail_drops_only_the_last_change() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::with_data_dir(dir.path());

    let last = {
        let (engine, table) = manual_engine(config.clone());
        load_accounts(&engine, table, 100, 4);
        engine.last_committed()
    };

    let segment = newest_segment(dir.path()).unwrap();
    let len = std::fs::metadata(&segment).unwrap().len();
    let file = OpenOptions::new().write(true).open(&segment).unwrap();
    file.set_len(len - 5).unwrap();
    drop(file);

    let (engine, table) = manual_engine(config.clone());
    assert_eq!(engine.last_committed(), last.prev());
    assert!(matches!(engine.get(table, RowId::new(100)), Err(TandemError::NotFound { .. })));
    assert!(engine.get(table, RowId::new(99)).is_ok());

    let seq = engine
        .put(table, RowId::new(100), account_row(42, "DEPOSIT"), engine.begin_txn())
        .unwrap();
    assert_eq!(seq, last);
    drop(engine);

    let (engine, table) = manual_engine(config);
    assert_eq!(engine.last_committed(), last);
    assert_eq!(engine.get(table, RowId::new(100)).unwrap().values[0], Value::decimal(42, 2));
}

#[test]
fn test_retention_keeps_unpublished_entries() {
    let (engine, table) = manual_engine(EngineConfig::for_testing());
    load_accounts(&engine, table, 100, 8);
    engine.sync_now().unwrap();
    assert_eq!(engine.stats().retained_entries, 0);

    for i in 1..=50u64 {
        engine
            .put(table, RowId::new(i), account_row(i as i128, "WITHDRAWAL"), engine.begin_txn())
            .unwrap();
    }
    let stats = engine.stats();
    assert_eq!(stats.watermark, SeqNo::new(100));
    assert_eq!(stats.lag, 50);
    assert_eq!(stats.retained_entries, 50);

    engine.sync_now().unwrap();
    let stats = engine.stats();
    assert_eq!(stats.lag, 0);
    assert_eq!(stats.retained_entries, 0);
}

#[test]
fn test_compaction_preserves_results() {
    let run = |compaction: bool| {
        let mut config = EngineConfig::for_testing();
        config.sync.batch_max_rows = 40;
        config.sync.compaction = compaction;
        let (engine, table) = manual_engine(config);
        load_accounts(&engine, table, 1_200, 13);
        for i in (1..=1_200u64).step_by(3) {
            engine.delete(table, RowId::new(i), engine.begin_txn()).unwrap();
        }
        for i in (2..=1_200u64).step_by(5) {
            engine
                .put(table, RowId::new(i), account_row(77, "FEE"), engine.begin_txn())
                .unwrap();
        }
        engine.sync_now().unwrap();
        let grouped = engine
            .query(&Query::aggregate(table, Aggregate::new().group_by("type").count().sum("amount")))
            .unwrap()
            .aggregate()
            .unwrap()
            .clone();
        (count_and_sum(&engine, table), grouped, engine.stats().columns)
    };

    let (plain_totals, plain_groups, plain_stats) = run(false);
    let (compacted_totals, compacted_groups, compacted_stats) = run(true);
    assert_eq!(compacted_totals, plain_totals);
    assert_eq!(compacted_groups, plain_groups);
    assert!(compacted_stats.compactions > 0);
    assert!(compacted_stats.chunk_groups < plain_stats.chunk_groups);
    assert_eq!(compacted_stats.live_rows, plain_stats.live_rows);
}

#[test]
fn test_catalog_survives_without_rows() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::with_data_dir(dir.path());
    drop(manual_engine(config.clone()));
    let engine = Engine::open_manual(config).unwrap();
    assert!(engine.table_id(ACCOUNTS).is_ok());
    assert_eq!(engine.last_committed(), SeqNo::ZERO);
    assert!(matches!(
        engine.create_table(ACCOUNTS, Vec::new()),
        Err(TandemError::TableExists { .. }) | Err(TandemError::SchemaMismatch { .. })
    ));
}

fn purging_config(dir: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::with_data_dir(dir);
    config.change_log = config
        .change_log
        .with_segment_size(MIN_LOG_SEGMENT_SIZE)
        .with_sync_mode(LogSyncMode::Never)
        .with_purge_segments(true);
    config
}

#[test]
fn test_purged_segments_keep_committed_rows() {
    let dir = tempfile::tempdir().unwrap();
    let config = purging_config(dir.path());

    let (table, totals, last) = {
        let (engine, table) = manual_engine(config.clone());
        load_accounts(&engine, table, 20_000, 31);
        engine.delete(table, RowId::new(2), engine.begin_txn()).unwrap();
        engine.sync_now().unwrap();
        let segments = engine.stats().log.purged_segments;
        assert_eq!(segments, 0);

        let checkpoint = engine.checkpoint().unwrap();
        assert_eq!(checkpoint, engine.last_committed());
        assert!(engine.stats().log.purged_segments > 0);
        assert!(dir.path().join(SNAPSHOT_FILE).exists());

        engine
            .put(table, RowId::new(1), account_row(7, "FEE"), engine.begin_txn())
            .unwrap();
        engine.sync_now().unwrap();
        let totals = count_and_sum(&engine, table);
        engine.shutdown().unwrap();
        (table, totals, engine.last_committed())
    };

    let (engine, reopened) = manual_engine(config);
    assert_eq!(reopened, table);
    assert_eq!(engine.last_committed(), last);
    assert_eq!(engine.watermark(), last);
    assert_eq!(engine.get(table, RowId::new(1)).unwrap().values.as_ref(), &account_row(7, "FEE"));
    assert!(matches!(engine.get(table, RowId::new(2)), Err(TandemError::NotFound { .. })));
    assert!(engine.get(table, RowId::new(20_000)).is_ok());
    assert_eq!(count_and_sum(&engine, table), totals);
    assert_eq!(totals.0, Value::Int64(19_999));

    let seq = engine
        .put(table, RowId::new(30_000), account_row(1, "DEPOSIT"), engine.begin_txn())
        .unwrap();
    assert_eq!(seq, last.next());
}

#[test]
fn test_crash_after_checkpoint_replays_newer_entries() {
    let dir = tempfile::tempdir().unwrap();
    let config = purging_config(dir.path());

    let (table, checkpoint, last) = {
        let (engine, table) = manual_engine(config.clone());
        load_accounts(&engine, table, 5_000, 8);
        engine.sync_now().unwrap();
        let checkpoint = engine.checkpoint().unwrap();
        for i in 1..=10u64 {
            engine
                .put(table, RowId::new(i), account_row(i as i128, "WITHDRAWAL"), engine.begin_txn())
                .unwrap();
        }
        engine.delete(table, RowId::new(11), engine.begin_txn()).unwrap();
        let last = engine.last_committed();
        // Crash: no final checkpoint, the newer entries exist only in the log.
        std::mem::forget(engine);
        (table, checkpoint, last)
    };
    assert!(last > checkpoint);

    let (engine, _) = manual_engine(config);
    assert_eq!(engine.last_committed(), last);
    for i in 1..=10u64 {
        assert_eq!(
            engine.get(table, RowId::new(i)).unwrap().values[0],
            Value::decimal(i as i128, 2)
        );
    }
    assert!(matches!(engine.get(table, RowId::new(11)), Err(TandemError::NotFound { .. })));
    assert_eq!(count_and_sum(&engine, table).0, Value::Int64(4_999));
}
