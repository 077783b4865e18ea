#![forbid(unsafe_code)]

use std::fs;
use std::io::Write;

use phaseout_kernel_contracts::capacity::CapacitySettingsSpec;
use phaseout_kernel_contracts::params::{BudgetMode, CanonicalTuple, ResultId};
use phaseout_kernel_contracts::UnixTimeSecs;
use phaseout_storage::param_store::{ParamStore, StorageError, StoreConfig};
use phaseout_storage::repo::{ParamSetReadRepo, ParamSetWriteRepo};

fn tuple(w_dom: f64) -> CanonicalTuple {
    CanonicalTuple::v1(1, 2030, 2050, 0.9, w_dom, 0.2, 0.3, None, BudgetMode::PerFuel).unwrap()
}

fn journaled(path: &std::path::Path) -> ParamStore {
    ParamStore::open(StoreConfig::mvp_v1().with_journal(path.to_path_buf())).unwrap()
}

#[test]
fn at_journal_db_01_replay_restores_rows_and_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store/param_store.jsonl");

    let id = {
        let store = journaled(&path);
        store
            .transaction(|tx| {
                tx.insert_capacity_settings_row(CapacitySettingsSpec::preset_v1(
                    "CSER Medium Progressivity",
                )?)
            })
            .unwrap();
        let id = store
            .transaction(|tx| Ok(tx.insert_param_set_row(&tuple(0.5), UnixTimeSecs(10))?.result_id))
            .unwrap();
        store
            .transaction(|tx| tx.touch_param_set_row(id, UnixTimeSecs(20)))
            .unwrap();
        store.mark_calculated(id, UnixTimeSecs(30)).unwrap();
        id
    };

    let reopened = journaled(&path);
    let counts = reopened.counts().unwrap();
    assert_eq!(counts.param_sets, 1);
    assert_eq!(counts.capacity_settings, 1);
    let row = reopened.read(|t| t.param_set_row(id)).unwrap().unwrap();
    assert!(row.is_calculated);
    assert_eq!(row.date_calculated, Some(UnixTimeSecs(30)));
    assert_eq!(row.date_last_used, UnixTimeSecs(20));
    assert_eq!(
        reopened
            .read(|t| t.capacity_settings_rows_named("cser medium progressivity"))
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn at_journal_db_02_rolled_back_transaction_not_journaled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("param_store.jsonl");
    {
        let store = journaled(&path);
        let _ = store.transaction(|tx| {
            tx.insert_param_set_row(&tuple(0.5), UnixTimeSecs(10))?;
            Err::<(), _>(StorageError::Unavailable {
                reason: "injected".to_string(),
            })
        });
        // Read-only transactions write nothing either.
        store.transaction(|_| Ok(())).unwrap();
    }
    assert_eq!(fs::read_to_string(&path).unwrap(), "");
    assert_eq!(journaled(&path).counts().unwrap().param_sets, 0);
}

#[test]
fn at_journal_db_03_corrupt_line_fails_open_with_line_number() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("param_store.jsonl");
    {
        let store = journaled(&path);
        store
            .transaction(|tx| tx.insert_param_set_row(&tuple(0.5), UnixTimeSecs(10)))
            .unwrap();
    }
    let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(b"{not json\n").unwrap();
    drop(f);

    let err = ParamStore::open(StoreConfig::mvp_v1().with_journal(path.clone())).unwrap_err();
    assert!(matches!(err, StorageError::JournalCorrupt { line: 2, .. }));
}

#[test]
fn at_journal_db_04_unsupported_schema_version_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("param_store.jsonl");
    fs::write(&path, "{\"schema_version\":2,\"ops\":[]}\n").unwrap();
    let err = ParamStore::open(StoreConfig::mvp_v1().with_journal(path)).unwrap_err();
    match err {
        StorageError::JournalCorrupt { line, reason } => {
            assert_eq!(line, 1);
            assert!(reason.contains("schema_version=2"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn at_journal_db_05_percent_encoded_rows_normalized_on_replay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("param_store.jsonl");
    let line = serde_json::json!({
        "schema_version": 1,
        "ops": [{
            "op": "import_parameter_set",
            "record": {
                "schema_version": 1,
                "result_id": 7,
                "is_calculated": true,
                "date_calculated": 100,
                "date_last_used": 100,
                "scenario_id": 1,
                "earliest_year": 2030,
                "latest_year": 2050,
                "phaseout_thresh": 90.0,
                "w_dom_energy": 33.3,
                "w_gov_revenue": 33.3,
                "w_employment": 33.3,
                "capacity_settings_id": null,
                "floating_budget": 1
            }
        }]
    });
    fs::write(&path, format!("{line}\n")).unwrap();

    let store = journaled(&path);
    let row = store.read(|t| t.param_set_row(ResultId(7))).unwrap().unwrap();
    assert_eq!(row.phaseout_thresh, 0.9);
    assert_eq!(row.w_dom_energy, 0.333);
    assert_eq!(row.floating_budget, BudgetMode::Shared);

    let even = CanonicalTuple::v1(
        1,
        2030,
        2050,
        0.9,
        0.333,
        0.333,
        0.333,
        None,
        BudgetMode::Shared,
    )
    .unwrap();
    let hits = store.read(|t| t.param_set_rows_matching(&even.key())).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].result_id, ResultId(7));
}

#[test]
fn at_journal_db_06_compaction_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("param_store.jsonl");
    {
        let store = journaled(&path);
        for w in [0.1, 0.2, 0.3] {
            let id = store
                .transaction(|tx| Ok(tx.insert_param_set_row(&tuple(w), UnixTimeSecs(10))?.result_id))
                .unwrap();
            store
                .transaction(|tx| tx.touch_param_set_row(id, UnixTimeSecs(11)))
                .unwrap();
        }
        store.mark_calculated(ResultId(2), UnixTimeSecs(12)).unwrap();
        assert_eq!(store.compact_journal().unwrap(), 3);
    }
    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 1);

    let store = journaled(&path);
    assert_eq!(store.counts().unwrap().param_sets, 3);
    let row = store.read(|t| t.param_set_row(ResultId(2))).unwrap().unwrap();
    assert!(row.is_calculated);
    assert_eq!(row.date_last_used, UnixTimeSecs(11));
    let next = store
        .transaction(|tx| tx.insert_param_set_row(&tuple(0.4), UnixTimeSecs(20)))
        .unwrap();
    assert_eq!(next.result_id, ResultId(4));
}

#[test]
fn at_journal_db_07_unterminated_tail_is_dropped_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("param_store.jsonl");
    let id = {
        let store = journaled(&path);
        store
            .transaction(|tx| Ok(tx.insert_param_set_row(&tuple(0.5), UnixTimeSecs(10))?.result_id))
            .unwrap()
    };
    let committed = fs::read_to_string(&path).unwrap();
    let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(br#"{"schema_version":1,"ops":[{"op":"touch_la"#).unwrap();
    drop(f);

    let store = journaled(&path);
    assert_eq!(store.counts().unwrap().param_sets, 1);
    let row = store.read(|t| t.param_set_row(id)).unwrap().unwrap();
    assert_eq!(row.date_last_used, UnixTimeSecs(10));
    assert_eq!(fs::read_to_string(&path).unwrap(), committed);

    // The next commit starts on a clean line.
    store
        .transaction(|tx| tx.insert_param_set_row(&tuple(0.6), UnixTimeSecs(11)))
        .unwrap();
    drop(store);
    assert_eq!(journaled(&path).counts().unwrap().param_sets, 2);
    assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
}

#[test]
fn at_journal_db_08_commits_compact_past_the_op_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("param_store.jsonl");
    let config = StoreConfig {
        compact_every_ops: 4,
        ..StoreConfig::mvp_v1().with_journal(path.clone())
    };
    {
        let store = ParamStore::open(config.clone()).unwrap();
        let id = store
            .transaction(|tx| Ok(tx.insert_param_set_row(&tuple(0.5), UnixTimeSecs(10))?.result_id))
            .unwrap();
        for at in 11..=40 {
            store
                .transaction(|tx| tx.touch_param_set_row(id, UnixTimeSecs(at)))
                .unwrap();
            assert!(fs::read_to_string(&path).unwrap().lines().count() < 4);
            assert!(store.journal_ops_since_compaction() < 4);
        }
    }
    let store = ParamStore::open(config).unwrap();
    assert_eq!(store.counts().unwrap().param_sets, 1);
    let row = store.read(|t| t.param_set_row(ResultId(1))).unwrap().unwrap();
    assert_eq!(row.date_last_used, UnixTimeSecs(40));
}
