#![forbid(unsafe_code)]

use phaseout_kernel_contracts::capacity::{CapacitySettingsId, CapacitySettingsSpec};
use phaseout_storage::param_store::{ParamStore, StorageError};
use phaseout_storage::repo::{ParamSetReadRepo, ParamSetWriteRepo};

fn spec(name: &str, low: Option<i64>, r_weight: Option<f64>) -> CapacitySettingsSpec {
    CapacitySettingsSpec::v1(name.to_string(), low, Some(500), true, Some(2000), r_weight).unwrap()
}

#[test]
fn at_cap_db_01_name_lookup_ignores_case_and_spacing() {
    let store = ParamStore::new_in_memory();
    store
        .transaction(|tx| {
            tx.insert_capacity_settings_row(CapacitySettingsSpec::preset_v1("CSER High Capacity")?)
        })
        .unwrap();

    for probe in ["CSER High Capacity", "cser high capacity", "  CSER   HIGH capacity "] {
        let rows = store.read(|t| t.capacity_settings_rows_named(probe)).unwrap();
        assert_eq!(rows.len(), 1, "probe={probe:?}");
        assert_eq!(rows[0].capacity_settings_id, CapacitySettingsId(1));
        assert_eq!(rows[0].spec.capacity_name, "CSER High Capacity");
    }
    assert!(store
        .read(|t| t.capacity_settings_rows_named("CSER Medium Progressivity"))
        .unwrap()
        .is_empty());
}

#[test]
fn at_cap_db_02_exact_duplicate_rejected_variants_allowed() {
    let store = ParamStore::new_in_memory();
    store
        .transaction(|tx| tx.insert_capacity_settings_row(spec("custom", Some(100), Some(0.5))))
        .unwrap();

    let dup = store.transaction(|tx| {
        tx.insert_capacity_settings_row(spec("Custom", Some(100), Some(0.5)))
    });
    assert!(matches!(
        dup,
        Err(StorageError::DuplicateKey {
            table: "capacity_settings.settings",
            ..
        })
    ));

    let variant = store
        .transaction(|tx| tx.insert_capacity_settings_row(spec("custom", None, Some(0.5))))
        .unwrap();
    assert_eq!(variant.capacity_settings_id, CapacitySettingsId(2));
    assert_eq!(
        store
            .read(|t| t.capacity_settings_rows_named("custom"))
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn at_cap_db_03_exact_match_is_null_safe() {
    let store = ParamStore::new_in_memory();
    store
        .transaction(|tx| {
            tx.insert_capacity_settings_row(spec("custom", None, None))?;
            tx.insert_capacity_settings_row(spec("custom", Some(0), None))
        })
        .unwrap();

    let unset = store
        .read(|t| t.capacity_settings_row_exact(&spec("CUSTOM", None, None)))
        .unwrap()
        .unwrap();
    assert_eq!(unset.capacity_settings_id, CapacitySettingsId(1));

    let zero = store
        .read(|t| t.capacity_settings_row_exact(&spec("custom", Some(0), None)))
        .unwrap()
        .unwrap();
    assert_eq!(zero.capacity_settings_id, CapacitySettingsId(2));

    assert!(store
        .read(|t| t.capacity_settings_row_exact(&spec("custom", Some(0), Some(0.0))))
        .unwrap()
        .is_none());
}

#[test]
fn at_cap_db_04_off_and_blank_names_never_stored() {
    assert!(CapacitySettingsSpec::preset_v1("off").is_err());
    assert!(CapacitySettingsSpec::preset_v1(" OFF ").is_err());
    assert!(CapacitySettingsSpec::preset_v1("   ").is_err());
    assert!(CapacitySettingsSpec::preset_v1(&"x".repeat(129)).is_err());
}

#[test]
fn at_cap_db_05_ids_increase_and_rollback_frees_nothing_visible() {
    let store = ParamStore::new_in_memory();
    let a = store
        .transaction(|tx| tx.insert_capacity_settings_row(CapacitySettingsSpec::preset_v1("a")?))
        .unwrap();
    let _ = store.transaction(|tx| {
        tx.insert_capacity_settings_row(CapacitySettingsSpec::preset_v1("b")?)?;
        Err::<(), _>(StorageError::Unavailable {
            reason: "injected".to_string(),
        })
    });
    let c = store
        .transaction(|tx| tx.insert_capacity_settings_row(CapacitySettingsSpec::preset_v1("c")?))
        .unwrap();
    assert_eq!(a.capacity_settings_id, CapacitySettingsId(1));
    assert_eq!(c.capacity_settings_id, CapacitySettingsId(2));
    assert_eq!(store.counts().unwrap().capacity_settings, 2);
}
