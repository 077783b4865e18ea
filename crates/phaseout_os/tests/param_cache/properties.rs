#![forbid(unsafe_code)]

use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::{json, Value};

use phaseout_kernel_contracts::capacity::CapacitySettingsId;
use phaseout_kernel_contracts::params::{RawParamPayload, ResultId};
use phaseout_kernel_contracts::results::ResultStatus;
use phaseout_kernel_contracts::UnixTimeSecs;
use phaseout_os::capacity::{
    CapacityResolveMode, CapacitySettingsResolver, SEEDED_CAPACITY_PRESETS,
};
use phaseout_os::clock::FixedClock;
use phaseout_os::lookup::LookupService;
use phaseout_os::param_cache::ParamSetCache;
use phaseout_os::ServiceError;
use phaseout_storage::param_store::ParamStore;

fn payload(v: Value) -> RawParamPayload {
    serde_json::from_value(v).unwrap()
}

fn base() -> Value {
    json!({
        "scenario_id": 1,
        "earliest_year": 2030,
        "latest_year": 2050,
        "phaseout_thresh": 90,
        "w_dom_energy": 33.3,
        "w_gov_revenue": 33.3,
        "w_employment": 33.3,
        "scale_dep_by_capacity": 0,
        "floating_budget": 1
    })
}

fn with(mut v: Value, key: &str, field: Value) -> Value {
    v[key] = field;
    v
}

fn submit(
    store: &ParamStore,
    clock: &FixedClock,
    v: Value,
) -> Result<(ResultId, ResultStatus, bool), ServiceError> {
    ParamSetCache::default()
        .submit(store, clock, &payload(v), CapacityResolveMode::Strict)
        .map(|r| (r.result_id, r.status, r.existing))
}

fn seeded() -> ParamStore {
    let store = ParamStore::new_in_memory();
    for name in SEEDED_CAPACITY_PRESETS {
        CapacitySettingsResolver.seed_preset(&store, name).unwrap();
    }
    store
}

#[test]
fn at_param_cache_props_01_worked_example() {
    let store = ParamStore::new_in_memory();
    let clock = FixedClock::new(1_700_000_000);
    assert_eq!(
        submit(&store, &clock, base()).unwrap(),
        (ResultId(1), ResultStatus::Pending, false)
    );
    assert_eq!(
        submit(&store, &clock, base()).unwrap(),
        (ResultId(1), ResultStatus::Pending, true)
    );
    assert_eq!(store.counts().unwrap().param_sets, 1);
}

#[test]
fn at_param_cache_props_02_percent_and_fraction_encodings_agree() {
    let store = ParamStore::new_in_memory();
    let clock = FixedClock::new(1);
    let (id, _, _) = submit(&store, &clock, base()).unwrap();
    for thresh in [json!(0.9), json!("90"), json!("90%"), json!(" 90 % ")] {
        let (again, _, existing) =
            submit(&store, &clock, with(base(), "phaseout_thresh", thresh.clone())).unwrap();
        assert_eq!(again, id, "phaseout_thresh={thresh}");
        assert!(existing);
    }
    let fractions = json!({
        "w_dom_energy": 1, "w_gov_revenue": 1, "w_employment": 1,
        "w_dom_energy_frac": 0.333, "w_gov_revenue_frac": 0.3333, "w_employment_frac": 0.333
    });
    let mut v = base();
    for (k, f) in fractions.as_object().unwrap() {
        v[k] = f.clone();
    }
    assert_eq!(submit(&store, &clock, v).unwrap().0, id);
}

#[test]
fn at_param_cache_props_03_bucketing_boundary() {
    let store = ParamStore::new_in_memory();
    let clock = FixedClock::new(1);
    let (id, _, _) = submit(&store, &clock, base()).unwrap();
    let (same, _, _) = submit(&store, &clock, with(base(), "w_dom_energy", json!(33.33))).unwrap();
    assert_eq!(same, id);
    let (other, _, existing) =
        submit(&store, &clock, with(base(), "w_dom_energy", json!(33.4))).unwrap();
    assert_ne!(other, id);
    assert!(!existing);
}

#[test]
fn at_param_cache_props_04_capacity_off_equivalence() {
    let store = seeded();
    let clock = FixedClock::new(1);
    let (id, _, _) = submit(&store, &clock, base()).unwrap();

    let named_off = with(
        with(base(), "scale_dep_by_capacity", json!(1)),
        "capacity_settings",
        json!({"capacity_name": "OFF"}),
    );
    assert_eq!(submit(&store, &clock, named_off).unwrap().0, id);

    let flag_off = with(
        base(),
        "capacity_settings",
        json!({"capacity_name": "CSER High Capacity"}),
    );
    assert_eq!(submit(&store, &clock, flag_off).unwrap().0, id);

    let scaled = with(
        with(base(), "scale_dep_by_capacity", json!(1)),
        "capacity_settings",
        json!({"capacity_name": "cser high capacity"}),
    );
    let r = ParamSetCache::default()
        .submit(&store, &clock, &payload(scaled), CapacityResolveMode::Strict)
        .unwrap();
    assert_ne!(r.result_id, id);
    assert_eq!(r.cap_settings_id, Some(CapacitySettingsId(1)));
}

#[test]
fn at_param_cache_props_05_unknown_preset_strict_vs_lookup() {
    let store = seeded();
    let clock = FixedClock::new(1);
    let v = with(
        with(base(), "scale_dep_by_capacity", json!(1)),
        "capacity_settings",
        json!({"capacity_name": "Unseeded"}),
    );
    let err = submit(&store, &clock, v.clone()).unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(ref m) if m.contains("'Unseeded' not found")));
    assert_eq!(store.counts().unwrap().param_sets, 0);

    let looked = LookupService::default().lookup(&store, &payload(v)).unwrap();
    assert_eq!(looked.status, ResultStatus::Missing);
    assert_eq!(looked.result_id, None);
}

#[test]
fn at_param_cache_props_06_ids_strictly_increase() {
    let store = ParamStore::new_in_memory();
    let clock = FixedClock::new(1);
    let mut last = 0;
    for year in 2030..2036 {
        let (id, status, existing) =
            submit(&store, &clock, with(base(), "earliest_year", json!(year))).unwrap();
        assert!(id.0 > last);
        assert_eq!(status, ResultStatus::Pending);
        assert!(!existing);
        last = id.0;
    }
    assert_eq!(last, 6);
}

#[test]
fn at_param_cache_props_07_concurrent_identical_submissions_share_one_row() {
    const N: usize = 8;
    let store = Arc::new(ParamStore::new_in_memory());
    let clock = Arc::new(FixedClock::new(1));
    let barrier = Arc::new(Barrier::new(N));
    let handles: Vec<_> = (0..N)
        .map(|_| {
            let store = Arc::clone(&store);
            let clock = Arc::clone(&clock);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                submit(&store, &clock, base()).unwrap()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(store.counts().unwrap().param_sets, 1);
    assert!(results.iter().all(|(id, _, _)| *id == ResultId(1)));
    assert_eq!(results.iter().filter(|(_, _, existing)| !existing).count(), 1);
}

#[test]
fn at_param_cache_props_08_invalid_input_rejected_before_store() {
    let store = ParamStore::new_in_memory();
    let clock = FixedClock::new(1);
    let cases = [
        with(base(), "phaseout_thresh", json!(150)),
        with(base(), "w_dom_energy", json!(-1)),
        with(base(), "w_gov_revenue", json!("abc")),
        with(base(), "w_employment", json!("")),
        with(base(), "floating_budget", json!(2)),
        with(base(), "earliest_year", json!(2060)),
    ];
    for v in cases {
        let err = submit(&store, &clock, v.clone()).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)), "payload={v}");
    }
    assert_eq!(store.counts().unwrap().param_sets, 0);
}

#[test]
fn at_param_cache_props_09_upsert_creates_custom_bundle_once() {
    let store = ParamStore::new_in_memory();
    let clock = FixedClock::new(1);
    let v = with(
        with(base(), "scale_dep_by_capacity", json!(1)),
        "capacity_settings",
        json!({"low_thresh": 100, "high_thresh": "", "interp_btw_thresh": 1, "r_weight": 50}),
    );
    let cache = ParamSetCache::default();
    let a = cache
        .submit(&store, &clock, &payload(v.clone()), CapacityResolveMode::Upsert)
        .unwrap();
    let b = cache
        .submit(&store, &clock, &payload(v), CapacityResolveMode::Upsert)
        .unwrap();
    assert_eq!(a.cap_settings_id, Some(CapacitySettingsId(1)));
    assert_eq!(b.cap_settings_id, a.cap_settings_id);
    assert_eq!(b.result_id, a.result_id);
    assert!(b.existing);
    assert_eq!(store.counts().unwrap().capacity_settings, 1);
}

#[test]
fn at_param_cache_props_10_calculated_row_reported_ready() {
    let store = ParamStore::new_in_memory();
    let clock = FixedClock::new(1);
    let (id, _, _) = submit(&store, &clock, base()).unwrap();
    store.mark_calculated(id, UnixTimeSecs(5)).unwrap();
    assert_eq!(
        submit(&store, &clock, base()).unwrap(),
        (id, ResultStatus::Ready, true)
    );
}
