#![forbid(unsafe_code)]

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::capacity::{CapacityRequest, CapacitySettingsId};
use crate::common::validate_fraction;
use crate::results::ResultStatus;
use crate::{ContractViolation, SchemaVersion, UnixTimeSecs, Validate};

pub const FRACTION_DECIMALS: i32 = 12;
/// Stored values above this are percent-encoded leftovers and get divided by 100.
pub const LEGACY_PERCENT_CUTOFF: f64 = 1.000_000_1;
pub const YEAR_MIN: i32 = 1900;
pub const YEAR_MAX: i32 = 2200;

pub fn round_to(v: f64, places: i32) -> f64 {
    let m = 10f64.powi(places);
    (v * m).round() / m
}

/// Integerized matching bucket for a canonical fraction (`0.333` -> `333`).
pub fn thousandths(fraction: f64) -> u32 {
    (fraction * 1000.0).round().clamp(0.0, 1000.0) as u32
}

pub fn normalize_legacy_fraction(v: f64) -> f64 {
    if v > LEGACY_PERCENT_CUTOFF {
        round_to(v / 100.0, FRACTION_DECIMALS)
    } else {
        v
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultId(pub u64);

/// `floating_budget` flag: 1 = one shared budget, 0 = separate budgets per fuel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum BudgetMode {
    PerFuel,
    Shared,
}

impl BudgetMode {
    pub fn flag(self) -> u8 {
        match self {
            BudgetMode::PerFuel => 0,
            BudgetMode::Shared => 1,
        }
    }

    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(BudgetMode::PerFuel),
            1 => Some(BudgetMode::Shared),
            _ => None,
        }
    }
}

impl From<BudgetMode> for u8 {
    fn from(m: BudgetMode) -> u8 {
        m.flag()
    }
}

impl TryFrom<u8> for BudgetMode {
    type Error = String;

    fn try_from(flag: u8) -> Result<Self, Self::Error> {
        BudgetMode::from_flag(flag).ok_or_else(|| format!("floating_budget flag {flag} is not 0 or 1"))
    }
}

/// Submission body as received. Numeric fields may be numbers or strings; absent and `null` are
/// the same thing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawParamPayload {
    pub scenario_id: Option<Value>,
    pub earliest_year: Option<Value>,
    pub latest_year: Option<Value>,
    pub phaseout_thresh: Option<Value>,
    pub w_dom_energy: Option<Value>,
    pub w_gov_revenue: Option<Value>,
    pub w_employment: Option<Value>,
    pub w_dom_energy_frac: Option<Value>,
    pub w_gov_revenue_frac: Option<Value>,
    pub w_employment_frac: Option<Value>,
    pub scale_dep_by_capacity: Option<Value>,
    pub capacity_settings: Option<Value>,
    pub floating_budget: Option<Value>,
}

/// Canonical fields of a submission, capacity block not yet resolved to an id.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalParams {
    pub scenario_id: u32,
    pub earliest_year: i32,
    pub latest_year: i32,
    pub phaseout_thresh: f64,
    pub w_dom_energy: f64,
    pub w_gov_revenue: f64,
    pub w_employment: f64,
    pub scale_dep_by_capacity: bool,
    pub capacity: CapacityRequest,
    pub floating_budget: BudgetMode,
}

impl CanonicalParams {
    pub fn resolved(
        &self,
        capacity_settings_id: Option<CapacitySettingsId>,
    ) -> Result<CanonicalTuple, ContractViolation> {
        CanonicalTuple::v1(
            self.scenario_id,
            self.earliest_year,
            self.latest_year,
            self.phaseout_thresh,
            self.w_dom_energy,
            self.w_gov_revenue,
            self.w_employment,
            capacity_settings_id,
            self.floating_budget,
        )
    }
}

impl Validate for CanonicalParams {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_common(
            self.scenario_id,
            self.earliest_year,
            self.latest_year,
            [
                self.phaseout_thresh,
                self.w_dom_energy,
                self.w_gov_revenue,
                self.w_employment,
            ],
        )?;
        if let Some(w) = self.capacity.r_weight {
            validate_fraction("canonical_params.capacity.r_weight", w)?;
        }
        Ok(())
    }
}

/// Fully canonical tuple handed to the find-or-create engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTuple {
    pub scenario_id: u32,
    pub earliest_year: i32,
    pub latest_year: i32,
    pub phaseout_thresh: f64,
    pub w_dom_energy: f64,
    pub w_gov_revenue: f64,
    pub w_employment: f64,
    pub capacity_settings_id: Option<CapacitySettingsId>,
    pub floating_budget: BudgetMode,
}

impl CanonicalTuple {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        scenario_id: u32,
        earliest_year: i32,
        latest_year: i32,
        phaseout_thresh: f64,
        w_dom_energy: f64,
        w_gov_revenue: f64,
        w_employment: f64,
        capacity_settings_id: Option<CapacitySettingsId>,
        floating_budget: BudgetMode,
    ) -> Result<Self, ContractViolation> {
        let t = Self {
            scenario_id,
            earliest_year,
            latest_year,
            phaseout_thresh,
            w_dom_energy,
            w_gov_revenue,
            w_employment,
            capacity_settings_id,
            floating_budget,
        };
        t.validate()?;
        Ok(t)
    }

    pub fn scale_by_capacity(&self) -> bool {
        self.capacity_settings_id.is_some()
    }

    pub fn key(&self) -> ParamSetKey {
        ParamSetKey {
            scenario_id: self.scenario_id,
            earliest_year: self.earliest_year,
            latest_year: self.latest_year,
            phaseout_milli: thousandths(self.phaseout_thresh),
            w_dom_milli: thousandths(self.w_dom_energy),
            w_gov_milli: thousandths(self.w_gov_revenue),
            w_emp_milli: thousandths(self.w_employment),
            capacity_settings_id: self.capacity_settings_id,
            floating_budget: self.floating_budget,
        }
    }
}

impl Validate for CanonicalTuple {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_common(
            self.scenario_id,
            self.earliest_year,
            self.latest_year,
            [
                self.phaseout_thresh,
                self.w_dom_energy,
                self.w_gov_revenue,
                self.w_employment,
            ],
        )
    }
}

/// Equality key of a parameter set. Two tuples are the same set iff their keys are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamSetKey {
    pub scenario_id: u32,
    pub earliest_year: i32,
    pub latest_year: i32,
    pub phaseout_milli: u32,
    pub w_dom_milli: u32,
    pub w_gov_milli: u32,
    pub w_emp_milli: u32,
    pub capacity_settings_id: Option<CapacitySettingsId>,
    pub floating_budget: BudgetMode,
}

impl ParamSetKey {
    pub fn scale_by_capacity(&self) -> bool {
        self.capacity_settings_id.is_some()
    }

    /// Stable short digest used in logs and error keys.
    pub fn fingerprint_hex(&self) -> String {
        let cap = match self.capacity_settings_id {
            Some(id) => id.0.to_string(),
            None => "null".to_string(),
        };
        let canonical = format!(
            "param_set_key_v1|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.scenario_id,
            self.earliest_year,
            self.latest_year,
            self.phaseout_milli,
            self.w_dom_milli,
            self.w_gov_milli,
            self.w_emp_milli,
            cap,
            self.floating_budget.flag(),
        );
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(16);
        for b in digest.iter().take(8) {
            let _ = write!(out, "{b:02x}");
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSetRecord {
    pub schema_version: SchemaVersion,
    pub result_id: ResultId,
    pub is_calculated: bool,
    pub date_calculated: Option<UnixTimeSecs>,
    pub date_last_used: UnixTimeSecs,
    pub scenario_id: u32,
    pub earliest_year: i32,
    pub latest_year: i32,
    pub phaseout_thresh: f64,
    pub w_dom_energy: f64,
    pub w_gov_revenue: f64,
    pub w_employment: f64,
    pub capacity_settings_id: Option<CapacitySettingsId>,
    pub floating_budget: BudgetMode,
}

impl ParameterSetRecord {
    pub fn v1_pending(
        result_id: ResultId,
        tuple: &CanonicalTuple,
        now: UnixTimeSecs,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: SchemaVersion(1),
            result_id,
            is_calculated: false,
            date_calculated: None,
            date_last_used: now,
            scenario_id: tuple.scenario_id,
            earliest_year: tuple.earliest_year,
            latest_year: tuple.latest_year,
            phaseout_thresh: tuple.phaseout_thresh,
            w_dom_energy: tuple.w_dom_energy,
            w_gov_revenue: tuple.w_gov_revenue,
            w_employment: tuple.w_employment,
            capacity_settings_id: tuple.capacity_settings_id,
            floating_budget: tuple.floating_budget,
        };
        r.validate()?;
        Ok(r)
    }

    /// Rewrites percent-encoded threshold and weights into fractions.
    pub fn with_legacy_values_normalized(mut self) -> Self {
        self.phaseout_thresh = normalize_legacy_fraction(self.phaseout_thresh);
        self.w_dom_energy = normalize_legacy_fraction(self.w_dom_energy);
        self.w_gov_revenue = normalize_legacy_fraction(self.w_gov_revenue);
        self.w_employment = normalize_legacy_fraction(self.w_employment);
        self
    }

    pub fn scale_by_capacity(&self) -> bool {
        self.capacity_settings_id.is_some()
    }

    pub fn status(&self) -> ResultStatus {
        if self.is_calculated {
            ResultStatus::Ready
        } else {
            ResultStatus::Pending
        }
    }

    pub fn match_key(&self) -> ParamSetKey {
        ParamSetKey {
            scenario_id: self.scenario_id,
            earliest_year: self.earliest_year,
            latest_year: self.latest_year,
            phaseout_milli: thousandths(self.phaseout_thresh),
            w_dom_milli: thousandths(self.w_dom_energy),
            w_gov_milli: thousandths(self.w_gov_revenue),
            w_emp_milli: thousandths(self.w_employment),
            capacity_settings_id: self.capacity_settings_id,
            floating_budget: self.floating_budget,
        }
    }
}

impl Validate for ParameterSetRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.result_id.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "parameter_set_record.result_id",
                reason: "must be > 0",
            });
        }
        if self.is_calculated && self.date_calculated.is_none() {
            return Err(ContractViolation::InvalidValue {
                field: "parameter_set_record.date_calculated",
                reason: "must be set once is_calculated",
            });
        }
        validate_common(
            self.scenario_id,
            self.earliest_year,
            self.latest_year,
            [
                self.phaseout_thresh,
                self.w_dom_energy,
                self.w_gov_revenue,
                self.w_employment,
            ],
        )
    }
}

fn validate_common(
    scenario_id: u32,
    earliest_year: i32,
    latest_year: i32,
    fractions: [f64; 4],
) -> Result<(), ContractViolation> {
    if scenario_id == 0 {
        return Err(ContractViolation::InvalidValue {
            field: "scenario_id",
            reason: "must be >= 1",
        });
    }
    for (field, year) in [("earliest_year", earliest_year), ("latest_year", latest_year)] {
        if !(YEAR_MIN..=YEAR_MAX).contains(&year) {
            return Err(ContractViolation::InvalidRange {
                field,
                min: YEAR_MIN as f64,
                max: YEAR_MAX as f64,
                got: year as f64,
            });
        }
    }
    if earliest_year > latest_year {
        return Err(ContractViolation::InvalidValue {
            field: "earliest_year",
            reason: "must be <= latest_year",
        });
    }
    let names = [
        "phaseout_thresh",
        "w_dom_energy",
        "w_gov_revenue",
        "w_employment",
    ];
    for (field, v) in names.into_iter().zip(fractions) {
        validate_fraction(field, v)?;
    }
    Ok(())
}
