#![forbid(unsafe_code)]

use std::fmt;

use phaseout_kernel_contracts::capacity::CapacityRequest;
use phaseout_kernel_contracts::params::{
    round_to, BudgetMode, CanonicalParams, RawParamPayload, FRACTION_DECIMALS,
};
use phaseout_kernel_contracts::{ContractViolation, Validate};
use serde_json::{Map, Value};

pub use phaseout_kernel_contracts::params::{normalize_legacy_fraction, thousandths};

#[derive(Debug, Clone, PartialEq)]
pub enum CanonError {
    Missing { field: &'static str },
    NotNumeric { field: &'static str },
    Negative { field: &'static str },
    TooLarge { field: &'static str, got: f64 },
    NotInteger { field: &'static str },
    NotFlag { field: &'static str },
    ContractViolation(ContractViolation),
}

impl fmt::Display for CanonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonError::Missing { field } => write!(f, "{field} missing"),
            CanonError::NotNumeric { field } => write!(f, "{field} not numeric"),
            CanonError::Negative { field } => write!(f, "{field} negative"),
            CanonError::TooLarge { field, got } => write!(f, "{field} too large ({got})"),
            CanonError::NotInteger { field } => write!(f, "{field} not an integer"),
            CanonError::NotFlag { field } => write!(f, "{field} must be 0 or 1"),
            CanonError::ContractViolation(v) => write!(f, "{v}"),
        }
    }
}

impl std::error::Error for CanonError {}

impl From<ContractViolation> for CanonError {
    fn from(v: ContractViolation) -> Self {
        CanonError::ContractViolation(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanonConfig {
    pub default_scenario_id: i64,
    pub default_earliest_year: i64,
    pub default_latest_year: i64,
    pub default_phaseout_thresh: f64,
    pub default_weight: f64,
    pub default_budget: BudgetMode,
}

impl CanonConfig {
    pub fn mvp_v1() -> Self {
        Self {
            default_scenario_id: 1,
            default_earliest_year: 2030,
            default_latest_year: 2050,
            default_phaseout_thresh: 90.0,
            default_weight: 33.3,
            default_budget: BudgetMode::Shared,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Canonicalizer {
    config: CanonConfig,
}

impl Canonicalizer {
    pub fn new(config: CanonConfig) -> Self {
        Self { config }
    }

    pub fn canonicalize(&self, payload: &RawParamPayload) -> Result<CanonicalParams, CanonError> {
        let scenario_raw = integer_or(
            payload.scenario_id.as_ref(),
            "scenario_id",
            self.config.default_scenario_id,
        )?;
        let scenario_id = match u32::try_from(scenario_raw) {
            Ok(id) => id,
            Err(_) if scenario_raw > 0 => {
                return Err(CanonError::TooLarge {
                    field: "scenario_id",
                    got: scenario_raw as f64,
                })
            }
            Err(_) => {
                return Err(CanonError::ContractViolation(ContractViolation::InvalidValue {
                    field: "scenario_id",
                    reason: "must be >= 1",
                }))
            }
        };
        let earliest_year = year(integer_or(
            payload.earliest_year.as_ref(),
            "earliest_year",
            self.config.default_earliest_year,
        )?)?;
        let latest_year = year(integer_or(
            payload.latest_year.as_ref(),
            "latest_year",
            self.config.default_latest_year,
        )?)?;

        let phaseout_thresh = match payload.phaseout_thresh.as_ref() {
            Some(v) => to_fraction(Some(v), "phaseout_thresh")?,
            None => fraction_from_number(self.config.default_phaseout_thresh, "phaseout_thresh")?,
        };
        let (w_dom_energy, w_gov_revenue, w_employment) = self.weights(payload)?;

        let scale_dep_by_capacity =
            flag_or(payload.scale_dep_by_capacity.as_ref(), "scale_dep_by_capacity", false)?;
        let floating_budget = match payload.floating_budget.as_ref() {
            None | Some(Value::Null) => self.config.default_budget,
            Some(v) => {
                if flag(v, "floating_budget")? {
                    BudgetMode::Shared
                } else {
                    BudgetMode::PerFuel
                }
            }
        };
        let capacity = capacity_request(payload.capacity_settings.as_ref())?;

        let params = CanonicalParams {
            scenario_id,
            earliest_year,
            latest_year,
            phaseout_thresh,
            w_dom_energy,
            w_gov_revenue,
            w_employment,
            scale_dep_by_capacity,
            capacity,
            floating_budget,
        };
        params.validate()?;
        Ok(params)
    }

    /// Explicit `*_frac` fields win, but only when all three are present.
    fn weights(&self, payload: &RawParamPayload) -> Result<(f64, f64, f64), CanonError> {
        if let (Some(d), Some(g), Some(e)) = (
            payload.w_dom_energy_frac.as_ref(),
            payload.w_gov_revenue_frac.as_ref(),
            payload.w_employment_frac.as_ref(),
        ) {
            return Ok((
                clamp_fraction(d, "w_dom_energy_frac")?,
                clamp_fraction(g, "w_gov_revenue_frac")?,
                clamp_fraction(e, "w_employment_frac")?,
            ));
        }
        Ok((
            self.percentish_or_default(payload.w_dom_energy.as_ref(), "w_dom_energy")?,
            self.percentish_or_default(payload.w_gov_revenue.as_ref(), "w_gov_revenue")?,
            self.percentish_or_default(payload.w_employment.as_ref(), "w_employment")?,
        ))
    }

    fn percentish_or_default(
        &self,
        value: Option<&Value>,
        field: &'static str,
    ) -> Result<f64, CanonError> {
        match value {
            Some(v) => to_fraction(Some(v), field),
            None => fraction_from_number(self.config.default_weight, field),
        }
    }
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new(CanonConfig::mvp_v1())
    }
}

/// Percent-or-fraction field to a canonical fraction.
///
/// `v <= 1` is already a fraction, `1 < v <= 100` is a percentage, anything larger is rejected.
/// Strings may carry a trailing `%`.
pub fn to_fraction(value: Option<&Value>, field: &'static str) -> Result<f64, CanonError> {
    let v = value.ok_or(CanonError::Missing { field })?;
    fraction_from_number(numeric(v, field)?, field)
}

fn fraction_from_number(x: f64, field: &'static str) -> Result<f64, CanonError> {
    if !x.is_finite() {
        return Err(CanonError::NotNumeric { field });
    }
    if x < 0.0 {
        return Err(CanonError::Negative { field });
    }
    if x <= 1.0 {
        return Ok(round_to(x, FRACTION_DECIMALS));
    }
    if x <= 100.0 {
        return Ok(round_to(x / 100.0, FRACTION_DECIMALS));
    }
    Err(CanonError::TooLarge { field, got: x })
}

pub fn clamp_fraction(value: &Value, field: &'static str) -> Result<f64, CanonError> {
    let x = numeric(value, field)?;
    Ok(round_to(x, FRACTION_DECIMALS).clamp(0.0, 1.0))
}

fn numeric(value: &Value, field: &'static str) -> Result<f64, CanonError> {
    match value {
        Value::Null => Err(CanonError::Missing { field }),
        Value::Number(n) => n
            .as_f64()
            .filter(|x| x.is_finite())
            .ok_or(CanonError::NotNumeric { field }),
        Value::String(s) => {
            if s.is_empty() {
                return Err(CanonError::Missing { field });
            }
            let t = s.trim();
            let t = t.strip_suffix('%').unwrap_or(t).trim();
            t.parse::<f64>()
                .ok()
                .filter(|x| x.is_finite())
                .ok_or(CanonError::NotNumeric { field })
        }
        _ => Err(CanonError::NotNumeric { field }),
    }
}

fn integer_or(value: Option<&Value>, field: &'static str, default: i64) -> Result<i64, CanonError> {
    match value {
        None | Some(Value::Null) => Ok(default),
        Some(v) => integer(v, field),
    }
}

fn integer(value: &Value, field: &'static str) -> Result<i64, CanonError> {
    let from_float = |x: f64| {
        if x.is_finite() && x.fract() == 0.0 && x.abs() < i64::MAX as f64 {
            Ok(x as i64)
        } else {
            Err(CanonError::NotInteger { field })
        }
    };
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(i),
            None => from_float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                return Err(CanonError::Missing { field });
            }
            match t.parse::<i64>() {
                Ok(i) => Ok(i),
                Err(_) => match t.parse::<f64>() {
                    Ok(x) => from_float(x),
                    Err(_) => Err(CanonError::NotNumeric { field }),
                },
            }
        }
        Value::Null => Err(CanonError::Missing { field }),
        _ => Err(CanonError::NotInteger { field }),
    }
}

fn year(v: i64) -> Result<i32, CanonError> {
    i32::try_from(v).map_err(|_| {
        CanonError::ContractViolation(ContractViolation::InvalidValue {
            field: "year",
            reason: "must fit in a 32-bit integer",
        })
    })
}

fn flag_or(value: Option<&Value>, field: &'static str, default: bool) -> Result<bool, CanonError> {
    match value {
        None | Some(Value::Null) => Ok(default),
        Some(v) => flag(v, field),
    }
}

fn flag(value: &Value, field: &'static str) -> Result<bool, CanonError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 0.0 => Ok(false),
            Some(x) if x == 1.0 => Ok(true),
            _ => Err(CanonError::NotFlag { field }),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" => Err(CanonError::Missing { field }),
            "0" | "false" => Ok(false),
            "1" | "true" => Ok(true),
            _ => Err(CanonError::NotFlag { field }),
        },
        Value::Null => Err(CanonError::Missing { field }),
        _ => Err(CanonError::NotFlag { field }),
    }
}

/// Inside the capacity block an empty string means "not given".
fn blank_as_none(value: Option<&Value>) -> Option<&Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(v) => Some(v),
    }
}

fn optional_integer(
    map: &Map<String, Value>,
    key: &str,
    field: &'static str,
) -> Result<Option<i64>, CanonError> {
    blank_as_none(map.get(key))
        .map(|v| integer(v, field))
        .transpose()
}

fn capacity_request(raw: Option<&Value>) -> Result<CapacityRequest, CanonError> {
    let Some(Value::Object(map)) = raw else {
        return Ok(CapacityRequest::default());
    };
    let capacity_name = match map.get("capacity_name") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(_) => {
            return Err(CanonError::ContractViolation(ContractViolation::InvalidValue {
                field: "capacity_settings.capacity_name",
                reason: "must be a string",
            }))
        }
    };
    let low_thresh = optional_integer(map, "low_thresh", "capacity_settings.low_thresh")?;
    let high_thresh = optional_integer(map, "high_thresh", "capacity_settings.high_thresh")?;
    let interp_btw_thresh = match blank_as_none(map.get("interp_btw_thresh")) {
        Some(v) => flag(v, "capacity_settings.interp_btw_thresh")?,
        None => false,
    };
    let resp_since = optional_integer(map, "resp_since", "capacity_settings.resp_since")?
        .map(|v| {
            i32::try_from(v).map_err(|_| CanonError::NotInteger {
                field: "capacity_settings.resp_since",
            })
        })
        .transpose()?;
    let r_weight = blank_as_none(map.get("r_weight"))
        .map(|v| to_fraction(Some(v), "capacity_settings.r_weight"))
        .transpose()?;

    Ok(CapacityRequest {
        capacity_name,
        low_thresh,
        high_thresh,
        interp_btw_thresh,
        resp_since,
        r_weight,
    })
}
