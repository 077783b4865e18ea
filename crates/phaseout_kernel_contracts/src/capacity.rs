#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::common::validate_fraction;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const CAPACITY_NAME_MAX_LEN: usize = 128;
pub const CAPACITY_OFF_NAME: &str = "off";
/// Name given to an unnamed bundle on the create-or-reuse path.
pub const CAPACITY_DEFAULT_CUSTOM_NAME: &str = "custom";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapacitySettingsId(pub u64);

/// Matching form of a preset name: NFKC, trimmed, inner whitespace collapsed, lowercased.
pub fn normalize_capacity_name(raw: &str) -> String {
    let composed: String = raw.nfkc().collect();
    composed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn is_off_capacity_name(raw: &str) -> bool {
    let n = normalize_capacity_name(raw);
    n.is_empty() || n == CAPACITY_OFF_NAME
}

/// Capacity block of a submission after field canonicalization, before it is resolved to an id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CapacityRequest {
    /// `None` when the caller sent no name at all; `Some("")` when it sent an empty one.
    pub capacity_name: Option<String>,
    pub low_thresh: Option<i64>,
    pub high_thresh: Option<i64>,
    pub interp_btw_thresh: bool,
    pub resp_since: Option<i32>,
    pub r_weight: Option<f64>,
}

impl CapacityRequest {
    pub fn named(name: &str) -> Self {
        Self {
            capacity_name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn into_spec(self, fallback_name: &str) -> Result<CapacitySettingsSpec, ContractViolation> {
        let name = self
            .capacity_name
            .unwrap_or_else(|| fallback_name.to_string());
        CapacitySettingsSpec::v1(
            name,
            self.low_thresh,
            self.high_thresh,
            self.interp_btw_thresh,
            self.resp_since,
            self.r_weight,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacitySettingsSpec {
    pub capacity_name: String,
    pub low_thresh: Option<i64>,
    pub high_thresh: Option<i64>,
    pub interp_btw_thresh: bool,
    pub resp_since: Option<i32>,
    pub r_weight: Option<f64>,
}

impl CapacitySettingsSpec {
    pub fn v1(
        capacity_name: String,
        low_thresh: Option<i64>,
        high_thresh: Option<i64>,
        interp_btw_thresh: bool,
        resp_since: Option<i32>,
        r_weight: Option<f64>,
    ) -> Result<Self, ContractViolation> {
        let s = Self {
            capacity_name: capacity_name.trim().to_string(),
            low_thresh,
            high_thresh,
            interp_btw_thresh,
            resp_since,
            r_weight,
        };
        s.validate()?;
        Ok(s)
    }

    /// Preset with every sub-field unset, as seeded for the dashboard's named options.
    pub fn preset_v1(capacity_name: &str) -> Result<Self, ContractViolation> {
        Self::v1(capacity_name.to_string(), None, None, false, None, None)
    }

    pub fn normalized_name(&self) -> String {
        normalize_capacity_name(&self.capacity_name)
    }

    /// NULL-safe equality on all six fields; the name compares in its normalized form.
    pub fn same_settings(&self, other: &CapacitySettingsSpec) -> bool {
        self.normalized_name() == other.normalized_name()
            && self.low_thresh == other.low_thresh
            && self.high_thresh == other.high_thresh
            && self.interp_btw_thresh == other.interp_btw_thresh
            && self.resp_since == other.resp_since
            && self.r_weight == other.r_weight
    }
}

impl Validate for CapacitySettingsSpec {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.capacity_name.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "capacity_settings.capacity_name",
                reason: "must not be empty",
            });
        }
        if self.capacity_name.chars().count() > CAPACITY_NAME_MAX_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "capacity_settings.capacity_name",
                reason: "must be <= 128 chars",
            });
        }
        if is_off_capacity_name(&self.capacity_name) {
            return Err(ContractViolation::InvalidValue {
                field: "capacity_settings.capacity_name",
                reason: "must not name the off preset",
            });
        }
        if let Some(w) = self.r_weight {
            validate_fraction("capacity_settings.r_weight", w)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacitySettingsRecord {
    pub schema_version: SchemaVersion,
    pub capacity_settings_id: CapacitySettingsId,
    #[serde(flatten)]
    pub spec: CapacitySettingsSpec,
}

impl CapacitySettingsRecord {
    pub fn v1(
        capacity_settings_id: CapacitySettingsId,
        spec: CapacitySettingsSpec,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: SchemaVersion(1),
            capacity_settings_id,
            spec,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for CapacitySettingsRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.capacity_settings_id.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "capacity_settings_record.capacity_settings_id",
                reason: "must be > 0",
            });
        }
        self.spec.validate()
    }
}
