#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::capacity::CapacitySettingsId;
use crate::params::{ParameterSetRecord, ResultId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ready,
    Pending,
    Missing,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Ready => "ready",
            ResultStatus::Pending => "pending",
            ResultStatus::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: ResultStatus,
    pub result_id: ResultId,
    pub existing: bool,
    pub cap_settings_id: Option<CapacitySettingsId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResponse {
    pub status: ResultStatus,
    pub result_id: Option<ResultId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_calculated: Option<u8>,
}

impl LookupResponse {
    pub fn missing() -> Self {
        Self {
            status: ResultStatus::Missing,
            result_id: None,
            is_calculated: None,
        }
    }

    pub fn found(record: &ParameterSetRecord) -> Self {
        Self {
            status: record.status(),
            result_id: Some(record.result_id),
            is_calculated: Some(u8::from(record.is_calculated)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub result_id: ResultId,
    pub status: ResultStatus,
    pub is_calculated: u8,
    pub date_calculated: Option<u64>,
    pub date_last_used: u64,
}

impl StatusResponse {
    pub fn from_record(record: &ParameterSetRecord) -> Self {
        Self {
            result_id: record.result_id,
            status: record.status(),
            is_calculated: u8::from(record.is_calculated),
            date_calculated: record.date_calculated.map(|t| t.0),
            date_last_used: record.date_last_used.0,
        }
    }
}
