#![forbid(unsafe_code)]

use phaseout_kernel_contracts::params::ResultId;
use phaseout_kernel_contracts::results::StatusResponse;
use phaseout_storage::param_store::ParamStore;
use phaseout_storage::repo::ParamSetReadRepo;

use crate::error::ServiceError;

#[derive(Debug, Default, Clone, Copy)]
pub struct StatusReporter;

impl StatusReporter {
    /// Current computation state of `result_id`. Takes the raw request value so that zero and
    /// negative ids are rejected before the store is touched.
    pub fn status(&self, store: &ParamStore, result_id: i64) -> Result<StatusResponse, ServiceError> {
        let id = u64::try_from(result_id)
            .ok()
            .filter(|id| *id > 0)
            .map(ResultId)
            .ok_or_else(|| ServiceError::InvalidInput("Missing result_id".to_string()))?;
        store
            .read(|tables| tables.param_set_row(id))?
            .map(|row| StatusResponse::from_record(&row))
            .ok_or_else(|| ServiceError::NotFound("Unknown result_id".to_string()))
    }
}
