#![forbid(unsafe_code)]

use log::{debug, info, warn};

use phaseout_engines::canon::Canonicalizer;
use phaseout_kernel_contracts::params::{
    CanonicalParams, ParamSetKey, ParameterSetRecord, RawParamPayload,
};
use phaseout_kernel_contracts::results::{ResultStatus, SubmitResponse};
use phaseout_kernel_contracts::UnixTimeSecs;
use phaseout_storage::param_store::ParamStore;
use phaseout_storage::repo::{ParamSetReadRepo, ParamSetWriteRepo};

use crate::capacity::{CapacityResolveMode, CapacitySettingsResolver};
use crate::clock::Clock;
use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamCacheConfig {
    /// Retries after a `TransactionConflict` before the request fails as `StoreUnavailable`.
    pub tx_retry_limit: u32,
}

impl ParamCacheConfig {
    pub fn mvp_v1() -> Self {
        Self { tx_retry_limit: 3 }
    }
}

/// Picks the row a key resolves to: calculated rows first, then the oldest.
pub fn select_match<R>(repo: &R, key: &ParamSetKey) -> Option<ParameterSetRecord>
where
    R: ParamSetReadRepo + ?Sized,
{
    let rows = repo.param_set_rows_matching(key);
    let pick = rows
        .iter()
        .position(|r| r.is_calculated)
        .unwrap_or(0);
    rows.into_iter().nth(pick)
}

#[derive(Debug, Clone)]
pub struct ParamSetCache {
    config: ParamCacheConfig,
    canonicalizer: Canonicalizer,
    resolver: CapacitySettingsResolver,
}

impl Default for ParamSetCache {
    fn default() -> Self {
        Self::new(ParamCacheConfig::mvp_v1(), Canonicalizer::default())
    }
}

impl ParamSetCache {
    pub fn new(config: ParamCacheConfig, canonicalizer: Canonicalizer) -> Self {
        Self {
            config,
            canonicalizer,
            resolver: CapacitySettingsResolver,
        }
    }

    pub fn config(&self) -> ParamCacheConfig {
        self.config
    }

    pub fn submit(
        &self,
        store: &ParamStore,
        clock: &dyn Clock,
        payload: &RawParamPayload,
        mode: CapacityResolveMode,
    ) -> Result<SubmitResponse, ServiceError> {
        let params = self.canonicalizer.canonicalize(payload)?;
        self.find_or_create(store, clock, &params, mode)
    }

    pub fn find_or_create(
        &self,
        store: &ParamStore,
        clock: &dyn Clock,
        params: &CanonicalParams,
        mode: CapacityResolveMode,
    ) -> Result<SubmitResponse, ServiceError> {
        self.retry_conflicts(|| {
            let now = clock.now();
            store.transaction_with(|tx| self.find_or_create_in(tx, params, mode, now))
        })
    }

    fn retry_conflicts<T>(
        &self,
        mut attempt: impl FnMut() -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut retries = 0u32;
        loop {
            match attempt() {
                Err(err) if err.is_retryable() => {
                    if retries >= self.config.tx_retry_limit {
                        warn!("param set find-or-create gave up after {} retries", retries);
                        return Err(ServiceError::StoreUnavailable(format!(
                            "transaction conflict persisted after {retries} retries"
                        )));
                    }
                    retries += 1;
                    debug!("param set find-or-create conflict, retry {}", retries);
                }
                out => return out,
            }
        }
    }

    fn find_or_create_in<W>(
        &self,
        repo: &mut W,
        params: &CanonicalParams,
        mode: CapacityResolveMode,
        now: UnixTimeSecs,
    ) -> Result<SubmitResponse, ServiceError>
    where
        W: ParamSetWriteRepo + ?Sized,
    {
        let capacity =
            self.resolver
                .resolve(repo, params.scale_dep_by_capacity, &params.capacity, mode)?;
        let cap_settings_id = capacity.capacity_settings_id();
        let tuple = params.resolved(cap_settings_id)?;
        let key = tuple.key();

        if let Some(row) = select_match(&*repo, &key) {
            repo.touch_param_set_row(row.result_id, now)?;
            info!(
                "param set matched result_id={} status={} key={}",
                row.result_id.0,
                row.status().as_str(),
                key.fingerprint_hex()
            );
            return Ok(SubmitResponse {
                status: row.status(),
                result_id: row.result_id,
                existing: true,
                cap_settings_id,
            });
        }

        let row = repo.insert_param_set_row(&tuple, now)?;
        info!(
            "param set created result_id={} key={}",
            row.result_id.0,
            key.fingerprint_hex()
        );
        Ok(SubmitResponse {
            status: ResultStatus::Pending,
            result_id: row.result_id,
            existing: false,
            cap_settings_id,
        })
    }
}
