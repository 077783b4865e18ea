#![forbid(unsafe_code)]

use log::debug;

use phaseout_engines::canon::Canonicalizer;
use phaseout_kernel_contracts::params::{CanonicalParams, RawParamPayload};
use phaseout_kernel_contracts::results::LookupResponse;
use phaseout_storage::param_store::{ParamStore, ParamTables};

use crate::capacity::{CapacityResolution, CapacitySettingsResolver};
use crate::error::ServiceError;
use crate::param_cache::select_match;

#[derive(Debug, Clone, Default)]
pub struct LookupService {
    canonicalizer: Canonicalizer,
    resolver: CapacitySettingsResolver,
}

impl LookupService {
    pub fn new(canonicalizer: Canonicalizer) -> Self {
        Self {
            canonicalizer,
            resolver: CapacitySettingsResolver,
        }
    }

    pub fn lookup(
        &self,
        store: &ParamStore,
        payload: &RawParamPayload,
    ) -> Result<LookupResponse, ServiceError> {
        let params = self.canonicalizer.canonicalize(payload)?;
        self.lookup_canonical(store, &params)
    }

    pub fn lookup_canonical(
        &self,
        store: &ParamStore,
        params: &CanonicalParams,
    ) -> Result<LookupResponse, ServiceError> {
        store.read(|tables| self.lookup_in(tables, params))?
    }

    fn lookup_in(
        &self,
        tables: &ParamTables,
        params: &CanonicalParams,
    ) -> Result<LookupResponse, ServiceError> {
        let cap = match self.resolver.resolve_for_lookup(
            tables,
            params.scale_dep_by_capacity,
            &params.capacity,
        ) {
            CapacityResolution::Missing => {
                debug!("param lookup: capacity preset not seeded, reporting missing");
                return Ok(LookupResponse::missing());
            }
            resolved => resolved.capacity_settings_id(),
        };
        let tuple = params.resolved(cap)?;
        Ok(select_match(tables, &tuple.key())
            .map(|row| LookupResponse::found(&row))
            .unwrap_or_else(LookupResponse::missing))
    }
}
