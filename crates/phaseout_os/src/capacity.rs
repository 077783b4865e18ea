#![forbid(unsafe_code)]

use log::{debug, info};

use phaseout_kernel_contracts::capacity::{
    is_off_capacity_name, CapacityRequest, CapacitySettingsId, CapacitySettingsSpec,
    CAPACITY_DEFAULT_CUSTOM_NAME,
};
use phaseout_storage::param_store::ParamStore;
use phaseout_storage::repo::{ParamSetReadRepo, ParamSetWriteRepo};

use crate::error::ServiceError;

pub const SEEDED_CAPACITY_PRESETS: &[&str] = &["CSER High Capacity", "CSER Medium Progressivity"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityResolveMode {
    Strict,
    Upsert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityResolution {
    Off,
    Resolved(CapacitySettingsId),
    /// Lookup path only: the named preset does not exist.
    Missing,
}

impl CapacityResolution {
    pub fn capacity_settings_id(self) -> Option<CapacitySettingsId> {
        match self {
            CapacityResolution::Resolved(id) => Some(id),
            CapacityResolution::Off | CapacityResolution::Missing => None,
        }
    }

    pub fn scale_by_capacity(self) -> bool {
        matches!(self, CapacityResolution::Resolved(_))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CapacitySettingsResolver;

impl CapacitySettingsResolver {
    pub fn resolve<W>(
        &self,
        repo: &mut W,
        scale_flag: bool,
        req: &CapacityRequest,
        mode: CapacityResolveMode,
    ) -> Result<CapacityResolution, ServiceError>
    where
        W: ParamSetWriteRepo + ?Sized,
    {
        if is_off(scale_flag, req, mode) {
            return Ok(CapacityResolution::Off);
        }
        match mode {
            CapacityResolveMode::Strict => {
                let name = req.capacity_name.as_deref().unwrap_or_default();
                match first_named(&*repo, name) {
                    Some(id) => Ok(CapacityResolution::Resolved(id)),
                    None => Err(ServiceError::InvalidInput(format!(
                        "capacity_name '{name}' not found in capacity_settings. Send 'off' or seed it first."
                    ))),
                }
            }
            CapacityResolveMode::Upsert => {
                let spec = req.clone().into_spec(CAPACITY_DEFAULT_CUSTOM_NAME)?;
                if let Some(row) = repo.capacity_settings_row_exact(&spec) {
                    debug!(
                        "capacity settings reused id={} name='{}'",
                        row.capacity_settings_id.0, row.spec.capacity_name
                    );
                    return Ok(CapacityResolution::Resolved(row.capacity_settings_id));
                }
                let row = repo.insert_capacity_settings_row(spec)?;
                info!(
                    "capacity settings created id={} name='{}'",
                    row.capacity_settings_id.0, row.spec.capacity_name
                );
                Ok(CapacityResolution::Resolved(row.capacity_settings_id))
            }
        }
    }

    /// Read-only resolution for the lookup path: an unknown name is `Missing`, not an error.
    pub fn resolve_for_lookup<R>(
        &self,
        repo: &R,
        scale_flag: bool,
        req: &CapacityRequest,
    ) -> CapacityResolution
    where
        R: ParamSetReadRepo + ?Sized,
    {
        if is_off(scale_flag, req, CapacityResolveMode::Strict) {
            return CapacityResolution::Off;
        }
        let name = req.capacity_name.as_deref().unwrap_or_default();
        first_named(repo, name)
            .map(CapacityResolution::Resolved)
            .unwrap_or(CapacityResolution::Missing)
    }

    /// Inserts a named preset with unset sub-fields unless one with that name already exists.
    pub fn seed_preset(
        &self,
        store: &ParamStore,
        name: &str,
    ) -> Result<CapacitySettingsId, ServiceError> {
        let spec = CapacitySettingsSpec::preset_v1(name)?;
        store.transaction_with(|tx| -> Result<CapacitySettingsId, ServiceError> {
            if let Some(id) = first_named(&*tx, name) {
                return Ok(id);
            }
            let row = tx.insert_capacity_settings_row(spec)?;
            info!(
                "capacity preset seeded id={} name='{}'",
                row.capacity_settings_id.0, row.spec.capacity_name
            );
            Ok(row.capacity_settings_id)
        })
    }
}

fn is_off(scale_flag: bool, req: &CapacityRequest, mode: CapacityResolveMode) -> bool {
    if !scale_flag {
        return true;
    }
    match req.capacity_name.as_deref() {
        Some(name) => is_off_capacity_name(name),
        // Upsert falls back to the default bundle name.
        None => mode == CapacityResolveMode::Strict,
    }
}

fn first_named<R>(repo: &R, name: &str) -> Option<CapacitySettingsId>
where
    R: ParamSetReadRepo + ?Sized,
{
    repo.capacity_settings_rows_named(name)
        .first()
        .map(|r| r.capacity_settings_id)
}
