#![forbid(unsafe_code)]

use phaseout_kernel_contracts::capacity::{CapacitySettingsRecord, CapacitySettingsSpec};
use phaseout_kernel_contracts::params::{
    CanonicalTuple, ParamSetKey, ParameterSetRecord, ResultId,
};
use phaseout_kernel_contracts::UnixTimeSecs;

use crate::param_store::{ParamTables, StorageError, StoreTx};

pub trait ParamSetReadRepo {
    fn param_set_row(&self, result_id: ResultId) -> Option<ParameterSetRecord>;
    fn param_set_rows_matching(&self, key: &ParamSetKey) -> Vec<ParameterSetRecord>;
    fn capacity_settings_rows_named(&self, name: &str) -> Vec<CapacitySettingsRecord>;
    fn capacity_settings_row_exact(
        &self,
        spec: &CapacitySettingsSpec,
    ) -> Option<CapacitySettingsRecord>;
}

pub trait ParamSetWriteRepo: ParamSetReadRepo {
    fn insert_capacity_settings_row(
        &mut self,
        spec: CapacitySettingsSpec,
    ) -> Result<CapacitySettingsRecord, StorageError>;
    fn insert_param_set_row(
        &mut self,
        tuple: &CanonicalTuple,
        now: UnixTimeSecs,
    ) -> Result<ParameterSetRecord, StorageError>;
    fn touch_param_set_row(&mut self, result_id: ResultId, at: UnixTimeSecs)
        -> Result<(), StorageError>;
    fn mark_param_set_row_calculated(
        &mut self,
        result_id: ResultId,
        at: UnixTimeSecs,
    ) -> Result<(), StorageError>;
}

impl ParamSetReadRepo for ParamTables {
    fn param_set_row(&self, result_id: ResultId) -> Option<ParameterSetRecord> {
        self.param_set(result_id).cloned()
    }

    fn param_set_rows_matching(&self, key: &ParamSetKey) -> Vec<ParameterSetRecord> {
        self.param_sets_matching(key).into_iter().cloned().collect()
    }

    fn capacity_settings_rows_named(&self, name: &str) -> Vec<CapacitySettingsRecord> {
        self.capacity_settings_named(name)
            .into_iter()
            .cloned()
            .collect()
    }

    fn capacity_settings_row_exact(
        &self,
        spec: &CapacitySettingsSpec,
    ) -> Option<CapacitySettingsRecord> {
        self.capacity_settings_exact(spec).cloned()
    }
}

impl ParamSetReadRepo for StoreTx<'_> {
    fn param_set_row(&self, result_id: ResultId) -> Option<ParameterSetRecord> {
        self.tables().param_set_row(result_id)
    }

    fn param_set_rows_matching(&self, key: &ParamSetKey) -> Vec<ParameterSetRecord> {
        self.tables().param_set_rows_matching(key)
    }

    fn capacity_settings_rows_named(&self, name: &str) -> Vec<CapacitySettingsRecord> {
        self.tables().capacity_settings_rows_named(name)
    }

    fn capacity_settings_row_exact(
        &self,
        spec: &CapacitySettingsSpec,
    ) -> Option<CapacitySettingsRecord> {
        self.tables().capacity_settings_row_exact(spec)
    }
}

impl ParamSetWriteRepo for StoreTx<'_> {
    fn insert_capacity_settings_row(
        &mut self,
        spec: CapacitySettingsSpec,
    ) -> Result<CapacitySettingsRecord, StorageError> {
        self.insert_capacity_settings(spec)
    }

    fn insert_param_set_row(
        &mut self,
        tuple: &CanonicalTuple,
        now: UnixTimeSecs,
    ) -> Result<ParameterSetRecord, StorageError> {
        self.insert_parameter_set(tuple, now)
    }

    fn touch_param_set_row(
        &mut self,
        result_id: ResultId,
        at: UnixTimeSecs,
    ) -> Result<(), StorageError> {
        self.touch_last_used(result_id, at)
    }

    fn mark_param_set_row_calculated(
        &mut self,
        result_id: ResultId,
        at: UnixTimeSecs,
    ) -> Result<(), StorageError> {
        self.mark_calculated(result_id, at)
    }
}
