#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockWriteGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use phaseout_kernel_contracts::capacity::{
    normalize_capacity_name, CapacitySettingsId, CapacitySettingsRecord, CapacitySettingsSpec,
};
use phaseout_kernel_contracts::params::{
    CanonicalTuple, ParamSetKey, ParameterSetRecord, ResultId,
};
use phaseout_kernel_contracts::{ContractViolation, UnixTimeSecs, Validate};

use crate::journal::{Journal, JournalEntry, StoreOp};

#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    ForeignKeyViolation { table: &'static str, key: String },
    DuplicateKey { table: &'static str, key: String },
    NotFound { table: &'static str, key: String },
    Busy { waited_ms: u64 },
    Timeout { elapsed_ms: u64 },
    Unavailable { reason: String },
    JournalCorrupt { line: usize, reason: String },
    ContractViolation(ContractViolation),
}

impl From<ContractViolation> for StorageError {
    fn from(v: ContractViolation) -> Self {
        StorageError::ContractViolation(v)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ForeignKeyViolation { table, key } => {
                write!(f, "foreign key violation on {table}: {key}")
            }
            StorageError::DuplicateKey { table, key } => write!(f, "duplicate key on {table}: {key}"),
            StorageError::NotFound { table, key } => write!(f, "no row in {table} for {key}"),
            StorageError::Busy { waited_ms } => write!(f, "store busy after {waited_ms}ms"),
            StorageError::Timeout { elapsed_ms } => {
                write!(f, "transaction exceeded its deadline ({elapsed_ms}ms)")
            }
            StorageError::Unavailable { reason } => write!(f, "store unavailable: {reason}"),
            StorageError::JournalCorrupt { line, reason } => {
                write!(f, "journal corrupt at line {line}: {reason}")
            }
            StorageError::ContractViolation(v) => write!(f, "contract violation: {v}"),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub journal_path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    pub tx_timeout_ms: u64,
    /// Journaled ops after which a commit compacts the journal. 0 disables.
    pub compact_every_ops: u64,
}

impl StoreConfig {
    pub fn mvp_v1() -> Self {
        Self {
            journal_path: None,
            busy_timeout_ms: 3_000,
            tx_timeout_ms: 5_000,
            compact_every_ops: 10_000,
        }
    }

    pub fn with_journal(mut self, path: PathBuf) -> Self {
        self.journal_path = Some(path);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCounts {
    pub param_sets: usize,
    pub capacity_settings: usize,
}

#[derive(Debug)]
pub(crate) enum UndoOp {
    RemoveCapacitySettings(CapacitySettingsId),
    RemoveParameterSet(ResultId),
    RestoreParameterSet(Box<ParameterSetRecord>),
}

#[derive(Debug, Default, Clone)]
pub struct ParamTables {
    param_sets: BTreeMap<ResultId, ParameterSetRecord>,
    param_sets_by_key: BTreeMap<ParamSetKey, BTreeSet<ResultId>>,
    capacity_settings: BTreeMap<CapacitySettingsId, CapacitySettingsRecord>,
    capacity_by_name: BTreeMap<String, BTreeSet<CapacitySettingsId>>,
}

impl ParamTables {
    pub fn param_set(&self, result_id: ResultId) -> Option<&ParameterSetRecord> {
        self.param_sets.get(&result_id)
    }

    pub fn param_sets_matching(&self, key: &ParamSetKey) -> Vec<&ParameterSetRecord> {
        self.param_sets_by_key
            .get(key)
            .map(|ids| ids.iter().filter_map(|id| self.param_sets.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn param_set_rows(&self) -> &BTreeMap<ResultId, ParameterSetRecord> {
        &self.param_sets
    }

    pub fn capacity_settings_row(&self, id: CapacitySettingsId) -> Option<&CapacitySettingsRecord> {
        self.capacity_settings.get(&id)
    }

    pub fn capacity_settings_named(&self, name: &str) -> Vec<&CapacitySettingsRecord> {
        self.capacity_by_name
            .get(&normalize_capacity_name(name))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.capacity_settings.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn capacity_settings_exact(
        &self,
        spec: &CapacitySettingsSpec,
    ) -> Option<&CapacitySettingsRecord> {
        self.capacity_settings_named(&spec.capacity_name)
            .into_iter()
            .find(|r| r.spec.same_settings(spec))
    }

    pub fn capacity_settings_rows(&self) -> &BTreeMap<CapacitySettingsId, CapacitySettingsRecord> {
        &self.capacity_settings
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            param_sets: self.param_sets.len(),
            capacity_settings: self.capacity_settings.len(),
        }
    }

    fn next_result_id(&self) -> ResultId {
        ResultId(self.param_sets.keys().next_back().map(|id| id.0).unwrap_or(0) + 1)
    }

    fn next_capacity_settings_id(&self) -> CapacitySettingsId {
        CapacitySettingsId(
            self.capacity_settings
                .keys()
                .next_back()
                .map(|id| id.0)
                .unwrap_or(0)
                + 1,
        )
    }

    /// Applies one op. On error the tables are left untouched.
    pub(crate) fn apply(&mut self, op: StoreOp) -> Result<UndoOp, StorageError> {
        match op {
            StoreOp::InsertCapacitySettings { record } => self.apply_insert_capacity(record),
            StoreOp::InsertParameterSet { record } => self.apply_insert_param_set(record, true),
            StoreOp::ImportParameterSet { record } => self.apply_insert_param_set(record, false),
            StoreOp::TouchLastUsed { result_id, at } => {
                let row = self.param_set_mut(result_id)?;
                let before = row.clone();
                row.date_last_used = at;
                Ok(UndoOp::RestoreParameterSet(Box::new(before)))
            }
            StoreOp::MarkCalculated { result_id, at } => {
                let row = self.param_set_mut(result_id)?;
                let before = row.clone();
                if !row.is_calculated {
                    row.is_calculated = true;
                    row.date_calculated = Some(at);
                }
                Ok(UndoOp::RestoreParameterSet(Box::new(before)))
            }
        }
    }

    fn apply_insert_capacity(
        &mut self,
        record: CapacitySettingsRecord,
    ) -> Result<UndoOp, StorageError> {
        record.validate()?;
        let id = record.capacity_settings_id;
        if self.capacity_settings.contains_key(&id) {
            return Err(StorageError::DuplicateKey {
                table: "capacity_settings",
                key: id.0.to_string(),
            });
        }
        if self.capacity_settings_exact(&record.spec).is_some() {
            return Err(StorageError::DuplicateKey {
                table: "capacity_settings.settings",
                key: record.spec.normalized_name(),
            });
        }
        self.capacity_by_name
            .entry(record.spec.normalized_name())
            .or_default()
            .insert(id);
        self.capacity_settings.insert(id, record);
        Ok(UndoOp::RemoveCapacitySettings(id))
    }

    fn apply_insert_param_set(
        &mut self,
        record: ParameterSetRecord,
        unique_key: bool,
    ) -> Result<UndoOp, StorageError> {
        let record = record.with_legacy_values_normalized();
        record.validate()?;
        if let Some(cap) = record.capacity_settings_id {
            if !self.capacity_settings.contains_key(&cap) {
                return Err(StorageError::ForeignKeyViolation {
                    table: "param_sets.capacity_settings_id",
                    key: cap.0.to_string(),
                });
            }
        }
        let id = record.result_id;
        if self.param_sets.contains_key(&id) {
            return Err(StorageError::DuplicateKey {
                table: "param_sets",
                key: id.0.to_string(),
            });
        }
        let key = record.match_key();
        if unique_key
            && self
                .param_sets_by_key
                .get(&key)
                .is_some_and(|ids| !ids.is_empty())
        {
            return Err(StorageError::DuplicateKey {
                table: "param_sets.match_key",
                key: key.fingerprint_hex(),
            });
        }
        self.param_sets_by_key.entry(key).or_default().insert(id);
        self.param_sets.insert(id, record);
        Ok(UndoOp::RemoveParameterSet(id))
    }

    fn param_set_mut(&mut self, result_id: ResultId) -> Result<&mut ParameterSetRecord, StorageError> {
        self.param_sets
            .get_mut(&result_id)
            .ok_or_else(|| StorageError::NotFound {
                table: "param_sets",
                key: result_id.0.to_string(),
            })
    }

    fn undo(&mut self, op: UndoOp) {
        match op {
            UndoOp::RemoveCapacitySettings(id) => {
                if let Some(r) = self.capacity_settings.remove(&id) {
                    let name = r.spec.normalized_name();
                    if let Some(ids) = self.capacity_by_name.get_mut(&name) {
                        ids.remove(&id);
                        if ids.is_empty() {
                            self.capacity_by_name.remove(&name);
                        }
                    }
                }
            }
            UndoOp::RemoveParameterSet(id) => {
                if let Some(r) = self.param_sets.remove(&id) {
                    let key = r.match_key();
                    if let Some(ids) = self.param_sets_by_key.get_mut(&key) {
                        ids.remove(&id);
                        if ids.is_empty() {
                            self.param_sets_by_key.remove(&key);
                        }
                    }
                }
            }
            // Touch and mark never change the match key, so the index stays valid.
            UndoOp::RestoreParameterSet(before) => {
                self.param_sets.insert(before.result_id, *before);
            }
        }
    }
}

pub struct StoreTx<'a> {
    tables: &'a mut ParamTables,
    ops: Vec<StoreOp>,
    undo: Vec<UndoOp>,
}

impl<'a> StoreTx<'a> {
    fn new(tables: &'a mut ParamTables) -> Self {
        Self {
            tables,
            ops: Vec::new(),
            undo: Vec::new(),
        }
    }

    pub fn tables(&self) -> &ParamTables {
        &*self.tables
    }

    fn stage(&mut self, op: StoreOp) -> Result<(), StorageError> {
        let undo = self.tables.apply(op.clone())?;
        self.undo.push(undo);
        self.ops.push(op);
        Ok(())
    }

    pub fn insert_capacity_settings(
        &mut self,
        spec: CapacitySettingsSpec,
    ) -> Result<CapacitySettingsRecord, StorageError> {
        let record = CapacitySettingsRecord::v1(self.tables.next_capacity_settings_id(), spec)?;
        self.stage(StoreOp::InsertCapacitySettings {
            record: record.clone(),
        })?;
        Ok(record)
    }

    pub fn insert_parameter_set(
        &mut self,
        tuple: &CanonicalTuple,
        now: UnixTimeSecs,
    ) -> Result<ParameterSetRecord, StorageError> {
        let record = ParameterSetRecord::v1_pending(self.tables.next_result_id(), tuple, now)?;
        self.stage(StoreOp::InsertParameterSet {
            record: record.clone(),
        })?;
        Ok(record)
    }

    /// Loads a historical row as-is (own `result_id`, no match-key uniqueness).
    pub fn import_parameter_set(&mut self, record: ParameterSetRecord) -> Result<(), StorageError> {
        self.stage(StoreOp::ImportParameterSet { record })
    }

    pub fn touch_last_used(&mut self, result_id: ResultId, at: UnixTimeSecs) -> Result<(), StorageError> {
        self.stage(StoreOp::TouchLastUsed { result_id, at })
    }

    /// Completion write of the external batch process. A second call keeps the first date.
    pub fn mark_calculated(&mut self, result_id: ResultId, at: UnixTimeSecs) -> Result<(), StorageError> {
        self.stage(StoreOp::MarkCalculated { result_id, at })
    }

    fn rollback(self) {
        let StoreTx { tables, undo, .. } = self;
        for op in undo.into_iter().rev() {
            tables.undo(op);
        }
    }
}

#[derive(Debug)]
pub struct ParamStore {
    config: StoreConfig,
    tables: RwLock<ParamTables>,
    journal: Option<Journal>,
    ops_since_compaction: AtomicU64,
}

impl ParamStore {
    pub fn new_in_memory() -> Self {
        Self {
            config: StoreConfig::mvp_v1(),
            tables: RwLock::new(ParamTables::default()),
            journal: None,
            ops_since_compaction: AtomicU64::new(0),
        }
    }

    pub fn open(config: StoreConfig) -> Result<Self, StorageError> {
        let mut tables = ParamTables::default();
        let mut replayed_ops = 0u64;
        let journal = match config.journal_path.as_ref() {
            Some(path) => {
                let journal = Journal::open(path.clone())?;
                let entries = journal.replay(|op| {
                    replayed_ops += 1;
                    tables.apply(op).map(|_| ())
                })?;
                let counts = tables.counts();
                info!(
                    "param store replayed {} journal entries from {} (param_sets={} capacity_settings={})",
                    entries,
                    path.display(),
                    counts.param_sets,
                    counts.capacity_settings
                );
                Some(journal)
            }
            None => None,
        };
        Ok(Self {
            config,
            tables: RwLock::new(tables),
            journal,
            ops_since_compaction: AtomicU64::new(replayed_ops),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn read<T>(&self, f: impl FnOnce(&ParamTables) -> T) -> Result<T, StorageError> {
        let guard = self.tables.read().map_err(|_| StorageError::Unavailable {
            reason: "store lock poisoned".to_string(),
        })?;
        Ok(f(&guard))
    }

    pub fn counts(&self) -> Result<StoreCounts, StorageError> {
        self.read(ParamTables::counts)
    }

    /// Runs `f` under the store's write lock. The ops it staged are journaled and kept only if
    /// `f` succeeds within the deadline and the journal append succeeds; otherwise every write is
    /// undone.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut StoreTx<'_>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.transaction_with(f)
    }

    pub fn transaction_with<T, E>(
        &self,
        f: impl FnOnce(&mut StoreTx<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StorageError> + fmt::Display,
    {
        let mut guard = self.acquire_write()?;
        let started = Instant::now();
        let mut tx = StoreTx::new(&mut guard);

        let out = match f(&mut tx) {
            Ok(out) => out,
            Err(err) => {
                debug!("param store transaction rolled back: {err}");
                tx.rollback();
                return Err(err);
            }
        };

        let elapsed = started.elapsed();
        if elapsed > Duration::from_millis(self.config.tx_timeout_ms) {
            warn!(
                "param store transaction exceeded deadline ({}ms), rolling back {} ops",
                elapsed.as_millis(),
                tx.ops.len()
            );
            tx.rollback();
            return Err(StorageError::Timeout {
                elapsed_ms: elapsed.as_millis() as u64,
            }
            .into());
        }

        if tx.ops.is_empty() {
            return Ok(out);
        }
        let committed = tx.ops.len() as u64;
        if let Some(journal) = self.journal.as_ref() {
            if let Err(err) = journal.append(&JournalEntry::v1(tx.ops.clone())) {
                warn!("param store journal append failed, rolling back: {err}");
                tx.rollback();
                return Err(err.into());
            }
            let pending = self.ops_since_compaction.fetch_add(committed, Ordering::SeqCst) + committed;
            let every = self.config.compact_every_ops;
            if every > 0 && pending >= every {
                // The commit is already durable; a failed compaction only leaves the journal long.
                if let Err(err) = self.compact_locked(journal, &guard) {
                    warn!("param store journal compaction after {pending} ops failed: {err}");
                }
            }
        }
        debug!("param store committed {committed} ops");
        Ok(out)
    }

    pub fn mark_calculated(&self, result_id: ResultId, at: UnixTimeSecs) -> Result<(), StorageError> {
        self.transaction(|tx| tx.mark_calculated(result_id, at))
    }

    pub fn compact_journal(&self) -> Result<usize, StorageError> {
        let Some(journal) = self.journal.as_ref() else {
            return Ok(0);
        };
        let guard = self.acquire_write()?;
        self.compact_locked(journal, &guard)
    }

    pub fn journal_ops_since_compaction(&self) -> u64 {
        self.ops_since_compaction.load(Ordering::SeqCst)
    }

    fn compact_locked(&self, journal: &Journal, tables: &ParamTables) -> Result<usize, StorageError> {
        let mut ops: Vec<StoreOp> = tables
            .capacity_settings
            .values()
            .cloned()
            .map(|record| StoreOp::InsertCapacitySettings { record })
            .collect();
        ops.extend(
            tables
                .param_sets
                .values()
                .cloned()
                .map(|record| StoreOp::ImportParameterSet { record }),
        );
        let n = ops.len();
        journal.rewrite(&JournalEntry::v1(ops))?;
        self.ops_since_compaction.store(0, Ordering::SeqCst);
        info!("param store journal compacted to {n} ops");
        Ok(n)
    }

    fn acquire_write(&self) -> Result<RwLockWriteGuard<'_, ParamTables>, StorageError> {
        let started = Instant::now();
        let budget = Duration::from_millis(self.config.busy_timeout_ms);
        loop {
            match self.tables.try_write() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::WouldBlock) => {
                    if started.elapsed() >= budget {
                        return Err(StorageError::Busy {
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                Err(TryLockError::Poisoned(_)) => {
                    return Err(StorageError::Unavailable {
                        reason: "store lock poisoned".to_string(),
                    })
                }
            }
        }
    }
}
