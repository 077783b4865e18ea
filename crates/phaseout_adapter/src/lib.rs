#![forbid(unsafe_code)]

pub mod http;
pub mod logging;

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use simplelog::LevelFilter;

use phaseout_engines::canon::Canonicalizer;
use phaseout_kernel_contracts::params::RawParamPayload;
use phaseout_kernel_contracts::results::{LookupResponse, StatusResponse, SubmitResponse};
use phaseout_os::capacity::{
    CapacityResolveMode, CapacitySettingsResolver, SEEDED_CAPACITY_PRESETS,
};
use phaseout_os::clock::Clock;
use phaseout_os::lookup::LookupService;
use phaseout_os::param_cache::{ParamCacheConfig, ParamSetCache};
use phaseout_os::status::StatusReporter;
use phaseout_os::ServiceError;
use phaseout_storage::param_store::{ParamStore, StoreConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub bind: SocketAddr,
    /// JSONL journal; `None` keeps the store in memory only.
    pub store_path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    pub tx_timeout_ms: u64,
    pub tx_retry_limit: u32,
    pub compact_every_ops: u64,
    pub seed_presets: bool,
    pub log_level: LevelFilter,
    pub log_file: Option<PathBuf>,
}

impl AdapterConfig {
    pub fn mvp_v1() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            store_path: None,
            busy_timeout_ms: 3_000,
            tx_timeout_ms: 5_000,
            tx_retry_limit: 3,
            compact_every_ops: 10_000,
            seed_presets: true,
            log_level: LevelFilter::Info,
            log_file: None,
        }
    }

    pub fn from_env() -> Result<Self, String> {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    /// Out-of-range numbers fall back to their defaults; an unparsable bind address is an error.
    pub fn from_env_var_map<F>(get: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::mvp_v1();
        let bind = match non_empty(get("PHASEOUT_HTTP_BIND")) {
            Some(raw) => raw
                .parse::<SocketAddr>()
                .map_err(|err| format!("invalid PHASEOUT_HTTP_BIND '{raw}': {err}"))?,
            None => defaults.bind,
        };
        let ranged = |key: &str, range: std::ops::RangeInclusive<u64>, default: u64| {
            get(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| range.contains(v))
                .unwrap_or(default)
        };
        let busy_timeout_ms = ranged(
            "PHASEOUT_BUSY_TIMEOUT_MS",
            100..=60_000,
            defaults.busy_timeout_ms,
        );
        let tx_timeout_ms =
            ranged("PHASEOUT_TX_TIMEOUT_MS", 100..=120_000, defaults.tx_timeout_ms);
        let tx_retry_limit =
            ranged("PHASEOUT_TX_RETRY_LIMIT", 1..=10, u64::from(defaults.tx_retry_limit)) as u32;
        let compact_every_ops = ranged(
            "PHASEOUT_COMPACT_EVERY_OPS",
            0..=10_000_000,
            defaults.compact_every_ops,
        );
        let seed_presets = match get("PHASEOUT_SEED_PRESETS") {
            Some(v) => !matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off" | "no"
            ),
            None => defaults.seed_presets,
        };
        let log_level = get("PHASEOUT_LOG_LEVEL")
            .and_then(|v| v.trim().parse::<LevelFilter>().ok())
            .unwrap_or(defaults.log_level);

        Ok(Self {
            bind,
            store_path: non_empty(get("PHASEOUT_STORE_PATH")).map(PathBuf::from),
            busy_timeout_ms,
            tx_timeout_ms,
            tx_retry_limit,
            compact_every_ops,
            seed_presets,
            log_level,
            log_file: non_empty(get("PHASEOUT_LOG_FILE")).map(PathBuf::from),
        })
    }

    pub fn store_config(&self) -> StoreConfig {
        let config = StoreConfig {
            busy_timeout_ms: self.busy_timeout_ms,
            tx_timeout_ms: self.tx_timeout_ms,
            compact_every_ops: self.compact_every_ops,
            ..StoreConfig::mvp_v1()
        };
        match self.store_path.as_ref() {
            Some(path) => config.with_journal(path.clone()),
            None => config,
        }
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub param_sets: usize,
    pub capacity_settings: usize,
    pub journal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Request body to payload. Mirrors the dashboard API: an empty body and anything that is not a
/// JSON object are rejected before canonicalization.
pub fn parse_payload(body: &[u8]) -> Result<RawParamPayload, ServiceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ServiceError::InvalidInput("Empty body".to_string()));
    }
    let invalid = || ServiceError::InvalidInput("Invalid JSON".to_string());
    let value: Value = serde_json::from_slice(body).map_err(|_| invalid())?;
    if !value.is_object() {
        return Err(invalid());
    }
    serde_json::from_value(value).map_err(|_| invalid())
}

/// `?result_id=` as the status endpoint reads it: anything unparsable counts as 0.
pub fn parse_result_id(raw: Option<&str>) -> i64 {
    raw.and_then(|v| v.trim().parse::<i64>().ok()).unwrap_or(0)
}

#[derive(Clone)]
pub struct AdapterRuntime {
    store: Arc<ParamStore>,
    clock: Arc<dyn Clock>,
    cache: ParamSetCache,
    lookup: LookupService,
    status: StatusReporter,
}

impl AdapterRuntime {
    pub fn new(config: &AdapterConfig, clock: Arc<dyn Clock>) -> Result<Self, String> {
        let store = ParamStore::open(config.store_config())
            .map_err(|err| format!("failed to open param store: {err}"))?;
        if config.store_path.is_some() {
            let ops = store
                .compact_journal()
                .map_err(|err| format!("failed to compact param store journal: {err}"))?;
            info!("param store journal compacted on startup ({ops} ops)");
        }
        let runtime = Self::from_parts(store, clock, config.tx_retry_limit);
        if config.seed_presets {
            runtime
                .seed_presets()
                .map_err(|err| format!("failed to seed capacity presets: {err}"))?;
        }
        Ok(runtime)
    }

    pub fn from_parts(store: ParamStore, clock: Arc<dyn Clock>, tx_retry_limit: u32) -> Self {
        Self {
            store: Arc::new(store),
            clock,
            cache: ParamSetCache::new(
                ParamCacheConfig { tx_retry_limit },
                Canonicalizer::default(),
            ),
            lookup: LookupService::default(),
            status: StatusReporter,
        }
    }

    pub fn store(&self) -> &ParamStore {
        &self.store
    }

    pub fn seed_presets(&self) -> Result<usize, ServiceError> {
        for name in SEEDED_CAPACITY_PRESETS {
            CapacitySettingsResolver.seed_preset(&self.store, name)?;
        }
        info!(
            "capacity presets ready: {}",
            SEEDED_CAPACITY_PRESETS.join(", ")
        );
        Ok(SEEDED_CAPACITY_PRESETS.len())
    }

    /// `POST /api/param_submit`: presets resolved by name only.
    pub fn submit(&self, payload: &RawParamPayload) -> Result<SubmitResponse, ServiceError> {
        self.cache.submit(
            &self.store,
            self.clock.as_ref(),
            payload,
            CapacityResolveMode::Strict,
        )
    }

    /// `POST /api/find_param_sets`: capacity bundles created on first sight.
    pub fn find_param_sets(&self, payload: &RawParamPayload) -> Result<SubmitResponse, ServiceError> {
        self.cache.submit(
            &self.store,
            self.clock.as_ref(),
            payload,
            CapacityResolveMode::Upsert,
        )
    }

    pub fn lookup(&self, payload: &RawParamPayload) -> Result<LookupResponse, ServiceError> {
        self.lookup.lookup(&self.store, payload)
    }

    pub fn check_results_status(&self, result_id: i64) -> Result<StatusResponse, ServiceError> {
        self.status.status(&self.store, result_id)
    }

    pub fn health_report(&self) -> Result<AdapterHealthResponse, ServiceError> {
        let counts = self.store.counts()?;
        Ok(AdapterHealthResponse {
            status: "ok".to_string(),
            param_sets: counts.param_sets,
            capacity_settings: counts.capacity_settings,
            journal: self
                .store
                .config()
                .journal_path
                .as_ref()
                .map(|p| p.display().to_string()),
        })
    }
}
