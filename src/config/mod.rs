//! Layered configuration: process environment → `.env` → `config.yaml` → built-in
//! defaults (§4.15). A `Config` struct of sub-configs built through a layered
//! `load()` resolution, with a YAML layer added on top of the usual env/dotenv pass.

mod watchlist;
mod yaml;

use crate::application::orchestrator::OrchestratorConfig;
use crate::application::risk_gate::RiskGateConfig;
use crate::application::scheduler::SchedulerConfig;
use crate::application::scorer::ScorerConfig;
use crate::application::throttler::ThrottlerConfig;
use crate::domain::errors::ConfigError;
use crate::domain::types::{AccountState, Position};
use crate::infrastructure::cache::CacheTtlConfig;
use chrono::NaiveTime;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use yaml::YamlConfig;

/// Per-detector enable flag and threshold overrides, keyed by `config_key()`.
#[derive(Debug, Clone, Default)]
pub struct DetectorSetting {
    pub enabled: bool,
    pub thresholds: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub demo_mode: bool,
    pub backend_url: String,
    pub log_level: String,
    pub risk_free_rate: f64,
    pub cache_ttl: CacheTtlConfig,
    pub watchlist: Vec<String>,
    pub account: AccountState,
    pub scheduler: SchedulerRuntimeConfig,
    pub risk_gate: RiskGateConfig,
    pub scorer: ScorerConfig,
    pub throttler: ThrottlerConfig,
    pub orchestrator: OrchestratorConfig,
    pub detectors: HashMap<String, DetectorSetting>,
    pub config_hash: String,
}

/// Mirrors [`SchedulerConfig`] field-for-field; kept separate so this module does not
/// need to construct `std::time::Duration`-bearing application types directly.
#[derive(Debug, Clone)]
pub struct SchedulerRuntimeConfig {
    pub collection_times_et: Vec<NaiveTime>,
    pub check_interval_sec: u64,
    pub max_calls_per_hour: u32,
    pub max_calls_per_day: u32,
    pub flush_threshold: usize,
}

impl Config {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            scheduled_times_et: self.scheduler.collection_times_et.clone(),
            check_interval: Duration::from_secs(self.scheduler.check_interval_sec),
            max_calls_per_hour: self.scheduler.max_calls_per_hour,
            max_calls_per_day: self.scheduler.max_calls_per_day,
            ..SchedulerConfig::default()
        }
    }
}

/// Loads configuration from `config_path` (default `config.yaml`) and
/// `watchlist_path` (default `watchlist.txt`), applying `.env` once via `dotenvy`.
/// Process environment variables always win over both files.
pub fn load(config_path: &Path, watchlist_path: &Path) -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let yaml_text = std::fs::read_to_string(config_path).ok();
    let yaml: YamlConfig = match &yaml_text {
        Some(text) => serde_yaml::from_str(text).map_err(|e| ConfigError::Invalid(format!("config.yaml: {e}")))?,
        None => YamlConfig::default(),
    };

    let demo_mode = resolve_bool("DEMO_MODE", yaml.demo_mode, true);
    let backend_url = resolve_string("BACKEND_URL", yaml.backend_url.as_ref(), "http://localhost:8080");
    let log_level = resolve_string("LOG_LEVEL", yaml.log_level.as_ref(), "INFO");
    let risk_free_rate = resolve_f64("RISK_FREE_RATE", yaml.risk_free_rate, 0.05)?;
    let cache_ttl_minutes = resolve_u64("CACHE_TTL_MINUTES", yaml.cache_ttl_minutes, 60)?;
    let intraday_cache_ttl_minutes = resolve_u64("INTRADAY_CACHE_TTL_MINUTES", yaml.intraday_cache_ttl_minutes, 1)?;

    let scan_symbols = yaml.scan.as_ref().and_then(|s| s.symbols.clone());
    let watchlist_key = yaml.watchlist.clone();
    let watchlist = watchlist::resolve(scan_symbols.as_deref(), watchlist_key.as_deref(), watchlist_path);

    let scheduler_section = yaml.scheduler.unwrap_or_default();
    let collection_times_et = resolve_collection_times(&scheduler_section.collection_times_et)?;
    let max_calls_per_hour = resolve_u32("SCHEDULER_MAX_CALLS_PER_HOUR", scheduler_section.max_calls_per_hour, 250)?;
    let max_calls_per_day = resolve_u32("SCHEDULER_MAX_CALLS_PER_DAY", scheduler_section.max_calls_per_day, 2000)?;
    let flush_threshold = resolve_usize("SCHEDULER_FLUSH_THRESHOLD", scheduler_section.flush_threshold, 100)?;
    let check_interval_sec = resolve_u64("SCHEDULER_CHECK_INTERVAL_SEC", scheduler_section.check_interval_sec, 10)?;

    let risk_section = yaml.risk.unwrap_or_default();
    let max_concentration_pct = resolve_f64("RISK_MAX_CONCENTRATION_PCT", risk_section.max_concentration_pct, 5.0)?;
    let max_margin_usage_pct = resolve_f64("RISK_MAX_MARGIN_USAGE_PCT", risk_section.max_margin_usage_pct, 50.0)?;
    let min_cash_buffer_pct = resolve_f64("RISK_MIN_CASH_BUFFER_PCT", risk_section.min_cash_buffer_pct, 50.0)?;

    let scoring_section = yaml.scoring.unwrap_or_default();
    let cooldown_hours = resolve_f64("SCORING_COOLDOWN_HOURS", scoring_section.cooldown_hours, 24.0)?;
    let max_alerts_per_day = resolve_u32("SCORING_MAX_ALERTS_PER_DAY", scoring_section.max_alerts_per_day, 5)?;

    let account_section = yaml.account.unwrap_or_default();
    let cash_available = resolve_f64("ACCOUNT_CASH_AVAILABLE", account_section.cash_available, 100_000.0)?;
    let margin_available = resolve_f64("ACCOUNT_MARGIN_AVAILABLE", account_section.margin_available, 100_000.0)?;
    let positions = account_section
        .positions
        .unwrap_or_default()
        .into_iter()
        .map(|p| Position { ticker: p.ticker, market_value: p.market_value, quantity: p.quantity })
        .collect();

    let detectors = resolve_detector_settings(yaml.detectors.unwrap_or_default());
    let thesis_tickers: HashSet<String> = yaml
        .theses
        .as_ref()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default();

    let config_hash = compute_hash(
        &[
            config_path.to_path_buf(),
            watchlist_path.to_path_buf(),
            PathBuf::from(".env"),
        ],
        &BTreeMap::from([
            ("demo_mode".to_string(), demo_mode.to_string()),
            ("backend_url".to_string(), backend_url.clone()),
            ("log_level".to_string(), log_level.clone()),
            ("risk_free_rate".to_string(), risk_free_rate.to_string()),
            ("watchlist".to_string(), watchlist.join(",")),
            ("account.cash_available".to_string(), cash_available.to_string()),
            ("account.margin_available".to_string(), margin_available.to_string()),
            ("scheduler.max_calls_per_hour".to_string(), max_calls_per_hour.to_string()),
            ("scheduler.max_calls_per_day".to_string(), max_calls_per_day.to_string()),
            ("risk.max_concentration_pct".to_string(), max_concentration_pct.to_string()),
            ("scoring.cooldown_hours".to_string(), cooldown_hours.to_string()),
            ("scoring.max_alerts_per_day".to_string(), max_alerts_per_day.to_string()),
        ]),
    );

    Ok(Config {
        demo_mode,
        backend_url,
        log_level,
        risk_free_rate,
        cache_ttl: CacheTtlConfig {
            price_history: Duration::from_secs(cache_ttl_minutes * 60),
            current_price: Duration::from_secs(intraday_cache_ttl_minutes * 60),
        },
        watchlist,
        account: AccountState { cash_available, margin_available, positions },
        scheduler: SchedulerRuntimeConfig {
            collection_times_et,
            check_interval_sec,
            max_calls_per_hour,
            max_calls_per_day,
            flush_threshold,
        },
        risk_gate: RiskGateConfig {
            margin_gate_threshold_pct: max_margin_usage_pct,
            cash_gate_threshold_pct: min_cash_buffer_pct,
            max_concentration_pct,
        },
        scorer: ScorerConfig { thesis_tickers, ..ScorerConfig::default() },
        throttler: ThrottlerConfig { cooldown_hours, max_alerts_per_day },
        orchestrator: OrchestratorConfig { fanout: 8, config_hash: config_hash.clone(), flush_threshold },
        detectors,
        config_hash,
    })
}

fn resolve_detector_settings(raw: HashMap<String, yaml::DetectorSection>) -> HashMap<String, DetectorSetting> {
    raw.into_iter()
        .map(|(name, section)| {
            let setting = DetectorSetting {
                enabled: section.enabled.unwrap_or(true),
                thresholds: section.thresholds.unwrap_or_default(),
            };
            (name, setting)
        })
        .collect()
}

fn resolve_collection_times(entries: &Option<Vec<String>>) -> Result<Vec<NaiveTime>, ConfigError> {
    let raw = match entries {
        Some(v) if !v.is_empty() => v.clone(),
        _ => match std::env::var("SCHEDULER_COLLECTION_TIMES_ET") {
            Ok(v) => v.split(',').map(str::trim).map(str::to_string).collect(),
            Err(_) => vec!["16:15".to_string()],
        },
    };
    raw.iter()
        .map(|entry| {
            NaiveTime::parse_from_str(entry, "%H:%M")
                .map_err(|_| ConfigError::Invalid(format!("scheduler.collection_times_et entry {entry:?} is not HH:MM")))
        })
        .collect()
}

fn resolve_string(env_key: &str, yaml_val: Option<&String>, default: &str) -> String {
    std::env::var(env_key).ok().or_else(|| yaml_val.cloned()).unwrap_or_else(|| default.to_string())
}

fn resolve_bool(env_key: &str, yaml_val: Option<bool>, default: bool) -> bool {
    match std::env::var(env_key) {
        Ok(v) => v.parse().unwrap_or(default),
        Err(_) => yaml_val.unwrap_or(default),
    }
}

fn resolve_f64(env_key: &str, yaml_val: Option<f64>, default: f64) -> Result<f64, ConfigError> {
    resolve_parsed(env_key, yaml_val, default)
}

fn resolve_u32(env_key: &str, yaml_val: Option<u32>, default: u32) -> Result<u32, ConfigError> {
    resolve_parsed(env_key, yaml_val, default)
}

fn resolve_u64(env_key: &str, yaml_val: Option<u64>, default: u64) -> Result<u64, ConfigError> {
    resolve_parsed(env_key, yaml_val, default)
}

fn resolve_usize(env_key: &str, yaml_val: Option<usize>, default: usize) -> Result<usize, ConfigError> {
    resolve_parsed(env_key, yaml_val, default)
}

fn resolve_parsed<T: std::str::FromStr>(env_key: &str, yaml_val: Option<T>, default: T) -> Result<T, ConfigError> {
    match std::env::var(env_key) {
        Ok(v) => v.parse().map_err(|_| ConfigError::Invalid(format!("{env_key}={v:?} is not valid"))),
        Err(_) => Ok(yaml_val.unwrap_or(default)),
    }
}

fn compute_hash(files: &[PathBuf], merged: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(merged).unwrap_or_default());
    for path in files {
        if let Ok(meta) = std::fs::metadata(path)
            && let Ok(modified) = meta.modified()
            && let Ok(elapsed) = modified.duration_since(std::time::UNIX_EPOCH)
        {
            hasher.update(elapsed.as_secs().to_le_bytes());
        }
    }
    let digest = hasher.finalize();
    format!("{digest:x}")[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_yaml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("config.yaml"), &dir.path().join("watchlist.txt")).unwrap();
        assert!(config.demo_mode);
        assert_eq!(config.risk_free_rate, 0.05);
        assert!(config.watchlist.is_empty());
    }

    #[test]
    fn yaml_layer_overrides_built_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(
            &config_path,
            "demo_mode: false\nrisk_free_rate: 0.03\nscan:\n  symbols: [aapl, msft]\n",
        )
        .unwrap();
        let config = load(&config_path, &dir.path().join("watchlist.txt")).unwrap();
        assert!(!config.demo_mode);
        assert_eq!(config.risk_free_rate, 0.03);
        assert_eq!(config.watchlist, vec!["AAPL".to_string(), "MSFT".to_string()]);
    }

    #[test]
    fn invalid_collection_time_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "scheduler:\n  collection_times_et: [\"not-a-time\"]\n").unwrap();
        let result = load(&config_path, &dir.path().join("watchlist.txt"));
        assert!(result.is_err());
    }

    #[test]
    fn same_merged_config_produces_same_hash() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "risk_free_rate: 0.04\n").unwrap();
        let a = load(&config_path, &dir.path().join("watchlist.txt")).unwrap();
        let b = load(&config_path, &dir.path().join("watchlist.txt")).unwrap();
        assert_eq!(a.config_hash, b.config_hash);
    }
}
