//! Shape of `config.yaml`. Every field is optional: a missing key simply falls
//! through to the next layer (env var already applied, or the built-in default).

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Default)]
pub struct YamlConfig {
    pub demo_mode: Option<bool>,
    pub backend_url: Option<String>,
    pub log_level: Option<String>,
    pub risk_free_rate: Option<f64>,
    pub cache_ttl_minutes: Option<u64>,
    pub intraday_cache_ttl_minutes: Option<u64>,
    pub scan: Option<ScanSection>,
    pub watchlist: Option<Vec<String>>,
    pub scheduler: Option<SchedulerSection>,
    pub risk: Option<RiskSection>,
    pub scoring: Option<ScoringSection>,
    pub detectors: Option<HashMap<String, DetectorSection>>,
    pub theses: Option<HashMap<String, ThesisEntry>>,
    pub account: Option<AccountSection>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AccountSection {
    pub cash_available: Option<f64>,
    pub margin_available: Option<f64>,
    pub positions: Option<Vec<PositionEntry>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PositionEntry {
    pub ticker: String,
    pub market_value: f64,
    pub quantity: f64,
}

#[derive(Debug, Deserialize, Default)]
pub struct ScanSection {
    pub symbols: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SchedulerSection {
    pub collection_times_et: Option<Vec<String>>,
    pub max_calls_per_hour: Option<u32>,
    pub max_calls_per_day: Option<u32>,
    pub flush_threshold: Option<usize>,
    pub check_interval_sec: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RiskSection {
    pub max_concentration_pct: Option<f64>,
    pub max_margin_usage_pct: Option<f64>,
    pub min_cash_buffer_pct: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ScoringSection {
    pub cooldown_hours: Option<f64>,
    pub max_alerts_per_day: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DetectorSection {
    pub enabled: Option<bool>,
    pub thresholds: Option<HashMap<String, f64>>,
}

/// A thesis entry is either a bare string or an object carrying one of
/// `text`/`description`/`summary` (first present key wins).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ThesisEntry {
    Text(String),
    Object {
        text: Option<String>,
        description: Option<String>,
        summary: Option<String>,
    },
}

impl ThesisEntry {
    pub fn resolve(&self) -> Option<String> {
        match self {
            ThesisEntry::Text(s) => Some(s.clone()),
            ThesisEntry::Object { text, description, summary } => {
                text.clone().or_else(|| description.clone()).or_else(|| summary.clone())
            }
        }
    }
}
