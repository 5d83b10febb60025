use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a single pass of the orchestrator over the watchlist (§3 `Scan`).
///
/// Transitions linearly and never moves backward: `Pending -> Running -> {Completed,
/// Failed, Partial}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
}

impl ScanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Partial => "partial",
        }
    }
}

impl std::str::FromStr for ScanStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            "partial" => Ok(ScanStatus::Partial),
            other => anyhow::bail!("unknown scan status: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub id: Option<i64>,
    pub scan_ts: DateTime<Utc>,
    pub config_hash: String,
    pub status: ScanStatus,
    pub tickers_scanned: u32,
    pub alerts_generated: u32,
    pub runtime_seconds: f64,
    pub error_message: Option<String>,
}

impl Scan {
    pub fn pending(scan_ts: DateTime<Utc>, config_hash: impl Into<String>) -> Self {
        Self {
            id: None,
            scan_ts,
            config_hash: config_hash.into(),
            status: ScanStatus::Pending,
            tickers_scanned: 0,
            alerts_generated: 0,
            runtime_seconds: 0.0,
            error_message: None,
        }
    }
}

/// A per-expiration archival snapshot of an options chain (§3 `ChainSnapshot`).
///
/// Unique by `(ticker, snapshot_date, expiration)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub scan_id: i64,
    pub ticker: String,
    pub snapshot_date: NaiveDate,
    pub expiration: NaiveDate,
    pub dte: i64,
    pub underlying_price: f64,
    pub chain_json: String,
    pub num_calls: u32,
    pub num_puts: u32,
    pub atm_iv: Option<f64>,
    pub total_volume: u64,
    pub total_oi: u64,
    pub file_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn scan_status_round_trips_through_str() {
        for s in [
            ScanStatus::Pending,
            ScanStatus::Running,
            ScanStatus::Completed,
            ScanStatus::Failed,
            ScanStatus::Partial,
        ] {
            assert_eq!(ScanStatus::from_str(s.as_str()).unwrap(), s);
        }
    }
}
