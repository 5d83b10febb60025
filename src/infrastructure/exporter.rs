//! Periodic atomic snapshot writer: store rows out to JSON files so an external
//! reader can consume them without contending for the store's connections (§4.14).

use crate::infrastructure::persistence::{AlertRepository, ChainRepository, FeatureRepository, ScanRepository};
use chrono::Utc;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, warn};

const ALERT_LIMIT: i64 = 10_000;
const CHAIN_LIMIT: i64 = 1_000;
const FEATURE_LIMIT: i64 = 10_000;
const SCAN_LIMIT: i64 = 500;

pub struct Exporter {
    alerts: AlertRepository,
    chains: ChainRepository,
    scans: ScanRepository,
    features: FeatureRepository,
    export_dir: PathBuf,
}

/// Outcome of one `export_all` pass: which files wrote successfully and which
/// failed, so the caller can log/alert without one failure hiding the rest.
#[derive(Debug, Default)]
pub struct ExportResult {
    pub succeeded: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
}

impl Exporter {
    pub fn new(
        alerts: AlertRepository,
        chains: ChainRepository,
        scans: ScanRepository,
        features: FeatureRepository,
        export_dir: impl Into<PathBuf>,
    ) -> Self {
        Self { alerts, chains, scans, features, export_dir: export_dir.into() }
    }

    async fn ensure_dirs(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.export_dir).await?;
        fs::create_dir_all(self.export_dir.join("archive")).await?;
        Ok(())
    }

    /// Runs every export, logging and recording individual failures without
    /// aborting the remaining exports.
    pub async fn export_all(&self, min_score: f64) -> ExportResult {
        if let Err(e) = self.ensure_dirs().await {
            error!(error = %e, "failed to create export directories");
            return ExportResult { succeeded: vec![], failed: vec![("directories", e.to_string())] };
        }

        let mut result = ExportResult::default();
        for (name, outcome) in [
            ("alerts", self.export_alerts(min_score).await),
            ("chains", self.export_chains().await),
            ("scans", self.export_scans(30).await),
            ("features", self.export_features().await),
        ] {
            match outcome {
                Ok(()) => result.succeeded.push(name),
                Err(e) => {
                    warn!(export = name, error = %e, "export failed");
                    result.failed.push((name, e.to_string()));
                }
            }
        }
        info!(succeeded = result.succeeded.len(), failed = result.failed.len(), "export pass complete");
        result
    }

    pub async fn export_alerts(&self, min_score: f64) -> anyhow::Result<()> {
        let alerts = self.alerts.recent(ALERT_LIMIT).await?;
        let filtered: Vec<Value> = alerts
            .into_iter()
            .filter(|a| a.adjusted_score >= min_score)
            .map(|a| {
                json!({
                    "id": a.id,
                    "scan_id": a.scan_id,
                    "ticker": a.ticker,
                    "detector_name": a.detector_name,
                    "score": a.adjusted_score,
                    "alert_data": {
                        "raw_score": a.score,
                        "metrics": a.metrics,
                        "explanation": a.explanation,
                        "strategies": a.strategies,
                        "confidence": a.confidence,
                    },
                    "created_at": a.created_at.to_rfc3339(),
                })
            })
            .collect();

        let payload = json!({
            "export_timestamp": Utc::now().to_rfc3339(),
            "alert_count": filtered.len(),
            "min_score": min_score,
            "alerts": filtered,
        });
        self.write("alerts.json", &payload).await
    }

    pub async fn export_chains(&self) -> anyhow::Result<()> {
        let chains = self.chains.recent(CHAIN_LIMIT).await?;
        let entries: Vec<Value> = chains
            .into_iter()
            .map(|c| {
                let parsed: Value = serde_json::from_str(&c.chain_json).unwrap_or(Value::Null);
                json!({
                    "ticker": c.ticker,
                    "timestamp": c.snapshot_date.to_string(),
                    "underlying_price": c.underlying_price,
                    "expiration": c.expiration.to_string(),
                    "calls": parsed.get("calls").cloned().unwrap_or(Value::Array(vec![])),
                    "puts": parsed.get("puts").cloned().unwrap_or(Value::Array(vec![])),
                    "created_at": c.snapshot_date.to_string(),
                })
            })
            .collect();

        let payload = json!({
            "export_timestamp": Utc::now().to_rfc3339(),
            "chain_count": entries.len(),
            "chains": entries,
        });
        self.write("chains.json", &payload).await
    }

    pub async fn export_scans(&self, days: i64) -> anyhow::Result<()> {
        let scans = self.scans.recent(SCAN_LIMIT).await?;
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let entries: Vec<Value> = scans
            .into_iter()
            .filter(|s| s.scan_ts >= cutoff)
            .map(|s| {
                json!({
                    "id": s.id,
                    "scan_ts": s.scan_ts.to_rfc3339(),
                    "config_hash": s.config_hash,
                    "status": s.status.as_str(),
                    "tickers_scanned": s.tickers_scanned,
                    "alerts_generated": s.alerts_generated,
                    "runtime_seconds": s.runtime_seconds,
                    "error_message": s.error_message,
                })
            })
            .collect();

        let payload = json!({
            "export_timestamp": Utc::now().to_rfc3339(),
            "scan_count": entries.len(),
            "days": days,
            "scans": entries,
        });
        self.write("scans.json", &payload).await
    }

    pub async fn export_features(&self) -> anyhow::Result<()> {
        let rows = self.features.recent(FEATURE_LIMIT).await?;
        let entries: Vec<Value> = rows
            .into_iter()
            .map(|(ticker, features, created_at, scan_id)| {
                json!({
                    "ticker": ticker,
                    "features": features,
                    "created_at": created_at.to_rfc3339(),
                    "scan_id": scan_id,
                })
            })
            .collect();

        let payload = json!({
            "export_timestamp": Utc::now().to_rfc3339(),
            "feature_count": entries.len(),
            "features": entries,
        });
        self.write("features.json", &payload).await
    }

    /// Writes to a temp file in the same directory, then renames into place, then
    /// leaves a timestamped copy under `archive/`.
    async fn write(&self, filename: &str, payload: &Value) -> anyhow::Result<()> {
        let body = serde_json::to_vec_pretty(payload)?;
        let final_path = self.export_dir.join(filename);
        let temp_path = self.export_dir.join(format!("{filename}.{}.tmp", std::process::id()));
        fs::write(&temp_path, &body).await?;
        fs::rename(&temp_path, &final_path).await?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let archive_name = format!("{}_{stamp}.json", filename.trim_end_matches(".json"));
        let archive_path: &Path = &self.export_dir.join("archive").join(archive_name);
        if let Err(e) = fs::write(archive_path, &body).await {
            warn!(file = filename, error = %e, "failed to write archive copy");
        }
        Ok(())
    }
}
