//! Per-entity repositories over the store (§4.5).

use crate::domain::errors::StorageError;
use crate::domain::types::{
    Alert, ChainSnapshot, Confidence, Cooldown, FeatureSet, Scan, SchedulerState, SchedulerStateKind, ScanStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::str::FromStr;

fn confidence_str(c: Confidence) -> &'static str {
    match c {
        Confidence::Low => "low",
        Confidence::Medium => "medium",
        Confidence::High => "high",
    }
}

fn confidence_from_str(s: &str) -> Confidence {
    match s {
        "high" => Confidence::High,
        "medium" => Confidence::Medium,
        _ => Confidence::Low,
    }
}

#[derive(Clone)]
pub struct ScanRepository {
    pool: SqlitePool,
}

impl ScanRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a `pending` scan row and returns its id (§4.5 "inserts with returning-id").
    pub async fn create(&self, scan: &Scan) -> Result<i64, StorageError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO scans (scan_ts, config_hash, status) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(scan.scan_ts.to_rfc3339())
        .bind(&scan.config_hash)
        .bind(scan.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Write(format!("create scan: {e}")))?;
        Ok(id)
    }

    pub async fn mark_running(&self, scan_id: i64) -> Result<(), StorageError> {
        sqlx::query("UPDATE scans SET status = 'running' WHERE id = ?")
            .bind(scan_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Write(format!("mark_running: {e}")))?;
        Ok(())
    }

    pub async fn finish(
        &self,
        scan_id: i64,
        status: ScanStatus,
        tickers_scanned: u32,
        alerts_generated: u32,
        runtime_seconds: f64,
        error_message: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE scans SET status = ?, tickers_scanned = ?, alerts_generated = ?, runtime_seconds = ?, error_message = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(tickers_scanned)
        .bind(alerts_generated)
        .bind(runtime_seconds)
        .bind(error_message)
        .bind(scan_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Write(format!("finish scan: {e}")))?;
        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<Scan>, StorageError> {
        let rows: Vec<(i64, String, String, String, i64, i64, f64, Option<String>)> = sqlx::query_as(
            "SELECT id, scan_ts, config_hash, status, tickers_scanned, alerts_generated, runtime_seconds, error_message \
             FROM scans ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Write(format!("recent scans: {e}")))?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, scan_ts, config_hash, status, tickers_scanned, alerts_generated, runtime_seconds, error_message)| {
                Some(Scan {
                    id: Some(id),
                    scan_ts: DateTime::parse_from_rfc3339(&scan_ts).ok()?.with_timezone(&Utc),
                    config_hash,
                    status: ScanStatus::from_str(&status).ok()?,
                    tickers_scanned: tickers_scanned as u32,
                    alerts_generated: alerts_generated as u32,
                    runtime_seconds,
                    error_message,
                })
            })
            .collect())
    }
}

#[derive(Clone)]
pub struct AlertRepository {
    pool: SqlitePool,
}

impl AlertRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts all alerts for a scan in one transaction: either all succeed, or none do
    /// and the caller marks the scan `partial` (§4.5 "batch insert").
    pub async fn insert_batch(&self, alerts: &[Alert]) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Write(format!("begin alert batch: {e}")))?;

        for alert in alerts {
            let metrics_json = serde_json::to_string(&alert.metrics).unwrap_or_default();
            let explanation_json = serde_json::to_string(&alert.explanation).unwrap_or_default();
            let strategies_json = serde_json::to_string(&alert.strategies).unwrap_or_default();

            sqlx::query(
                "INSERT INTO alerts (scan_id, ticker, detector_name, score, adjusted_score, metrics_json, explanation_json, strategies_json, confidence, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(alert.scan_id)
            .bind(&alert.ticker)
            .bind(&alert.detector_name)
            .bind(alert.score)
            .bind(alert.adjusted_score)
            .bind(metrics_json)
            .bind(explanation_json)
            .bind(strategies_json)
            .bind(confidence_str(alert.confidence))
            .bind(alert.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Write(format!("insert alert for {}: {e}", alert.ticker)))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Write(format!("commit alert batch: {e}")))?;
        Ok(())
    }

    pub async fn count_for_scan(&self, scan_id: i64) -> Result<u32, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts WHERE scan_id = ?")
            .bind(scan_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Write(format!("count alerts: {e}")))?;
        Ok(count as u32)
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<Alert>, StorageError> {
        let rows: Vec<(Option<i64>, i64, String, String, f64, f64, String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, scan_id, ticker, detector_name, score, adjusted_score, metrics_json, explanation_json, strategies_json, confidence, created_at \
             FROM alerts ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Write(format!("recent alerts: {e}")))?;

        Ok(rows
            .into_iter()
            .filter_map(
                |(id, scan_id, ticker, detector_name, score, adjusted_score, metrics_json, explanation_json, strategies_json, confidence, created_at)| {
                    Some(Alert {
                        id,
                        scan_id,
                        ticker,
                        detector_name,
                        score,
                        adjusted_score,
                        metrics: serde_json::from_str::<BTreeMap<String, f64>>(&metrics_json).unwrap_or_default(),
                        explanation: serde_json::from_str::<BTreeMap<String, String>>(&explanation_json).unwrap_or_default(),
                        strategies: serde_json::from_str::<Vec<String>>(&strategies_json).unwrap_or_default(),
                        confidence: confidence_from_str(&confidence),
                        created_at: DateTime::parse_from_rfc3339(&created_at).ok()?.with_timezone(&Utc),
                    })
                },
            )
            .collect())
    }
}

#[derive(Clone)]
pub struct FeatureRepository {
    pool: SqlitePool,
}

impl FeatureRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, scan_id: i64, ticker: &str, features: &FeatureSet) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO feature_snapshots (scan_id, ticker, features_json, created_at) VALUES (?, ?, ?, ?)")
            .bind(scan_id)
            .bind(ticker)
            .bind(features.to_json().to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Write(format!("insert feature snapshot for {ticker}: {e}")))?;
        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<(String, serde_json::Value, DateTime<Utc>, i64)>, StorageError> {
        let rows: Vec<(String, String, String, i64)> = sqlx::query_as(
            "SELECT ticker, features_json, created_at, scan_id FROM feature_snapshots ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Write(format!("recent features: {e}")))?;

        Ok(rows
            .into_iter()
            .filter_map(|(ticker, features_json, created_at, scan_id)| {
                Some((
                    ticker,
                    serde_json::from_str(&features_json).unwrap_or(serde_json::Value::Null),
                    DateTime::parse_from_rfc3339(&created_at).ok()?.with_timezone(&Utc),
                    scan_id,
                ))
            })
            .collect())
    }
}

#[derive(Clone)]
pub struct ChainRepository {
    pool: SqlitePool,
}

impl ChainRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Deduplicated by `(ticker, snapshot_date, expiration)` via `INSERT OR IGNORE`
    /// (§4.12 step i).
    pub async fn insert_if_absent(&self, snapshot: &ChainSnapshot) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT OR IGNORE INTO chain_snapshots \
             (scan_id, ticker, snapshot_date, expiration, dte, underlying_price, chain_json, num_calls, num_puts, atm_iv, total_volume, total_oi, file_path) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(snapshot.scan_id)
        .bind(&snapshot.ticker)
        .bind(snapshot.snapshot_date.to_string())
        .bind(snapshot.expiration.to_string())
        .bind(snapshot.dte)
        .bind(snapshot.underlying_price)
        .bind(&snapshot.chain_json)
        .bind(snapshot.num_calls)
        .bind(snapshot.num_puts)
        .bind(snapshot.atm_iv)
        .bind(snapshot.total_volume as i64)
        .bind(snapshot.total_oi as i64)
        .bind(&snapshot.file_path)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Write(format!("insert chain snapshot for {}: {e}", snapshot.ticker)))?;
        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<ChainSnapshot>, StorageError> {
        let rows: Vec<(i64, String, String, String, i64, f64, String, i64, i64, Option<f64>, i64, i64, String)> = sqlx::query_as(
            "SELECT scan_id, ticker, snapshot_date, expiration, dte, underlying_price, chain_json, num_calls, num_puts, atm_iv, total_volume, total_oi, file_path \
             FROM chain_snapshots ORDER BY rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Write(format!("recent chains: {e}")))?;

        Ok(rows
            .into_iter()
            .filter_map(
                |(scan_id, ticker, snapshot_date, expiration, dte, underlying_price, chain_json, num_calls, num_puts, atm_iv, total_volume, total_oi, file_path)| {
                    Some(ChainSnapshot {
                        scan_id,
                        ticker,
                        snapshot_date: NaiveDate::from_str(&snapshot_date).ok()?,
                        expiration: NaiveDate::from_str(&expiration).ok()?,
                        dte,
                        underlying_price,
                        chain_json,
                        num_calls: num_calls as u32,
                        num_puts: num_puts as u32,
                        atm_iv,
                        total_volume: total_volume as u64,
                        total_oi: total_oi as u64,
                        file_path,
                    })
                },
            )
            .collect())
    }
}

#[derive(Clone)]
pub struct CooldownRepository {
    pool: SqlitePool,
}

impl CooldownRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// `(true, hours_remaining)` iff a cooldown row exists and hasn't expired (§4.5).
    pub async fn is_in_cooldown(&self, ticker: &str, cooldown_hours: f64) -> Result<(bool, f64), StorageError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT last_alert_ts FROM cooldowns WHERE ticker = ?")
            .bind(ticker)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Write(format!("is_in_cooldown for {ticker}: {e}")))?;

        let Some((last_alert_ts,)) = row else {
            return Ok((false, 0.0));
        };
        let Ok(last) = DateTime::parse_from_rfc3339(&last_alert_ts) else {
            return Ok((false, 0.0));
        };
        let elapsed_hours = (Utc::now() - last.with_timezone(&Utc)).num_seconds() as f64 / 3600.0;
        if elapsed_hours < cooldown_hours {
            Ok((true, cooldown_hours - elapsed_hours))
        } else {
            Ok((false, 0.0))
        }
    }

    pub async fn upsert(&self, ticker: &str, cooldown: Cooldown) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO cooldowns (ticker, last_alert_ts, last_score) VALUES (?, ?, ?) \
             ON CONFLICT(ticker) DO UPDATE SET last_alert_ts = excluded.last_alert_ts, last_score = excluded.last_score",
        )
        .bind(ticker)
        .bind(cooldown.last_alert_ts.to_rfc3339())
        .bind(cooldown.last_score)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Write(format!("upsert cooldown for {ticker}: {e}")))?;
        Ok(())
    }

    pub async fn cooldown_remaining(&self, ticker: &str, cooldown_hours: f64) -> Result<Option<f64>, StorageError> {
        let (in_cooldown, remaining) = self.is_in_cooldown(ticker, cooldown_hours).await?;
        Ok(in_cooldown.then_some(remaining))
    }

    /// Atomic under conflict: `count = count + 1` (§4.5).
    pub async fn increment_daily_count(&self, date: NaiveDate) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO daily_alert_counts (count_date, alert_count) VALUES (?, 1) \
             ON CONFLICT(count_date) DO UPDATE SET alert_count = alert_count + 1",
        )
        .bind(date.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Write(format!("increment daily count: {e}")))?;
        Ok(())
    }

    pub async fn daily_count(&self, date: NaiveDate) -> Result<u32, StorageError> {
        let count: Option<i64> = sqlx::query_scalar("SELECT alert_count FROM daily_alert_counts WHERE count_date = ?")
            .bind(date.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Write(format!("daily count: {e}")))?;
        Ok(count.unwrap_or(0) as u32)
    }
}

/// Persists the single-row scheduler state (§3 `SchedulerState`).
#[derive(Clone)]
pub struct SchedulerRepository {
    pool: SqlitePool,
}

impl SchedulerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn load(&self) -> Result<Option<SchedulerState>, StorageError> {
        let row: Option<(String, i64, i64, String, String, i64, Option<String>, i64, Option<String>)> = sqlx::query_as(
            "SELECT current_state, api_calls_this_hour, api_calls_today, hour_window_start, day_window_start, buffer_depth, backoff_until, backoff_epoch, last_collection_at \
             FROM scheduler_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Write(format!("load scheduler state: {e}")))?;

        let Some((
            current_state,
            api_calls_this_hour,
            api_calls_today,
            hour_window_start,
            day_window_start,
            buffer_depth,
            backoff_until,
            backoff_epoch,
            last_collection_at,
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(SchedulerState {
            current_state: SchedulerStateKind::from_str(&current_state)
                .map_err(|e| StorageError::Write(e.to_string()))?,
            api_calls_this_hour: api_calls_this_hour as u32,
            api_calls_today: api_calls_today as u32,
            hour_window_start: DateTime::parse_from_rfc3339(&hour_window_start)
                .map_err(|e| StorageError::Write(e.to_string()))?
                .with_timezone(&Utc),
            day_window_start: DateTime::parse_from_rfc3339(&day_window_start)
                .map_err(|e| StorageError::Write(e.to_string()))?
                .with_timezone(&Utc),
            buffer_depth: buffer_depth as u32,
            backoff_until: backoff_until
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|d| d.with_timezone(&Utc)),
            backoff_epoch: backoff_epoch as u32,
            last_collection_at: last_collection_at
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|d| d.with_timezone(&Utc)),
        }))
    }

    pub async fn save(&self, state: &SchedulerState) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO scheduler_state (id, current_state, api_calls_this_hour, api_calls_today, hour_window_start, day_window_start, buffer_depth, backoff_until, backoff_epoch, last_collection_at) \
             VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
               current_state = excluded.current_state, api_calls_this_hour = excluded.api_calls_this_hour, \
               api_calls_today = excluded.api_calls_today, hour_window_start = excluded.hour_window_start, \
               day_window_start = excluded.day_window_start, buffer_depth = excluded.buffer_depth, \
               backoff_until = excluded.backoff_until, backoff_epoch = excluded.backoff_epoch, \
               last_collection_at = excluded.last_collection_at",
        )
        .bind(state.current_state.as_str())
        .bind(state.api_calls_this_hour)
        .bind(state.api_calls_today)
        .bind(state.hour_window_start.to_rfc3339())
        .bind(state.day_window_start.to_rfc3339())
        .bind(state.buffer_depth)
        .bind(state.backoff_until.map(|d| d.to_rfc3339()))
        .bind(state.backoff_epoch)
        .bind(state.last_collection_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Write(format!("save scheduler state: {e}")))?;
        Ok(())
    }
}
