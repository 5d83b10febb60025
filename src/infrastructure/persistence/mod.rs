//! Single analytical store: schema bootstrap, migrations, and per-entity
//! repositories (§4.5).

pub mod repositories;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

pub use repositories::{
    AlertRepository, ChainRepository, CooldownRepository, FeatureRepository, ScanRepository, SchedulerRepository,
};

/// A single applied migration (recorded so bootstrap stays idempotent, §4.5).
struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: r#"
            CREATE TABLE IF NOT EXISTS scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_ts TEXT NOT NULL,
                config_hash TEXT NOT NULL,
                status TEXT NOT NULL,
                tickers_scanned INTEGER NOT NULL DEFAULT 0,
                alerts_generated INTEGER NOT NULL DEFAULT 0,
                runtime_seconds REAL NOT NULL DEFAULT 0,
                error_message TEXT
            );

            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_id INTEGER NOT NULL REFERENCES scans(id),
                ticker TEXT NOT NULL,
                detector_name TEXT NOT NULL,
                score REAL NOT NULL,
                adjusted_score REAL NOT NULL,
                metrics_json TEXT NOT NULL,
                explanation_json TEXT NOT NULL,
                strategies_json TEXT NOT NULL,
                confidence TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_scan_id ON alerts (scan_id);
            CREATE INDEX IF NOT EXISTS idx_alerts_created_at ON alerts (created_at);

            CREATE TABLE IF NOT EXISTS feature_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_id INTEGER NOT NULL REFERENCES scans(id),
                ticker TEXT NOT NULL,
                features_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_features_ticker ON feature_snapshots (ticker);

            CREATE TABLE IF NOT EXISTS chain_snapshots (
                scan_id INTEGER NOT NULL REFERENCES scans(id),
                ticker TEXT NOT NULL,
                snapshot_date TEXT NOT NULL,
                expiration TEXT NOT NULL,
                dte INTEGER NOT NULL,
                underlying_price REAL NOT NULL,
                chain_json TEXT NOT NULL,
                num_calls INTEGER NOT NULL,
                num_puts INTEGER NOT NULL,
                atm_iv REAL,
                total_volume INTEGER NOT NULL,
                total_oi INTEGER NOT NULL,
                file_path TEXT NOT NULL,
                PRIMARY KEY (ticker, snapshot_date, expiration)
            );

            CREATE TABLE IF NOT EXISTS cooldowns (
                ticker TEXT PRIMARY KEY,
                last_alert_ts TEXT NOT NULL,
                last_score REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS daily_alert_counts (
                count_date TEXT PRIMARY KEY,
                alert_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS scheduler_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                current_state TEXT NOT NULL,
                api_calls_this_hour INTEGER NOT NULL,
                api_calls_today INTEGER NOT NULL,
                hour_window_start TEXT NOT NULL,
                day_window_start TEXT NOT NULL,
                buffer_depth INTEGER NOT NULL,
                backoff_until TEXT,
                backoff_epoch INTEGER NOT NULL,
                last_collection_at TEXT
            );
        "#,
    },
];

/// Owns the pool and drives schema bootstrap (§4.5 "schema bootstrap is idempotent").
#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
}

impl Store {
    pub async fn connect(db_url: &str, pool_size: u32) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("failed to create store directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)
            .context("invalid store URL")?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .connect_with(options)
            .await
            .context("failed to connect to store")?;

        info!(db_url, "connected to store");

        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    /// Applies every migration not yet recorded in `schema_version`, in order. Running
    /// this on a fresh or already-migrated store produces the same final schema.
    async fn bootstrap(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await
        .context("failed to create schema_version table")?;

        for migration in MIGRATIONS {
            let already_applied: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM schema_version WHERE version = ?")
                    .bind(migration.version)
                    .fetch_optional(&self.pool)
                    .await
                    .context("failed to query schema_version")?;
            if already_applied.is_some() {
                continue;
            }

            let mut tx = self.pool.begin().await.context("failed to begin migration transaction")?;
            sqlx::raw_sql(migration.sql)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("migration {} failed", migration.version))?;
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(migration.version)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await
                .context("failed to record schema_version")?;
            tx.commit().await.context("failed to commit migration")?;
            info!(version = migration.version, "applied store migration");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let store = Store::connect("sqlite::memory:", 1).await.unwrap();
        store.bootstrap().await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(row.0, MIGRATIONS.len() as i64);
    }
}
