//! Periodic structured-JSON metrics snapshot, logged rather than served.

use crate::infrastructure::cache::TtlCache;
use crate::infrastructure::circuit_breaker::CircuitBreakerRegistry;
use crate::infrastructure::observability::metrics::Metrics;
use crate::infrastructure::persistence::{ScanRepository, SchedulerRepository};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub cache: CacheSnapshot,
    pub scheduler: SchedulerSnapshot,
    pub recent_scans: Vec<ScanSnapshot>,
}

#[derive(Serialize)]
pub struct CacheSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub any_breaker_open: bool,
}

#[derive(Serialize)]
pub struct SchedulerSnapshot {
    pub current_state: Option<String>,
    pub api_calls_this_hour: Option<u32>,
    pub api_calls_today: Option<u32>,
    pub backoff_epoch: Option<u32>,
}

#[derive(Serialize)]
pub struct ScanSnapshot {
    pub status: String,
    pub tickers_scanned: u32,
    pub alerts_generated: u32,
}

/// Outputs a JSON metrics snapshot on a fixed interval, never accepting inbound
/// requests itself.
pub struct MetricsReporter {
    cache: Arc<TtlCache>,
    breakers: Arc<CircuitBreakerRegistry>,
    scheduler_repo: SchedulerRepository,
    scans: ScanRepository,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(
        cache: Arc<TtlCache>,
        breakers: Arc<CircuitBreakerRegistry>,
        scheduler_repo: SchedulerRepository,
        scans: ScanRepository,
        metrics: Metrics,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            breakers,
            scheduler_repo,
            scans,
            metrics,
            start_time: Instant::now(),
            interval,
        }
    }

    /// Runs the reporter loop until the task is dropped/aborted by the caller.
    pub async fn run(self) {
        info!(interval = ?self.interval, "metrics reporter starting");
        loop {
            tokio::time::sleep(self.interval).await;
            match self.collect_snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => println!("METRICS_JSON:{json}"),
                    Err(e) => warn!(error = %e, "failed to serialize metrics snapshot"),
                },
                Err(e) => warn!(error = %e, "failed to collect metrics snapshot"),
            }
        }
    }

    async fn collect_snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let uptime = self.start_time.elapsed().as_secs();
        let stats = self.cache.stats();
        let any_breaker_open = self.breakers.any_open().await;
        self.metrics.cache_hit_rate.set(stats.hit_rate);
        self.metrics.uptime_seconds.set(uptime as f64);

        let scheduler_state = self.scheduler_repo.load().await?;
        if let Some(state) = &scheduler_state {
            self.metrics.set_scheduler_state(state.current_state.as_str());
            self.metrics.api_calls_this_hour.set(state.api_calls_this_hour as f64);
            self.metrics.api_calls_today.set(state.api_calls_today as f64);
        }

        let recent_scans = self
            .scans
            .recent(5)
            .await?
            .into_iter()
            .map(|scan| ScanSnapshot {
                status: scan.status.as_str().to_string(),
                tickers_scanned: scan.tickers_scanned,
                alerts_generated: scan.alerts_generated,
            })
            .collect();

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            cache: CacheSnapshot {
                hits: stats.hits,
                misses: stats.misses,
                hit_rate: stats.hit_rate,
                any_breaker_open,
            },
            scheduler: SchedulerSnapshot {
                current_state: scheduler_state.as_ref().map(|s| s.current_state.as_str().to_string()),
                api_calls_this_hour: scheduler_state.as_ref().map(|s| s.api_calls_this_hour),
                api_calls_today: scheduler_state.as_ref().map(|s| s.api_calls_today),
                backoff_epoch: scheduler_state.as_ref().map(|s| s.backoff_epoch),
            },
            recent_scans,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::Store;

    #[tokio::test]
    async fn collects_snapshot_from_empty_store() {
        let store = Store::connect("sqlite::memory:", 1).await.unwrap();
        let reporter = MetricsReporter::new(
            Arc::new(TtlCache::new(1024 * 1024)),
            Arc::new(CircuitBreakerRegistry::default()),
            SchedulerRepository::new(store.pool.clone()),
            ScanRepository::new(store.pool.clone()),
            Metrics::new().unwrap(),
            Duration::from_secs(60),
        );
        let snapshot = reporter.collect_snapshot().await.unwrap();
        assert!(snapshot.recent_scans.is_empty());
        assert!(snapshot.scheduler.current_state.is_none());
    }

    #[tokio::test]
    async fn reflects_persisted_scheduler_state() {
        let store = Store::connect("sqlite::memory:", 1).await.unwrap();
        let repo = SchedulerRepository::new(store.pool.clone());
        let mut state = crate::domain::types::SchedulerState::initial(chrono::Utc::now());
        state.api_calls_today = 42;
        repo.save(&state).await.unwrap();

        let reporter = MetricsReporter::new(
            Arc::new(TtlCache::new(1024 * 1024)),
            Arc::new(CircuitBreakerRegistry::default()),
            repo,
            ScanRepository::new(store.pool.clone()),
            Metrics::new().unwrap(),
            Duration::from_secs(60),
        );
        let snapshot = reporter.collect_snapshot().await.unwrap();
        assert_eq!(snapshot.scheduler.api_calls_today, Some(42));
    }
}
