//! Single-scan pipeline: fan out across the watchlist, run each ticker through
//! detection/scoring/gating/throttling, and batch-flush the results (§4.12).

use crate::application::detectors::{all_detectors, detect_safe};
use crate::application::risk_gate::{self, RiskGateConfig};
use crate::application::scorer::{self, ScorerConfig};
use crate::application::throttler::Throttler;
use crate::application::{explanation, feature_engine};
use crate::domain::errors::ProviderError;
use crate::domain::types::FeatureSet;
use crate::domain::types::{AccountState, Alert, ChainSnapshot, MarketSnapshot, Scan, ScanStatus};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::persistence::{AlertRepository, ChainRepository, FeatureRepository, ScanRepository};
use crate::infrastructure::provider::MarketDataProvider;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

const MAX_PROVIDER_RETRIES: u32 = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const MIN_ADJUSTED_SCORE: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub fanout: usize,
    pub config_hash: String,
    /// Alerts are written to the store in chunks of this size during FLUSHING,
    /// rather than one unbounded batch insert per scan.
    pub flush_threshold: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { fanout: 8, config_hash: String::new(), flush_threshold: 100 }
    }
}

pub struct Orchestrator {
    provider: Arc<dyn MarketDataProvider>,
    scans: ScanRepository,
    alerts: AlertRepository,
    features: FeatureRepository,
    chains: ChainRepository,
    throttler: Arc<Throttler>,
    account: AccountState,
    scorer_config: ScorerConfig,
    risk_gate_config: RiskGateConfig,
    config: OrchestratorConfig,
    metrics: Arc<Metrics>,
}

struct TickerResult {
    alerts: Vec<Alert>,
    chain_snapshots: Vec<ChainSnapshot>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        scans: ScanRepository,
        alerts: AlertRepository,
        features: FeatureRepository,
        chains: ChainRepository,
        throttler: Arc<Throttler>,
        account: AccountState,
        scorer_config: ScorerConfig,
        risk_gate_config: RiskGateConfig,
        config: OrchestratorConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            provider,
            scans,
            alerts,
            features,
            chains,
            throttler,
            account,
            scorer_config,
            risk_gate_config,
            config,
            metrics,
        }
    }

    /// Runs one full scan over `watchlist` and returns the final scan status.
    ///
    /// `inter_ticker_delay` staggers each worker's start after it acquires its fanout
    /// permit; the scheduler widens it as hourly call usage climbs (§4.13 adaptive
    /// delay).
    pub async fn run_scan(&self, watchlist: &[String], inter_ticker_delay: Duration) -> anyhow::Result<ScanStatus> {
        let started = Utc::now();
        let scan = Scan::pending(started, self.config.config_hash.clone());
        let scan_id = self.scans.create(&scan).await?;
        self.scans.mark_running(scan_id).await?;

        let semaphore = Arc::new(Semaphore::new(self.config.fanout.max(1)));
        let mut handles = Vec::with_capacity(watchlist.len());
        for ticker in watchlist {
            let ticker = ticker.clone();
            let semaphore = semaphore.clone();
            let provider = self.provider.clone();
            let throttler = self.throttler.clone();
            let features_repo = self.features.clone();
            let account = self.account.clone();
            let scorer_config_thesis = self.scorer_config.thesis_tickers.clone();
            let min_option_volume = self.scorer_config.min_option_volume;
            let max_spread_pct = self.scorer_config.max_spread_pct;
            let risk_gate_config = RiskGateConfig {
                margin_gate_threshold_pct: self.risk_gate_config.margin_gate_threshold_pct,
                cash_gate_threshold_pct: self.risk_gate_config.cash_gate_threshold_pct,
                max_concentration_pct: self.risk_gate_config.max_concentration_pct,
            };
            let config_hash = self.config.config_hash.clone();
            let scan_date = started.date_naive();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                if !inter_ticker_delay.is_zero() {
                    tokio::time::sleep(inter_ticker_delay).await;
                }
                let scorer_config = ScorerConfig {
                    thesis_tickers: scorer_config_thesis,
                    min_option_volume,
                    max_spread_pct,
                };
                run_ticker(
                    &ticker,
                    provider.as_ref(),
                    &throttler,
                    &features_repo,
                    &account,
                    &scorer_config,
                    &risk_gate_config,
                    scan_id,
                    scan_date,
                    &config_hash,
                )
                .await
            }));
        }

        let mut tickers_scanned = 0u32;
        let mut all_alerts = Vec::new();
        let mut all_chains = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Some(result)) => {
                    tickers_scanned += 1;
                    all_alerts.extend(result.alerts);
                    all_chains.extend(result.chain_snapshots);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "ticker task panicked"),
            }
        }

        for snapshot in &all_chains {
            if let Err(e) = self.chains.insert_if_absent(snapshot).await {
                warn!(ticker = %snapshot.ticker, error = %e, "failed to persist chain snapshot");
            }
        }

        let alerts_generated = all_alerts.len() as u32;
        let runtime_seconds = (Utc::now() - started).num_milliseconds() as f64 / 1000.0;

        let (status, error_message) = if all_alerts.is_empty() {
            (ScanStatus::Completed, None)
        } else {
            let chunk_size = self.config.flush_threshold.max(1);
            let mut first_error = None;
            for chunk in all_alerts.chunks(chunk_size) {
                if let Err(e) = self.alerts.insert_batch(chunk).await {
                    warn!(error = %e, chunk_len = chunk.len(), "failed to flush alert chunk");
                    first_error.get_or_insert(e.to_string());
                }
            }
            match first_error {
                Some(msg) => (ScanStatus::Partial, Some(msg)),
                None => (ScanStatus::Completed, None),
            }
        };

        self.scans
            .finish(scan_id, status, tickers_scanned, alerts_generated, runtime_seconds, error_message.as_deref())
            .await?;
        self.metrics.record_scan(status.as_str());
        for alert in &all_alerts {
            self.metrics.record_alert(&alert.detector_name);
        }
        info!(scan_id, tickers_scanned, alerts_generated, runtime_seconds, ?status, "scan complete");

        Ok(status)
    }
}

async fn fetch_snapshot_with_retry(
    provider: &dyn MarketDataProvider,
    ticker: &str,
) -> Result<Option<MarketSnapshot>, ProviderError> {
    let mut attempt = 0;
    loop {
        match provider.get_full_snapshot(ticker).await {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) if e.is_retryable() && attempt < MAX_PROVIDER_RETRIES => {
                attempt += 1;
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                warn!(ticker, attempt, ?delay, "retrying transient provider failure");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_ticker(
    ticker: &str,
    provider: &dyn MarketDataProvider,
    throttler: &Throttler,
    features_repo: &FeatureRepository,
    account: &AccountState,
    scorer_config: &ScorerConfig,
    risk_gate_config: &RiskGateConfig,
    scan_id: i64,
    scan_date: chrono::NaiveDate,
    config_hash: &str,
) -> Option<TickerResult> {
    let snapshot = match fetch_snapshot_with_retry(provider, ticker).await {
        Ok(Some(s)) => s,
        Ok(None) => {
            warn!(ticker, "no snapshot available, skipping");
            return None;
        }
        Err(e) => {
            warn!(ticker, error = %e, "provider failure, skipping ticker");
            return None;
        }
    };

    let features: FeatureSet = feature_engine::compute(&snapshot, config_hash);
    if let Err(e) = features_repo.insert(scan_id, ticker, &features).await {
        warn!(ticker, error = %e, "failed to persist feature snapshot");
    }

    let mut alerts = Vec::new();
    for detector in all_detectors() {
        let Some(candidate) = detect_safe(detector.as_ref(), &features) else {
            continue;
        };
        let adjusted = scorer::score_alert(&candidate, ticker, &features, scorer_config);
        if adjusted < MIN_ADJUSTED_SCORE {
            continue;
        }
        let (passes, reason) = risk_gate::passes(&candidate, ticker, snapshot.spot_price, account, risk_gate_config);
        if !passes {
            info!(ticker, detector = candidate.detector_name, reason, "alert dropped by risk gate");
            continue;
        }
        match throttler.should_alert(ticker).await {
            Ok(true) => {}
            Ok(false) => {
                info!(ticker, detector = candidate.detector_name, "alert throttled");
                continue;
            }
            Err(e) => {
                warn!(ticker, error = %e, "throttler check failed, dropping alert");
                continue;
            }
        }

        let explanation = explanation::generate(&candidate, ticker, &features);
        if !throttler.record_alert(ticker, adjusted).await {
            warn!(ticker, "failed to record throttle state for emitted alert");
        }

        alerts.push(Alert {
            id: None,
            scan_id,
            ticker: ticker.to_string(),
            detector_name: candidate.detector_name,
            score: candidate.score,
            adjusted_score: adjusted,
            metrics: candidate.metrics,
            explanation,
            strategies: candidate.strategies,
            confidence: candidate.confidence,
            created_at: Utc::now(),
        });
    }

    let chain_snapshots = snapshot
        .options_chains
        .values()
        .map(|chain| {
            let total_volume: u64 = chain.calls.iter().map(|c| c.volume).sum::<u64>()
                + chain.puts.iter().map(|c| c.volume).sum::<u64>();
            let total_oi: u64 = chain.calls.iter().map(|c| c.open_interest).sum::<u64>()
                + chain.puts.iter().map(|c| c.open_interest).sum::<u64>();
            ChainSnapshot {
                scan_id,
                ticker: ticker.to_string(),
                snapshot_date: scan_date,
                expiration: chain.expiration,
                dte: chain.dte(scan_date),
                underlying_price: snapshot.spot_price,
                chain_json: serde_json::to_string(chain).unwrap_or_default(),
                num_calls: chain.calls.len() as u32,
                num_puts: chain.puts.len() as u32,
                atm_iv: None,
                total_volume,
                total_oi,
                file_path: format!("historical_data/chains/{scan_date}/{ticker}_chains.json"),
            }
        })
        .collect();

    Some(TickerResult { alerts, chain_snapshots })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::TtlCache;
    use crate::infrastructure::circuit_breaker::CircuitBreakerRegistry;
    use crate::infrastructure::persistence::{CooldownRepository, Store};
    use crate::infrastructure::provider::DemoProvider;
    use crate::application::throttler::ThrottlerConfig;

    async fn test_orchestrator() -> (Orchestrator, Store) {
        let store = Store::connect("sqlite::memory:", 4).await.unwrap();
        let provider: Arc<dyn MarketDataProvider> = Arc::new(DemoProvider::new(
            Arc::new(TtlCache::new(8 * 1024 * 1024)),
            Arc::new(CircuitBreakerRegistry::default()),
        ));
        let throttler = Arc::new(Throttler::new(
            CooldownRepository::new(store.pool.clone()),
            ThrottlerConfig::default(),
        ));
        let orchestrator = Orchestrator::new(
            provider,
            ScanRepository::new(store.pool.clone()),
            AlertRepository::new(store.pool.clone()),
            FeatureRepository::new(store.pool.clone()),
            ChainRepository::new(store.pool.clone()),
            throttler,
            AccountState {
                cash_available: 1_000_000.0,
                margin_available: 1_000_000.0,
                positions: vec![],
            },
            ScorerConfig::default(),
            RiskGateConfig::default(),
            OrchestratorConfig { fanout: 4, config_hash: "test-hash".into(), flush_threshold: 100 },
            Arc::new(Metrics::new().unwrap()),
        );
        (orchestrator, store)
    }

    #[tokio::test]
    async fn scan_over_small_watchlist_completes() {
        let (orchestrator, store) = test_orchestrator().await;
        let status = orchestrator.run_scan(&["AAPL".to_string(), "MSFT".to_string()], Duration::from_millis(0)).await.unwrap();
        assert_eq!(status, ScanStatus::Completed);
        let recent = ScanRepository::new(store.pool.clone()).recent(10).await.unwrap();
        assert_eq!(recent[0].tickers_scanned, 2);
    }

    #[tokio::test]
    async fn empty_watchlist_still_completes_cleanly() {
        let (orchestrator, _store) = test_orchestrator().await;
        let status = orchestrator.run_scan(&[], Duration::from_millis(0)).await.unwrap();
        assert_eq!(status, ScanStatus::Completed);
    }
}
