//! IDLE/WAITING/COLLECTING/FLUSHING/BACKING_OFF state machine driving scan
//! invocations against wall-clock triggers and rate budgets (§4.13).

use crate::application::orchestrator::Orchestrator;
use crate::domain::calendar::MarketCalendar;
use crate::domain::types::{ScanStatus, SchedulerState, SchedulerStateKind};
use crate::infrastructure::circuit_breaker::CircuitBreakerRegistry;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::persistence::{ScanRepository, SchedulerRepository};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{info, warn};

pub struct SchedulerConfig {
    /// ET wall-clock times at which a collection should fire each trading day.
    pub scheduled_times_et: Vec<NaiveTime>,
    pub check_interval: Duration,
    pub max_calls_per_hour: u32,
    pub max_calls_per_day: u32,
    pub base_inter_ticker_delay: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduled_times_et: vec![NaiveTime::from_hms_opt(16, 15, 0).unwrap()],
            check_interval: Duration::from_secs(10),
            max_calls_per_hour: 250,
            max_calls_per_day: 2000,
            base_inter_ticker_delay: Duration::from_millis(100),
            backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(3600),
        }
    }
}

pub struct Scheduler {
    calendar: MarketCalendar,
    repo: SchedulerRepository,
    scans: ScanRepository,
    breakers: Arc<CircuitBreakerRegistry>,
    orchestrator: Arc<Orchestrator>,
    watchlist: Vec<String>,
    config: SchedulerConfig,
    manual_trigger: Notify,
    metrics: Arc<Metrics>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        calendar: MarketCalendar,
        repo: SchedulerRepository,
        scans: ScanRepository,
        breakers: Arc<CircuitBreakerRegistry>,
        orchestrator: Arc<Orchestrator>,
        watchlist: Vec<String>,
        config: SchedulerConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            calendar,
            repo,
            scans,
            breakers,
            orchestrator,
            watchlist,
            config,
            manual_trigger: Notify::new(),
            metrics,
        }
    }

    /// Requests an out-of-band collection. Still subject to budget/backoff gating on
    /// the next loop iteration, same as a wall-clock trigger.
    pub fn trigger_scan_now(&self) {
        self.manual_trigger.notify_one();
    }

    /// Loads persisted state, resolves a crash mid-collection, and returns the
    /// recovered state with `current_state` set to `Waiting`.
    async fn recover(&self) -> anyhow::Result<SchedulerState> {
        let now = Utc::now();
        let mut state = self.repo.load().await?.unwrap_or_else(|| SchedulerState::initial(now));

        if state.current_state == SchedulerStateKind::Collecting {
            warn!("scheduler restarted while a collection was in flight, marking it interrupted");
            if let Some(scan) = self.scans.recent(1).await?.into_iter().next()
                && scan.status == ScanStatus::Running
                && let Some(id) = scan.id
            {
                self.scans
                    .finish(id, ScanStatus::Failed, scan.tickers_scanned, scan.alerts_generated, scan.runtime_seconds, Some("interrupted"))
                    .await?;
            }
        }

        state.current_state = SchedulerStateKind::Waiting;
        self.repo.save(&state).await?;
        Ok(state)
    }

    /// Runs the scheduler loop until `shutdown` is set to `true`. Cooperative and
    /// single-threaded within the scheduler itself; the scan it spawns may internally
    /// fan out per §4.12.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut state = match self.recover().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "scheduler failed to recover persisted state, aborting loop");
                return;
            }
        };

        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.tick().await;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(&mut state).await;
                }
                _ = self.manual_trigger.notified() => {
                    if state.current_state == SchedulerStateKind::Waiting {
                        self.attempt_collection(&mut state).await;
                    } else {
                        info!(current_state = state.current_state.as_str(), "manual trigger ignored, scheduler not in WAITING");
                    }
                }
                _ = shutdown.changed() => {}
            }
        }
        info!("scheduler loop exiting on shutdown signal");
    }

    async fn tick(&self, state: &mut SchedulerState) {
        let now = Utc::now();
        self.refresh_windows(state, now);

        match state.current_state {
            SchedulerStateKind::Idle => {
                state.current_state = SchedulerStateKind::Waiting;
                self.persist(state).await;
            }
            SchedulerStateKind::Waiting => {
                if self.is_due(state, now) {
                    self.attempt_collection(state).await;
                }
            }
            SchedulerStateKind::BackingOff => {
                if state.backoff_until.is_none_or(|until| now >= until) {
                    info!("backoff window elapsed, returning to WAITING");
                    state.current_state = SchedulerStateKind::Waiting;
                    self.persist(state).await;
                }
            }
            SchedulerStateKind::Collecting | SchedulerStateKind::Flushing => {
                // Only reachable if a prior `attempt_collection` panicked mid-flight;
                // `recover()` resolves this case on the next restart.
            }
        }
    }

    fn is_due(&self, state: &SchedulerState, now: DateTime<Utc>) -> bool {
        if state.backoff_until.is_some_and(|until| now < until) {
            return false;
        }
        let anchor = state.last_collection_at.unwrap_or(now - ChronoDuration::days(1));
        self.config
            .scheduled_times_et
            .iter()
            .any(|time_of_day| now >= self.calendar.next_scheduled_instant(anchor, *time_of_day))
    }

    async fn attempt_collection(&self, state: &mut SchedulerState) {
        if !self.budget_available(state) {
            self.enter_backoff(state, "budget_exhausted").await;
            return;
        }

        state.current_state = SchedulerStateKind::Collecting;
        self.persist(state).await;

        let delay = self.inter_ticker_delay(state);
        let result = self.orchestrator.run_scan(&self.watchlist, delay).await;

        state.current_state = SchedulerStateKind::Flushing;
        state.api_calls_this_hour = state.api_calls_this_hour.saturating_add(self.watchlist.len() as u32);
        state.api_calls_today = state.api_calls_today.saturating_add(self.watchlist.len() as u32);
        self.persist(state).await;

        match result {
            Ok(status) => {
                info!(?status, "scan cycle finished");
                state.last_collection_at = Some(Utc::now());
                state.backoff_epoch = 0;
                state.current_state = SchedulerStateKind::Waiting;
                self.persist(state).await;
            }
            Err(e) => {
                warn!(error = %e, "scan cycle failed");
                self.enter_backoff(state, "scan_error").await;
                return;
            }
        }

        if self.breakers.any_open().await {
            self.enter_backoff(state, "breaker_open").await;
        }
    }

    fn budget_available(&self, state: &SchedulerState) -> bool {
        let estimated_calls = self.watchlist.len() as u32;
        state.api_calls_this_hour.saturating_add(estimated_calls) <= self.config.max_calls_per_hour
            && state.api_calls_today.saturating_add(estimated_calls) <= self.config.max_calls_per_day
    }

    async fn enter_backoff(&self, state: &mut SchedulerState, reason: &str) {
        let backoff = self.backoff_duration(state.backoff_epoch);
        state.backoff_until = Some(Utc::now() + ChronoDuration::from_std(backoff).unwrap_or(ChronoDuration::zero()));
        state.backoff_epoch = state.backoff_epoch.saturating_add(1);
        state.current_state = SchedulerStateKind::BackingOff;
        warn!(reason, epoch = state.backoff_epoch, ?backoff, "scheduler entering BACKING_OFF");
        self.persist(state).await;
    }

    fn backoff_duration(&self, epoch: u32) -> Duration {
        let multiplier = 1u64.checked_shl(epoch).unwrap_or(u64::MAX);
        let scaled = self.config.backoff_base.saturating_mul(multiplier.min(u32::MAX as u64) as u32);
        scaled.min(self.config.backoff_cap)
    }

    fn refresh_windows(&self, state: &mut SchedulerState, now: DateTime<Utc>) {
        if now - state.hour_window_start >= ChronoDuration::hours(1) {
            state.hour_window_start = now;
            state.api_calls_this_hour = 0;
        }
        if now - state.day_window_start >= ChronoDuration::days(1) {
            state.day_window_start = now;
            state.api_calls_today = 0;
        }
    }

    /// Widens the base inter-ticker delay once hourly usage crosses 50% (§4.13).
    fn inter_ticker_delay(&self, state: &SchedulerState) -> Duration {
        let usage = state.api_calls_this_hour as f64 / self.config.max_calls_per_hour.max(1) as f64;
        if usage < 0.5 {
            return self.config.base_inter_ticker_delay;
        }
        let factor = 1.0 + (usage - 0.5) * 4.0;
        self.config.base_inter_ticker_delay.mul_f64(factor)
    }

    async fn persist(&self, state: &SchedulerState) {
        self.metrics.set_scheduler_state(state.current_state.as_str());
        self.metrics.api_calls_this_hour.set(state.api_calls_this_hour as f64);
        self.metrics.api_calls_today.set(state.api_calls_today as f64);
        if let Err(e) = self.repo.save(state).await {
            warn!(error = %e, "failed to persist scheduler state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::orchestrator::OrchestratorConfig;
    use crate::application::risk_gate::RiskGateConfig;
    use crate::application::scorer::ScorerConfig;
    use crate::application::throttler::{Throttler, ThrottlerConfig};
    use crate::domain::calendar::HolidaySet;
    use crate::domain::types::AccountState;
    use crate::infrastructure::cache::TtlCache;
    use crate::infrastructure::persistence::{AlertRepository, ChainRepository, CooldownRepository, FeatureRepository, Store};
    use crate::infrastructure::provider::{DemoProvider, MarketDataProvider};

    async fn test_scheduler() -> (Scheduler, Store) {
        let store = Store::connect("sqlite::memory:", 4).await.unwrap();
        let breakers = Arc::new(CircuitBreakerRegistry::default());
        let provider: Arc<dyn MarketDataProvider> =
            Arc::new(DemoProvider::new(Arc::new(TtlCache::new(8 * 1024 * 1024)), breakers.clone()));
        let throttler = Arc::new(Throttler::new(CooldownRepository::new(store.pool.clone()), ThrottlerConfig::default()));
        let orchestrator = Arc::new(Orchestrator::new(
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
            OrchestratorConfig { fanout: 4, config_hash: "test".into(), flush_threshold: 100 },
            Arc::new(Metrics::new().unwrap()),
        ));
        let scheduler = Scheduler::new(
            MarketCalendar::new(HolidaySet::default_us_holidays(2026)),
            SchedulerRepository::new(store.pool.clone()),
            ScanRepository::new(store.pool.clone()),
            breakers,
            orchestrator,
            vec!["AAPL".to_string()],
            SchedulerConfig::default(),
            Arc::new(Metrics::new().unwrap()),
        );
        (scheduler, store)
    }

    #[tokio::test]
    async fn recover_from_fresh_store_lands_in_waiting() {
        let (scheduler, _store) = test_scheduler().await;
        let state = scheduler.recover().await.unwrap();
        assert_eq!(state.current_state, SchedulerStateKind::Waiting);
    }

    #[tokio::test]
    async fn recover_marks_interrupted_collection_as_failed() {
        let (scheduler, store) = test_scheduler().await;
        let scans = ScanRepository::new(store.pool.clone());
        let scan = crate::domain::types::Scan::pending(Utc::now(), "hash".to_string());
        let id = scans.create(&scan).await.unwrap();
        scans.mark_running(id).await.unwrap();

        let mut state = SchedulerState::initial(Utc::now());
        state.current_state = SchedulerStateKind::Collecting;
        scheduler.repo.save(&state).await.unwrap();

        scheduler.recover().await.unwrap();
        let recent = scans.recent(1).await.unwrap();
        assert_eq!(recent[0].status, ScanStatus::Failed);
        assert_eq!(recent[0].error_message.as_deref(), Some("interrupted"));
    }

    #[tokio::test]
    async fn budget_exhausted_blocks_collection() {
        let (scheduler, _store) = test_scheduler().await;
        let mut state = SchedulerState::initial(Utc::now());
        state.api_calls_this_hour = scheduler.config.max_calls_per_hour;
        assert!(!scheduler.budget_available(&state));
    }

    #[tokio::test]
    async fn inter_ticker_delay_widens_above_fifty_percent_usage() {
        let (scheduler, _store) = test_scheduler().await;
        let mut state = SchedulerState::initial(Utc::now());
        state.api_calls_this_hour = scheduler.config.max_calls_per_hour; // 100% usage
        let delay = scheduler.inter_ticker_delay(&state);
        assert!(delay > scheduler.config.base_inter_ticker_delay);
    }

    #[tokio::test]
    async fn manual_trigger_is_accepted_without_panicking() {
        let (scheduler, _store) = test_scheduler().await;
        scheduler.trigger_scan_now();
    }

    #[tokio::test]
    async fn backoff_duration_doubles_each_epoch_then_caps() {
        let (scheduler, _store) = test_scheduler().await;
        assert_eq!(scheduler.backoff_duration(0), scheduler.config.backoff_base);
        assert_eq!(scheduler.backoff_duration(1), scheduler.config.backoff_base * 2);
        assert_eq!(scheduler.backoff_duration(2), scheduler.config.backoff_base * 4);
        assert_eq!(scheduler.backoff_duration(20), scheduler.config.backoff_cap, "growth must clamp at the configured cap");
    }

    #[tokio::test]
    async fn enter_backoff_persists_state_and_increments_epoch_across_consecutive_failures() {
        let (scheduler, _store) = test_scheduler().await;
        let mut state = SchedulerState::initial(Utc::now());

        scheduler.enter_backoff(&mut state, "scan_error").await;
        assert_eq!(state.current_state, SchedulerStateKind::BackingOff);
        assert_eq!(state.backoff_epoch, 1);
        let first_until = state.backoff_until.expect("backoff_until must be set");

        scheduler.enter_backoff(&mut state, "scan_error").await;
        assert_eq!(state.backoff_epoch, 2);
        let second_until = state.backoff_until.expect("backoff_until must be set");
        assert!(
            second_until - first_until >= ChronoDuration::from_std(scheduler.config.backoff_base).unwrap(),
            "the second consecutive failure must back off for longer than the first"
        );

        let reloaded = scheduler.repo.load().await.unwrap().expect("backoff state must be persisted across restarts");
        assert_eq!(reloaded.backoff_epoch, 2);
    }
}
