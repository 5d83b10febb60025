//! Prometheus metrics definitions for optionsentry.
//!
//! All metrics use the `optionsentry_` prefix and are read-only: nothing in this
//! module accepts inbound connections, it only accumulates counters/gauges for an
//! external collaborator to scrape or a reporter to log.

use prometheus::{
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
    CounterVec, Gauge, GaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Prometheus metrics for the scan/alert pipeline.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Total scans by final status (completed/failed/partial).
    pub scans_total: CounterVec,
    /// Total alerts emitted by detector name.
    pub alerts_emitted_total: CounterVec,
    /// Rolling cache hit rate (0-1).
    pub cache_hit_rate: GenericGauge<AtomicF64>,
    /// Circuit breaker state per endpoint (0=closed, 1=half_open, 2=open).
    pub breaker_state: GenericGaugeVec<AtomicF64>,
    /// Current scheduler state, one gauge per state name set to 1 for the active one.
    pub scheduler_state: GenericGaugeVec<AtomicF64>,
    /// API calls consumed so far in the current rolling hour.
    pub api_calls_this_hour: GenericGauge<AtomicF64>,
    /// API calls consumed so far in the current rolling day.
    pub api_calls_today: GenericGauge<AtomicF64>,
    /// Process uptime in seconds.
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    /// Creates a new `Metrics` instance with all gauges and counters registered.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let scans_total = CounterVec::new(
            Opts::new("optionsentry_scans_total", "Total scans by final status"),
            &["status"],
        )?;
        registry.register(Box::new(scans_total.clone()))?;

        let alerts_emitted_total = CounterVec::new(
            Opts::new("optionsentry_alerts_emitted_total", "Total alerts emitted by detector"),
            &["detector"],
        )?;
        registry.register(Box::new(alerts_emitted_total.clone()))?;

        let cache_hit_rate = Gauge::with_opts(Opts::new("optionsentry_cache_hit_rate", "Rolling cache hit rate (0-1)"))?;
        registry.register(Box::new(cache_hit_rate.clone()))?;

        let breaker_state = GaugeVec::new(
            Opts::new(
                "optionsentry_breaker_state",
                "Circuit breaker state per endpoint (0=closed, 1=half_open, 2=open)",
            ),
            &["endpoint"],
        )?;
        registry.register(Box::new(breaker_state.clone()))?;

        let scheduler_state = GaugeVec::new(
            Opts::new("optionsentry_scheduler_state", "1 for the currently active scheduler state, else 0"),
            &["state"],
        )?;
        registry.register(Box::new(scheduler_state.clone()))?;

        let api_calls_this_hour = Gauge::with_opts(Opts::new(
            "optionsentry_api_calls_this_hour",
            "Provider calls consumed in the current rolling hour",
        ))?;
        registry.register(Box::new(api_calls_this_hour.clone()))?;

        let api_calls_today = Gauge::with_opts(Opts::new(
            "optionsentry_api_calls_today",
            "Provider calls consumed in the current rolling day",
        ))?;
        registry.register(Box::new(api_calls_today.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new("optionsentry_uptime_seconds", "Process uptime in seconds"))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            scans_total,
            alerts_emitted_total,
            cache_hit_rate,
            breaker_state,
            scheduler_state,
            api_calls_this_hour,
            api_calls_today,
            uptime_seconds,
        })
    }

    /// Renders all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    pub fn record_scan(&self, status: &str) {
        self.scans_total.with_label_values(&[status]).inc();
    }

    pub fn record_alert(&self, detector: &str) {
        self.alerts_emitted_total.with_label_values(&[detector]).inc();
    }

    pub fn set_breaker_state(&self, endpoint: &str, state_code: f64) {
        self.breaker_state.with_label_values(&[endpoint]).set(state_code);
    }

    /// Sets exactly one of the five named scheduler states to 1, all others to 0.
    pub fn set_scheduler_state(&self, active: &str) {
        for state in ["IDLE", "WAITING", "COLLECTING", "FLUSHING", "BACKING_OFF"] {
            self.scheduler_state.with_label_values(&[state]).set(if state == active { 1.0 } else { 0.0 });
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to construct default Metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_with_expected_prefix() {
        let metrics = Metrics::new().unwrap();
        assert!(metrics.render().contains("optionsentry_"));
    }

    #[test]
    fn scan_counter_increments_by_status() {
        let metrics = Metrics::new().unwrap();
        metrics.record_scan("completed");
        metrics.record_scan("completed");
        metrics.record_scan("failed");
        let output = metrics.render();
        assert!(output.contains("optionsentry_scans_total"));
    }

    #[test]
    fn scheduler_state_is_exclusive() {
        let metrics = Metrics::new().unwrap();
        metrics.set_scheduler_state("COLLECTING");
        assert_eq!(metrics.scheduler_state.with_label_values(&["COLLECTING"]).get(), 1.0);
        assert_eq!(metrics.scheduler_state.with_label_values(&["WAITING"]).get(), 0.0);
    }

    #[test]
    fn breaker_state_tracks_per_endpoint() {
        let metrics = Metrics::new().unwrap();
        metrics.set_breaker_state("price_feed", 2.0);
        assert_eq!(metrics.breaker_state.with_label_values(&["price_feed"]).get(), 2.0);
    }
}
