//! Headless scan daemon. No UI, no HTTP server; metrics are pushed as structured
//! JSON log lines (§4.16) and alerts/scans/features are exported to disk (§4.14).
//!
//! # Usage
//! ```sh
//! optionsentry --config config.yaml --watchlist watchlist.txt
//! ```

use chrono::Datelike;
use clap::Parser;
use optionsentry::application::orchestrator::Orchestrator;
use optionsentry::application::scheduler::Scheduler;
use optionsentry::application::throttler::Throttler;
use optionsentry::config;
use optionsentry::domain::calendar::{HolidaySet, MarketCalendar};
use optionsentry::infrastructure::cache::TtlCache;
use optionsentry::infrastructure::circuit_breaker::CircuitBreakerRegistry;
use optionsentry::infrastructure::exporter::Exporter;
use optionsentry::infrastructure::observability::{Metrics, MetricsReporter};
use optionsentry::infrastructure::persistence::{
    AlertRepository, ChainRepository, CooldownRepository, FeatureRepository, ScanRepository, SchedulerRepository, Store,
};
use optionsentry::infrastructure::provider::{DemoProvider, LiveMarketDataProvider, MarketDataProvider};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(version, about = "Options scan and alert daemon")]
struct Cli {
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[arg(long, default_value = "watchlist.txt")]
    watchlist: PathBuf,

    #[arg(long, default_value = "optionsentry.db")]
    database: PathBuf,

    #[arg(long, default_value = "exports")]
    export_dir: PathBuf,

    /// Run a single scan cycle immediately and exit, skipping the scheduler loop.
    #[arg(long)]
    once: bool,

    /// Seconds given to in-flight work to finish before the process exits on
    /// SIGTERM/SIGINT.
    #[arg(long, default_value_t = 10)]
    shutdown_grace: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    let config = config::load(&cli.config, &cli.watchlist)?;

    let log_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.to_lowercase()));
    tracing_subscriber::registry()
        .with(log_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        demo_mode = config.demo_mode,
        watchlist_len = config.watchlist.len(),
        config_hash = %config.config_hash,
        "optionsentry starting"
    );

    if config.watchlist.is_empty() {
        warn!("watchlist is empty; scans will do nothing until symbols are configured");
    }

    let db_url = format!("sqlite://{}", cli.database.display());
    let store = Store::connect(&db_url, 8).await?;
    info!(db_url, "store ready");

    let cache = Arc::new(TtlCache::new(64 * 1024 * 1024));
    let breakers = Arc::new(CircuitBreakerRegistry::default());

    let provider: Arc<dyn MarketDataProvider> = if config.demo_mode {
        info!("running against the synthetic demo provider");
        Arc::new(DemoProvider::new(cache.clone(), breakers.clone()).with_ttl_config(config.cache_ttl))
    } else {
        info!(backend_url = %config.backend_url, "running against the live market data backend");
        Arc::new(LiveMarketDataProvider::new(config.backend_url.clone(), cache.clone(), breakers.clone()).with_ttl_config(config.cache_ttl))
    };

    let metrics = Arc::new(Metrics::new()?);
    let throttler = Arc::new(Throttler::new(CooldownRepository::new(store.pool.clone()), config.throttler.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        provider,
        ScanRepository::new(store.pool.clone()),
        AlertRepository::new(store.pool.clone()),
        FeatureRepository::new(store.pool.clone()),
        ChainRepository::new(store.pool.clone()),
        throttler,
        config.account.clone(),
        config.scorer.clone(),
        config.risk_gate.clone(),
        config.orchestrator.clone(),
        metrics.clone(),
    ));

    if cli.once {
        info!("--once given, running a single scan cycle");
        let status = orchestrator.run_scan(&config.watchlist, Duration::from_millis(100)).await?;
        info!(?status, "single scan cycle complete");
        return Ok(());
    }

    let calendar = MarketCalendar::new(HolidaySet::default_us_holidays(chrono::Utc::now().year()));
    let scheduler = Scheduler::new(
        calendar,
        SchedulerRepository::new(store.pool.clone()),
        ScanRepository::new(store.pool.clone()),
        breakers.clone(),
        orchestrator,
        config.watchlist.clone(),
        config.scheduler_config(),
        metrics.clone(),
    );

    let exporter = Arc::new(Exporter::new(
        AlertRepository::new(store.pool.clone()),
        ChainRepository::new(store.pool.clone()),
        ScanRepository::new(store.pool.clone()),
        FeatureRepository::new(store.pool.clone()),
        cli.export_dir,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let scheduler_handle = {
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    let reporter_handle = {
        let reporter = MetricsReporter::new(
            cache,
            breakers,
            SchedulerRepository::new(store.pool.clone()),
            ScanRepository::new(store.pool.clone()),
            (*metrics).clone(),
            Duration::from_secs(60),
        );
        tokio::spawn(async move { reporter.run().await })
    };

    let exporter_handle = {
        let exporter = exporter.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let result = exporter.export_all(0.0).await;
                        if !result.failed.is_empty() {
                            warn!(failed = ?result.failed, "periodic export had failures");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!(grace_seconds = cli.shutdown_grace, "shutdown signal received, draining in-flight work");
    let _ = shutdown_tx.send(true);

    let grace = Duration::from_secs(cli.shutdown_grace);
    if tokio::time::timeout(grace, scheduler_handle).await.is_err() {
        warn!("scheduler did not exit within the shutdown grace period, abandoning it");
    }
    reporter_handle.abort();
    let _ = tokio::time::timeout(grace, exporter_handle).await;

    let final_export = exporter.export_all(0.0).await;
    info!(succeeded = final_export.succeeded.len(), failed = final_export.failed.len(), "final export on shutdown complete");

    info!("optionsentry shut down cleanly");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
