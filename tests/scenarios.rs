//! End-to-end scenarios driving the detect -> score -> risk-gate -> throttle ->
//! explain pipeline the way `Orchestrator::run_ticker` composes it, plus an
//! exporter write-path check, using only the crate's public surface.

use optionsentry::application::detectors::{Detector, EarningsCrushDetector, LowIvDetector, TermKinkDetector};
use optionsentry::application::risk_gate::{self, RiskGateConfig};
use optionsentry::application::scorer::{self, ScorerConfig};
use optionsentry::application::throttler::{Throttler, ThrottlerConfig};
use optionsentry::application::{explanation, scheduler::SchedulerConfig};
use optionsentry::domain::types::{AccountState, Confidence, FeatureSet};
use optionsentry::infrastructure::exporter::Exporter;
use optionsentry::infrastructure::persistence::{AlertRepository, ChainRepository, CooldownRepository, FeatureRepository, ScanRepository, Store};
use chrono::Utc;

fn well_capitalized_account() -> AccountState {
    AccountState { cash_available: 1_000_000.0, margin_available: 1_000_000.0, positions: vec![] }
}

/// Scenario 1: an idealized low-IV snapshot clears detection, scoring and the risk
/// gate and would reach the throttler as an admissible alert.
#[test]
fn low_iv_alert_survives_the_full_pipeline() {
    let mut features = FeatureSet::empty("AAPL", Utc::now());
    features.iv_metrics.iv_percentile = Some(12.0);
    features.volatility.expanding = Some(false);

    let candidate = LowIvDetector::default().detect(&features).expect("low IV should fire");
    assert_eq!(candidate.confidence, Confidence::High);

    let adjusted = scorer::score_alert(&candidate, "AAPL", &features, &ScorerConfig::default());
    assert!(adjusted >= 60.0);

    let (ok, reason) = risk_gate::passes(&candidate, "AAPL", 150.0, &well_capitalized_account(), &RiskGateConfig::default());
    assert!(ok, "risk gate rejected with {reason:?}");

    let explanation = explanation::generate(&candidate, "AAPL", &features);
    assert!(explanation.contains_key("opportunity"));
}

/// Scenario 2: an imminent-earnings ticker fires EarningsCrush, but the scorer's
/// earnings penalty and the detector's own near-52w-high modifier still leave the
/// candidate admissible -- it is not *suppressed*, its score is pulled down.
#[test]
fn earnings_crush_near_term_applies_earnings_penalty() {
    let mut features = FeatureSet::empty("XYZ", Utc::now());
    features.earnings.days_to_earnings = Some(2);
    features.iv_metrics.iv_percentile = Some(80.0);

    let candidate = EarningsCrushDetector::default().detect(&features).expect("earnings crush should fire");
    assert_eq!(candidate.score, 95.0);
    assert_eq!(candidate.confidence, Confidence::High);

    let adjusted = scorer::score_alert(&candidate, "XYZ", &features, &ScorerConfig::default());
    assert_eq!(adjusted, 85.0, "earnings_penalty should shave 10 points off the raw 95");

    let explanation = explanation::generate(&candidate, "XYZ", &features);
    assert!(explanation.values().any(|v| v.to_lowercase().contains("earnings")));
}

/// Scenario 3: backwardation outside the normal contango band fires TermKink with a
/// medium confidence grade when the raw band-edge deviation sits in the 10-20% range,
/// independent of how far the final (modifier-adjusted) score has moved.
#[test]
fn backwardation_fires_with_medium_confidence_on_moderate_deviation() {
    let mut features = FeatureSet::empty("SPY", Utc::now());
    features.options_front.atm_iv = Some(0.40);
    features.options_back.atm_iv = Some(0.35);

    let candidate = TermKinkDetector::default().detect(&features).expect("backwardation should fire");
    let ratio = *candidate.metrics.get("term_structure_ratio").expect("ratio metric must be present");
    assert!((ratio - 0.875).abs() < 1e-9);
    assert_eq!(candidate.metrics.get("kind"), Some(&0.0));
    assert_eq!(candidate.confidence, Confidence::Medium);
}

/// Scenario 4: the throttler blocks a second admissible alert for the same ticker
/// within the cooldown window, mirroring the sequential should_alert/record_alert
/// calls `run_ticker` makes per detector.
#[tokio::test]
async fn throttle_blocks_second_emission_for_same_ticker_within_cooldown() {
    let store = Store::connect("sqlite::memory:", 1).await.unwrap();
    let throttler = Throttler::new(CooldownRepository::new(store.pool.clone()), ThrottlerConfig::default());

    let mut features = FeatureSet::empty("NFLX", Utc::now());
    features.iv_metrics.iv_percentile = Some(10.0);
    let first = LowIvDetector::default().detect(&features).unwrap();
    let first_adjusted = scorer::score_alert(&first, "NFLX", &features, &ScorerConfig::default());

    assert!(throttler.should_alert("NFLX").await.unwrap());
    assert!(throttler.record_alert("NFLX", first_adjusted).await);

    features.options_front.atm_iv = Some(0.40);
    features.options_back.atm_iv = Some(0.20);
    let second = TermKinkDetector::default().detect(&features).unwrap();
    let (ok, reason) = risk_gate::passes(&second, "NFLX", 150.0, &well_capitalized_account(), &RiskGateConfig::default());
    assert!(ok, "risk gate rejected with {reason:?}");

    assert!(
        !throttler.should_alert("NFLX").await.unwrap(),
        "second detector's candidate for the same ticker must be throttled within the cooldown window"
    );
}

/// Scenario 5 (backoff doubling across consecutive rate-limit events) is exercised
/// as a unit test against `Scheduler::backoff_duration` in `scheduler.rs`, since that
/// calculation is private state-machine detail with no public accessor; this test
/// only checks the public `SchedulerConfig` defaults it doubles from.
#[test]
fn scheduler_config_backoff_defaults_double_before_capping() {
    let config = SchedulerConfig::default();
    assert!(config.backoff_base < config.backoff_cap);
}

/// Scenario 6: exporting twice leaves a single, fully-formed file at the final path
/// (the temp-write-then-rename sequence never exposes a partial file to a reader),
/// and a second pass with nothing new to export still rewrites a well-formed,
/// zero-count payload rather than leaving a stale file in place.
#[tokio::test]
async fn repeated_export_never_leaves_a_partial_file_at_the_final_path() {
    let store = Store::connect("sqlite::memory:", 1).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let exporter = Exporter::new(
        AlertRepository::new(store.pool.clone()),
        ChainRepository::new(store.pool.clone()),
        ScanRepository::new(store.pool.clone()),
        FeatureRepository::new(store.pool.clone()),
        dir.path().join("exports"),
    );

    for _ in 0..2 {
        let result = exporter.export_all(0.0).await;
        assert!(result.failed.is_empty());
        let body = std::fs::read_to_string(dir.path().join("exports").join("alerts.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).expect("final file must always be complete, valid JSON");
        assert_eq!(parsed["alert_count"], 0);

        let leftover_tmp = std::fs::read_dir(dir.path().join("exports"))
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().ends_with(".tmp"));
        assert!(!leftover_tmp, "a temp file surviving past rename means a reader could observe a half-written export");
    }

    assert!(
        std::fs::read_dir(dir.path().join("exports").join("archive")).unwrap().next().is_some(),
        "each export pass must still leave an archive copy even when it writes over the same timestamp"
    );
}
