//! Portfolio-aware score adjustment applied after detection, before risk gating
//! (§4.8).

use crate::domain::types::{AlertCandidate, FeatureSet, VolTrend};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    pub thesis_tickers: std::collections::HashSet<String>,
    pub min_option_volume: f64,
    pub max_spread_pct: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            thesis_tickers: std::collections::HashSet::new(),
            min_option_volume: 100.0,
            max_spread_pct: 3.0,
        }
    }
}

/// Adjusts a candidate's raw detector score using portfolio/liquidity/earnings/
/// technical/volatility context, in the fixed order §4.8 specifies. Every applied
/// delta is logged; a read that comes back absent skips that adjustment silently.
pub fn score_alert(candidate: &AlertCandidate, ticker: &str, features: &FeatureSet, config: &ScorerConfig) -> f64 {
    let mut adjusted = candidate.score;
    let mut deltas: BTreeMap<&'static str, f64> = BTreeMap::new();

    if config.thesis_tickers.contains(ticker) {
        adjusted += 20.0;
        deltas.insert("thesis_bonus", 20.0);
    }

    let liquidity_penalty = match (features.liquidity.spread_pct, features.liquidity.atm_volume) {
        (Some(spread), _) if spread > config.max_spread_pct => true,
        (_, Some(volume)) if volume < config.min_option_volume => true,
        _ => false,
    };
    if liquidity_penalty {
        adjusted -= 15.0;
        deltas.insert("liquidity_penalty", -15.0);
    }

    if let Some(days) = features.earnings.days_to_earnings
        && (0..=3).contains(&days)
    {
        adjusted -= 10.0;
        deltas.insert("earnings_penalty", -10.0);
    }

    if let Some(histogram) = features.technicals.macd_histogram
        && histogram > 0.0
    {
        adjusted += 10.0;
        deltas.insert("technical_bonus", 10.0);
    }

    if features.volatility.vol_trend == Some(VolTrend::Increasing) {
        adjusted += 5.0;
        deltas.insert("volatility_bonus", 5.0);
    }

    adjusted = adjusted.clamp(0.0, 100.0);
    debug!(ticker, detector = candidate.detector_name, raw = candidate.score, adjusted, ?deltas, "scored alert candidate");
    adjusted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Confidence;
    use chrono::Utc;

    fn candidate(score: f64) -> AlertCandidate {
        AlertCandidate::new("LowIV", score, BTreeMap::new(), vec![], Confidence::Medium).unwrap()
    }

    #[test]
    fn thesis_ticker_gets_a_bonus() {
        let mut config = ScorerConfig::default();
        config.thesis_tickers.insert("AAPL".to_string());
        let features = FeatureSet::empty("AAPL", Utc::now());
        let adjusted = score_alert(&candidate(60.0), "AAPL", &features, &config);
        assert_eq!(adjusted, 80.0);
    }

    #[test]
    fn wide_spread_incurs_liquidity_penalty() {
        let config = ScorerConfig::default();
        let mut features = FeatureSet::empty("MSFT", Utc::now());
        features.liquidity.spread_pct = Some(10.0);
        let adjusted = score_alert(&candidate(70.0), "MSFT", &features, &config);
        assert_eq!(adjusted, 55.0);
    }

    #[test]
    fn score_is_clamped_to_100() {
        let mut config = ScorerConfig::default();
        config.thesis_tickers.insert("NFLX".to_string());
        let mut features = FeatureSet::empty("NFLX", Utc::now());
        features.technicals.macd_histogram = Some(1.0);
        features.volatility.vol_trend = Some(VolTrend::Increasing);
        let adjusted = score_alert(&candidate(90.0), "NFLX", &features, &config);
        assert_eq!(adjusted, 100.0);
    }

    #[test]
    fn absent_reads_skip_adjustment_silently() {
        let config = ScorerConfig::default();
        let features = FeatureSet::empty("GOOG", Utc::now());
        let adjusted = score_alert(&candidate(65.0), "GOOG", &features, &config);
        assert_eq!(adjusted, 65.0);
    }
}
