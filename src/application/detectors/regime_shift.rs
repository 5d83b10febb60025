use super::Detector;
use crate::domain::types::{AlertCandidate, Confidence, FeatureSet};
use std::collections::BTreeMap;

const CROSS_PROXIMITY_PCT: f64 = 0.03;
const MACD_HISTOGRAM_EPSILON: f64 = 0.01;

enum Scenario {
    GoldenCross,
    DeathCross,
    SupportBounce,
}

/// Fires on a moving-average crossover setup or a bounce off the 50-day average
/// (§4.7 RegimeShift).
pub struct RegimeShiftDetector;

impl Default for RegimeShiftDetector {
    fn default() -> Self {
        Self
    }
}

impl Detector for RegimeShiftDetector {
    fn name(&self) -> &'static str {
        "RegimeShift"
    }

    fn description(&self) -> &'static str {
        "Detects a moving-average crossover setup or a support/resistance bounce"
    }

    fn config_key(&self) -> &'static str {
        "regime_shift"
    }

    fn detect(&self, features: &FeatureSet) -> Option<AlertCandidate> {
        let sma50 = features.technicals.sma_50?;
        let sma200 = features.technicals.sma_200?;
        let spot = features.price.spot?;

        let cross_proximity = if sma200 != 0.0 { ((sma50 - sma200) / sma200).abs() } else { return None };

        let (scenario, mut score) = if sma50 < sma200 && cross_proximity <= CROSS_PROXIMITY_PCT && spot > sma50 {
            let score = if sma50 < spot && spot < sma200 { 80.0 } else { 60.0 };
            (Scenario::GoldenCross, score)
        } else if sma50 > sma200 && cross_proximity <= CROSS_PROXIMITY_PCT && spot < sma50 {
            let score = if sma200 < spot && spot < sma50 { 80.0 } else { 60.0 };
            (Scenario::DeathCross, score)
        } else if spot >= sma50 && sma50 > 0.0 && ((spot - sma50) / sma50).abs() <= CROSS_PROXIMITY_PCT {
            (Scenario::SupportBounce, 70.0)
        } else {
            return None;
        };

        let mut metrics = BTreeMap::new();
        metrics.insert("sma_50".to_string(), sma50);
        metrics.insert("sma_200".to_string(), sma200);

        let mut has_momentum = false;
        let mut has_volume = false;

        if let Some(histogram) = features.technicals.macd_histogram
            && histogram.abs() > MACD_HISTOGRAM_EPSILON
        {
            score += 15.0;
            has_momentum = true;
            metrics.insert("macd_momentum_modifier".to_string(), 15.0);
        }
        if let (Some(current), Some(avg)) = (features.technicals.current_volume, features.technicals.volume_sma_20)
            && avg > 0.0
            && current > 1.2 * avg
        {
            score += 10.0;
            has_volume = true;
            metrics.insert("volume_surge_modifier".to_string(), 10.0);
        }
        if let Some(rsi) = features.technicals.rsi_14
            && (40.0..=60.0).contains(&rsi)
        {
            score -= 10.0;
            metrics.insert("neutral_rsi_modifier".to_string(), -10.0);
        }

        let confidence = if has_momentum && has_volume {
            Confidence::High
        } else if has_momentum || has_volume {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        let strategies = match scenario {
            Scenario::GoldenCross | Scenario::SupportBounce => {
                vec!["Wheel".to_string(), "Cash-Secured Put".to_string()]
            }
            Scenario::DeathCross => vec!["Covered Call".to_string()],
        };

        AlertCandidate::new(self.name(), score, metrics, strategies, confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn features_with(sma50: f64, sma200: f64, spot: f64) -> FeatureSet {
        let mut f = FeatureSet::empty("TEST", Utc::now());
        f.technicals.sma_50 = Some(sma50);
        f.technicals.sma_200 = Some(sma200);
        f.price.spot = Some(spot);
        f
    }

    #[test]
    fn golden_cross_setup_fires() {
        let detector = RegimeShiftDetector::default();
        let candidate = detector.detect(&features_with(98.0, 100.0, 99.0)).unwrap();
        assert_eq!(candidate.strategies, vec!["Wheel".to_string(), "Cash-Secured Put".to_string()]);
    }

    #[test]
    fn death_cross_setup_fires() {
        let detector = RegimeShiftDetector::default();
        let candidate = detector.detect(&features_with(102.0, 100.0, 101.0)).unwrap();
        assert_eq!(candidate.strategies, vec!["Covered Call".to_string()]);
    }

    #[test]
    fn far_apart_averages_do_not_fire() {
        let detector = RegimeShiftDetector::default();
        assert!(detector.detect(&features_with(80.0, 100.0, 90.0)).is_none());
    }
}
