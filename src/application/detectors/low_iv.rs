use super::Detector;
use crate::domain::types::{AlertCandidate, Confidence, FeatureSet};
use std::collections::BTreeMap;

/// Fires when current implied volatility sits low relative to its trailing window,
/// favoring long-premium strategies (§4.7 LowIV).
pub struct LowIvDetector {
    pub iv_percentile_threshold: f64,
}

impl Default for LowIvDetector {
    fn default() -> Self {
        Self { iv_percentile_threshold: 25.0 }
    }
}

impl Detector for LowIvDetector {
    fn name(&self) -> &'static str {
        "LowIV"
    }

    fn description(&self) -> &'static str {
        "Detects depressed implied volatility favorable to long-premium strategies"
    }

    fn config_key(&self) -> &'static str {
        "low_iv"
    }

    fn detect(&self, features: &FeatureSet) -> Option<AlertCandidate> {
        let iv_percentile = features.iv_metrics.iv_percentile?;
        if iv_percentile >= self.iv_percentile_threshold {
            return None;
        }

        let mut score = 100.0 - iv_percentile;
        let mut metrics = BTreeMap::new();
        metrics.insert("iv_percentile".to_string(), iv_percentile);

        if features.volatility.expanding == Some(true) {
            score -= 15.0;
            metrics.insert("vol_expanding_modifier".to_string(), -15.0);
        }
        if let Some(rsi) = features.technicals.rsi_14
            && rsi < 30.0
        {
            score += 10.0;
            metrics.insert("rsi_oversold_modifier".to_string(), 10.0);
            metrics.insert("rsi_14".to_string(), rsi);
        }
        if let (Some(spot), Some(support)) = (features.price.spot, features.technicals.support_20d)
            && support > 0.0
            && ((spot - support) / support).abs() <= 0.05
        {
            score += 5.0;
            metrics.insert("near_support_modifier".to_string(), 5.0);
        }

        let confidence = if iv_percentile < 15.0 {
            Confidence::High
        } else if iv_percentile < 30.0 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        AlertCandidate::new(
            self.name(),
            score,
            metrics,
            vec!["Long Straddle".into(), "Calendar Spread".into(), "Bull Call Spread".into()],
            confidence,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn features_with(iv_percentile: f64) -> FeatureSet {
        let mut f = FeatureSet::empty("TEST", Utc::now());
        f.iv_metrics.iv_percentile = Some(iv_percentile);
        f
    }

    #[test]
    fn fires_only_below_threshold() {
        let detector = LowIvDetector::default();
        assert!(detector.detect(&features_with(30.0)).is_none());
        assert!(detector.detect(&features_with(10.0)).is_some());
    }

    #[test]
    fn high_confidence_below_15_percentile() {
        let detector = LowIvDetector::default();
        let candidate = detector.detect(&features_with(10.0)).unwrap();
        assert_eq!(candidate.confidence, Confidence::High);
    }

    #[test]
    fn vol_expanding_modifier_reduces_score() {
        let detector = LowIvDetector::default();
        let mut f = features_with(20.0);
        f.volatility.expanding = Some(true);
        let candidate = detector.detect(&f).unwrap();
        assert_eq!(candidate.metrics.get("vol_expanding_modifier"), Some(&-15.0));
    }

    #[test]
    fn missing_iv_percentile_suppresses_detection() {
        let detector = LowIvDetector::default();
        let f = FeatureSet::empty("TEST", Utc::now());
        assert!(detector.detect(&f).is_none());
    }
}
