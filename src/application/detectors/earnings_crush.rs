use super::Detector;
use crate::domain::types::{AlertCandidate, Confidence, FeatureSet};
use std::collections::BTreeMap;

/// Fires ahead of an earnings date when implied volatility is already elevated and
/// likely to "crush" post-announcement (§4.7 EarningsCrush).
pub struct EarningsCrushDetector {
    pub iv_percentile_threshold: f64,
}

impl Default for EarningsCrushDetector {
    fn default() -> Self {
        Self { iv_percentile_threshold: 60.0 }
    }
}

impl Detector for EarningsCrushDetector {
    fn name(&self) -> &'static str {
        "EarningsCrush"
    }

    fn description(&self) -> &'static str {
        "Detects elevated implied volatility ahead of a near-term earnings date"
    }

    fn config_key(&self) -> &'static str {
        "earnings_crush"
    }

    fn detect(&self, features: &FeatureSet) -> Option<AlertCandidate> {
        let days = features.earnings.days_to_earnings?;
        if !(0 < days && days <= 14) {
            return None;
        }
        let iv_percentile = features.iv_metrics.iv_percentile?;
        if iv_percentile < self.iv_percentile_threshold {
            return None;
        }

        let mut score = if days <= 3 {
            95.0
        } else if days <= 7 {
            85.0
        } else {
            70.0
        };
        let mut metrics = BTreeMap::new();
        metrics.insert("days_to_earnings".to_string(), days as f64);
        metrics.insert("iv_percentile".to_string(), iv_percentile);

        if let Some(iv_rank) = features.iv_metrics.iv_rank
            && iv_rank > 75.0
        {
            score += 10.0;
            metrics.insert("iv_rank_modifier".to_string(), 10.0);
        }
        if let Some(atm_iv) = features.options_front.atm_iv
            && atm_iv > 0.60
        {
            score += 5.0;
            metrics.insert("elevated_front_iv_modifier".to_string(), 5.0);
        }
        if let (Some(spot), Some(high_52w)) = (features.price.spot, features.price.fifty_two_week_high)
            && high_52w > 0.0
            && (high_52w - spot) / high_52w <= 0.05
        {
            score -= 15.0;
            metrics.insert("near_52w_high_modifier".to_string(), -15.0);
        }

        let confidence = if days <= 7 { Confidence::High } else { Confidence::Medium };

        AlertCandidate::new(
            self.name(),
            score,
            metrics,
            vec!["Iron Condor".into(), "Bull Put Spread".into(), "Bear Call Spread".into()],
            confidence,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn features_with(days: i64, iv_percentile: f64) -> FeatureSet {
        let mut f = FeatureSet::empty("TEST", Utc::now());
        f.earnings.days_to_earnings = Some(days);
        f.iv_metrics.iv_percentile = Some(iv_percentile);
        f
    }

    #[test]
    fn requires_earnings_within_window() {
        let detector = EarningsCrushDetector::default();
        assert!(detector.detect(&features_with(15, 80.0)).is_none());
        assert!(detector.detect(&features_with(0, 80.0)).is_none());
        assert!(detector.detect(&features_with(5, 80.0)).is_some());
    }

    #[test]
    fn near_term_band_scores_highest_with_high_confidence() {
        let detector = EarningsCrushDetector::default();
        let candidate = detector.detect(&features_with(2, 80.0)).unwrap();
        assert_eq!(candidate.score, 95.0);
        assert_eq!(candidate.confidence, Confidence::High);
    }

    #[test]
    fn far_band_is_medium_confidence() {
        let detector = EarningsCrushDetector::default();
        let candidate = detector.detect(&features_with(12, 80.0)).unwrap();
        assert_eq!(candidate.confidence, Confidence::Medium);
    }
}
