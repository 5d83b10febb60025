use super::Detector;
use crate::domain::types::{AlertCandidate, Confidence, FeatureSet};
use std::collections::BTreeMap;

/// Fires when implied volatility sits rich relative to its trailing window, favoring
/// premium-selling strategies (§4.7 RichPremium).
pub struct RichPremiumDetector {
    pub iv_percentile_threshold: f64,
}

impl Default for RichPremiumDetector {
    fn default() -> Self {
        Self { iv_percentile_threshold: 75.0 }
    }
}

impl Detector for RichPremiumDetector {
    fn name(&self) -> &'static str {
        "RichPremium"
    }

    fn description(&self) -> &'static str {
        "Detects rich implied volatility favorable to premium-selling strategies"
    }

    fn config_key(&self) -> &'static str {
        "rich_premium"
    }

    fn detect(&self, features: &FeatureSet) -> Option<AlertCandidate> {
        let iv_percentile = features.iv_metrics.iv_percentile?;
        if iv_percentile < self.iv_percentile_threshold {
            return None;
        }

        let mut score = iv_percentile;
        let mut metrics = BTreeMap::new();
        metrics.insert("iv_percentile".to_string(), iv_percentile);

        if let Some(iv_rank) = features.iv_metrics.iv_rank
            && iv_rank > 80.0
        {
            score += 15.0;
            metrics.insert("iv_rank_modifier".to_string(), 15.0);
        }
        if let (Some(spot), Some(sma_200)) = (features.price.spot, features.technicals.sma_200)
            && spot > sma_200
        {
            score += 10.0;
            metrics.insert("above_sma200_modifier".to_string(), 10.0);
        }
        if let Some(ratio) = features.iv_metrics.term_structure_ratio
            && ratio > 1.0
        {
            score += 5.0;
            metrics.insert("contango_modifier".to_string(), 5.0);
        }
        if let (Some(atm_volume), Some(avg_volume)) =
            (features.liquidity.atm_volume, features.technicals.volume_sma_20)
            && avg_volume > 0.0
            && atm_volume < 0.2 * avg_volume
        {
            score -= 10.0;
            metrics.insert("thin_atm_volume_modifier".to_string(), -10.0);
        }

        let confidence = if iv_percentile >= 85.0 {
            Confidence::High
        } else if iv_percentile >= 75.0 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        AlertCandidate::new(
            self.name(),
            score,
            metrics,
            vec![
                "CSP".into(),
                "Covered Call".into(),
                "Iron Condor".into(),
                "Bull Put Spread".into(),
            ],
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
    fn fires_only_at_or_above_threshold() {
        let detector = RichPremiumDetector::default();
        assert!(detector.detect(&features_with(74.9)).is_none());
        assert!(detector.detect(&features_with(80.0)).is_some());
    }

    #[test]
    fn high_confidence_at_85_and_above() {
        let detector = RichPremiumDetector::default();
        let candidate = detector.detect(&features_with(90.0)).unwrap();
        assert_eq!(candidate.confidence, Confidence::High);
    }

    #[test]
    fn thin_atm_volume_penalizes_score() {
        let detector = RichPremiumDetector::default();
        let mut f = features_with(80.0);
        f.liquidity.atm_volume = Some(100.0);
        f.technicals.volume_sma_20 = Some(1_000_000.0);
        let candidate = detector.detect(&f).unwrap();
        assert_eq!(candidate.metrics.get("thin_atm_volume_modifier"), Some(&-10.0));
    }
}
