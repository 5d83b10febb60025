use super::Detector;
use crate::domain::types::{AlertCandidate, Confidence, FeatureSet};
use std::collections::BTreeMap;

const NEUTRAL_BAND: f64 = 0.10;
const DEVIATION_THRESHOLD: f64 = 0.15;

enum Direction {
    PutSkew,
    CallSkew,
}

/// Fires on an abnormally large 25-delta put/call skew (§4.7 SkewAnomaly).
pub struct SkewAnomalyDetector;

impl Default for SkewAnomalyDetector {
    fn default() -> Self {
        Self
    }
}

impl Detector for SkewAnomalyDetector {
    fn name(&self) -> &'static str {
        "SkewAnomaly"
    }

    fn description(&self) -> &'static str {
        "Detects an abnormally large front-month put/call skew"
    }

    fn config_key(&self) -> &'static str {
        "skew_anomaly"
    }

    fn detect(&self, features: &FeatureSet) -> Option<AlertCandidate> {
        let skew = features.options_front.skew_25d?;
        if (-NEUTRAL_BAND..=NEUTRAL_BAND).contains(&skew) {
            return None;
        }
        let deviation = if skew > NEUTRAL_BAND {
            skew - NEUTRAL_BAND
        } else {
            skew + NEUTRAL_BAND
        };
        if deviation.abs() < DEVIATION_THRESHOLD {
            return None;
        }
        let direction = if skew > 0.0 { Direction::PutSkew } else { Direction::CallSkew };

        let mut score = (deviation.abs() / DEVIATION_THRESHOLD * 100.0).clamp(0.0, 100.0);
        let mut metrics = BTreeMap::new();
        metrics.insert("skew_25d".to_string(), skew);
        metrics.insert(
            "direction".to_string(),
            match direction {
                Direction::PutSkew => 0.0,
                Direction::CallSkew => 1.0,
            },
        );

        if let Some(spot) = features.price.spot {
            let fib_levels = [
                features.technicals.fib_retracement_382,
                features.technicals.fib_retracement_500,
                features.technicals.fib_retracement_618,
            ];
            let near_fib = fib_levels
                .into_iter()
                .flatten()
                .any(|level| level > 0.0 && ((spot - level) / level).abs() <= 0.02);
            if near_fib {
                score += 15.0;
                metrics.insert("near_fibonacci_modifier".to_string(), 15.0);
            }
        }
        if let Some(rsi) = features.technicals.rsi_14
            && (rsi > 70.0 || rsi < 30.0)
        {
            score += 20.0;
            metrics.insert("rsi_extreme_modifier".to_string(), 20.0);
        }
        let dominant_volume = match direction {
            Direction::PutSkew => features.options_front.put_volume,
            Direction::CallSkew => features.options_front.call_volume,
        };
        if let (Some(dominant), Some(avg)) = (dominant_volume, features.technicals.volume_sma_20)
            && avg > 0.0
            && dominant > 1.5 * avg
        {
            score += 10.0;
            metrics.insert("dominant_volume_modifier".to_string(), 10.0);
        }

        let confidence = if skew.abs() > 0.25 {
            Confidence::High
        } else if skew.abs() > 0.15 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        let strategies = match direction {
            Direction::PutSkew => vec!["Bear Call Spread".to_string()],
            Direction::CallSkew => vec!["Bull Put Spread".to_string()],
        };

        AlertCandidate::new(self.name(), score, metrics, strategies, confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn features_with(skew: f64) -> FeatureSet {
        let mut f = FeatureSet::empty("TEST", Utc::now());
        f.options_front.skew_25d = Some(skew);
        f
    }

    #[test]
    fn neutral_band_does_not_fire() {
        let detector = SkewAnomalyDetector::default();
        assert!(detector.detect(&features_with(0.05)).is_none());
    }

    #[test]
    fn shallow_deviation_does_not_fire() {
        let detector = SkewAnomalyDetector::default();
        assert!(detector.detect(&features_with(0.15)).is_none());
    }

    #[test]
    fn put_skew_suggests_bear_call_spread() {
        let detector = SkewAnomalyDetector::default();
        let candidate = detector.detect(&features_with(0.30)).unwrap();
        assert_eq!(candidate.strategies, vec!["Bear Call Spread".to_string()]);
    }

    #[test]
    fn call_skew_suggests_bull_put_spread() {
        let detector = SkewAnomalyDetector::default();
        let candidate = detector.detect(&features_with(-0.30)).unwrap();
        assert_eq!(candidate.strategies, vec!["Bull Put Spread".to_string()]);
    }
}
