use super::Detector;
use crate::domain::types::{AlertCandidate, Confidence, FeatureSet};
use std::collections::BTreeMap;

const NORMAL_CONTANGO_MIN: f64 = 0.98;
const NORMAL_CONTANGO_MAX: f64 = 1.15;

enum Kind {
    Backwardation,
    SteepContango,
}

/// Fires on an abnormal front/back term-structure ratio, outside the band considered
/// normal contango (§4.7 TermKink).
pub struct TermKinkDetector {
    pub normal_contango_min: f64,
    pub normal_contango_max: f64,
}

impl Default for TermKinkDetector {
    fn default() -> Self {
        Self {
            normal_contango_min: NORMAL_CONTANGO_MIN,
            normal_contango_max: NORMAL_CONTANGO_MAX,
        }
    }
}

impl Detector for TermKinkDetector {
    fn name(&self) -> &'static str {
        "TermKink"
    }

    fn description(&self) -> &'static str {
        "Detects an abnormal front/back implied-volatility term structure"
    }

    fn config_key(&self) -> &'static str {
        "term_kink"
    }

    fn detect(&self, features: &FeatureSet) -> Option<AlertCandidate> {
        let front_iv = features.options_front.atm_iv?;
        let back_iv = features.options_back.atm_iv?;
        if front_iv == 0.0 || back_iv == 0.0 {
            return None;
        }
        let r = back_iv / front_iv;
        if r >= self.normal_contango_min && r <= self.normal_contango_max {
            return None;
        }

        let (kind, bound, deviation) = if r < self.normal_contango_min {
            (Kind::Backwardation, self.normal_contango_min, self.normal_contango_min - r)
        } else {
            (Kind::SteepContango, self.normal_contango_max, r - self.normal_contango_max)
        };
        let bound_distance = (bound - 1.0).abs();
        if bound_distance == 0.0 {
            return None;
        }
        // Raw percentage deviation from the band edge, used only to grade confidence;
        // `score` itself is scaled by `2 * bound_distance` so a kink actually clears the
        // risk gate's 60-point floor instead of living in single digits.
        let raw_deviation_pct = deviation / bound * 100.0;
        let mut score = (deviation / (2.0 * bound_distance) * 100.0).clamp(0.0, 100.0);

        let mut metrics = BTreeMap::new();
        metrics.insert("term_structure_ratio".to_string(), r);
        metrics.insert(
            "kind".to_string(),
            match kind {
                Kind::Backwardation => 0.0,
                Kind::SteepContango => 1.0,
            },
        );

        if matches!(kind, Kind::Backwardation)
            && let Some(iv_percentile) = features.iv_metrics.iv_percentile
            && iv_percentile < 30.0
        {
            score -= 20.0;
            metrics.insert("low_iv_percentile_modifier".to_string(), -20.0);
        }
        if let (Some(front_oi), Some(back_oi)) = (features.options_front.open_interest, features.options_back.open_interest)
            && back_oi > 0.0
            && front_oi > 1.5 * back_oi
        {
            score += 15.0;
            metrics.insert("front_oi_dominance_modifier".to_string(), 15.0);
        }
        if let Some(skew) = features.options_front.skew_25d
            && skew.abs() > 0.15
        {
            score += 10.0;
            metrics.insert("skew_modifier".to_string(), 10.0);
        }

        let confidence = if raw_deviation_pct > 20.0 {
            Confidence::High
        } else if raw_deviation_pct > 10.0 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        AlertCandidate::new(self.name(), score, metrics, vec!["Calendar Spread".into()], confidence)
    }
}
