use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// A detector's raw output before scoring, risk gating and throttling (§3
/// `AlertCandidate`).
///
/// Invariant: never constructed with `score < 60`; detectors suppress sub-threshold
/// signals at source via [`AlertCandidate::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCandidate {
    pub detector_name: String,
    pub score: f64,
    pub metrics: BTreeMap<String, f64>,
    pub explanation: BTreeMap<String, String>,
    pub strategies: Vec<String>,
    pub confidence: Confidence,
}

impl AlertCandidate {
    /// Returns `None` when `score < 60`, enforcing the detector admissibility invariant
    /// at the single construction point every detector funnels through.
    pub fn new(
        detector_name: impl Into<String>,
        score: f64,
        metrics: BTreeMap<String, f64>,
        strategies: Vec<String>,
        confidence: Confidence,
    ) -> Option<Self> {
        if score < 60.0 {
            return None;
        }
        Some(Self {
            detector_name: detector_name.into(),
            score: score.clamp(0.0, 100.0),
            metrics,
            explanation: BTreeMap::new(),
            strategies,
            confidence,
        })
    }
}

/// A candidate that has cleared scoring, the risk gate and the throttler, ready to be
/// batch-persisted (§3 `Alert`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Option<i64>,
    pub scan_id: i64,
    pub ticker: String,
    pub detector_name: String,
    pub score: f64,
    pub adjusted_score: f64,
    pub metrics: BTreeMap<String, f64>,
    pub explanation: BTreeMap<String, String>,
    pub strategies: Vec<String>,
    pub confidence: Confidence,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_below_threshold_is_suppressed() {
        assert!(AlertCandidate::new("LowIV", 59.9, BTreeMap::new(), vec![], Confidence::Low).is_none());
    }

    #[test]
    fn candidate_at_threshold_is_admitted() {
        let c = AlertCandidate::new("LowIV", 60.0, BTreeMap::new(), vec![], Confidence::Low);
        assert!(c.is_some());
    }

    #[test]
    fn candidate_score_is_clamped() {
        let c = AlertCandidate::new("LowIV", 150.0, BTreeMap::new(), vec![], Confidence::High).unwrap();
        assert_eq!(c.score, 100.0);
    }
}
