//! Detector registry and the six signal detectors that turn a [`FeatureSet`] into
//! candidate alerts (§4.7).

mod earnings_crush;
mod low_iv;
mod regime_shift;
mod rich_premium;
mod skew_anomaly;
mod term_kink;

pub use earnings_crush::EarningsCrushDetector;
pub use low_iv::LowIvDetector;
pub use regime_shift::RegimeShiftDetector;
pub use rich_premium::RichPremiumDetector;
pub use skew_anomaly::SkewAnomalyDetector;
pub use term_kink::TermKinkDetector;

use crate::domain::types::{AlertCandidate, FeatureSet};
use tracing::error;

/// A single signal detector. Implementations MUST be pure with respect to external
/// state and MUST only read their own configuration subtree (§4.7).
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn config_key(&self) -> &'static str;
    fn detect(&self, features: &FeatureSet) -> Option<AlertCandidate>;
}

/// Runs `detector.detect`, catching and logging any internal panic so one detector's
/// bug never aborts the rest of a ticker's pipeline (§4.7, §4.12 step c).
pub fn detect_safe(detector: &dyn Detector, features: &FeatureSet) -> Option<AlertCandidate> {
    let name = detector.name();
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| detector.detect(features))) {
        Ok(candidate) => candidate,
        Err(_) => {
            error!(detector = name, ticker = %features.ticker, "detector panicked, skipping");
            None
        }
    }
}

/// The process-wide, statically ordered list of detectors. No runtime reflection or
/// plugin discovery: adding a detector means adding it here (§9 Design Notes).
pub fn all_detectors() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(LowIvDetector::default()),
        Box::new(RichPremiumDetector::default()),
        Box::new(EarningsCrushDetector::default()),
        Box::new(TermKinkDetector::default()),
        Box::new(SkewAnomalyDetector::default()),
        Box::new(RegimeShiftDetector::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lists_all_six_detectors_in_declaration_order() {
        let names: Vec<&str> = all_detectors().iter().map(|d| d.name()).collect();
        assert_eq!(
            names,
            vec!["LowIV", "RichPremium", "EarningsCrush", "TermKink", "SkewAnomaly", "RegimeShift"]
        );
    }
}
