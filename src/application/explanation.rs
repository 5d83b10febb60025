//! Deterministic, template-driven explanation text for an accepted alert (§4.11).

use crate::domain::types::{AlertCandidate, FeatureSet};
use std::collections::BTreeMap;

/// Builds the explanation dictionary for `candidate`, dispatching by detector name to
/// a per-detector template. Unknown detectors fall back to a generic template built
/// from the candidate's metrics. A sentence whose underlying metric is absent is
/// omitted entirely rather than filled with a placeholder.
pub fn generate(candidate: &AlertCandidate, ticker: &str, features: &FeatureSet) -> BTreeMap<String, String> {
    match candidate.detector_name.as_str() {
        "LowIV" => low_iv(candidate, ticker, features),
        "RichPremium" => rich_premium(candidate, ticker, features),
        "EarningsCrush" => earnings_crush(candidate, ticker, features),
        "TermKink" => term_kink(candidate, ticker, features),
        "SkewAnomaly" => skew_anomaly(candidate, ticker, features),
        "RegimeShift" => regime_shift(candidate, ticker, features),
        _ => generic(candidate, ticker),
    }
}

fn insert(map: &mut BTreeMap<String, String>, key: &str, value: String) {
    map.insert(key.to_string(), value);
}

fn low_iv(candidate: &AlertCandidate, ticker: &str, features: &FeatureSet) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    insert(&mut m, "summary", format!("{ticker} implied volatility is historically depressed."));
    if let Some(p) = features.iv_metrics.iv_percentile {
        insert(&mut m, "reason", format!("Front-month IV sits at the {p:.0}th percentile of its trailing window."));
    }
    insert(&mut m, "trigger", format!("LowIV score {:.0}", candidate.score));
    insert(&mut m, "opportunity", "Depressed premium favors buying volatility ahead of a potential expansion.".to_string());
    insert(&mut m, "directional_implication", "neutral".to_string());
    insert(&mut m, "timeframe", "swing (2-6 weeks)".to_string());
    m
}

fn rich_premium(candidate: &AlertCandidate, ticker: &str, features: &FeatureSet) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    insert(&mut m, "summary", format!("{ticker} implied volatility is historically rich."));
    if let Some(p) = features.iv_metrics.iv_percentile {
        insert(&mut m, "reason", format!("Front-month IV sits at the {p:.0}th percentile of its trailing window."));
    }
    insert(&mut m, "trigger", format!("RichPremium score {:.0}", candidate.score));
    insert(&mut m, "opportunity", "Elevated premium favors selling volatility with defined-risk structures.".to_string());
    insert(&mut m, "directional_implication", "neutral".to_string());
    insert(&mut m, "timeframe", "swing (2-6 weeks)".to_string());
    m
}

fn earnings_crush(candidate: &AlertCandidate, ticker: &str, features: &FeatureSet) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    insert(&mut m, "summary", format!("{ticker} carries elevated implied volatility ahead of earnings."));
    if let Some(days) = features.earnings.days_to_earnings {
        insert(&mut m, "reason", format!("Earnings are {days} day(s) away with implied volatility still elevated."));
        let severity = if days <= 3 {
            "imminent: expect a sharp post-earnings volatility collapse"
        } else if days <= 7 {
            "near-term: volatility crush risk is building"
        } else {
            "approaching: monitor volatility into the earnings date"
        };
        insert(&mut m, "warning", severity.to_string());
    }
    insert(&mut m, "trigger", format!("EarningsCrush score {:.0}", candidate.score));
    insert(&mut m, "timeframe", "event-driven".to_string());
    m
}

fn term_kink(candidate: &AlertCandidate, ticker: &str, features: &FeatureSet) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    insert(&mut m, "summary", format!("{ticker} shows an abnormal implied-volatility term structure."));
    if let Some(r) = features.iv_metrics.term_structure_ratio {
        let shape = if r < 1.0 { "backwardation (front richer than back)" } else { "steep contango" };
        insert(&mut m, "reason", format!("Back/front IV ratio is {r:.2}, consistent with {shape}."));
    }
    insert(&mut m, "trigger", format!("TermKink score {:.0}", candidate.score));
    insert(&mut m, "opportunity", "Calendar structures can monetize the term-structure dislocation.".to_string());
    insert(&mut m, "timeframe", "tactical".to_string());
    m
}

fn skew_anomaly(candidate: &AlertCandidate, ticker: &str, features: &FeatureSet) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    insert(&mut m, "summary", format!("{ticker} options show an abnormal put/call skew."));
    if let Some(skew) = features.options_front.skew_25d {
        let direction = if skew > 0.0 { "put-skewed (downside protection bid)" } else { "call-skewed (upside speculation bid)" };
        insert(&mut m, "reason", format!("25-delta skew is {skew:.2}, {direction}."));
        insert(
            &mut m,
            "directional_implication",
            if skew > 0.0 { "bearish hedging demand".to_string() } else { "bullish speculative demand".to_string() },
        );
    }
    insert(&mut m, "trigger", format!("SkewAnomaly score {:.0}", candidate.score));
    insert(&mut m, "timeframe", "tactical".to_string());
    m
}

fn regime_shift(candidate: &AlertCandidate, ticker: &str, features: &FeatureSet) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    insert(&mut m, "summary", format!("{ticker} is approaching a moving-average regime shift."));
    if let (Some(sma50), Some(sma200)) = (features.technicals.sma_50, features.technicals.sma_200) {
        insert(&mut m, "reason", format!("50-day SMA ({sma50:.2}) and 200-day SMA ({sma200:.2}) are converging."));
    }
    insert(&mut m, "trigger", format!("RegimeShift score {:.0}", candidate.score));
    insert(&mut m, "risk_factors", "A false breakout can reverse the setup quickly; size accordingly.".to_string());
    insert(&mut m, "timeframe", "swing (2-6 weeks)".to_string());
    m
}

fn generic(candidate: &AlertCandidate, ticker: &str) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    insert(&mut m, "summary", format!("{ticker} triggered {}.", candidate.detector_name));
    insert(&mut m, "reason", format!("Detector score: {:.0}", candidate.score));
    insert(&mut m, "trigger", candidate.detector_name.clone());
    for (key, value) in &candidate.metrics {
        m.entry(format!("metric_{key}")).or_insert_with(|| value.to_string());
    }
    m
}
