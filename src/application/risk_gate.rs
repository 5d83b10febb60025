//! Pre-alert portfolio risk checks (§4.9).

use crate::domain::types::{AccountState, AlertCandidate};
use tracing::info;

const CASH_SECURED_STRATEGIES: [&str; 2] = ["CSP", "Wheel"];

#[derive(Debug, Clone)]
pub struct RiskGateConfig {
    pub margin_gate_threshold_pct: f64,
    pub cash_gate_threshold_pct: f64,
    pub max_concentration_pct: f64,
}

impl Default for RiskGateConfig {
    fn default() -> Self {
        Self {
            margin_gate_threshold_pct: 50.0,
            cash_gate_threshold_pct: 50.0,
            max_concentration_pct: 5.0,
        }
    }
}

/// One contract (100 shares) at the current spot price stands in for the candidate's
/// strike, since alert candidates do not carry a concrete strike of their own.
fn estimate_required_margin(strategies: &[String], spot: f64) -> f64 {
    let notional = spot * 100.0;
    let is_credit_spread = strategies
        .iter()
        .any(|s| matches!(s.as_str(), "Iron Condor" | "Bull Put Spread" | "Bear Call Spread" | "Covered Call"));
    if is_credit_spread {
        notional * 0.20
    } else if is_cash_secured(strategies) {
        0.0
    } else {
        notional * 0.05
    }
}

fn is_cash_secured(strategies: &[String]) -> bool {
    strategies.iter().any(|s| CASH_SECURED_STRATEGIES.contains(&s.as_str()))
}

fn estimate_required_cash(spot: f64) -> f64 {
    spot * 100.0
}

/// Runs the margin, cash and concentration gates in order, returning the first
/// rejection reason encountered, or `(true, None)` if the candidate clears all three.
pub fn passes(
    candidate: &AlertCandidate,
    ticker: &str,
    spot: f64,
    account: &AccountState,
    config: &RiskGateConfig,
) -> (bool, Option<&'static str>) {
    let required_margin = estimate_required_margin(&candidate.strategies, spot);
    let margin_pct = if account.margin_available > 0.0 {
        required_margin / account.margin_available * 100.0
    } else if required_margin > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    if margin_pct >= config.margin_gate_threshold_pct {
        info!(ticker, detector = candidate.detector_name, required_margin, margin_pct, "risk gate rejected: margin_gate");
        return (false, Some("margin_gate"));
    }

    let incremental_value = if is_cash_secured(&candidate.strategies) {
        let required_cash = estimate_required_cash(spot);
        let cash_pct = if account.cash_available > 0.0 {
            required_cash / account.cash_available * 100.0
        } else {
            f64::INFINITY
        };
        if cash_pct >= config.cash_gate_threshold_pct {
            info!(ticker, detector = candidate.detector_name, required_cash, cash_pct, "risk gate rejected: cash_gate");
            return (false, Some("cash_gate"));
        }
        required_cash
    } else {
        required_margin
    };

    let portfolio_total = account.portfolio_total();
    let current_position_value = account.position_value(ticker);
    let concentration_pct = if portfolio_total > 0.0 {
        (current_position_value + incremental_value) / portfolio_total * 100.0
    } else {
        f64::INFINITY
    };
    if concentration_pct > config.max_concentration_pct {
        info!(
            ticker, detector = candidate.detector_name, concentration_pct, "risk gate rejected: concentration_gate"
        );
        return (false, Some("concentration_gate"));
    }

    info!(ticker, detector = candidate.detector_name, margin_pct, concentration_pct, "risk gate passed");
    (true, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Confidence, Position};
    use std::collections::BTreeMap;

    fn candidate(strategies: Vec<&str>) -> AlertCandidate {
        AlertCandidate::new(
            "RichPremium",
            70.0,
            BTreeMap::new(),
            strategies.into_iter().map(String::from).collect(),
            Confidence::Medium,
        )
        .unwrap()
    }

    fn account(cash: f64, margin: f64, positions: Vec<Position>) -> AccountState {
        AccountState {
            cash_available: cash,
            margin_available: margin,
            positions,
        }
    }

    #[test]
    fn margin_gate_rejects_when_required_margin_exceeds_half_available() {
        let config = RiskGateConfig::default();
        let candidate = candidate(vec!["Iron Condor"]);
        let acct = account(100_000.0, 100.0, vec![]);
        let (ok, reason) = passes(&candidate, "AAPL", 100.0, &acct, &config);
        assert!(!ok);
        assert_eq!(reason, Some("margin_gate"));
    }

    #[test]
    fn cash_gate_applies_only_to_cash_secured_strategies() {
        let config = RiskGateConfig::default();
        let candidate = candidate(vec!["CSP"]);
        let acct = account(5_000.0, 1_000_000.0, vec![]);
        let (ok, reason) = passes(&candidate, "AAPL", 100.0, &acct, &config);
        assert!(!ok);
        assert_eq!(reason, Some("cash_gate"));
    }

    #[test]
    fn concentration_gate_rejects_oversized_existing_position() {
        let config = RiskGateConfig::default();
        let candidate = candidate(vec!["Bull Call Spread"]);
        let acct = account(
            1_000_000.0,
            1_000_000.0,
            vec![Position {
                ticker: "AAPL".to_string(),
                market_value: 90_000.0,
                quantity: 500.0,
            }],
        );
        let (ok, reason) = passes(&candidate, "AAPL", 100.0, &acct, &config);
        assert!(!ok);
        assert_eq!(reason, Some("concentration_gate"));
    }

    #[test]
    fn well_capitalized_small_position_passes() {
        let config = RiskGateConfig::default();
        let candidate = candidate(vec!["Bull Call Spread"]);
        let acct = account(1_000_000.0, 1_000_000.0, vec![]);
        let (ok, reason) = passes(&candidate, "AAPL", 100.0, &acct, &config);
        assert!(ok);
        assert_eq!(reason, None);
    }
}
