use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub market_value: f64,
    pub quantity: f64,
}

/// Account-level state consulted by the risk gate (§3 `AccountState`).
///
/// Loaded from configuration and treated as immutable within a single scan
/// invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub cash_available: f64,
    pub margin_available: f64,
    pub positions: Vec<Position>,
}

impl AccountState {
    pub fn portfolio_total(&self) -> f64 {
        self.cash_available + self.positions.iter().map(|p| p.market_value).sum::<f64>()
    }

    pub fn position_value(&self, ticker: &str) -> f64 {
        self.positions
            .iter()
            .filter(|p| p.ticker == ticker)
            .map(|p| p.market_value)
            .sum()
    }
}
