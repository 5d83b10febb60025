use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single OHLCV bar (§3 `PriceBar`).
///
/// Invariant: `low <= min(open, close) <= max(open, close) <= high`, `volume >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    pub fn is_valid(&self) -> bool {
        let body_lo = self.open.min(self.close);
        let body_hi = self.open.max(self.close);
        self.low <= body_lo && body_hi <= self.high && self.volume >= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Call,
    Put,
}

/// A single listed option contract (§3 `OptionContract`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub strike: f64,
    pub kind: OptionKind,
    pub bid: f64,
    pub ask: f64,
    pub volume: u64,
    pub open_interest: u64,
    pub implied_volatility: f64,
}

impl OptionContract {
    pub fn is_valid(&self) -> bool {
        self.strike > 0.0 && self.ask >= self.bid && self.bid >= 0.0 && self.implied_volatility >= 0.0
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

/// A single expiration's full chain (§3 `OptionsChain`).
///
/// Invariant: `calls`/`puts` are sorted by ascending strike with unique strikes per side,
/// and `expiration` is strictly in the future relative to `snapshot_timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsChain {
    pub ticker: String,
    pub expiration: NaiveDate,
    pub snapshot_timestamp: DateTime<Utc>,
    pub calls: Vec<OptionContract>,
    pub puts: Vec<OptionContract>,
}

impl OptionsChain {
    pub fn is_valid(&self) -> bool {
        if self.expiration <= self.snapshot_timestamp.date_naive() {
            return false;
        }
        Self::side_is_sorted_and_unique(&self.calls) && Self::side_is_sorted_and_unique(&self.puts)
    }

    fn side_is_sorted_and_unique(side: &[OptionContract]) -> bool {
        side.windows(2).all(|w| w[0].strike < w[1].strike)
    }

    pub fn dte(&self, as_of: NaiveDate) -> i64 {
        (self.expiration - as_of).num_days()
    }
}

/// Reference metadata for a ticker, used by the earnings and regime feature groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TickerInfo {
    pub name: Option<String>,
    pub sector: Option<String>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
    pub next_earnings_date: Option<NaiveDate>,
    pub average_volume_20d: Option<f64>,
}

/// A complete, single-ticker observation fed into the feature engine (§3 `MarketSnapshot`).
///
/// Scoped to exactly one ticker within one scan invocation; never cached or reused
/// across scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub spot_price: f64,
    pub price_history: Vec<PriceBar>,
    pub options_chains: BTreeMap<NaiveDate, OptionsChain>,
    pub ticker_info: Option<TickerInfo>,
}

impl MarketSnapshot {
    /// The nearest-dated chain, used as the "front month" throughout the feature engine.
    pub fn front_chain(&self) -> Option<&OptionsChain> {
        self.options_chains.values().next()
    }

    /// The second-nearest-dated chain, used as the "back month".
    pub fn back_chain(&self) -> Option<&OptionsChain> {
        self.options_chains.values().nth(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(o: f64, h: f64, l: f64, c: f64, v: f64) -> PriceBar {
        PriceBar {
            timestamp: Utc::now(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
        }
    }

    #[test]
    fn price_bar_validates_ohlc_bounds() {
        assert!(bar(10.0, 12.0, 9.0, 11.0, 100.0).is_valid());
        assert!(!bar(10.0, 9.0, 9.0, 11.0, 100.0).is_valid());
        assert!(!bar(10.0, 12.0, 9.0, 11.0, -1.0).is_valid());
    }

    #[test]
    fn options_chain_rejects_unsorted_strikes() {
        let snap_ts = Utc::now();
        let contract = |strike: f64| OptionContract {
            strike,
            kind: OptionKind::Call,
            bid: 1.0,
            ask: 1.1,
            volume: 10,
            open_interest: 10,
            implied_volatility: 0.3,
        };
        let chain = OptionsChain {
            ticker: "TEST".into(),
            expiration: snap_ts.date_naive() + chrono::Duration::days(30),
            snapshot_timestamp: snap_ts,
            calls: vec![contract(100.0), contract(90.0)],
            puts: vec![],
        };
        assert!(!chain.is_valid());
    }

    #[test]
    fn options_chain_rejects_past_expiration() {
        let snap_ts = Utc::now();
        let chain = OptionsChain {
            ticker: "TEST".into(),
            expiration: snap_ts.date_naive() - chrono::Duration::days(1),
            snapshot_timestamp: snap_ts,
            calls: vec![],
            puts: vec![],
        };
        assert!(!chain.is_valid());
    }
}
