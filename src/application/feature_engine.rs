//! Pure transform from a single-ticker market snapshot into its feature vector (§4.6).
//!
//! Every computation here is a plain function of its inputs: no I/O, no caching, no
//! breaker awareness. Anything that would require a division by zero, or that comes
//! out `NaN`/`inf`, becomes an absent (`None`) subfield via [`finite_or_absent`] rather
//! than a sentinel value or a propagated error.

use crate::domain::types::{
    EarningsFeatures, FeatureSet, IvMetrics, LiquidityFeatures, MarketSnapshot, OptionContract, OptionKind,
    OptionsChain, OptionsFeatures, PriceFeatures, TechnicalsFeatures, VolTrend, VolatilityFeatures, finite_or_absent,
};
use chrono::{NaiveDate, Utc};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const MIN_HISTORY_BARS: usize = 20;

/// Computes the full feature set for one ticker, or an empty (all-absent) one when the
/// snapshot lacks the minimum 20 bars of price history the rest of the engine needs.
///
/// `config_hash` identifies the configuration a caller scanned under; it is not an
/// input to any feature calculation here, only a correlation value the caller threads
/// through per §4.6's function contract.
pub fn compute(snapshot: &MarketSnapshot, _config_hash: &str) -> FeatureSet {
    if snapshot.price_history.len() < MIN_HISTORY_BARS {
        return FeatureSet::empty(&snapshot.ticker, snapshot.timestamp);
    }

    let closes: Vec<f64> = snapshot.price_history.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = snapshot.price_history.iter().map(|b| b.volume).collect();

    let price = PriceFeatures {
        spot: finite_or_absent(snapshot.spot_price),
        fifty_two_week_high: snapshot.ticker_info.as_ref().and_then(|t| t.fifty_two_week_high),
        fifty_two_week_low: snapshot.ticker_info.as_ref().and_then(|t| t.fifty_two_week_low),
    };

    let technicals = compute_technicals(&closes, &volumes);
    let volatility = compute_volatility(snapshot);
    let front = snapshot.front_chain();
    let back = snapshot.back_chain();
    let options_front = front.map(options_features).unwrap_or_default();
    let options_back = back.map(options_features).unwrap_or_default();
    let iv_metrics = compute_iv_metrics(&closes, &volatility, &options_front, &options_back);
    let earnings = compute_earnings(snapshot);
    let liquidity = front.map(|c| liquidity_features(c, snapshot.spot_price)).unwrap_or_default();

    FeatureSet {
        ticker: snapshot.ticker.clone(),
        timestamp: snapshot.timestamp,
        price,
        technicals,
        volatility,
        iv_metrics,
        options_front,
        options_back,
        earnings,
        liquidity,
    }
}

fn sma(values: &[f64], window: usize) -> Option<f64> {
    if values.len() < window || window == 0 {
        return None;
    }
    let slice = &values[values.len() - window..];
    finite_or_absent(slice.iter().sum::<f64>() / window as f64)
}

/// Full EMA series seeded by the simple average of the first `window` values, then
/// carried forward with the standard smoothing factor `2 / (window + 1)`.
fn ema_series(values: &[f64], window: usize) -> Option<Vec<f64>> {
    if values.len() < window || window == 0 {
        return None;
    }
    let k = 2.0 / (window as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len() - window + 1);
    let mut prev = values[..window].iter().sum::<f64>() / window as f64;
    out.push(prev);
    for &v in &values[window..] {
        prev = v * k + prev * (1.0 - k);
        out.push(prev);
    }
    Some(out)
}

fn ema_last(values: &[f64], window: usize) -> Option<f64> {
    ema_series(values, window).and_then(|s| s.last().copied()).and_then(finite_or_absent)
}

/// Wilder's RSI: average gains/losses smoothed with the same `1/window` decay Wilder
/// used for ATR, seeded from the simple average of the first `window` changes.
fn rsi(values: &[f64], window: usize) -> Option<f64> {
    if values.len() < window + 1 {
        return None;
    }
    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let seed = &changes[..window];
    let mut avg_gain = seed.iter().filter(|c| **c > 0.0).sum::<f64>() / window as f64;
    let mut avg_loss = seed.iter().filter(|c| **c < 0.0).map(|c| -c).sum::<f64>() / window as f64;
    for &c in &changes[window..] {
        let gain = c.max(0.0);
        let loss = (-c).max(0.0);
        avg_gain = (avg_gain * (window as f64 - 1.0) + gain) / window as f64;
        avg_loss = (avg_loss * (window as f64 - 1.0) + loss) / window as f64;
    }
    if avg_loss == 0.0 {
        return finite_or_absent(100.0);
    }
    let rs = avg_gain / avg_loss;
    finite_or_absent(100.0 - 100.0 / (1.0 + rs))
}

fn macd(closes: &[f64]) -> (Option<f64>, Option<f64>, Option<f64>) {
    let (Some(fast), Some(slow)) = (ema_series(closes, 12), ema_series(closes, 26)) else {
        return (None, None, None);
    };
    // Fast EMA's series is longer (its window warms up sooner); pair both from the tail.
    let n = fast.len().min(slow.len());
    let line: Vec<f64> = fast[fast.len() - n..]
        .iter()
        .zip(&slow[slow.len() - n..])
        .map(|(f, s)| f - s)
        .collect();
    let Some(signal_series) = ema_series(&line, 9) else {
        return (line.last().copied().and_then(finite_or_absent), None, None);
    };
    let macd_val = line.last().copied();
    let signal_val = signal_series.last().copied();
    let hist = match (macd_val, signal_val) {
        (Some(m), Some(s)) => finite_or_absent(m - s),
        _ => None,
    };
    (macd_val.and_then(finite_or_absent), signal_val.and_then(finite_or_absent), hist)
}

fn fib_retracements(closes: &[f64]) -> (Option<f64>, Option<f64>, Option<f64>) {
    let window = &closes[closes.len().saturating_sub(90).max(0)..];
    let high = window.iter().cloned().fold(f64::MIN, f64::max);
    let low = window.iter().cloned().fold(f64::MAX, f64::min);
    let range = high - low;
    (
        finite_or_absent(high - range * 0.382),
        finite_or_absent(high - range * 0.5),
        finite_or_absent(high - range * 0.618),
    )
}

fn compute_technicals(closes: &[f64], volumes: &[f64]) -> TechnicalsFeatures {
    let (fib_382, fib_500, fib_618) = fib_retracements(closes);
    let (macd_line, macd_signal, macd_histogram) = macd(closes);
    let support_window = &closes[closes.len().saturating_sub(20)..];
    TechnicalsFeatures {
        sma_20: sma(closes, 20),
        sma_50: sma(closes, 50),
        sma_200: sma(closes, 200),
        ema_9: ema_last(closes, 9),
        ema_21: ema_last(closes, 21),
        rsi_14: rsi(closes, 14),
        macd_line,
        macd_signal,
        macd_histogram,
        fib_retracement_382: fib_382,
        fib_retracement_500: fib_500,
        fib_retracement_618: fib_618,
        volume_sma_20: sma(volumes, 20),
        current_volume: volumes.last().copied().and_then(finite_or_absent),
        support_20d: support_window.iter().cloned().reduce(f64::min).and_then(finite_or_absent),
        resistance_20d: support_window.iter().cloned().reduce(f64::max).and_then(finite_or_absent),
    }
}

fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect()
}

/// Annualized close-to-close historical volatility (sample stdev of log returns).
fn historical_vol(closes: &[f64], window: usize) -> Option<f64> {
    if closes.len() < window + 1 {
        return None;
    }
    let returns = log_returns(&closes[closes.len() - (window + 1)..]);
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() as f64 - 1.0).max(1.0);
    finite_or_absent(variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Rolling series of 20-bar historical volatility estimates across the whole history,
/// used as the reference distribution for IV percentile/rank since no historical
/// implied-volatility series is persisted anywhere in the data model.
fn rolling_hv_series(closes: &[f64], window: usize) -> Vec<f64> {
    if closes.len() < window + 1 {
        return Vec::new();
    }
    (window..closes.len())
        .filter_map(|end| historical_vol(&closes[..=end], window))
        .collect()
}

fn parkinson_vol(snapshot: &MarketSnapshot, window: usize) -> Option<f64> {
    let bars = &snapshot.price_history;
    if bars.len() < window {
        return None;
    }
    let slice = &bars[bars.len() - window..];
    let ln2 = std::f64::consts::LN_2;
    let sum: f64 = slice.iter().map(|b| (b.high / b.low).ln().powi(2)).sum();
    let variance = sum / (4.0 * window as f64 * ln2);
    finite_or_absent(variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt())
}

fn garman_klass_vol(snapshot: &MarketSnapshot, window: usize) -> Option<f64> {
    let bars = &snapshot.price_history;
    if bars.len() < window {
        return None;
    }
    let slice = &bars[bars.len() - window..];
    let term = 2.0 * std::f64::consts::LN_2 - 1.0;
    let sum: f64 = slice
        .iter()
        .map(|b| 0.5 * (b.high / b.low).ln().powi(2) - term * (b.close / b.open).ln().powi(2))
        .sum();
    let variance = sum / window as f64;
    if variance < 0.0 {
        return None;
    }
    finite_or_absent(variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Relative difference beyond which 20-day HV is considered to be "expanding" over
/// 60-day HV.
const VOL_EXPANDING_EPSILON: f64 = 0.05;

fn compute_volatility(snapshot: &MarketSnapshot) -> VolatilityFeatures {
    let closes: Vec<f64> = snapshot.price_history.iter().map(|b| b.close).collect();
    let hv_20 = historical_vol(&closes, 20);
    let hv_60 = historical_vol(&closes, 60);
    let expanding = match (hv_20, hv_60) {
        (Some(h20), Some(h60)) if h60 > 0.0 => Some((h20 - h60) / h60 > VOL_EXPANDING_EPSILON),
        _ => None,
    };
    let vol_trend = match (hv_20, hv_60) {
        (Some(h20), Some(h60)) if h60 > 0.0 => {
            let delta = (h20 - h60) / h60;
            Some(if delta > VOL_EXPANDING_EPSILON {
                VolTrend::Increasing
            } else if delta < -VOL_EXPANDING_EPSILON {
                VolTrend::Decreasing
            } else {
                VolTrend::Flat
            })
        }
        _ => None,
    };
    VolatilityFeatures {
        hv_20,
        hv_60,
        parkinson: parkinson_vol(snapshot, 20),
        garman_klass: garman_klass_vol(snapshot, 20),
        expanding,
        vol_trend,
    }
}

/// Linear-interpolates IV at `target_strike` from a chain's combined call/put IV curve,
/// averaging both sides at shared strikes. Returns `None` outside the quoted range.
fn interpolate_iv(chain: &OptionsChain, target_strike: f64) -> Option<f64> {
    let mut points: Vec<(f64, f64)> = Vec::new();
    let mut by_strike: std::collections::BTreeMap<u64, (f64, u32)> = std::collections::BTreeMap::new();
    for c in chain.calls.iter().chain(chain.puts.iter()) {
        let key = (c.strike * 100.0).round() as u64;
        let entry = by_strike.entry(key).or_insert((0.0, 0));
        entry.0 += c.implied_volatility;
        entry.1 += 1;
    }
    for (key, (sum, count)) in by_strike {
        points.push((key as f64 / 100.0, sum / count as f64));
    }
    points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    if points.is_empty() {
        return None;
    }
    if target_strike <= points[0].0 {
        return finite_or_absent(points[0].1);
    }
    if target_strike >= points[points.len() - 1].0 {
        return finite_or_absent(points[points.len() - 1].1);
    }
    for w in points.windows(2) {
        let (lo_k, lo_v) = w[0];
        let (hi_k, hi_v) = w[1];
        if target_strike >= lo_k && target_strike <= hi_k {
            if (hi_k - lo_k).abs() < f64::EPSILON {
                return finite_or_absent(lo_v);
            }
            let t = (target_strike - lo_k) / (hi_k - lo_k);
            return finite_or_absent(lo_v + t * (hi_v - lo_v));
        }
    }
    None
}

/// Approximates the 25-delta moneyness point as a fixed offset from spot, since
/// contracts in this data model carry implied volatility but not a modeled delta.
const APPROX_25_DELTA_OFFSET_PCT: f64 = 0.10;

fn options_features(chain: &OptionsChain) -> OptionsFeatures {
    let spot = estimate_spot(chain);
    let atm_iv = spot.and_then(|s| interpolate_iv(chain, s));
    let skew_25d = spot.and_then(|s| {
        let call_strike = s * (1.0 + APPROX_25_DELTA_OFFSET_PCT);
        let put_strike = s * (1.0 - APPROX_25_DELTA_OFFSET_PCT);
        let call_iv = interpolate_call_put_iv(chain, call_strike, OptionKind::Call);
        let put_iv = interpolate_call_put_iv(chain, put_strike, OptionKind::Put);
        match (call_iv, put_iv) {
            (Some(c), Some(p)) => finite_or_absent(p - c),
            _ => None,
        }
    });
    let open_interest = finite_or_absent(
        chain.calls.iter().map(|c| c.open_interest as f64).sum::<f64>()
            + chain.puts.iter().map(|c| c.open_interest as f64).sum::<f64>(),
    );
    let call_volume = finite_or_absent(chain.calls.iter().map(|c| c.volume as f64).sum());
    let put_volume = finite_or_absent(chain.puts.iter().map(|c| c.volume as f64).sum());
    OptionsFeatures {
        atm_iv,
        skew_25d,
        open_interest,
        call_volume,
        put_volume,
    }
}

fn interpolate_call_put_iv(chain: &OptionsChain, target_strike: f64, kind: OptionKind) -> Option<f64> {
    let side: Vec<&OptionContract> = match kind {
        OptionKind::Call => chain.calls.iter().collect(),
        OptionKind::Put => chain.puts.iter().collect(),
    };
    if side.is_empty() {
        return None;
    }
    let points: Vec<(f64, f64)> = side.iter().map(|c| (c.strike, c.implied_volatility)).collect();
    if target_strike <= points[0].0 {
        return finite_or_absent(points[0].1);
    }
    if target_strike >= points[points.len() - 1].0 {
        return finite_or_absent(points[points.len() - 1].1);
    }
    for w in points.windows(2) {
        let (lo_k, lo_v) = w[0];
        let (hi_k, hi_v) = w[1];
        if target_strike >= lo_k && target_strike <= hi_k {
            if (hi_k - lo_k).abs() < f64::EPSILON {
                return finite_or_absent(lo_v);
            }
            let t = (target_strike - lo_k) / (hi_k - lo_k);
            return finite_or_absent(lo_v + t * (hi_v - lo_v));
        }
    }
    None
}

/// The chain carries no underlying price field of its own; the midpoint strike is a
/// reasonable proxy for spot when computing an ATM curve, since strikes in this data
/// model are generated symmetrically around spot.
fn estimate_spot(chain: &OptionsChain) -> Option<f64> {
    let mut strikes: Vec<f64> = chain.calls.iter().chain(chain.puts.iter()).map(|c| c.strike).collect();
    if strikes.is_empty() {
        return None;
    }
    strikes.sort_by(|a, b| a.partial_cmp(b).unwrap());
    Some(strikes[strikes.len() / 2])
}

fn compute_iv_metrics(
    closes: &[f64],
    volatility: &VolatilityFeatures,
    front: &OptionsFeatures,
    back: &OptionsFeatures,
) -> IvMetrics {
    let term_structure_ratio = match (back.atm_iv, front.atm_iv) {
        (Some(b), Some(f)) if f > 0.0 => finite_or_absent(b / f),
        _ => None,
    };
    let iv_vs_hv = match (front.atm_iv, volatility.hv_20) {
        (Some(iv), Some(hv)) if hv > 0.0 => finite_or_absent(iv / hv),
        _ => None,
    };
    let reference = rolling_hv_series(closes, 20);
    let (iv_percentile, iv_rank) = match front.atm_iv {
        Some(iv) if !reference.is_empty() => {
            let below = reference.iter().filter(|&&v| v < iv).count();
            let percentile = finite_or_absent(below as f64 / reference.len() as f64 * 100.0);
            let lo = reference.iter().cloned().fold(f64::MAX, f64::min);
            let hi = reference.iter().cloned().fold(f64::MIN, f64::max);
            let rank = if hi > lo {
                finite_or_absent((iv - lo) / (hi - lo) * 100.0)
            } else {
                None
            };
            (percentile, rank)
        }
        _ => (None, None),
    };
    IvMetrics {
        iv_percentile,
        iv_rank,
        term_structure_ratio,
        iv_vs_hv,
    }
}

fn compute_earnings(snapshot: &MarketSnapshot) -> EarningsFeatures {
    let next_earnings_date: Option<NaiveDate> = snapshot.ticker_info.as_ref().and_then(|t| t.next_earnings_date);
    let days_to_earnings = next_earnings_date.map(|d| (d - Utc::now().date_naive()).num_days());
    EarningsFeatures {
        days_to_earnings,
        next_earnings_date,
    }
}

fn liquidity_features(chain: &OptionsChain, spot: f64) -> LiquidityFeatures {
    fn nearest(side: &[OptionContract], spot: f64) -> Option<&OptionContract> {
        side.iter().min_by(|a, b| {
            (a.strike - spot).abs().partial_cmp(&(b.strike - spot).abs()).unwrap()
        })
    }
    let call = nearest(&chain.calls, spot);
    let put = nearest(&chain.puts, spot);
    let (spread_pct, atm_volume) = match (call, put) {
        (Some(c), Some(p)) => {
            let mid = (c.mid() + p.mid()) / 2.0;
            let spread = ((c.ask - c.bid) + (p.ask - p.bid)) / 2.0;
            let pct = if mid > 0.0 { finite_or_absent(spread / mid * 100.0) } else { None };
            (pct, finite_or_absent((c.volume + p.volume) as f64))
        }
        (Some(c), None) => {
            let pct = if c.mid() > 0.0 {
                finite_or_absent((c.ask - c.bid) / c.mid() * 100.0)
            } else {
                None
            };
            (pct, finite_or_absent(c.volume as f64))
        }
        (None, Some(p)) => {
            let pct = if p.mid() > 0.0 {
                finite_or_absent((p.ask - p.bid) / p.mid() * 100.0)
            } else {
                None
            };
            (pct, finite_or_absent(p.volume as f64))
        }
        (None, None) => (None, None),
    };
    LiquidityFeatures { spread_pct, atm_volume }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::PriceBar;
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;

    fn bar(close: f64, open: f64, high: f64, low: f64, volume: f64, days_ago: i64) -> PriceBar {
        PriceBar {
            timestamp: Utc::now() - Duration::days(days_ago),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn snapshot_with_history(closes: Vec<f64>) -> MarketSnapshot {
        let n = closes.len() as i64;
        let price_history = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| bar(c, c, c * 1.01, c * 0.99, 1_000_000.0, n - i as i64))
            .collect();
        MarketSnapshot {
            ticker: "TEST".into(),
            timestamp: Utc::now(),
            spot_price: closes[closes.len() - 1],
            price_history,
            options_chains: BTreeMap::new(),
            ticker_info: None,
        }
    }

    #[test]
    fn insufficient_history_returns_empty_feature_set() {
        let snapshot = snapshot_with_history(vec![100.0; 5]);
        let features = compute(&snapshot, "test-hash");
        assert!(features.technicals.sma_20.is_none());
    }

    #[test]
    fn flat_price_series_has_zero_rsi_denominator_and_caps_at_100() {
        let snapshot = snapshot_with_history(vec![100.0; 30]);
        let features = compute(&snapshot, "test-hash");
        assert_eq!(features.technicals.rsi_14, Some(100.0));
    }

    #[test]
    fn monotonic_uptrend_yields_bullish_sma_ordering() {
        let closes: Vec<f64> = (0..220).map(|i| 100.0 + i as f64 * 0.1).collect();
        let snapshot = snapshot_with_history(closes);
        let features = compute(&snapshot, "test-hash");
        let sma20 = features.technicals.sma_20.unwrap();
        let sma200 = features.technicals.sma_200.unwrap();
        assert!(sma20 > sma200, "uptrend: sma20 ({sma20}) should exceed sma200 ({sma200})");
    }

    #[test]
    fn historical_vol_is_absent_below_window_length() {
        let closes: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        assert!(historical_vol(&closes, 20).is_none());
    }

    #[test]
    fn interpolate_iv_clamps_outside_quoted_range() {
        use crate::domain::types::{OptionContract, OptionKind};
        let chain = OptionsChain {
            ticker: "TEST".into(),
            expiration: Utc::now().date_naive() + Duration::days(30),
            snapshot_timestamp: Utc::now(),
            calls: vec![
                OptionContract {
                    strike: 90.0,
                    kind: OptionKind::Call,
                    bid: 1.0,
                    ask: 1.2,
                    volume: 10,
                    open_interest: 10,
                    implied_volatility: 0.3,
                },
                OptionContract {
                    strike: 110.0,
                    kind: OptionKind::Call,
                    bid: 1.0,
                    ask: 1.2,
                    volume: 10,
                    open_interest: 10,
                    implied_volatility: 0.5,
                },
            ],
            puts: vec![],
        };
        assert_eq!(interpolate_iv(&chain, 80.0), Some(0.3));
        assert_eq!(interpolate_iv(&chain, 120.0), Some(0.5));
        assert_eq!(interpolate_iv(&chain, 100.0), Some(0.4));
    }
}
