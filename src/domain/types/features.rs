use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Direction of the historical-volatility trend (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolTrend {
    Increasing,
    Decreasing,
    Flat,
}

/// Spot/price-derived fields kept alongside the feature set for detectors that need
/// the raw spot price rather than a derived indicator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceFeatures {
    pub spot: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
}

/// Technical-analysis indicators (§4.6). Every field is independently absent when its
/// inputs are insufficient -- there is no sentinel numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TechnicalsFeatures {
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub ema_9: Option<f64>,
    pub ema_21: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub fib_retracement_382: Option<f64>,
    pub fib_retracement_500: Option<f64>,
    pub fib_retracement_618: Option<f64>,
    pub volume_sma_20: Option<f64>,
    pub current_volume: Option<f64>,
    pub support_20d: Option<f64>,
    pub resistance_20d: Option<f64>,
}

/// Historical-volatility analytics (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VolatilityFeatures {
    pub hv_20: Option<f64>,
    pub hv_60: Option<f64>,
    pub parkinson: Option<f64>,
    pub garman_klass: Option<f64>,
    pub expanding: Option<bool>,
    pub vol_trend: Option<VolTrend>,
}

/// Implied-vs-historical volatility metrics (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IvMetrics {
    pub iv_percentile: Option<f64>,
    pub iv_rank: Option<f64>,
    pub term_structure_ratio: Option<f64>,
    pub iv_vs_hv: Option<f64>,
}

/// Per-expiration options analytics, used once for the front month and once for the
/// back month (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OptionsFeatures {
    pub atm_iv: Option<f64>,
    pub skew_25d: Option<f64>,
    pub open_interest: Option<f64>,
    pub call_volume: Option<f64>,
    pub put_volume: Option<f64>,
}

/// Earnings-date proximity (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EarningsFeatures {
    pub days_to_earnings: Option<i64>,
    pub next_earnings_date: Option<NaiveDate>,
}

/// Liquidity at the money (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LiquidityFeatures {
    pub spread_pct: Option<f64>,
    pub atm_volume: Option<f64>,
}

/// The full per-ticker feature vector produced once per scan (§3 `FeatureSet`).
///
/// Built once, serialized into the store, and never mutated afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub price: PriceFeatures,
    pub technicals: TechnicalsFeatures,
    pub volatility: VolatilityFeatures,
    pub iv_metrics: IvMetrics,
    pub options_front: OptionsFeatures,
    pub options_back: OptionsFeatures,
    pub earnings: EarningsFeatures,
    pub liquidity: LiquidityFeatures,
}

impl FeatureSet {
    pub fn empty(ticker: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            ticker: ticker.into(),
            timestamp,
            price: PriceFeatures::default(),
            technicals: TechnicalsFeatures::default(),
            volatility: VolatilityFeatures::default(),
            iv_metrics: IvMetrics::default(),
            options_front: OptionsFeatures::default(),
            options_back: OptionsFeatures::default(),
            earnings: EarningsFeatures::default(),
            liquidity: LiquidityFeatures::default(),
        }
    }

    /// Native-JSON rendering with absent subfields serialized as `null` (§4.6 edge policy).
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Coerce a computed value into an absent feature per §4.6: division-by-zero, `NaN` and
/// `inf` all become `None` rather than propagating into the serialized feature set.
pub fn finite_or_absent(value: f64) -> Option<f64> {
    if value.is_finite() { Some(value) } else { None }
}
