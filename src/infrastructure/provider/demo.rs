use super::MarketDataProvider;
use crate::domain::errors::ProviderError;
use crate::domain::types::{OptionContract, OptionKind, OptionsChain, PriceBar, TickerInfo};
use crate::infrastructure::cache::{default_ttl, CacheTtlConfig, TtlCache};
use crate::infrastructure::circuit_breaker::CircuitBreakerRegistry;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

fn seed_for(ticker: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    ticker.hash(&mut hasher);
    hasher.finish()
}

/// Deterministic, offline implementation of [`MarketDataProvider`]. Every ticker is
/// seeded from its own name, so repeated runs against the same watchlist produce the
/// same synthetic data without needing persisted fixtures.
pub struct DemoProvider {
    cache: Arc<TtlCache>,
    breakers: Arc<CircuitBreakerRegistry>,
    ttl_config: CacheTtlConfig,
}

impl DemoProvider {
    pub fn new(cache: Arc<TtlCache>, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { cache, breakers, ttl_config: CacheTtlConfig::default() }
    }

    pub fn with_ttl_config(mut self, ttl_config: CacheTtlConfig) -> Self {
        self.ttl_config = ttl_config;
        self
    }

    fn rng_for(&self, ticker: &str, salt: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(seed_for(ticker) ^ salt)
    }

    async fn guarded<T, F>(&self, operation: &str, f: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        let breaker = self.breakers.breaker(operation).await;
        breaker.call(|| async { Ok(f()) }).await
    }
}

#[async_trait]
impl MarketDataProvider for DemoProvider {
    async fn get_current_price(&self, ticker: &str) -> Result<Option<f64>, ProviderError> {
        let cache_key = format!("demo:price:{ticker}");
        if let Some(price) = self.cache.get::<f64>(&cache_key) {
            return Ok(Some(price));
        }
        let ticker = ticker.to_string();
        let price = self
            .guarded("get_current_price", || {
                let mut rng = ChaCha8Rng::seed_from_u64(seed_for(&ticker));
                50.0 + rng.random::<f64>() * 450.0
            })
            .await?;
        let _ = self.cache.set(&cache_key, &price, self.ttl_config.current_price);
        Ok(Some(price))
    }

    async fn get_price_history(
        &self,
        ticker: &str,
        lookback_days: u32,
    ) -> Result<Option<Vec<PriceBar>>, ProviderError> {
        let cache_key = format!("demo:history:{ticker}:{lookback_days}");
        if let Some(bars) = self.cache.get::<Vec<PriceBar>>(&cache_key) {
            return Ok(Some(bars));
        }
        let mut rng = self.rng_for(ticker, 1);
        let days = lookback_days.max(20);
        let bars = self
            .guarded("get_price_history", || {
                let mut close = 50.0 + rng.random::<f64>() * 450.0;
                let now = Utc::now();
                (0..days)
                    .map(|i| {
                        let drift = (rng.random::<f64>() - 0.5) * close * 0.03;
                        let open = close;
                        close = (close + drift).max(1.0);
                        let high = open.max(close) * (1.0 + rng.random::<f64>() * 0.01);
                        let low = open.min(close) * (1.0 - rng.random::<f64>() * 0.01);
                        PriceBar {
                            timestamp: now - Duration::days((days - i) as i64),
                            open,
                            high,
                            low,
                            close,
                            volume: 1_000_000.0 + rng.random::<f64>() * 5_000_000.0,
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .await?;
        let _ = self.cache.set(&cache_key, &bars, self.ttl_config.price_history);
        Ok(Some(bars))
    }

    async fn get_options_expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>, ProviderError> {
        let cache_key = format!("demo:expirations:{ticker}");
        if let Some(dates) = self.cache.get::<Vec<NaiveDate>>(&cache_key) {
            return Ok(dates);
        }
        let today = Utc::now().date_naive();
        let dates = self
            .guarded("get_options_expirations", || {
                vec![today + Duration::days(30), today + Duration::days(60)]
            })
            .await?;
        let _ = self.cache.set(&cache_key, &dates, default_ttl::EXPIRATIONS);
        Ok(dates)
    }

    async fn get_options_chain(
        &self,
        ticker: &str,
        expiration: NaiveDate,
    ) -> Result<Option<OptionsChain>, ProviderError> {
        let cache_key = format!("demo:chain:{ticker}:{expiration}");
        if let Some(chain) = self.cache.get::<OptionsChain>(&cache_key) {
            return Ok(Some(chain));
        }
        let spot = self.get_current_price(ticker).await?.unwrap_or(100.0);
        let mut rng = self.rng_for(ticker, expiration.and_hms_opt(0, 0, 0).map(|d| d.and_utc().timestamp() as u64).unwrap_or(0));
        let ticker_owned = ticker.to_string();
        let now = Utc::now();
        let chain = self
            .guarded("get_options_chain", || {
                let base_iv = 0.15 + rng.random::<f64>() * 0.35;
                let strikes: Vec<f64> = (-6..=6).map(|i| (spot * (1.0 + i as f64 * 0.025)).round()).collect();
                let make_side = |kind: OptionKind, rng: &mut ChaCha8Rng| -> Vec<OptionContract> {
                    strikes
                        .iter()
                        .map(|&strike| {
                            let distance = (strike - spot).abs() / spot;
                            let iv = (base_iv + distance * 0.2).max(0.01);
                            let mid = (spot - strike).abs().max(0.5);
                            OptionContract {
                                strike,
                                kind,
                                bid: (mid * 0.95).max(0.01),
                                ask: mid * 1.05,
                                volume: (rng.random::<f64>() * 2000.0) as u64,
                                open_interest: (rng.random::<f64>() * 10_000.0) as u64,
                                implied_volatility: iv,
                            }
                        })
                        .collect()
                };
                let mut calls = make_side(OptionKind::Call, &mut rng);
                let mut puts = make_side(OptionKind::Put, &mut rng);
                calls.sort_by(|a, b| a.strike.partial_cmp(&b.strike).unwrap());
                puts.sort_by(|a, b| a.strike.partial_cmp(&b.strike).unwrap());
                OptionsChain {
                    ticker: ticker_owned,
                    expiration,
                    snapshot_timestamp: now,
                    calls,
                    puts,
                }
            })
            .await?;
        let _ = self.cache.set(&cache_key, &chain, default_ttl::OPTIONS_CHAIN);
        Ok(Some(chain))
    }

    async fn get_ticker_info(&self, ticker: &str) -> Result<Option<TickerInfo>, ProviderError> {
        let cache_key = format!("demo:info:{ticker}");
        if let Some(info) = self.cache.get::<TickerInfo>(&cache_key) {
            return Ok(Some(info));
        }
        let spot = self.get_current_price(ticker).await?.unwrap_or(100.0);
        let mut rng = self.rng_for(ticker, 2);
        let today = Utc::now().date_naive();
        let info = self
            .guarded("get_ticker_info", || TickerInfo {
                name: Some(ticker.to_string()),
                sector: Some("Technology".to_string()),
                fifty_two_week_high: Some(spot * (1.05 + rng.random::<f64>() * 0.3)),
                fifty_two_week_low: Some(spot * (0.6 + rng.random::<f64>() * 0.2)),
                next_earnings_date: Some(today + Duration::days(5 + (rng.random::<f64>() * 80.0) as i64)),
                average_volume_20d: Some(1_500_000.0 + rng.random::<f64>() * 3_000_000.0),
            })
            .await?;
        let _ = self.cache.set(&cache_key, &info, default_ttl::TICKER_INFO);
        Ok(Some(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> DemoProvider {
        DemoProvider::new(
            Arc::new(TtlCache::new(8 * 1024 * 1024)),
            Arc::new(CircuitBreakerRegistry::default()),
        )
    }

    #[tokio::test]
    async fn same_ticker_yields_deterministic_price_across_instances() {
        let a = provider();
        let b = provider();
        let pa = a.get_current_price("AAPL").await.unwrap().unwrap();
        let pb = b.get_current_price("AAPL").await.unwrap().unwrap();
        assert_eq!(pa, pb);
    }

    #[tokio::test]
    async fn full_snapshot_composes_successfully() {
        let provider = provider();
        let snapshot = provider.get_full_snapshot("MSFT").await.unwrap().unwrap();
        assert_eq!(snapshot.ticker, "MSFT");
        assert!(snapshot.price_history.len() >= 20);
        assert!(!snapshot.options_chains.is_empty());
    }

    #[tokio::test]
    async fn price_history_respects_ohlc_invariants() {
        let provider = provider();
        let bars = provider.get_price_history("NFLX", 30).await.unwrap().unwrap();
        assert!(bars.iter().all(|b| b.is_valid()));
    }
}
