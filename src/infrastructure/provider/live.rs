use super::MarketDataProvider;
use crate::domain::errors::ProviderError;
use crate::domain::types::{OptionsChain, PriceBar, TickerInfo};
use crate::infrastructure::cache::{default_ttl, CacheTtlConfig, TtlCache};
use crate::infrastructure::circuit_breaker::CircuitBreakerRegistry;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Generic JSON-over-HTTPS implementation of [`MarketDataProvider`].
///
/// Speaks no particular vendor's wire format: it expects a REST backend exposing
/// `GET {base_url}/price/{ticker}`, `/history/{ticker}?days=N`, `/expirations/{ticker}`,
/// `/chain/{ticker}/{expiration}` and `/info/{ticker}`, each returning the relevant §3
/// type as JSON, or HTTP 404 for "absent". The concrete vendor behind `base_url` is an
/// external-collaborator concern.
pub struct LiveMarketDataProvider {
    client: reqwest::Client,
    base_url: String,
    cache: Arc<TtlCache>,
    breakers: Arc<CircuitBreakerRegistry>,
    ttl_config: CacheTtlConfig,
}

impl LiveMarketDataProvider {
    pub fn new(base_url: impl Into<String>, cache: Arc<TtlCache>, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client construction failed");
        Self {
            client,
            base_url: base_url.into(),
            cache,
            breakers,
            ttl_config: CacheTtlConfig::default(),
        }
    }

    pub fn with_ttl_config(mut self, ttl_config: CacheTtlConfig) -> Self {
        self.ttl_config = ttl_config;
        self
    }

    async fn fetch<T: DeserializeOwned + Send + 'static>(
        &self,
        operation: &'static str,
        path: &str,
    ) -> Result<Option<T>, ProviderError> {
        let breaker = self.breakers.breaker(operation).await;
        let url = format!("{}{}", self.base_url, path);
        breaker
            .call(|| async {
                let response = self.client.get(&url).send().await.map_err(|e| ProviderError::Transient {
                    operation: operation.to_string(),
                    reason: e.to_string(),
                })?;

                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    return Err(ProviderError::RateLimited {
                        operation: operation.to_string(),
                        retry_after_secs: response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(60),
                    });
                }
                if response.status().is_server_error() || response.status() == reqwest::StatusCode::REQUEST_TIMEOUT {
                    return Err(ProviderError::Transient {
                        operation: operation.to_string(),
                        reason: format!("upstream status {}", response.status()),
                    });
                }
                if !response.status().is_success() {
                    return Err(ProviderError::Permanent {
                        operation: operation.to_string(),
                        reason: format!("upstream status {}", response.status()),
                    });
                }

                let body: T = response.json().await.map_err(|e| ProviderError::Permanent {
                    operation: operation.to_string(),
                    reason: format!("decode error: {e}"),
                })?;
                Ok(Some(body))
            })
            .await
    }
}

#[async_trait]
impl MarketDataProvider for LiveMarketDataProvider {
    async fn get_current_price(&self, ticker: &str) -> Result<Option<f64>, ProviderError> {
        let cache_key = format!("live:price:{ticker}");
        if let Some(price) = self.cache.get::<f64>(&cache_key) {
            return Ok(Some(price));
        }
        let price = self
            .fetch::<f64>("get_current_price", &format!("/price/{ticker}"))
            .await?;
        if let Some(p) = price {
            let _ = self.cache.set(&cache_key, &p, self.ttl_config.current_price);
        }
        Ok(price)
    }

    async fn get_price_history(
        &self,
        ticker: &str,
        lookback_days: u32,
    ) -> Result<Option<Vec<PriceBar>>, ProviderError> {
        let cache_key = format!("live:history:{ticker}:{lookback_days}");
        if let Some(bars) = self.cache.get::<Vec<PriceBar>>(&cache_key) {
            return Ok(Some(bars));
        }
        let bars = self
            .fetch::<Vec<PriceBar>>(
                "get_price_history",
                &format!("/history/{ticker}?days={lookback_days}"),
            )
            .await?;
        if let Some(b) = &bars {
            let _ = self.cache.set(&cache_key, b, self.ttl_config.price_history);
        }
        Ok(bars)
    }

    async fn get_options_expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>, ProviderError> {
        let cache_key = format!("live:expirations:{ticker}");
        if let Some(dates) = self.cache.get::<Vec<NaiveDate>>(&cache_key) {
            return Ok(dates);
        }
        let dates = self
            .fetch::<Vec<NaiveDate>>("get_options_expirations", &format!("/expirations/{ticker}"))
            .await?
            .unwrap_or_default();
        let _ = self.cache.set(&cache_key, &dates, default_ttl::EXPIRATIONS);
        Ok(dates)
    }

    async fn get_options_chain(
        &self,
        ticker: &str,
        expiration: NaiveDate,
    ) -> Result<Option<OptionsChain>, ProviderError> {
        let cache_key = format!("live:chain:{ticker}:{expiration}");
        if let Some(chain) = self.cache.get::<OptionsChain>(&cache_key) {
            return Ok(Some(chain));
        }
        let chain = self
            .fetch::<OptionsChain>("get_options_chain", &format!("/chain/{ticker}/{expiration}"))
            .await?;
        if let Some(c) = &chain {
            let _ = self.cache.set(&cache_key, c, default_ttl::OPTIONS_CHAIN);
        }
        Ok(chain)
    }

    async fn get_ticker_info(&self, ticker: &str) -> Result<Option<TickerInfo>, ProviderError> {
        let cache_key = format!("live:info:{ticker}");
        if let Some(info) = self.cache.get::<TickerInfo>(&cache_key) {
            return Ok(Some(info));
        }
        let info = self
            .fetch::<TickerInfo>("get_ticker_info", &format!("/info/{ticker}"))
            .await?;
        if let Some(i) = &info {
            let _ = self.cache.set(&cache_key, i, default_ttl::TICKER_INFO);
        }
        Ok(info)
    }
}
