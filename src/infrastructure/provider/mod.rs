//! Abstract market data access: `MarketDataProvider` plus the synthetic and generic
//! HTTP implementations that satisfy it (§4.4).

mod demo;
mod live;

pub use demo::DemoProvider;
pub use live::LiveMarketDataProvider;

use crate::domain::errors::ProviderError;
use crate::domain::types::{MarketSnapshot, OptionsChain, TickerInfo};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Breaker-wrapped, cache-fronted access to a single source of market data.
///
/// Implementations MUST route every outbound call through the breaker keyed by
/// operation name, and SHOULD check the cache before calling upstream (§4.4).
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_current_price(&self, ticker: &str) -> Result<Option<f64>, ProviderError>;

    async fn get_price_history(
        &self,
        ticker: &str,
        lookback_days: u32,
    ) -> Result<Option<Vec<crate::domain::types::PriceBar>>, ProviderError>;

    async fn get_options_expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>, ProviderError>;

    async fn get_options_chain(
        &self,
        ticker: &str,
        expiration: NaiveDate,
    ) -> Result<Option<OptionsChain>, ProviderError>;

    async fn get_ticker_info(&self, ticker: &str) -> Result<Option<TickerInfo>, ProviderError>;

    /// Composes the other operations into a complete snapshot. Absent on any critical
    /// sub-failure (missing price or missing price history); a missing options chain or
    /// ticker info degrades gracefully rather than failing the whole snapshot.
    async fn get_full_snapshot(&self, ticker: &str) -> Result<Option<MarketSnapshot>, ProviderError> {
        let Some(spot_price) = self.get_current_price(ticker).await? else {
            return Ok(None);
        };
        let Some(price_history) = self.get_price_history(ticker, 90).await? else {
            return Ok(None);
        };

        let expirations = self.get_options_expirations(ticker).await?;
        let mut options_chains = std::collections::BTreeMap::new();
        for expiration in expirations.into_iter().take(4) {
            if let Some(chain) = self.get_options_chain(ticker, expiration).await? {
                options_chains.insert(expiration, chain);
            }
        }

        let ticker_info = self.get_ticker_info(ticker).await?;

        Ok(Some(MarketSnapshot {
            ticker: ticker.to_string(),
            timestamp: chrono::Utc::now(),
            spot_price,
            price_history,
            options_chains,
            ticker_info,
        }))
    }
}
