//! Per-ticker cooldown and process-wide daily cap enforcement (§4.10).

use crate::domain::errors::StorageError;
use crate::domain::types::Cooldown;
use crate::infrastructure::persistence::CooldownRepository;
use chrono::{NaiveDate, Utc};

#[derive(Debug, Clone)]
pub struct ThrottlerConfig {
    pub cooldown_hours: f64,
    pub max_alerts_per_day: u32,
}

impl Default for ThrottlerConfig {
    fn default() -> Self {
        Self {
            cooldown_hours: 24.0,
            max_alerts_per_day: 5,
        }
    }
}

/// Wraps [`CooldownRepository`] with the admissibility and bookkeeping rules §4.10
/// specifies. The cooldown check and the count increment are each individually
/// atomic at the store layer, but not atomic *together* across concurrent emissions
/// for the same ticker (§5 Concurrency) -- the store's upsert ensures the final
/// cooldown row reflects the last writer and the daily counter reflects the exact
/// count of successful `record_alert` calls.
pub struct Throttler {
    cooldowns: CooldownRepository,
    config: ThrottlerConfig,
}

impl Throttler {
    pub fn new(cooldowns: CooldownRepository, config: ThrottlerConfig) -> Self {
        Self { cooldowns, config }
    }

    pub async fn should_alert(&self, ticker: &str) -> Result<bool, StorageError> {
        let (in_cooldown, _) = self.cooldowns.is_in_cooldown(ticker, self.config.cooldown_hours).await?;
        if in_cooldown {
            return Ok(false);
        }
        let today_count = self.cooldowns.daily_count(Utc::now().date_naive()).await?;
        Ok(today_count < self.config.max_alerts_per_day)
    }

    /// Updates the cooldown and increments today's count. Returns `false` only if
    /// either write fails.
    pub async fn record_alert(&self, ticker: &str, score: f64) -> bool {
        let cooldown = Cooldown {
            last_alert_ts: Utc::now(),
            last_score: score,
        };
        if self.cooldowns.upsert(ticker, cooldown).await.is_err() {
            return false;
        }
        self.cooldowns.increment_daily_count(Utc::now().date_naive()).await.is_ok()
    }

    pub async fn get_cooldown_remaining(&self, ticker: &str) -> Result<Option<f64>, StorageError> {
        self.cooldowns.cooldown_remaining(ticker, self.config.cooldown_hours).await
    }

    pub async fn get_daily_count(&self, date: Option<NaiveDate>) -> Result<u32, StorageError> {
        self.cooldowns.daily_count(date.unwrap_or_else(|| Utc::now().date_naive())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::Store;

    async fn throttler() -> Throttler {
        let store = Store::connect("sqlite::memory:", 1).await.unwrap();
        Throttler::new(CooldownRepository::new(store.pool.clone()), ThrottlerConfig::default())
    }

    #[tokio::test]
    async fn allows_first_alert_for_fresh_ticker() {
        let t = throttler().await;
        assert!(t.should_alert("AAPL").await.unwrap());
    }

    #[tokio::test]
    async fn blocks_second_emission_within_cooldown() {
        let t = throttler().await;
        assert!(t.record_alert("AAPL", 80.0).await);
        assert!(!t.should_alert("AAPL").await.unwrap());
    }

    #[tokio::test]
    async fn blocks_once_daily_max_is_reached() {
        let mut t = throttler().await;
        t.config.max_alerts_per_day = 2;
        assert!(t.record_alert("AAA", 80.0).await);
        assert!(t.record_alert("BBB", 80.0).await);
        assert!(!t.should_alert("CCC").await.unwrap());
    }

    #[tokio::test]
    async fn daily_count_reflects_successful_records() {
        let t = throttler().await;
        t.record_alert("AAPL", 80.0).await;
        t.record_alert("MSFT", 70.0).await;
        assert_eq!(t.get_daily_count(None).await.unwrap(), 2);
    }
}
