use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Per-ticker cooldown bookkeeping, keyed uniquely by `ticker` (§3 `Cooldown`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cooldown {
    pub last_alert_ts: DateTime<Utc>,
    pub last_score: f64,
}

/// Process-wide daily alert counter, keyed uniquely by `count_date` (§3
/// `DailyAlertCount`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAlertCount {
    pub count_date: NaiveDate,
    pub alert_count: u32,
}
