use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// States of the scheduler state machine (§4.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchedulerStateKind {
    Idle,
    Waiting,
    Collecting,
    Flushing,
    BackingOff,
}

impl SchedulerStateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulerStateKind::Idle => "IDLE",
            SchedulerStateKind::Waiting => "WAITING",
            SchedulerStateKind::Collecting => "COLLECTING",
            SchedulerStateKind::Flushing => "FLUSHING",
            SchedulerStateKind::BackingOff => "BACKING_OFF",
        }
    }
}

impl std::str::FromStr for SchedulerStateKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(SchedulerStateKind::Idle),
            "WAITING" => Ok(SchedulerStateKind::Waiting),
            "COLLECTING" => Ok(SchedulerStateKind::Collecting),
            "FLUSHING" => Ok(SchedulerStateKind::Flushing),
            "BACKING_OFF" => Ok(SchedulerStateKind::BackingOff),
            other => anyhow::bail!("unknown scheduler state: {other}"),
        }
    }
}

/// Durable scheduler counters and state, reloaded on every startup to recover across
/// restarts (§3 `SchedulerState`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub current_state: SchedulerStateKind,
    pub api_calls_this_hour: u32,
    pub api_calls_today: u32,
    pub hour_window_start: DateTime<Utc>,
    pub day_window_start: DateTime<Utc>,
    pub buffer_depth: u32,
    pub backoff_until: Option<DateTime<Utc>>,
    pub backoff_epoch: u32,
    pub last_collection_at: Option<DateTime<Utc>>,
}

impl SchedulerState {
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            current_state: SchedulerStateKind::Idle,
            api_calls_this_hour: 0,
            api_calls_today: 0,
            hour_window_start: now,
            day_window_start: now,
            buffer_depth: 0,
            backoff_until: None,
            backoff_epoch: 0,
            last_collection_at: None,
        }
    }
}
