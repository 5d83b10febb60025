//! UTC <-> US/Eastern conversion and trading-session predicates (§4.1).

use crate::domain::errors::CalendarError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;
use chrono_tz::Tz;
use std::collections::BTreeSet;

const SESSION_OPEN: (u32, u32) = (9, 30);
const SESSION_CLOSE: (u32, u32) = (16, 0);

/// A swappable set of market holidays, loaded from a config file of ISO dates rather
/// than compiled in, per §4.1.
#[derive(Debug, Clone, Default)]
pub struct HolidaySet {
    dates: BTreeSet<NaiveDate>,
}

impl HolidaySet {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            dates: dates.into_iter().collect(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    /// A representative built-in set covering the well-known US market holidays for
    /// the current trading calendar; real deployments should override this with a
    /// config-provided list so the set can track rule changes without a rebuild.
    pub fn default_us_holidays(year: i32) -> Self {
        let mut dates = BTreeSet::new();
        let fixed = [(1, 1), (6, 19), (7, 4), (12, 25)];
        for (m, d) in fixed {
            if let Some(date) = NaiveDate::from_ymd_opt(year, m, d) {
                dates.insert(date);
            }
        }
        Self { dates }
    }
}

pub struct MarketCalendar {
    holidays: HolidaySet,
}

impl MarketCalendar {
    pub fn new(holidays: HolidaySet) -> Self {
        Self { holidays }
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    pub fn to_et(&self, instant: DateTime<Utc>) -> DateTime<Tz> {
        instant.with_timezone(&New_York)
    }

    /// Interprets `civil` as a wall-clock time in US/Eastern and resolves it to a UTC
    /// instant. Fails with `InvalidTz` when the wall-clock time does not exist in that
    /// zone (the spring-forward gap); ambiguous (fall-back) times resolve to the
    /// earlier of the two instants.
    pub fn from_et(&self, civil: NaiveDateTime) -> Result<DateTime<Utc>, CalendarError> {
        match New_York.from_local_datetime(&civil) {
            chrono::LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
            chrono::LocalResult::Ambiguous(earlier, _later) => Ok(earlier.with_timezone(&Utc)),
            chrono::LocalResult::None => Err(CalendarError::InvalidTz),
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(date)
    }

    pub fn is_market_open(&self, instant: DateTime<Utc>) -> bool {
        let et = self.to_et(instant);
        if !self.is_trading_day(et.date_naive()) {
            return false;
        }
        let open = NaiveTime::from_hms_opt(SESSION_OPEN.0, SESSION_OPEN.1, 0).unwrap();
        let close = NaiveTime::from_hms_opt(SESSION_CLOSE.0, SESSION_CLOSE.1, 0).unwrap();
        let t = et.time();
        t >= open && t < close
    }

    /// Walks forward day by day looking for the first trading day whose `time_of_day`
    /// (interpreted in ET) resolves to a UTC instant strictly after `instant`.
    fn next_session_instant(&self, instant: DateTime<Utc>, time_of_day: NaiveTime) -> DateTime<Utc> {
        let mut date = self.to_et(instant).date_naive();
        loop {
            if self.is_trading_day(date)
                && let Ok(candidate) = self.from_et(date.and_time(time_of_day))
                && candidate > instant
            {
                return candidate;
            }
            date += Duration::days(1);
        }
    }

    pub fn next_market_open(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        self.next_session_instant(instant, NaiveTime::from_hms_opt(SESSION_OPEN.0, SESSION_OPEN.1, 0).unwrap())
    }

    pub fn next_market_close(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        self.next_session_instant(instant, NaiveTime::from_hms_opt(SESSION_CLOSE.0, SESSION_CLOSE.1, 0).unwrap())
    }

    /// Resolves an arbitrary ET wall-clock (e.g. a configured scan trigger time) to
    /// the next trading-day UTC instant strictly after `instant`.
    pub fn next_scheduled_instant(&self, instant: DateTime<Utc>, time_of_day: NaiveTime) -> DateTime<Utc> {
        self.next_session_instant(instant, time_of_day)
    }

    pub fn market_hours_remaining(&self, instant: DateTime<Utc>) -> Duration {
        if self.is_market_open(instant) {
            self.next_market_close(instant) - instant
        } else {
            Duration::zero()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calendar() -> MarketCalendar {
        MarketCalendar::new(HolidaySet::default_us_holidays(2026))
    }

    #[test]
    fn weekend_is_not_a_trading_day() {
        let cal = calendar();
        let saturday = NaiveDate::from_ymd_opt(2026, 1, 3).unwrap();
        assert!(!cal.is_trading_day(saturday));
    }

    #[test]
    fn new_years_day_is_a_holiday() {
        let cal = calendar();
        let new_years = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert!(!cal.is_trading_day(new_years));
    }

    #[test]
    fn weekday_non_holiday_is_a_trading_day() {
        let cal = calendar();
        let tuesday = NaiveDate::from_ymd_opt(2026, 1, 6).unwrap();
        assert!(cal.is_trading_day(tuesday));
    }

    #[test]
    fn market_is_open_during_regular_session() {
        let cal = calendar();
        let noon_et = cal
            .from_et(
                NaiveDate::from_ymd_opt(2026, 1, 6)
                    .unwrap()
                    .and_hms_opt(12, 0, 0)
                    .unwrap(),
            )
            .unwrap();
        assert!(cal.is_market_open(noon_et));
    }

    #[test]
    fn market_is_closed_before_open() {
        let cal = calendar();
        let early = cal
            .from_et(
                NaiveDate::from_ymd_opt(2026, 1, 6)
                    .unwrap()
                    .and_hms_opt(6, 0, 0)
                    .unwrap(),
            )
            .unwrap();
        assert!(!cal.is_market_open(early));
    }

    #[test]
    fn next_market_open_skips_weekend() {
        let cal = calendar();
        let friday_after_close = cal
            .from_et(
                NaiveDate::from_ymd_opt(2026, 1, 2)
                    .unwrap()
                    .and_hms_opt(17, 0, 0)
                    .unwrap(),
            )
            .unwrap();
        let next_open = cal.next_market_open(friday_after_close);
        let next_open_et = cal.to_et(next_open);
        assert_eq!(next_open_et.weekday(), Weekday::Mon);
    }
}
