//! Scheduling primitives shared by the daily and intraday schedulers.
//!
//! The clock is injectable so scheduler trigger logic can be tested
//! deterministically without waiting on wall time.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

pub mod daily;
pub mod intraday;

pub use daily::DailyScheduler;
pub use intraday::IntradayScheduler;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used outside tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall-clock time of day, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> EngineResult<Self> {
        if hour > 23 || minute > 59 {
            return Err(EngineError::config(format!(
                "invalid time of day {hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    /// Parse `"HH:MM"`.
    pub fn parse(s: &str) -> EngineResult<Self> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| EngineError::config(format!("invalid time of day {s:?}")))?;
        let hour: u8 = h
            .parse()
            .map_err(|_| EngineError::config(format!("invalid hour in {s:?}")))?;
        let minute: u8 = m
            .parse()
            .map_err(|_| EngineError::config(format!("invalid minute in {s:?}")))?;
        Self::new(hour, minute)
    }

    /// Whether this time of day has passed at `now` (UTC).
    pub fn has_passed(&self, now: DateTime<Utc>) -> bool {
        now.time() >= self.as_naive()
    }

    pub fn as_naive(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour as u32, self.minute as u32, 0)
            .expect("validated at construction")
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Trading-day predicate: weekday and not a configured holiday.
#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    holidays: HashSet<NaiveDate>,
}

impl TradingCalendar {
    pub fn with_holidays<I: IntoIterator<Item = NaiveDate>>(holidays: I) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn add_holiday(&mut self, date: NaiveDate) {
        self.holidays.insert(date);
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }
}
