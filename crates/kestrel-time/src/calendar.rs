//! Calendar breakdown of epoch seconds
//!
//! The wall clock already carries the timezone offset, so breakdown is
//! done on a naive (zone-less) date time.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Weekday};

/// Broken-down wall time
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CalendarTime(NaiveDateTime);

impl CalendarTime {
    /// Seconds outside chrono's representable range read as the epoch.
    pub fn from_epoch_seconds(secs: i64) -> Self {
        CalendarTime(DateTime::from_timestamp(secs, 0).unwrap_or_default().naive_utc())
    }

    pub fn to_epoch_seconds(&self) -> i64 {
        self.0.and_utc().timestamp()
    }

    pub fn naive(&self) -> NaiveDateTime {
        self.0
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    /// 1..=12
    pub fn month(&self) -> u32 {
        self.0.month()
    }

    /// 1..=31
    pub fn day(&self) -> u32 {
        self.0.day()
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }

    pub fn second(&self) -> u32 {
        self.0.second()
    }

    pub fn weekday(&self) -> Weekday {
        self.0.weekday()
    }
}

impl From<NaiveDateTime> for CalendarTime {
    fn from(dt: NaiveDateTime) -> Self {
        CalendarTime(dt)
    }
}

/// Single-syllable Korean weekday name (`일`, `월`, ...)
pub fn korean_weekday(weekday: Weekday) -> &'static str {
    ["일", "월", "화", "수", "목", "금", "토"][weekday.num_days_from_sunday() as usize]
}
