//! Formatted renderings of wall time

use std::fmt;

use crate::calendar::{korean_weekday, CalendarTime};

/// Language of the date-time rendering
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DateTimeStyle {
    /// `2024년  2월 28일 (수요일) 14:30:00`
    #[default]
    Korean,
    /// `Wed 2024-02-28 14:30:00`
    English,
}

impl fmt::Display for DateTimeStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateTimeStyle::Korean => f.write_str("korean"),
            DateTimeStyle::English => f.write_str("english"),
        }
    }
}

/// `HH:MM:SS`
pub fn format_time(t: &CalendarTime) -> String {
    t.naive().format("%H:%M:%S").to_string()
}

/// `YYYY-MM-DD`
pub fn format_date(t: &CalendarTime) -> String {
    t.naive().format("%Y-%m-%d").to_string()
}

/// Full date and time; month and day are space-padded in the Korean form
pub fn format_date_time(t: &CalendarTime, style: DateTimeStyle) -> String {
    match style {
        // chrono has no Korean weekday names without its locale feature.
        DateTimeStyle::Korean => format!(
            "{} ({}요일) {}",
            t.naive().format("%Y년 %_m월 %_d일"),
            korean_weekday(t.weekday()),
            format_time(t)
        ),
        DateTimeStyle::English => t.naive().format("%a %Y-%m-%d %H:%M:%S").to_string(),
    }
}
