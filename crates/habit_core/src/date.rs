//! Calendar helpers used at the edges of the crate.
//!
//! Everything past this module works with `chrono` values, so a malformed
//! date never reaches a [`HabitRecord`](crate::record::HabitRecord).

use chrono::{Local, NaiveDate, NaiveDateTime};

use crate::error::{HabitError, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATE_TIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Today's date on the local calendar.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Current local wall-clock time.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Parses a `YYYY-MM-DD` date.
pub fn parse_date(input: &str) -> Result<NaiveDate> {
    let trimmed = input.trim();
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .map_err(|err| HabitError::InvalidDate(format!("`{trimmed}`: {err}")))
}

/// Builds a date from its parts, rejecting out-of-range values such as
/// February 30th.
pub fn ymd(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| HabitError::InvalidDate(format!("{year:04}-{month:02}-{day:02}")))
}

/// Parses a local wall-clock time such as `2025-11-07T09:00:00` or
/// `2025-11-07 09:00`.
pub fn parse_date_time(input: &str) -> Result<NaiveDateTime> {
    let trimmed = input.trim();
    DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| HabitError::InvalidDate(format!("`{trimmed}` is not a date and time")))
}
