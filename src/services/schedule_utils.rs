use chrono::{
    offset::LocalResult, DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike,
    Utc, Weekday,
};
use chrono_tz::Tz;
use serde_json::json;

use crate::error::{AppError, AppResult};

pub fn parse_datetime(value: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            AppError::validation_with_details(
                "invalid timestamp, expected ISO-8601",
                json!({"value": value, "error": err.to_string()}),
            )
        })
}

pub fn parse_time_of_day(value: &str) -> AppResult<NaiveTime> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|err| {
            AppError::validation_with_details(
                "invalid time of day, expected HH:MM",
                json!({"value": value, "error": err.to_string()}),
            )
        })
}

pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub fn add_minutes(dt: DateTime<Utc>, minutes: i64) -> AppResult<DateTime<Utc>> {
    dt.checked_add_signed(Duration::minutes(minutes))
        .ok_or_else(|| AppError::validation("time arithmetic out of range"))
}

/// Half-open overlap test; touching intervals do not overlap.
pub fn intervals_overlap<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

pub fn ensure_interval(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<()> {
    if end <= start {
        Err(AppError::validation_with_details(
            "session end time must be after its start time",
            json!({"startTime": format_datetime(start), "endTime": format_datetime(end)}),
        ))
    } else {
        Ok(())
    }
}

pub fn minutes_from_midnight(time: NaiveTime) -> i64 {
    (time.hour() as i64) * 60 + (time.minute() as i64)
}

/// A UTC interval resolved into practice-local calendar terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSlot {
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// False when the interval crosses local midnight.
    pub same_day: bool,
}

pub fn local_slot(start: DateTime<Utc>, end: DateTime<Utc>, tz: Tz) -> LocalSlot {
    let local_start = start.with_timezone(&tz);
    let local_end = end.with_timezone(&tz);
    LocalSlot {
        date: local_start.date_naive(),
        weekday: local_start.weekday(),
        start: local_start.time(),
        end: local_end.time(),
        same_day: local_start.date_naive() == local_end.date_naive(),
    }
}

/// UTC instant for a local wall-clock time; ambiguous times take the earlier
/// instant and skipped (DST gap) times yield `None`.
pub fn at_local(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, _) => Some(first.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

/// Start times `step` minutes apart such that `[start, start + length)` fits
/// inside `[window_start, window_end)`.
pub fn slot_starts(
    window_start: NaiveTime,
    window_end: NaiveTime,
    length_minutes: i64,
    step_minutes: i64,
) -> Vec<NaiveTime> {
    if length_minutes <= 0 || step_minutes <= 0 {
        return Vec::new();
    }
    let open = minutes_from_midnight(window_start);
    let close = minutes_from_midnight(window_end);
    let mut starts = Vec::new();
    let mut cursor = open;
    while cursor + length_minutes <= close {
        starts.push(to_naive_time(cursor as u32));
        cursor += step_minutes;
    }
    starts
}

pub fn to_naive_time(total_minutes: u32) -> NaiveTime {
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    NaiveTime::from_hms_opt(hours, minutes, 0).unwrap_or(NaiveTime::MIN)
}
