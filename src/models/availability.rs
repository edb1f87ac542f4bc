use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{AppError, AppResult};
use crate::services::schedule_utils;

pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Time-of-day range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    #[serde(serialize_with = "serialize_time")]
    pub start: NaiveTime,
    #[serde(serialize_with = "serialize_time")]
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> AppResult<Self> {
        if end <= start {
            return Err(AppError::validation(format!(
                "availability window must end after it starts ({} - {})",
                start.format("%H:%M"),
                end.format("%H:%M")
            )));
        }
        Ok(Self { start, end })
    }

    /// Parses `"HH:MM"` / `"HH:MM:SS"` bounds.
    pub fn parse(start: &str, end: &str) -> AppResult<Self> {
        Self::new(
            schedule_utils::parse_time_of_day(start)?,
            schedule_utils::parse_time_of_day(end)?,
        )
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes().max(0)
    }

    pub fn contains(&self, start: NaiveTime, end: NaiveTime) -> bool {
        start < end && self.start <= start && end <= self.end
    }

    pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(TimeRange { start, end })
    }
}

/// Weekly availability: one optional window per weekday. A `None` day is
/// unavailable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyAvailability {
    #[serde(default, with = "day_window")]
    pub monday: Option<TimeRange>,
    #[serde(default, with = "day_window")]
    pub tuesday: Option<TimeRange>,
    #[serde(default, with = "day_window")]
    pub wednesday: Option<TimeRange>,
    #[serde(default, with = "day_window")]
    pub thursday: Option<TimeRange>,
    #[serde(default, with = "day_window")]
    pub friday: Option<TimeRange>,
    #[serde(default, with = "day_window")]
    pub saturday: Option<TimeRange>,
    #[serde(default, with = "day_window")]
    pub sunday: Option<TimeRange>,
}

impl WeeklyAvailability {
    pub fn day(&self, weekday: Weekday) -> Option<&TimeRange> {
        match weekday {
            Weekday::Mon => self.monday.as_ref(),
            Weekday::Tue => self.tuesday.as_ref(),
            Weekday::Wed => self.wednesday.as_ref(),
            Weekday::Thu => self.thursday.as_ref(),
            Weekday::Fri => self.friday.as_ref(),
            Weekday::Sat => self.saturday.as_ref(),
            Weekday::Sun => self.sunday.as_ref(),
        }
    }

    fn day_mut(&mut self, weekday: Weekday) -> &mut Option<TimeRange> {
        match weekday {
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
            Weekday::Sun => &mut self.sunday,
        }
    }

    pub fn with_day(mut self, weekday: Weekday, range: TimeRange) -> Self {
        *self.day_mut(weekday) = Some(range);
        self
    }

    pub fn without_day(mut self, weekday: Weekday) -> Self {
        *self.day_mut(weekday) = None;
        self
    }

    /// Same window on Monday through Friday.
    pub fn weekdays(range: TimeRange) -> Self {
        WEEKDAYS[..5]
            .iter()
            .fold(Self::default(), |acc, day| acc.with_day(*day, range))
    }

    pub fn shared_window(&self, weekday: Weekday, other: &WeeklyAvailability) -> Option<TimeRange> {
        match (self.day(weekday), other.day(weekday)) {
            (Some(a), Some(b)) => a.intersect(b),
            _ => None,
        }
    }

    pub fn total_minutes(&self) -> i64 {
        WEEKDAYS
            .iter()
            .filter_map(|day| self.day(*day))
            .map(TimeRange::minutes)
            .sum()
    }

    /// Minutes per week during which both schedules are open.
    pub fn shared_minutes(&self, other: &WeeklyAvailability) -> i64 {
        WEEKDAYS
            .iter()
            .filter_map(|day| self.shared_window(*day, other))
            .map(|range| range.minutes())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        WEEKDAYS.iter().all(|day| self.day(*day).is_none())
    }
}

/// Whether `[start, end)` lies fully inside the window for `weekday`.
pub fn is_within_availability(
    window: &WeeklyAvailability,
    weekday: Weekday,
    start: NaiveTime,
    end: NaiveTime,
) -> bool {
    window
        .day(weekday)
        .map(|range| range.contains(start, end))
        .unwrap_or(false)
}

fn serialize_time<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.format("%H:%M").to_string())
}

mod day_window {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use tracing::warn;

    use super::TimeRange;
    use crate::services::schedule_utils;

    #[derive(Deserialize)]
    struct RawDayWindow {
        #[serde(default)]
        start: Option<String>,
        #[serde(default)]
        end: Option<String>,
    }

    pub fn serialize<S: Serializer>(
        value: &Option<TimeRange>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<TimeRange>, D::Error> {
        let Some(raw) = Option::<RawDayWindow>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let present = |bound: Option<String>| bound.filter(|value| !value.trim().is_empty());
        let (Some(start), Some(end)) = (present(raw.start), present(raw.end)) else {
            warn!(
                target: "engine::availability",
                "availability window without a start or end treated as unavailable"
            );
            return Ok(None);
        };

        let start = schedule_utils::parse_time_of_day(&start).map_err(D::Error::custom)?;
        let end = schedule_utils::parse_time_of_day(&end).map_err(D::Error::custom)?;

        if end <= start {
            warn!(
                target: "engine::availability",
                start = %start,
                end = %end,
                "inverted availability window treated as unavailable"
            );
            return Ok(None);
        }

        Ok(Some(TimeRange { start, end }))
    }
}
