//! Weekly time windows.
//!
//! A `TimeSlot` is a named set of `TimeInterval`s, each a weekday plus an
//! inclusive range of local clock times. Timestamps are compared as local
//! wall-clock values in whatever offset they carry, so callers convert to the
//! owner's offset before asking.

use crate::core::UserId;
use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Weekday};
use serde::{Deserialize, Serialize};

/// One weekday and an inclusive `[start, end]` range of local times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeInterval")]
pub struct TimeInterval {
    #[serde(with = "day_code")]
    day: Weekday,
    start: NaiveTime,
    end: NaiveTime,
}

/// Unvalidated interval as it appears on the wire.
#[derive(Deserialize)]
struct RawTimeInterval {
    #[serde(with = "day_code")]
    day: Weekday,
    start: NaiveTime,
    end: NaiveTime,
}

impl TryFrom<RawTimeInterval> for TimeInterval {
    type Error = Error;

    fn try_from(raw: RawTimeInterval) -> Result<Self> {
        Self::new(raw.day, raw.start, raw.end)
    }
}

impl TimeInterval {
    /// First instant of a day.
    pub const DAY_START: NaiveTime = NaiveTime::MIN;

    /// Creates an interval, rejecting `start > end`.
    ///
    /// Ranges crossing midnight are expressed as two intervals on adjacent
    /// days.
    pub fn new(day: Weekday, start: NaiveTime, end: NaiveTime) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidTimeInterval(format!(
                "start {start} is after end {end} on {day}"
            )));
        }
        Ok(Self { day, start, end })
    }

    /// An interval covering all of `day`.
    pub fn whole_day(day: Weekday) -> Self {
        Self {
            day,
            start: Self::DAY_START,
            end: day_end(),
        }
    }

    pub fn day(&self) -> Weekday {
        self.day
    }

    /// Monday-first ordinal, 1..=7.
    pub fn day_ordinal(&self) -> u32 {
        self.day.number_from_monday()
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    /// Whether `timestamp`'s local weekday is this interval's day and its local
    /// time of day lies within `[start, end]`.
    pub fn contains<Tz: TimeZone>(&self, timestamp: &DateTime<Tz>) -> bool {
        let local = timestamp.naive_local();
        let time = local.time();
        local.weekday() == self.day && self.start <= time && time <= self.end
    }
}

/// Last representable microsecond of a day.
fn day_end() -> NaiveTime {
    NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).expect("23:59:59.999999 is a valid time")
}

/// A named, user-owned weekly recurrence pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: u64,
    pub owner: UserId,
    /// Unique per owner.
    pub name: String,
    #[serde(rename = "time_intervals")]
    pub intervals: Vec<TimeInterval>,
}

impl TimeSlot {
    pub fn new(id: u64, owner: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            owner,
            name: name.into(),
            intervals: Vec::new(),
        }
    }

    pub fn with_interval(mut self, interval: TimeInterval) -> Self {
        self.intervals.push(interval);
        self
    }

    /// A slot covering every minute of the week.
    pub fn always(id: u64, owner: UserId, name: impl Into<String>) -> Self {
        let days = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ];
        days.into_iter()
            .fold(Self::new(id, owner, name), |slot, day| {
                slot.with_interval(TimeInterval::whole_day(day))
            })
    }

    /// True iff any interval contains `timestamp`. Overlapping or duplicate
    /// intervals are harmless; an empty slot contains nothing.
    pub fn contains<Tz: TimeZone>(&self, timestamp: &DateTime<Tz>) -> bool {
        self.intervals.iter().any(|interval| interval.contains(timestamp))
    }
}

/// Two-letter weekday codes (`MO` .. `SU`).
mod day_code {
    use chrono::Weekday;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn code(day: Weekday) -> &'static str {
        match day {
            Weekday::Mon => "MO",
            Weekday::Tue => "TU",
            Weekday::Wed => "WE",
            Weekday::Thu => "TH",
            Weekday::Fri => "FR",
            Weekday::Sat => "SA",
            Weekday::Sun => "SU",
        }
    }

    pub fn serialize<S: Serializer>(day: &Weekday, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(code(*day))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Weekday, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "MO" => Ok(Weekday::Mon),
            "TU" => Ok(Weekday::Tue),
            "WE" => Ok(Weekday::Wed),
            "TH" => Ok(Weekday::Thu),
            "FR" => Ok(Weekday::Fri),
            "SA" => Ok(Weekday::Sat),
            "SU" => Ok(Weekday::Sun),
            other => Err(de::Error::custom(format!("unknown day code '{other}'"))),
        }
    }
}
