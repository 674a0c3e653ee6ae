// libs/availability-cell/src/services/civil_time.rs
//
// Wall-clock <-> instant conversion in the clinic's civil timezone.
// Every conversion goes through the tz rules for the given date, never
// through a fixed UTC offset, so DST days come out right.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::models::AvailabilityError;
use crate::services::intervals::{Interval, TimeRange};

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Minutes since local midnight, `0..=1440`. 1440 is only meaningful as an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WallClock(u16);

impl WallClock {
    pub const MIDNIGHT: WallClock = WallClock(0);
    pub const END_OF_DAY: WallClock = WallClock(MINUTES_PER_DAY);

    pub fn from_hm(hour: u32, minute: u32) -> Result<Self, AvailabilityError> {
        if minute >= 60 || hour > 24 || (hour == 24 && minute != 0) {
            return Err(AvailabilityError::InvalidRange(format!(
                "{:02}:{:02} is not a wall-clock time",
                hour, minute
            )));
        }
        Ok(WallClock((hour * 60 + minute) as u16))
    }

    pub fn from_hour(hour: u32) -> Result<Self, AvailabilityError> {
        Self::from_hm(hour, 0)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u32 {
        u32::from(self.0 / 60)
    }

    pub fn minute(self) -> u32 {
        u32::from(self.0 % 60)
    }

    /// Reads an end-of-window value: midnight closes the day rather than opening it.
    pub fn as_end(self) -> Self {
        if self == Self::MIDNIGHT {
            Self::END_OF_DAY
        } else {
            self
        }
    }
}

impl From<NaiveTime> for WallClock {
    fn from(time: NaiveTime) -> Self {
        use chrono::Timelike;
        WallClock((time.hour() * 60 + time.minute()) as u16)
    }
}

impl FromStr for WallClock {
    type Err = AvailabilityError;

    /// Accepts `HH:MM` and `HH:MM:SS`, two digits per field; seconds must be zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AvailabilityError::InvalidRange(format!("'{}' is not a wall-clock time", s));

        let mut parts = s.trim().split(':');
        let hour = parts.next().and_then(two_digits).ok_or_else(invalid)?;
        let minute = parts.next().and_then(two_digits).ok_or_else(invalid)?;
        if let Some(seconds) = parts.next() {
            if two_digits(seconds) != Some(0) {
                return Err(invalid());
            }
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        WallClock::from_hm(hour, minute).map_err(|_| invalid())
    }
}

fn two_digits(field: &str) -> Option<u32> {
    match field.as_bytes() {
        [tens @ b'0'..=b'9', ones @ b'0'..=b'9'] => Some(u32::from(tens - b'0') * 10 + u32::from(ones - b'0')),
        _ => None,
    }
}

impl fmt::Display for WallClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:00", self.hour(), self.minute())
    }
}

impl Serialize for WallClock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WallClock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A same-day wall-clock window. End is exclusive; a `00:00` end means midnight.
pub type WallClockWindow = Interval<WallClock>;

pub fn wall_clock_window(start: WallClock, end: WallClock) -> Result<WallClockWindow, AvailabilityError> {
    let end = end.as_end();
    Interval::new(start, end).ok_or_else(|| {
        AvailabilityError::InvalidRange(format!("window {} - {} is empty or inverted", start, end))
    })
}

pub fn parse_timezone(name: &str) -> Result<Tz, AvailabilityError> {
    name.parse::<Tz>()
        .map_err(|_| AvailabilityError::InvalidTimezone(name.to_string()))
}

/// 0 = Sunday ... 6 = Saturday.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub fn local_date(tz: &Tz, instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(tz).date_naive()
}

/// Resolves a wall-clock time on `date` to an instant.
///
/// Ambiguous times (fall-back) take the earlier instant. Times inside a
/// spring-forward gap move to the first wall-clock minute that exists.
pub fn resolve_local(tz: &Tz, date: NaiveDate, at: WallClock) -> DateTime<Utc> {
    if at == WallClock::END_OF_DAY {
        let next_day = date.succ_opt().unwrap_or(date);
        return resolve_local(tz, next_day, WallClock::MIDNIGHT);
    }

    let naive = date.and_time(NaiveTime::MIN) + Duration::minutes(i64::from(at.minutes()));
    let mut candidate = naive;
    for _ in 0..=i64::from(MINUTES_PER_DAY) {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(t) => return t.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, latest) => {
                return earliest.min(latest).with_timezone(&Utc);
            }
            LocalResult::None => candidate += Duration::minutes(1),
        }
    }
    // No zone has a day-long gap; reading the wall clock as UTC is the least bad answer.
    Utc.from_utc_datetime(&naive)
}

/// Instant range for a wall-clock window on `date`. `None` when DST collapses it.
pub fn window_to_range(tz: &Tz, date: NaiveDate, window: WallClockWindow) -> Option<TimeRange> {
    Interval::new(
        resolve_local(tz, date, window.start),
        resolve_local(tz, date, window.end),
    )
}

/// `[local midnight, next local midnight)` for `date`.
pub fn day_range(tz: &Tz, date: NaiveDate) -> TimeRange {
    let start = resolve_local(tz, date, WallClock::MIDNIGHT);
    let end = resolve_local(tz, date, WallClock::END_OF_DAY);
    Interval { start, end }
}
