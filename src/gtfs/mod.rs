use chrono::NaiveDate;
use futures::TryStreamExt;
use serde::Deserialize;
use std::fmt;

use crate::{error::SourceError, gtfs::source::RowSource};

pub mod calendar;
pub mod source;
pub mod trips;

/// Seconds since local midnight of the service day. May exceed 24 hours for
/// trips running past midnight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TimeOfDay(u32);

impl TimeOfDay {
    pub fn from_seconds(seconds: u32) -> Self {
        Self(seconds)
    }

    pub fn from_hms(hours: u32, minutes: u32, seconds: u32) -> Self {
        Self(hours * 3600 + minutes * 60 + seconds)
    }

    pub fn seconds(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, m, s) = (self.0 / 3600, self.0 / 60 % 60, self.0 % 60);
        write!(f, "{h:02}:{m:02}:{s:02}")
    }
}

/// Parses a GTFS clock time (`H:MM:SS` or `HH:MM:SS`, hours may be 24 or more).
pub fn parse_time(s: &str) -> Option<TimeOfDay> {
    let mut parts = s.trim().split(':');
    let hours = parts.next()?;
    let minutes = parts.next()?;
    let seconds = parts.next()?;
    if parts.next().is_some() || hours.is_empty() || minutes.len() != 2 || seconds.len() != 2 {
        return None;
    }

    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    let seconds: u32 = seconds.parse().ok()?;
    if minutes >= 60 || seconds >= 60 {
        return None;
    }

    let total = hours.checked_mul(3600)?.checked_add(minutes * 60 + seconds)?;
    Some(TimeOfDay(total))
}

pub fn parse_date_yyyymmdd(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y%m%d").ok()
}

/// A row of `calendar.txt`.
#[derive(Debug, Clone, Deserialize)]
pub struct Service {
    pub service_id: String,
    pub monday: u8,
    pub tuesday: u8,
    pub wednesday: u8,
    pub thursday: u8,
    pub friday: u8,
    pub saturday: u8,
    pub sunday: u8,
    pub start_date: String,
    pub end_date: String,
}

impl Service {
    /// Weekday flags, Monday first.
    pub fn days_run(&self) -> [bool; 7] {
        [
            self.monday,
            self.tuesday,
            self.wednesday,
            self.thursday,
            self.friday,
            self.saturday,
            self.sunday,
        ]
        .map(|d| d == 1)
    }
}

/// A row of `calendar_dates.txt`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceException {
    pub service_id: String,
    pub date: String,
    pub exception_type: u8,
}

/// A row of `trips.txt`.
#[derive(Debug, Clone, Deserialize)]
pub struct Trip {
    pub route_id: String,
    pub service_id: String,
    pub trip_id: String,
}

/// A row of `stop_times.txt`, as read. Times and sequence are left unparsed so
/// that failures can be reported with their row number.
#[derive(Debug, Clone, Deserialize)]
pub struct StopTime {
    pub trip_id: String,
    pub arrival_time: String,
    pub departure_time: String,
    pub stop_id: String,
    pub stop_sequence: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Agency {
    #[serde(default)]
    pub agency_name: String,
    pub agency_timezone: String,
}

/// Timezone of the first agency in the feed.
pub async fn read_agency_timezone<S: RowSource>(
    source: &S,
) -> Result<Option<String>, SourceError> {
    let mut agencies = source.rows::<Agency>("agency");
    let first = agencies.try_next().await?;
    Ok(first.map(|a| a.agency_timezone))
}
