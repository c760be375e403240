//! Local-to-absolute time resolution.
//!
//! Time-of-day offsets are wall-clock offsets: 27:30 on a service day is
//! 03:30 local time on the next day, whatever happened to the UTC offset in
//! between.

use chrono::{
    DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone,
};
use chrono_tz::Tz;

use crate::gtfs::TimeOfDay;

/// Maps a local date-time to an instant.
///
/// In an autumn fold the earlier instant wins. A spring gap is read with the
/// offset in effect before it, so 02:30 in a one-hour gap becomes 03:30.
pub fn resolve_local(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => {
            let before = tz
                .from_local_datetime(&(local - TimeDelta::days(1)))
                .earliest()?;
            let offset = before.offset().fix().local_minus_utc();
            let utc = local - TimeDelta::seconds(offset.into());
            Some(tz.from_utc_datetime(&utc))
        }
    }
}

/// Unix seconds of local midnight starting `date`.
pub fn day_epoch(tz: &Tz, date: NaiveDate) -> Option<i64> {
    resolve_local(tz, date.and_time(NaiveTime::MIN)).map(|dt| dt.timestamp())
}

/// The local calendar date an epoch falls on.
pub fn local_date(tz: &Tz, epoch: i64) -> Option<NaiveDate> {
    tz.timestamp_opt(epoch, 0).single().map(|dt| dt.date_naive())
}

/// Absolute Unix seconds of `time` on the service day containing `day`.
pub fn resolve(tz: &Tz, day: i64, time: TimeOfDay) -> Option<i64> {
    resolve_on(tz, local_date(tz, day)?, time)
}

/// Absolute Unix seconds of `time` on the local service date `date`.
pub fn resolve_on(tz: &Tz, date: NaiveDate, time: TimeOfDay) -> Option<i64> {
    let local = date
        .and_time(NaiveTime::MIN)
        .checked_add_signed(TimeDelta::seconds(time.seconds().into()))?;
    resolve_local(tz, local).map(|dt| dt.timestamp())
}
