use chrono_tz::Tz;
use tracing::{debug, info};

use crate::{
    csa::{
        Connection,
        connection_index::ConnectionIndex,
        stopovers::{Stopover, StopoversByTrip},
    },
    error::Error,
    gtfs::{calendar::Services, trips::TripRef},
    tz,
};

/// Expands every trip into its connections on every day it runs.
///
/// Trip groups are consumed one at a time and dropped once expanded.
pub fn expand_all(
    by_trip: StopoversByTrip,
    services: &Services,
    tz: &Tz,
) -> Result<ConnectionIndex, Error> {
    let mut index = ConnectionIndex::new();
    let mut degenerate = 0usize;

    for (trip_id, group) in by_trip {
        let days = services
            .get(&group.trip.service_id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let emitted = expand_trip(&group.trip, group.stopovers, days, tz, &mut index)?;
        if emitted == 0 && !days.is_empty() {
            debug!(trip_id = %trip_id, "trip has fewer than two stopovers");
            degenerate += 1;
        }
    }

    info!(
        connections = index.len(),
        degenerate_trips = degenerate,
        "expanded connections"
    );
    Ok(index)
}

/// Emits one connection per adjacent stopover pair per day in `days`, and
/// returns how many were emitted.
pub fn expand_trip(
    trip: &TripRef,
    mut stopovers: Vec<Stopover>,
    days: &[i64],
    tz: &Tz,
    index: &mut ConnectionIndex,
) -> Result<usize, Error> {
    stopovers.sort_by_key(|s| s.stop_sequence);

    let mut emitted = 0;
    for &day in days {
        let date = tz::local_date(tz, day).ok_or_else(|| out_of_range(trip, day))?;

        for pair in stopovers.windows(2) {
            let (from, to) = (&pair[0], &pair[1]);

            let departure =
                tz::resolve_on(tz, date, from.departure).ok_or_else(|| out_of_range(trip, day))?;
            let arrival =
                tz::resolve_on(tz, date, to.arrival).ok_or_else(|| out_of_range(trip, day))?;

            index.insert(Connection {
                from_stop: from.stop_id.clone(),
                to_stop: to.stop_id.clone(),
                departure,
                arrival,
                route_id: trip.route_id.clone(),
                service_id: trip.service_id.clone(),
            });
            emitted += 1;
        }
    }

    Ok(emitted)
}

fn out_of_range(trip: &TripRef, day: i64) -> Error {
    Error::Calendar {
        service_id: trip.service_id.clone(),
        detail: format!("day {day} is out of range"),
    }
}
