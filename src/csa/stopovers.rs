//! Validation and per-trip grouping of `stop_times` rows.

use std::collections::HashMap;

use futures::StreamExt;
use tracing::{debug, info};

use crate::{
    error::{Error, Reference},
    gtfs::{
        StopTime, TimeOfDay,
        calendar::Services,
        parse_time,
        source::RowStream,
        trips::TripRef,
    },
};

/// One stop event of a trip, parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stopover {
    pub stop_id: String,
    pub stop_sequence: u32,
    pub arrival: TimeOfDay,
    pub departure: TimeOfDay,
}

/// The stopovers of one trip in source order, with the trip's resolved
/// service and route.
#[derive(Clone, Debug)]
pub struct TripStopovers {
    pub trip: TripRef,
    pub stopovers: Vec<Stopover>,
}

pub type StopoversByTrip = HashMap<String, TripStopovers>;

/// Validates `stop_times` rows against the trip and service tables and groups
/// them by trip.
///
/// Rows are numbered from 1 in the order they are pushed, including rows the
/// filter rejects.
pub struct StopoverGrouper<'a> {
    trips: &'a HashMap<String, TripRef>,
    services: &'a Services,
    filter: &'a (dyn Fn(&StopTime) -> bool + Send + Sync),
    row: u64,
    kept: u64,
    by_trip: StopoversByTrip,
}

impl<'a> StopoverGrouper<'a> {
    pub fn new(
        trips: &'a HashMap<String, TripRef>,
        services: &'a Services,
        filter: &'a (dyn Fn(&StopTime) -> bool + Send + Sync),
    ) -> Self {
        Self {
            trips,
            services,
            filter,
            row: 0,
            kept: 0,
            by_trip: HashMap::new(),
        }
    }

    pub fn push(&mut self, stop_time: StopTime) -> Result<(), Error> {
        self.row += 1;
        let row = self.row;

        if !(self.filter)(&stop_time) {
            return Ok(());
        }

        let trips = self.trips;
        let Some(trip) = trips.get(&stop_time.trip_id) else {
            return Err(Error::UnresolvedReference {
                row,
                reference: Reference::Trip(stop_time.trip_id),
            });
        };
        if !self.services.contains_key(&trip.service_id) {
            return Err(Error::UnresolvedReference {
                row,
                reference: Reference::Service(trip.service_id.clone()),
            });
        }

        let stop_sequence = stop_time
            .stop_sequence
            .trim()
            .parse::<u32>()
            .map_err(|_| malformed(row, "stop_sequence", &stop_time.stop_sequence))?;
        let arrival = parse_time(&stop_time.arrival_time)
            .ok_or_else(|| malformed(row, "arrival_time", &stop_time.arrival_time))?;
        let departure = parse_time(&stop_time.departure_time)
            .ok_or_else(|| malformed(row, "departure_time", &stop_time.departure_time))?;

        let stopover = Stopover {
            stop_id: stop_time.stop_id,
            stop_sequence,
            arrival,
            departure,
        };
        self.by_trip
            .entry(stop_time.trip_id)
            .or_insert_with(|| TripStopovers {
                trip: trip.clone(),
                stopovers: vec![],
            })
            .stopovers
            .push(stopover);
        self.kept += 1;

        Ok(())
    }

    /// Same as pushing each row in turn; stops at the first failing row.
    pub fn push_batch(&mut self, stop_times: Vec<StopTime>) -> Result<(), Error> {
        stop_times.into_iter().try_for_each(|s| self.push(s))
    }

    /// Rows seen so far, kept or not.
    pub fn rows(&self) -> u64 {
        self.row
    }

    pub fn finish(self) -> StopoversByTrip {
        info!(
            rows = self.row,
            stopovers = self.kept,
            trips = self.by_trip.len(),
            "grouped stopovers"
        );
        self.by_trip
    }
}

fn malformed(row: u64, field: &'static str, value: &str) -> Error {
    Error::MalformedField {
        row,
        field,
        value: value.to_owned(),
    }
}

/// Drains a `stop_times` stream into `grouper`, taking up to `batch_size`
/// rows that are already available at a time.
///
/// The next batch is only requested once the previous one is grouped. The
/// first failure, whether a bad row or an upstream error, ends the stream.
pub async fn group_stopovers(
    rows: RowStream<StopTime>,
    mut grouper: StopoverGrouper<'_>,
    batch_size: usize,
) -> Result<StopoversByTrip, Error> {
    let mut batches = rows.ready_chunks(batch_size);

    while let Some(batch) = batches.next().await {
        let mut stop_times = Vec::with_capacity(batch.len());
        let mut upstream = None;
        for row in batch {
            match row {
                Ok(stop_time) => stop_times.push(stop_time),
                Err(err) => {
                    upstream = Some(err);
                    break;
                }
            }
        }

        grouper.push_batch(stop_times)?;
        if let Some(err) = upstream {
            debug!(after_row = grouper.rows(), "stop_times stream failed");
            return Err(err.into());
        }
    }

    Ok(grouper.finish())
}
