use std::collections::HashMap;

use futures::TryStreamExt;
use tracing::info;

use crate::{
    error::SourceError,
    gtfs::{Trip, source::RowSource},
};

/// The parts of a trip connections need. Everything else in `trips.txt` is
/// dropped while reading, large feeds have millions of trips.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TripRef {
    pub service_id: String,
    pub route_id: String,
}

pub async fn read_trips<S: RowSource>(
    source: &S,
    filter: &(dyn Fn(&Trip) -> bool + Send + Sync),
) -> Result<HashMap<String, TripRef>, SourceError> {
    let trips: HashMap<String, TripRef> = source
        .rows::<Trip>("trips")
        .try_filter(|t| futures::future::ready(filter(t)))
        .map_ok(|t| {
            let trip = TripRef {
                service_id: t.service_id,
                route_id: t.route_id,
            };
            (t.trip_id, trip)
        })
        .try_collect()
        .await?;

    info!(trips = trips.len(), "read trips");
    Ok(trips)
}
