use chrono_tz::Tz;
use futures::TryFutureExt;
use serde::Serialize;
use tracing::info;

use crate::{
    error::Error,
    gtfs::{
        self, StopTime, Trip, calendar::read_services_and_exceptions, source::RowSource,
        trips::read_trips,
    },
};

pub use connection_index::ConnectionIndex;

pub mod connection_index;
pub mod expand;
pub mod stopovers;

pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// One hop between consecutive stops of a trip on one service day. Instants
/// are Unix seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub from_stop: String,
    pub to_stop: String,
    pub departure: i64,
    pub arrival: i64,
    pub route_id: String,
    pub service_id: String,
}

pub type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Which services, trips and stop_times rows take part. Everything is
/// accepted by default.
pub struct Filters {
    pub service: Predicate<gtfs::Service>,
    pub trip: Predicate<Trip>,
    pub stopover: Predicate<StopTime>,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            service: Box::new(|_: &gtfs::Service| true),
            trip: Box::new(|_: &Trip| true),
            stopover: Box::new(|_: &StopTime| true),
        }
    }
}

impl Filters {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_service<F>(mut self, f: F) -> Self
    where
        F: Fn(&gtfs::Service) -> bool + Send + Sync + 'static,
    {
        self.service = Box::new(f);
        self
    }

    pub fn with_trip<F>(mut self, f: F) -> Self
    where
        F: Fn(&Trip) -> bool + Send + Sync + 'static,
    {
        self.trip = Box::new(f);
        self
    }

    pub fn with_stopover<F>(mut self, f: F) -> Self
    where
        F: Fn(&StopTime) -> bool + Send + Sync + 'static,
    {
        self.stopover = Box::new(f);
        self
    }
}

#[derive(Clone, Debug)]
pub struct Options {
    /// IANA zone the feed's clock times are in.
    pub timezone: String,
    /// Most stop_times rows grouped per step.
    pub batch_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timezone: "Etc/UTC".to_owned(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Options {
    pub fn new(timezone: impl Into<String>) -> Self {
        Self {
            timezone: timezone.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<Tz, Error> {
        if self.batch_size == 0 {
            return Err(Error::Configuration("batch size must be at least 1".into()));
        }
        self.timezone
            .parse::<Tz>()
            .map_err(|_| Error::Configuration(format!("unknown timezone {:?}", self.timezone)))
    }
}

/// Builds the departure-sorted connections of a feed.
///
/// Services and trips are read concurrently, then `stop_times` is streamed and
/// grouped by trip, then every trip is expanded over its service days. Any
/// failure aborts the whole build.
pub async fn compute_sorted_connections<S: RowSource>(
    source: &S,
    filters: &Filters,
    options: &Options,
) -> Result<ConnectionIndex, Error> {
    let tz = options.validate()?;

    let (services, trips) = tokio::try_join!(
        read_services_and_exceptions(source, &tz, &*filters.service),
        read_trips(source, &*filters.trip).map_err(Error::from),
    )?;

    let grouper = stopovers::StopoverGrouper::new(&trips, &services, &*filters.stopover);
    let by_trip =
        stopovers::group_stopovers(source.rows("stop_times"), grouper, options.batch_size).await?;

    let index = expand::expand_all(by_trip, &services, &tz)?;
    info!(
        connections = index.len(),
        timezone = %tz,
        "built connection index"
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{Reference, SourceError},
        gtfs::source::MemorySource,
        tz,
    };
    use chrono::NaiveDate;
    use chrono_tz::Europe::Berlin;
    use proptest::prelude::*;
    use std::collections::HashMap;

    const CALENDAR_HEADER: &str =
        "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n";

    fn feed(calendar: &str, trips: &str, stop_times: &str) -> MemorySource {
        MemorySource::new()
            .with_table("calendar", &format!("{CALENDAR_HEADER}{calendar}"))
            .with_table("trips", &format!("route_id,service_id,trip_id\n{trips}"))
            .with_table(
                "stop_times",
                &format!("trip_id,arrival_time,departure_time,stop_id,stop_sequence\n{stop_times}"),
            )
    }

    fn example_feed() -> MemorySource {
        feed(
            "S1,1,0,0,0,0,0,0,20240506,20240506\n",
            "R1,S1,T1\n",
            "T1,08:00:00,08:00:00,A,1\n\
             T1,08:10:00,08:10:00,B,2\n\
             T1,08:20:00,08:20:00,C,3\n",
        )
    }

    fn berlin() -> Options {
        Options::new("Europe/Berlin")
    }

    fn epoch(date: NaiveDate) -> i64 {
        tz::day_epoch(&Berlin, date).unwrap()
    }

    #[tokio::test]
    async fn single_trip_single_day() {
        let index = compute_sorted_connections(&example_feed(), &Filters::new(), &berlin())
            .await
            .unwrap();

        let e = epoch(NaiveDate::from_ymd_opt(2024, 5, 6).unwrap());
        let at = |h: i64, m: i64| e + h * 3600 + m * 60;
        let connection = |from: &str, to: &str, dep: i64, arr: i64| Connection {
            from_stop: from.into(),
            to_stop: to.into(),
            departure: dep,
            arrival: arr,
            route_id: "R1".into(),
            service_id: "S1".into(),
        };

        assert_eq!(
            index.into_vec(),
            vec![
                connection("A", "B", at(8, 0), at(8, 10)),
                connection("B", "C", at(8, 10), at(8, 20)),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_trip_fails_at_row_one() {
        let source = feed(
            "S1,1,1,1,1,1,1,1,20240506,20240512\n",
            "R1,S1,T1\n",
            "GHOST,08:00:00,08:00:00,A,1\n",
        );
        let err = compute_sorted_connections(&source, &Filters::new(), &berlin())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "unknown trip GHOST (row 1)");
        assert!(matches!(
            err,
            Error::UnresolvedReference { row: 1, reference: Reference::Trip(ref id) } if id == "GHOST"
        ));
    }

    #[tokio::test]
    async fn trip_with_unknown_service_fails() {
        let source = feed(
            "S1,1,1,1,1,1,1,1,20240506,20240512\n",
            "R1,S2,T1\n",
            "T1,08:00:00,08:00:00,A,1\n",
        );
        let err = compute_sorted_connections(&source, &Filters::new(), &berlin())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown service S2 (row 1)");
    }

    #[tokio::test]
    async fn configuration_errors_come_before_reading() {
        // No tables at all: a read would fail with a missing table instead.
        let source = MemorySource::new();

        let err = compute_sorted_connections(&source, &Filters::new(), &Options::new("Mars/Olympus"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let options = Options {
            batch_size: 0,
            ..berlin()
        };
        let err = compute_sorted_connections(&source, &Filters::new(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn upstream_failures_propagate() {
        let source = MemorySource::new()
            .with_table("calendar", CALENDAR_HEADER)
            .with_table("stop_times", "trip_id\n");
        let err = compute_sorted_connections(&source, &Filters::new(), &berlin())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Source(SourceError::MissingTable(ref t)) if t == "trips"));

        let source = feed("", "R1,S1,T1\n", "").with_table("stop_times", "nope\n1\n");
        let err = compute_sorted_connections(&source, &Filters::new(), &berlin())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Source(SourceError::Csv { .. })));
    }

    #[tokio::test]
    async fn filters_narrow_the_index() {
        let source = feed(
            "S1,1,1,1,1,1,1,1,20240506,20240507\n\
             S2,1,1,1,1,1,1,1,20240506,20240507\n",
            "R1,S1,T1\nR2,S1,T2\nR1,S2,T3\n",
            "T1,08:00:00,08:00:00,A,1\nT1,08:10:00,08:10:00,B,2\nT1,08:20:00,08:20:00,C,3\n\
             T2,09:00:00,09:00:00,A,1\nT2,09:10:00,09:10:00,B,2\n\
             T3,10:00:00,10:00:00,A,1\nT3,10:10:00,10:10:00,B,2\n",
        );

        let all = compute_sorted_connections(&source, &Filters::new(), &berlin())
            .await
            .unwrap();
        assert_eq!(all.len(), (2 + 1 + 1) * 2);

        // Rows of trips dropped by the other filters must be dropped too,
        // or they fail to resolve.
        let filters = Filters::new()
            .with_service(|s| s.service_id != "S2")
            .with_trip(|t| t.route_id == "R1")
            .with_stopover(|s| s.trip_id == "T1" && s.stop_id != "C");
        let some = compute_sorted_connections(&source, &filters, &berlin())
            .await
            .unwrap();
        // T1 without C, on two days.
        assert_eq!(some.len(), 2);
        assert!(some.iter().all(|c| c.from_stop == "A" && c.to_stop == "B"));
    }

    #[tokio::test]
    async fn stopovers_of_filtered_trips_are_unresolved() {
        let source = feed(
            "S1,1,1,1,1,1,1,1,20240506,20240507\n",
            "R1,S1,T1\nR2,S1,T2\n",
            "T1,08:00:00,08:00:00,A,1\nT2,09:00:00,09:00:00,A,1\n",
        );
        let filters = Filters::new().with_trip(|t| t.route_id == "R1");
        let err = compute_sorted_connections(&source, &filters, &berlin())
            .await
            .unwrap_err();
        assert_eq!(err.row(), Some(2));
    }

    #[tokio::test]
    async fn spring_forward_shortens_overnight_hop() {
        // Europe/Berlin springs forward in the night to 2024-03-31.
        let source = MemorySource::new()
            .with_table(
                "calendar_dates",
                "service_id,date,exception_type\nS1,20240323,1\nS1,20240330,1\n",
            )
            .with_table("trips", "route_id,service_id,trip_id\nR1,S1,NIGHT\n")
            .with_table(
                "stop_times",
                "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
                 NIGHT,23:30:00,23:30:00,A,1\n\
                 NIGHT,27:30:00,27:30:00,B,2\n",
            );
        let index = compute_sorted_connections(&source, &Filters::new(), &berlin())
            .await
            .unwrap();

        let durations: Vec<_> = index.iter().map(|c| c.arrival - c.departure).collect();
        assert_eq!(durations, vec![4 * 3600, 3 * 3600]);
        assert_eq!(durations[0] - durations[1], 3600);
    }

    fn hhmmss(seconds: u32) -> String {
        format!("{:02}:{:02}:{:02}", seconds / 3600, seconds / 60 % 60, seconds % 60)
    }

    /// `(stopovers per trip, weekday mask per trip)`; stop times are spread
    /// over the day in shuffled sequence order.
    fn arb_feed() -> impl Strategy<Value = Vec<(Vec<(u32, u32)>, u8)>> {
        prop::collection::vec(
            (
                prop::collection::vec((0u32..30 * 3600, 1u32..1000), 0..6),
                0u8..128,
            ),
            1..6,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn sorted_counted_and_attributed(trips in arb_feed(), batch_size in 1usize..8) {
            let mut calendar = String::new();
            let mut trip_rows = String::new();
            let mut stop_times = String::new();
            let mut expected: HashMap<String, usize> = HashMap::new();

            for (i, (stops, mask)) in trips.iter().enumerate() {
                let mask = *mask;
                let flags: Vec<_> = (0..7).map(|d| ((mask >> d) & 1).to_string()).collect();
                calendar.push_str(&format!("S{i},{},20240506,20240519\n", flags.join(",")));
                trip_rows.push_str(&format!("R{i},S{i},T{i}\n"));

                let mut sequences: Vec<u32> = stops.iter().map(|s| s.1).collect();
                sequences.sort();
                sequences.dedup();
                for (k, seq) in sequences.iter().enumerate() {
                    let t = hhmmss(stops[k].0);
                    stop_times.push_str(&format!("T{i},{t},{t},P{seq},{seq}\n"));
                }

                // Two weeks of the weekday mask.
                let days = 2 * mask.count_ones() as usize;
                expected.insert(format!("R{i}"), sequences.len().saturating_sub(1) * days);
            }

            let source = feed(&calendar, &trip_rows, &stop_times);
            let options = Options { batch_size, ..berlin() };
            let rt = tokio::runtime::Runtime::new().unwrap();
            let index = rt
                .block_on(compute_sorted_connections(&source, &Filters::new(), &options))
                .unwrap();

            let departures: Vec<i64> = index.iter().map(|c| c.departure).collect();
            prop_assert!(departures.windows(2).all(|w| w[0] <= w[1]));

            let mut counted: HashMap<String, usize> = HashMap::new();
            for c in &index {
                let i = &c.route_id[1..];
                prop_assert_eq!(&c.service_id[1..], i);
                *counted.entry(c.route_id.clone()).or_default() += 1;
            }
            for (route, n) in expected {
                prop_assert_eq!(counted.get(&route).copied().unwrap_or(0), n);
            }
        }
    }
}
