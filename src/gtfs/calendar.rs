use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{Datelike, NaiveDate};
use chrono_tz::Tz;
use futures::TryStreamExt;
use tracing::{debug, info};

use crate::{
    error::{Error, SourceError},
    gtfs::{
        Service, ServiceException, parse_date_yyyymmdd,
        source::{RowSource, RowStream},
    },
    tz,
};

/// Service id → day epochs (Unix seconds at local midnight), ascending.
pub type Services = HashMap<String, Vec<i64>>;

const ADDED: u8 = 1;
const REMOVED: u8 = 2;

/// Computes the days every service runs on from `calendar` and
/// `calendar_dates`.
///
/// Either table may be absent. Services known only from `calendar_dates` are
/// not subject to `filter`, which sees calendar rows; exceptions for services
/// it rejected are dropped.
pub async fn read_services_and_exceptions<S: RowSource>(
    source: &S,
    tz: &Tz,
    filter: &(dyn Fn(&Service) -> bool + Send + Sync),
) -> Result<Services, Error> {
    let mut dates: HashMap<String, BTreeSet<NaiveDate>> = HashMap::new();
    let mut rejected = HashSet::new();

    let mut calendar = source.rows::<Service>("calendar");
    while let Some(service) = next_optional(&mut calendar).await? {
        if !filter(&service) {
            rejected.insert(service.service_id);
            continue;
        }

        let start = parse_date(&service.service_id, "start_date", &service.start_date)?;
        let end = parse_date(&service.service_id, "end_date", &service.end_date)?;
        if end < start {
            return Err(calendar_error(
                &service.service_id,
                format!("end_date {end} before start_date {start}"),
            ));
        }

        let days_run = service.days_run();
        let days = dates.entry(service.service_id).or_default();
        days.extend(
            start
                .iter_days()
                .take_while(|d| *d <= end)
                .filter(|d| days_run[d.weekday().days_since(chrono::Weekday::Mon) as usize]),
        );
    }

    let mut exceptions = source.rows::<ServiceException>("calendar_dates");
    let mut applied = 0usize;
    while let Some(exception) = next_optional(&mut exceptions).await? {
        if rejected.contains(&exception.service_id) {
            continue;
        }

        let date = parse_date(&exception.service_id, "date", &exception.date)?;
        let days = dates.entry(exception.service_id.clone()).or_default();
        match exception.exception_type {
            ADDED => days.insert(date),
            REMOVED => days.remove(&date),
            other => {
                return Err(calendar_error(
                    &exception.service_id,
                    format!("unknown exception_type {other}"),
                ));
            }
        };
        applied += 1;
    }
    debug!(applied, rejected = rejected.len(), "applied service exceptions");

    let services = dates
        .into_iter()
        .map(|(id, days)| -> Result<(String, Vec<i64>), Error> {
            let epochs = days
                .into_iter()
                .map(|d| {
                    tz::day_epoch(tz, d)
                        .ok_or_else(|| calendar_error(&id, format!("{d} has no local midnight")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((id, epochs))
        })
        .collect::<Result<Services, _>>()?;

    info!(services = services.len(), "read services");
    Ok(services)
}

/// Like `try_next`, but a table the feed does not have reads as empty.
async fn next_optional<R>(rows: &mut RowStream<R>) -> Result<Option<R>, SourceError> {
    match rows.try_next().await {
        Err(err) if err.is_missing_table() => Ok(None),
        other => other,
    }
}

fn parse_date(service_id: &str, field: &str, value: &str) -> Result<NaiveDate, Error> {
    parse_date_yyyymmdd(value)
        .ok_or_else(|| calendar_error(service_id, format!("bad {field} {value:?}")))
}

fn calendar_error(service_id: &str, detail: String) -> Error {
    Error::Calendar {
        service_id: service_id.to_owned(),
        detail,
    }
}
