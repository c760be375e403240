use std::{
    collections::HashSet,
    io::{BufWriter, Write},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sorted_connections::{
    Filters, Options, compute_sorted_connections,
    csa::DEFAULT_BATCH_SIZE,
    gtfs::{
        Trip, read_agency_timezone,
        source::{GtfsArchive, GtfsDirectory, RowSource},
        trips::read_trips,
    },
};

/// Prints the departure-sorted connections of a GTFS feed as JSON lines.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Feed directory or .zip archive.
    feed: PathBuf,

    /// IANA timezone of the feed's clock times. Defaults to the agency's.
    #[arg(long)]
    timezone: Option<String>,

    /// Only trips on this route (repeatable).
    #[arg(long = "route")]
    routes: Vec<String>,

    /// Only this service (repeatable).
    #[arg(long = "service")]
    services: Vec<String>,

    /// Only print connections departing at or after this Unix time.
    #[arg(long)]
    after: Option<i64>,

    #[arg(long)]
    limit: Option<usize>,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.feed.is_dir() {
        run(GtfsDirectory::new(&args.feed), args).await
    } else {
        run(GtfsArchive::new(&args.feed), args).await
    }
}

async fn run<S: RowSource>(source: S, args: Args) -> anyhow::Result<()> {
    let timezone = match args.timezone {
        Some(tz) => tz,
        None => match read_agency_timezone(&source).await? {
            Some(tz) => tz,
            None => bail!("no --timezone given and the feed has no agency timezone"),
        },
    };
    info!(feed = ?args.feed, %timezone, "computing sorted connections");

    let filters = filters(&source, args.routes, args.services).await?;
    let options = Options {
        timezone,
        batch_size: args.batch_size,
    };

    let now = std::time::Instant::now();
    let index = compute_sorted_connections(&source, &filters, &options)
        .await
        .with_context(|| format!("building connections for {:?}", args.feed))?;
    info!(connections = index.len(), elapsed = ?now.elapsed(), "done");

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let connections = index
        .connections_after(args.after.unwrap_or(i64::MIN))
        .take(args.limit.unwrap_or(usize::MAX));
    for c in connections {
        serde_json::to_writer(&mut out, c)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    Ok(())
}

/// Route and service selections drop trips; their stop_times rows have to be
/// dropped as well or they would not resolve, so the kept trips are read up
/// front.
async fn filters<S: RowSource>(
    source: &S,
    routes: Vec<String>,
    services: Vec<String>,
) -> anyhow::Result<Filters> {
    if routes.is_empty() && services.is_empty() {
        return Ok(Filters::new());
    }

    let routes: HashSet<String> = routes.into_iter().collect();
    let services: Arc<HashSet<String>> = Arc::new(services.into_iter().collect());
    let keep_trip = {
        let services = Arc::clone(&services);
        move |t: &Trip| {
            (routes.is_empty() || routes.contains(&t.route_id))
                && (services.is_empty() || services.contains(&t.service_id))
        }
    };

    let kept: HashSet<String> = read_trips(source, &keep_trip).await?.into_keys().collect();
    info!(trips = kept.len(), "selected trips");

    Ok(Filters::new()
        .with_service(move |s| services.is_empty() || services.contains(&s.service_id))
        .with_trip(keep_trip)
        .with_stopover(move |s| kept.contains(&s.trip_id)))
}
