//! Departure-sorted connections for Connection Scan routing.
//!
//! Reads the trips, calendars and stop times of a GTFS feed and expands every
//! trip into the hops it makes on each day it runs, in absolute time.

pub mod csa;
pub mod error;
pub mod gtfs;
pub mod tz;

pub use csa::{Connection, ConnectionIndex, Filters, Options, compute_sorted_connections};
pub use error::{Error, SourceError};
