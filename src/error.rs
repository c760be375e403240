//! Error types.
//!
//! Every error is fatal to a build: nothing is retried and no partial index is
//! handed back.

use std::fmt;

/// Failures reported by a [`RowSource`](crate::gtfs::source::RowSource).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The feed has no file for this table.
    #[error("missing table {0}")]
    MissingTable(String),

    #[error("reading table {table}: {source}")]
    Io {
        table: String,
        #[source]
        source: std::io::Error,
    },

    #[error("opening feed archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A row could not be decoded into the requested record type.
    #[error("decoding table {table}: {source}")]
    Csv {
        table: String,
        #[source]
        source: csv::Error,
    },
}

impl SourceError {
    pub fn is_missing_table(&self) -> bool {
        matches!(self, SourceError::MissingTable(_))
    }
}

/// An identifier a stopover row pointed at that does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Trip(String),
    Service(String),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Trip(id) => write!(f, "unknown trip {id}"),
            Reference::Service(id) => write!(f, "unknown service {id}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid options, detected before any row is read.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("{reference} (row {row})")]
    UnresolvedReference { row: u64, reference: Reference },

    #[error("malformed {field} {value:?} (row {row})")]
    MalformedField {
        row: u64,
        field: &'static str,
        value: String,
    },

    #[error("service {service_id}: {detail}")]
    Calendar { service_id: String, detail: String },

    #[error(transparent)]
    Source(#[from] SourceError),
}

impl Error {
    /// The 1-based stop_times row the error was raised for, if any.
    pub fn row(&self) -> Option<u64> {
        match self {
            Error::UnresolvedReference { row, .. } | Error::MalformedField { row, .. } => {
                Some(*row)
            }
            _ => None,
        }
    }
}
