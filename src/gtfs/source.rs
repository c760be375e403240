//! Row sources: lazy, per-table streams of deserialized feed rows.
//!
//! CSV decoding runs on a blocking thread and hands rows over a bounded
//! channel, so a slow consumer holds the reader back instead of letting rows
//! pile up in memory. Dropping the stream stops the reader.

use std::{
    collections::HashMap,
    fs::File,
    io::{Cursor, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use zip::{ZipArchive, result::ZipError};

use crate::error::SourceError;

/// Rows buffered between the reader thread and the consumer.
const ROW_BUFFER: usize = 4096;

pub type RowStream<R> = BoxStream<'static, Result<R, SourceError>>;

/// Supplies the rows of a logical table (`stop_times`, `trips`, ...).
pub trait RowSource: Sync {
    fn rows<R>(&self, table: &str) -> RowStream<R>
    where
        R: DeserializeOwned + Send + 'static;
}

/// An unpacked feed: one `<table>.txt` per table in a directory.
#[derive(Debug, Clone)]
pub struct GtfsDirectory {
    root: PathBuf,
}

impl GtfsDirectory {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl RowSource for GtfsDirectory {
    fn rows<R>(&self, table: &str) -> RowStream<R>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let path = self.root.join(format!("{table}.txt"));
        let name = table.to_owned();
        stream_table(table, move |visit| {
            let mut file = File::open(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SourceError::MissingTable(name.clone()),
                _ => SourceError::Io {
                    table: name.clone(),
                    source: e,
                },
            })?;
            visit(&mut file);
            Ok(())
        })
    }
}

/// A zipped feed, read entry by entry without unpacking.
#[derive(Debug, Clone)]
pub struct GtfsArchive {
    path: PathBuf,
}

impl GtfsArchive {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl RowSource for GtfsArchive {
    fn rows<R>(&self, table: &str) -> RowStream<R>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let path = self.path.clone();
        let name = table.to_owned();
        stream_table(table, move |visit| {
            let file = File::open(&path).map_err(|e| SourceError::Io {
                table: name.clone(),
                source: e,
            })?;
            let mut archive = ZipArchive::new(file)?;

            // Some producers nest the feed in a folder inside the archive.
            let entry_name = archive
                .file_names()
                .find(|n| {
                    let n = n.to_ascii_lowercase();
                    n == format!("{name}.txt") || n.ends_with(&format!("/{name}.txt"))
                })
                .map(str::to_owned)
                .ok_or_else(|| SourceError::MissingTable(name.clone()))?;

            let mut entry = archive.by_name(&entry_name).map_err(|e| match e {
                ZipError::FileNotFound => SourceError::MissingTable(name.clone()),
                e => SourceError::Zip(e),
            })?;
            visit(&mut entry);
            Ok(())
        })
    }
}

/// Tables held in memory as CSV text.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: HashMap<String, Arc<str>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_table(mut self, table: &str, csv: &str) -> Self {
        self.tables.insert(table.to_owned(), Arc::from(csv));
        self
    }
}

impl RowSource for MemorySource {
    fn rows<R>(&self, table: &str) -> RowStream<R>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let contents = self.tables.get(table).cloned();
        let name = table.to_owned();
        stream_table(table, move |visit| {
            let contents = contents.ok_or_else(|| SourceError::MissingTable(name))?;
            visit(&mut Cursor::new(contents.as_bytes()));
            Ok(())
        })
    }
}

/// Runs `open` on a blocking thread. `open` locates the table and passes a
/// reader for it to `visit`, which decodes rows into the returned stream.
fn stream_table<R, F>(table: &str, open: F) -> RowStream<R>
where
    R: DeserializeOwned + Send + 'static,
    F: FnOnce(&mut dyn FnMut(&mut dyn Read)) -> Result<(), SourceError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(ROW_BUFFER);
    let table = table.to_owned();

    tokio::task::spawn_blocking(move || {
        let opened = open(&mut |reader: &mut dyn Read| pump_rows(&table, reader, &tx));
        if let Err(err) = opened {
            let _ = tx.blocking_send(Err(err));
        }
    });

    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|row| (row, rx)) }).boxed()
}

fn pump_rows<R: DeserializeOwned>(
    table: &str,
    reader: &mut dyn Read,
    tx: &mpsc::Sender<Result<R, SourceError>>,
) {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    for row in reader.deserialize::<R>() {
        let row = row.map_err(|source| SourceError::Csv {
            table: table.to_owned(),
            source,
        });
        let failed = row.is_err();
        // Receiver gone: the consumer gave up on this table.
        if tx.blocking_send(row).is_err() || failed {
            return;
        }
    }
}
