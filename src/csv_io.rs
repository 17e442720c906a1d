//! CSV input and output for place records.

use crate::utils::{strip_bom, timestamped_output_path};
use crate::{ItemResult, Place, RatedPlace, ResultSink, ScrapeError};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use futures::stream::{self, Stream};
use std::fs::{File, OpenOptions};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Reads the input file and yields its rows in file order.
///
/// The file is read into memory up front; only row decoding is lazy, so a
/// malformed row fails as an item of the returned stream after the rows
/// before it. Fields are trimmed and a UTF-8 BOM is ignored. A missing file
/// fails here.
pub async fn read_places(
    path: impl AsRef<Path>,
) -> Result<impl Stream<Item = Result<Place, ScrapeError>> + Send + 'static, ScrapeError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        ScrapeError::InputError(format!("cannot read {}: {}", path.display(), e))
    })?;
    info!("Reading places from {}", path.display());

    Ok(parse_places(strip_bom(&bytes).to_vec()))
}

/// Same as [`read_places`] over an in-memory buffer.
pub fn parse_places(
    bytes: Vec<u8>,
) -> impl Stream<Item = Result<Place, ScrapeError>> + Send + 'static {
    let rows = ReaderBuilder::new()
        .delimiter(b',')
        .trim(Trim::All)
        .from_reader(Cursor::new(bytes))
        .into_deserialize::<Place>()
        .map(|row| {
            row.map_err(|e| {
                let line = e
                    .position()
                    .map(|pos| pos.line().to_string())
                    .unwrap_or_else(|| "?".to_string());
                ScrapeError::InputError(format!("malformed row at line {line}: {e}"))
            })
        });

    stream::iter(rows)
}

/// Appends one row per result to a CSV file, writing the header once.
pub struct CsvResultSink {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl CsvResultSink {
    /// Opens `path` for appending, creating it and its directory if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ScrapeError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                ScrapeError::OutputError(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                ScrapeError::OutputError(format!("cannot open {}: {}", path.display(), e))
            })?;
        let has_rows = file.metadata().map(|meta| meta.len() > 0).unwrap_or(false);

        let writer = WriterBuilder::new()
            .has_headers(!has_rows)
            .from_writer(file);

        debug!(path = %path.display(), "result file opened");
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    /// Opens a new `Places-<timestamp>.csv` inside `dir`.
    pub fn create_in<Tz>(dir: &Path, started_at: &DateTime<Tz>) -> Result<Self, ScrapeError>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        Self::open(timestamped_output_path(dir, started_at))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }

    fn write_row(&mut self, row: &RatedPlace) -> Result<(), ScrapeError> {
        self.writer.serialize(row)?;
        // Rows already written survive a crash later in the run.
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }
}

#[async_trait]
impl ResultSink<Place, String> for CsvResultSink {
    async fn consume(&mut self, result: ItemResult<Place, String>) -> Result<(), ScrapeError> {
        self.write_row(&RatedPlace::from(result))
    }

    async fn finish(&mut self) -> Result<(), ScrapeError> {
        self.writer.flush()?;
        info!(
            rows = self.rows,
            "Results written to {}",
            self.path.display()
        );
        Ok(())
    }
}
