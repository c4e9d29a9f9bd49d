//! Streaming import of medical claims exports, plus the query and export
//! glue around the claims table.
//!
//! - Ingestion: the first worksheet of an `.xlsx` workbook, or a delimited
//!   export (optionally gzip/zstd, any charset), is read
//!   one row at a time, normalized into [`ClaimRecord`]s and written to a
//!   [`ClaimSink`] in fixed-size batches. Peak memory is one batch plus the
//!   few rows a decoder reads ahead, whatever the file size.
//! - Query: a language model turns a question into SQL, which runs against
//!   the managed database ([`query`], [`rest`]).
//! - Export: accumulated answers are written to a report ([`export`]).
//!
//! Data shape:
//! - `IngestSummary { inserted, batches, data_rows, skipped_rows, headers }`
//! - Rows: `Vec<CellValue>` aligned with the header row by position.
mod cell;
mod codec;
pub mod config;
pub mod export;
mod io;
pub mod llm;
mod loader;
mod mapper;
mod normalize;
pub mod query;
mod record;
pub mod rest;
mod rows;
mod sheet;
mod store;

pub use crate::cell::CellValue;
pub use crate::io::{build_reader, reader_from_path, SourceMeta};
pub use crate::loader::{ChunkedLoader, DEFAULT_BATCH_CAPACITY};
pub use crate::mapper::{
    coerce_date, coerce_decimal, coerce_text, date_from_serial, map_field, ClaimField, FieldKind,
    FieldValue,
};
pub use crate::normalize::{header_names, normalize_key, normalize_row};
pub use crate::record::ClaimRecord;
pub use crate::rows::csv_rows;
pub use crate::sheet::{is_workbook, xlsx_rows};
pub use crate::store::{ClaimSink, JsonLinesSink, StorageError};

use encoding_rs::Encoding;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::path::Path;
use thiserror::Error;

/// Result summary of one ingestion run.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub inserted: usize,
    pub batches: usize,
    pub data_rows: usize,
    pub skipped_rows: usize,
    pub headers: Vec<String>,
}

impl IngestSummary {
    /// `{"success": true, "count": N}`
    pub fn report(&self) -> Value {
        json!({ "success": true, "count": self.inserted })
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Records per bulk insert.
    pub batch_capacity: usize,
    /// Charset of delimited exports. Workbooks carry their own.
    pub charset: &'static Encoding,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            charset: encoding_rs::UTF_8,
        }
    }
}

impl IngestOptions {
    /// Set the export charset from a WHATWG label such as `windows-1252`.
    pub fn with_charset_label(mut self, label: &str) -> IngestResult<Self> {
        self.charset = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| IngestError::UnknownCharset(label.to_string()))?;
        Ok(self)
    }
}

/// The row stream could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Csv(#[from] csv_async::Error),
    #[error(transparent)]
    Xlsx(#[from] calamine::XlsxError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No file uploaded")]
    NoFile,
    #[error("failed to decode row stream ({committed} records already committed): {source}")]
    Parse {
        committed: usize,
        #[source]
        source: DecodeError,
    },
    #[error("batch {batch} write failed ({committed} records already committed): {source}")]
    StorageWrite {
        committed: usize,
        batch: usize,
        #[source]
        source: StorageError,
    },
    #[error("unknown charset {0:?}")]
    UnknownCharset(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Records persisted before the failure. Earlier batches are not rolled back.
    pub fn committed(&self) -> usize {
        match self {
            IngestError::Parse { committed, .. } | IngestError::StorageWrite { committed, .. } => {
                *committed
            }
            IngestError::NoFile | IngestError::UnknownCharset(_) | IngestError::Io(_) => 0,
        }
    }

    /// `{"error": msg, "count": committed}`
    pub fn report(&self) -> Value {
        json!({ "error": self.to_string(), "count": self.committed() })
    }
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Drive one ingestion run over a row stream.
///
/// Rows without a single non-empty cell are skipped. The first remaining row
/// is the header and is never loaded; every later one is normalized and
/// handed to the batch loader, and the partial batch is flushed when the
/// stream ends. The first decode or write error stops the run without
/// reading further rows; the error carries the count already committed.
pub async fn ingest_rows<St, S>(
    rows: St,
    sink: S,
    options: &IngestOptions,
) -> IngestResult<IngestSummary>
where
    St: Stream<Item = Result<Vec<CellValue>, DecodeError>>,
    S: ClaimSink,
{
    let mut rows = std::pin::pin!(rows);
    let mut loader = ChunkedLoader::new(sink, options.batch_capacity);
    let mut summary = IngestSummary::default();
    let mut headers: Option<Vec<String>> = None;

    while let Some(row) = rows.next().await {
        let cells = row.map_err(|source| IngestError::Parse {
            committed: loader.committed(),
            source,
        })?;

        if cells.iter().all(CellValue::is_empty) {
            summary.skipped_rows += 1;
            log::debug!("Skipping empty row after data row {}", summary.data_rows);
            continue;
        }

        if headers.is_none() {
            let names = header_names(&cells);
            log_unmapped(&names);
            headers = Some(names);
            continue;
        }

        summary.data_rows += 1;
        let record = normalize_row(headers.as_deref().unwrap_or_default(), &cells);
        loader.accept(record).await?;
    }

    summary.inserted = loader.flush().await?;
    summary.batches = loader.batches_written();
    summary.headers = headers.unwrap_or_default();
    log::info!("Upload complete. Total rows inserted: {}", summary.inserted);
    Ok(summary)
}

/// Ingest a local file into `sink`: the first worksheet of an `.xlsx`
/// workbook, otherwise a delimited export.
pub async fn ingest_path<S: ClaimSink>(
    path: &Path,
    sink: S,
    options: &IngestOptions,
) -> IngestResult<IngestSummary> {
    if is_workbook(path) {
        return ingest_rows(xlsx_rows(path).await?, sink, options).await;
    }
    let (reader, meta) = reader_from_path(path, options.charset).await?;
    ingest_rows(csv_rows(reader, meta.delimiter), sink, options).await
}

fn log_unmapped(headers: &[String]) {
    let unmapped: Vec<&str> = headers
        .iter()
        .filter(|h| !h.is_empty() && ClaimField::from_key(&normalize_key(h)).is_none())
        .map(String::as_str)
        .collect();
    if !unmapped.is_empty() {
        log::debug!("Columns kept only in raw_data: {unmapped:?}");
    }
}
