//! Row source for native workbooks: the first worksheet of an `.xlsx`,
//! read cell by cell in document order.
//!
//! The zip/XML reader is synchronous, so it runs on a blocking thread and
//! hands finished rows over a bounded channel. At most
//! [`ROW_CHANNEL_DEPTH`] rows are decoded ahead of the driver; when the
//! driver stops early the reader notices the closed channel and returns.

use crate::cell::CellValue;
use crate::mapper::{date_from_serial, parse_date_string};
use crate::{DecodeError, IngestError, IngestResult};
use calamine::{open_workbook, DataRef, Reader, Xlsx};
use futures::{stream, Stream};
use std::path::Path;
use tokio::sync::mpsc;

pub const ROW_CHANNEL_DEPTH: usize = 64;

type RowSender = mpsc::Sender<Result<Vec<CellValue>, DecodeError>>;

pub fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"))
}

/// Stream the rows of the first worksheet. Cells are placed at their column
/// index, so gaps before a populated cell are `Empty`.
pub async fn xlsx_rows(
    path: &Path,
) -> IngestResult<impl Stream<Item = Result<Vec<CellValue>, DecodeError>>> {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(IngestError::NoFile),
        Err(e) => return Err(e.into()),
    };
    log::info!(
        "Processing workbook: {}, Size: {:.2} MB",
        path.display(),
        size as f64 / (1024.0 * 1024.0)
    );

    let (tx, rx) = mpsc::channel(ROW_CHANNEL_DEPTH);
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = read_first_sheet(&path, &tx) {
            // the driver may already be gone
            let _ = tx.blocking_send(Err(e));
        }
    });

    Ok(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|row| (row, rx))
    }))
}

fn read_first_sheet(path: &Path, tx: &RowSender) -> Result<(), DecodeError> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let Some(name) = workbook.sheet_names().first().cloned() else {
        log::warn!("workbook has no worksheets");
        return Ok(());
    };
    log::debug!("Reading worksheet {name:?}");

    let mut cells = workbook.worksheet_cells_reader(&name)?;
    let mut current: Option<u32> = None;
    let mut row: Vec<CellValue> = Vec::new();
    while let Some(cell) = cells.next_cell()? {
        let (row_idx, col_idx) = cell.get_position();
        if current != Some(row_idx) {
            if current.is_some() && tx.blocking_send(Ok(std::mem::take(&mut row))).is_err() {
                return Ok(());
            }
            current = Some(row_idx);
        }
        let col = col_idx as usize;
        if row.len() <= col {
            row.resize(col + 1, CellValue::Empty);
        }
        row[col] = cell_value(cell.get_value());
    }
    if current.is_some() {
        let _ = tx.blocking_send(Ok(row));
    }
    Ok(())
}

fn cell_value(value: &DataRef<'_>) -> CellValue {
    match value {
        DataRef::Empty => CellValue::Empty,
        DataRef::String(s) => CellValue::from_text(s),
        DataRef::SharedString(s) => CellValue::from_text(s),
        DataRef::Int(i) => CellValue::Number(*i as f64),
        DataRef::Float(f) => CellValue::Number(*f),
        DataRef::Bool(b) => CellValue::Bool(*b),
        DataRef::DateTime(dt) if dt.is_datetime() => {
            date_from_serial(dt.as_f64()).map_or(CellValue::Number(dt.as_f64()), CellValue::Date)
        }
        DataRef::DateTime(dt) => CellValue::Number(dt.as_f64()),
        DataRef::DateTimeIso(s) => {
            parse_date_string(s).map_or_else(|| CellValue::from_text(s), CellValue::Date)
        }
        DataRef::DurationIso(s) => CellValue::from_text(s),
        DataRef::Error(e) => CellValue::Text(e.to_string()),
    }
}
