//! Report export of answered queries: an `.xlsx` workbook with one
//! worksheet per answer, or the same blocks stacked in a single CSV.

use crate::query::{HistoryEntry, QueryHistory};
use chrono::NaiveDate;
use csv_async::{AsyncWriter, AsyncWriterBuilder};
use rust_xlsxwriter::{Color, Format, Workbook, Worksheet};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncWrite;

const ACCENT: Color = Color::RGB(0x4F46E5);
const SHEET_NAME_MAX: usize = 31;
const QUESTION_PREFIX_CHARS: usize = 20;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no query results to export")]
    EmptyHistory,
    #[error(transparent)]
    Csv(#[from] csv_async::Error),
    #[error(transparent)]
    Workbook(#[from] rust_xlsxwriter::XlsxError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn default_report_name(date: NaiveDate) -> String {
    format!("claims_analysis_report_{}.xlsx", date.format("%Y-%m-%d"))
}

/// Write every entry, newest first, as a block of labelled rows followed by
/// its result table. Blocks are separated by a blank row.
pub async fn export_history<W>(history: &QueryHistory, writer: W) -> Result<usize, ExportError>
where
    W: AsyncWrite + Unpin + Send,
{
    if history.is_empty() {
        return Err(ExportError::EmptyHistory);
    }
    let mut out = AsyncWriterBuilder::new()
        .flexible(true)
        .create_writer(writer);
    for (idx, entry) in history.entries().iter().enumerate() {
        if idx > 0 {
            out.write_record(&[""]).await?;
        }
        write_entry(&mut out, entry).await?;
    }
    out.flush().await?;
    Ok(history.len())
}

/// One worksheet per entry, newest first, named `<n>_<question start>`.
pub fn export_workbook(history: &QueryHistory) -> Result<Vec<u8>, ExportError> {
    if history.is_empty() {
        return Err(ExportError::EmptyHistory);
    }
    let mut workbook = Workbook::new();
    for (idx, entry) in history.entries().iter().enumerate() {
        let sheet = workbook.add_worksheet();
        sheet.set_name(sheet_name(idx, &entry.question))?;
        write_sheet(sheet, entry)?;
    }
    Ok(workbook.save_to_buffer()?)
}

/// Export to a file, replacing it if present. `.csv` paths get the CSV
/// layout, anything else a workbook.
pub async fn export_to_path(history: &QueryHistory, path: &Path) -> Result<usize, ExportError> {
    if history.is_empty() {
        return Err(ExportError::EmptyHistory);
    }
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    let written = if is_csv {
        let file = tokio::fs::File::create(path).await?;
        export_history(history, file).await?
    } else {
        tokio::fs::write(path, export_workbook(history)?).await?;
        history.len()
    };
    log::info!("Exported {written} result sets to {}", path.display());
    Ok(written)
}

async fn write_entry<W>(out: &mut AsyncWriter<W>, entry: &HistoryEntry) -> Result<(), ExportError>
where
    W: AsyncWrite + Unpin + Send,
{
    out.write_record(&["Question:", entry.question.as_str()]).await?;
    out.write_record(&["Explanation:", entry.explanation.as_str()]).await?;
    out.write_record(&["Executed at:", entry.timestamp.as_str()]).await?;
    out.write_record(&["SQL generated:", entry.sql.as_str()]).await?;
    out.write_record(&[""]).await?;

    let Some(first) = entry.results.first() else {
        return Ok(());
    };
    let columns: Vec<&String> = first.keys().collect();
    out.write_record(&columns).await?;
    for row in &entry.results {
        let cells: Vec<String> = columns
            .iter()
            .map(|col| row.get(col.as_str()).map(cell_text).unwrap_or_default())
            .collect();
        out.write_record(&cells).await?;
    }
    Ok(())
}

fn sheet_name(idx: usize, question: &str) -> String {
    let prefix: String = question.chars().take(QUESTION_PREFIX_CHARS).collect();
    let name: String = format!("{}_{prefix}", idx + 1)
        .chars()
        .filter(|c| !matches!(c, '*' | '?' | '/' | '\\' | '[' | ']' | ':'))
        .take(SHEET_NAME_MAX)
        .collect();
    name.trim_end_matches('\'').to_string()
}

fn write_sheet(sheet: &mut Worksheet, entry: &HistoryEntry) -> Result<(), ExportError> {
    let label_rows = [
        ("Question:", entry.question.as_str(), Format::new().set_bold().set_font_size(12)),
        ("Explanation:", entry.explanation.as_str(), Format::new().set_font_color(ACCENT)),
        ("Executed at:", entry.timestamp.as_str(), Format::new()),
        (
            "SQL generated:",
            entry.sql.as_str(),
            Format::new().set_italic().set_font_color(Color::Gray),
        ),
    ];
    for (row, (label, value, format)) in label_rows.iter().enumerate() {
        sheet.write_string_with_format(row as u32, 0, *label, format)?;
        sheet.write_string_with_format(row as u32, 1, *value, format)?;
    }

    let Some(first) = entry.results.first() else {
        return Ok(());
    };
    // row 4 stays blank
    let header_row = label_rows.len() as u32 + 1;
    let header = Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(ACCENT);
    let columns: Vec<&String> = first.keys().collect();
    for (col, name) in columns.iter().enumerate() {
        sheet.write_string_with_format(header_row, col as u16, name.as_str(), &header)?;
        sheet.set_column_width(col as u16, 25)?;
    }
    for (offset, result) in entry.results.iter().enumerate() {
        let row = header_row + 1 + offset as u32;
        for (col, name) in columns.iter().enumerate() {
            let col = col as u16;
            match result.get(name.as_str()) {
                None | Some(Value::Null) => {}
                Some(Value::Number(n)) => match n.as_f64() {
                    Some(f) => {
                        sheet.write_number(row, col, f)?;
                    }
                    None => {
                        sheet.write_string(row, col, n.to_string())?;
                    }
                },
                Some(Value::Bool(b)) => {
                    sheet.write_boolean(row, col, *b)?;
                }
                Some(other) => {
                    sheet.write_string(row, col, cell_text(other))?;
                }
            }
        }
    }
    Ok(())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
