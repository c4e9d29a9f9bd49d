use crate::cell::CellValue;
use crate::DecodeError;
use csv_async::AsyncReaderBuilder;
use futures::{Stream, StreamExt};
use tokio::io::AsyncRead;

/// Forward-only row stream over a delimited export of the first worksheet.
///
/// Row 1 is yielded like any other row; deciding that it is the header is
/// the driver's job. Ragged rows are allowed.
pub fn csv_rows<R>(reader: R, delimiter: u8) -> impl Stream<Item = Result<Vec<CellValue>, DecodeError>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    AsyncReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        // Larger internal buffer reduces syscalls and allocator churn
        .buffer_capacity(1 << 20) // 1 MiB
        .create_reader(reader)
        .into_records()
        .map(|record| {
            record
                .map(|r| r.iter().map(CellValue::from_text).collect())
                .map_err(DecodeError::from)
        })
}
