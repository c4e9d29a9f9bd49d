use crate::{IngestError, IngestResult};
use async_compression::tokio::bufread::{GzipDecoder, ZstdDecoder};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, BufReader};
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

use crate::codec::Utf8Transcoder;

/// How to read an uploaded claims export.
#[derive(Debug, Clone)]
pub struct SourceMeta {
    /// e.g. "application/gzip" or "text/csv"
    pub content_type: String,
    /// e.g. "gzip", "zstd", or empty
    pub content_encoding: String,
    /// original file name (used for extension fallback)
    pub name_hint: String,
    /// Which character encoding to expect (defaults to UTF-8)
    pub charset: &'static encoding_rs::Encoding,
    /// Field separator; `,` unless the name says `.tsv`
    pub delimiter: u8,
}

impl Default for SourceMeta {
    fn default() -> Self {
        Self {
            content_type: String::new(),
            content_encoding: String::new(),
            name_hint: String::new(),
            charset: encoding_rs::UTF_8,
            delimiter: b',',
        }
    }
}

impl SourceMeta {
    /// Guess content type, encoding and delimiter from a file name.
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        let mut meta = SourceMeta {
            name_hint: name.to_string(),
            ..Default::default()
        };
        let stem = if let Some(stem) = lower.strip_suffix(".gz") {
            meta.content_type = "application/gzip".into();
            meta.content_encoding = "gzip".into();
            stem
        } else if let Some(stem) = lower.strip_suffix(".zst") {
            meta.content_type = "application/zstd".into();
            meta.content_encoding = "zstd".into();
            stem
        } else {
            meta.content_type = "text/csv".into();
            lower.as_str()
        };
        if stem.ends_with(".tsv") {
            meta.delimiter = b'\t';
        }
        meta
    }

    fn is_gzip(&self) -> bool {
        let ce = self.content_encoding.to_ascii_lowercase();
        let ct = self.content_type.to_ascii_lowercase();
        ce.split(',').any(|s| s.trim() == "gzip")
            || matches!(ct.as_str(), "application/gzip" | "application/x-gzip")
            || self.name_hint.to_ascii_lowercase().ends_with(".gz")
    }

    fn is_zstd(&self) -> bool {
        let ce = self.content_encoding.to_ascii_lowercase();
        let ct = self.content_type.to_ascii_lowercase();
        ce.split(',').any(|s| s.trim() == "zstd")
            || ct == "application/zstd"
            || self.name_hint.to_ascii_lowercase().ends_with(".zst")
    }
}

/// Wrap a raw byte source with decompression (encoding, then type, then
/// extension decides) and, for non-UTF-8 charsets, transcoding.
pub fn build_reader<R>(raw: R, meta: &SourceMeta) -> impl AsyncRead + Unpin + Send
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf = BufReader::with_capacity(1 << 20, raw);
    let decompressed: Box<dyn AsyncRead + Unpin + Send> = if meta.is_gzip() {
        Box::new(GzipDecoder::new(buf))
    } else if meta.is_zstd() {
        Box::new(ZstdDecoder::new(buf))
    } else {
        Box::new(buf)
    };

    let reader: Box<dyn AsyncRead + Unpin + Send> = if meta.charset == encoding_rs::UTF_8 {
        decompressed
    } else {
        let framed = FramedRead::new(decompressed, Utf8Transcoder::new(meta.charset));
        Box::new(StreamReader::new(framed))
    };
    reader
}

/// Open a local export read as `charset`. A missing file is `IngestError::NoFile`.
pub async fn reader_from_path(
    path: &Path,
    charset: &'static encoding_rs::Encoding,
) -> IngestResult<(impl AsyncRead + Unpin + Send, SourceMeta)> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(IngestError::NoFile),
        Err(e) => return Err(e.into()),
    };
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let meta = SourceMeta {
        charset,
        ..SourceMeta::from_name(name)
    };
    let size = file.metadata().await.map(|m| m.len()).unwrap_or_default();
    log::info!(
        "Processing file: {name}, Size: {:.2} MB, charset {}",
        size as f64 / (1024.0 * 1024.0),
        meta.charset.name()
    );
    Ok((build_reader(file, &meta), meta))
}
