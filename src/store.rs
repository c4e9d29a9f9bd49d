//! Storage seam for normalized claims.

use crate::config::ConfigError;
use crate::record::ClaimRecord;
use std::future::Future;
use std::path::Path;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Response(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Bulk-insert primitive. A batch is accepted or rejected as a whole;
/// nothing is coordinated across batches.
pub trait ClaimSink {
    fn insert_batch(
        &mut self,
        batch: &[ClaimRecord],
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

impl<S: ClaimSink> ClaimSink for &mut S {
    fn insert_batch(
        &mut self,
        batch: &[ClaimRecord],
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        (**self).insert_batch(batch)
    }
}

/// Appends records as JSON lines to a local file.
///
/// A batch is encoded in memory and written with one call. If that write
/// fails the file is cut back to its length before the batch, so a rejected
/// batch leaves no lines behind.
pub struct JsonLinesSink {
    file: File,
    /// Bytes of fully written batches.
    len: u64,
    buf: Vec<u8>,
}

impl JsonLinesSink {
    pub async fn create(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            file,
            len,
            buf: Vec::with_capacity(1 << 16),
        })
    }

    async fn write_buf(&mut self) -> std::io::Result<()> {
        self.file.write_all(&self.buf).await?;
        self.file.flush().await
    }

    async fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.len).await {
            log::warn!("could not drop partial batch from JSON lines file: {e}");
        }
    }
}

impl ClaimSink for JsonLinesSink {
    async fn insert_batch(&mut self, batch: &[ClaimRecord]) -> Result<(), StorageError> {
        self.buf.clear();
        for record in batch {
            serde_json::to_writer(&mut self.buf, record)?;
            self.buf.push(b'\n');
        }
        if let Err(e) = self.write_buf().await {
            self.rollback().await;
            return Err(e.into());
        }
        self.len += self.buf.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn json_lines_sink_appends_one_line_per_record() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("claims.jsonl");
        let mut sink = JsonLinesSink::create(&path).await?;

        let batch = vec![
            ClaimRecord {
                claim_number: Some("A".into()),
                ..Default::default()
            },
            ClaimRecord {
                claim_number: Some("B".into()),
                ..Default::default()
            },
        ];
        sink.insert_batch(&batch).await?;
        sink.insert_batch(&batch[..1]).await?;

        let text = std::fs::read_to_string(&path)?;
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0])?;
        assert_eq!(first["claim_number"], "A");
        Ok(())
    }

    fn numbered(n: usize) -> Vec<ClaimRecord> {
        (0..n)
            .map(|i| ClaimRecord {
                claim_number: Some(format!("CLM{i:06}")),
                facility: Some("x".repeat(200)),
                ..Default::default()
            })
            .collect()
    }

    #[tokio::test]
    async fn large_batch_lands_whole_and_reopen_appends() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("claims.jsonl");
        let mut sink = JsonLinesSink::create(&path).await?;
        // well past any single write buffer
        sink.insert_batch(&numbered(500)).await?;
        assert_eq!(sink.len, std::fs::metadata(&path)?.len());
        drop(sink);

        let mut sink = JsonLinesSink::create(&path).await?;
        assert_eq!(sink.len, std::fs::metadata(&path)?.len());
        sink.insert_batch(&numbered(3)).await?;

        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text.lines().count(), 503);
        assert!(text.ends_with("\n"));
        Ok(())
    }

    #[tokio::test]
    async fn rollback_cuts_back_to_last_whole_batch() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("claims.jsonl");
        let mut sink = JsonLinesSink::create(&path).await?;
        sink.insert_batch(&numbered(2)).await?;
        let whole = std::fs::read_to_string(&path)?;

        // what an interrupted write would leave behind
        {
            use std::io::Write;
            let mut raw = std::fs::OpenOptions::new().append(true).open(&path)?;
            raw.write_all(b"{\"claim_number\":\"CLM0000")?;
        }
        sink.rollback().await;

        assert_eq!(std::fs::read_to_string(&path)?, whole);
        sink.insert_batch(&numbered(1)).await?;
        assert_eq!(std::fs::read_to_string(&path)?.lines().count(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn failed_write_is_reported() -> anyhow::Result<()> {
        let dev_full = Path::new("/dev/full");
        if !dev_full.exists() {
            return Ok(());
        }
        let mut sink = JsonLinesSink::create(dev_full).await?;
        let err = sink.insert_batch(&numbered(1)).await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        Ok(())
    }
}
