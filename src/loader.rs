use crate::record::ClaimRecord;
use crate::store::ClaimSink;
use crate::{IngestError, IngestResult};

/// Default number of records per bulk insert.
pub const DEFAULT_BATCH_CAPACITY: usize = 500;

/// Buffers records and writes them to the sink in fixed-size batches, in
/// arrival order. At most one batch is held in memory.
///
/// A failed write is not retried and already written batches stay written;
/// the caller is expected to stop feeding the loader once it errors.
pub struct ChunkedLoader<S> {
    sink: S,
    capacity: usize,
    pending: Vec<ClaimRecord>,
    committed: usize,
    batches: usize,
}

impl<S: ClaimSink> ChunkedLoader<S> {
    pub fn new(sink: S, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sink,
            capacity,
            pending: Vec::with_capacity(capacity),
            committed: 0,
            batches: 0,
        }
    }

    pub async fn accept(&mut self, record: ClaimRecord) -> IngestResult<()> {
        self.pending.push(record);
        if self.pending.len() >= self.capacity {
            self.write_pending().await?;
        }
        Ok(())
    }

    /// Write the partial batch, if any, and return the run total.
    pub async fn flush(&mut self) -> IngestResult<usize> {
        if !self.pending.is_empty() {
            self.write_pending().await?;
        }
        Ok(self.committed)
    }

    /// Records persisted so far.
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Successful bulk writes so far.
    pub fn batches_written(&self) -> usize {
        self.batches
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn into_inner(self) -> S {
        self.sink
    }

    async fn write_pending(&mut self) -> IngestResult<()> {
        let batch = self.batches + 1;
        if let Err(source) = self.sink.insert_batch(&self.pending).await {
            log::error!(
                "Batch {batch} ({} records) failed; {} records already committed",
                self.pending.len(),
                self.committed
            );
            self.pending.clear();
            return Err(IngestError::StorageWrite {
                committed: self.committed,
                batch,
                source,
            });
        }
        self.committed += self.pending.len();
        self.batches = batch;
        self.pending.clear();
        log::info!("Inserted {} rows...", self.committed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StorageError;

    #[derive(Default)]
    struct Recorder {
        sizes: Vec<usize>,
        fail_on: Option<usize>,
    }

    impl ClaimSink for Recorder {
        async fn insert_batch(&mut self, batch: &[ClaimRecord]) -> Result<(), StorageError> {
            if self.fail_on == Some(self.sizes.len() + 1) {
                return Err(StorageError::Response("boom".into()));
            }
            self.sizes.push(batch.len());
            Ok(())
        }
    }

    async fn load(n: usize, capacity: usize) -> (usize, Vec<usize>) {
        let mut loader = ChunkedLoader::new(Recorder::default(), capacity);
        for _ in 0..n {
            loader.accept(ClaimRecord::default()).await.unwrap();
        }
        let total = loader.flush().await.unwrap();
        (total, loader.into_inner().sizes)
    }

    #[tokio::test]
    async fn full_batches_then_remainder() {
        for n in [0usize, 1, 499, 500, 501, 1000, 1234] {
            let (total, sizes) = load(n, DEFAULT_BATCH_CAPACITY).await;
            assert_eq!(total, n);
            let full = sizes.iter().filter(|&&s| s == 500).count();
            assert_eq!(full, n / 500, "n={n}");
            let expected_writes = n / 500 + usize::from(n % 500 != 0);
            assert_eq!(sizes.len(), expected_writes, "n={n}");
            if n % 500 != 0 {
                assert_eq!(*sizes.last().unwrap(), n % 500);
            }
            assert_eq!(sizes.iter().sum::<usize>(), n);
        }
    }

    #[tokio::test]
    async fn flush_on_empty_batch_writes_nothing() {
        let mut loader = ChunkedLoader::new(Recorder::default(), 3);
        for _ in 0..3 {
            loader.accept(ClaimRecord::default()).await.unwrap();
        }
        assert_eq!(loader.pending(), 0);
        assert_eq!(loader.flush().await.unwrap(), 3);
        assert_eq!(loader.flush().await.unwrap(), 3);
        assert_eq!(loader.into_inner().sizes, vec![3]);
    }

    #[tokio::test]
    async fn failed_write_reports_prior_commits() {
        let sink = Recorder {
            fail_on: Some(2),
            ..Default::default()
        };
        let mut loader = ChunkedLoader::new(sink, 2);
        loader.accept(ClaimRecord::default()).await.unwrap();
        loader.accept(ClaimRecord::default()).await.unwrap();
        loader.accept(ClaimRecord::default()).await.unwrap();
        let err = loader.accept(ClaimRecord::default()).await.unwrap_err();
        match err {
            IngestError::StorageWrite { committed, batch, .. } => {
                assert_eq!(committed, 2);
                assert_eq!(batch, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(loader.committed(), 2);
        assert_eq!(loader.batches_written(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let loader = ChunkedLoader::new(Recorder::default(), 0);
        assert_eq!(loader.capacity, 1);
    }
}
