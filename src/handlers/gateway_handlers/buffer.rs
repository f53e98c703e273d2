use std::time::{Duration, Instant};

use crate::errors::IngestError;
use crate::measurements::MeasurementStore;
use crate::models::Reading;

/// Per-assignment holding pen for regular readings. Owned by the
/// assignment's connection task, so no lock guards it.
///
/// Flush rule, checked after every append: flush when no flush has happened
/// since the connection was (re)created, or when the configured interval has
/// elapsed since the last one. A failed flush keeps the pending readings and
/// the old flush timestamp, so the next opportunity retries the same batch.
/// The store must tolerate the duplicates that retry can produce.
pub struct ReadingBuffer {
    assignment_id: String,
    pending: Vec<Reading>,
    last_flush: Option<Instant>,
    has_flushed_once: bool,
    flush_interval: Duration,
}

impl ReadingBuffer {
    pub fn new(assignment_id: &str, flush_interval: Duration) -> Self {
        ReadingBuffer {
            assignment_id: assignment_id.to_string(),
            pending: Vec::new(),
            last_flush: None,
            has_flushed_once: false,
            flush_interval,
        }
    }

    pub fn append(&mut self, reading: Reading) {
        self.pending.push(reading);
    }

    /// Forgets that a flush ever happened, so the first reading of the new
    /// broker session is persisted immediately instead of waiting out the
    /// interval.
    pub fn mark_reconnected(&mut self) {
        self.has_flushed_once = false;
    }

    pub fn pending(&self) -> &[Reading] {
        &self.pending
    }

    pub async fn maybe_flush(
        &mut self,
        store: &dyn MeasurementStore,
    ) -> Result<usize, IngestError> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let interval_elapsed = self
            .last_flush
            .map_or(true, |at| at.elapsed() >= self.flush_interval);
        if self.has_flushed_once && !interval_elapsed {
            return Ok(0);
        }

        match store.save_batch(&self.pending).await {
            Ok(saved) => {
                log::info!(
                    "flushed {} reading(s) for assignment {}",
                    saved.len(),
                    self.assignment_id
                );
                self.pending.clear();
                self.last_flush = Some(Instant::now());
                self.has_flushed_once = true;
                Ok(saved.len())
            }
            Err(e) => {
                // Pending readings stay put for the next attempt.
                log::error!(
                    "flush failed for assignment {}, retaining {} reading(s): {}",
                    self.assignment_id,
                    self.pending.len(),
                    e
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReadingKind;
    use crate::test_support::{reading, RecordingStore};

    #[tokio::test]
    async fn first_append_after_creation_flushes_immediately() {
        let store = RecordingStore::new();
        let mut buffer = ReadingBuffer::new("a1", Duration::from_secs(3600));

        buffer.append(reading("a1", "temp", 21.0, ReadingKind::Regular));
        let flushed = buffer.maybe_flush(store.as_ref()).await.unwrap();

        assert_eq!(flushed, 1);
        assert!(buffer.pending().is_empty());
        assert_eq!(store.batches().len(), 1);
    }

    #[tokio::test]
    async fn second_append_within_interval_stays_buffered() {
        let store = RecordingStore::new();
        let mut buffer = ReadingBuffer::new("a1", Duration::from_secs(3600));

        buffer.append(reading("a1", "temp", 21.0, ReadingKind::Regular));
        buffer.maybe_flush(store.as_ref()).await.unwrap();

        buffer.append(reading("a1", "temp", 21.5, ReadingKind::Regular));
        let flushed = buffer.maybe_flush(store.as_ref()).await.unwrap();

        assert_eq!(flushed, 0);
        assert_eq!(buffer.pending().len(), 1);
        assert_eq!(store.batches().len(), 1);
    }

    #[tokio::test]
    async fn elapsed_interval_flushes_the_accumulated_batch() {
        let store = RecordingStore::new();
        let mut buffer = ReadingBuffer::new("a1", Duration::ZERO);

        buffer.append(reading("a1", "temp", 21.0, ReadingKind::Regular));
        buffer.maybe_flush(store.as_ref()).await.unwrap();
        buffer.append(reading("a1", "temp", 21.5, ReadingKind::Regular));
        buffer.append(reading("a1", "hum", 40.0, ReadingKind::Regular));
        let flushed = buffer.maybe_flush(store.as_ref()).await.unwrap();

        assert_eq!(flushed, 2);
        assert_eq!(store.batches().len(), 2);
        assert_eq!(store.batches()[1].len(), 2);
    }

    #[tokio::test]
    async fn failed_flush_retains_pending_and_timestamp_then_retries() {
        let store = RecordingStore::new();
        let mut buffer = ReadingBuffer::new("a1", Duration::from_secs(3600));

        buffer.append(reading("a1", "temp", 21.0, ReadingKind::Regular));
        store.set_failing(true);
        assert!(buffer.maybe_flush(store.as_ref()).await.is_err());

        // Content-equal batch still pending, no flush recorded.
        assert_eq!(buffer.pending().len(), 1);
        assert!(buffer.last_flush.is_none());
        assert!(!buffer.has_flushed_once);

        store.set_failing(false);
        let flushed = buffer.maybe_flush(store.as_ref()).await.unwrap();
        assert_eq!(flushed, 1);
        assert_eq!(store.batches()[0][0].sensor_key, "temp");
    }

    #[tokio::test]
    async fn reconnect_resets_the_flush_once_flag() {
        let store = RecordingStore::new();
        let mut buffer = ReadingBuffer::new("a1", Duration::from_secs(3600));

        buffer.append(reading("a1", "temp", 21.0, ReadingKind::Regular));
        buffer.maybe_flush(store.as_ref()).await.unwrap();

        buffer.mark_reconnected();
        buffer.append(reading("a1", "temp", 22.0, ReadingKind::Regular));
        let flushed = buffer.maybe_flush(store.as_ref()).await.unwrap();

        assert_eq!(flushed, 1);
        assert_eq!(store.batches().len(), 2);
    }

    #[tokio::test]
    async fn empty_buffer_never_flushes() {
        let store = RecordingStore::new();
        let mut buffer = ReadingBuffer::new("a1", Duration::ZERO);

        assert_eq!(buffer.maybe_flush(store.as_ref()).await.unwrap(), 0);
        assert!(store.batches().is_empty());
    }
}
