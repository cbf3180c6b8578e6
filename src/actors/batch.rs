//! BatchAccumulator - Groups samples into batches for the persistence sink
//!
//! ## Batching Strategy
//!
//! Samples are buffered and written as one batch when either trigger fires:
//! - **Size trigger**: the buffer reaches `batch_size` samples
//! - **Time trigger**: the flush interval elapses with a non-empty buffer
//!
//! A final flush runs when the sample stream ends, and shutdown waits for
//! every write still in flight.
//!
//! ## Concurrency
//!
//! `add` never awaits. When the size trigger fires the full buffer is swapped
//! out under the lock and written from a tracked task, so the caller is never
//! held up by the sink. A batch that fails to write is logged and discarded.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, trace};

use crate::MetricsSample;
use crate::storage::PersistenceSink;

/// Accumulator statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Samples waiting in the buffer
    pub buffered: usize,

    /// Batches handed to the sink
    pub flush_count: u64,

    pub samples_persisted: u64,

    /// Samples lost to failed writes
    pub samples_discarded: u64,
}

struct Inner {
    buffer: Mutex<Vec<MetricsSample>>,
    batch_size: usize,
    sink: Arc<dyn PersistenceSink>,
    writes: TaskTracker,
    flush_count: AtomicU64,
    samples_persisted: AtomicU64,
    samples_discarded: AtomicU64,
}

/// Buffers samples and writes them to a [`PersistenceSink`] in batches
///
/// Cheap to clone; clones share the same buffer.
#[derive(Clone)]
pub struct BatchAccumulator {
    inner: Arc<Inner>,
}

impl BatchAccumulator {
    /// `batch_size` is at least one
    pub fn new(sink: Arc<dyn PersistenceSink>, batch_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(Vec::new()),
                batch_size: batch_size.max(1),
                sink,
                writes: TaskTracker::new(),
                flush_count: AtomicU64::new(0),
                samples_persisted: AtomicU64::new(0),
                samples_discarded: AtomicU64::new(0),
            }),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.inner.batch_size
    }

    /// Buffer one sample; a full buffer is written in the background
    pub fn add(&self, sample: MetricsSample) {
        let full = {
            let mut buffer = self.lock();
            buffer.push(sample);
            if buffer.len() >= self.inner.batch_size {
                Some(mem::take(&mut *buffer))
            } else {
                None
            }
        };

        if let Some(batch) = full {
            trace!("size-based flush triggered ({} samples)", batch.len());
            let inner = Arc::clone(&self.inner);
            self.inner.writes.spawn(async move {
                inner.write(batch).await;
            });
        }
    }

    /// Write whatever is buffered and wait for the write
    ///
    /// Returns the number of samples handed to the sink.
    pub async fn flush(&self) -> usize {
        let batch = mem::take(&mut *self.lock());
        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        self.inner.write(batch).await;
        count
    }

    /// Number of buffered samples
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BatchStats {
        BatchStats {
            buffered: self.len(),
            flush_count: self.inner.flush_count.load(Ordering::Relaxed),
            samples_persisted: self.inner.samples_persisted.load(Ordering::Relaxed),
            samples_discarded: self.inner.samples_discarded.load(Ordering::Relaxed),
        }
    }

    /// Time-based flush loop
    ///
    /// Flushes every `flush_interval` until cancelled. The final flush is left
    /// to [`shutdown`](Self::shutdown), which runs when the sample stream ends.
    #[instrument(skip(self, cancel))]
    pub async fn run(self, flush_interval: Duration, cancel: CancellationToken) {
        debug!("starting flush timer");

        let mut ticker = flush_ticker(flush_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                _ = ticker.tick() => {
                    let flushed = self.flush().await;
                    if flushed > 0 {
                        trace!("time-based flush wrote {} samples", flushed);
                    }
                }
            }
        }

        debug!("flush timer stopped");
    }

    /// Final flush, then wait for all in-flight writes
    pub async fn shutdown(&self) {
        let flushed = self.flush().await;
        if flushed > 0 {
            info!("final flush before shutdown ({} samples)", flushed);
        }

        self.inner.writes.close();
        self.inner.writes.wait().await;

        let stats = self.stats();
        debug!(
            "accumulator drained ({} batches, {} persisted, {} discarded)",
            stats.flush_count, stats.samples_persisted, stats.samples_discarded
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MetricsSample>> {
        self.inner.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ticks missed during a slow write are not replayed back to back
fn flush_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl Inner {
    async fn write(&self, batch: Vec<MetricsSample>) {
        let batch_size = batch.len() as u64;
        let flush = self.flush_count.fetch_add(1, Ordering::Relaxed) + 1;

        match self.sink.create_batch(batch).await {
            Ok(()) => {
                self.samples_persisted.fetch_add(batch_size, Ordering::Relaxed);
                trace!("flush #{} complete ({} samples)", flush, batch_size);
            }
            Err(e) => {
                self.samples_discarded.fetch_add(batch_size, Ordering::Relaxed);
                error!("failed to flush batch of {} samples: {}", batch_size, e);
            }
        }
    }
}
