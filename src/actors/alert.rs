//! AlertDispatcher - Hands each sample to the alert hook
//!
//! Samples are queued on a bounded channel and the hook runs for one sample
//! at a time, in arrival order, inside its own task. A full queue drops the
//! sample, so the hook sees each sample at most once and can never slow the
//! pipeline down. A panicking hook is reported and the dispatcher carries on.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, trace, warn};

use crate::MetricsSample;

/// Receives every fresh sample, e.g. to evaluate alert thresholds
#[async_trait]
pub trait AlertHook: Send + Sync {
    async fn on_sample(&self, sample: Arc<MetricsSample>);
}

/// Actor draining the alert queue
pub struct AlertDispatcher {
    hook: Arc<dyn AlertHook>,
    sample_rx: mpsc::Receiver<Arc<MetricsSample>>,
}

impl AlertDispatcher {
    pub fn new(hook: Arc<dyn AlertHook>, sample_rx: mpsc::Receiver<Arc<MetricsSample>>) -> Self {
        Self { hook, sample_rx }
    }

    /// Run until every [`AlertHandle`] is dropped and the queue is drained
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting alert dispatcher");

        let mut evaluated: u64 = 0;
        let mut panicked: u64 = 0;

        while let Some(sample) = self.sample_rx.recv().await {
            let hook = Arc::clone(&self.hook);
            let timestamp = sample.timestamp;

            match tokio::spawn(async move { hook.on_sample(sample).await }).await {
                Ok(()) => {
                    evaluated += 1;
                    trace!("alert hook done for sample at {}", timestamp);
                }
                Err(e) if e.is_panic() => {
                    panicked += 1;
                    error!(
                        "alert hook panicked on sample at {}: {}",
                        timestamp,
                        panic_message(e.into_panic())
                    );
                }
                Err(e) => warn!("alert hook task cancelled: {}", e),
            }
        }

        debug!(
            "alert dispatcher stopped ({} evaluated, {} panicked)",
            evaluated, panicked
        );
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Producer side of the alert queue
#[derive(Clone)]
pub struct AlertHandle {
    sender: mpsc::Sender<Arc<MetricsSample>>,
    dropped: Arc<AtomicU64>,
}

impl AlertHandle {
    /// Spawn a dispatcher for `hook` with a queue of `capacity` samples
    pub fn spawn(hook: Arc<dyn AlertHook>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(AlertDispatcher::new(hook, rx).run());
        (
            Self {
                sender: tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            task,
        )
    }

    /// Queue a sample without waiting
    ///
    /// Returns `false` when the sample was dropped.
    pub fn dispatch(&self, sample: Arc<MetricsSample>) -> bool {
        match self.sender.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("alert queue full, sample skipped ({} skipped so far)", dropped);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("alert dispatcher gone, sample skipped");
                false
            }
        }
    }

    /// Samples skipped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
