//! Failure tests for the pipeline
//!
//! These tests verify that the system handles failures gracefully:
//! - Partial and systemic sampling failures
//! - Persistence failures
//! - Hook panics

use std::sync::Arc;

use async_trait::async_trait;
use pulsewatch::{
    MetricsSample,
    actors::{
        alert::{AlertHandle, AlertHook},
        batch::BatchAccumulator,
    },
    pipeline::Pipeline,
    sampler::{Sampler, Subsystem},
    storage::MemorySink,
};

use crate::helpers::*;

#[tokio::test]
async fn test_single_failing_subsystem_still_reaches_every_consumer() {
    let hook = Arc::new(RecordingHook::default());
    let sink = Arc::new(MemorySink::new());
    let sampler = Sampler::new(
        Box::new(CountingSource::failing(vec![Subsystem::Disk])),
        "web-01",
        3,
    );

    let pipeline = Pipeline::start(
        &test_config(),
        sampler,
        sink.clone(),
        Some(hook.clone() as Arc<dyn AlertHook>),
    );
    pipeline.scheduler().sample_now().await.unwrap();

    let stats = pipeline.scheduler().stats().await.unwrap();
    assert_eq!(stats.emitted, 2);
    assert_eq!(stats.subsystem_errors, 2);

    pipeline.shutdown().await;

    let stored: Vec<MetricsSample> = sink.batches().await.into_iter().flatten().collect();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|s| s.disk.total == 0 && s.disk.partitions.is_empty()));
    assert!(stored.iter().all(|s| s.memory.total == 8_000));
    assert_eq!(hook.seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_systemic_failure_emits_nothing() {
    let sink = Arc::new(MemorySink::new());
    let sampler = Sampler::new(
        Box::new(CountingSource::failing(vec![
            Subsystem::Cpu,
            Subsystem::Memory,
            Subsystem::Network,
        ])),
        "web-01",
        3,
    );

    let pipeline = Pipeline::start(&test_config(), sampler, sink.clone(), None);

    assert!(pipeline.scheduler().sample_now().await.is_err());

    let stats = pipeline.scheduler().stats().await.unwrap();
    assert_eq!(stats.emitted, 0);
    assert_eq!(stats.failed, 2, "immediate tick and manual sample");

    pipeline.shutdown().await;
    assert_eq!(sink.sample_count().await, 0);
}

#[tokio::test]
async fn test_failed_batch_is_discarded_and_accumulation_continues() {
    let sink = Arc::new(FlakySink::new(1));
    let accumulator = BatchAccumulator::new(sink.clone(), 50);

    for _ in 0..50 {
        accumulator.add(sample_at("web-01", chrono::Utc::now()));
    }

    let watched = accumulator.clone();
    eventually(|| {
        let accumulator = watched.clone();
        async move { accumulator.stats().samples_discarded == 50 }
    })
    .await;
    assert_eq!(accumulator.len(), 0);

    for _ in 0..10 {
        accumulator.add(sample_at("web-01", chrono::Utc::now()));
    }
    assert_eq!(accumulator.len(), 10);

    accumulator.shutdown().await;

    let stats = accumulator.stats();
    assert_eq!(stats.samples_discarded, 50);
    assert_eq!(stats.samples_persisted, 10);
    assert_eq!(sink.stored_count(), 10);
}

struct PanickingHook;

#[async_trait]
impl AlertHook for PanickingHook {
    async fn on_sample(&self, sample: Arc<MetricsSample>) {
        if sample.cpu.usage_percent < 2.0 {
            panic!("rule table corrupted");
        }
    }
}

#[tokio::test]
async fn test_hook_panic_does_not_reach_pipeline() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::start(
        &test_config(),
        test_sampler("web-01"),
        sink.clone(),
        Some(Arc::new(PanickingHook)),
    );

    for _ in 0..3 {
        pipeline.scheduler().sample_now().await.unwrap();
    }

    pipeline.shutdown().await;
    assert_eq!(sink.sample_count().await, 4);
}

#[tokio::test]
async fn test_dispatch_after_dispatcher_exit_is_skipped() {
    let (handle, task) = AlertHandle::spawn(Arc::new(PanickingHook), 4);
    task.abort();
    let _ = task.await;

    let sample = Arc::new(sample_at("web-01", chrono::Utc::now()));
    assert!(!handle.dispatch(sample));
}
