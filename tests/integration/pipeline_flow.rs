//! Integration tests for the full sampling pipeline
//!
//! These tests verify that the stages work correctly together:
//! - Scheduler → Batch Accumulator → Persistence Sink
//! - Scheduler → Hub → viewer queues, in sampling order
//! - Scheduler → Alert Dispatcher → Alert Hook
//! - Final flush on shutdown

use std::sync::Arc;
use std::time::Duration;

use pulsewatch::{
    actors::{alert::AlertHook, messages::MessageType},
    pipeline::Pipeline,
    session::SessionHandle,
    storage::MemorySink,
};

use crate::helpers::*;

#[tokio::test]
async fn test_shutdown_flushes_every_emitted_sample() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::start(&test_config(), test_sampler("web-01"), sink.clone(), None);

    for _ in 0..5 {
        pipeline.scheduler().sample_now().await.unwrap();
    }

    let stats = pipeline.scheduler().stats().await.unwrap();
    assert_eq!(stats.emitted, 6, "immediate sample plus five manual ones");
    assert_eq!(stats.dropped, 0);

    pipeline.shutdown().await;

    assert_eq!(sink.sample_count().await, 6);
    for batch in sink.batches().await {
        assert!(batch.iter().all(|s| s.host_id == "web-01"));
    }
}

#[tokio::test]
async fn test_size_trigger_inside_pipeline() {
    let mut config = test_config();
    config.batching.batch_size = 3;

    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::start(&config, test_sampler("web-01"), sink.clone(), None);

    for _ in 0..5 {
        pipeline.scheduler().sample_now().await.unwrap();
    }

    // Six samples, two full batches, without waiting for the flush timer
    let watched = sink.clone();
    eventually(|| {
        let sink = watched.clone();
        async move { sink.sample_count().await == 6 }
    })
    .await;

    let sizes: Vec<usize> = sink.batches().await.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![3, 3]);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_viewers_receive_metrics_in_sampling_order() {
    let pipeline = Pipeline::start(
        &test_config(),
        test_sampler("web-01"),
        Arc::new(MemorySink::new()),
        None,
    );

    let (handle, mut rx) = SessionHandle::channel(64);
    pipeline.hub().register(handle).await.unwrap();

    for _ in 0..4 {
        pipeline.scheduler().sample_now().await.unwrap();
    }

    let mut cpu_readings = Vec::new();
    while cpu_readings.len() < 4 {
        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for metrics")
            .expect("queue closed");
        if message.kind == MessageType::Metrics {
            assert_eq!(message.payload["host_id"], "web-01");
            cpu_readings.push(message.payload["cpu_usage"].as_f64().unwrap());
        }
    }

    let mut sorted = cpu_readings.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(cpu_readings, sorted);

    pipeline.shutdown().await;

    // Hub closed the queue during shutdown
    while let Some(message) = rx.recv().await {
        assert_eq!(message.kind, MessageType::Metrics);
    }
}

#[tokio::test]
async fn test_alert_hook_sees_every_sample_in_order() {
    let hook = Arc::new(RecordingHook::default());
    let pipeline = Pipeline::start(
        &test_config(),
        test_sampler("web-01"),
        Arc::new(MemorySink::new()),
        Some(hook.clone() as Arc<dyn AlertHook>),
    );

    for _ in 0..3 {
        pipeline.scheduler().sample_now().await.unwrap();
    }

    pipeline.shutdown().await;

    let seen = hook.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![1.0, 2.0, 3.0, 4.0]);
}

#[tokio::test]
async fn test_pipeline_without_viewers_or_hook() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::start(&test_config(), test_sampler("web-01"), sink.clone(), None);

    assert_eq!(pipeline.hub().viewer_count().await.unwrap(), 0);
    pipeline.scheduler().sample_now().await.unwrap();

    pipeline.shutdown().await;
    assert_eq!(sink.sample_count().await, 2);
}
