//! Integration tests for the SQLite sink behind a running pipeline

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pulsewatch::{
    actors::retention::RetentionTask,
    pipeline::Pipeline,
    storage::{PersistenceSink, sqlite::SqliteSink},
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

async fn open_sink(dir: &TempDir) -> Arc<SqliteSink> {
    Arc::new(SqliteSink::new(dir.path().join("samples.db")).await.unwrap())
}

#[tokio::test]
async fn test_every_emitted_sample_is_stored() {
    let dir = TempDir::new().unwrap();
    let sink = open_sink(&dir).await;

    let mut config = test_config();
    config.batching.batch_size = 4;
    let pipeline = Pipeline::start(&config, test_sampler("db-01"), sink.clone(), None);

    // Spaced out so stored millisecond timestamps are distinct
    for _ in 0..9 {
        tokio::time::sleep(Duration::from_millis(3)).await;
        pipeline.scheduler().sample_now().await.unwrap();
    }
    let emitted = pipeline.scheduler().stats().await.unwrap().emitted;
    pipeline.shutdown().await;

    assert_eq!(emitted, 10);
    assert_eq!(sink.count().await.unwrap(), 10);

    let latest = sink.query_latest("db-01", 3).await.unwrap();
    let cpu: Vec<f32> = latest.iter().map(|s| s.cpu.usage_percent).collect();
    assert_eq!(cpu, vec![8.0, 9.0, 10.0]);
    assert!(latest.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn test_samples_survive_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let sink = open_sink(&dir).await;
        let pipeline = Pipeline::start(&test_config(), test_sampler("db-01"), sink.clone(), None);
        pipeline.scheduler().sample_now().await.unwrap();
        pipeline.shutdown().await;
        sink.close().await.unwrap();
    }

    let reopened = open_sink(&dir).await;
    assert_eq!(reopened.count().await.unwrap(), 2);
    assert!(reopened.query_latest("other-host", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retention_removes_expired_samples() {
    let dir = TempDir::new().unwrap();
    let sink = open_sink(&dir).await;

    let now = Utc::now();
    sink.create_batch(vec![
        sample_at("db-01", now - chrono::Duration::days(30)),
        sample_at("db-01", now - chrono::Duration::days(10)),
        sample_at("db-01", now),
    ])
    .await
    .unwrap();

    let retention = RetentionTask::new(sink.clone(), 7, Duration::from_secs(3600));
    let cancel = CancellationToken::new();
    let task = retention.spawn(cancel.clone());

    let watched = sink.clone();
    eventually(|| {
        let sink = watched.clone();
        async move { sink.count().await.unwrap() == 1 }
    })
    .await;

    cancel.cancel();
    task.await.unwrap();

    let remaining = sink.query_latest("db-01", 10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].timestamp, now);
}
