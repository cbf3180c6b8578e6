//! End-to-end tests over a real socket
//!
//! Starts the API server on an ephemeral port and talks to it the way a
//! browser viewer would.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use pulsewatch::{
    api::{ApiState, HealthResponse, HealthState, router, spawn_api_server},
    pipeline::Pipeline,
    storage::{HealthStatus, MemorySink, PersistenceSink, StorageError, StorageResult},
};
use serde_json::Value;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tower::ServiceExt;

use crate::helpers::*;

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Next JSON message from the server, skipping protocol frames
async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let message = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            let first = text.lines().next().unwrap_or_default().to_string();
            return serde_json::from_str(&first).unwrap();
        }
    }
}

#[tokio::test]
async fn test_stream_greets_and_forwards_metrics() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::start(&test_config(), test_sampler("web-01"), sink.clone(), None);
    let state = ApiState::new(&pipeline, sink);

    let (addr, server) = spawn_api_server(
        "127.0.0.1:0".parse().unwrap(),
        state,
        pipeline.cancellation().child_token(),
    )
    .await
    .unwrap();

    let (mut socket, _) = connect_async(format!("ws://{addr}/api/v1/stream"))
        .await
        .unwrap();

    let connected = next_json(&mut socket).await;
    assert_eq!(connected["type"], "connected");

    let watched = pipeline.hub().clone();
    eventually(|| {
        let hub = watched.clone();
        async move { hub.viewer_count().await.unwrap() == 1 }
    })
    .await;

    pipeline.scheduler().sample_now().await.unwrap();
    let metrics = next_json(&mut socket).await;
    assert_eq!(metrics["type"], "metrics");
    assert_eq!(metrics["data"]["host_id"], "web-01");
    assert!(metrics["data"]["cpu_usage"].is_number());

    socket
        .send(Message::Text(r#"{"type":"ping"}"#.to_string()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut socket).await["type"], "pong");

    pipeline.shutdown().await;

    // The viewer is told to go away and the server stops
    let mut closed = false;
    while let Ok(Some(message)) = timeout(Duration::from_secs(2), socket.next()).await {
        match message {
            Ok(Message::Close(_)) | Err(_) => {
                closed = true;
                break;
            }
            Ok(_) => continue,
        }
    }
    assert!(closed);
    drop(socket);
    timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_client_disconnect_unregisters_viewer() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::start(&test_config(), test_sampler("web-01"), sink.clone(), None);
    let (addr, _server) = spawn_api_server(
        "127.0.0.1:0".parse().unwrap(),
        ApiState::new(&pipeline, sink),
        pipeline.cancellation().child_token(),
    )
    .await
    .unwrap();

    let (mut socket, _) = connect_async(format!("ws://{addr}/api/v1/stream"))
        .await
        .unwrap();
    next_json(&mut socket).await;

    socket.close(None).await.unwrap();
    drop(socket);

    let watched = pipeline.hub().clone();
    eventually(|| {
        let hub = watched.clone();
        async move { hub.viewer_count().await.unwrap() == 0 }
    })
    .await;

    pipeline.shutdown().await;
}

async fn get_health(state: ApiState) -> (StatusCode, HealthResponse) {
    let response = router(state)
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_reports_ok() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::start(&test_config(), test_sampler("web-01"), sink.clone(), None);

    let (status, health) = get_health(ApiState::new(&pipeline, sink)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health.status, HealthState::Ok);
    assert_eq!(health.viewers, 0);

    pipeline.shutdown().await;
}

struct UnhealthySink;

#[async_trait::async_trait]
impl PersistenceSink for UnhealthySink {
    async fn create_batch(&self, _samples: Vec<pulsewatch::MetricsSample>) -> StorageResult<()> {
        Ok(())
    }

    async fn delete_old_records(&self, _cutoff: chrono::DateTime<chrono::Utc>) -> StorageResult<usize> {
        Ok(0)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Err(StorageError::ConnectionFailed("disk detached".to_string()))
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_health_degraded_when_storage_fails() {
    let sink: Arc<dyn PersistenceSink> = Arc::new(UnhealthySink);
    let pipeline = Pipeline::start(&test_config(), test_sampler("web-01"), sink.clone(), None);

    let (status, health) = get_health(ApiState::new(&pipeline, sink)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health.status, HealthState::Degraded);
    assert!(health.storage.contains("disk detached"));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_bind_conflict_fails_startup() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::start(&test_config(), test_sampler("web-01"), sink.clone(), None);

    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let result = spawn_api_server(
        taken.local_addr().unwrap(),
        ApiState::new(&pipeline, sink),
        pipeline.cancellation().child_token(),
    )
    .await;

    assert!(result.is_err());
    pipeline.shutdown().await;
}
