//! Integration tests for threshold alerts delivered to webhooks

use std::sync::Arc;
use std::time::Duration;

use pulsewatch::{
    actors::alert::AlertHook,
    alerts::ThresholdEvaluator,
    config::{AlertMetric, AlertRule, Webhook},
    pipeline::Pipeline,
    storage::MemorySink,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn cpu_rule(threshold: f64, cooldown_secs: u64, url: String) -> AlertRule {
    AlertRule {
        name: "cpu-hot".to_string(),
        metric: AlertMetric::CpuUsage,
        threshold,
        cooldown_secs,
        webhook: Some(Webhook { url }),
    }
}

#[tokio::test]
async fn test_rule_posts_once_within_cooldown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alert"))
        .and(body_partial_json(json!({
            "rule": "cpu-hot",
            "metric": "cpu_usage",
            "host_id": "web-01",
            "threshold": 1.5
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let evaluator = Arc::new(ThresholdEvaluator::new(vec![cpu_rule(
        1.5,
        3600,
        format!("{}/alert", server.uri()),
    )]));

    let pipeline = Pipeline::start(
        &test_config(),
        test_sampler("web-01"),
        Arc::new(MemorySink::new()),
        Some(evaluator.clone() as Arc<dyn AlertHook>),
    );

    // CPU counts 1, 2, 3, 4: the first is below threshold, the rest are
    // above but inside the cooldown after the first firing
    for _ in 0..3 {
        pipeline.scheduler().sample_now().await.unwrap();
    }
    pipeline.shutdown().await;

    assert_eq!(evaluator.fired_count(), 1);
    assert!(evaluator.last_fired("cpu-hot").await.is_some());
    server.verify().await;
}

#[tokio::test]
async fn test_zero_cooldown_fires_every_breach() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alert"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let evaluator = Arc::new(ThresholdEvaluator::new(vec![cpu_rule(
        1.5,
        0,
        format!("{}/alert", server.uri()),
    )]));

    let pipeline = Pipeline::start(
        &test_config(),
        test_sampler("web-01"),
        Arc::new(MemorySink::new()),
        Some(evaluator.clone() as Arc<dyn AlertHook>),
    );

    for _ in 0..3 {
        pipeline.scheduler().sample_now().await.unwrap();
    }
    pipeline.shutdown().await;

    assert_eq!(evaluator.fired_count(), 3);
    server.verify().await;
}

#[tokio::test]
async fn test_failing_webhook_does_not_stop_sampling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let sink = Arc::new(MemorySink::new());
    let evaluator = Arc::new(ThresholdEvaluator::new(vec![cpu_rule(
        0.0,
        0,
        format!("{}/alert", server.uri()),
    )]));

    let pipeline = Pipeline::start(
        &test_config(),
        test_sampler("web-01"),
        sink.clone(),
        Some(evaluator.clone() as Arc<dyn AlertHook>),
    );

    for _ in 0..2 {
        pipeline.scheduler().sample_now().await.unwrap();
    }
    pipeline.shutdown().await;

    assert_eq!(sink.sample_count().await, 3);
    assert_eq!(evaluator.fired_count(), 3);
}

#[tokio::test]
async fn test_hanging_webhook_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let evaluator = ThresholdEvaluator::with_webhook_timeout(
        vec![cpu_rule(0.0, 0, format!("{}/alert", server.uri()))],
        Duration::from_millis(200),
    );

    let mut hot = sample_at("web-01", chrono::Utc::now());
    hot.cpu.usage_percent = 99.0;

    tokio::time::timeout(Duration::from_secs(5), evaluator.on_sample(Arc::new(hot)))
        .await
        .expect("webhook delivery was not bounded");
    assert_eq!(evaluator.fired_count(), 1);
}
