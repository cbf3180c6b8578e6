//! Threshold alerts on fresh samples
//!
//! [`ThresholdEvaluator`] is the bundled [`AlertHook`]. Each rule watches one
//! metric and fires when the value is strictly above its threshold, at most
//! once per cooldown. Cooldowns are measured on sample timestamps.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, trace, warn};

use crate::MetricsSample;
use crate::actors::alert::AlertHook;
use crate::config::{AlertMetric, AlertRule, Webhook};

/// Body POSTed to a rule's webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotification {
    pub rule: String,
    pub metric: AlertMetric,
    pub value: f64,
    pub threshold: f64,
    pub host_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Current value of `metric` in a sample
///
/// Load average is the one-minute average.
pub fn metric_value(metric: AlertMetric, sample: &MetricsSample) -> f64 {
    match metric {
        AlertMetric::CpuUsage => f64::from(sample.cpu.usage_percent),
        AlertMetric::MemoryUsage => f64::from(sample.memory.usage_percent),
        AlertMetric::DiskUsage => f64::from(sample.disk.usage_percent),
        AlertMetric::LoadAverage => sample.cpu.load_average.one,
    }
}

/// Upper bound on one webhook delivery
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Evaluates alert rules against every sample
pub struct ThresholdEvaluator {
    client: Client,
    rules: Vec<AlertRule>,
    last_fired: Mutex<HashMap<String, DateTime<Utc>>>,
    fired: AtomicU64,
}

impl ThresholdEvaluator {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self::with_webhook_timeout(rules, DEFAULT_WEBHOOK_TIMEOUT)
    }

    /// A hanging webhook holds up the dispatcher for at most `timeout`
    pub fn with_webhook_timeout(rules: Vec<AlertRule>, timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            error!("failed to build webhook client, falling back to defaults: {}", e);
            Client::new()
        });

        Self {
            client,
            rules,
            last_fired: Mutex::new(HashMap::new()),
            fired: AtomicU64::new(0),
        }
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// When the named rule last fired
    pub async fn last_fired(&self, rule: &str) -> Option<DateTime<Utc>> {
        self.last_fired.lock().await.get(rule).copied()
    }

    /// Total number of alerts fired
    pub fn fired_count(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    #[instrument(skip(self, sample), fields(host = %sample.host_id))]
    async fn evaluate(&self, sample: &MetricsSample) {
        for rule in &self.rules {
            let value = metric_value(rule.metric, sample);
            if value <= rule.threshold {
                continue;
            }

            if !self.claim(rule, sample.timestamp).await {
                trace!("rule {} still cooling down", rule.name);
                continue;
            }

            self.fired.fetch_add(1, Ordering::Relaxed);

            let notification = AlertNotification {
                rule: rule.name.clone(),
                metric: rule.metric,
                value,
                threshold: rule.threshold,
                host_id: sample.host_id.clone(),
                timestamp: sample.timestamp,
                message: format!(
                    "{} on {} is {:.1}, above threshold {:.1}",
                    rule.name, sample.host_id, value, rule.threshold
                ),
            };

            warn!("alert: {}", notification.message);

            if let Some(webhook) = &rule.webhook {
                self.send_webhook_alert(webhook, &notification).await;
            }
        }
    }

    /// Record a firing unless the rule is inside its cooldown
    async fn claim(&self, rule: &AlertRule, at: DateTime<Utc>) -> bool {
        let mut last_fired = self.last_fired.lock().await;

        if let Some(previous) = last_fired.get(&rule.name) {
            let cooldown = chrono::Duration::from_std(rule.cooldown())
                .unwrap_or_else(|_| chrono::Duration::days(365));
            if at.signed_duration_since(*previous) < cooldown {
                return false;
            }
        }

        last_fired.insert(rule.name.clone(), at);
        true
    }

    async fn send_webhook_alert(&self, webhook: &Webhook, notification: &AlertNotification) {
        match self.client.post(&webhook.url).json(notification).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("sent webhook alert for rule {}", notification.rule);
                } else {
                    error!("webhook alert failed with status: {}", response.status());
                }
            }
            Err(e) => {
                error!("failed to send webhook alert: {}", e);
            }
        }
    }
}

#[async_trait]
impl AlertHook for ThresholdEvaluator {
    async fn on_sample(&self, sample: Arc<MetricsSample>) {
        self.evaluate(&sample).await;
    }
}
