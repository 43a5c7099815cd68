//! # Alert Dispatch
//!
//! Threshold alerts are delivered to an external webhook through a background
//! queue rather than inline from guard code: enqueueing never blocks a
//! request, and webhook failures are retried a bounded number of times and
//! then dropped with a log line. Delivery has no effect on any request's
//! outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::config::MonitoringConfig;

/// One alert payload POSTed to the webhook
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    /// Which threshold fired (e.g. `auth_failures`)
    pub kind: String,

    /// Human-readable summary
    pub message: String,

    /// Observed counter value at firing time
    pub value: u64,

    /// The configured threshold that was crossed
    pub threshold: u64,

    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: impl Into<String>, message: impl Into<String>, value: u64, threshold: u64) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            value,
            threshold,
            timestamp: Utc::now(),
        }
    }
}

/// Cheap cloneable handle for enqueueing alerts
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    tx: Option<mpsc::Sender<Alert>>,
}

impl AlertDispatcher {
    /// Build the dispatcher and spawn its delivery worker. Without a webhook
    /// URL the dispatcher is inert: alerts are logged and discarded.
    pub fn new(config: &MonitoringConfig) -> Self {
        let Some(url) = config.webhook_url.clone() else {
            return Self { tx: None };
        };

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(delivery_worker(
            url,
            rx,
            config.webhook_timeout,
            config.webhook_retries,
        ));
        Self { tx: Some(tx) }
    }

    /// A dispatcher that drops everything, for tests and minimal setups
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Fire-and-forget enqueue. A full queue drops the alert; request
    /// handling must never wait on the sink.
    pub fn dispatch(&self, alert: Alert) {
        match &self.tx {
            Some(tx) => {
                if let Err(err) = tx.try_send(alert) {
                    warn!("alert queue full, dropping alert: {}", err);
                }
            }
            None => debug!(kind = %alert.kind, "alert webhook not configured, dropping alert"),
        }
    }
}

async fn delivery_worker(
    url: String,
    mut rx: mpsc::Receiver<Alert>,
    timeout: std::time::Duration,
    retries: u32,
) {
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(err) => {
            warn!("failed to build alert HTTP client: {}", err);
            return;
        }
    };

    while let Some(alert) = rx.recv().await {
        let mut delivered = false;
        for attempt in 1..=retries.max(1) {
            match client.post(&url).json(&alert).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(kind = %alert.kind, attempt, "alert delivered");
                    delivered = true;
                    break;
                }
                Ok(response) => {
                    warn!(
                        kind = %alert.kind,
                        attempt,
                        status = %response.status(),
                        "alert webhook returned error status"
                    );
                }
                Err(err) => {
                    warn!(kind = %alert.kind, attempt, "alert delivery failed: {}", err);
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
        }
        if !delivered {
            warn!(kind = %alert.kind, "alert dropped after {} attempts", retries.max(1));
        }
    }
}
