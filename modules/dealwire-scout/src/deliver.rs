use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::digest::Digest;

/// Confirmation from a delivery backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub backend: String,
    pub detail: Option<String>,
}

/// What happened to the digest after it was persisted. Delivery failures
/// never fail the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered { receipt: DeliveryReceipt },
    Failed { backend: String, error: String },
    Skipped,
}

impl DeliveryStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::Failed { .. } => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, digest: &Digest, markdown: &str) -> anyhow::Result<DeliveryReceipt>;
}

/// Accepts every digest and sends nothing.
pub struct NoopDelivery;

#[async_trait]
impl DeliveryBackend for NoopDelivery {
    fn name(&self) -> &str {
        "noop"
    }

    async fn deliver(&self, _digest: &Digest, _markdown: &str) -> anyhow::Result<DeliveryReceipt> {
        Ok(DeliveryReceipt {
            backend: self.name().to_string(),
            detail: None,
        })
    }
}

/// Incoming-webhook delivery: posts the rendered digest plus the structured
/// document as JSON.
pub struct WebhookDelivery {
    webhook_url: String,
    http: reqwest::Client,
}

impl WebhookDelivery {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }

    fn payload(digest: &Digest, markdown: &str) -> serde_json::Value {
        json!({
            "text": markdown,
            "run_id": digest.run_id,
            "is_empty": digest.is_empty,
            "digest": digest,
        })
    }
}

#[async_trait]
impl DeliveryBackend for WebhookDelivery {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, digest: &Digest, markdown: &str) -> anyhow::Result<DeliveryReceipt> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&Self::payload(digest, markdown))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Digest webhook returned non-success");
            anyhow::bail!("Digest webhook returned {status}");
        }

        Ok(DeliveryReceipt {
            backend: self.name().to_string(),
            detail: Some(resp.status().to_string()),
        })
    }
}
