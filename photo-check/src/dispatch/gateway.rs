use crate::queue::task::{NotificationPayload, NotificationTask};
use crate::session::config::ServerSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on one relay round trip; a timeout settles the task as `error`
pub const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Message id reported when the relay accepts without naming the message
pub const ACCEPTED_WITHOUT_ID: &str = "accepted";

/// One push addressed to a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub token: String,
    pub notification: PushNotification,
    pub data: PushData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub tag: String,
    /// Re-alert even when a notification with the same tag is shown
    pub renotify: bool,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushData {
    /// Zero-based slot, as a string for push data maps
    pub photo_index: String,
}

impl PushMessage {
    pub fn from_task(task: &NotificationTask) -> Self {
        let NotificationPayload {
            title,
            body,
            slot_index,
            link,
            tag,
        } = task.payload.clone();
        Self {
            token: task.device_token.clone(),
            notification: PushNotification {
                title,
                body,
                tag,
                renotify: true,
                link,
            },
            data: PushData {
                photo_index: slot_index.index().to_string(),
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("push gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("push gateway rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Delivers pushes; returns the gateway's message id on acceptance
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<String, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// JSON POST to a push relay, authenticated with a bearer key
pub struct WebhookGateway {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl WebhookGateway {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_timeout(endpoint, api_key, RELAY_TIMEOUT)
    }

    pub fn with_timeout(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self {
            endpoint: endpoint.into(),
            api_key,
            client,
        }
    }
}

#[async_trait]
impl MessagingGateway for WebhookGateway {
    async fn send(&self, message: &PushMessage) -> Result<String, GatewayError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "message": message }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected { status, body });
        }

        // Any 2xx is an acceptance; the id is informational
        let body = response.text().await?;
        let id = serde_json::from_str::<RelayResponse>(&body)
            .ok()
            .and_then(|relay| relay.id.or(relay.name));
        Ok(id.unwrap_or_else(|| {
            debug!("relay accepted push without a message id");
            ACCEPTED_WITHOUT_ID.to_string()
        }))
    }
}

/// Logs and accepts every message; for local development without a relay
#[derive(Debug, Default)]
pub struct DryRunGateway {
    sent: AtomicU64,
}

impl DryRunGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingGateway for DryRunGateway {
    async fn send(&self, message: &PushMessage) -> Result<String, GatewayError> {
        let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            title = %message.notification.title,
            link = %message.notification.link,
            "dry-run push (not delivered)"
        );
        Ok(format!("dry-run-{}", n))
    }
}

/// Webhook gateway when a relay endpoint is configured, dry-run otherwise
pub fn gateway_from_settings(settings: &ServerSettings) -> Arc<dyn MessagingGateway> {
    match &settings.push_endpoint {
        Some(endpoint) => {
            info!(%endpoint, "delivering pushes through relay");
            Arc::new(WebhookGateway::new(endpoint.clone(), settings.push_key.clone()))
        }
        None => {
            info!("PHOTO_CHECK_PUSH_ENDPOINT not set; using dry-run gateway");
            Arc::new(DryRunGateway::new())
        }
    }
}
