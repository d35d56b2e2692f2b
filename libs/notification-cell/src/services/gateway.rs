use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use shared_config::AppConfig;

use crate::error::NotificationError;
use crate::models::{DeliveryResult, MailMessage};

/// Outbound delivery channel. Implementations never return an error; every
/// problem is folded into a [`DeliveryResult`] so the scheduler can decide
/// whether to retry.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send(&self, template_id: &str, recipient: &str, payload: &Value) -> DeliveryResult;
}

/// Maps a mail API status to a delivery result.
pub fn classify_status(status: StatusCode, body: &str) -> DeliveryResult {
    if status.is_success() {
        return DeliveryResult::Success;
    }

    let reason = format!("mail API returned {}: {}", status, body);
    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            DeliveryResult::FatalFailure(reason)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => DeliveryResult::TransientFailure(reason),
        s if s.is_server_error() => DeliveryResult::TransientFailure(reason),
        _ => DeliveryResult::FatalFailure(reason),
    }
}

#[derive(Debug)]
pub struct HttpMailGateway {
    client: Client,
    base_url: String,
    api_key: String,
    sender: String,
}

impl HttpMailGateway {
    pub fn new(config: &AppConfig) -> Result<Self, NotificationError> {
        if config.mail_api_base_url.is_empty() || config.mail_api_key.is_empty() {
            return Err(NotificationError::Configuration(
                "MAIL_API_BASE_URL and MAIL_API_KEY are required".to_string(),
            ));
        }
        Ok(Self::with_settings(&config.mail_api_base_url, &config.mail_api_key, &config.mail_sender))
    }

    pub fn with_settings(base_url: &str, api_key: &str, sender: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            sender: sender.to_string(),
        }
    }
}

#[async_trait]
impl NotificationGateway for HttpMailGateway {
    #[instrument(skip(self, payload))]
    async fn send(&self, template_id: &str, recipient: &str, payload: &Value) -> DeliveryResult {
        if !recipient.contains('@') {
            return DeliveryResult::FatalFailure(format!("invalid recipient address '{}'", recipient));
        }

        let message = MailMessage {
            from: self.sender.clone(),
            to: recipient.to_string(),
            template_id: template_id.to_string(),
            data: payload.clone(),
        };

        let url = format!("{}/v1/messages", self.base_url);
        debug!("Posting {} message to {}", template_id, url);

        let response = match self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&message)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Mail API unreachable: {}", e);
                return DeliveryResult::TransientFailure(e.to_string());
            }
        };

        let status = response.status();
        let body = if status.is_success() {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };
        classify_status(status, &body)
    }
}

/// Logs instead of sending. Used when no mail API is configured.
pub struct LogOnlyGateway;

#[async_trait]
impl NotificationGateway for LogOnlyGateway {
    async fn send(&self, template_id: &str, recipient: &str, payload: &Value) -> DeliveryResult {
        info!("Would send {} to {}: {}", template_id, recipient, payload);
        DeliveryResult::Success
    }
}
