//! SMS gateway transport (HTTP JSON API)

use async_trait::async_trait;
use parkwatch_api::{NotificationChannel, NotificationPayload};
use parkwatch_config::SmsConfig;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::{Transport, TransportError, TransportResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SmsRequest<'a> {
    api_key: &'a str,
    to: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender: Option<&'a str>,
}

/// Posts messages to an SMS gateway. Any non-2xx answer is a failure.
pub struct SmsTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    sender: Option<String>,
}

impl SmsTransport {
    pub fn new(config: &SmsConfig) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            sender: config.sender.clone(),
        })
    }
}

#[async_trait]
impl Transport for SmsTransport {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Sms
    }

    async fn deliver(&self, recipient: &str, payload: &NotificationPayload) -> TransportResult<()> {
        if recipient.trim().is_empty() {
            return Err(TransportError::InvalidRecipient("empty phone number".into()));
        }

        let request = SmsRequest {
            api_key: &self.api_key,
            to: recipient,
            message: &payload.body,
            sender: self.sender.as_deref(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            return Err(TransportError::Unavailable(format!("gateway answered {}", status)));
        }

        debug!(recipient = %recipient, status = %status, "SMS accepted by gateway");
        Ok(())
    }
}
