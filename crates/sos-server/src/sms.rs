//! Outbound SMS through a third-party gateway.
//!
//! The relay itself never sends SMS. The `/send-sms` endpoint forwards
//! operator requests to whichever [`SmsGateway`] the server was built with.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sos_settings::SmsSettings;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from an SMS gateway call.
#[derive(Debug, Error)]
pub enum SmsError {
    /// The request never produced a response (DNS, TLS, timeout, ...).
    #[error("SMS gateway request failed: {0}")]
    Transport(String),
    /// The gateway answered with a non-success status.
    #[error("SMS gateway returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },
    /// The gateway answered 2xx with a body that is not JSON.
    #[error("SMS gateway response was not JSON: {0}")]
    Decode(String),
}

impl SmsError {
    /// Label for metrics.
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport_error",
            Self::Status { .. } => "gateway_error",
            Self::Decode(_) => "decode_error",
        }
    }
}

/// Something that can deliver a text message to a phone number.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    /// Send `message` to `phone`. Returns the gateway's response body.
    async fn send(&self, phone: &str, message: &str) -> Result<Value, SmsError>;
}

#[derive(Serialize)]
struct SendSmsBody<'a> {
    recipients: [&'a str; 1],
    message: &'a str,
}

/// [textbee](https://textbee.dev) device gateway.
pub struct TextbeeGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl TextbeeGateway {
    /// Build a gateway for one registered device.
    pub fn new(
        base_url: &str,
        device_id: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SmsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sos-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SmsError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/api/v1/gateway/devices/{}/send-sms",
                base_url.trim_end_matches('/'),
                device_id.trim()
            ),
            api_key: api_key.into(),
        })
    }

    /// Build from settings. Returns `Ok(None)` when credentials are absent.
    pub fn from_settings(settings: &SmsSettings) -> Result<Option<Self>, SmsError> {
        if !settings.is_configured() {
            return Ok(None);
        }
        let (Some(device_id), Some(api_key)) = (&settings.device_id, &settings.api_key) else {
            return Ok(None);
        };
        Self::new(
            &settings.base_url,
            device_id,
            api_key.trim(),
            Duration::from_millis(settings.timeout_ms),
        )
        .map(Some)
    }

    /// Fully-qualified send endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SmsGateway for TextbeeGateway {
    async fn send(&self, phone: &str, message: &str) -> Result<Value, SmsError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(&SendSmsBody {
                recipients: [phone],
                message,
            })
            .send()
            .await
            .map_err(|e| SmsError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SmsError::Transport(e.to_string()))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), body = %body, "SMS gateway rejected request");
            return Err(SmsError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(status = status.as_u16(), "SMS sent");
        serde_json::from_str(&body).map_err(|e| SmsError::Decode(e.to_string()))
    }
}
