//! Notification delivery for alerts

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TwilioConfig;

/// Twilio error code for "an execution is already active for this contact"
const TWILIO_EXECUTION_ACTIVE: u32 = 20409;

const TWILIO_STUDIO_URL: &str = "https://studio.twilio.com";

/// Result of a delivered notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationReceipt {
    /// Channel used ("call", "log", ...)
    pub channel: String,
    /// Provider-side identifier, if any
    pub id: Option<String>,
    /// When the notification was handed off
    pub sent_at: DateTime<Utc>,
}

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The provider already has a call in progress for this contact
    #[error("a call to this contact is already active")]
    AlreadyActive,

    /// Network failure or unexpected provider response
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete within the notification timeout
    #[error("notification timed out after {0:?}")]
    Timeout(Duration),

    /// Missing or unusable notifier settings
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Outbound notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name for logs and receipts
    fn channel(&self) -> &'static str;

    /// Deliver one message
    async fn send(&self, message: &str) -> Result<NotificationReceipt, NotifyError>;
}

/// Places calls by starting a Twilio Studio flow execution
pub struct TwilioNotifier {
    client: Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
    flow_sid: String,
    to_phone: String,
    from_phone: String,
}

impl TwilioNotifier {
    /// Create a notifier; every credential must be present
    pub fn new(config: &TwilioConfig) -> Result<Self, NotifyError> {
        fn required(value: &Option<String>, name: &str) -> Result<String, NotifyError> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
                .ok_or_else(|| NotifyError::Configuration(format!("missing twilio_config.{name}")))
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NotifyError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| TWILIO_STUDIO_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            account_sid: required(&config.account_sid, "account_sid")?,
            auth_token: required(&config.auth_token, "auth_token")?,
            flow_sid: required(&config.flow_sid, "flow_sid")?,
            to_phone: required(&config.to_phone, "to_phone")?,
            from_phone: required(&config.from_phone, "from_phone")?,
        })
    }

    fn executions_url(&self) -> String {
        format!("{}/v2/Flows/{}/Executions", self.base_url, self.flow_sid)
    }
}

#[async_trait]
impl Notifier for TwilioNotifier {
    fn channel(&self) -> &'static str {
        "call"
    }

    async fn send(&self, message: &str) -> Result<NotificationReceipt, NotifyError> {
        let parameters = serde_json::to_string(&FlowParameters {
            custom_message: message,
        })
        .map_err(|e| NotifyError::Transport(e.to_string()))?;

        debug!(flow_sid = %self.flow_sid, to = %self.to_phone, "Starting Twilio flow execution");

        let sent_at = Utc::now();
        let response = self
            .client
            .post(self.executions_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", self.to_phone.as_str()),
                ("From", self.from_phone.as_str()),
                ("Parameters", parameters.as_str()),
            ])
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let execution: ExecutionResponse = response
                .json()
                .await
                .map_err(|e| NotifyError::Transport(e.to_string()))?;

            info!(execution_sid = %execution.sid, "Twilio flow execution created");
            return Ok(NotificationReceipt {
                channel: self.channel().to_string(),
                id: Some(execution.sid),
                sent_at,
            });
        }

        let body = response.text().await.unwrap_or_default();
        let code = serde_json::from_str::<TwilioErrorBody>(&body)
            .ok()
            .and_then(|e| e.code);

        if status == StatusCode::CONFLICT || code == Some(TWILIO_EXECUTION_ACTIVE) {
            return Err(NotifyError::AlreadyActive);
        }

        Err(NotifyError::Transport(format!(
            "Twilio returned {status}: {body}"
        )))
    }
}

/// Writes messages to the log instead of calling anyone
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl LogNotifier {
    /// Create a log notifier
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn channel(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &str) -> Result<NotificationReceipt, NotifyError> {
        info!(message = %message, "Alert notification (log only)");
        Ok(NotificationReceipt {
            channel: self.channel().to_string(),
            id: None,
            sent_at: Utc::now(),
        })
    }
}

// Twilio payload types
#[derive(Debug, Serialize)]
struct FlowParameters<'a> {
    custom_message: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExecutionResponse {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    code: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn twilio_config(base_url: &str) -> TwilioConfig {
        TwilioConfig {
            account_sid: Some("AC123".to_string()),
            auth_token: Some("token".to_string()),
            flow_sid: Some("FW456".to_string()),
            to_phone: Some("+15550001111".to_string()),
            from_phone: Some("+15550002222".to_string()),
            base_url: Some(base_url.to_string()),
        }
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let mut config = twilio_config("http://localhost");
        config.flow_sid = None;
        let err = TwilioNotifier::new(&config).err().unwrap();
        assert!(matches!(err, NotifyError::Configuration(msg) if msg.contains("flow_sid")));
    }

    #[tokio::test]
    async fn test_successful_execution_returns_sid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/Flows/FW456/Executions"))
            .and(header_exists("authorization"))
            .and(body_string_contains("custom_message"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "sid": "FN789",
                "status": "active"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = TwilioNotifier::new(&twilio_config(&server.uri())).unwrap();
        let receipt = notifier.send("Profit ALERT").await.unwrap();

        assert_eq!(receipt.channel, "call");
        assert_eq!(receipt.id.as_deref(), Some("FN789"));
    }

    #[tokio::test]
    async fn test_conflict_maps_to_already_active() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "code": 20409,
                "message": "Execution already active for this contact",
                "status": 409
            })))
            .mount(&server)
            .await;

        let notifier = TwilioNotifier::new(&twilio_config(&server.uri())).unwrap();
        let err = notifier.send("hello").await.unwrap_err();
        assert!(matches!(err, NotifyError::AlreadyActive));
    }

    #[tokio::test]
    async fn test_server_error_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let notifier = TwilioNotifier::new(&twilio_config(&server.uri())).unwrap();
        let err = notifier.send("hello").await.unwrap_err();
        assert!(matches!(err, NotifyError::Transport(msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        let receipt = LogNotifier::new().send("hello").await.unwrap();
        assert_eq!(receipt.channel, "log");
        assert!(receipt.id.is_none());
    }
}
