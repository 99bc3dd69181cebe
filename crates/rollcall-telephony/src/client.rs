//! Outbound call placement
//!
//! [`TelephonyClient`] is the port the worker pool calls; the Africa's
//! Talking voice API is the production implementation.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use rollcall_core::{config::TelephonyConfig, models::CallProvider, AppError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::constants::{API_KEY_HEADER, CALL_PATH, STATUS_QUEUED};
use crate::phone::{format_phone_number, validate_phone_number};

/// Telephony provider errors
#[derive(Debug, Error)]
pub enum TelephonyError {
    #[error("Telephony provider not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid phone number: {0}")]
    InvalidNumber(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP error: status {0}")]
    Http(u16),

    #[error("Timeout: request took longer than {0}ms")]
    Timeout(u64),

    #[error("Call rejected by provider: {0}")]
    Rejected(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl TelephonyError {
    /// Whether retrying the same request later can succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TelephonyError::Connection(_) | TelephonyError::Timeout(_) => true,
            TelephonyError::Http(status) => *status == 429 || *status >= 500,
            TelephonyError::NotConfigured(_)
            | TelephonyError::InvalidNumber(_)
            | TelephonyError::Rejected(_)
            | TelephonyError::Parse(_) => false,
        }
    }
}

impl From<TelephonyError> for AppError {
    fn from(err: TelephonyError) -> Self {
        match err {
            TelephonyError::NotConfigured(msg) => AppError::Config(msg),
            TelephonyError::InvalidNumber(phone) => AppError::InvalidPhoneNumber(phone),
            TelephonyError::Timeout(ms) => AppError::Timeout(format!("telephony after {}ms", ms)),
            other => AppError::Telephony(other.to_string()),
        }
    }
}

/// One outbound call to place
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub to: String,
    /// Caller id override; the configured caller id is used when absent
    pub from: Option<String>,
}

impl CallRequest {
    pub fn to(phone: impl Into<String>) -> Self {
        Self {
            to: phone.into(),
            from: None,
        }
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }
}

/// A call the provider accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedCall {
    /// Opaque id the provider sends back on every webhook
    pub session_id: String,
    /// Number actually dialled, in E.164
    pub phone: String,
    pub provider: CallProvider,
}

/// Port for placing outbound calls
#[async_trait]
pub trait TelephonyClient: Send + Sync {
    async fn place_call(&self, request: &CallRequest) -> Result<PlacedCall, TelephonyError>;
}

#[derive(Debug, Deserialize)]
struct CallEntry {
    #[serde(rename = "phoneNumber", default)]
    phone_number: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(rename = "sessionId", default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallResponseBody {
    #[serde(default)]
    entries: Vec<CallEntry>,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}

impl CallResponseBody {
    /// The session id of the first accepted entry
    fn into_placed(self, phone: String) -> Result<PlacedCall, TelephonyError> {
        if let Some(msg) = self
            .error_message
            .filter(|m| !m.is_empty() && !m.eq_ignore_ascii_case("none"))
        {
            return Err(TelephonyError::Rejected(msg));
        }

        let entry = self
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| TelephonyError::Parse("response has no call entries".to_string()))?;

        let status = entry.status.unwrap_or_default();
        if status != STATUS_QUEUED {
            return Err(TelephonyError::Rejected(status));
        }

        let session_id = entry
            .session_id
            .filter(|s| !s.is_empty() && s != "None")
            .ok_or_else(|| TelephonyError::Parse("queued entry without sessionId".to_string()))?;

        Ok(PlacedCall {
            session_id,
            phone: entry.phone_number.unwrap_or(phone),
            provider: CallProvider::AfricasTalking,
        })
    }
}

/// Africa's Talking voice API client
pub struct AfricasTalkingClient {
    http_client: Client,
    base_url: String,
    username: String,
    api_key: Option<String>,
    caller_id: Option<String>,
    country_code: String,
    timeout: Duration,
}

impl AfricasTalkingClient {
    pub fn new(config: &TelephonyConfig) -> Result<Self, TelephonyError> {
        let timeout = config.timeout();
        let http_client = ClientBuilder::new()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TelephonyError::Connection(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            api_key: config.api_key.clone(),
            caller_id: config.caller_id.clone(),
            country_code: config.default_country_code.clone(),
            timeout,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn map_send_error(&self, e: reqwest::Error) -> TelephonyError {
        if e.is_timeout() {
            TelephonyError::Timeout(self.timeout.as_millis() as u64)
        } else {
            TelephonyError::Connection(e.to_string())
        }
    }
}

#[async_trait]
impl TelephonyClient for AfricasTalkingClient {
    #[instrument(skip(self), fields(to = %request.to))]
    async fn place_call(&self, request: &CallRequest) -> Result<PlacedCall, TelephonyError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| TelephonyError::NotConfigured("telephony.api_key is not set".to_string()))?;

        let from = request
            .from
            .as_deref()
            .or(self.caller_id.as_deref())
            .ok_or_else(|| TelephonyError::NotConfigured("telephony.caller_id is not set".to_string()))?;

        if !validate_phone_number(&request.to) {
            return Err(TelephonyError::InvalidNumber(request.to.clone()));
        }
        let to = format_phone_number(&request.to, &self.country_code);

        debug!("Placing call to {} from {}", to, from);

        let response = self
            .http_client
            .post(format!("{}{}", self.base_url, CALL_PATH))
            .header(API_KEY_HEADER, api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("username", self.username.as_str()),
                ("to", to.as_str()),
                ("from", from),
            ])
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            error!("Voice API HTTP error: status={}", status);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    TelephonyError::NotConfigured(format!("credentials rejected ({})", status))
                }
                _ => TelephonyError::Http(status.as_u16()),
            });
        }

        let body: CallResponseBody = response
            .json()
            .await
            .map_err(|e| TelephonyError::Parse(format!("Failed to parse call response: {}", e)))?;

        let placed = body.into_placed(to)?;
        info!("Call queued: session={} to={}", placed.session_id, placed.phone);
        Ok(placed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TelephonyConfig {
        TelephonyConfig {
            api_key: Some("test-key".to_string()),
            caller_id: Some("+233302000000".to_string()),
            ..TelephonyConfig::default()
        }
    }

    #[test]
    fn test_client_creation() {
        let client = AfricasTalkingClient::new(&config()).unwrap();
        assert_eq!(client.username(), "sandbox");
    }

    #[tokio::test]
    async fn test_missing_api_key_is_not_configured() {
        let client = AfricasTalkingClient::new(&TelephonyConfig::default()).unwrap();
        let err = client
            .place_call(&CallRequest::to("0241234567"))
            .await
            .unwrap_err();
        assert!(matches!(err, TelephonyError::NotConfigured(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_invalid_number_rejected_before_request() {
        let client = AfricasTalkingClient::new(&config()).unwrap();
        let err = client
            .place_call(&CallRequest::to("12345"))
            .await
            .unwrap_err();
        assert!(matches!(err, TelephonyError::InvalidNumber(_)));
    }

    #[test]
    fn test_parse_queued_entry() {
        let body: CallResponseBody = serde_json::from_str(
            r#"{"entries":[{"phoneNumber":"+233241234567","status":"Queued","sessionId":"ATVId_abc"}],"errorMessage":"None"}"#,
        )
        .unwrap();
        let placed = body.into_placed("+233241234567".to_string()).unwrap();
        assert_eq!(placed.session_id, "ATVId_abc");
        assert_eq!(placed.provider, CallProvider::AfricasTalking);
    }

    #[test]
    fn test_parse_rejected_entry() {
        let body: CallResponseBody = serde_json::from_str(
            r#"{"entries":[{"phoneNumber":"+233241234567","status":"InvalidPhoneNumber","sessionId":"None"}],"errorMessage":"None"}"#,
        )
        .unwrap();
        let err = body.into_placed("+233241234567".to_string()).unwrap_err();
        assert!(matches!(err, TelephonyError::Rejected(ref s) if s == "InvalidPhoneNumber"));
    }

    #[test]
    fn test_parse_error_message() {
        let body: CallResponseBody =
            serde_json::from_str(r#"{"entries":[],"errorMessage":"Invalid callerId"}"#).unwrap();
        let err = body.into_placed("+233241234567".to_string()).unwrap_err();
        assert!(matches!(err, TelephonyError::Rejected(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(TelephonyError::Timeout(15_000).is_transient());
        assert!(TelephonyError::Http(503).is_transient());
        assert!(TelephonyError::Http(429).is_transient());
        assert!(!TelephonyError::Http(400).is_transient());
        assert!(!TelephonyError::InvalidNumber("x".into()).is_transient());
    }

    #[test]
    fn test_into_app_error() {
        let app: AppError = TelephonyError::Timeout(100).into();
        assert!(matches!(app, AppError::Timeout(_)));
        let app: AppError = TelephonyError::InvalidNumber("123".into()).into();
        assert!(matches!(app, AppError::InvalidPhoneNumber(_)));
        let app: AppError = TelephonyError::Http(502).into();
        assert!(matches!(app, AppError::Telephony(_)));
    }
}
