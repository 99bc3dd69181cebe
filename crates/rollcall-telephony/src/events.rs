//! Provider webhook payloads
//!
//! The provider posts form-encoded callbacks with camelCase fields. They
//! are parsed leniently into [`ProviderCallback`] and then narrowed into a
//! typed [`CallEvent`] per webhook.

use rollcall_core::models::{CallCost, CallResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currency assumed when the provider reports an amount without one
pub const DEFAULT_CURRENCY: &str = "USD";

/// Raw webhook form body. Every field is optional; the provider omits
/// whatever does not apply to the callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCallback {
    pub session_id: Option<String>,
    /// "1" while the call is up, "0" on the final notification
    pub is_active: Option<String>,
    pub direction: Option<String>,
    pub caller_number: Option<String>,
    pub destination_number: Option<String>,
    pub dtmf_digits: Option<String>,
    pub recording_url: Option<String>,
    pub duration_in_seconds: Option<String>,
    pub status: Option<String>,
    pub hangup_cause: Option<String>,
    pub amount: Option<String>,
    pub currency_code: Option<String>,
}

impl ProviderCallback {
    pub fn session_id(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Final notification for a call that has ended
    pub fn is_final(&self) -> bool {
        self.is_active.as_deref().map(str::trim) == Some("0")
    }

    /// Duration in whole seconds; tolerates "12" and "12.0"
    pub fn duration_seconds(&self) -> Option<i64> {
        let raw = self.duration_in_seconds.as_deref()?.trim();
        raw.parse::<i64>()
            .ok()
            .or_else(|| raw.parse::<f64>().ok().map(|f| f.round() as i64))
            .filter(|d| *d >= 0)
    }

    /// Cost of the call when the provider reports a parsable amount
    pub fn cost(&self) -> Option<CallCost> {
        let raw = self.amount.as_deref()?.trim();
        // "KES 0.4000" style amounts carry their own currency
        let (currency, number) = match raw.split_once(' ') {
            Some((cur, num)) if cur.chars().all(|c| c.is_ascii_alphabetic()) => {
                (Some(cur.to_string()), num)
            }
            _ => (None, raw),
        };
        let amount = Decimal::from_str(number.trim()).ok()?;
        let currency = self
            .currency_code
            .clone()
            .filter(|c| !c.trim().is_empty())
            .or(currency)
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        Some(CallCost { amount, currency })
    }

    /// Canonical result from `status`, falling back to `hangupCause`
    pub fn result(&self) -> Option<CallResult> {
        self.status
            .as_deref()
            .and_then(CallResult::from_provider_status)
            .or_else(|| self.hangup_cause.as_deref().and_then(result_from_hangup_cause))
    }
}

/// Map a SIP-style hangup cause to a call result
pub fn result_from_hangup_cause(cause: &str) -> Option<CallResult> {
    match cause.trim().to_ascii_uppercase().as_str() {
        "NO_ANSWER" | "NO_USER_RESPONSE" | "ORIGINATOR_CANCEL" => Some(CallResult::NoAnswer),
        "USER_BUSY" => Some(CallResult::Busy),
        "CALL_REJECTED" => Some(CallResult::Rejected),
        "UNALLOCATED_NUMBER" | "INVALID_NUMBER_FORMAT" | "NETWORK_OUT_OF_ORDER"
        | "RECOVERY_ON_TIMER_EXPIRE" | "NORMAL_TEMPORARY_FAILURE" => Some(CallResult::Failed),
        _ => None,
    }
}

/// Which endpoint a callback arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    Incoming,
    Digits,
    Recording,
    Status,
}

impl WebhookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookKind::Incoming => "incoming",
            WebhookKind::Digits => "dtmf",
            WebhookKind::Recording => "recording",
            WebhookKind::Status => "status",
        }
    }
}

impl fmt::Display for WebhookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A webhook narrowed to what the dispatcher acts on
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// The parent picked up
    Incoming { session_id: String },
    /// A key press from the reason menu
    Digits { session_id: String, digits: String },
    /// A voice message is ready
    Recording {
        session_id: String,
        url: String,
        duration_seconds: Option<i64>,
    },
    /// Call progress or the final outcome
    Status {
        session_id: String,
        raw_status: Option<String>,
        result: Option<CallResult>,
        duration_seconds: Option<i64>,
        cost: Option<CallCost>,
    },
}

/// Why a callback could not become a [`CallEvent`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    MissingSessionId,
    MissingField(&'static str),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::MissingSessionId => write!(f, "callback has no sessionId"),
            EventError::MissingField(field) => write!(f, "callback has no {}", field),
        }
    }
}

impl std::error::Error for EventError {}

impl CallEvent {
    /// Narrow a callback received on `kind`'s endpoint.
    ///
    /// The provider sends the end-of-call notification to the voice
    /// callback too, so a final callback on the incoming endpoint becomes
    /// a status event.
    pub fn from_callback(kind: WebhookKind, callback: &ProviderCallback) -> Result<Self, EventError> {
        let session_id = callback
            .session_id()
            .ok_or(EventError::MissingSessionId)?
            .to_string();

        let event = match kind {
            WebhookKind::Incoming if !callback.is_final() => CallEvent::Incoming { session_id },
            WebhookKind::Incoming | WebhookKind::Status => CallEvent::Status {
                session_id,
                raw_status: callback.status.clone(),
                result: callback.result(),
                duration_seconds: callback.duration_seconds(),
                cost: callback.cost(),
            },
            WebhookKind::Digits => CallEvent::Digits {
                session_id,
                digits: callback
                    .dtmf_digits
                    .as_deref()
                    .map(|d| d.trim().trim_end_matches('#').to_string())
                    .unwrap_or_default(),
            },
            WebhookKind::Recording => CallEvent::Recording {
                session_id,
                url: callback
                    .recording_url
                    .clone()
                    .filter(|u| !u.trim().is_empty())
                    .ok_or(EventError::MissingField("recordingUrl"))?,
                duration_seconds: callback.duration_seconds(),
            },
        };
        Ok(event)
    }

    pub fn session_id(&self) -> &str {
        match self {
            CallEvent::Incoming { session_id }
            | CallEvent::Digits { session_id, .. }
            | CallEvent::Recording { session_id, .. }
            | CallEvent::Status { session_id, .. } => session_id,
        }
    }

    pub fn kind(&self) -> WebhookKind {
        match self {
            CallEvent::Incoming { .. } => WebhookKind::Incoming,
            CallEvent::Digits { .. } => WebhookKind::Digits,
            CallEvent::Recording { .. } => WebhookKind::Recording,
            CallEvent::Status { .. } => WebhookKind::Status,
        }
    }
}
