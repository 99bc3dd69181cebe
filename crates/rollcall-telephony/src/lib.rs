//! Voice provider integration for Rollcall
//!
//! Everything that speaks the telephony provider's language lives here:
//! placing outbound calls, building the voice XML returned to webhooks,
//! parsing the form-encoded callbacks, and the spoken prompts.
//!
//! # Architecture
//!
//! ```text
//!  Worker pool ──> TelephonyClient::place_call ──> provider REST API
//!
//!  provider ──> webhook form ──> ProviderCallback ──> CallEvent
//!                                                       |
//!                                                       v
//!                                            webhook dispatcher
//!                                                       |
//!                                                       v
//!                                     IvrResponse (XML) <── prompts
//! ```

pub mod client;
pub mod events;
pub mod ivr;
pub mod phone;
pub mod prompts;

pub use client::{AfricasTalkingClient, CallRequest, PlacedCall, TelephonyClient, TelephonyError};
pub use events::{CallEvent, EventError, ProviderCallback, WebhookKind};
pub use ivr::IvrResponse;
pub use phone::{format_phone_number, validate_phone_number};

/// Provider protocol constants
pub mod constants {
    /// Path of the outbound call endpoint, relative to the voice base URL
    pub const CALL_PATH: &str = "/call";

    /// Header carrying the provider API key
    pub const API_KEY_HEADER: &str = "apiKey";

    /// Entry status the provider returns for an accepted call
    pub const STATUS_QUEUED: &str = "Queued";

    /// Seconds the caller has to press a key
    pub const DIGITS_TIMEOUT_SECS: u32 = 30;

    /// Maximum length of a voice message, in seconds
    pub const RECORD_MAX_LENGTH_SECS: u32 = 60;

    /// Key that ends digit input and recordings
    pub const FINISH_ON_KEY: &str = "#";

    /// Voice used for `<Say>`
    pub const SAY_VOICE: &str = "man";

    /// Digit that asks for a teacher instead of a reason
    pub const SPEAK_TO_TEACHER_DIGIT: char = '9';
}

/// Webhook paths the provider is pointed at
pub mod paths {
    pub const INCOMING: &str = "/api/ivr/incoming";
    pub const DTMF: &str = "/api/ivr/dtmf";
    pub const RECORDING: &str = "/api/ivr/recording";
    pub const STATUS: &str = "/api/ivr/status";

    /// Absolute callback URL for a webhook path
    pub fn callback_url(public_base_url: &str, path: &str) -> String {
        format!("{}{}", public_base_url.trim_end_matches('/'), path)
    }
}
