//! Speech provider errors

use rollcall_core::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpeechError {
    /// No credentials configured; every stage degrades to this
    #[error("Speech provider unavailable: {0}")]
    Unavailable(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP error: status {0}: {1}")]
    Http(u16, String),

    #[error("Timeout: request took longer than {0}ms")]
    Timeout(u64),

    #[error("Could not fetch recording: {0}")]
    Download(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Empty response from speech provider")]
    EmptyResponse,
}

impl SpeechError {
    pub fn is_transient(&self) -> bool {
        match self {
            SpeechError::Connection(_) | SpeechError::Timeout(_) | SpeechError::Download(_) => true,
            SpeechError::Http(status, _) => *status == 429 || *status >= 500,
            SpeechError::Unavailable(_) | SpeechError::Parse(_) | SpeechError::EmptyResponse => false,
        }
    }
}

impl From<SpeechError> for AppError {
    fn from(err: SpeechError) -> Self {
        match err {
            SpeechError::Timeout(ms) => AppError::Timeout(format!("speech provider after {}ms", ms)),
            other => AppError::Speech(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_is_permanent() {
        let err = SpeechError::Unavailable("speech.api_key is not set".into());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn test_rate_limit_is_transient() {
        assert!(SpeechError::Http(429, "slow down".into()).is_transient());
        assert!(!SpeechError::Http(400, "bad".into()).is_transient());
    }

    #[test]
    fn test_timeout_maps_to_app_timeout() {
        assert!(matches!(AppError::from(SpeechError::Timeout(30_000)), AppError::Timeout(_)));
        assert!(matches!(AppError::from(SpeechError::EmptyResponse), AppError::Speech(_)));
    }
}
