//! AI provider port and the values each stage produces

use async_trait::async_trait;
use rollcall_core::models::{AbsenceReason, CallContext, Language};
use serde::{Deserialize, Serialize};

use crate::error::SpeechError;

/// Output of speech-to-text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    /// Language as reported by the provider, e.g. "english" or "tw"
    pub reported_language: Option<String>,
    pub duration_seconds: Option<f64>,
}

impl Transcription {
    /// The reported language, when it is one we support
    pub fn language(&self) -> Option<Language> {
        self.reported_language.as_deref().and_then(Language::from_str)
    }
}

/// Structured reading of what the parent said
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub reason: AbsenceReason,
    pub details: Option<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub needs_follow_up: bool,
    pub detected_language: Option<String>,
}

/// Synthesized speech, base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedAudio {
    pub audio_base64: String,
    pub format: String,
    pub voice: String,
}

/// The four speech stages. Each is independent and may fail on its own.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Fetch the recording at `audio_url` and transcribe it, auto-detecting
    /// the language
    async fn transcribe(&self, audio_url: &str) -> Result<Transcription, SpeechError>;

    async fn classify(
        &self,
        text: &str,
        language: Language,
        context: &CallContext,
    ) -> Result<Classification, SpeechError>;

    /// A short acknowledgment in `language`
    async fn respond(
        &self,
        classification: &Classification,
        language: Language,
        context: &CallContext,
    ) -> Result<String, SpeechError>;

    async fn synthesize(&self, text: &str, language: Language) -> Result<SynthesizedAudio, SpeechError>;
}

/// Synthetic voice per language
pub fn voice_for(language: Language) -> &'static str {
    match language {
        Language::English => "shimmer",
        Language::Dagbani | Language::Hausa | Language::Gonja => "alloy",
        Language::Twi | Language::Ewe | Language::Ga | Language::Fante | Language::Nzema => "nova",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcription_language_mapping() {
        let t = Transcription {
            text: "Ɔyare".into(),
            reported_language: Some("akan".into()),
            duration_seconds: Some(3.2),
        };
        assert_eq!(t.language(), Some(Language::Twi));

        let t = Transcription {
            reported_language: Some("yoruba".into()),
            ..t
        };
        assert_eq!(t.language(), None);
    }

    #[test]
    fn test_voice_selection() {
        assert_eq!(voice_for(Language::English), "shimmer");
        assert_eq!(voice_for(Language::Twi), "nova");
        assert_eq!(voice_for(Language::Dagbani), "alloy");
    }
}
