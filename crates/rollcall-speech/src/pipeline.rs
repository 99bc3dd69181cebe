//! Four-stage speech pipeline
//!
//! Transcribe, classify, respond, synthesize. The pipeline stops at the
//! first failing stage and reports it in the outcome; it never returns an
//! error, so a webhook can always fall back to a generic reply.

use rollcall_core::models::{CallContext, Language};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::provider::{Classification, SpeechProvider, SynthesizedAudio, Transcription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Transcribe,
    Classify,
    Respond,
    Synthesize,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Transcribe => "transcribe",
            PipelineStage::Classify => "classify",
            PipelineStage::Respond => "respond",
            PipelineStage::Synthesize => "synthesize",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything the pipeline produced, up to the first failure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub failed_stage: Option<PipelineStage>,
    /// Language the later stages ran in
    pub language: Option<Language>,
    pub transcription: Option<Transcription>,
    pub classification: Option<Classification>,
    pub response_text: Option<String>,
    pub audio: Option<SynthesizedAudio>,
}

impl PipelineOutcome {
    fn fail(mut self, stage: PipelineStage, error: impl fmt::Display) -> Self {
        warn!("Speech pipeline failed at {}: {}", stage, error);
        self.success = false;
        self.failed_stage = Some(stage);
        self.error = Some(error.to_string());
        self
    }
}

pub struct SpeechPipeline {
    provider: Arc<dyn SpeechProvider>,
}

impl SpeechPipeline {
    pub fn new(provider: Arc<dyn SpeechProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn SpeechProvider> {
        &self.provider
    }

    /// Run all four stages on the recording at `audio_url`.
    ///
    /// `fallback_language` is used when transcription reports a language
    /// outside the supported set.
    #[instrument(skip(self, context))]
    pub async fn run(
        &self,
        audio_url: &str,
        fallback_language: Language,
        context: &CallContext,
    ) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();

        let transcription = match self.provider.transcribe(audio_url).await {
            Ok(t) => t,
            Err(e) => return outcome.fail(PipelineStage::Transcribe, e),
        };
        let language = transcription.language().unwrap_or(fallback_language);
        outcome.language = Some(language);
        let text = transcription.text.clone();
        outcome.transcription = Some(transcription);

        let classification = match self.provider.classify(&text, language, context).await {
            Ok(c) => c,
            Err(e) => return outcome.fail(PipelineStage::Classify, e),
        };

        let response = self.provider.respond(&classification, language, context).await;
        outcome.classification = Some(classification);
        let response_text = match response {
            Ok(r) => r,
            Err(e) => return outcome.fail(PipelineStage::Respond, e),
        };

        let audio = self.provider.synthesize(&response_text, language).await;
        outcome.response_text = Some(response_text);
        match audio {
            Ok(audio) => outcome.audio = Some(audio),
            Err(e) => return outcome.fail(PipelineStage::Synthesize, e),
        }

        info!("Speech pipeline completed in {}", language);
        outcome.success = true;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpeechError;
    use async_trait::async_trait;
    use rollcall_core::models::AbsenceReason;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted provider failing at a chosen stage
    struct ScriptedProvider {
        fail_at: Option<PipelineStage>,
        reported_language: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(fail_at: Option<PipelineStage>) -> Self {
            Self {
                fail_at,
                reported_language: Some("twi"),
                calls: AtomicUsize::new(0),
            }
        }

        fn step(&self, stage: PipelineStage) -> Result<(), SpeechError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(stage) {
                Err(SpeechError::Unavailable(format!("{} offline", stage)))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SpeechProvider for ScriptedProvider {
        async fn transcribe(&self, _audio_url: &str) -> Result<Transcription, SpeechError> {
            self.step(PipelineStage::Transcribe)?;
            Ok(Transcription {
                text: "Ɔyare".into(),
                reported_language: self.reported_language.map(str::to_string),
                duration_seconds: Some(4.0),
            })
        }

        async fn classify(
            &self,
            _text: &str,
            _language: Language,
            _context: &CallContext,
        ) -> Result<Classification, SpeechError> {
            self.step(PipelineStage::Classify)?;
            Ok(Classification {
                reason: AbsenceReason::Sick,
                details: Some("fever".into()),
                concerns: vec![],
                needs_follow_up: false,
                detected_language: Some("Twi".into()),
            })
        }

        async fn respond(
            &self,
            _classification: &Classification,
            language: Language,
            _context: &CallContext,
        ) -> Result<String, SpeechError> {
            self.step(PipelineStage::Respond)?;
            Ok(format!("reply in {}", language))
        }

        async fn synthesize(&self, _text: &str, _language: Language) -> Result<SynthesizedAudio, SpeechError> {
            self.step(PipelineStage::Synthesize)?;
            Ok(SynthesizedAudio {
                audio_base64: "AAAA".into(),
                format: "mp3".into(),
                voice: "nova".into(),
            })
        }
    }

    async fn run(provider: ScriptedProvider) -> (PipelineOutcome, usize) {
        let provider = Arc::new(provider);
        let pipeline = SpeechPipeline::new(provider.clone());
        let outcome = pipeline
            .run("https://rec/1.mp3", Language::English, &CallContext::default())
            .await;
        (outcome, provider.calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_all_stages_succeed() {
        let (outcome, calls) = run(ScriptedProvider::new(None)).await;
        assert!(outcome.success);
        assert_eq!(calls, 4);
        assert_eq!(outcome.language, Some(Language::Twi));
        assert_eq!(outcome.response_text.as_deref(), Some("reply in Twi"));
        assert!(outcome.audio.is_some());
        assert!(outcome.failed_stage.is_none());
    }

    #[tokio::test]
    async fn test_transcribe_failure_short_circuits() {
        let (outcome, calls) = run(ScriptedProvider::new(Some(PipelineStage::Transcribe))).await;
        assert!(!outcome.success);
        assert_eq!(calls, 1);
        assert_eq!(outcome.failed_stage, Some(PipelineStage::Transcribe));
        assert!(outcome.error.unwrap().contains("unavailable"));
        assert!(outcome.transcription.is_none());
        assert!(outcome.classification.is_none());
    }

    #[tokio::test]
    async fn test_late_failure_keeps_earlier_results() {
        let (outcome, calls) = run(ScriptedProvider::new(Some(PipelineStage::Synthesize))).await;
        assert!(!outcome.success);
        assert_eq!(calls, 4);
        assert_eq!(outcome.failed_stage, Some(PipelineStage::Synthesize));
        assert_eq!(outcome.classification.unwrap().reason, AbsenceReason::Sick);
        assert!(outcome.response_text.is_some());
        assert!(outcome.audio.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_language_uses_fallback() {
        let mut provider = ScriptedProvider::new(None);
        provider.reported_language = Some("yoruba");
        let (outcome, _) = run(provider).await;
        assert_eq!(outcome.language, Some(Language::English));
        assert_eq!(outcome.response_text.as_deref(), Some("reply in English"));
    }
}
