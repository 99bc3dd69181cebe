//! OpenAI-compatible speech provider
//!
//! Whisper for transcription, a chat model for classification and the
//! spoken reply, and the speech endpoint for synthesis. Without an API key
//! every stage returns [`SpeechError::Unavailable`] without touching the
//! network.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{multipart, Client, ClientBuilder, Response};
use rollcall_core::{
    config::SpeechConfig,
    models::{AbsenceReason, CallContext, Language},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::error::SpeechError;
use crate::provider::{voice_for, Classification, SpeechProvider, SynthesizedAudio, Transcription};

const CLASSIFY_TEMPERATURE: f32 = 0.3;
const RESPOND_TEMPERATURE: f32 = 0.7;
const RESPOND_MAX_TOKENS: u32 = 150;
const SPEECH_SPEED: f32 = 0.9;
const AUDIO_FORMAT: &str = "mp3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    fn system(content: String) -> Self {
        Self {
            role: "system",
            content,
        }
    }

    fn user(content: String) -> Self {
        Self {
            role: "user",
            content,
        }
    }
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    speed: f32,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranscriptionBody {
    text: String,
    language: Option<String>,
    duration: Option<f64>,
}

/// The classifier's JSON answer; field shapes vary between runs
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassificationBody {
    reason: Option<String>,
    details: Option<String>,
    #[serde(default)]
    concerns: serde_json::Value,
    #[serde(default)]
    needs_follow_up: bool,
    detected_language: Option<String>,
}

fn concerns_list(value: serde_json::Value) -> Vec<String> {
    let keep = |s: &str| {
        let s = s.trim();
        !s.is_empty() && !s.eq_ignore_ascii_case("none") && !s.eq_ignore_ascii_case("n/a")
    };
    match value {
        serde_json::Value::String(s) if keep(&s) => vec![s.trim().to_string()],
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .filter(|s| keep(s))
            .collect(),
        _ => Vec::new(),
    }
}

/// Parse the classifier's message content
pub(crate) fn parse_classification(content: &str) -> Result<Classification, SpeechError> {
    let body: ClassificationBody = serde_json::from_str(content.trim())
        .map_err(|e| SpeechError::Parse(format!("classification is not valid JSON: {}", e)))?;

    let reason = body
        .reason
        .as_deref()
        .and_then(AbsenceReason::from_str)
        .unwrap_or(AbsenceReason::Other);

    Ok(Classification {
        reason,
        details: body.details.filter(|d| !d.trim().is_empty()),
        concerns: concerns_list(body.concerns),
        needs_follow_up: body.needs_follow_up,
        detected_language: body.detected_language,
    })
}

pub(crate) fn classification_messages(
    text: &str,
    language: Language,
    context: &CallContext,
) -> Vec<ChatMessage> {
    let system = format!(
        "You are an assistant for {school} in Ghana. You are analyzing a parent's \
         response about why their child {child} was absent from school.\n\
         The parent may speak any Ghanaian language (Twi, Ewe, Ga, Dagbani, Fante, Hausa and others) or English.\n\
         Extract the reason for the absence and categorize it as one of: \
         sick, traveling, working, family_emergency, other. Note any concerns or requests.\n\
         Respond in JSON: {{\"reason\": \"sick|traveling|working|family_emergency|other\", \
         \"details\": \"brief description\", \"concerns\": [\"...\"], \
         \"needsFollowUp\": true|false, \"detectedLanguage\": \"language name\"}}",
        school = context.school_name,
        child = context.student_name,
    );
    let user = format!(
        "Parent said: \"{}\"\n\nLanguage detected: {}\n\nAnalyze this response and extract the absence reason.",
        text, language
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub(crate) fn response_messages(
    classification: &Classification,
    language: Language,
    context: &CallContext,
) -> Vec<ChatMessage> {
    let system = format!(
        "You are a friendly assistant for {school} in Ghana, speaking to a parent about \
         their child {child} who was absent from school.\n\
         Respond in {language}. Be warm and professional. Keep it to 2-3 sentences. \
         If the child is sick, wish them well. Always thank the parent.\n\
         The parent explained: {details}\nReason category: {reason}",
        school = context.school_name,
        child = context.student_name,
        language = language,
        details = classification.details.as_deref().unwrap_or("no details"),
        reason = classification.reason,
    );
    let closing = if classification.needs_follow_up {
        "Offer to have the teacher call them"
    } else {
        "Wish the child well"
    };
    let user = format!(
        "Generate a response to the parent in {}. Acknowledge what they said, thank them \
         for letting us know, {}, and say goodbye politely.",
        language,
        closing.to_lowercase()
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// OpenAI-compatible HTTP client
pub struct OpenAiSpeechProvider {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
    transcription_model: String,
    chat_model: String,
    tts_model: String,
    timeout: Duration,
}

impl OpenAiSpeechProvider {
    pub fn new(config: &SpeechConfig) -> Result<Self, SpeechError> {
        let timeout = config.timeout();
        let http_client = ClientBuilder::new()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| SpeechError::Connection(e.to_string()))?;

        if config.api_key.is_none() {
            warn!("speech.api_key not set; speech pipeline will report unavailable");
        }

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            transcription_model: config.transcription_model.clone(),
            chat_model: config.chat_model.clone(),
            tts_model: config.tts_model.clone(),
            timeout,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str, SpeechError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| SpeechError::Unavailable("speech.api_key is not set".to_string()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_send_error(&self, e: reqwest::Error) -> SpeechError {
        if e.is_timeout() {
            SpeechError::Timeout(self.timeout.as_millis() as u64)
        } else {
            SpeechError::Connection(e.to_string())
        }
    }

    async fn check_status(response: Response) -> Result<Response, SpeechError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!("Speech provider HTTP error: status={} body={}", status, body);
        Err(SpeechError::Http(status.as_u16(), body))
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, SpeechError> {
        response
            .json()
            .await
            .map_err(|e| SpeechError::Parse(format!("Failed to parse response: {}", e)))
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: Option<u32>,
        json_mode: bool,
    ) -> Result<String, SpeechError> {
        let api_key = self.api_key()?;
        let request = ChatRequest {
            model: &self.chat_model,
            messages,
            temperature,
            max_tokens,
            response_format: json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .http_client
            .post(self.url("/chat/completions"))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let body: ChatResponse = Self::read_json(Self::check_status(response).await?).await?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(SpeechError::EmptyResponse)
    }

    async fn download(&self, audio_url: &str) -> Result<bytes::Bytes, SpeechError> {
        let response = self
            .http_client
            .get(audio_url)
            .send()
            .await
            .map_err(|e| match self.map_send_error(e) {
                SpeechError::Connection(msg) => SpeechError::Download(msg),
                other => other,
            })?;
        if !response.status().is_success() {
            return Err(SpeechError::Download(format!("status {}", response.status())));
        }
        response
            .bytes()
            .await
            .map_err(|e| SpeechError::Download(e.to_string()))
    }
}

#[async_trait]
impl SpeechProvider for OpenAiSpeechProvider {
    #[instrument(skip(self))]
    async fn transcribe(&self, audio_url: &str) -> Result<Transcription, SpeechError> {
        let api_key = self.api_key()?;
        let audio = self.download(audio_url).await?;
        debug!("Downloaded recording: {} bytes", audio.len());

        let file = multipart::Part::bytes(audio.to_vec())
            .file_name(format!("audio.{}", AUDIO_FORMAT))
            .mime_str("audio/mpeg")
            .map_err(|e| SpeechError::Parse(e.to_string()))?;
        let form = multipart::Form::new()
            .part("file", file)
            .text("model", self.transcription_model.clone())
            .text("response_format", "verbose_json");

        let response = self
            .http_client
            .post(self.url("/audio/transcriptions"))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let body: TranscriptionBody = Self::read_json(Self::check_status(response).await?).await?;

        info!(
            "Transcribed recording: language={:?} duration={:?}",
            body.language, body.duration
        );
        Ok(Transcription {
            text: body.text,
            reported_language: body.language,
            duration_seconds: body.duration,
        })
    }

    #[instrument(skip(self, text, context))]
    async fn classify(
        &self,
        text: &str,
        language: Language,
        context: &CallContext,
    ) -> Result<Classification, SpeechError> {
        let content = self
            .chat(
                classification_messages(text, language, context),
                CLASSIFY_TEMPERATURE,
                None,
                true,
            )
            .await?;
        let classification = parse_classification(&content)?;
        info!("Classified response: reason={}", classification.reason);
        Ok(classification)
    }

    #[instrument(skip(self, classification, context))]
    async fn respond(
        &self,
        classification: &Classification,
        language: Language,
        context: &CallContext,
    ) -> Result<String, SpeechError> {
        let text = self
            .chat(
                response_messages(classification, language, context),
                RESPOND_TEMPERATURE,
                Some(RESPOND_MAX_TOKENS),
                false,
            )
            .await?;
        Ok(text.trim().to_string())
    }

    #[instrument(skip(self, text))]
    async fn synthesize(&self, text: &str, language: Language) -> Result<SynthesizedAudio, SpeechError> {
        let api_key = self.api_key()?;
        let voice = voice_for(language);
        let request = SpeechRequest {
            model: &self.tts_model,
            voice,
            input: text,
            speed: SPEECH_SPEED,
            response_format: AUDIO_FORMAT,
        };

        let response = self
            .http_client
            .post(self.url("/audio/speech"))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let audio = Self::check_status(response)
            .await?
            .bytes()
            .await
            .map_err(|e| SpeechError::Parse(e.to_string()))?;
        if audio.is_empty() {
            return Err(SpeechError::EmptyResponse);
        }

        Ok(SynthesizedAudio {
            audio_base64: STANDARD.encode(&audio),
            format: AUDIO_FORMAT.to_string(),
            voice: voice.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> CallContext {
        CallContext {
            student_name: "Yaw Asante".into(),
            school_name: "Tema Community 8".into(),
        }
    }

    #[tokio::test]
    async fn test_every_stage_unavailable_without_key() {
        let provider = OpenAiSpeechProvider::new(&SpeechConfig::default()).unwrap();
        assert!(!provider.is_configured());

        let err = provider.transcribe("https://rec/1.mp3").await.unwrap_err();
        assert!(matches!(err, SpeechError::Unavailable(_)));

        let err = provider
            .classify("he is sick", Language::English, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechError::Unavailable(_)));

        let err = provider.synthesize("hello", Language::Twi).await.unwrap_err();
        assert!(matches!(err, SpeechError::Unavailable(_)));
    }

    #[test]
    fn test_parse_classification_gerund_reason() {
        let c = parse_classification(
            r#"{"reason":"traveling","details":"Went to Kumasi for a funeral","concerns":"none","needsFollowUp":false,"detectedLanguage":"Twi"}"#,
        )
        .unwrap();
        assert_eq!(c.reason, AbsenceReason::Travel);
        assert_eq!(c.details.as_deref(), Some("Went to Kumasi for a funeral"));
        assert!(c.concerns.is_empty());
        assert!(!c.needs_follow_up);
    }

    #[test]
    fn test_parse_classification_concerns_array_and_unknown_reason() {
        let c = parse_classification(
            r#"{"reason":"festival","concerns":["fees","uniform"],"needsFollowUp":true}"#,
        )
        .unwrap();
        assert_eq!(c.reason, AbsenceReason::Other);
        assert_eq!(c.concerns, vec!["fees".to_string(), "uniform".to_string()]);
        assert!(c.needs_follow_up);
    }

    #[test]
    fn test_parse_classification_rejects_prose() {
        let err = parse_classification("The child was sick.").unwrap_err();
        assert!(matches!(err, SpeechError::Parse(_)));
    }

    #[test]
    fn test_classification_prompt_carries_context() {
        let messages = classification_messages("Ɔyare", Language::Twi, &context());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("Tema Community 8"));
        assert!(messages[0].content.contains("Yaw Asante"));
        assert!(messages[1].content.contains("Language detected: Twi"));
    }

    #[test]
    fn test_response_prompt_offers_teacher_when_needed() {
        let classification = Classification {
            reason: AbsenceReason::Sick,
            details: Some("Malaria".into()),
            concerns: vec!["missed exams".into()],
            needs_follow_up: true,
            detected_language: None,
        };
        let messages = response_messages(&classification, Language::Ga, &context());
        assert!(messages[0].content.contains("Respond in Ga"));
        assert!(messages[1].content.contains("offer to have the teacher call them"));
    }
}
