//! Webhook events as pure transitions
//!
//! Each handler takes the current record and an event and returns the
//! updated record, the side effects to run and the reply to give the
//! provider. Nothing here touches the network or the store; the dispatcher
//! persists the record and executes the effects.
//!
//! Result changes go through [`apply_result`]. A rejected change (the call
//! already ended differently) is reported in [`Step::rejected`] while the
//! event's other fields are still merged.

use chrono::{DateTime, Utc};
use rollcall_core::{
    models::{AbsenceReason, CallCost, CallRecord, CallResult, DtmfMeaning, LanguageInfo, Recording},
    state_machine::{apply_result, TransitionError},
};
use rollcall_speech::PipelineOutcome;
use rollcall_telephony::CallEvent;

/// Confidence given to a language reported by transcription
pub const AUDIO_LANGUAGE_CONFIDENCE: f64 = 0.8;

/// Metadata key holding the provider's last raw status
pub const PROVIDER_STATUS_KEY: &str = "provider_status";

/// What to say back to the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The reason menu (also used to re-prompt)
    Menu,
    RecordingPrompt,
    ThankYou,
    /// Generated acknowledgment, then hang up
    Speak(String),
    /// Status callbacks only need an acknowledgment
    Ack,
}

/// Work for the dispatcher after the record is saved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ResolveAbsence {
        absence_id: String,
        reason: AbsenceReason,
        details: Option<String>,
    },
    RunSpeechPipeline { audio_url: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub record: CallRecord,
    pub effects: Vec<Effect>,
    pub reply: Reply,
    pub rejected: Option<TransitionError>,
}

impl Step {
    fn new(record: CallRecord, reply: Reply) -> Self {
        Self {
            record,
            effects: Vec::new(),
            reply,
            rejected: None,
        }
    }

    fn answered(&mut self, now: DateTime<Utc>) {
        if let Err(e) = apply_result(&mut self.record, CallResult::Answered, now) {
            self.rejected = Some(e);
        }
    }

    fn resolve(&mut self, reason: AbsenceReason, details: Option<String>) {
        if let Some(absence_id) = &self.record.absence_id {
            self.effects.push(Effect::ResolveAbsence {
                absence_id: absence_id.clone(),
                reason,
                details,
            });
        }
    }
}

/// Route an event to its handler
pub fn transition(event: &CallEvent, record: &CallRecord, now: DateTime<Utc>) -> Step {
    match event {
        CallEvent::Incoming { .. } => on_incoming(record),
        CallEvent::Digits { digits, .. } => on_digits(record, digits, now),
        CallEvent::Recording {
            url,
            duration_seconds,
            ..
        } => on_recording(record, url, *duration_seconds),
        CallEvent::Status {
            raw_status,
            result,
            duration_seconds,
            cost,
            ..
        } => on_status(
            record,
            raw_status.as_deref(),
            *result,
            *duration_seconds,
            cost.clone(),
            now,
        ),
    }
}

/// The parent picked up: play the menu. No result change yet.
pub fn on_incoming(record: &CallRecord) -> Step {
    Step::new(record.clone(), Reply::Menu)
}

/// A key press. Unknown keys re-prompt without touching the record.
pub fn on_digits(record: &CallRecord, digits: &str, now: DateTime<Utc>) -> Step {
    let Some(meaning) = digits.chars().next().and_then(DtmfMeaning::from_digit) else {
        return Step::new(record.clone(), Reply::Menu);
    };

    let mut updated = record.clone();
    updated.response.dtmf_input = Some(digits.to_string());
    updated.response.dtmf_meaning = Some(meaning);

    let mut step = Step::new(updated, Reply::ThankYou);
    step.answered(now);

    match meaning.as_reason() {
        Some(reason) => {
            step.record.response.reason = Some(reason);
            step.resolve(reason, None);
        }
        None => step.reply = Reply::RecordingPrompt,
    }
    step
}

/// A voice message is ready: keep the reference and hand it to speech
pub fn on_recording(record: &CallRecord, url: &str, duration_seconds: Option<i64>) -> Step {
    let mut updated = record.clone();
    updated.recording = Some(Recording {
        url: url.to_string(),
        duration_seconds,
    });

    let mut step = Step::new(updated, Reply::ThankYou);
    step.effects.push(Effect::RunSpeechPipeline {
        audio_url: url.to_string(),
    });
    step
}

/// Merge what the speech pipeline produced.
///
/// A classification, even from a run that failed at a later stage, answers
/// the call and resolves the absence. Without one the result is left alone
/// and the parent hears the generic closing.
pub fn on_speech_outcome(record: &CallRecord, outcome: &PipelineOutcome, now: DateTime<Utc>) -> Step {
    let mut step = Step::new(record.clone(), Reply::ThankYou);
    let rec = &mut step.record;

    if let Some(transcription) = &outcome.transcription {
        rec.response.transcript = Some(transcription.text.clone());
        if let Some(language) = transcription.language() {
            rec.language = LanguageInfo::detected(language, AUDIO_LANGUAGE_CONFIDENCE);
        }
    }

    if let Some(text) = &outcome.response_text {
        rec.response.ai_response = Some(text.clone());
    }

    if !outcome.success {
        let stage = outcome
            .failed_stage
            .map(|s| s.as_str())
            .unwrap_or("unknown");
        rec.set_error(
            format!("speech_{}", stage),
            outcome.error.clone().unwrap_or_default(),
        );
    }

    if let Some(classification) = &outcome.classification {
        rec.response.reason = Some(classification.reason);
        rec.response.reason_details = classification.details.clone();
        rec.response.concerns = classification.concerns.clone();
        rec.response.needs_follow_up = classification.needs_follow_up;

        step.answered(now);
        step.resolve(classification.reason, classification.details.clone());
    }

    // spoken with <Say>, so a failed synthesis still gets the text out
    if let Some(text) = &outcome.response_text {
        step.reply = Reply::Speak(text.clone());
    }
    step
}

/// Call progress or the final outcome
pub fn on_status(
    record: &CallRecord,
    raw_status: Option<&str>,
    result: Option<CallResult>,
    duration_seconds: Option<i64>,
    cost: Option<CallCost>,
    now: DateTime<Utc>,
) -> Step {
    let mut step = Step::new(record.clone(), Reply::Ack);
    let rec = &mut step.record;

    if let Some(raw) = raw_status {
        rec.metadata
            .insert(PROVIDER_STATUS_KEY.to_string(), raw.to_string());
    }
    if cost.is_some() {
        rec.cost = cost;
    }

    let Some(result) = result.filter(CallResult::is_terminal) else {
        return step;
    };

    // anchor the talk time before apply_result stamps time_answered;
    // only a connected call has talk time
    let talk_seconds = duration_seconds.filter(|_| result == CallResult::Answered);
    rec.record_ended(now, talk_seconds);
    match apply_result(rec, result, now) {
        Ok(_) => {
            if result == CallResult::Failed && rec.error.is_none() {
                rec.set_error("call_failed", raw_status.unwrap_or("failed"));
            }
        }
        Err(e) => step.rejected = Some(e),
    }
    step
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rollcall_core::models::{Language, DetectionMethod};
    use rollcall_speech::{Classification, PipelineStage, Transcription};

    fn pending() -> CallRecord {
        let mut record = CallRecord::new_attempt("s1", Some("a1".into()), "+233241234567", 1, 3);
        record.provider_session_id = Some("ATVId_1".into());
        record
    }

    #[test]
    fn test_incoming_plays_menu_without_transition() {
        let record = pending();
        let step = on_incoming(&record);
        assert_eq!(step.reply, Reply::Menu);
        assert_eq!(step.record, record);
        assert!(step.effects.is_empty());
    }

    #[test]
    fn test_digit_one_resolves_sick() {
        let now = Utc::now();
        let step = on_digits(&pending(), "1", now);

        assert_eq!(step.record.result, CallResult::Answered);
        assert_eq!(step.record.time_answered, Some(now));
        assert_eq!(step.record.response.dtmf_meaning, Some(DtmfMeaning::Sick));
        assert_eq!(step.record.response.reason, Some(AbsenceReason::Sick));
        assert_eq!(step.reply, Reply::ThankYou);
        assert_eq!(
            step.effects,
            vec![Effect::ResolveAbsence {
                absence_id: "a1".into(),
                reason: AbsenceReason::Sick,
                details: None,
            }]
        );
    }

    #[test]
    fn test_digit_nine_asks_for_recording() {
        let step = on_digits(&pending(), "9", Utc::now());
        assert_eq!(step.record.result, CallResult::Answered);
        assert_eq!(step.reply, Reply::RecordingPrompt);
        assert!(step.effects.is_empty());
    }

    #[test]
    fn test_unknown_digit_reprompts() {
        let record = pending();
        for digits in ["7", "", "*"] {
            let step = on_digits(&record, digits, Utc::now());
            assert_eq!(step.reply, Reply::Menu);
            assert_eq!(step.record, record);
        }
    }

    #[test]
    fn test_status_duration_is_derived() {
        let t0 = Utc::now();
        let ended = t0 + Duration::seconds(125);
        let step = on_status(
            &pending(),
            Some("Completed"),
            Some(CallResult::Answered),
            Some(125),
            None,
            ended,
        );

        assert_eq!(step.record.result, CallResult::Answered);
        assert_eq!(step.record.time_answered, Some(t0));
        assert_eq!(step.record.time_ended, Some(ended));
        assert_eq!(step.record.duration_seconds(), Some(125));
        assert_eq!(step.reply, Reply::Ack);
    }

    #[test]
    fn test_unanswered_status_ignores_provider_duration() {
        let now = Utc::now();
        for (raw, result) in [("Busy", CallResult::Busy), ("NotAnswered", CallResult::NoAnswer)] {
            let step = on_status(&pending(), Some(raw), Some(result), Some(18), None, now);

            assert_eq!(step.record.result, result);
            assert_eq!(step.record.time_ended, Some(now));
            assert!(step.record.time_answered.is_none());
            assert_eq!(step.record.duration_seconds(), None);
        }
    }

    #[test]
    fn test_status_after_digits_keeps_answered() {
        let answered = on_digits(&pending(), "2", Utc::now()).record;
        let step = on_status(&answered, Some("NotAnswered"), Some(CallResult::NoAnswer), None, None, Utc::now());

        assert_eq!(step.record.result, CallResult::Answered);
        assert!(matches!(step.rejected, Some(TransitionError::AlreadyTerminal { .. })));
        assert_eq!(
            step.record.metadata.get(PROVIDER_STATUS_KEY).map(String::as_str),
            Some("NotAnswered")
        );
    }

    #[test]
    fn test_progress_status_changes_nothing_but_metadata() {
        let step = on_status(&pending(), Some("Ringing"), None, None, None, Utc::now());
        assert_eq!(step.record.result, CallResult::Pending);
        assert!(step.record.time_ended.is_none());
    }

    #[test]
    fn test_failed_status_records_error() {
        let step = on_status(&pending(), Some("Failed"), Some(CallResult::Failed), None, None, Utc::now());
        assert_eq!(step.record.result, CallResult::Failed);
        assert_eq!(step.record.error.as_ref().map(|e| e.code.as_str()), Some("call_failed"));
        assert!(step.record.is_retry_eligible());
    }

    #[test]
    fn test_recording_requests_pipeline() {
        let step = on_recording(&pending(), "https://rec.example/1.mp3", Some(12));
        assert_eq!(step.record.result, CallResult::Pending);
        assert_eq!(
            step.record.recording.as_ref().map(|r| r.url.as_str()),
            Some("https://rec.example/1.mp3")
        );
        assert_eq!(
            step.effects,
            vec![Effect::RunSpeechPipeline {
                audio_url: "https://rec.example/1.mp3".into()
            }]
        );
    }

    #[test]
    fn test_transcribe_failure_leaves_result() {
        let mut record = pending();
        apply_result(&mut record, CallResult::NoAnswer, Utc::now()).unwrap();

        let outcome = PipelineOutcome {
            success: false,
            error: Some("speech provider not configured".into()),
            failed_stage: Some(PipelineStage::Transcribe),
            ..Default::default()
        };
        let step = on_speech_outcome(&record, &outcome, Utc::now());

        assert_eq!(step.record.result, CallResult::NoAnswer);
        assert_eq!(step.reply, Reply::ThankYou);
        assert!(step.effects.is_empty());
        assert_eq!(
            step.record.error.as_ref().map(|e| e.code.as_str()),
            Some("speech_transcribe")
        );
    }

    #[test]
    fn test_successful_outcome_answers_and_speaks() {
        let outcome = PipelineOutcome {
            success: true,
            language: Some(Language::Twi),
            transcription: Some(Transcription {
                text: "Ne ho nye den".into(),
                reported_language: Some("twi".into()),
                duration_seconds: Some(4.0),
            }),
            classification: Some(Classification {
                reason: AbsenceReason::Sick,
                details: Some("fever".into()),
                concerns: vec![],
                needs_follow_up: false,
                detected_language: Some("twi".into()),
            }),
            response_text: Some("Yɛda wo ase".into()),
            ..Default::default()
        };
        let step = on_speech_outcome(&pending(), &outcome, Utc::now());

        assert_eq!(step.record.result, CallResult::Answered);
        assert_eq!(step.record.language.language, Language::Twi);
        assert_eq!(step.record.language.method, DetectionMethod::AudioMl);
        assert_eq!(step.record.response.reason_details.as_deref(), Some("fever"));
        assert_eq!(step.reply, Reply::Speak("Yɛda wo ase".into()));
        assert_eq!(
            step.effects,
            vec![Effect::ResolveAbsence {
                absence_id: "a1".into(),
                reason: AbsenceReason::Sick,
                details: Some("fever".into()),
            }]
        );
    }
}
