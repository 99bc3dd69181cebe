//! Provider webhook dispatcher
//!
//! Finds the call a webhook belongs to, runs the pure transition under the
//! session's lock, persists the result and executes the side effects. It
//! never fails: every path ends in a reply the provider can use.

use chrono::Utc;
use rollcall_core::{
    models::{AbsenceReason, CallRecord, Language},
    traits::{AttendanceGateway, CallRecordStore},
    AppError, AppResult,
};
use rollcall_speech::SpeechPipeline;
use rollcall_telephony::{prompts, CallEvent, IvrResponse, WebhookKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::locks::SessionLocks;
use crate::records::update_with_retry;
use crate::transitions::{self, Effect, Reply, Step};

/// How long an unknown session is looked up again before giving up. A
/// status callback can beat the worker that stores the session id.
pub const DEFAULT_SESSION_GRACE: Duration = Duration::from_secs(2);

const SESSION_POLL: Duration = Duration::from_millis(200);

/// Body to send back to the provider
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookReply {
    Voice(IvrResponse),
    Ack,
}

impl WebhookReply {
    /// What to answer when the call cannot be handled
    pub fn fallback(kind: WebhookKind) -> Self {
        match kind {
            WebhookKind::Status => WebhookReply::Ack,
            _ => WebhookReply::Voice(prompts::fallback()),
        }
    }

    pub fn xml(&self) -> Option<String> {
        match self {
            WebhookReply::Voice(ivr) => Some(ivr.to_xml()),
            WebhookReply::Ack => None,
        }
    }
}

pub struct WebhookDispatcher {
    store: Arc<dyn CallRecordStore>,
    attendance: Arc<dyn AttendanceGateway>,
    pipeline: Arc<SpeechPipeline>,
    locks: SessionLocks,
    public_base_url: String,
    session_grace: Duration,
}

impl WebhookDispatcher {
    pub fn new(
        store: Arc<dyn CallRecordStore>,
        attendance: Arc<dyn AttendanceGateway>,
        pipeline: Arc<SpeechPipeline>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            attendance,
            pipeline,
            locks: SessionLocks::new(),
            public_base_url: public_base_url.into(),
            session_grace: DEFAULT_SESSION_GRACE,
        }
    }

    pub fn with_session_grace(mut self, grace: Duration) -> Self {
        self.session_grace = grace;
        self
    }

    /// Handle one webhook event
    #[instrument(skip(self, event), fields(session_id = %event.session_id(), kind = %event.kind()))]
    pub async fn dispatch(&self, event: CallEvent) -> WebhookReply {
        let kind = event.kind();
        match self.try_dispatch(&event).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                warn!("Webhook {} for unknown session {}", kind, event.session_id());
                WebhookReply::fallback(kind)
            }
            Err(e) => {
                error!("Webhook {} for session {} failed: {}", kind, event.session_id(), e);
                WebhookReply::fallback(kind)
            }
        }
    }

    async fn try_dispatch(&self, event: &CallEvent) -> AppResult<Option<WebhookReply>> {
        let session_id = event.session_id();
        if self.find_session(session_id).await?.is_none() {
            return Ok(None);
        }

        let mut guard = Some(self.locks.lock(session_id).await);
        // re-read under the lock; the pre-check copy may be stale
        let Some(record) = self.store.find_by_session(session_id).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let (saved, step) = update_with_retry(self.store.as_ref(), record, |r| {
            let step = transitions::transition(event, r, now);
            (step.record.clone(), step)
        })
        .await?;
        self.log_rejected(&saved, &step);

        let mut reply = step.reply.clone();
        let mut record = saved;
        for effect in step.effects {
            match effect {
                Effect::ResolveAbsence {
                    absence_id,
                    reason,
                    details,
                } => self.resolve(&absence_id, reason, details.as_deref()).await,
                Effect::RunSpeechPipeline { audio_url } => {
                    // the pipeline is slow; other webhooks for this call may proceed
                    guard.take();
                    let (after, speech_reply) = self.run_speech(record.clone(), &audio_url).await?;
                    record = after;
                    reply = speech_reply;
                }
            }
        }
        drop(guard);

        Ok(Some(self.render(reply, &record)))
    }

    /// Look the session up, waiting out the grace period once
    async fn find_session(&self, session_id: &str) -> AppResult<Option<CallRecord>> {
        let mut waited = Duration::ZERO;
        loop {
            if let Some(record) = self.store.find_by_session(session_id).await? {
                return Ok(Some(record));
            }
            if waited >= self.session_grace {
                return Ok(None);
            }
            let pause = SESSION_POLL.min(self.session_grace - waited);
            tokio::time::sleep(pause).await;
            waited += pause;
        }
    }

    async fn run_speech(&self, record: CallRecord, audio_url: &str) -> AppResult<(CallRecord, Reply)> {
        let outcome = self
            .pipeline
            .run(audio_url, record.language.language, &record.context)
            .await;

        let session_id = record.provider_session_id.clone().unwrap_or_default();
        let _guard = self.locks.lock(&session_id).await;
        let current = self
            .store
            .get(record.id)
            .await?
            .ok_or_else(|| AppError::CallRecordNotFound(record.id.to_string()))?;

        let now = Utc::now();
        let (saved, step) = update_with_retry(self.store.as_ref(), current, |r| {
            let step = transitions::on_speech_outcome(r, &outcome, now);
            (step.record.clone(), step)
        })
        .await?;
        self.log_rejected(&saved, &step);

        for effect in step.effects {
            if let Effect::ResolveAbsence {
                absence_id,
                reason,
                details,
            } = effect
            {
                self.resolve(&absence_id, reason, details.as_deref()).await;
            }
        }
        Ok((saved, step.reply))
    }

    async fn resolve(
        &self,
        absence_id: &str,
        reason: AbsenceReason,
        details: Option<&str>,
    ) {
        match self.attendance.record_resolution(absence_id, reason, details).await {
            Ok(()) => info!("Absence {} resolved as {}", absence_id, reason),
            Err(e) => error!("Failed to record resolution of absence {}: {}", absence_id, e),
        }
    }

    fn log_rejected(&self, record: &CallRecord, step: &Step) {
        if let Some(rejected) = &step.rejected {
            info!("Call {} kept its result: {}", record.id, rejected);
        }
    }

    fn render(&self, reply: Reply, record: &CallRecord) -> WebhookReply {
        let language: Language = record.language.language;
        let ivr = match reply {
            Reply::Ack => return WebhookReply::Ack,
            Reply::Menu => prompts::menu(language, &record.context, &self.public_base_url),
            Reply::RecordingPrompt => prompts::recording(language, &self.public_base_url),
            Reply::ThankYou => prompts::thank_you(language),
            Reply::Speak(text) => IvrResponse::goodbye(text),
        };
        WebhookReply::Voice(ivr)
    }
}
