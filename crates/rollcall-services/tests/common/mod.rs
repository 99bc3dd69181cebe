//! Shared fixtures: an orchestrator over in-memory ports and a mocked
//! telephony provider

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mockall::mock;
use rollcall_core::{
    config::SpeechConfig,
    models::{
        CallContext, CallProvider, CallRecord, CallStats, EligibleAbsence, Language, ParentContact,
    },
    traits::CallRecordStore,
    AppResult,
};
use rollcall_db::{AbsenceEntry, InMemoryAttendanceGateway, InMemoryCallRecordStore};
use rollcall_queue::InMemoryJobQueue;
use rollcall_services::{FollowUpPolicy, Orchestrator, Ports, WebhookReply, WorkerPool};
use rollcall_speech::OpenAiSpeechProvider;
use rollcall_telephony::{
    CallEvent, CallRequest, PlacedCall, ProviderCallback, TelephonyClient, TelephonyError,
    WebhookKind,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

mock! {
    pub Telephony {}

    #[async_trait]
    impl TelephonyClient for Telephony {
        async fn place_call(&self, request: &CallRequest) -> Result<PlacedCall, TelephonyError>;
    }
}

/// An in-progress callback for `session`
pub fn callback(session: &str) -> ProviderCallback {
    ProviderCallback {
        session_id: Some(session.to_string()),
        is_active: Some("1".to_string()),
        direction: Some("Outbound".to_string()),
        ..Default::default()
    }
}

/// Final status callback, as the provider sends it when the call ends
pub fn status_callback(session: &str, status: &str, duration: Option<&str>) -> ProviderCallback {
    ProviderCallback {
        is_active: Some("0".to_string()),
        status: Some(status.to_string()),
        duration_in_seconds: duration.map(str::to_string),
        ..callback(session)
    }
}

pub struct Harness {
    pub store: Arc<InMemoryCallRecordStore>,
    pub attendance: Arc<InMemoryAttendanceGateway>,
    pub queue: Arc<InMemoryJobQueue>,
    pub orchestrator: Orchestrator,
    pub workers: Arc<WorkerPool>,
}

impl Harness {
    pub fn new(telephony: MockTelephony) -> Self {
        Self::with_policy(telephony, FollowUpPolicy::default().without_delays())
    }

    pub fn with_policy(telephony: MockTelephony, policy: FollowUpPolicy) -> Self {
        Self::with_client(Arc::new(telephony), policy)
    }

    pub fn with_client(telephony: Arc<dyn TelephonyClient>, policy: FollowUpPolicy) -> Self {
        Self::build(telephony, policy, Duration::ZERO)
    }

    /// Every save of a call record takes `delay`, so concurrent writers overlap
    pub fn with_paced_saves(telephony: MockTelephony, delay: Duration) -> Self {
        Self::build(
            Arc::new(telephony),
            FollowUpPolicy::default().without_delays(),
            delay,
        )
    }

    fn build(telephony: Arc<dyn TelephonyClient>, policy: FollowUpPolicy, save_delay: Duration) -> Self {
        let store = Arc::new(InMemoryCallRecordStore::new());
        let ports_store: Arc<dyn CallRecordStore> = if save_delay.is_zero() {
            store.clone()
        } else {
            Arc::new(PacedStore {
                inner: store.clone(),
                delay: save_delay,
            })
        };
        let attendance = Arc::new(InMemoryAttendanceGateway::new());
        let queue = Arc::new(InMemoryJobQueue::default());
        // no API key: every speech stage reports itself unavailable
        let speech = OpenAiSpeechProvider::new(&SpeechConfig::default())
            .expect("speech client builds");

        let orchestrator = Orchestrator::new(
            Ports {
                store: ports_store,
                attendance: attendance.clone(),
                queue: queue.clone(),
                telephony,
                speech: Arc::new(speech),
            },
            policy,
        );
        let workers = orchestrator.worker_pool_with(2, Duration::from_millis(10));

        Self {
            store,
            attendance,
            queue,
            orchestrator,
            workers,
        }
    }
}

impl Harness {
    /// Parse `callback` as the provider would deliver it and dispatch it
    pub async fn webhook(&self, kind: WebhookKind, callback: ProviderCallback) -> WebhookReply {
        let event = CallEvent::from_callback(kind, &callback).expect("valid callback");
        self.orchestrator.dispatcher().dispatch(event).await
    }
}

/// Provider that accepts every call, numbering sessions ATVId_1, ATVId_2, ...
pub fn accepting_telephony() -> MockTelephony {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut telephony = MockTelephony::new();
    telephony.expect_place_call().returning(move |request| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PlacedCall {
            session_id: format!("ATVId_{}", n),
            phone: request.to.clone(),
            provider: CallProvider::AfricasTalking,
        })
    });
    telephony
}

/// In-memory store whose saves take a while
struct PacedStore {
    inner: Arc<InMemoryCallRecordStore>,
    delay: Duration,
}

#[async_trait]
impl CallRecordStore for PacedStore {
    async fn insert(&self, record: &CallRecord) -> AppResult<CallRecord> {
        self.inner.insert(record).await
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<CallRecord>> {
        self.inner.get(id).await
    }

    async fn find_by_session(&self, session_id: &str) -> AppResult<Option<CallRecord>> {
        self.inner.find_by_session(session_id).await
    }

    async fn find_for_absence(&self, student_id: &str, absence_id: &str) -> AppResult<Vec<CallRecord>> {
        self.inner.find_for_absence(student_id, absence_id).await
    }

    async fn save(&self, record: &CallRecord) -> AppResult<CallRecord> {
        tokio::time::sleep(self.delay).await;
        self.inner.save(record).await
    }

    async fn find_retry_candidates(&self, limit: i64) -> AppResult<Vec<CallRecord>> {
        self.inner.find_retry_candidates(limit).await
    }

    async fn find_due_retries(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<CallRecord>> {
        self.inner.find_due_retries(now, limit).await
    }

    async fn call_stats(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AppResult<CallStats> {
        self.inner.call_stats(from, to).await
    }
}

/// Provider that takes `delay` to accept each call and counts them
pub struct SlowTelephony {
    pub calls: AtomicUsize,
    pub delay: Duration,
}

impl SlowTelephony {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn placed(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelephonyClient for SlowTelephony {
    async fn place_call(&self, request: &CallRequest) -> Result<PlacedCall, TelephonyError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        Ok(PlacedCall {
            session_id: format!("ATVId_{}", n),
            phone: request.to.clone(),
            provider: CallProvider::AfricasTalking,
        })
    }
}

/// Poll until the queue has completed `n` jobs, giving up after a second
pub async fn wait_for_completed(h: &Harness, n: u64) {
    use rollcall_core::traits::JobQueue;
    for _ in 0..100 {
        if h.queue.stats().await.unwrap().completed >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn school_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 13).unwrap()
}

pub fn contact(phone: &str) -> ParentContact {
    ParentContact {
        name: "Akosua Boateng".to_string(),
        phone: phone.to_string(),
        relation: Some("mother".to_string()),
        verified: true,
        opted_out: false,
        preferred_language: None,
    }
}

pub fn context() -> CallContext {
    CallContext {
        student_name: "Kwame Boateng".to_string(),
        school_name: "Adenta Community School".to_string(),
    }
}

pub fn absence(absence_id: &str, student_id: &str, contacts: Vec<ParentContact>) -> AbsenceEntry {
    AbsenceEntry::needing_follow_up(EligibleAbsence {
        absence_id: absence_id.to_string(),
        student_id: student_id.to_string(),
        date: school_day(),
        context: context(),
        contacts,
    })
}

pub fn twi_contact(phone: &str) -> ParentContact {
    ParentContact {
        preferred_language: Some(Language::Twi),
        ..contact(phone)
    }
}
