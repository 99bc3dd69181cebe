//! Worker pool, job processing and call administration

mod common;

use chrono::Utc;
use common::*;
use mockall::Sequence;
use rollcall_core::{
    models::{AbsenceReason, CallProvider, CallResult, DialLease, EnqueueOptions, FollowUpJob},
    traits::{CallRecordStore, JobQueue},
    AppError,
};
use rollcall_services::{FollowUpPolicy, JobSettlement, ManualCallRequest, ProcessOutcome};
use rollcall_telephony::{PlacedCall, TelephonyError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn placed(session: &str) -> PlacedCall {
    PlacedCall {
        session_id: session.to_string(),
        phone: "+233241234567".to_string(),
        provider: CallProvider::AfricasTalking,
    }
}

async fn enqueue_one(h: &Harness) -> String {
    h.orchestrator
        .enqueuer()
        .enqueue_follow_up("s1", Some("a1"), contact("0241234567"), context(), None)
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_is_retried_with_backoff() {
    let mut telephony = MockTelephony::new();
    let mut seq = Sequence::new();
    telephony
        .expect_place_call()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(TelephonyError::Connection("connection reset".into())));
    telephony
        .expect_place_call()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(placed("ATVId_9")));

    let h = Harness::new(telephony);
    enqueue_one(&h).await;

    let first = h.workers.process_available().await.unwrap();
    assert_eq!(
        first,
        vec![JobSettlement::Retrying {
            delay: Duration::from_secs(60)
        }]
    );
    // not due before the backoff elapses
    assert!(h.workers.process_available().await.unwrap().is_empty());

    tokio::time::advance(Duration::from_secs(61)).await;
    let second = h.workers.process_available().await.unwrap();
    assert!(matches!(
        second.as_slice(),
        [JobSettlement::Completed(ProcessOutcome::Placed { session_id, .. })] if session_id == "ATVId_9"
    ));

    // the retry re-dialed the same record
    let records = h.store.find_for_absence("s1", "a1").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].provider_session_id.as_deref(), Some("ATVId_9"));
}

#[tokio::test]
async fn test_rejected_number_fails_job_and_call() {
    let mut telephony = MockTelephony::new();
    telephony
        .expect_place_call()
        .times(1)
        .returning(|_| Err(TelephonyError::Rejected("InvalidPhoneNumber".into())));

    let h = Harness::new(telephony);
    enqueue_one(&h).await;

    let settled = h.workers.process_available().await.unwrap();
    assert!(matches!(settled.as_slice(), [JobSettlement::Failed { .. }]));
    assert_eq!(h.queue.failed_jobs().len(), 1);

    let record = &h.store.find_for_absence("s1", "a1").await.unwrap()[0];
    assert_eq!(record.result, CallResult::Failed);
    assert_eq!(record.error.as_ref().map(|e| e.code.as_str()), Some("placement_failed"));
    assert!(record.time_ended.is_some());
}

#[tokio::test]
async fn test_exhausted_transient_failure_keeps_call_state() {
    let mut telephony = MockTelephony::new();
    telephony
        .expect_place_call()
        .times(1)
        .returning(|_| Err(TelephonyError::Timeout(15_000)));

    let policy = FollowUpPolicy {
        job_options: EnqueueOptions::default().with_max_attempts(1),
        ..FollowUpPolicy::default().without_delays()
    };
    let h = Harness::with_policy(telephony, policy);
    enqueue_one(&h).await;

    let settled = h.workers.process_available().await.unwrap();
    assert!(matches!(settled.as_slice(), [JobSettlement::Failed { .. }]));

    let record = &h.store.find_for_absence("s1", "a1").await.unwrap()[0];
    assert_eq!(record.result, CallResult::Pending);
    assert!(record.error.is_some());
    // no call-outcome retry for a call that was never placed
    assert!(!record.is_retry_eligible());
}

#[tokio::test]
async fn test_redelivered_job_does_not_dial_twice() {
    let mut telephony = MockTelephony::new();
    telephony
        .expect_place_call()
        .times(1)
        .returning(|_| Ok(placed("ATVId_1")));

    let h = Harness::new(telephony);
    enqueue_one(&h).await;
    enqueue_one(&h).await;

    let settled = h.workers.process_available().await.unwrap();
    assert_eq!(settled.len(), 2);
    assert!(matches!(
        settled[1],
        JobSettlement::Completed(ProcessOutcome::AlreadyPlaced { .. })
    ));
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_invalid_contact_is_refused_at_enqueue() {
    let h = Harness::new(MockTelephony::new());

    let err = h
        .orchestrator
        .enqueuer()
        .enqueue_follow_up("s1", Some("a1"), contact("0191234567"), context(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidPhoneNumber(_)));

    let bulk = vec![
        FollowUpJob {
            student_id: "s1".into(),
            absence_id: Some("a1".into()),
            contact: contact("0241234567"),
            context: context(),
        },
        FollowUpJob {
            student_id: "s2".into(),
            absence_id: Some("a2".into()),
            contact: contact("12"),
            context: context(),
        },
    ];
    let err = h.orchestrator.enqueuer().enqueue_bulk(bulk).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(h.queue.pending_jobs().is_empty());
}

#[tokio::test]
async fn test_retry_of_missing_call_fails_permanently() {
    let h = Harness::new(MockTelephony::new());
    h.orchestrator
        .enqueuer()
        .enqueue_retry(uuid::Uuid::new_v4(), Duration::ZERO)
        .await
        .unwrap();

    let settled = h.workers.process_available().await.unwrap();
    assert!(matches!(settled.as_slice(), [JobSettlement::Failed { .. }]));
}

#[tokio::test]
async fn test_worker_pool_runs_until_cancelled() {
    let h = Harness::new(accepting_telephony());
    h.attendance.add(absence("a1", "s1", vec![contact("0241234567")]));
    h.attendance.add(absence("a2", "s2", vec![contact("0501234567")]));
    h.orchestrator.trigger().run_end_of_day_sweep(school_day()).await.unwrap();

    let cancel = CancellationToken::new();
    let pool = tokio::spawn(h.workers.clone().run(cancel.clone()));

    for _ in 0..100 {
        if h.queue.stats().await.unwrap().completed == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();
    pool.await.unwrap();

    assert_eq!(h.queue.stats().await.unwrap().completed, 2);
    assert_eq!(h.store.len(), 2);
}

#[tokio::test]
async fn test_paused_queue_hands_out_nothing() {
    let h = Harness::new(MockTelephony::new());
    enqueue_one(&h).await;

    h.orchestrator.pause_queue().await.unwrap();
    assert!(h.workers.process_available().await.unwrap().is_empty());
    assert!(h.orchestrator.queue_stats().await.unwrap().paused);

    assert_eq!(h.orchestrator.drain_queue().await.unwrap(), 1);
    h.orchestrator.resume_queue().await.unwrap();
    assert!(h.workers.process_available().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_manual_call_continues_attempts_and_resolves() {
    let h = Harness::new(accepting_telephony());
    h.attendance.add(absence("a1", "s1", vec![contact("0241234567")]));
    h.orchestrator.trigger().run_end_of_day_sweep(school_day()).await.unwrap();
    h.workers.process_available().await.unwrap();
    h.webhook(
        rollcall_telephony::WebhookKind::Status,
        status_callback("ATVId_1", "Busy", None),
    )
    .await;

    let record = h
        .orchestrator
        .calls()
        .record_manual_call(ManualCallRequest {
            student_id: "s1".into(),
            absence_id: Some("a1".into()),
            phone: "0241234567".into(),
            contact_name: Some("Akosua Boateng".into()),
            result: CallResult::Answered,
            reason: Some(AbsenceReason::FamilyEmergency),
            details: Some("funeral in Kumasi".into()),
            notes: None,
            duration_seconds: Some(90),
            called_at: None,
        })
        .await
        .unwrap();

    assert_eq!(record.provider, CallProvider::Manual);
    assert_eq!(record.attempt_number, 2);
    assert_eq!(record.duration_seconds(), Some(90));

    let entry = h.attendance.entry("a1").unwrap();
    assert!(entry.follow_up_completed);
    assert_eq!(entry.reason, Some(AbsenceReason::FamilyEmergency));
    assert_eq!(entry.reason_details.as_deref(), Some("funeral in Kumasi"));

    let stats = h.orchestrator.calls().call_stats(None, None).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_result.get("answered"), Some(&1));
    assert_eq!(stats.by_result.get("busy"), Some(&1));
}

#[tokio::test]
async fn test_manual_call_must_be_final() {
    let h = Harness::new(MockTelephony::new());
    let err = h
        .orchestrator
        .calls()
        .record_manual_call(ManualCallRequest {
            student_id: "s1".into(),
            absence_id: None,
            phone: "0241234567".into(),
            contact_name: None,
            result: CallResult::Pending,
            reason: None,
            details: None,
            notes: None,
            duration_seconds: None,
            called_at: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_concurrent_jobs_for_one_absence_dial_once() {
    let telephony = SlowTelephony::new(Duration::from_millis(200));
    let h = Harness::with_client(telephony.clone(), FollowUpPolicy::default().without_delays());
    enqueue_one(&h).await;
    enqueue_one(&h).await;

    let workers = h.orchestrator.worker_pool_with(5, Duration::from_millis(10));
    let cancel = CancellationToken::new();
    let pool = tokio::spawn(workers.run(cancel.clone()));
    wait_for_completed(&h, 2).await;
    cancel.cancel();
    pool.await.unwrap();

    assert_eq!(telephony.placed(), 1);
    assert_eq!(h.queue.stats().await.unwrap().completed, 2);

    let records = h.store.find_for_absence("s1", "a1").await.unwrap();
    assert_eq!(records.len(), 1);
    // webhooks for the one dialed session still find the call
    assert_eq!(records[0].provider_session_id.as_deref(), Some("ATVId_1"));
}

#[tokio::test]
async fn test_job_holding_the_dial_lease_may_dial_again() {
    let mut telephony = MockTelephony::new();
    telephony
        .expect_place_call()
        .times(1)
        .returning(|_| Ok(placed("ATVId_4")));
    let h = Harness::new(telephony);
    let job_id = enqueue_one(&h).await;

    // a pending record left behind by this job before it could dial
    let mut stranded = rollcall_core::models::CallRecord::new_attempt(
        "s1",
        Some("a1".to_string()),
        "+233241234567",
        1,
        3,
    );
    stranded.dial_lease = Some(DialLease::new(job_id, Utc::now()));
    h.store.insert(&stranded).await.unwrap();

    let settled = h.workers.process_available().await.unwrap();
    assert!(matches!(
        settled.as_slice(),
        [JobSettlement::Completed(ProcessOutcome::Placed { call_id, .. })] if *call_id == stranded.id
    ));
}

#[tokio::test]
async fn test_live_lease_of_another_job_blocks_dialing() {
    let h = Harness::new(MockTelephony::new());
    enqueue_one(&h).await;

    let mut dialing = rollcall_core::models::CallRecord::new_attempt(
        "s1",
        Some("a1".to_string()),
        "+233241234567",
        1,
        3,
    );
    dialing.dial_lease = Some(DialLease::new("another-job", Utc::now()));
    h.store.insert(&dialing).await.unwrap();

    let settled = h.workers.process_available().await.unwrap();
    assert!(matches!(
        settled.as_slice(),
        [JobSettlement::Completed(ProcessOutcome::AlreadyPlaced { call_id })] if *call_id == dialing.id
    ));
}

#[tokio::test]
async fn test_answered_manual_call_stops_automated_retries() {
    let h = Harness::new(accepting_telephony());
    h.attendance.add(absence("a1", "s1", vec![contact("0241234567")]));
    h.orchestrator.trigger().run_end_of_day_sweep(school_day()).await.unwrap();
    h.workers.process_available().await.unwrap();
    h.webhook(
        rollcall_telephony::WebhookKind::Status,
        status_callback("ATVId_1", "NotAnswered", None),
    )
    .await;
    let first = h.store.find_by_session("ATVId_1").await.unwrap().unwrap();
    assert_eq!(first.result, CallResult::NoAnswer);

    let manual = h
        .orchestrator
        .calls()
        .record_manual_call(ManualCallRequest {
            student_id: "s1".into(),
            absence_id: Some("a1".into()),
            phone: "0241234567".into(),
            contact_name: None,
            result: CallResult::Answered,
            reason: Some(AbsenceReason::Sick),
            details: None,
            notes: None,
            duration_seconds: Some(40),
            called_at: None,
        })
        .await
        .unwrap();
    assert_eq!(manual.attempt_number, 2);

    let report = h
        .orchestrator
        .retry_sweep()
        .run(Utc::now() + chrono::Duration::hours(7))
        .await
        .unwrap();
    assert_eq!(report.scheduled, 0);
    assert_eq!(report.enqueued, 0);
    assert!(h.workers.process_available().await.unwrap().is_empty());

    // asking by hand is refused too
    let err = h
        .orchestrator
        .retry_call(first.id, Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // a retry job that was already queued does not ring the parent
    h.orchestrator
        .enqueuer()
        .enqueue_retry(first.id, Duration::ZERO)
        .await
        .unwrap();
    let settled = h.workers.process_available().await.unwrap();
    assert!(matches!(
        settled.as_slice(),
        [JobSettlement::Completed(ProcessOutcome::Skipped { .. })]
    ));

    let records = h.store.find_for_absence("s1", "a1").await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.result != CallResult::Pending));
}

#[tokio::test]
async fn test_retry_numbers_from_the_newest_attempt() {
    let h = Harness::new(accepting_telephony());
    h.attendance.add(absence("a1", "s1", vec![contact("0241234567")]));
    h.orchestrator.trigger().run_end_of_day_sweep(school_day()).await.unwrap();
    h.workers.process_available().await.unwrap();
    h.webhook(
        rollcall_telephony::WebhookKind::Status,
        status_callback("ATVId_1", "Busy", None),
    )
    .await;

    // the school tried once by hand, without reaching anyone
    h.orchestrator
        .calls()
        .record_manual_call(ManualCallRequest {
            student_id: "s1".into(),
            absence_id: Some("a1".into()),
            phone: "0241234567".into(),
            contact_name: None,
            result: CallResult::NoAnswer,
            reason: None,
            details: None,
            notes: None,
            duration_seconds: None,
            called_at: None,
        })
        .await
        .unwrap();

    let report = h
        .orchestrator
        .retry_sweep()
        .run(Utc::now() + chrono::Duration::hours(7))
        .await
        .unwrap();
    // only the manual attempt is followed up
    assert_eq!(report.scheduled, 1);
    assert_eq!(report.enqueued, 1);

    let settled = h.workers.process_available().await.unwrap();
    assert!(matches!(
        settled.as_slice(),
        [JobSettlement::Completed(ProcessOutcome::Placed { session_id, .. })] if session_id == "ATVId_2"
    ));

    let attempts: Vec<_> = h
        .store
        .find_for_absence("s1", "a1")
        .await
        .unwrap()
        .iter()
        .map(|r| (r.attempt_number, r.provider, r.result))
        .collect();
    assert_eq!(
        attempts,
        vec![
            (1, CallProvider::AfricasTalking, CallResult::Busy),
            (2, CallProvider::Manual, CallResult::NoAnswer),
            (3, CallProvider::AfricasTalking, CallResult::Pending),
        ]
    );
}
