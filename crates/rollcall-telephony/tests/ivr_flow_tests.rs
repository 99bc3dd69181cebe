//! A call's webhooks, end to end through parsing and XML rendering

use rollcall_core::models::{CallContext, CallResult, DtmfMeaning, Language};
use rollcall_telephony::{prompts, CallEvent, ProviderCallback, WebhookKind};

fn form(json: &str) -> ProviderCallback {
    serde_json::from_str(json).expect("callback json")
}

#[test]
fn test_teacher_request_flow() {
    let context = CallContext {
        student_name: "Kofi Boateng".to_string(),
        school_name: "Ada Junior High".to_string(),
    };

    let incoming = CallEvent::from_callback(
        WebhookKind::Incoming,
        &form(r#"{"sessionId":"ATVId_9","isActive":"1","direction":"Outbound"}"#),
    )
    .unwrap();
    assert_eq!(incoming.kind(), WebhookKind::Incoming);
    let menu = prompts::menu(Language::Twi, &context, "https://rc.example").to_xml();
    assert!(menu.contains("Kofi Boateng"));

    let digits = CallEvent::from_callback(
        WebhookKind::Digits,
        &form(r#"{"sessionId":"ATVId_9","dtmfDigits":"9"}"#),
    )
    .unwrap();
    let CallEvent::Digits { digits, .. } = digits else {
        panic!("expected digits event");
    };
    let meaning = digits.chars().next().and_then(DtmfMeaning::from_digit);
    assert_eq!(meaning, Some(DtmfMeaning::SpeakToTeacher));
    assert!(meaning.unwrap().as_reason().is_none());

    let record = prompts::recording(Language::Twi, "https://rc.example").to_xml();
    assert!(record.contains("<Record "));

    let status = CallEvent::from_callback(
        WebhookKind::Status,
        &form(r#"{"sessionId":"ATVId_9","isActive":"0","status":"Completed","durationInSeconds":"64"}"#),
    )
    .unwrap();
    assert_eq!(status.session_id(), "ATVId_9");
    let CallEvent::Status { result, duration_seconds, .. } = status else {
        panic!("expected status event");
    };
    assert_eq!(result, Some(CallResult::Answered));
    assert_eq!(duration_seconds, Some(64));
}

#[test]
fn test_unknown_status_is_left_unmapped() {
    let event = CallEvent::from_callback(
        WebhookKind::Status,
        &form(r#"{"sessionId":"s","status":"Ringing"}"#),
    )
    .unwrap();
    let CallEvent::Status { result, raw_status, .. } = event else {
        panic!("expected status event");
    };
    assert_eq!(result, None);
    assert_eq!(raw_status.as_deref(), Some("Ringing"));
}
