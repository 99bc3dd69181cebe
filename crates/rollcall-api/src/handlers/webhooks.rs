//! Telephony provider webhooks
//!
//! The provider posts form-encoded callbacks while a call is up. Every
//! handler answers `200` with a body the provider can act on: voice XML for
//! the call-flow webhooks and `{"success": true}` for status updates. Errors
//! are logged, never returned.

use actix_web::{error::InternalError, web, HttpRequest, HttpResponse};
use rollcall_services::{Orchestrator, WebhookReply};
use rollcall_telephony::{CallEvent, ProviderCallback, WebhookKind};
use serde_json::json;
use tracing::{debug, warn};

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Render a dispatcher reply as the provider expects it
pub fn render(reply: &WebhookReply) -> HttpResponse {
    match reply.xml() {
        Some(xml) => HttpResponse::Ok().content_type(XML_CONTENT_TYPE).body(xml),
        None => HttpResponse::Ok().json(json!({ "success": true })),
    }
}

/// Which webhook a request path belongs to
fn kind_for_path(path: &str) -> WebhookKind {
    let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    match last {
        "dtmf" => WebhookKind::Digits,
        "recording" => WebhookKind::Recording,
        "status" => WebhookKind::Status,
        _ => WebhookKind::Incoming,
    }
}

/// Form parse failures still get a valid reply
fn form_config() -> web::FormConfig {
    web::FormConfig::default().error_handler(|err, req| {
        let kind = kind_for_path(req.path());
        warn!("Unreadable {} webhook body: {}", kind, err);
        InternalError::from_response(err, render(&WebhookReply::fallback(kind))).into()
    })
}

async fn handle(
    kind: WebhookKind,
    orchestrator: &Orchestrator,
    callback: ProviderCallback,
) -> HttpResponse {
    debug!(
        session_id = ?callback.session_id,
        status = ?callback.status,
        "{} webhook",
        kind
    );

    let reply = match CallEvent::from_callback(kind, &callback) {
        Ok(event) => orchestrator.dispatcher().dispatch(event).await,
        Err(e) => {
            warn!("Rejected {} webhook: {}", kind, e);
            WebhookReply::fallback(kind)
        }
    };
    render(&reply)
}

/// POST /api/ivr/incoming
pub async fn incoming(
    orchestrator: web::Data<Orchestrator>,
    form: web::Form<ProviderCallback>,
) -> HttpResponse {
    handle(WebhookKind::Incoming, &orchestrator, form.into_inner()).await
}

/// POST /api/ivr/dtmf
pub async fn dtmf(
    orchestrator: web::Data<Orchestrator>,
    form: web::Form<ProviderCallback>,
) -> HttpResponse {
    handle(WebhookKind::Digits, &orchestrator, form.into_inner()).await
}

/// POST /api/ivr/recording
pub async fn recording(
    orchestrator: web::Data<Orchestrator>,
    form: web::Form<ProviderCallback>,
) -> HttpResponse {
    handle(WebhookKind::Recording, &orchestrator, form.into_inner()).await
}

/// POST /api/ivr/status
pub async fn status(
    orchestrator: web::Data<Orchestrator>,
    form: web::Form<ProviderCallback>,
) -> HttpResponse {
    handle(WebhookKind::Status, &orchestrator, form.into_inner()).await
}

/// Unmatched methods on the webhook scope
async fn not_allowed(req: HttpRequest) -> HttpResponse {
    render(&WebhookReply::fallback(kind_for_path(req.path())))
}

/// Mounted at `/api/ivr`
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/ivr")
            .app_data(form_config())
            .route("/incoming", web::post().to(incoming))
            .route("/dtmf", web::post().to(dtmf))
            .route("/recording", web::post().to(recording))
            .route("/status", web::post().to(status))
            .default_service(web::to(not_allowed)),
    );
}
