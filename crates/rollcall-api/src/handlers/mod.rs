//! HTTP request handlers

pub mod auto_calls;
pub mod calls;
pub mod queue;
pub mod webhooks;

use actix_web::{web, HttpResponse};
use rollcall_services::Orchestrator;
use serde_json::json;

pub use auto_calls::configure as configure_auto_calls;
pub use calls::configure as configure_calls;
pub use queue::configure as configure_queue;
pub use webhooks::configure as configure_webhooks;

/// Health check endpoint
///
/// GET /api/v1/health
pub async fn health_check(orchestrator: web::Data<Orchestrator>) -> HttpResponse {
    let (status, queue) = match orchestrator.queue_stats().await {
        Ok(stats) => ("healthy", json!(stats)),
        Err(e) => ("degraded", json!({ "error": e.to_string() })),
    };

    HttpResponse::Ok().json(json!({
        "status": status,
        "service": "rollcall",
        "version": env!("CARGO_PKG_VERSION"),
        "queue": queue,
    }))
}

/// All routes: provider webhooks at `/api/ivr`, the rest under `/api/v1`
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.configure(configure_webhooks).service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health_check))
            .configure(configure_auto_calls)
            .configure(configure_calls)
            .configure(configure_queue),
    );
}
