//! Queue statistics and administration

use crate::dto::{ApiResponse, DrainResponse, QueueStateResponse};
use actix_web::{web, HttpResponse};
use rollcall_core::AppError;
use rollcall_services::Orchestrator;
use tracing::instrument;

/// GET /api/v1/queue/stats
#[instrument(skip(orchestrator))]
pub async fn queue_stats(orchestrator: web::Data<Orchestrator>) -> Result<HttpResponse, AppError> {
    let stats = orchestrator.queue_stats().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

/// POST /api/v1/queue/pause
#[instrument(skip(orchestrator))]
pub async fn pause(orchestrator: web::Data<Orchestrator>) -> Result<HttpResponse, AppError> {
    orchestrator.pause_queue().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        QueueStateResponse { paused: true },
        "Queue paused",
    )))
}

/// POST /api/v1/queue/resume
#[instrument(skip(orchestrator))]
pub async fn resume(orchestrator: web::Data<Orchestrator>) -> Result<HttpResponse, AppError> {
    orchestrator.resume_queue().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        QueueStateResponse { paused: false },
        "Queue resumed",
    )))
}

/// POST /api/v1/queue/drain
#[instrument(skip(orchestrator))]
pub async fn drain(orchestrator: web::Data<Orchestrator>) -> Result<HttpResponse, AppError> {
    let dropped = orchestrator.drain_queue().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(DrainResponse { dropped })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/queue")
            .route("/stats", web::get().to(queue_stats))
            .route("/pause", web::post().to(pause))
            .route("/resume", web::post().to(resume))
            .route("/drain", web::post().to(drain)),
    );
}
