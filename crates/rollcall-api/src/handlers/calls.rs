//! Call handlers
//!
//! The enqueue API used by the attendance subsystem, manual call logging,
//! single-call retries and call statistics.

use crate::dto::{
    ApiResponse, BulkEnqueueRequest, BulkEnqueueResponse, EnqueueCallRequest, EnqueueResponse,
    RetryCallRequest, TimeRangeQuery,
};
use actix_web::{web, HttpResponse};
use rollcall_core::AppError;
use rollcall_services::{ManualCallRequest, Orchestrator};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Queue the first call for one absence
///
/// POST /api/v1/calls/enqueue
#[instrument(skip(orchestrator, req), fields(student_id = %req.student_id))]
pub async fn enqueue_call(
    orchestrator: web::Data<Orchestrator>,
    req: web::Json<EnqueueCallRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Enqueue validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let req = req.into_inner();
    let enqueuer = orchestrator.enqueuer();
    let opts = req.options(enqueuer.defaults());
    let job_id = enqueuer
        .enqueue_follow_up(
            &req.student_id,
            req.absence_id.as_deref(),
            req.contact,
            req.context,
            Some(opts),
        )
        .await?;

    Ok(HttpResponse::Accepted().json(ApiResponse::with_message(
        EnqueueResponse { job_id },
        "Follow-up call queued",
    )))
}

/// Queue many follow-ups; none is queued if any is invalid
///
/// POST /api/v1/calls/bulk
#[instrument(skip(orchestrator, req), fields(count = req.jobs.len()))]
pub async fn enqueue_bulk(
    orchestrator: web::Data<Orchestrator>,
    req: web::Json<BulkEnqueueRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Bulk enqueue validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let job_ids = orchestrator
        .enqueuer()
        .enqueue_bulk(req.into_inner().jobs)
        .await?;

    Ok(HttpResponse::Accepted().json(ApiResponse::success(BulkEnqueueResponse {
        count: job_ids.len(),
        job_ids,
    })))
}

/// GET /api/v1/calls/{id}
#[instrument(skip(orchestrator))]
pub async fn get_call(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let record = orchestrator.calls().get_call(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(record)))
}

/// Retry one unanswered call now, or after `delay_secs`
///
/// POST /api/v1/calls/{id}/retry
#[instrument(skip(orchestrator, body))]
pub async fn retry_call(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<Uuid>,
    body: Option<web::Json<RetryCallRequest>>,
) -> Result<HttpResponse, AppError> {
    let req = body.map(|b| b.into_inner()).unwrap_or_default();
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let call_id = path.into_inner();
    let job_id = orchestrator.retry_call(call_id, req.delay()).await?;
    info!("Retry of call {} queued as job {}", call_id, job_id);

    Ok(HttpResponse::Accepted().json(ApiResponse::with_message(
        EnqueueResponse { job_id },
        "Retry queued",
    )))
}

/// Log a call a teacher made by hand
///
/// POST /api/v1/calls/manual
#[instrument(skip(orchestrator, req))]
pub async fn record_manual_call(
    orchestrator: web::Data<Orchestrator>,
    req: web::Json<ManualCallRequest>,
) -> Result<HttpResponse, AppError> {
    let record = orchestrator.calls().record_manual_call(req.into_inner()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::with_message(record, "Manual call recorded")))
}

/// GET /api/v1/calls/stats?from=&to=
#[instrument(skip(orchestrator))]
pub async fn call_stats(
    orchestrator: web::Data<Orchestrator>,
    query: web::Query<TimeRangeQuery>,
) -> Result<HttpResponse, AppError> {
    if !query.is_valid() {
        return Err(AppError::Validation("`from` must be before `to`".to_string()));
    }
    debug!(from = ?query.from, to = ?query.to, "Call stats");

    let stats = orchestrator.calls().call_stats(query.from, query.to).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/calls")
            .route("/enqueue", web::post().to(enqueue_call))
            .route("/bulk", web::post().to(enqueue_bulk))
            .route("/manual", web::post().to(record_manual_call))
            .route("/stats", web::get().to(call_stats))
            .route("/{id}", web::get().to(get_call))
            .route("/{id}/retry", web::post().to(retry_call)),
    );
}
