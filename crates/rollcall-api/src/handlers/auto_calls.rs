//! Manual triggers for the scheduled sweeps, and follow-up statistics

use crate::dto::{ApiResponse, DateQuery};
use actix_web::{web, HttpResponse};
use chrono::Utc;
use rollcall_core::AppError;
use rollcall_services::Orchestrator;
use tracing::{info, instrument};

/// Run the end-of-day sweep now
///
/// POST /api/v1/auto-calls/process-followups
///
/// The school day comes from the `date` field of an optional JSON body, or
/// the `?date=` query; today when neither is given.
#[instrument(skip(orchestrator, body))]
pub async fn process_followups(
    orchestrator: web::Data<Orchestrator>,
    query: web::Query<DateQuery>,
    body: Option<web::Json<DateQuery>>,
) -> Result<HttpResponse, AppError> {
    let date = body
        .and_then(|b| b.date)
        .unwrap_or_else(|| query.date_or_today());

    info!("Manual follow-up sweep requested for {}", date);
    let report = orchestrator.trigger().run_end_of_day_sweep(date).await?;

    let message = format!(
        "{} queued, {} skipped, {} failed",
        report.successful, report.skipped, report.failed
    );
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(report, message)))
}

/// Run the retry sweep now
///
/// POST /api/v1/auto-calls/process-retries
#[instrument(skip(orchestrator))]
pub async fn process_retries(orchestrator: web::Data<Orchestrator>) -> Result<HttpResponse, AppError> {
    let report = orchestrator.retry_sweep().run(Utc::now()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

/// GET /api/v1/auto-calls/stats?date=
#[instrument(skip(orchestrator))]
pub async fn followup_stats(
    orchestrator: web::Data<Orchestrator>,
    query: web::Query<DateQuery>,
) -> Result<HttpResponse, AppError> {
    let stats = orchestrator.follow_up_stats(query.date_or_today()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auto-calls")
            .route("/process-followups", web::post().to(process_followups))
            .route("/process-retries", web::post().to(process_retries))
            .route("/stats", web::get().to(followup_stats)),
    );
}
