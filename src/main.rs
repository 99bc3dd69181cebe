//! Rollcall server
//!
//! Places automated follow-up calls to the parents of absent students,
//! collects their answers over IVR and writes the reason back to the
//! attendance record. One process runs the HTTP API, the worker pool and
//! the scheduler.

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use rollcall_api::configure_api;
use rollcall_core::{
    config::AppConfig,
    traits::{AttendanceGateway, CallRecordStore, JobQueue},
};
use rollcall_db::{
    create_pool, run_migrations, InMemoryAttendanceGateway, InMemoryCallRecordStore,
    PgAttendanceGateway, PgCallRecordStore,
};
use rollcall_queue::{InMemoryJobQueue, RedisJobQueue};
use rollcall_services::{FollowUpPolicy, Orchestrator, Ports};
use rollcall_speech::OpenAiSpeechProvider;
use rollcall_telephony::AfricasTalkingClient;
use std::env;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "rollcall={lvl},rollcall_api={lvl},rollcall_services={lvl},rollcall_db={lvl},\
             rollcall_queue={lvl},rollcall_telephony={lvl},rollcall_speech={lvl},\
             actix_web=info,sqlx=warn",
            lvl = log_level
        ))
    });

    let json = env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    }
}

/// Call records and the attendance gateway: PostgreSQL when configured
async fn build_storage(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn CallRecordStore>, Arc<dyn AttendanceGateway>)> {
    if config.database.url.is_none() {
        warn!("database.url not set, using in-memory call records and attendance");
        return Ok((
            Arc::new(InMemoryCallRecordStore::new()),
            Arc::new(InMemoryAttendanceGateway::new()),
        ));
    }

    info!("Connecting to database...");
    let pool = create_pool(&config.database)
        .await
        .context("failed to create database pool")?;
    run_migrations(&pool).await.context("failed to run migrations")?;

    Ok((
        Arc::new(PgCallRecordStore::new(pool.clone())),
        Arc::new(PgAttendanceGateway::new(pool)),
    ))
}

/// The job queue: Redis when configured
async fn build_queue(config: &AppConfig) -> anyhow::Result<Arc<dyn JobQueue>> {
    let queue = &config.queue;
    match config.redis.url.as_deref() {
        Some(url) => {
            let redis = RedisJobQueue::new(
                url,
                &config.redis.key_prefix,
                queue.keep_completed,
                queue.keep_failed,
            )
            .await
            .context("failed to connect the job queue to Redis")?;
            Ok(Arc::new(redis))
        }
        None => {
            warn!("redis.url not set, jobs are kept in memory and lost on restart");
            Ok(Arc::new(InMemoryJobQueue::new(
                queue.keep_completed,
                queue.keep_failed,
            )))
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Rollcall v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("invalid configuration")?;

    let (store, attendance) = build_storage(&config).await?;
    let queue = build_queue(&config).await?;

    let telephony = AfricasTalkingClient::new(&config.telephony)
        .context("failed to build the telephony client")?;
    if config.telephony.api_key.is_none() {
        warn!("telephony.api_key not set, call placement will fail");
    }
    let speech =
        OpenAiSpeechProvider::new(&config.speech).context("failed to build the speech client")?;
    if config.speech.api_key.is_none() {
        warn!("speech.api_key not set, voice messages will not be transcribed");
    }

    let orchestrator = web::Data::new(Orchestrator::new(
        Ports {
            store,
            attendance,
            queue,
            telephony: Arc::new(telephony),
            speech: Arc::new(speech),
        },
        FollowUpPolicy::from_config(&config),
    ));

    // At-least-once: jobs a crashed process left active go back in line
    orchestrator.recover_stalled_jobs().await?;

    let cancel = CancellationToken::new();

    let workers = orchestrator.worker_pool(&config.queue);
    let worker_task = tokio::spawn(workers.run(cancel.clone()));

    let scheduler_task = if config.scheduler.enabled {
        let scheduler = orchestrator.scheduler(&config.scheduler)?;
        Some(tokio::spawn(scheduler.run(cancel.clone())))
    } else {
        info!("Scheduler disabled; sweeps run only when triggered over HTTP");
        None
    };

    let bind_addr = config.server_addr();
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, config.server.workers
    );

    let app_data = orchestrator.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_data.clone())
            .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                let error_message = err.to_string();
                actix_web::error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().json(serde_json::json!({
                        "error": "invalid_query",
                        "message": error_message
                    })),
                )
                .into()
            }))
            // Middleware
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::new("%a \"%r\" %s %b %Dms"))
            .wrap(TracingLogger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(configure_api)
    })
    .workers(config.server.workers.max(1))
    .bind(&bind_addr)?
    .run();

    // Returns once actix has handled SIGINT/SIGTERM and stopped
    let served = server.await;

    info!("HTTP server stopped, waiting for in-flight jobs");
    cancel.cancel();
    if let Err(e) = worker_task.await {
        error!("Worker pool task failed: {}", e);
    }
    if let Some(task) = scheduler_task {
        if let Err(e) = task.await {
            error!("Scheduler task failed: {}", e);
        }
    }

    served?;
    info!("Rollcall stopped");
    Ok(())
}
