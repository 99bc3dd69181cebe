//! Redis-backed job queue
//!
//! Jobs survive process restarts. A job popped by a worker sits in the
//! active set until it is completed, failed or put back; jobs found active
//! at start-up belonged to a dead process and are returned to waiting, so
//! delivery is at-least-once.

use async_trait::async_trait;
use chrono::Utc;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError, Script};
use rollcall_core::{
    models::{EnqueueOptions, JobPayload, QueueStats, QueuedJob},
    traits::JobQueue,
    AppError, AppResult,
};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::keys::{waiting_score, QueueKeys, MAX_PRIORITY, PRIORITY_SPAN};

/// Moves due delayed jobs to waiting, then pops the best waiting job into
/// the active set and returns its body.
///
/// KEYS: delayed, waiting, active, paused
/// ARGV: now_ms, job key prefix, priority span, max priority
const RESERVE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[4]) == 1 then
  return false
end

local now = tonumber(ARGV[1])
local span = tonumber(ARGV[3])
local max_priority = tonumber(ARGV[4])

local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', now, 'WITHSCORES', 'LIMIT', 0, 100)
for i = 1, #due, 2 do
  local id = due[i]
  local ready = tonumber(due[i + 1])
  local priority = 0
  local body = redis.call('GET', ARGV[2] .. id)
  if body then
    local ok, job = pcall(cjson.decode, body)
    if ok and job['opts'] and job['opts']['priority'] then
      priority = math.min(tonumber(job['opts']['priority']), max_priority)
    end
  end
  redis.call('ZREM', KEYS[1], id)
  redis.call('ZADD', KEYS[2], priority * span + ready, id)
end

while true do
  local popped = redis.call('ZPOPMIN', KEYS[2])
  if #popped == 0 then
    return false
  end
  local id = popped[1]
  local body = redis.call('GET', ARGV[2] .. id)
  if body then
    redis.call('ZADD', KEYS[3], now, id)
    return body
  end
end
"#;

/// Redis job queue with connection pooling
#[derive(Clone)]
pub struct RedisJobQueue {
    manager: ConnectionManager,
    keys: QueueKeys,
    keep_completed: usize,
    keep_failed: usize,
    reserve_script: Script,
}

impl RedisJobQueue {
    /// Connect to Redis
    ///
    /// # Errors
    ///
    /// Returns `AppError::QueueConnection` if the connection fails
    pub async fn new(
        url: &str,
        key_prefix: &str,
        keep_completed: usize,
        keep_failed: usize,
    ) -> Result<Self, AppError> {
        debug!("Connecting to Redis at {}", url);

        let client = Client::open(url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            AppError::QueueConnection(format!("Invalid Redis URL: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to establish Redis connection: {}", e);
            AppError::QueueConnection(format!("Connection failed: {}", e))
        })?;

        info!("Job queue connected to Redis (prefix {})", key_prefix);
        Ok(Self {
            manager,
            keys: QueueKeys::new(key_prefix),
            keep_completed: keep_completed.max(1),
            keep_failed: keep_failed.max(1),
            reserve_script: Script::new(RESERVE_SCRIPT),
        })
    }

    /// Ping the Redis server to check connectivity
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    /// Convert RedisError to AppError
    fn map_redis_error(err: RedisError) -> AppError {
        match err.kind() {
            redis::ErrorKind::IoError => {
                error!("Redis I/O error: {}", err);
                AppError::QueueConnection(format!("I/O error: {}", err))
            }
            redis::ErrorKind::TypeError => {
                warn!("Redis type error: {}", err);
                AppError::Queue(format!("Type mismatch: {}", err))
            }
            _ => {
                error!("Redis error: {}", err);
                AppError::Queue(err.to_string())
            }
        }
    }

    fn encode(job: &QueuedJob) -> AppResult<String> {
        serde_json::to_string(job).map_err(|e| {
            error!("Failed to serialize job {}: {}", job.id, e);
            AppError::Serialization(format!("Job serialization failed: {}", e))
        })
    }

    fn decode(body: &str) -> AppResult<QueuedJob> {
        serde_json::from_str(body).map_err(|e| {
            error!("Failed to deserialize job body: {}", e);
            AppError::Serialization(format!("Job deserialization failed: {}", e))
        })
    }

    /// Add the commands that place a new job into `pipe`
    fn push_enqueue(&self, pipe: &mut redis::Pipeline, job: &QueuedJob) -> AppResult<()> {
        let body = Self::encode(job)?;
        let now_ms = Utc::now().timestamp_millis();

        pipe.set(self.keys.job(&job.id), body).ignore();
        if job.opts.delay_ms > 0 {
            let due_ms = now_ms + job.opts.delay_ms as i64;
            pipe.zadd(self.keys.delayed(), &job.id, due_ms).ignore();
        } else {
            pipe.zadd(
                self.keys.waiting(),
                &job.id,
                waiting_score(job.opts.priority, now_ms),
            )
            .ignore();
        }
        Ok(())
    }

    /// Move a finished job from active into a capped history list
    async fn finish(&self, job: &QueuedJob, list: String, keep: usize) -> AppResult<()> {
        let body = Self::encode(job)?;
        let mut conn = self.manager.clone();

        let _: () = redis::pipe()
            .atomic()
            .zrem(self.keys.active(), &job.id)
            .ignore()
            .del(self.keys.job(&job.id))
            .ignore()
            .lpush(&list, body)
            .ignore()
            .ltrim(&list, 0, keep as isize - 1)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;

        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    #[instrument(skip(self, payload), fields(kind = %payload.kind()))]
    async fn enqueue(&self, payload: JobPayload, opts: EnqueueOptions) -> AppResult<String> {
        let job = QueuedJob::new(payload, opts);
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.push_enqueue(&mut pipe, &job)?;

        let mut conn = self.manager.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;

        debug!("Enqueued {} job {}", job.kind(), job.id);
        Ok(job.id)
    }

    #[instrument(skip(self, jobs), fields(count = jobs.len()))]
    async fn enqueue_bulk(&self, jobs: Vec<(JobPayload, EnqueueOptions)>) -> AppResult<Vec<String>> {
        let jobs: Vec<QueuedJob> = jobs
            .into_iter()
            .map(|(payload, opts)| QueuedJob::new(payload, opts))
            .collect();

        let mut pipe = redis::pipe();
        pipe.atomic();
        for job in &jobs {
            self.push_enqueue(&mut pipe, job)?;
        }

        let mut conn = self.manager.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;

        info!("Bulk enqueued {} jobs", jobs.len());
        Ok(jobs.into_iter().map(|j| j.id).collect())
    }

    async fn reserve(&self) -> AppResult<Option<QueuedJob>> {
        let mut conn = self.manager.clone();
        let now_ms = Utc::now().timestamp_millis();

        let body: Option<String> = self
            .reserve_script
            .key(self.keys.delayed())
            .key(self.keys.waiting())
            .key(self.keys.active())
            .key(self.keys.paused())
            .arg(now_ms)
            .arg(self.keys.job_prefix())
            .arg(PRIORITY_SPAN)
            .arg(MAX_PRIORITY)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;

        let Some(body) = body else {
            return Ok(None);
        };

        let mut job = Self::decode(&body)?;
        job.attempts_made += 1;

        let _: () = conn
            .set(self.keys.job(&job.id), Self::encode(&job)?)
            .await
            .map_err(Self::map_redis_error)?;

        debug!("Reserved job {} (attempt {})", job.id, job.attempts_made);
        Ok(Some(job))
    }

    async fn complete(&self, job: &QueuedJob) -> AppResult<()> {
        self.finish(job, self.keys.completed(), self.keep_completed)
            .await
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn retry_later(&self, job: &QueuedJob, delay: Duration, error: &str) -> AppResult<()> {
        let mut job = job.clone();
        job.last_error = Some(error.to_string());
        let due_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        let mut conn = self.manager.clone();
        let _: () = redis::pipe()
            .atomic()
            .set(self.keys.job(&job.id), Self::encode(&job)?)
            .ignore()
            .zrem(self.keys.active(), &job.id)
            .ignore()
            .zadd(self.keys.delayed(), &job.id, due_ms)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;

        Ok(())
    }

    async fn fail(&self, job: &QueuedJob, error: &str) -> AppResult<()> {
        let mut job = job.clone();
        job.last_error = Some(error.to_string());
        self.finish(&job, self.keys.failed(), self.keep_failed).await
    }

    async fn stats(&self) -> AppResult<QueueStats> {
        let mut conn = self.manager.clone();

        let (waiting, active, delayed, completed, failed, paused): (u64, u64, u64, u64, u64, bool) =
            redis::pipe()
                .zcard(self.keys.waiting())
                .zcard(self.keys.active())
                .zcard(self.keys.delayed())
                .llen(self.keys.completed())
                .llen(self.keys.failed())
                .exists(self.keys.paused())
                .query_async(&mut conn)
                .await
                .map_err(Self::map_redis_error)?;

        let mut stats = QueueStats::new(waiting, active, delayed, completed, failed);
        stats.paused = paused;
        Ok(stats)
    }

    #[instrument(skip(self))]
    async fn recover_stalled(&self) -> AppResult<u64> {
        let mut conn = self.manager.clone();
        let ids: Vec<String> = conn
            .zrange(self.keys.active(), 0, -1)
            .await
            .map_err(Self::map_redis_error)?;

        let mut recovered = 0;
        for id in ids {
            let body: Option<String> = conn
                .get(self.keys.job(&id))
                .await
                .map_err(Self::map_redis_error)?;

            let mut pipe = redis::pipe();
            pipe.atomic().zrem(self.keys.active(), &id).ignore();
            if let Some(body) = body {
                let job = Self::decode(&body)?;
                let score = waiting_score(job.opts.priority, job.enqueued_at.timestamp_millis());
                pipe.zadd(self.keys.waiting(), &id, score).ignore();
                recovered += 1;
            }
            let _: () = pipe
                .query_async(&mut conn)
                .await
                .map_err(Self::map_redis_error)?;
        }

        if recovered > 0 {
            warn!("Returned {} stalled jobs to waiting", recovered);
        }
        Ok(recovered)
    }

    #[instrument(skip(self))]
    async fn drain(&self) -> AppResult<u64> {
        let mut conn = self.manager.clone();
        let (waiting, delayed): (Vec<String>, Vec<String>) = redis::pipe()
            .zrange(self.keys.waiting(), 0, -1)
            .zrange(self.keys.delayed(), 0, -1)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;

        if waiting.is_empty() && delayed.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in waiting.iter().chain(delayed.iter()) {
            pipe.zrem(self.keys.waiting(), id)
                .ignore()
                .zrem(self.keys.delayed(), id)
                .ignore()
                .del(self.keys.job(id))
                .ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;

        let drained = (waiting.len() + delayed.len()) as u64;
        info!("Drained {} queued jobs", drained);
        Ok(drained)
    }

    async fn set_paused(&self, paused: bool) -> AppResult<()> {
        let mut conn = self.manager.clone();
        if paused {
            let _: () = conn
                .set(self.keys.paused(), 1)
                .await
                .map_err(Self::map_redis_error)?;
            info!("Call queue paused");
        } else {
            let _: () = conn
                .del(self.keys.paused())
                .await
                .map_err(Self::map_redis_error)?;
            info!("Call queue resumed");
        }
        Ok(())
    }

    async fn is_paused(&self) -> AppResult<bool> {
        let mut conn = self.manager.clone();
        conn.exists(self.keys.paused())
            .await
            .map_err(Self::map_redis_error)
    }
}
