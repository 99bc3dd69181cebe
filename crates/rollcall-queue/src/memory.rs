//! In-process job queue
//!
//! Same semantics as the Redis queue (priority, delays, capped history,
//! pause) without durability. Due times use `tokio::time::Instant`, so
//! tests can drive delays with a paused clock.

use async_trait::async_trait;
use parking_lot::Mutex;
use rollcall_core::{
    models::{EnqueueOptions, JobPayload, QueueStats, QueuedJob},
    traits::JobQueue,
    AppResult,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::keys::MAX_PRIORITY;

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, QueuedJob>,
    /// (priority, sequence, id): lowest first, FIFO within a priority
    waiting: BTreeSet<(u32, u64, String)>,
    delayed: Vec<(Instant, String)>,
    active: HashMap<String, QueuedJob>,
    completed: VecDeque<QueuedJob>,
    failed: VecDeque<QueuedJob>,
    paused: bool,
    seq: u64,
}

impl Inner {
    fn push_waiting(&mut self, priority: u32, id: String) {
        self.seq += 1;
        self.waiting
            .insert((priority.min(MAX_PRIORITY), self.seq, id));
    }

    fn promote_due(&mut self, now: Instant) {
        let (due, later): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|(at, _)| *at <= now);
        self.delayed = later;

        let mut due = due;
        due.sort_by_key(|(at, _)| *at);
        for (_, id) in due {
            if let Some(priority) = self.jobs.get(&id).map(|j| j.opts.priority) {
                self.push_waiting(priority, id);
            }
        }
    }

    fn place(&mut self, job: QueuedJob) -> String {
        let id = job.id.clone();
        let delay = job.opts.delay();
        let priority = job.opts.priority;
        self.jobs.insert(id.clone(), job);

        if delay.is_zero() {
            self.push_waiting(priority, id.clone());
        } else {
            self.delayed.push((Instant::now() + delay, id.clone()));
        }
        id
    }
}

fn push_capped(list: &mut VecDeque<QueuedJob>, job: QueuedJob, keep: usize) {
    list.push_front(job);
    list.truncate(keep);
}

pub struct InMemoryJobQueue {
    inner: Mutex<Inner>,
    keep_completed: usize,
    keep_failed: usize,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(100, 500)
    }
}

impl InMemoryJobQueue {
    pub fn new(keep_completed: usize, keep_failed: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            keep_completed: keep_completed.max(1),
            keep_failed: keep_failed.max(1),
        }
    }

    /// Jobs not yet finished (waiting, delayed or active), any order
    pub fn pending_jobs(&self) -> Vec<QueuedJob> {
        let inner = self.inner.lock();
        inner
            .jobs
            .values()
            .chain(inner.active.values())
            .cloned()
            .collect()
    }

    /// Most recently failed jobs first
    pub fn failed_jobs(&self) -> Vec<QueuedJob> {
        self.inner.lock().failed.iter().cloned().collect()
    }

    pub fn completed_jobs(&self) -> Vec<QueuedJob> {
        self.inner.lock().completed.iter().cloned().collect()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, payload: JobPayload, opts: EnqueueOptions) -> AppResult<String> {
        let job = QueuedJob::new(payload, opts);
        debug!("Enqueued {} job {}", job.kind(), job.id);
        Ok(self.inner.lock().place(job))
    }

    async fn enqueue_bulk(&self, jobs: Vec<(JobPayload, EnqueueOptions)>) -> AppResult<Vec<String>> {
        let mut inner = self.inner.lock();
        Ok(jobs
            .into_iter()
            .map(|(payload, opts)| inner.place(QueuedJob::new(payload, opts)))
            .collect())
    }

    async fn reserve(&self) -> AppResult<Option<QueuedJob>> {
        let mut inner = self.inner.lock();
        if inner.paused {
            return Ok(None);
        }

        inner.promote_due(Instant::now());

        while let Some(entry) = inner.waiting.pop_first() {
            let (_, _, id) = entry;
            if let Some(mut job) = inner.jobs.remove(&id) {
                job.attempts_made += 1;
                inner.active.insert(id, job.clone());
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn complete(&self, job: &QueuedJob) -> AppResult<()> {
        let mut inner = self.inner.lock();
        inner.active.remove(&job.id);
        push_capped(&mut inner.completed, job.clone(), self.keep_completed);
        Ok(())
    }

    async fn retry_later(&self, job: &QueuedJob, delay: Duration, error: &str) -> AppResult<()> {
        let mut inner = self.inner.lock();
        inner.active.remove(&job.id);

        let mut job = job.clone();
        job.last_error = Some(error.to_string());
        let id = job.id.clone();
        inner.jobs.insert(id.clone(), job);
        inner.delayed.push((Instant::now() + delay, id));
        Ok(())
    }

    async fn fail(&self, job: &QueuedJob, error: &str) -> AppResult<()> {
        let mut inner = self.inner.lock();
        inner.active.remove(&job.id);

        let mut job = job.clone();
        job.last_error = Some(error.to_string());
        push_capped(&mut inner.failed, job, self.keep_failed);
        Ok(())
    }

    async fn stats(&self) -> AppResult<QueueStats> {
        let inner = self.inner.lock();
        let mut stats = QueueStats::new(
            inner.waiting.len() as u64,
            inner.active.len() as u64,
            inner.delayed.len() as u64,
            inner.completed.len() as u64,
            inner.failed.len() as u64,
        );
        stats.paused = inner.paused;
        Ok(stats)
    }

    async fn recover_stalled(&self) -> AppResult<u64> {
        let mut inner = self.inner.lock();
        let stalled: Vec<QueuedJob> = inner.active.drain().map(|(_, job)| job).collect();
        let count = stalled.len() as u64;
        for job in stalled {
            let priority = job.opts.priority;
            let id = job.id.clone();
            inner.jobs.insert(id.clone(), job);
            inner.push_waiting(priority, id);
        }
        Ok(count)
    }

    async fn drain(&self) -> AppResult<u64> {
        let mut inner = self.inner.lock();
        let count = (inner.waiting.len() + inner.delayed.len()) as u64;
        inner.waiting.clear();
        inner.delayed.clear();
        inner.jobs.clear();
        Ok(count)
    }

    async fn set_paused(&self, paused: bool) -> AppResult<()> {
        self.inner.lock().paused = paused;
        Ok(())
    }

    async fn is_paused(&self) -> AppResult<bool> {
        Ok(self.inner.lock().paused)
    }
}
