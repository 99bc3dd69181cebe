//! Read-modify-write on call records
//!
//! Workers, webhooks and the retry sweep all touch the same records. Every
//! change goes through [`update_with_retry`], which recomputes the change
//! on a fresh copy whenever the store reports a version conflict.

use rollcall_core::{models::CallRecord, traits::CallRecordStore, AppError, AppResult};
use tracing::debug;

/// Attempts before a contended update gives up
pub const MAX_SAVE_ATTEMPTS: u32 = 5;

/// Apply `change` to `record` and save it.
///
/// `change` receives the current record and returns the updated record plus
/// a value for the caller. It must be pure: on a version conflict it runs
/// again against the re-read record. An unchanged record is not written.
pub async fn update_with_retry<T, F>(
    store: &dyn CallRecordStore,
    record: CallRecord,
    mut change: F,
) -> AppResult<(CallRecord, T)>
where
    F: FnMut(&CallRecord) -> (CallRecord, T) + Send,
    T: Send,
{
    let id = record.id;
    let mut current = record;

    for attempt in 1..=MAX_SAVE_ATTEMPTS {
        let (updated, output) = change(&current);
        if updated == current {
            return Ok((current, output));
        }

        match store.save(&updated).await {
            Ok(saved) => return Ok((saved, output)),
            Err(AppError::VersionConflict(_)) if attempt < MAX_SAVE_ATTEMPTS => {
                debug!("Version conflict on call {} (attempt {}), re-reading", id, attempt);
                current = store
                    .get(id)
                    .await?
                    .ok_or_else(|| AppError::CallRecordNotFound(id.to_string()))?;
            }
            Err(e) => return Err(e),
        }
    }

    Err(AppError::VersionConflict(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use rollcall_core::models::CallStats;
    use uuid::Uuid;

    /// Store whose first `conflicts` saves lose a race
    struct ContendedStore {
        record: Mutex<CallRecord>,
        conflicts: Mutex<u32>,
    }

    #[async_trait]
    impl CallRecordStore for ContendedStore {
        async fn insert(&self, record: &CallRecord) -> AppResult<CallRecord> {
            Ok(record.clone())
        }

        async fn get(&self, _id: Uuid) -> AppResult<Option<CallRecord>> {
            Ok(Some(self.record.lock().clone()))
        }

        async fn find_by_session(&self, _session_id: &str) -> AppResult<Option<CallRecord>> {
            Ok(None)
        }

        async fn find_for_absence(&self, _s: &str, _a: &str) -> AppResult<Vec<CallRecord>> {
            Ok(vec![])
        }

        async fn save(&self, record: &CallRecord) -> AppResult<CallRecord> {
            let mut conflicts = self.conflicts.lock();
            let mut stored = self.record.lock();
            if *conflicts > 0 {
                *conflicts -= 1;
                // someone else wrote in between
                stored.version += 1;
                stored.metadata.insert("other_writer".into(), "yes".into());
                return Err(AppError::VersionConflict(record.id.to_string()));
            }
            if stored.version != record.version {
                return Err(AppError::VersionConflict(record.id.to_string()));
            }
            let mut saved = record.clone();
            saved.version += 1;
            *stored = saved.clone();
            Ok(saved)
        }

        async fn find_retry_candidates(&self, _limit: i64) -> AppResult<Vec<CallRecord>> {
            Ok(vec![])
        }

        async fn find_due_retries(&self, _now: DateTime<Utc>, _limit: i64) -> AppResult<Vec<CallRecord>> {
            Ok(vec![])
        }

        async fn call_stats(
            &self,
            _from: Option<DateTime<Utc>>,
            _to: Option<DateTime<Utc>>,
        ) -> AppResult<CallStats> {
            Ok(CallStats::default())
        }
    }

    fn store(conflicts: u32) -> (ContendedStore, CallRecord) {
        let record = CallRecord::new_attempt("s1", Some("a1".into()), "0241234567", 1, 3);
        (
            ContendedStore {
                record: Mutex::new(record.clone()),
                conflicts: Mutex::new(conflicts),
            },
            record,
        )
    }

    fn tag(record: &CallRecord) -> (CallRecord, ()) {
        let mut updated = record.clone();
        updated.metadata.insert("tag".into(), "mine".into());
        (updated, ())
    }

    #[tokio::test]
    async fn test_conflict_recomputes_on_fresh_copy() {
        let (store, record) = store(2);
        let (saved, _) = update_with_retry(&store, record, tag).await.unwrap();

        // both writers' changes survive
        assert_eq!(saved.metadata.get("tag").map(String::as_str), Some("mine"));
        assert_eq!(saved.metadata.get("other_writer").map(String::as_str), Some("yes"));
        assert_eq!(saved.version, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (store, record) = store(MAX_SAVE_ATTEMPTS);
        let err = update_with_retry(&store, record, tag).await.unwrap_err();
        assert!(matches!(err, AppError::VersionConflict(_)));
    }

    #[tokio::test]
    async fn test_unchanged_record_is_not_written() {
        let (store, record) = store(MAX_SAVE_ATTEMPTS);
        let (same, _) = update_with_retry(&store, record.clone(), |r| (r.clone(), ()))
            .await
            .unwrap();
        assert_eq!(same.version, record.version);
    }
}
