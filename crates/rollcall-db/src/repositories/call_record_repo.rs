//! Call record repository implementation
//!
//! PostgreSQL-backed store for call attempts. Every update is guarded by the
//! row's `version` column so concurrent webhook handlers and workers cannot
//! overwrite each other's changes. Uses runtime queries (not compile-time
//! macros) so no database is needed at build time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rollcall_core::{
    models::{
        CallContext, CallCost, CallError, CallProvider, CallRecord, CallResponse, CallResult,
        CallStats, DetectionMethod, DialLease, Language, LanguageInfo, Recording, RetryState,
    },
    traits::CallRecordStore,
    AppError, AppResult,
};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeMap;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

/// PostgreSQL implementation of CallRecordStore
pub struct PgCallRecordStore {
    pool: PgPool,
}

impl PgCallRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const CALL_SELECT_COLUMNS: &str = r#"
    id, student_id, absence_id, phone, contact_name, context,
    provider, provider_session_id,
    attempt_number, max_attempts, result,
    time_placed, time_answered, time_ended,
    language, language_method, language_confidence,
    response, recording_url, recording_duration,
    retry_at, retry_job_id, retry_call_id,
    cost_amount, cost_currency, error_code, error_message,
    metadata, dial_job_id, dial_leased_at,
    version, created_at, updated_at
"#;

fn db_error(action: &str, e: sqlx::Error) -> AppError {
    error!("Database error while {}: {}", action, e);
    AppError::Database(format!("Failed while {}: {}", action, e))
}

#[async_trait]
impl CallRecordStore for PgCallRecordStore {
    #[instrument(skip(self, record), fields(call_id = %record.id))]
    async fn insert(&self, record: &CallRecord) -> AppResult<CallRecord> {
        debug!(
            "Inserting call record for student {} attempt {}",
            record.student_id, record.attempt_number
        );

        let query = format!(
            r#"
            INSERT INTO call_records (
                id, student_id, absence_id, phone, contact_name, context,
                provider, provider_session_id,
                attempt_number, max_attempts, result,
                time_placed, time_answered, time_ended,
                language, language_method, language_confidence,
                response, recording_url, recording_duration,
                retry_at, retry_job_id, retry_call_id,
                cost_amount, cost_currency, error_code, error_message,
                metadata, dial_job_id, dial_leased_at,
                version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30,
                    0, NOW(), NOW())
            RETURNING {}
            "#,
            CALL_SELECT_COLUMNS
        );

        let row = bind_record(sqlx::query_as::<sqlx::Postgres, CallRecordRow>(&query), record)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                let unique = e
                    .as_database_error()
                    .map(|d| d.is_unique_violation())
                    .unwrap_or(false);
                if unique {
                    warn!("Call record {} conflicts with an existing row", record.id);
                    AppError::Conflict(format!(
                        "a pending call already exists for absence {:?}",
                        record.absence_id
                    ))
                } else {
                    db_error("inserting call record", e)
                }
            })?;

        row.try_into()
    }

    #[instrument(skip(self))]
    async fn get(&self, id: Uuid) -> AppResult<Option<CallRecord>> {
        let query = format!("SELECT {} FROM call_records WHERE id = $1", CALL_SELECT_COLUMNS);

        let row = sqlx::query_as::<sqlx::Postgres, CallRecordRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("loading call record", e))?;

        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_session(&self, session_id: &str) -> AppResult<Option<CallRecord>> {
        let query = format!(
            "SELECT {} FROM call_records WHERE provider_session_id = $1",
            CALL_SELECT_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, CallRecordRow>(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("finding call by session", e))?;

        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self))]
    async fn find_for_absence(
        &self,
        student_id: &str,
        absence_id: &str,
    ) -> AppResult<Vec<CallRecord>> {
        let query = format!(
            r#"
            SELECT {} FROM call_records
            WHERE student_id = $1 AND absence_id = $2
            ORDER BY attempt_number ASC, created_at ASC
            "#,
            CALL_SELECT_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, CallRecordRow>(&query)
            .bind(student_id)
            .bind(absence_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("listing calls for absence", e))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self, record), fields(call_id = %record.id, version = record.version))]
    async fn save(&self, record: &CallRecord) -> AppResult<CallRecord> {
        // $1..$30 are the full column set bound by bind_record, $31 the expected version
        let query = format!(
            r#"
            UPDATE call_records
            SET student_id = $2, absence_id = $3, phone = $4, contact_name = $5, context = $6,
                provider = $7, provider_session_id = $8,
                attempt_number = $9, max_attempts = $10, result = $11,
                time_placed = $12, time_answered = $13, time_ended = $14,
                language = $15, language_method = $16, language_confidence = $17,
                response = $18, recording_url = $19, recording_duration = $20,
                retry_at = $21, retry_job_id = $22, retry_call_id = $23,
                cost_amount = $24, cost_currency = $25, error_code = $26, error_message = $27,
                metadata = $28, dial_job_id = $29, dial_leased_at = $30,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $31
            RETURNING {}
            "#,
            CALL_SELECT_COLUMNS
        );

        let row = bind_record(sqlx::query_as::<sqlx::Postgres, CallRecordRow>(&query), record)
            .bind(record.version)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("saving call record", e))?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let exists: Option<(i64,)> =
                    sqlx::query_as("SELECT version FROM call_records WHERE id = $1")
                        .bind(record.id)
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(|e| db_error("checking call record version", e))?;

                match exists {
                    Some((current,)) => {
                        debug!(
                            "Version conflict on {}: have {}, stored {}",
                            record.id, record.version, current
                        );
                        Err(AppError::VersionConflict(record.id.to_string()))
                    }
                    None => Err(AppError::CallRecordNotFound(record.id.to_string())),
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn find_retry_candidates(&self, limit: i64) -> AppResult<Vec<CallRecord>> {
        let query = format!(
            r#"
            SELECT {} FROM call_records c
            WHERE result IN ('no_answer', 'busy', 'failed')
              AND attempt_number < max_attempts
              AND retry_at IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM call_records later
                  WHERE c.absence_id IS NOT NULL
                    AND later.student_id = c.student_id
                    AND later.absence_id = c.absence_id
                    AND later.id <> c.id
                    AND (later.result = 'answered'
                         OR later.attempt_number > c.attempt_number
                         OR (later.attempt_number = c.attempt_number
                             AND later.created_at > c.created_at))
              )
            ORDER BY COALESCE(time_ended, updated_at) ASC
            LIMIT $1
            "#,
            CALL_SELECT_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, CallRecordRow>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("finding retry candidates", e))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self))]
    async fn find_due_retries(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<CallRecord>> {
        let query = format!(
            r#"
            SELECT {} FROM call_records
            WHERE retry_at IS NOT NULL
              AND retry_at <= $1
              AND retry_job_id IS NULL
            ORDER BY retry_at ASC
            LIMIT $2
            "#,
            CALL_SELECT_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, CallRecordRow>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("finding due retries", e))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self))]
    async fn call_stats(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AppResult<CallStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT result, COUNT(*)
            FROM call_records
            WHERE ($1::timestamptz IS NULL OR time_placed >= $1)
              AND ($2::timestamptz IS NULL OR time_placed < $2)
            GROUP BY result
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("computing call stats", e))?;

        let counts = rows.into_iter().filter_map(|(result, count)| {
            let parsed = CallResult::from_str(&result);
            if parsed.is_none() {
                warn!("Ignoring unknown call result '{}' in stats", result);
            }
            parsed.map(|r| (r, count))
        });

        Ok(CallStats::from_counts(counts))
    }
}

type RowQuery<'q> =
    sqlx::query::QueryAs<'q, sqlx::Postgres, CallRecordRow, sqlx::postgres::PgArguments>;

/// Bind the 30 record columns in `CALL_SELECT_COLUMNS` order (minus the
/// version/timestamp trailer)
fn bind_record<'q>(query: RowQuery<'q>, record: &'q CallRecord) -> RowQuery<'q> {
    query
        .bind(record.id)
        .bind(&record.student_id)
        .bind(&record.absence_id)
        .bind(&record.phone)
        .bind(&record.contact_name)
        .bind(Json(&record.context))
        .bind(record.provider.as_str())
        .bind(&record.provider_session_id)
        .bind(record.attempt_number as i32)
        .bind(record.max_attempts as i32)
        .bind(record.result.as_str())
        .bind(record.time_placed)
        .bind(record.time_answered)
        .bind(record.time_ended)
        .bind(record.language.language.as_str())
        .bind(record.language.method.as_str())
        .bind(record.language.confidence)
        .bind(Json(&record.response))
        .bind(record.recording.as_ref().map(|r| r.url.clone()))
        .bind(record.recording.as_ref().and_then(|r| r.duration_seconds))
        .bind(record.retry.retry_at)
        .bind(&record.retry.retry_job_id)
        .bind(record.retry.retry_call_id)
        .bind(record.cost.as_ref().map(|c| c.amount))
        .bind(record.cost.as_ref().map(|c| c.currency.clone()))
        .bind(record.error.as_ref().map(|e| e.code.clone()))
        .bind(record.error.as_ref().map(|e| e.message.clone()))
        .bind(Json(&record.metadata))
        .bind(record.dial_lease.as_ref().map(|l| l.job_id.clone()))
        .bind(record.dial_lease.as_ref().map(|l| l.leased_at))
}

/// Helper struct for mapping database rows to domain model
#[derive(Debug, sqlx::FromRow)]
struct CallRecordRow {
    id: Uuid,
    student_id: String,
    absence_id: Option<String>,
    phone: String,
    contact_name: Option<String>,
    context: Json<CallContext>,
    provider: String,
    provider_session_id: Option<String>,
    attempt_number: i32,
    max_attempts: i32,
    result: String,
    time_placed: DateTime<Utc>,
    time_answered: Option<DateTime<Utc>>,
    time_ended: Option<DateTime<Utc>>,
    language: String,
    language_method: String,
    language_confidence: f64,
    response: Json<CallResponse>,
    recording_url: Option<String>,
    recording_duration: Option<i64>,
    retry_at: Option<DateTime<Utc>>,
    retry_job_id: Option<String>,
    retry_call_id: Option<Uuid>,
    cost_amount: Option<Decimal>,
    cost_currency: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    metadata: Json<BTreeMap<String, String>>,
    dial_job_id: Option<String>,
    dial_leased_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CallRecordRow> for CallRecord {
    type Error = AppError;

    fn try_from(row: CallRecordRow) -> Result<Self, Self::Error> {
        let result = CallResult::from_str(&row.result).ok_or_else(|| {
            AppError::Database(format!("unknown call result '{}' on {}", row.result, row.id))
        })?;
        let provider = CallProvider::from_str(&row.provider).ok_or_else(|| {
            AppError::Database(format!("unknown provider '{}' on {}", row.provider, row.id))
        })?;

        Ok(Self {
            id: row.id,
            student_id: row.student_id,
            absence_id: row.absence_id,
            phone: row.phone,
            contact_name: row.contact_name,
            context: row.context.0,
            provider,
            provider_session_id: row.provider_session_id,
            dial_lease: row
                .dial_job_id
                .zip(row.dial_leased_at)
                .map(|(job_id, leased_at)| DialLease { job_id, leased_at }),
            attempt_number: row.attempt_number.max(1) as u32,
            max_attempts: row.max_attempts.max(1) as u32,
            result,
            time_placed: row.time_placed,
            time_answered: row.time_answered,
            time_ended: row.time_ended,
            language: LanguageInfo {
                language: Language::from_str(&row.language).unwrap_or_default(),
                method: DetectionMethod::from_str(&row.language_method).unwrap_or_default(),
                confidence: row.language_confidence,
            },
            response: row.response.0,
            recording: row.recording_url.map(|url| Recording {
                url,
                duration_seconds: row.recording_duration,
            }),
            retry: RetryState {
                retry_at: row.retry_at,
                retry_job_id: row.retry_job_id,
                retry_call_id: row.retry_call_id,
            },
            cost: row.cost_amount.map(|amount| CallCost {
                amount,
                currency: row.cost_currency.unwrap_or_else(|| "GHS".to_string()),
            }),
            error: row.error_code.map(|code| CallError {
                code,
                message: row.error_message.unwrap_or_default(),
            }),
            metadata: row.metadata.0,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(result: &str) -> CallRecordRow {
        let now = Utc::now();
        CallRecordRow {
            id: Uuid::new_v4(),
            student_id: "student-1".to_string(),
            absence_id: Some("absence-1".to_string()),
            phone: "+233241234567".to_string(),
            contact_name: Some("Ama Mensah".to_string()),
            context: Json(CallContext {
                student_name: "Kwame".to_string(),
                school_name: "Accra Basic".to_string(),
            }),
            provider: "africastalking".to_string(),
            provider_session_id: Some("ATVId_123".to_string()),
            attempt_number: 2,
            max_attempts: 3,
            result: result.to_string(),
            time_placed: now,
            time_answered: None,
            time_ended: Some(now),
            language: "Twi".to_string(),
            language_method: "phone_prefix".to_string(),
            language_confidence: 0.6,
            response: Json(CallResponse::default()),
            recording_url: None,
            recording_duration: None,
            retry_at: None,
            retry_job_id: None,
            retry_call_id: None,
            cost_amount: Some(Decimal::new(125, 2)),
            cost_currency: None,
            error_code: None,
            error_message: None,
            metadata: Json(BTreeMap::new()),
            dial_job_id: Some("job-7".to_string()),
            dial_leased_at: Some(now),
            version: 4,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_conversion() {
        let call: CallRecord = row("no_answer").try_into().unwrap();
        assert_eq!(call.result, CallResult::NoAnswer);
        assert_eq!(call.attempt_number, 2);
        assert_eq!(call.language.language, Language::Twi);
        assert_eq!(call.cost.as_ref().unwrap().currency, "GHS");
        assert_eq!(call.version, 4);
        assert_eq!(call.dial_lease.clone().map(|l| l.job_id), Some("job-7".to_string()));
        assert!(call.is_retry_eligible());
    }

    #[test]
    fn test_unknown_result_is_rejected() {
        let converted: AppResult<CallRecord> = row("exploded").try_into();
        assert!(converted.is_err());
    }
}
