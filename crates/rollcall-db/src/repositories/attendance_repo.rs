//! Attendance gateway over the attendance subsystem's tables
//!
//! The `attendance`, `students` and `schools` tables belong to the
//! attendance subsystem. This gateway only reads them and patches the
//! follow-up columns (`call_triggered`, `reason`, `reason_details`,
//! `follow_up_completed`), last writer wins.

use async_trait::async_trait;
use chrono::NaiveDate;
use rollcall_core::{
    models::{AbsenceReason, CallContext, EligibleAbsence, FollowUpStats, ParentContact},
    traits::AttendanceGateway,
    AppError, AppResult,
};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, error, info, instrument, warn};

/// PostgreSQL implementation of AttendanceGateway
pub struct PgAttendanceGateway {
    pool: PgPool,
}

impl PgAttendanceGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttendanceGateway for PgAttendanceGateway {
    #[instrument(skip(self))]
    async fn find_eligible_absences(&self, date: NaiveDate) -> AppResult<Vec<EligibleAbsence>> {
        let rows = sqlx::query_as::<sqlx::Postgres, EligibleAbsenceRow>(
            r#"
            SELECT a.id::text AS absence_id,
                   a.student_id::text AS student_id,
                   a.date,
                   s.first_name AS student_name,
                   COALESCE(sc.name, 'School') AS school_name,
                   COALESCE(s.parent_contacts, '[]'::jsonb) AS parent_contacts
            FROM attendance a
            JOIN students s ON s.id = a.student_id
            LEFT JOIN schools sc ON sc.id = s.school_id
            WHERE a.date = $1
              AND a.status = 'absent'
              AND a.follow_up_required = TRUE
              AND a.follow_up_completed = FALSE
              AND a.call_triggered = FALSE
            ORDER BY a.created_at ASC
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding eligible absences: {}", e);
            AppError::Database(format!("Failed to find eligible absences: {}", e))
        })?;

        debug!("Found {} eligible absences for {}", rows.len(), date);

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn mark_call_triggered(&self, absence_id: &str) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE attendance SET call_triggered = TRUE, updated_at = NOW() WHERE id::text = $1",
        )
        .bind(absence_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error marking absence {}: {}", absence_id, e);
            AppError::Database(format!("Failed to mark call triggered: {}", e))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("absence {}", absence_id)));
        }
        Ok(())
    }

    #[instrument(skip(self, details))]
    async fn record_resolution(
        &self,
        absence_id: &str,
        reason: AbsenceReason,
        details: Option<&str>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE attendance
            SET reason = $2,
                reason_details = COALESCE($3, reason_details),
                follow_up_completed = TRUE,
                updated_at = NOW()
            WHERE id::text = $1
            "#,
        )
        .bind(absence_id)
        .bind(reason.as_str())
        .bind(details)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error resolving absence {}: {}", absence_id, e);
            AppError::Database(format!("Failed to record resolution: {}", e))
        })?;

        if result.rows_affected() == 0 {
            warn!("Resolution for unknown absence {}", absence_id);
            return Err(AppError::NotFound(format!("absence {}", absence_id)));
        }

        info!("Absence {} resolved as {}", absence_id, reason);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn follow_up_stats(&self, date: NaiveDate) -> AppResult<FollowUpStats> {
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'absent'),
                COUNT(*) FILTER (WHERE status = 'absent' AND follow_up_required),
                COUNT(*) FILTER (WHERE status = 'absent' AND follow_up_completed),
                COUNT(*) FILTER (WHERE status = 'absent' AND call_triggered),
                COUNT(*) FILTER (WHERE status = 'absent' AND follow_up_required
                                 AND NOT follow_up_completed AND NOT call_triggered)
            FROM attendance
            WHERE date = $1
            "#,
        )
        .bind(date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error computing follow-up stats: {}", e);
            AppError::Database(format!("Failed to compute follow-up stats: {}", e))
        })?;

        Ok(FollowUpStats {
            total_absences: row.0,
            follow_up_required: row.1,
            follow_up_completed: row.2,
            call_triggered: row.3,
            pending: row.4,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EligibleAbsenceRow {
    absence_id: String,
    student_id: String,
    date: NaiveDate,
    student_name: String,
    school_name: String,
    parent_contacts: Json<Vec<ParentContact>>,
}

impl From<EligibleAbsenceRow> for EligibleAbsence {
    fn from(row: EligibleAbsenceRow) -> Self {
        Self {
            absence_id: row.absence_id,
            student_id: row.student_id,
            date: row.date,
            context: CallContext {
                student_name: row.student_name,
                school_name: row.school_name,
            },
            contacts: row.parent_contacts.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion() {
        let row = EligibleAbsenceRow {
            absence_id: "abs-1".to_string(),
            student_id: "stu-1".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            student_name: "Kwame".to_string(),
            school_name: "Accra Basic".to_string(),
            parent_contacts: Json(vec![ParentContact {
                name: "Ama".to_string(),
                phone: "0241234567".to_string(),
                relation: Some("mother".to_string()),
                verified: true,
                opted_out: false,
                preferred_language: None,
            }]),
        };

        let absence: EligibleAbsence = row.into();
        assert_eq!(absence.context.student_name, "Kwame");
        assert_eq!(absence.contacts.len(), 1);
    }
}
