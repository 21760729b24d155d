//! SQLite-backed job bookkeeping.

use super::models::{JobAuditEntry, JobAuditEventType, JobRun, JobRunStatus, JobScheduleState};
use super::schema::SERVER_VERSIONED_SCHEMAS;
use super::ServerStore;
use crate::sqlite_persistence::open_versioned_db;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const JOB_RUN_COLUMNS: &str =
    "id, job_id, started_at, finished_at, status, error_message, triggered_by";

const AUDIT_COLUMNS: &str = "id, job_id, event_type, logged_at, duration_ms, details, error";

const INTERRUPTED_RUN_ERROR: &str = "Interrupted by worker restart";

pub struct SqliteServerStore {
    conn: Arc<Mutex<Connection>>,
}

fn to_text(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Unreadable timestamps fall back to the epoch rather than failing the row.
fn from_text(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

impl SqliteServerStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = open_versioned_db(path, SERVER_VERSIONED_SCHEMAS, "server")
            .with_context(|| format!("Failed to open server database at {:?}", path))?;
        info!("Server store ready at {:?}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_job_run(row: &Row) -> rusqlite::Result<JobRun> {
        let started_at: String = row.get("started_at")?;
        let finished_at: Option<String> = row.get("finished_at")?;
        let status: String = row.get("status")?;

        Ok(JobRun {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            started_at: from_text(&started_at),
            finished_at: finished_at.as_deref().map(from_text),
            // Unknown statuses come from a newer build; treat them as closed.
            status: JobRunStatus::parse(&status).unwrap_or(JobRunStatus::Failed),
            error_message: row.get("error_message")?,
            triggered_by: row.get("triggered_by")?,
        })
    }

    fn row_to_schedule_state(row: &Row) -> rusqlite::Result<JobScheduleState> {
        let next_run_at: String = row.get("next_run_at")?;
        let last_run_at: Option<String> = row.get("last_run_at")?;

        Ok(JobScheduleState {
            job_id: row.get("job_id")?,
            next_run_at: from_text(&next_run_at),
            last_run_at: last_run_at.as_deref().map(from_text),
        })
    }

    fn row_to_audit_entry(row: &Row) -> rusqlite::Result<JobAuditEntry> {
        let event_type: String = row.get("event_type")?;
        let details: Option<String> = row.get("details")?;

        Ok(JobAuditEntry {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            event_type: JobAuditEventType::parse(&event_type).unwrap_or(JobAuditEventType::Failed),
            logged_at: row.get("logged_at")?,
            duration_ms: row.get("duration_ms")?,
            details: details.and_then(|s| serde_json::from_str(&s).ok()),
            error: row.get("error")?,
        })
    }

    fn query_runs(&self, sql_filter: &str, params: impl rusqlite::Params) -> Result<Vec<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job_runs {}",
            JOB_RUN_COLUMNS, sql_filter
        ))?;
        let runs = stmt
            .query_map(params, Self::row_to_job_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }
}

impl ServerStore for SqliteServerStore {
    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_runs (job_id, started_at, status, triggered_by)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                job_id,
                to_text(&Utc::now()),
                JobRunStatus::Running.as_str(),
                triggered_by
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE job_runs SET finished_at = ?1, status = ?2, error_message = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                to_text(&Utc::now()),
                status.as_str(),
                error_message,
                run_id,
                JobRunStatus::Running.as_str()
            ],
        )?;
        if updated == 0 {
            anyhow::bail!("Job run {} is not running", run_id);
        }
        Ok(())
    }

    fn get_running_jobs(&self) -> Result<Vec<JobRun>> {
        self.query_runs(
            "WHERE status = ?1 ORDER BY started_at DESC",
            params![JobRunStatus::Running.as_str()],
        )
    }

    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>> {
        self.query_runs(
            "WHERE job_id = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
            params![job_id, limit as i64],
        )
    }

    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
        Ok(self.get_job_history(job_id, 1)?.into_iter().next())
    }

    fn mark_stale_jobs_failed(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE job_runs SET status = ?1, finished_at = ?2, error_message = ?3
             WHERE status = ?4",
            params![
                JobRunStatus::Failed.as_str(),
                to_text(&Utc::now()),
                INTERRUPTED_RUN_ERROR,
                JobRunStatus::Running.as_str()
            ],
        )?;
        Ok(count)
    }

    fn get_schedule_state(&self, job_id: &str) -> Result<Option<JobScheduleState>> {
        let conn = self.conn.lock().unwrap();
        let state = conn
            .query_row(
                "SELECT job_id, next_run_at, last_run_at FROM job_schedules WHERE job_id = ?1",
                params![job_id],
                Self::row_to_schedule_state,
            )
            .optional()?;
        Ok(state)
    }

    fn update_schedule_state(&self, state: &JobScheduleState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_schedules (job_id, next_run_at, last_run_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE
               SET next_run_at = excluded.next_run_at, last_run_at = excluded.last_run_at",
            params![
                state.job_id,
                to_text(&state.next_run_at),
                state.last_run_at.as_ref().map(to_text)
            ],
        )?;
        Ok(())
    }

    fn log_job_audit(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO job_audit_log ({}) VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6)",
                AUDIT_COLUMNS
            ),
            params![
                job_id,
                event_type.as_str(),
                Utc::now().timestamp(),
                duration_ms,
                details.map(|d| d.to_string()),
                error
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_job_audit_log_by_job(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobAuditEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job_audit_log
             WHERE job_id = ?1
             ORDER BY logged_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
            AUDIT_COLUMNS
        ))?;
        let entries = stmt
            .query_map(
                params![job_id, limit as i64, offset as i64],
                Self::row_to_audit_entry,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}
