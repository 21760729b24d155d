//! Worker bookkeeping kept in `server.db`, separate from the article data.

mod models;
mod schema;
mod sqlite_server_store;

pub use models::*;
pub use schema::SERVER_VERSIONED_SCHEMAS;
pub use sqlite_server_store::SqliteServerStore;

use anyhow::Result;

/// What the scheduler and jobs record about themselves: one row per run,
/// the next due time of each interval job, and an audit trail with
/// job-specific details.
pub trait ServerStore: Send + Sync {
    /// Open a run in `running` state and return its id.
    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64>;
    /// Close a run. Fails if the run is unknown or already closed.
    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()>;
    fn get_running_jobs(&self) -> Result<Vec<JobRun>>;
    /// Newest first.
    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>>;
    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>>;
    /// Close runs a previous process left open. Returns how many there were.
    fn mark_stale_jobs_failed(&self) -> Result<usize>;

    fn get_schedule_state(&self, job_id: &str) -> Result<Option<JobScheduleState>>;
    fn update_schedule_state(&self, state: &JobScheduleState) -> Result<()>;

    fn log_job_audit(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64>;
    /// Newest first.
    fn get_job_audit_log_by_job(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobAuditEntry>>;
}
