use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one job run. A run starts `Running` and is closed exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
    /// Stopped by scheduler shutdown before it finished.
    Cancelled,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::Running,
            Self::Completed,
            Self::Failed,
            Self::Cancelled,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
    }

    pub fn is_finished(&self) -> bool {
        *self != Self::Running
    }
}

/// One execution of a background job, as kept in `job_runs`.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub id: i64,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
    /// `schedule`, `manual` or `hook:<event>`.
    pub triggered_by: String,
}

impl JobRun {
    /// Wall time of a finished run.
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_milliseconds())
    }
}

/// When an interval job runs next. Persisted so restarts keep the cadence.
#[derive(Debug, Clone)]
pub struct JobScheduleState {
    pub job_id: String,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAuditEventType {
    Started,
    Completed,
    Failed,
}

impl JobAuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [Self::Started, Self::Completed, Self::Failed]
            .into_iter()
            .find(|event| event.as_str() == s)
    }
}

/// A job audit entry. Jobs put their own counters in `details`, e.g. the
/// enrichment tick stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAuditEntry {
    pub id: i64,
    pub job_id: String,
    pub event_type: JobAuditEventType,
    /// Unix seconds.
    pub logged_at: i64,
    pub duration_ms: Option<i64>,
    pub details: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_round_trips_through_text() {
        for status in [
            JobRunStatus::Running,
            JobRunStatus::Completed,
            JobRunStatus::Failed,
            JobRunStatus::Cancelled,
        ] {
            assert_eq!(JobRunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobRunStatus::parse("paused"), None);
        assert!(!JobRunStatus::Running.is_finished());
        assert!(JobRunStatus::Cancelled.is_finished());
    }

    #[test]
    fn test_duration_only_for_finished_runs() {
        let started_at = Utc::now();
        let mut run = JobRun {
            id: 1,
            job_id: "job".to_string(),
            started_at,
            finished_at: None,
            status: JobRunStatus::Running,
            error_message: None,
            triggered_by: "manual".to_string(),
        };
        assert_eq!(run.duration_ms(), None);

        run.finished_at = Some(started_at + chrono::Duration::milliseconds(1500));
        assert_eq!(run.duration_ms(), Some(1500));
    }
}
