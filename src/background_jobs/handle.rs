use super::job::{BackgroundJob, HookEvent, JobError};
use crate::server_store::{JobAuditEventType, JobRun, ServerStore};
use anyhow::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::warn;

/// Snapshot of a registered job for logging and inspection.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    /// `None` for jobs that only run on hooks.
    pub interval_secs: Option<u64>,
    pub hooks: Vec<String>,
    pub is_running: bool,
    pub last_run: Option<JobRunInfo>,
    /// Only known for interval jobs that have been scheduled at least once.
    pub next_run_at: Option<String>,
    /// Counters of the latest run, when that run completed.
    pub last_completed_details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub triggered_by: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
}

impl From<JobRun> for JobRunInfo {
    fn from(run: JobRun) -> Self {
        let duration_ms = run.duration_ms();
        Self {
            triggered_by: run.triggered_by,
            status: run.status.as_str().to_string(),
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.map(|at| at.to_rfc3339()),
            duration_ms,
            error_message: run.error_message,
        }
    }
}

pub enum SchedulerCommand {
    TriggerJob {
        job_id: String,
        response: oneshot::Sender<Result<(), JobError>>,
    },
}

/// Job registry and running set, written by the scheduler loop and read by
/// handles.
pub struct SharedJobState {
    pub jobs: HashMap<String, Arc<dyn BackgroundJob>>,
    pub running_jobs: HashSet<String>,
}

/// Cloneable front end of a [`super::JobScheduler`]. Manual triggers and
/// hook events go through channels; queries read shared state and the
/// server store directly.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    hook_tx: mpsc::Sender<HookEvent>,
    shared_state: Arc<RwLock<SharedJobState>>,
    server_store: Arc<dyn ServerStore>,
}

impl SchedulerHandle {
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        hook_tx: mpsc::Sender<HookEvent>,
        shared_state: Arc<RwLock<SharedJobState>>,
        server_store: Arc<dyn ServerStore>,
    ) -> Self {
        Self {
            command_tx,
            hook_tx,
            shared_state,
            server_store,
        }
    }

    /// All registered jobs, sorted by id.
    pub async fn list_jobs(&self) -> Result<Vec<JobInfo>> {
        let state = self.shared_state.read().await;
        let mut ids: Vec<&String> = state.jobs.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| self.describe(&state, id))
            .collect()
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobInfo>> {
        let state = self.shared_state.read().await;
        if !state.jobs.contains_key(job_id) {
            return Ok(None);
        }
        self.describe(&state, job_id).map(Some)
    }

    fn describe(&self, state: &SharedJobState, job_id: &str) -> Result<JobInfo> {
        let job = &state.jobs[job_id];
        let schedule = job.schedule();

        let last_run = self.server_store.get_last_run(job_id)?;
        let next_run_at = self.server_store.get_schedule_state(job_id)?;
        let latest_audit = self
            .server_store
            .get_job_audit_log_by_job(job_id, 1, 0)?
            .pop();
        let last_completed_details = latest_audit
            .filter(|entry| entry.event_type == JobAuditEventType::Completed)
            .and_then(|entry| entry.details);

        Ok(JobInfo {
            id: job_id.to_string(),
            name: job.name().to_string(),
            description: job.description().to_string(),
            interval_secs: schedule.interval().map(|interval| interval.as_secs()),
            hooks: schedule.hooks().iter().map(|hook| hook.to_string()).collect(),
            is_running: state.running_jobs.contains(job_id),
            last_run: last_run.map(JobRunInfo::from),
            next_run_at: next_run_at.map(|s| s.next_run_at.to_rfc3339()),
            last_completed_details,
        })
    }

    /// Start a job now. A job that is already running is not queued again;
    /// the caller gets `AlreadyRunning`.
    pub async fn trigger_job(&self, job_id: &str) -> Result<(), JobError> {
        let (response, response_rx) = oneshot::channel();
        let command = SchedulerCommand::TriggerJob {
            job_id: job_id.to_string(),
            response,
        };
        if self.command_tx.send(command).await.is_err() {
            return Err(JobError::ExecutionFailed(
                "Scheduler not available".to_string(),
            ));
        }
        match response_rx.await {
            Ok(result) => result,
            Err(_) => Err(JobError::ExecutionFailed(
                "Scheduler did not respond".to_string(),
            )),
        }
    }

    /// Jobs listening to `event` start unless they are already running.
    pub async fn notify(&self, event: HookEvent) {
        if self.hook_tx.send(event).await.is_err() {
            warn!("Scheduler gone, hook event {} dropped", event);
        }
    }

    /// Newest first.
    pub fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRunInfo>> {
        Ok(self
            .server_store
            .get_job_history(job_id, limit)?
            .into_iter()
            .map(JobRunInfo::from)
            .collect())
    }

    pub async fn is_job_running(&self, job_id: &str) -> bool {
        self.shared_state.read().await.running_jobs.contains(job_id)
    }
}
