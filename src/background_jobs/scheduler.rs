use super::context::JobContext;
use super::handle::{SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, HookEvent, JobError, ShutdownBehavior};
use crate::metrics;
use crate::server_store::{JobRunStatus, JobScheduleState, ServerStore};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on how long the loop sleeps without re-checking schedules.
const MAX_IDLE_SLEEP: Duration = Duration::from_secs(60);
/// How long shutdown waits for running jobs.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);
/// Longest wait before retrying an interval job whose run could not be
/// recorded.
const START_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Runs registered background jobs on their schedules.
///
/// A job is never started while a previous run of it is still going: due
/// ticks, hooks and manual triggers that arrive meanwhile are skipped. After
/// a run completes, interval jobs are rescheduled to `completion + interval`.
pub struct JobScheduler {
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Task handles of running jobs, owned by the scheduler loop.
    running_handles: HashMap<String, JoinHandle<()>>,

    /// Cancellation tokens for each running job.
    job_cancel_tokens: HashMap<String, CancellationToken>,

    /// Interval jobs whose last start failed, with the time to try again.
    start_retry_at: HashMap<String, DateTime<Utc>>,

    server_store: Arc<dyn ServerStore>,

    hook_receiver: mpsc::Receiver<HookEvent>,

    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Job tasks report their id here when they finish.
    completion_tx: mpsc::UnboundedSender<String>,
    completion_receiver: mpsc::UnboundedReceiver<String>,

    shutdown_token: CancellationToken,

    job_context: JobContext,
}

impl JobScheduler {
    fn new(
        server_store: Arc<dyn ServerStore>,
        hook_receiver: mpsc::Receiver<HookEvent>,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        let (completion_tx, completion_receiver) = mpsc::unbounded_channel();
        Self {
            shared_state,
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            start_retry_at: HashMap::new(),
            server_store,
            hook_receiver,
            command_receiver,
            completion_tx,
            completion_receiver,
            shutdown_token,
            job_context,
        }
    }

    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        let mut state = self.shared_state.write().await;
        state.jobs.insert(job_id, job);
    }

    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop. Returns after the shutdown token is cancelled and
    /// running jobs have wound down.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);

        match self.server_store.get_running_jobs() {
            Ok(runs) => {
                for run in runs {
                    warn!(
                        "Run {} of {} (triggered by {}, started {}) was interrupted",
                        run.id,
                        run.job_id,
                        run.triggered_by,
                        run.started_at.to_rfc3339()
                    );
                }
            }
            Err(e) => {
                error!("Failed to list interrupted runs: {}", e);
            }
        }

        match self.server_store.mark_stale_jobs_failed() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale jobs as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale jobs: {}", e);
            }
        }

        self.trigger_jobs_for_hook(HookEvent::OnStartup).await;

        loop {
            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
                Some(job_id) = self.completion_receiver.recv() => {
                    self.finish_job(&job_id).await;
                }
                Some(event) = self.hook_receiver.recv() => {
                    debug!("Received hook event: {}", event);
                    self.trigger_jobs_for_hook(event).await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob { job_id, response } => {
                let result = self.trigger_job(&job_id).await;
                let _ = response.send(result);
            }
        }
    }

    async fn trigger_job(&mut self, job_id: &str) -> Result<(), JobError> {
        let state = self.shared_state.read().await;
        if !state.jobs.contains_key(job_id) {
            return Err(JobError::NotFound);
        }
        if state.running_jobs.contains(job_id) {
            return Err(JobError::AlreadyRunning);
        }
        drop(state);

        self.spawn_job(job_id, "manual").await;
        Ok(())
    }

    async fn time_until_next_scheduled_job(&self) -> Duration {
        let mut min_duration = MAX_IDLE_SLEEP;
        let now = Utc::now();

        let state = self.shared_state.read().await;
        for (job_id, job) in &state.jobs {
            if state.running_jobs.contains(job_id) {
                continue;
            }

            if let Some(next_run) = self.get_next_run_time(job_id, job.as_ref(), now) {
                if next_run <= now {
                    return Duration::ZERO;
                }
                let duration = (next_run - now).to_std().unwrap_or(Duration::ZERO);
                min_duration = min_duration.min(duration);
            }
        }

        min_duration
    }

    /// Next scheduled run for jobs with an interval. A job that has never
    /// been scheduled is due at `now`.
    fn get_next_run_time(
        &self,
        job_id: &str,
        job: &dyn BackgroundJob,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        job.schedule().interval()?;

        if let Some(retry_at) = self.start_retry_at.get(job_id) {
            if *retry_at > now {
                return Some(*retry_at);
            }
        }

        match self.server_store.get_schedule_state(job_id) {
            Ok(Some(state)) => Some(state.next_run_at),
            Ok(None) => Some(now),
            Err(e) => {
                warn!("Failed to read schedule state for {}: {}", job_id, e);
                None
            }
        }
    }

    async fn run_due_jobs(&mut self) {
        let now = Utc::now();
        let mut jobs_to_run = Vec::new();

        {
            let state = self.shared_state.read().await;
            for (job_id, job) in &state.jobs {
                if state.running_jobs.contains(job_id) {
                    continue;
                }
                if let Some(next_run) = self.get_next_run_time(job_id, job.as_ref(), now) {
                    if next_run <= now {
                        jobs_to_run.push(job_id.clone());
                    }
                }
            }
        }

        for job_id in jobs_to_run {
            self.spawn_job(&job_id, "schedule").await;
        }
    }

    async fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let mut jobs_to_trigger = Vec::new();

        {
            let state = self.shared_state.read().await;
            for (job_id, job) in &state.jobs {
                if !job.schedule().listens_to(event) {
                    continue;
                }
                if state.running_jobs.contains(job_id) {
                    debug!("Skipping hook trigger for already running job: {}", job_id);
                    continue;
                }
                jobs_to_trigger.push(job_id.clone());
            }
        }

        let trigger = format!("hook:{}", event);
        for job_id in jobs_to_trigger {
            self.spawn_job(&job_id, &trigger).await;
        }
    }

    fn schedule_next_run(
        &self,
        job_id: &str,
        interval: Duration,
        from: DateTime<Utc>,
        last_run_at: Option<DateTime<Utc>>,
    ) {
        let next_run_at = from + chrono::Duration::from_std(interval).unwrap_or_default();
        let state = JobScheduleState {
            job_id: job_id.to_string(),
            next_run_at,
            last_run_at,
        };
        if let Err(e) = self.server_store.update_schedule_state(&state) {
            error!("Failed to update schedule state for {}: {}", job_id, e);
        }
    }

    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let job = {
            let state = self.shared_state.read().await;
            match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => {
                    error!("Attempted to spawn unknown job: {}", job_id);
                    return;
                }
            }
        };

        let run_id = match self.server_store.record_job_start(job_id, triggered_by) {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to record job start for {}: {}", job_id, e);
                if let Some(interval) = job.schedule().interval() {
                    let delay = interval.min(START_RETRY_DELAY);
                    let retry_at =
                        Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                    self.start_retry_at.insert(job_id.to_string(), retry_at);
                }
                return;
            }
        };
        self.start_retry_at.remove(job_id);

        info!(
            "Starting job: {} (run_id: {}, triggered_by: {})",
            job_id, run_id, triggered_by
        );

        {
            let mut state = self.shared_state.write().await;
            state.running_jobs.insert(job_id.to_string());
        }

        // Push the schedule forward now so a process that dies mid-run does
        // not restart the job in a tight loop.
        if let Some(interval) = job.schedule().interval() {
            let last_run_at = self
                .server_store
                .get_schedule_state(job_id)
                .ok()
                .flatten()
                .and_then(|s| s.last_run_at);
            self.schedule_next_run(job_id, interval, Utc::now(), last_run_at);
        }

        metrics::set_background_job_running(job_id, true);

        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());
        let ctx = self.job_context.with_token(cancel_token);

        let server_store = Arc::clone(&self.server_store);
        let completion_tx = self.completion_tx.clone();
        let job_id_owned = job_id.to_string();

        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
            let elapsed = start_time.elapsed();

            let (status, error_msg, status_label) = match result {
                Ok(Ok(())) => {
                    info!(
                        "Job {} completed successfully in {:?}",
                        job_id_owned, elapsed
                    );
                    (JobRunStatus::Completed, None, "success")
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    (
                        JobRunStatus::Cancelled,
                        Some("Cancelled".to_string()),
                        "cancelled",
                    )
                }
                Ok(Err(e)) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    (JobRunStatus::Failed, Some(e.to_string()), "failed")
                }
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e);
                    (
                        JobRunStatus::Failed,
                        Some(format!("Task panic: {}", e)),
                        "panic",
                    )
                }
            };

            metrics::record_background_job_execution(&job_id_owned, status_label, elapsed);
            metrics::set_background_job_running(&job_id_owned, false);

            if let Err(e) = server_store.record_job_finish(run_id, status, error_msg) {
                error!("Failed to record job finish for {}: {}", job_id_owned, e);
            }

            let _ = completion_tx.send(job_id_owned);
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    /// Bookkeeping after a job task reported completion: reschedule interval
    /// jobs from now, then make the job startable again.
    async fn finish_job(&mut self, job_id: &str) {
        if let Some(handle) = self.running_handles.remove(job_id) {
            let _ = handle.await;
        }
        self.job_cancel_tokens.remove(job_id);

        let job = {
            let state = self.shared_state.read().await;
            state.jobs.get(job_id).cloned()
        };
        if let Some(interval) = job.and_then(|job| job.schedule().interval()) {
            let now = Utc::now();
            self.schedule_next_run(job_id, interval, now, Some(now));
        }

        let mut state = self.shared_state.write().await;
        state.running_jobs.remove(job_id);
    }

    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        let mut wait_jobs = Vec::new();
        {
            let state = self.shared_state.read().await;
            for (job_id, handle) in self.running_handles.drain() {
                let behavior = state
                    .jobs
                    .get(&job_id)
                    .map(|job| job.shutdown_behavior())
                    .unwrap_or_default();

                match behavior {
                    ShutdownBehavior::Cancellable => {
                        if let Some(token) = self.job_cancel_tokens.get(&job_id) {
                            debug!("Cancelling job: {}", job_id);
                            token.cancel();
                        }
                    }
                    ShutdownBehavior::WaitForCompletion => {
                        info!("Waiting for job {} to complete...", job_id);
                    }
                }
                wait_jobs.push((job_id, handle));
            }
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE_PERIOD;
        for (job_id, handle) in wait_jobs {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                warn!("Job {} did not stop within the shutdown grace period", job_id);
            }
        }

        self.job_cancel_tokens.clear();
        self.shared_state.write().await.running_jobs.clear();
        info!("Scheduler shutdown complete");
    }
}

/// Create a scheduler and its handle.
///
/// Jobs get a child of `job_context.cancellation_token`; pass a token that
/// is independent of `shutdown_token` so `WaitForCompletion` jobs are not
/// cancelled along with the scheduler.
pub fn create_scheduler(
    server_store: Arc<dyn ServerStore>,
    shutdown_token: CancellationToken,
    job_context: JobContext,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let (hook_tx, hook_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState {
        jobs: HashMap::new(),
        running_jobs: HashSet::new(),
    }));

    let scheduler = JobScheduler::new(
        Arc::clone(&server_store),
        hook_rx,
        command_rx,
        shutdown_token,
        job_context,
        Arc::clone(&shared_state),
    );

    let handle = SchedulerHandle::new(command_tx, hook_tx, shared_state, server_store);

    (scheduler, handle)
}
