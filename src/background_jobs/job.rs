use super::context::JobContext;
use std::time::Duration;

/// When a job runs. Interval runs are measured from the end of the
/// previous run, so a slow run delays the next one instead of overlapping it.
#[derive(Debug, Clone)]
pub enum JobSchedule {
    Interval(Duration),
    Hook(HookEvent),
    Combined {
        interval: Option<Duration>,
        hooks: Vec<HookEvent>,
    },
}

impl JobSchedule {
    pub fn interval(&self) -> Option<Duration> {
        match self {
            JobSchedule::Interval(interval) => Some(*interval),
            JobSchedule::Hook(_) => None,
            JobSchedule::Combined { interval, .. } => *interval,
        }
    }

    pub fn hooks(&self) -> &[HookEvent] {
        match self {
            JobSchedule::Interval(_) => &[],
            JobSchedule::Hook(event) => std::slice::from_ref(event),
            JobSchedule::Combined { hooks, .. } => hooks,
        }
    }

    pub fn listens_to(&self, event: HookEvent) -> bool {
        self.hooks().contains(&event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Fired once when the scheduler starts.
    OnStartup,
    /// An article was saved and has a pending metadata fetch.
    OnArticleCreated,
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookEvent::OnStartup => write!(f, "OnStartup"),
            HookEvent::OnArticleCreated => write!(f, "OnArticleCreated"),
        }
    }
}

/// What happens to a running job when the scheduler shuts down. Either
/// way the scheduler stops waiting after its shutdown deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownBehavior {
    /// The job's token is cancelled; it stops at its next check.
    #[default]
    Cancellable,
    /// The job's token is left alone and the run is awaited.
    WaitForCompletion,
}

#[derive(Debug)]
pub enum JobError {
    NotFound,
    AlreadyRunning,
    ExecutionFailed(String),
    Cancelled,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::NotFound => write!(f, "Job not found"),
            JobError::AlreadyRunning => write!(f, "Job is already running"),
            JobError::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
            JobError::Cancelled => write!(f, "Job was cancelled"),
        }
    }
}

impl std::error::Error for JobError {}

/// A unit of periodic or event-driven work run by the scheduler.
pub trait BackgroundJob: Send + Sync {
    /// Stable id, used as the key for run history and schedule state.
    fn id(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schedule(&self) -> JobSchedule;

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    /// Runs on a blocking thread. Long jobs check `ctx.is_cancelled()`
    /// between units of work and return `JobError::Cancelled` when it is set.
    fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}
