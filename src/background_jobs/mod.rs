//! Background job scheduling and execution.
//!
//! Jobs run on fixed intervals, in response to hook events, or both. The
//! scheduler never runs two copies of the same job at once.

mod audit_logger;
mod context;
mod handle;
mod job;
pub mod jobs;
mod retry_policy;
mod scheduler;

pub use audit_logger::JobAuditLogger;
pub use context::JobContext;
pub use handle::{JobInfo, JobRunInfo, SchedulerHandle};
pub use job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
pub use retry_policy::RetryPolicy;
pub use scheduler::{create_scheduler, JobScheduler};
