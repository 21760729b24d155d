//! Periodically recomputes the per-article rating aggregate that ranking
//! reads from.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
    JobAuditLogger,
};
use crate::config::AggregateRefreshJobSettings;
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub struct RatingAggregateRefreshJob {
    settings: AggregateRefreshJobSettings,
}

impl RatingAggregateRefreshJob {
    pub fn new(settings: AggregateRefreshJobSettings) -> Self {
        Self { settings }
    }
}

impl BackgroundJob for RatingAggregateRefreshJob {
    fn id(&self) -> &'static str {
        "rating_aggregate_refresh"
    }

    fn name(&self) -> &'static str {
        "Rating Aggregate Refresh"
    }

    fn description(&self) -> &'static str {
        "Recompute average rating and rating count per article"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(Duration::from_secs(self.settings.interval_secs)),
            hooks: vec![HookEvent::OnStartup],
        }
    }

    // A started refresh always runs to commit.
    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::WaitForCompletion
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let audit = JobAuditLogger::start(Arc::clone(&ctx.server_store), self.id(), None);

        let now = chrono::Utc::now().timestamp();
        let outcome = match ctx.article_store.refresh_rating_aggregate(now) {
            Ok(articles) => {
                info!("Refreshed rating aggregate for {} articles", articles);
                metrics::set_rating_aggregate_size(articles);
                Ok(serde_json::json!({ "articles": articles }))
            }
            Err(e) => {
                error!("Failed to refresh rating aggregate: {}", e);
                Err(JobError::ExecutionFailed(format!(
                    "Failed to refresh rating aggregate: {}",
                    e
                )))
            }
        };
        audit.finish(&outcome);
        outcome.map(|_| ())
    }
}
