//! Metadata enrichment background job.
//!
//! Each tick pulls the attempts that are due from the fetch ledger and, one
//! at a time, fetches the article's page and copies its title, description,
//! image and raw metadata onto the article.
//!
//! ## Per attempt
//!
//! ```text
//! claim (lease) → fetch → load article → update article → status success
//!                   └──────── any failure ───────┘
//!                             → retry_count + 1, next attempt after backoff
//!                             → status failed once retries are exhausted
//! ```
//!
//! Ledger write failures are logged and leave the attempt pending; it is
//! picked up again once its lease expires. A panic while enriching one
//! attempt is recorded as that attempt's failure.

use crate::article_store::{ArticleStore, AttemptStatus, EnrichmentAttempt};
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
    JobAuditLogger, RetryPolicy,
};
use crate::config::EnrichmentJobSettings;
use crate::metadata::MetadataFetcher;
use crate::metrics;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Counters for one enrichment tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentTickStats {
    /// Attempts this tick took ownership of.
    pub processed: u64,
    pub succeeded: u64,
    /// Failed but still pending.
    pub retried: u64,
    /// Failed for the last time.
    pub failed: u64,
    /// Claimed by someone else or finished in the meantime.
    pub skipped: u64,
    /// Ledger writes that did not go through.
    pub ledger_errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOutcome {
    Succeeded,
    Retried,
    Failed,
    Skipped,
    LedgerError,
}

impl EnrichmentTickStats {
    fn record(&mut self, outcome: AttemptOutcome) {
        if outcome != AttemptOutcome::Skipped {
            self.processed += 1;
        }
        match outcome {
            AttemptOutcome::Succeeded => self.succeeded += 1,
            AttemptOutcome::Retried => self.retried += 1,
            AttemptOutcome::Failed => self.failed += 1,
            AttemptOutcome::Skipped => self.skipped += 1,
            AttemptOutcome::LedgerError => self.ledger_errors += 1,
        }
    }

    fn report_metrics(&self) {
        metrics::record_enrichment_outcome("succeeded", self.succeeded);
        metrics::record_enrichment_outcome("retried", self.retried);
        metrics::record_enrichment_outcome("failed", self.failed);
        metrics::record_enrichment_outcome("skipped", self.skipped);
        metrics::record_enrichment_outcome("ledger_error", self.ledger_errors);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

pub struct MetadataEnrichmentJob {
    settings: EnrichmentJobSettings,
    policy: RetryPolicy,
    fetcher: Arc<dyn MetadataFetcher>,
}

impl MetadataEnrichmentJob {
    pub fn new(settings: EnrichmentJobSettings, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        let policy = RetryPolicy::from_settings(&settings);
        Self {
            settings,
            policy,
            fetcher,
        }
    }

    /// Run one tick. `clock` returns the current unix time; it is read once
    /// to select attempts and again before each attempt.
    pub fn run_tick<C>(&self, ctx: &JobContext, clock: C) -> Result<EnrichmentTickStats, JobError>
    where
        C: Fn() -> i64,
    {
        let store = ctx.article_store.as_ref();
        let mut stats = EnrichmentTickStats::default();

        let attempts = store
            .list_eligible_attempts(clock(), self.policy.max_retries)
            .map_err(|e| {
                JobError::ExecutionFailed(format!("Failed to list eligible attempts: {}", e))
            })?;

        if attempts.is_empty() {
            debug!("No metadata fetch attempts due");
            return Ok(stats);
        }

        info!("Processing {} metadata fetch attempts", attempts.len());

        for attempt in &attempts {
            if ctx.is_cancelled() {
                stats.report_metrics();
                return Err(JobError::Cancelled);
            }

            let outcome = self.process_attempt(store, attempt, clock());
            stats.record(outcome);
        }

        stats.report_metrics();
        info!(
            "Metadata enrichment tick complete: {} processed, {} succeeded, {} retried, {} failed, {} skipped",
            stats.processed, stats.succeeded, stats.retried, stats.failed, stats.skipped
        );

        Ok(stats)
    }

    fn process_attempt(
        &self,
        store: &dyn ArticleStore,
        attempt: &EnrichmentAttempt,
        now: i64,
    ) -> AttemptOutcome {
        match store.claim_attempt(attempt.id, now, self.policy.claim_lease_secs) {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    "Attempt {} for article {} was claimed elsewhere, skipping",
                    attempt.id, attempt.article_id
                );
                return AttemptOutcome::Skipped;
            }
            Err(e) => {
                error!(
                    "Failed to claim attempt {} for article {}: {}",
                    attempt.id, attempt.article_id, e
                );
                return AttemptOutcome::LedgerError;
            }
        }

        let enriched = panic::catch_unwind(AssertUnwindSafe(|| {
            self.enrich_article(store, attempt, now)
        }))
        .unwrap_or_else(|payload| Err(format!("panicked: {}", panic_message(payload.as_ref()))));

        match enriched {
            Ok(()) => self.record_success(store, attempt, now),
            Err(reason) => self.record_failure(store, attempt, &reason, now),
        }
    }

    /// Fetch the page and write its metadata onto the article. The error is
    /// the reason recorded in the ledger.
    fn enrich_article(
        &self,
        store: &dyn ArticleStore,
        attempt: &EnrichmentAttempt,
        now: i64,
    ) -> Result<(), String> {
        let metadata = self
            .fetcher
            .fetch(&attempt.url)
            .map_err(|e| format!("failed to fetch {}: {}", attempt.url, e))?;

        let metadata_json = serde_json::to_value(&metadata)
            .map_err(|e| format!("failed to serialize metadata: {}", e))?;

        let mut article = store
            .get_article(&attempt.article_id)
            .map_err(|e| format!("failed to load article: {}", e))?
            .ok_or_else(|| format!("article {} not found", attempt.article_id))?;

        article.title = metadata.title.clone();
        article.description = metadata.description.clone();
        if let Some(image_url) = metadata.image_url() {
            article.image_url = image_url.to_string();
        }
        article.metadata = Some(metadata_json);

        store
            .update_article(&article, now)
            .map_err(|e| format!("failed to update article: {}", e))
    }

    fn record_success(
        &self,
        store: &dyn ArticleStore,
        attempt: &EnrichmentAttempt,
        now: i64,
    ) -> AttemptOutcome {
        match store.set_attempt_status(attempt.id, AttemptStatus::Success, "", now) {
            Ok(true) => {
                debug!(
                    "Enriched article {} from {}",
                    attempt.article_id, attempt.url
                );
                AttemptOutcome::Succeeded
            }
            Ok(false) => {
                warn!(
                    "Attempt {} for article {} was no longer pending when marking success",
                    attempt.id, attempt.article_id
                );
                AttemptOutcome::Skipped
            }
            Err(e) => {
                error!(
                    "Failed to mark attempt {} for article {} as succeeded: {}",
                    attempt.id, attempt.article_id, e
                );
                AttemptOutcome::LedgerError
            }
        }
    }

    fn record_failure(
        &self,
        store: &dyn ArticleStore,
        attempt: &EnrichmentAttempt,
        reason: &str,
        now: i64,
    ) -> AttemptOutcome {
        warn!(
            "Metadata fetch attempt {} for article {} failed: {}",
            attempt.id, attempt.article_id, reason
        );

        let updated =
            match store.increment_attempt_retry(attempt.id, reason, now, self.policy.backoff_secs) {
                Ok(Some(updated)) => updated,
                Ok(None) => {
                    warn!(
                        "Attempt {} for article {} disappeared before recording failure",
                        attempt.id, attempt.article_id
                    );
                    return AttemptOutcome::Skipped;
                }
                Err(e) => {
                    error!(
                        "Failed to record failure for attempt {} (article {}): {}",
                        attempt.id, attempt.article_id, e
                    );
                    return AttemptOutcome::LedgerError;
                }
            };

        if updated.status != AttemptStatus::Pending {
            debug!(
                "Attempt {} for article {} was already {} when recording failure",
                attempt.id,
                attempt.article_id,
                updated.status.as_str()
            );
            return AttemptOutcome::Skipped;
        }

        if self.policy.status_after_failure(&updated) == AttemptStatus::Pending {
            return AttemptOutcome::Retried;
        }

        match store.set_attempt_status(attempt.id, AttemptStatus::Failed, reason, now) {
            Ok(true) => {
                info!(
                    "Giving up on article {} after {} attempts: {}",
                    attempt.article_id, updated.retry_count, reason
                );
                AttemptOutcome::Failed
            }
            Ok(false) => AttemptOutcome::Skipped,
            Err(e) => {
                error!(
                    "Failed to mark attempt {} for article {} as failed: {}",
                    attempt.id, attempt.article_id, e
                );
                AttemptOutcome::LedgerError
            }
        }
    }
}

impl BackgroundJob for MetadataEnrichmentJob {
    fn id(&self) -> &'static str {
        "metadata_enrichment"
    }

    fn name(&self) -> &'static str {
        "Metadata Enrichment"
    }

    fn description(&self) -> &'static str {
        "Fetch webpage metadata for newly saved articles"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(Duration::from_secs(self.settings.interval_secs)),
            hooks: vec![HookEvent::OnArticleCreated],
        }
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let audit = JobAuditLogger::start(
            Arc::clone(&ctx.server_store),
            self.id(),
            Some(serde_json::json!({
                "max_retries": self.policy.max_retries,
                "backoff_secs": self.policy.backoff_secs,
            })),
        );
        let outcome = self.run_tick(ctx, || chrono::Utc::now().timestamp());
        audit.finish(&outcome);
        outcome.map(|_| ())
    }
}
