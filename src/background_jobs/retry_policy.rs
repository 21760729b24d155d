use crate::article_store::{AttemptStatus, EnrichmentAttempt};
use crate::config::EnrichmentJobSettings;

/// Bounded retries with a fixed backoff for metadata enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts after which an attempt is given up.
    pub max_retries: u32,
    /// Delay before a failed attempt becomes eligible again.
    pub backoff_secs: u64,
    /// How long a claimed attempt stays invisible to other ticks.
    pub claim_lease_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_secs: 300,
            claim_lease_secs: 120,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &EnrichmentJobSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            backoff_secs: settings.retry_backoff_secs,
            claim_lease_secs: settings.claim_lease_secs,
        }
    }

    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Status an attempt should end up in after a failure has been recorded
    /// against it.
    pub fn status_after_failure(&self, attempt: &EnrichmentAttempt) -> AttemptStatus {
        if self.is_exhausted(attempt.retry_count) {
            AttemptStatus::Failed
        } else {
            AttemptStatus::Pending
        }
    }
}
