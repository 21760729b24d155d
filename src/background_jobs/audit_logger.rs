//! Job audit logging.

use super::job::JobError;
use crate::server_store::{JobAuditEventType, ServerStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Audit trail of a single job run: a `started` entry when created and one
/// `completed` or `failed` entry from [`JobAuditLogger::finish`].
///
/// Audit writes never fail the job; a store error is only logged.
pub struct JobAuditLogger {
    server_store: Arc<dyn ServerStore>,
    job_id: &'static str,
    started: Instant,
}

impl JobAuditLogger {
    pub fn start(
        server_store: Arc<dyn ServerStore>,
        job_id: &'static str,
        details: Option<serde_json::Value>,
    ) -> Self {
        let logger = Self {
            server_store,
            job_id,
            started: Instant::now(),
        };
        logger.write(JobAuditEventType::Started, None, details.as_ref(), None);
        logger
    }

    /// Successful outcomes are stored serialized as the entry details.
    pub fn finish<T: Serialize>(&self, outcome: &Result<T, JobError>) {
        let duration_ms = Some(self.started.elapsed().as_millis() as i64);
        match outcome {
            Ok(value) => {
                let details = serde_json::to_value(value).ok();
                self.write(
                    JobAuditEventType::Completed,
                    duration_ms,
                    details.as_ref(),
                    None,
                );
            }
            Err(e) => {
                let error = e.to_string();
                self.write(JobAuditEventType::Failed, duration_ms, None, Some(&error));
            }
        }
    }

    fn write(
        &self,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) {
        let written =
            self.server_store
                .log_job_audit(self.job_id, event_type, duration_ms, details, error);
        if let Err(e) = written {
            warn!(
                "Could not write {} audit entry for {}: {}",
                event_type.as_str(),
                self.job_id,
                e
            );
        }
    }
}
