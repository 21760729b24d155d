use crate::article_store::ArticleStore;
use crate::server_store::ServerStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Cancelled when the scheduler shuts down.
    pub cancellation_token: CancellationToken,

    /// Articles, the enrichment ledger and the rating aggregate.
    pub article_store: Arc<dyn ArticleStore>,

    /// Job history, schedules and the audit log.
    pub server_store: Arc<dyn ServerStore>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        article_store: Arc<dyn ArticleStore>,
        server_store: Arc<dyn ServerStore>,
    ) -> Self {
        Self {
            cancellation_token,
            article_store,
            server_store,
        }
    }

    /// Same stores, different cancellation token.
    pub fn with_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            article_store: Arc::clone(&self.article_store),
            server_store: Arc::clone(&self.server_store),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
