//! Store fixtures backed by temporary SQLite files

#![allow(dead_code)]

use super::constants::{BACKOFF_SECS, LEASE_SECS, MAX_RETRIES};
use article_worker::article_store::{ArticleStore, SqliteArticleStore};
use article_worker::background_jobs::JobContext;
use article_worker::config::EnrichmentJobSettings;
use article_worker::server_store::{ServerStore, SqliteServerStore};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Both databases in a fresh temp directory. Dropping it removes the files.
pub struct TestStores {
    pub article_store: Arc<SqliteArticleStore>,
    pub server_store: Arc<SqliteServerStore>,
    _temp_dir: TempDir,
}

impl TestStores {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let article_store = Arc::new(
            SqliteArticleStore::new(temp_dir.path().join("articles.db"))
                .expect("Failed to open article store"),
        );
        let server_store = Arc::new(
            SqliteServerStore::new(temp_dir.path().join("server.db"))
                .expect("Failed to open server store"),
        );
        Self {
            article_store,
            server_store,
            _temp_dir: temp_dir,
        }
    }

    pub fn articles_db_path(&self) -> PathBuf {
        self._temp_dir.path().join("articles.db")
    }

    /// A second, independent store on the same articles database, as another
    /// worker process would have.
    pub fn open_second_article_store(&self) -> Arc<SqliteArticleStore> {
        Arc::new(
            SqliteArticleStore::new(self.articles_db_path())
                .expect("Failed to open second article store"),
        )
    }

    pub fn job_context(&self) -> JobContext {
        self.job_context_with(self.article_store.clone())
    }

    pub fn job_context_with(&self, article_store: Arc<dyn ArticleStore>) -> JobContext {
        JobContext::new(
            CancellationToken::new(),
            article_store,
            self.server_store.clone() as Arc<dyn ServerStore>,
        )
    }
}

pub fn enrichment_settings() -> EnrichmentJobSettings {
    EnrichmentJobSettings {
        max_retries: MAX_RETRIES,
        retry_backoff_secs: BACKOFF_SECS as u64,
        claim_lease_secs: LEASE_SECS as u64,
        ..Default::default()
    }
}
