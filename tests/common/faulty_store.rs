//! Article store wrapper that injects failures

#![allow(dead_code)]

use anyhow::{bail, Result};
use article_worker::article_store::{
    Article, ArticleStore, AttemptStatus, EnrichmentAttempt, RatedArticle, RatingStats,
    SqliteArticleStore,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Delegates to a real store, except where a fault is switched on.
pub struct FaultyArticleStore {
    inner: Arc<SqliteArticleStore>,
    hide_articles: AtomicBool,
    fail_article_updates: AtomicBool,
    failing_status_writes: Mutex<HashSet<i64>>,
    failing_retry_writes: Mutex<HashSet<i64>>,
}

impl FaultyArticleStore {
    pub fn new(inner: Arc<SqliteArticleStore>) -> Self {
        Self {
            inner,
            hide_articles: AtomicBool::new(false),
            fail_article_updates: AtomicBool::new(false),
            failing_status_writes: Mutex::new(HashSet::new()),
            failing_retry_writes: Mutex::new(HashSet::new()),
        }
    }

    /// `get_article` answers "not found" for every article.
    pub fn set_hide_articles(&self, hide: bool) {
        self.hide_articles.store(hide, Ordering::SeqCst);
    }

    pub fn set_fail_article_updates(&self, fail: bool) {
        self.fail_article_updates.store(fail, Ordering::SeqCst);
    }

    /// `set_attempt_status` fails for this attempt.
    pub fn fail_status_writes_for(&self, attempt_id: i64) {
        self.failing_status_writes.lock().unwrap().insert(attempt_id);
    }

    /// `increment_attempt_retry` fails for this attempt.
    pub fn fail_retry_writes_for(&self, attempt_id: i64) {
        self.failing_retry_writes.lock().unwrap().insert(attempt_id);
    }

    pub fn clear_ledger_faults(&self) {
        self.failing_status_writes.lock().unwrap().clear();
        self.failing_retry_writes.lock().unwrap().clear();
    }
}

impl ArticleStore for FaultyArticleStore {
    fn create_article(&self, url: &str, now: i64) -> Result<Article> {
        self.inner.create_article(url, now)
    }

    fn get_article(&self, article_id: &str) -> Result<Option<Article>> {
        if self.hide_articles.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.get_article(article_id)
    }

    fn update_article(&self, article: &Article, now: i64) -> Result<()> {
        if self.fail_article_updates.load(Ordering::SeqCst) {
            bail!("injected update failure");
        }
        self.inner.update_article(article, now)
    }

    fn create_enrichment_attempt(&self, article_id: &str, url: &str, now: i64) -> Result<bool> {
        self.inner.create_enrichment_attempt(article_id, url, now)
    }

    fn get_enrichment_attempt(&self, attempt_id: i64) -> Result<Option<EnrichmentAttempt>> {
        self.inner.get_enrichment_attempt(attempt_id)
    }

    fn get_attempt_for_article(&self, article_id: &str) -> Result<Option<EnrichmentAttempt>> {
        self.inner.get_attempt_for_article(article_id)
    }

    fn list_eligible_attempts(&self, now: i64, max_retries: u32) -> Result<Vec<EnrichmentAttempt>> {
        self.inner.list_eligible_attempts(now, max_retries)
    }

    fn claim_attempt(&self, attempt_id: i64, now: i64, lease_secs: u64) -> Result<bool> {
        self.inner.claim_attempt(attempt_id, now, lease_secs)
    }

    fn set_attempt_status(
        &self,
        attempt_id: i64,
        status: AttemptStatus,
        error_message: &str,
        now: i64,
    ) -> Result<bool> {
        if self.failing_status_writes.lock().unwrap().contains(&attempt_id) {
            bail!("injected ledger failure for attempt {}", attempt_id);
        }
        self.inner
            .set_attempt_status(attempt_id, status, error_message, now)
    }

    fn increment_attempt_retry(
        &self,
        attempt_id: i64,
        error_message: &str,
        now: i64,
        backoff_secs: u64,
    ) -> Result<Option<EnrichmentAttempt>> {
        if self.failing_retry_writes.lock().unwrap().contains(&attempt_id) {
            bail!("injected ledger failure for attempt {}", attempt_id);
        }
        self.inner
            .increment_attempt_retry(attempt_id, error_message, now, backoff_secs)
    }

    fn rate_article(&self, user_id: &str, article_id: &str, rate: u8, now: i64) -> Result<()> {
        self.inner.rate_article(user_id, article_id, rate, now)
    }

    fn refresh_rating_aggregate(&self, now: i64) -> Result<usize> {
        self.inner.refresh_rating_aggregate(now)
    }

    fn get_rating_stats(&self, article_id: &str) -> Result<Option<RatingStats>> {
        self.inner.get_rating_stats(article_id)
    }

    fn get_top_rated_articles(
        &self,
        exclude_user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RatedArticle>> {
        self.inner.get_top_rated_articles(exclude_user_id, limit)
    }
}
