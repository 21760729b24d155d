mod models;
mod schema;
mod sqlite_article_store;

pub use models::*;
pub use schema::ARTICLE_VERSIONED_SCHEMAS;
pub use sqlite_article_store::SqliteArticleStore;

use anyhow::Result;

/// Durable storage for articles, the metadata fetch ledger and the rating
/// aggregate.
///
/// All timestamps are unix seconds. Methods that depend on the current time
/// take it as a `now` argument.
pub trait ArticleStore: Send + Sync {
    // Articles

    /// Create an article for `url`, or return the existing one when the URL
    /// was already saved.
    fn create_article(&self, url: &str, now: i64) -> Result<Article>;
    fn get_article(&self, article_id: &str) -> Result<Option<Article>>;
    /// Overwrite title, description, image and metadata of an article.
    /// Fails if the article does not exist.
    fn update_article(&self, article: &Article, now: i64) -> Result<()>;

    // Metadata fetch ledger

    /// Create the pending attempt for an article. Calling it again for the
    /// same article is a no-op. Returns true if a row was created.
    fn create_enrichment_attempt(&self, article_id: &str, url: &str, now: i64) -> Result<bool>;
    fn get_enrichment_attempt(&self, attempt_id: i64) -> Result<Option<EnrichmentAttempt>>;
    fn get_attempt_for_article(&self, article_id: &str) -> Result<Option<EnrichmentAttempt>>;
    /// Attempts that are pending, have `retry_count <= max_retries` and are
    /// due at `now`, oldest first.
    fn list_eligible_attempts(&self, now: i64, max_retries: u32) -> Result<Vec<EnrichmentAttempt>>;

    // State transitions (atomic)

    /// Take exclusive ownership of an eligible attempt by pushing its
    /// `next_attempt_at` to `now + lease_secs`. Returns false if the row is
    /// no longer eligible (claimed by someone else, or finished).
    fn claim_attempt(&self, attempt_id: i64, now: i64, lease_secs: u64) -> Result<bool>;
    /// Move a pending attempt to `status`, stamping `last_attempt_at`.
    /// Returns false if the attempt is missing or already terminal.
    fn set_attempt_status(
        &self,
        attempt_id: i64,
        status: AttemptStatus,
        error_message: &str,
        now: i64,
    ) -> Result<bool>;
    /// Record a failed attempt: bump `retry_count`, stamp `last_attempt_at`,
    /// push `next_attempt_at` by `backoff_secs` and store the reason.
    /// Returns the row as it is in the ledger afterwards.
    fn increment_attempt_retry(
        &self,
        attempt_id: i64,
        error_message: &str,
        now: i64,
        backoff_secs: u64,
    ) -> Result<Option<EnrichmentAttempt>>;

    // Ratings

    /// Save (or re-rate) an article for a user. `rate` must be in 0..=5.
    fn rate_article(&self, user_id: &str, article_id: &str, rate: u8, now: i64) -> Result<()>;
    /// Recompute the rating aggregate in one transaction. Readers keep
    /// seeing the previous aggregate until it commits. Returns the number
    /// of articles in the new aggregate.
    fn refresh_rating_aggregate(&self, now: i64) -> Result<usize>;
    fn get_rating_stats(&self, article_id: &str) -> Result<Option<RatingStats>>;
    /// Best rated articles from the aggregate, excluding those the given
    /// user already saved.
    fn get_top_rated_articles(
        &self,
        exclude_user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RatedArticle>>;
}

/// Save an article for `url` and queue it for metadata enrichment. Saving a
/// URL twice returns the existing article and leaves its attempt untouched.
pub fn enqueue_article(store: &dyn ArticleStore, url: &str, now: i64) -> Result<Article> {
    let article = store.create_article(url, now)?;
    store.create_enrichment_attempt(&article.id, url, now)?;
    Ok(article)
}
