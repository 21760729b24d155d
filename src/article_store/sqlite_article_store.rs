//! SQLite-backed article store.

use super::models::{
    Article, AttemptStatus, EnrichmentAttempt, RatedArticle, RatingStats, MAX_RATING,
};
use super::schema::ARTICLE_VERSIONED_SCHEMAS;
use super::ArticleStore;
use crate::sqlite_persistence::open_versioned_db;
use anyhow::{anyhow, bail, Context, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const ARTICLE_COLUMNS: &str =
    "id, url, title, description, image_url, metadata, created_at, updated_at";

const ATTEMPT_COLUMNS: &str = "id, article_id, url, retry_count, last_attempt_at, \
     next_attempt_at, status, error_message, created_at, updated_at";

/// Unix time `secs` after `now`, or an error when it does not fit.
fn seconds_after(now: i64, secs: u64) -> Result<i64> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| now.checked_add(secs))
        .ok_or_else(|| anyhow!("{} seconds after {} is out of range", secs, now))
}

/// SQLite-backed article store.
///
/// Writes go through a single write connection; reads use a separate
/// read-only connection so that WAL readers are never blocked by the
/// aggregate rebuild.
#[derive(Clone)]
pub struct SqliteArticleStore {
    read_conn: Arc<Mutex<Connection>>,
    write_conn: Arc<Mutex<Connection>>,
}

impl SqliteArticleStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();

        let write_conn = open_versioned_db(path, ARTICLE_VERSIONED_SCHEMAS, "article")?;
        write_conn
            .pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode on article write connection")?;

        let read_conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open article database for reading")?;

        let pending: i64 = read_conn.query_row(
            "SELECT COUNT(*) FROM metadata_fetch_attempts WHERE status = ?1",
            params![AttemptStatus::Pending.as_str()],
            |r| r.get(0),
        )?;
        info!("Article store ready: {} pending metadata fetches", pending);

        Ok(Self {
            read_conn: Arc::new(Mutex::new(read_conn)),
            write_conn: Arc::new(Mutex::new(write_conn)),
        })
    }

    fn row_to_article(row: &rusqlite::Row) -> rusqlite::Result<Article> {
        let metadata_idx = row.as_ref().column_index("metadata")?;
        let metadata = match row.get::<_, Option<String>>(metadata_idx)? {
            Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(metadata_idx, Type::Text, Box::new(e))
            })?),
            None => None,
        };
        Ok(Article {
            id: row.get("id")?,
            url: row.get("url")?,
            title: row.get("title")?,
            description: row.get("description")?,
            image_url: row.get("image_url")?,
            metadata,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn row_to_attempt(row: &rusqlite::Row) -> rusqlite::Result<EnrichmentAttempt> {
        let status_str: String = row.get("status")?;
        let retry_count: i64 = row.get("retry_count")?;
        Ok(EnrichmentAttempt {
            id: row.get("id")?,
            article_id: row.get("article_id")?,
            url: row.get("url")?,
            retry_count: retry_count.max(0) as u32,
            last_attempt_at: row.get("last_attempt_at")?,
            next_attempt_at: row.get("next_attempt_at")?,
            // Unknown values are treated as terminal so they are never picked up again
            status: AttemptStatus::parse(&status_str).unwrap_or(AttemptStatus::Failed),
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn query_attempt(conn: &Connection, attempt_id: i64) -> Result<Option<EnrichmentAttempt>> {
        let attempt = conn
            .query_row(
                &format!(
                    "SELECT {} FROM metadata_fetch_attempts WHERE id = ?1",
                    ATTEMPT_COLUMNS
                ),
                params![attempt_id],
                Self::row_to_attempt,
            )
            .optional()?;
        Ok(attempt)
    }
}

impl ArticleStore for SqliteArticleStore {
    fn create_article(&self, url: &str, now: i64) -> Result<Article> {
        let conn = self.write_conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO articles (id, url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(url) DO NOTHING",
            params![id, url, now],
        )?;

        let article = conn.query_row(
            &format!("SELECT {} FROM articles WHERE url = ?1", ARTICLE_COLUMNS),
            params![url],
            Self::row_to_article,
        )?;
        Ok(article)
    }

    fn get_article(&self, article_id: &str) -> Result<Option<Article>> {
        let conn = self.read_conn.lock().unwrap();
        let article = conn
            .query_row(
                &format!("SELECT {} FROM articles WHERE id = ?1", ARTICLE_COLUMNS),
                params![article_id],
                Self::row_to_article,
            )
            .optional()?;
        Ok(article)
    }

    fn update_article(&self, article: &Article, now: i64) -> Result<()> {
        let conn = self.write_conn.lock().unwrap();
        let metadata = article.metadata.as_ref().map(|m| m.to_string());

        let updated = conn.execute(
            "UPDATE articles
             SET title = ?1, description = ?2, image_url = ?3, metadata = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                article.title,
                article.description,
                article.image_url,
                metadata,
                now,
                article.id
            ],
        )?;
        if updated == 0 {
            bail!("Article {} not found", article.id);
        }
        Ok(())
    }

    fn create_enrichment_attempt(&self, article_id: &str, url: &str, now: i64) -> Result<bool> {
        let conn = self.write_conn.lock().unwrap();
        let inserted = conn
            .execute(
                "INSERT INTO metadata_fetch_attempts (article_id, url, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(article_id) DO NOTHING",
                params![article_id, url, AttemptStatus::Pending.as_str(), now],
            )
            .with_context(|| format!("Failed to create fetch attempt for article {}", article_id))?;
        if inserted == 0 {
            debug!("Fetch attempt for article {} already exists", article_id);
        }
        Ok(inserted > 0)
    }

    fn get_enrichment_attempt(&self, attempt_id: i64) -> Result<Option<EnrichmentAttempt>> {
        let conn = self.read_conn.lock().unwrap();
        Self::query_attempt(&conn, attempt_id)
    }

    fn get_attempt_for_article(&self, article_id: &str) -> Result<Option<EnrichmentAttempt>> {
        let conn = self.read_conn.lock().unwrap();
        let attempt = conn
            .query_row(
                &format!(
                    "SELECT {} FROM metadata_fetch_attempts WHERE article_id = ?1",
                    ATTEMPT_COLUMNS
                ),
                params![article_id],
                Self::row_to_attempt,
            )
            .optional()?;
        Ok(attempt)
    }

    fn list_eligible_attempts(&self, now: i64, max_retries: u32) -> Result<Vec<EnrichmentAttempt>> {
        let conn = self.read_conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM metadata_fetch_attempts
             WHERE status = ?1
               AND retry_count <= ?2
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?3)
             ORDER BY created_at ASC, id ASC",
            ATTEMPT_COLUMNS
        ))?;

        let attempts = stmt
            .query_map(
                params![AttemptStatus::Pending.as_str(), max_retries, now],
                Self::row_to_attempt,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attempts)
    }

    fn claim_attempt(&self, attempt_id: i64, now: i64, lease_secs: u64) -> Result<bool> {
        let lease_until = seconds_after(now, lease_secs)?;
        let conn = self.write_conn.lock().unwrap();
        let claimed = conn.execute(
            "UPDATE metadata_fetch_attempts
             SET next_attempt_at = ?1, updated_at = ?2
             WHERE id = ?3
               AND status = ?4
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?2)",
            params![
                lease_until,
                now,
                attempt_id,
                AttemptStatus::Pending.as_str()
            ],
        )?;
        Ok(claimed == 1)
    }

    fn set_attempt_status(
        &self,
        attempt_id: i64,
        status: AttemptStatus,
        error_message: &str,
        now: i64,
    ) -> Result<bool> {
        let conn = self.write_conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE metadata_fetch_attempts
             SET status = ?1, error_message = ?2, last_attempt_at = ?3, updated_at = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                status.as_str(),
                error_message,
                now,
                attempt_id,
                AttemptStatus::Pending.as_str()
            ],
        )?;
        Ok(updated == 1)
    }

    fn increment_attempt_retry(
        &self,
        attempt_id: i64,
        error_message: &str,
        now: i64,
        backoff_secs: u64,
    ) -> Result<Option<EnrichmentAttempt>> {
        let next_attempt_at = seconds_after(now, backoff_secs)?;
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "UPDATE metadata_fetch_attempts
             SET retry_count = retry_count + 1,
                 last_attempt_at = ?1,
                 next_attempt_at = ?2,
                 error_message = ?3,
                 updated_at = ?1
             WHERE id = ?4 AND status = ?5",
            params![
                now,
                next_attempt_at,
                error_message,
                attempt_id,
                AttemptStatus::Pending.as_str()
            ],
        )?;
        Self::query_attempt(&conn, attempt_id)
    }

    fn rate_article(&self, user_id: &str, article_id: &str, rate: u8, now: i64) -> Result<()> {
        if rate > MAX_RATING {
            bail!("Rating {} is out of range (0..={})", rate, MAX_RATING);
        }
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_articles (user_id, article_id, rate, collected_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, article_id) DO UPDATE SET rate = excluded.rate",
            params![user_id, article_id, rate, now],
        )
        .with_context(|| format!("Failed to rate article {}", article_id))?;
        Ok(())
    }

    fn refresh_rating_aggregate(&self, now: i64) -> Result<usize> {
        let mut conn = self.write_conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM article_rating_stats", [])?;
        let rows = tx.execute(
            "INSERT INTO article_rating_stats (article_id, average_rating, rating_count, refreshed_at)
             SELECT article_id, AVG(rate), COUNT(*), ?1
             FROM user_articles
             WHERE rate > 0
             GROUP BY article_id",
            params![now],
        )?;
        tx.commit()?;
        Ok(rows)
    }

    fn get_rating_stats(&self, article_id: &str) -> Result<Option<RatingStats>> {
        let conn = self.read_conn.lock().unwrap();
        let stats = conn
            .query_row(
                "SELECT article_id, average_rating, rating_count, refreshed_at
                 FROM article_rating_stats WHERE article_id = ?1",
                params![article_id],
                |row| {
                    Ok(RatingStats {
                        article_id: row.get(0)?,
                        average_rating: row.get(1)?,
                        rating_count: row.get(2)?,
                        refreshed_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(stats)
    }

    fn get_top_rated_articles(
        &self,
        exclude_user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RatedArticle>> {
        let conn = self.read_conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT a.id, a.url, a.title, a.description, a.image_url, a.metadata,
                    a.created_at, a.updated_at, s.average_rating, s.rating_count
             FROM article_rating_stats s
             JOIN articles a ON a.id = s.article_id
             WHERE ?1 IS NULL
                OR a.id NOT IN (SELECT article_id FROM user_articles WHERE user_id = ?1)
             ORDER BY s.average_rating DESC, s.rating_count DESC, a.created_at DESC
             LIMIT ?2",
        )?;

        let articles = stmt
            .query_map(params![exclude_user_id, limit as i64], |row| {
                Ok(RatedArticle {
                    article: Self::row_to_article(row)?,
                    average_rating: row.get("average_rating")?,
                    rating_count: row.get("rating_count")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(articles)
    }
}
