use serde::{Deserialize, Serialize};

/// A saved article. Title, description, image and metadata are filled in
/// asynchronously by the enrichment job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub image_url: String,
    /// Raw page metadata as extracted by the fetcher.
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Lifecycle of an enrichment attempt. Moves only from `Pending` to one of
/// the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Success,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AttemptStatus::Pending),
            "success" => Some(AttemptStatus::Success),
            "failed" => Some(AttemptStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::Pending)
    }
}

/// One row of the retry ledger. There is at most one per article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentAttempt {
    pub id: i64,
    pub article_id: String,
    pub url: String,
    pub retry_count: u32,
    /// Unix timestamp of the last recorded outcome.
    pub last_attempt_at: Option<i64>,
    /// Unix timestamp before which the attempt is not eligible. `None` means now.
    pub next_attempt_at: Option<i64>,
    pub status: AttemptStatus,
    pub error_message: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Precomputed rating aggregate for one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingStats {
    pub article_id: String,
    pub average_rating: f64,
    pub rating_count: u32,
    pub refreshed_at: i64,
}

/// An article together with its aggregate rating, as served to ranking.
#[derive(Debug, Clone, Serialize)]
pub struct RatedArticle {
    pub article: Article,
    pub average_rating: f64,
    pub rating_count: u32,
}

/// Highest rating a user can give; 0 means "saved but not rated".
pub const MAX_RATING: u8 = 5;
