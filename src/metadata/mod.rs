//! Webpage metadata extraction.
//!
//! A [`MetadataFetcher`] turns a URL into [`PageMetadata`]: the page title,
//! its description and every Open Graph (`og:*`) property it declares.

mod html;
mod http_fetcher;

pub use html::extract_metadata;
pub use http_fetcher::HttpMetadataFetcher;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; MetaMini/1.0)";

/// Metadata extracted from a webpage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: String,
    pub description: String,
    /// Open Graph properties keyed by lower-cased property name. Repeated
    /// properties keep every value in document order.
    pub properties: BTreeMap<String, Vec<String>>,
}

impl PageMetadata {
    /// First value of an Open Graph property, e.g. `og:image`.
    pub fn first_property(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn image_url(&self) -> Option<&str> {
        self.first_property("og:image")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Fetches and parses webpages.
///
/// Implementations are called from blocking job threads.
pub trait MetadataFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<PageMetadata, FetchError>;
}
