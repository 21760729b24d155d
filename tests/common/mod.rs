//! Common test infrastructure
//!
//! This module provides the stores, fetchers and fault injection used by the
//! end-to-end tests. Tests should only import from this module, not from
//! internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{page, ScriptedFetcher, TestStores, NOW};
//!
//! #[test]
//! fn test_enrich_one_article() {
//!     let stores = TestStores::new();
//!     let fetcher = ScriptedFetcher::new().serve("http://a", page("A", "about A", None));
//!     // build a MetadataEnrichmentJob and call run_tick(&stores.job_context(), || NOW)
//! }
//! ```

mod constants;
mod faulty_store;
mod fetcher;
mod fixtures;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use faulty_store::FaultyArticleStore;
#[allow(unused_imports)]
pub use fetcher::{page, ScriptedFetcher};
#[allow(unused_imports)]
pub use fixtures::{enrichment_settings, TestStores};
