pub mod metadata_enrichment;
pub mod rating_aggregate_refresh;

pub use metadata_enrichment::{EnrichmentTickStats, MetadataEnrichmentJob};
pub use rating_aggregate_refresh::RatingAggregateRefreshJob;
