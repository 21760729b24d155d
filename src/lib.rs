pub mod article_store;
pub mod background_jobs;
pub mod config;
pub mod metadata;
pub mod metrics;
pub mod server_store;
pub mod sqlite_persistence;
