mod file_config;

pub use file_config::{AggregateRefreshConfig, EnrichmentConfig, FileConfig};

use crate::metadata::DEFAULT_USER_AGENT;
use anyhow::{bail, Result};
use std::path::PathBuf;

/// Upper bound for every configured interval, backoff and lease.
pub const MAX_DELAY_SECS: u64 = 365 * 24 * 60 * 60;

fn check_interval(name: &str, secs: u64) -> Result<()> {
    if secs == 0 {
        bail!("{} must be greater than 0", name);
    }
    check_delay(name, secs)
}

fn check_delay(name: &str, secs: u64) -> Result<()> {
    if secs > MAX_DELAY_SECS {
        bail!("{} ({}) must be at most {}", name, secs, MAX_DELAY_SECS);
    }
    Ok(())
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub metrics_port: u16,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    /// 0 disables the metrics endpoint.
    pub metrics_port: u16,

    pub enrichment: EnrichmentJobSettings,
    pub aggregate_refresh: AggregateRefreshJobSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let enrichment_file = file.enrichment.unwrap_or_default();
        let enrichment_defaults = EnrichmentJobSettings::default();
        let enrichment = EnrichmentJobSettings {
            interval_secs: enrichment_file
                .interval_secs
                .unwrap_or(enrichment_defaults.interval_secs),
            max_retries: enrichment_file
                .max_retries
                .unwrap_or(enrichment_defaults.max_retries),
            retry_backoff_secs: enrichment_file
                .retry_backoff_secs
                .unwrap_or(enrichment_defaults.retry_backoff_secs),
            claim_lease_secs: enrichment_file
                .claim_lease_secs
                .unwrap_or(enrichment_defaults.claim_lease_secs),
            fetch_timeout_secs: enrichment_file
                .fetch_timeout_secs
                .unwrap_or(enrichment_defaults.fetch_timeout_secs),
            user_agent: enrichment_file
                .user_agent
                .unwrap_or(enrichment_defaults.user_agent),
        };
        enrichment.validate()?;

        let refresh_file = file.aggregate_refresh.unwrap_or_default();
        let aggregate_refresh = AggregateRefreshJobSettings {
            interval_secs: refresh_file
                .interval_secs
                .unwrap_or(AggregateRefreshJobSettings::default().interval_secs),
        };
        check_interval("aggregate_refresh.interval_secs", aggregate_refresh.interval_secs)?;

        Ok(Self {
            db_dir,
            metrics_port,
            enrichment,
            aggregate_refresh,
        })
    }

    pub fn articles_db_path(&self) -> PathBuf {
        self.db_dir.join("articles.db")
    }

    pub fn server_db_path(&self) -> PathBuf {
        self.db_dir.join("server.db")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentJobSettings {
    pub interval_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
    /// Must exceed `fetch_timeout_secs`, otherwise a slow fetch can lose its
    /// claim to another tick.
    pub claim_lease_secs: u64,
    pub fetch_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for EnrichmentJobSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_retries: 3,
            retry_backoff_secs: 300,
            claim_lease_secs: 120,
            fetch_timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl EnrichmentJobSettings {
    pub fn validate(&self) -> Result<()> {
        check_interval("enrichment.interval_secs", self.interval_secs)?;
        check_delay("enrichment.retry_backoff_secs", self.retry_backoff_secs)?;
        check_delay("enrichment.claim_lease_secs", self.claim_lease_secs)?;
        if self.max_retries == 0 {
            bail!("enrichment.max_retries must be at least 1");
        }
        if self.fetch_timeout_secs == 0 {
            bail!("enrichment.fetch_timeout_secs must be greater than 0");
        }
        if self.claim_lease_secs <= self.fetch_timeout_secs {
            bail!(
                "enrichment.claim_lease_secs ({}) must be greater than fetch_timeout_secs ({})",
                self.claim_lease_secs,
                self.fetch_timeout_secs
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRefreshJobSettings {
    pub interval_secs: u64,
}

impl Default for AggregateRefreshJobSettings {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}
