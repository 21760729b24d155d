use anyhow::{Context, Result};
use article_worker::article_store::{enqueue_article, ArticleStore, SqliteArticleStore};
use article_worker::background_jobs::jobs::{MetadataEnrichmentJob, RatingAggregateRefreshJob};
use article_worker::background_jobs::{create_scheduler, HookEvent, JobContext};
use article_worker::config::{AppConfig, CliConfig, FileConfig};
use article_worker::metadata::HttpMetadataFetcher;
use article_worker::metrics;
use article_worker::server_store::{ServerStore, SqliteServerStore};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding articles.db and server.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// The port for the metrics server (Prometheus scraping). 0 disables it.
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// Save a URL and queue it for metadata enrichment before starting.
    /// Can be given multiple times.
    #[clap(long = "enqueue", value_name = "URL")]
    pub enqueue: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        metrics_port: cli_args.metrics_port,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening article store at {:?}", config.articles_db_path());
    let article_store = Arc::new(SqliteArticleStore::new(config.articles_db_path())?);
    info!("Opening server store at {:?}", config.server_db_path());
    let server_store = Arc::new(SqliteServerStore::new(config.server_db_path())?);

    let now = chrono::Utc::now().timestamp();
    for url in &cli_args.enqueue {
        let article = enqueue_article(article_store.as_ref(), url, now)?;
        info!("Queued article {} for {}", article.id, url);
    }

    metrics::init_metrics();
    if config.metrics_port != 0 {
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = metrics::run_metrics_server(port).await {
                error!("Metrics server stopped: {}", e);
            }
        });
    }

    let fetcher = Arc::new(HttpMetadataFetcher::new(
        &config.enrichment.user_agent,
        Duration::from_secs(config.enrichment.fetch_timeout_secs),
    )?);

    let shutdown_token = CancellationToken::new();
    let job_context = JobContext::new(
        CancellationToken::new(),
        article_store.clone() as Arc<dyn ArticleStore>,
        server_store.clone() as Arc<dyn ServerStore>,
    );
    let (mut scheduler, scheduler_handle) = create_scheduler(
        server_store as Arc<dyn ServerStore>,
        shutdown_token.clone(),
        job_context,
    );

    scheduler
        .register_job(Arc::new(MetadataEnrichmentJob::new(
            config.enrichment.clone(),
            fetcher,
        )))
        .await;
    scheduler
        .register_job(Arc::new(RatingAggregateRefreshJob::new(
            config.aggregate_refresh.clone(),
        )))
        .await;

    for job in scheduler_handle.list_jobs().await? {
        info!(
            "Registered job {} (every {:?}s, hooks {:?}), next run at {}",
            job.id,
            job.interval_secs,
            job.hooks,
            job.next_run_at.as_deref().unwrap_or("startup")
        );
    }

    let mut scheduler_task = tokio::spawn(async move { scheduler.run().await });

    if !cli_args.enqueue.is_empty() {
        scheduler_handle.notify(HookEvent::OnArticleCreated).await;
    }

    tokio::select! {
        result = &mut scheduler_task => {
            if let Err(e) = result {
                error!("Scheduler task failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            shutdown_token.cancel();
            if let Err(e) = scheduler_task.await {
                error!("Scheduler task failed: {}", e);
            }
        }
    }

    info!("Bye");
    Ok(())
}
