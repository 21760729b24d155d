use anyhow::{Context, Result};
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;
use tracing::info;

/// Metric name prefix for all worker metrics
const PREFIX: &str = "article_worker";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Background job metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_background_job_executions_total"),
            "Total background job executions"
        ),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(
            format!("{PREFIX}_background_job_running"),
            "Whether a background job is currently running (1) or not (0)"
        ),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");

    // Enrichment metrics
    pub static ref ENRICHMENT_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            format!("{PREFIX}_enrichment_attempts_total"),
            "Metadata enrichment attempts by outcome"
        ),
        &["outcome"]
    ).expect("Failed to create enrichment_attempts_total metric");

    pub static ref RATING_AGGREGATE_ARTICLES: Gauge = Gauge::new(
        format!("{PREFIX}_rating_aggregate_articles"),
        "Number of articles in the last refreshed rating aggregate"
    ).expect("Failed to create rating_aggregate_articles metric");
}

pub fn init_metrics() {
    // Ignore errors if already registered (tests)
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(ENRICHMENT_ATTEMPTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RATING_AGGREGATE_ARTICLES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record a finished background job run. `status` is one of
/// "success", "failed", "cancelled" or "panic".
pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

/// Count enrichment attempts by outcome, e.g. "succeeded", "retried",
/// "failed", "skipped" or "ledger_error".
pub fn record_enrichment_outcome(outcome: &str, count: u64) {
    if count > 0 {
        ENRICHMENT_ATTEMPTS_TOTAL
            .with_label_values(&[outcome])
            .inc_by(count);
    }
}

pub fn set_rating_aggregate_size(articles: usize) {
    RATING_AGGREGATE_ARTICLES.set(articles as f64);
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Serve `GET /metrics` on localhost until the process exits.
pub async fn run_metrics_server(port: u16) -> Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", port))?;
    info!("Metrics available at port {}", port);
    Ok(axum::serve(listener, app).await?)
}
