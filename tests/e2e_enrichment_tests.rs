//! End-to-end tests for metadata enrichment
//!
//! Drives enrichment ticks against real SQLite stores with a fixed clock and
//! checks the article and fetch ledger after each one.

mod common;

use article_worker::article_store::{enqueue_article, ArticleStore, AttemptStatus, EnrichmentAttempt};
use article_worker::background_jobs::jobs::MetadataEnrichmentJob;
use article_worker::background_jobs::JobContext;
use article_worker::metadata::FetchError;
use common::{
    enrichment_settings, page, FaultyArticleStore, ScriptedFetcher, TestStores, BACKOFF_SECS,
    LEASE_SECS, MAX_RETRIES, NOW, URL_A, URL_B, URL_C,
};
use std::sync::Arc;
use std::time::Duration;

fn enrichment_job(fetcher: &Arc<ScriptedFetcher>) -> MetadataEnrichmentJob {
    MetadataEnrichmentJob::new(enrichment_settings(), fetcher.clone())
}

fn save(store: &dyn ArticleStore, url: &str) -> EnrichmentAttempt {
    let article = enqueue_article(store, url, NOW - 10).unwrap();
    store.get_attempt_for_article(&article.id).unwrap().unwrap()
}

fn reload(store: &dyn ArticleStore, attempt: &EnrichmentAttempt) -> EnrichmentAttempt {
    store.get_enrichment_attempt(attempt.id).unwrap().unwrap()
}

fn tick_at(job: &MetadataEnrichmentJob, ctx: &JobContext, now: i64) {
    job.run_tick(ctx, || now).unwrap();
}

// =============================================================================
// Success and retry lifecycle
// =============================================================================

#[test]
fn test_successful_fetch_fills_in_article() {
    let stores = TestStores::new();
    let fetcher = Arc::new(ScriptedFetcher::new().serve(URL_A, page("T", "D", Some("http://i"))));
    let job = enrichment_job(&fetcher);
    let attempt = save(stores.article_store.as_ref(), URL_A);

    let stats = job.run_tick(&stores.job_context(), || NOW).unwrap();

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.succeeded, 1);

    let article = stores
        .article_store
        .get_article(&attempt.article_id)
        .unwrap()
        .unwrap();
    assert_eq!(article.title, "T");
    assert_eq!(article.description, "D");
    assert_eq!(article.image_url, "http://i");
    let metadata = article.metadata.unwrap();
    assert_eq!(metadata["title"], "T");
    assert_eq!(metadata["properties"]["og:image"][0], "http://i");

    let attempt = reload(stores.article_store.as_ref(), &attempt);
    assert_eq!(attempt.status, AttemptStatus::Success);
    assert_eq!(attempt.retry_count, 0);
    assert_eq!(attempt.last_attempt_at, Some(NOW));
    assert_eq!(attempt.error_message, "");
}

#[test]
fn test_failures_accumulate_until_attempt_fails() {
    let stores = TestStores::new();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let job = enrichment_job(&fetcher);
    let ctx = stores.job_context();
    let attempt = save(stores.article_store.as_ref(), URL_A);

    for tick in 0..MAX_RETRIES {
        let now = NOW + tick as i64 * BACKOFF_SECS;
        let stats = job.run_tick(&ctx, || now).unwrap();
        assert_eq!(stats.processed, 1);

        let current = reload(stores.article_store.as_ref(), &attempt);
        assert_eq!(current.retry_count, tick + 1);
        assert_eq!(current.last_attempt_at, Some(now));
        assert_eq!(current.next_attempt_at, Some(now + BACKOFF_SECS));
        assert!(current.error_message.contains("unexpected HTTP status 404"));

        if tick + 1 < MAX_RETRIES {
            assert_eq!(current.status, AttemptStatus::Pending);
            assert_eq!(stats.retried, 1);
        } else {
            assert_eq!(current.status, AttemptStatus::Failed);
            assert_eq!(stats.failed, 1);
        }
    }

    // Terminal attempts are never picked up again.
    let later = NOW + 10 * BACKOFF_SECS;
    let stats = job.run_tick(&ctx, || later).unwrap();
    assert_eq!(stats.processed, 0);
    assert_eq!(fetcher.calls_for(URL_A), MAX_RETRIES as usize);
}

#[test]
fn test_attempt_waits_for_backoff() {
    let stores = TestStores::new();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let job = enrichment_job(&fetcher);
    let ctx = stores.job_context();
    save(stores.article_store.as_ref(), URL_A);

    tick_at(&job, &ctx, NOW);
    let stats = job.run_tick(&ctx, || NOW + BACKOFF_SECS - 1).unwrap();

    assert_eq!(stats.processed, 0);
    assert_eq!(fetcher.calls_for(URL_A), 1);
}

#[test]
fn test_retry_then_success() {
    let stores = TestStores::new();
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .then(URL_A, Err(FetchError::Timeout))
            .serve(URL_A, page("T", "D", None)),
    );
    let job = enrichment_job(&fetcher);
    let ctx = stores.job_context();
    let attempt = save(stores.article_store.as_ref(), URL_A);

    let first = job.run_tick(&ctx, || NOW).unwrap();
    assert_eq!(first.retried, 1);
    let pending = reload(stores.article_store.as_ref(), &attempt);
    assert!(pending.error_message.contains("request timed out"));

    let second = job.run_tick(&ctx, || NOW + BACKOFF_SECS).unwrap();
    assert_eq!(second.succeeded, 1);

    let done = reload(stores.article_store.as_ref(), &attempt);
    assert_eq!(done.status, AttemptStatus::Success);
    assert_eq!(done.retry_count, 1);
    assert_eq!(done.error_message, "");

    let article = stores
        .article_store
        .get_article(&attempt.article_id)
        .unwrap()
        .unwrap();
    assert_eq!(article.title, "T");
}

#[test]
fn test_each_attempt_in_tick_is_independent() {
    let stores = TestStores::new();
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .serve(URL_A, page("A", "a", None))
            .serve(URL_C, page("C", "c", None)),
    );
    let job = enrichment_job(&fetcher);
    let a = save(stores.article_store.as_ref(), URL_A);
    let b = save(stores.article_store.as_ref(), URL_B);
    let c = save(stores.article_store.as_ref(), URL_C);

    let stats = job.run_tick(&stores.job_context(), || NOW).unwrap();

    assert_eq!(stats.processed, 3);
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.retried, 1);
    assert_eq!(
        reload(stores.article_store.as_ref(), &a).status,
        AttemptStatus::Success
    );
    assert_eq!(
        reload(stores.article_store.as_ref(), &b).status,
        AttemptStatus::Pending
    );
    assert_eq!(
        reload(stores.article_store.as_ref(), &c).status,
        AttemptStatus::Success
    );
    // Oldest first.
    assert_eq!(fetcher.calls(), vec![URL_A, URL_B, URL_C]);
}

// =============================================================================
// Ledger and store faults
// =============================================================================

#[test]
fn test_panicking_fetch_is_charged_as_failure() {
    let stores = TestStores::new();
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .panic_on(URL_A)
            .serve(URL_B, page("B", "about B", None)),
    );
    let job = enrichment_job(&fetcher);
    let ctx = stores.job_context();
    let store = stores.article_store.as_ref();
    let a = save(store, URL_A);
    let b = save(store, URL_B);

    let stats = job.run_tick(&ctx, || NOW).unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.retried, 1);
    assert_eq!(reload(store, &b).status, AttemptStatus::Success);

    let a_after_first = reload(store, &a);
    assert_eq!(a_after_first.status, AttemptStatus::Pending);
    assert_eq!(a_after_first.retry_count, 1);
    assert!(a_after_first.error_message.contains("panicked"));
    assert!(a_after_first.error_message.contains("fetcher blew up"));

    for tick in 1..MAX_RETRIES {
        tick_at(&job, &ctx, NOW + tick as i64 * BACKOFF_SECS);
    }

    let a_final = reload(store, &a);
    assert_eq!(a_final.status, AttemptStatus::Failed);
    assert_eq!(a_final.retry_count, MAX_RETRIES);
    assert_eq!(fetcher.calls_for(URL_A), MAX_RETRIES as usize);
    assert_eq!(fetcher.calls_for(URL_B), 1);
}

#[test]
fn test_ledger_error_does_not_abort_tick() {
    let stores = TestStores::new();
    let faulty = Arc::new(FaultyArticleStore::new(stores.article_store.clone()));
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .serve(URL_A, page("A", "a", None))
            .serve(URL_B, page("B", "b", None)),
    );
    let job = enrichment_job(&fetcher);
    let ctx = stores.job_context_with(faulty.clone());
    let a = save(faulty.as_ref(), URL_A);
    let b = save(faulty.as_ref(), URL_B);
    faulty.fail_status_writes_for(a.id);

    let stats = job.run_tick(&ctx, || NOW).unwrap();

    assert_eq!(stats.processed, 2);
    assert_eq!(stats.ledger_errors, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(reload(faulty.as_ref(), &b).status, AttemptStatus::Success);

    // Still pending and leased, so nothing happens until the lease runs out.
    let stuck = reload(faulty.as_ref(), &a);
    assert_eq!(stuck.status, AttemptStatus::Pending);
    assert_eq!(stuck.retry_count, 0);
    assert_eq!(stuck.next_attempt_at, Some(NOW + LEASE_SECS));

    faulty.clear_ledger_faults();
    let stats = job.run_tick(&ctx, || NOW + LEASE_SECS - 1).unwrap();
    assert_eq!(stats.processed, 0);

    let stats = job.run_tick(&ctx, || NOW + LEASE_SECS).unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(reload(faulty.as_ref(), &a).status, AttemptStatus::Success);
    assert_eq!(fetcher.calls_for(URL_A), 2);
}

#[test]
fn test_missing_article_counts_as_failure() {
    let stores = TestStores::new();
    let faulty = Arc::new(FaultyArticleStore::new(stores.article_store.clone()));
    let fetcher = Arc::new(ScriptedFetcher::new().serve(URL_A, page("A", "a", None)));
    let job = enrichment_job(&fetcher);
    let ctx = stores.job_context_with(faulty.clone());
    let attempt = save(faulty.as_ref(), URL_A);
    faulty.set_hide_articles(true);

    let stats = job.run_tick(&ctx, || NOW).unwrap();

    assert_eq!(stats.retried, 1);
    let current = reload(faulty.as_ref(), &attempt);
    assert_eq!(current.status, AttemptStatus::Pending);
    assert_eq!(current.retry_count, 1);
    assert!(current.error_message.contains("not found"));
}

#[test]
fn test_failed_article_update_refetches_on_retry() {
    let stores = TestStores::new();
    let faulty = Arc::new(FaultyArticleStore::new(stores.article_store.clone()));
    let fetcher = Arc::new(ScriptedFetcher::new().serve(URL_A, page("A", "a", None)));
    let job = enrichment_job(&fetcher);
    let ctx = stores.job_context_with(faulty.clone());
    let attempt = save(faulty.as_ref(), URL_A);
    faulty.set_fail_article_updates(true);

    let stats = job.run_tick(&ctx, || NOW).unwrap();
    assert_eq!(stats.retried, 1);
    let current = reload(faulty.as_ref(), &attempt);
    assert!(current.error_message.contains("failed to update article"));
    let article = faulty.get_article(&attempt.article_id).unwrap().unwrap();
    assert_eq!(article.title, "");

    faulty.set_fail_article_updates(false);
    let stats = job.run_tick(&ctx, || NOW + BACKOFF_SECS).unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(fetcher.calls_for(URL_A), 2);
    let article = faulty.get_article(&attempt.article_id).unwrap().unwrap();
    assert_eq!(article.title, "A");
}

#[test]
fn test_lost_terminal_write_is_retried_once_more() {
    let stores = TestStores::new();
    let faulty = Arc::new(FaultyArticleStore::new(stores.article_store.clone()));
    let fetcher = Arc::new(ScriptedFetcher::new());
    let job = enrichment_job(&fetcher);
    let ctx = stores.job_context_with(faulty.clone());
    let attempt = save(faulty.as_ref(), URL_A);

    for tick in 0..MAX_RETRIES - 1 {
        tick_at(&job, &ctx, NOW + tick as i64 * BACKOFF_SECS);
    }

    // The last failure is counted but the switch to failed is lost.
    faulty.fail_status_writes_for(attempt.id);
    let last = NOW + (MAX_RETRIES - 1) as i64 * BACKOFF_SECS;
    let stats = job.run_tick(&ctx, || last).unwrap();
    assert_eq!(stats.ledger_errors, 1);
    let current = reload(faulty.as_ref(), &attempt);
    assert_eq!(current.status, AttemptStatus::Pending);
    assert_eq!(current.retry_count, MAX_RETRIES);

    faulty.clear_ledger_faults();
    let stats = job.run_tick(&ctx, || last + BACKOFF_SECS).unwrap();
    assert_eq!(stats.failed, 1);
    let current = reload(faulty.as_ref(), &attempt);
    assert_eq!(current.status, AttemptStatus::Failed);
    assert_eq!(current.retry_count, MAX_RETRIES + 1);
    assert_eq!(fetcher.calls_for(URL_A), MAX_RETRIES as usize + 1);
}

// =============================================================================
// Ownership
// =============================================================================

#[test]
fn test_claimed_attempt_waits_for_lease_expiry() {
    let stores = TestStores::new();
    let fetcher = Arc::new(ScriptedFetcher::new().serve(URL_A, page("A", "a", None)));
    let job = enrichment_job(&fetcher);
    let ctx = stores.job_context();
    let attempt = save(stores.article_store.as_ref(), URL_A);

    // A worker that claimed the attempt and then died.
    assert!(stores
        .article_store
        .claim_attempt(attempt.id, NOW, LEASE_SECS as u64)
        .unwrap());

    let stats = job.run_tick(&ctx, || NOW + LEASE_SECS / 2).unwrap();
    assert_eq!(stats.processed, 0);
    assert!(fetcher.calls().is_empty());

    let stats = job.run_tick(&ctx, || NOW + LEASE_SECS).unwrap();
    assert_eq!(stats.succeeded, 1);
}

#[test]
fn test_concurrent_workers_fetch_each_url_once() {
    let stores = TestStores::new();
    let second_store = stores.open_second_article_store();
    let urls: Vec<String> = (0..6)
        .map(|i| format!("http://example.test/page-{}", i))
        .collect();

    let mut fetcher = ScriptedFetcher::new().with_delay(Duration::from_millis(50));
    for url in &urls {
        fetcher = fetcher.serve(url, page(url, "", None));
    }
    let fetcher = Arc::new(fetcher);
    for url in &urls {
        save(stores.article_store.as_ref(), url);
    }

    let contexts = [
        stores.job_context(),
        stores.job_context_with(second_store.clone()),
    ];
    let results: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = contexts
            .iter()
            .map(|ctx| {
                let job = enrichment_job(&fetcher);
                scope.spawn(move || job.run_tick(ctx, || NOW).unwrap())
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let succeeded: u64 = results.iter().map(|s| s.succeeded).sum();
    assert_eq!(succeeded, urls.len() as u64);
    for url in &urls {
        assert_eq!(fetcher.calls_for(url), 1, "{} fetched more than once", url);
    }
    assert!(stores
        .article_store
        .list_eligible_attempts(NOW + 10 * BACKOFF_SECS, MAX_RETRIES)
        .unwrap()
        .is_empty());
}

#[test]
fn test_enqueue_is_idempotent() {
    let stores = TestStores::new();
    let store = stores.article_store.as_ref();
    let fetcher = Arc::new(ScriptedFetcher::new().serve(URL_A, page("A", "a", None)));
    let job = enrichment_job(&fetcher);

    let first = enqueue_article(store, URL_A, NOW - 10).unwrap();
    let again = enqueue_article(store, URL_A, NOW - 5).unwrap();
    assert_eq!(first.id, again.id);
    assert_eq!(store.list_eligible_attempts(NOW, MAX_RETRIES).unwrap().len(), 1);

    tick_at(&job, &stores.job_context(), NOW);

    // Saving the URL again does not reopen a finished attempt.
    enqueue_article(store, URL_A, NOW + 1).unwrap();
    let attempt = store.get_attempt_for_article(&first.id).unwrap().unwrap();
    assert_eq!(attempt.status, AttemptStatus::Success);
    assert!(store
        .list_eligible_attempts(NOW + 1, MAX_RETRIES)
        .unwrap()
        .is_empty());
}
