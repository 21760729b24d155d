//! A metadata fetcher driven by per-URL scripts

#![allow(dead_code)]

use article_worker::metadata::{FetchError, MetadataFetcher, PageMetadata};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Answers each URL from its script first, then from its steady page.
/// URLs with neither fail with a 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Result<PageMetadata, FetchError>>>>,
    pages: Mutex<HashMap<String, PageMetadata>>,
    calls: Mutex<Vec<String>>,
    panicking: Mutex<HashSet<String>>,
    delay: Option<Duration>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `url` with `metadata` once its script is used up.
    pub fn serve(self, url: &str, metadata: PageMetadata) -> Self {
        self.pages.lock().unwrap().insert(url.to_string(), metadata);
        self
    }

    /// Queue one answer for `url`.
    pub fn then(self, url: &str, result: Result<PageMetadata, FetchError>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(result);
        self
    }

    /// Panic on every fetch of `url`.
    pub fn panic_on(self, url: &str) -> Self {
        self.panicking.lock().unwrap().insert(url.to_string());
        self
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

impl MetadataFetcher for ScriptedFetcher {
    fn fetch(&self, url: &str) -> Result<PageMetadata, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let should_panic = self.panicking.lock().unwrap().contains(url);
        if should_panic {
            panic!("fetcher blew up on {}", url);
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front());
        if let Some(result) = scripted {
            return result;
        }

        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(FetchError::Status(404))
    }
}

/// Page metadata with an optional `og:image`.
pub fn page(title: &str, description: &str, image: Option<&str>) -> PageMetadata {
    let mut metadata = PageMetadata {
        title: title.to_string(),
        description: description.to_string(),
        ..Default::default()
    };
    if let Some(image) = image {
        metadata
            .properties
            .insert("og:image".to_string(), vec![image.to_string()]);
    }
    metadata
}
