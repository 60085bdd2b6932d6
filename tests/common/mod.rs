#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use llmpal::catalog::{CatalogBackend, ModelCandidate};
use llmpal::BackendError;

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn candidate(backend: &str, repo: &str, file: &str, size: u64) -> ModelCandidate {
    ModelCandidate::from_file(backend, repo, file, Some(size), None, "")
}

/// Catalog backend with canned answers that counts how often it is asked.
pub struct FakeBackend {
    name: String,
    search_results: Result<Vec<ModelCandidate>, BackendError>,
    exact_results: Vec<ModelCandidate>,
    delay: Duration,
    search_calls: AtomicUsize,
    exact_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(name: &str) -> Self {
        FakeBackend {
            name: name.to_string(),
            search_results: Ok(Vec::new()),
            exact_results: Vec::new(),
            delay: Duration::ZERO,
            search_calls: AtomicUsize::new(0),
            exact_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_results(mut self, results: Vec<ModelCandidate>) -> Self {
        self.search_results = Ok(results);
        self
    }

    pub fn with_exact(mut self, results: Vec<ModelCandidate>) -> Self {
        self.exact_results = results;
        self
    }

    pub fn failing(mut self) -> Self {
        self.search_results = Err(BackendError::unavailable(&self.name, "connection refused"));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn exact_calls(&self) -> usize {
        self.exact_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.search_calls() + self.exact_calls()
    }
}

#[async_trait]
impl CatalogBackend for FakeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<ModelCandidate>, BackendError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.search_results.clone()
    }

    async fn resolve_exact(&self, _identifier: &str) -> Result<Vec<ModelCandidate>, BackendError> {
        self.exact_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.exact_results.clone())
    }

    fn download_url(&self, repo_id: &str, filename: &str) -> String {
        format!("https://{}.test/{}/resolve/main/{}", self.name, repo_id, filename)
    }
}
