//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AppError;
use crate::fingerprint::Fingerprint;
use crate::models::{CheckpointRecord, Engine, NetworkPath, PageContent};
use crate::traits::{
    CircuitRoute, PageExtractor, ProxyProber, ProxySource, RangeSource, RenderRequest, Renderer,
    RobotsResponse, RobotsSource,
};

// ---------------------------------------------------------------------------
// MockRenderer
// ---------------------------------------------------------------------------

/// What a [`MockRenderer`] saw for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRender {
    pub url: String,
    pub engine: Engine,
    pub path: NetworkPath,
    pub fingerprint: Fingerprint,
}

/// Mock renderer that returns queued responses.
#[derive(Clone)]
pub struct MockRenderer {
    /// Queue of responses. Each call pops the first element.
    /// If empty, returns a default HTML string.
    responses: Arc<Mutex<Vec<Result<String, AppError>>>>,
    pub calls: Arc<Mutex<Vec<RecordedRender>>>,
}

impl MockRenderer {
    pub fn new(html: &str) -> Self {
        Self::with_responses(vec![Ok(html.to_string())])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn recorded(&self) -> Vec<RecordedRender> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Renderer for MockRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<String, AppError> {
        self.calls.lock().unwrap().push(RecordedRender {
            url: request.url.to_string(),
            engine: request.engine,
            path: request.path.clone(),
            fingerprint: request.fingerprint.clone(),
        });
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok("<html><body>default</body></html>".to_string())
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor: the markup becomes the text, media come from the mock.
#[derive(Clone, Default)]
pub struct MockExtractor {
    content: Arc<Mutex<PageContent>>,
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockExtractor {
    pub fn passthrough() -> Self {
        Self::default()
    }

    pub fn with_media(images: &[&str], videos: &[&str]) -> Self {
        let content = PageContent {
            text: String::new(),
            image_urls: images.iter().map(|s| s.to_string()).collect(),
            video_urls: videos.iter().map(|s| s.to_string()).collect(),
        };
        Self {
            content: Arc::new(Mutex::new(content)),
            error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            content: Arc::new(Mutex::new(PageContent::default())),
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl PageExtractor for MockExtractor {
    fn extract(&self, html: &str, _page_url: &str) -> Result<PageContent, AppError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        let mut content = self.content.lock().unwrap().clone();
        content.text = html.to_string();
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// MockRobotsSource
// ---------------------------------------------------------------------------

/// Mock robots source with a fixed answer, optional latency, and call log.
#[derive(Clone)]
pub struct MockRobotsSource {
    response: Arc<Mutex<Option<RobotsResponse>>>,
    error: Arc<Mutex<Option<String>>>,
    delay: Duration,
    urls: Arc<Mutex<Vec<String>>>,
}

impl MockRobotsSource {
    pub fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            response: Arc::new(Mutex::new(Some(RobotsResponse {
                status,
                body: body.to_string(),
            }))),
            error: Arc::new(Mutex::new(None)),
            delay: Duration::ZERO,
            urls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every fetch fails with a transport error carrying `error`'s message.
    pub fn error(error: AppError) -> Self {
        Self {
            response: Arc::new(Mutex::new(None)),
            error: Arc::new(Mutex::new(Some(error.to_string()))),
            delay: Duration::ZERO,
            urls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl RobotsSource for MockRobotsSource {
    async fn fetch_robots(&self, robots_url: &str) -> Result<RobotsResponse, AppError> {
        self.urls.lock().unwrap().push(robots_url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(msg) = self.error.lock().unwrap().clone() {
            return Err(AppError::TransportFailure(msg));
        }
        Ok(self
            .response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(RobotsResponse {
                status: 404,
                body: String::new(),
            }))
    }
}

// ---------------------------------------------------------------------------
// MockProxySource / MockProber
// ---------------------------------------------------------------------------

/// Mock proxy list.
pub struct MockProxySource {
    name: String,
    addresses: Vec<String>,
    fail: bool,
    pub calls: Arc<AtomicUsize>,
}

impl MockProxySource {
    pub fn new(name: &str, addresses: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            addresses: addresses.iter().map(|s| s.to_string()).collect(),
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name, &[])
        }
    }
}

impl ProxySource for MockProxySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn discover(&self) -> Result<Vec<String>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::TransportFailure(format!("{} is down", self.name)));
        }
        Ok(self.addresses.clone())
    }
}

/// Mock prober accepting a fixed set of addresses.
#[derive(Clone)]
pub struct MockProber {
    good: Arc<HashSet<String>>,
    delay: Duration,
    pub probed: Arc<Mutex<Vec<String>>>,
}

impl MockProber {
    pub fn accepting(good: &[&str]) -> Self {
        Self {
            good: Arc::new(good.iter().map(|s| s.to_string()).collect()),
            delay: Duration::ZERO,
            probed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }
}

impl ProxyProber for MockProber {
    async fn probe(&self, address: &str) -> bool {
        self.probed.lock().unwrap().push(address.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.good.contains(address)
    }
}

// ---------------------------------------------------------------------------
// MockRangeSource
// ---------------------------------------------------------------------------

/// Mock remote resource served from memory.
#[derive(Clone)]
pub struct MockRangeSource {
    data: Arc<Vec<u8>>,
    size_error: bool,
    ignores_ranges: bool,
    /// Chunk start offsets that fail exactly once.
    fail_once: Arc<Mutex<HashSet<u64>>>,
    /// Checkpoint file read before every chunk fetch.
    observe: Option<PathBuf>,
    pub observed: Arc<Mutex<Vec<u64>>>,
    pub ranges: Arc<Mutex<Vec<(u64, u64)>>>,
    /// Number of ranged requests answered with the whole resource.
    pub ignored_ranges: Arc<AtomicUsize>,
    pub full_fetches: Arc<AtomicUsize>,
}

impl MockRangeSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            size_error: false,
            ignores_ranges: false,
            fail_once: Arc::new(Mutex::new(HashSet::new())),
            observe: None,
            observed: Arc::new(Mutex::new(Vec::new())),
            ranges: Arc::new(Mutex::new(Vec::new())),
            ignored_ranges: Arc::new(AtomicUsize::new(0)),
            full_fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Behave like a server that answers every `Range` with `200`.
    pub fn ignoring_ranges(mut self) -> Self {
        self.ignores_ranges = true;
        self
    }

    pub fn without_size(mut self) -> Self {
        self.size_error = true;
        self
    }

    pub fn failing_once_at(self, start: u64) -> Self {
        self.fail_once.lock().unwrap().insert(start);
        self
    }

    pub fn observing(mut self, checkpoint: PathBuf) -> Self {
        self.observe = Some(checkpoint);
        self
    }

    pub fn fetched_ranges(&self) -> Vec<(u64, u64)> {
        let mut ranges = self.ranges.lock().unwrap().clone();
        ranges.sort_unstable();
        ranges
    }
}

impl RangeSource for MockRangeSource {
    async fn content_length(&self, _url: &str) -> Result<u64, AppError> {
        if self.size_error {
            return Err(AppError::TransportFailure("HEAD failed".into()));
        }
        Ok(self.data.len() as u64)
    }

    async fn fetch_range(&self, _url: &str, start: u64, end: u64) -> Result<Vec<u8>, AppError> {
        if let Some(path) = &self.observe
            && let Ok(raw) = std::fs::read_to_string(path)
            && let Ok(record) = serde_json::from_str::<CheckpointRecord>(&raw)
        {
            self.observed.lock().unwrap().push(record.downloaded);
        }
        // Yield so chunks interleave.
        tokio::task::yield_now().await;
        if self.ignores_ranges {
            self.ignored_ranges.fetch_add(1, Ordering::SeqCst);
            return Err(AppError::RangeUnsupported(format!("200 for bytes={start}-{end}")));
        }
        if self.fail_once.lock().unwrap().remove(&start) {
            return Err(AppError::TransportFailure(format!(
                "connection reset at {start}"
            )));
        }
        self.ranges.lock().unwrap().push((start, end));
        let end = (end as usize).min(self.data.len() - 1);
        Ok(self.data[start as usize..=end].to_vec())
    }

    async fn fetch_all(&self, _url: &str, dest: &std::path::Path) -> Result<u64, AppError> {
        self.full_fetches.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(dest, self.data.as_slice()).await?;
        Ok(self.data.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// StaticCircuit
// ---------------------------------------------------------------------------

/// Circuit route with a fixed proxy URL.
pub struct StaticCircuit(pub String);

impl CircuitRoute for StaticCircuit {
    fn proxy_url(&self) -> String {
        self.0.clone()
    }
}
