use std::sync::Arc;

use crate::config::FetchConfig;
use crate::error::AppError;
use crate::fingerprint::FingerprintGenerator;
use crate::models::{Engine, FetchRequest, FetchResult, NetworkPath};
use crate::proxy_pool::ProxyPool;
use crate::robots::RobotsCache;
use crate::traits::{CircuitRoute, PageExtractor, RenderRequest, Renderer, RobotsSource};

/// Reason carried by [`FetchResult::Blocked`] when robots.txt disallows a URL.
pub const ROBOTS_BLOCKED: &str = "robots_blocked";

/// Orchestrates one acquisition: compliance → engine → network path → render → extract.
///
/// Generic over the renderer, the extractor and the robots source so every
/// stage can be replaced by a mock in tests.
#[derive(Clone)]
pub struct ContentFetcher<R, X, S>
where
    R: Renderer,
    X: PageExtractor,
    S: RobotsSource,
{
    renderer: R,
    extractor: X,
    robots: RobotsCache<S>,
    proxies: Option<ProxyPool>,
    circuit: Option<Arc<dyn CircuitRoute>>,
    fingerprints: Arc<FingerprintGenerator>,
    config: FetchConfig,
}

impl<R, X, S> ContentFetcher<R, X, S>
where
    R: Renderer,
    X: PageExtractor,
    S: RobotsSource,
{
    pub fn new(renderer: R, extractor: X, robots_source: S, config: FetchConfig) -> Self {
        Self {
            renderer,
            extractor,
            robots: RobotsCache::new(robots_source),
            proxies: None,
            circuit: None,
            fingerprints: Arc::new(FingerprintGenerator::new()),
            config,
        }
    }

    /// Route requests through proxies served by `pool`.
    pub fn with_proxy_pool(mut self, pool: ProxyPool) -> Self {
        self.proxies = Some(pool);
        self
    }

    /// Route every request through an anonymity circuit. Takes precedence
    /// over the proxy pool.
    pub fn with_circuit(mut self, circuit: Arc<dyn CircuitRoute>) -> Self {
        self.circuit = Some(circuit);
        self
    }

    pub fn with_fingerprints(mut self, generator: FingerprintGenerator) -> Self {
        self.fingerprints = Arc::new(generator);
        self
    }

    pub fn robots(&self) -> &RobotsCache<S> {
        &self.robots
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Crawl `url` with the configured default engine.
    pub async fn crawl_url(
        &self,
        url: &str,
        force_override: bool,
        use_dynamic: Option<bool>,
    ) -> FetchResult {
        let request = FetchRequest::new(url, self.config.default_engine)
            .force(force_override)
            .dynamic(use_dynamic);
        self.crawl(&request).await
    }

    /// Run the full pipeline for one request. Never panics and never returns
    /// a partially populated result.
    pub async fn crawl(&self, request: &FetchRequest) -> FetchResult {
        let url = request.url.as_str();

        // 1. Compliance
        if !request.force_override
            && !self.robots.is_allowed(url, &self.config.robots_agent).await
        {
            return FetchResult::Blocked {
                reason: ROBOTS_BLOCKED.to_string(),
            };
        }

        // 2. Engine
        let engine = request.effective_engine();
        tracing::info!(url = %url, engine = %engine, "Fetching");

        // 3 & 4. Network path + render, with retries
        let html = match self.render_with_retry(url, engine).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!(url = %url, engine = %engine, error = %e, "Fetch failed");
                return FetchResult::failed(&e);
            }
        };
        tracing::debug!(url = %url, bytes = html.len(), "Rendered");

        // 5. Extract
        match self.extractor.extract(&html, url) {
            Ok(page) => {
                tracing::info!(
                    url = %url,
                    text_bytes = page.text.len(),
                    images = page.image_urls.len(),
                    videos = page.video_urls.len(),
                    "Extraction complete"
                );
                page.into()
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Extraction failed");
                FetchResult::failed(&e)
            }
        }
    }

    async fn render_with_retry(&self, url: &str, engine: Engine) -> Result<String, AppError> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            let path = self.select_path()?;
            let fingerprint = self.fingerprints.generate_for(engine);
            let result = self
                .renderer
                .render(RenderRequest {
                    url,
                    engine,
                    fingerprint: &fingerprint,
                    path: &path,
                })
                .await;
            self.report_path_outcome(&path, &result);

            match result {
                Ok(html) => return Ok(html),
                Err(e) if retry.should_retry(&e, attempt) => {
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        url = %url,
                        path = %path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Circuit if configured, else the next pooled proxy, else direct.
    fn select_path(&self) -> Result<NetworkPath, AppError> {
        if let Some(circuit) = &self.circuit {
            return Ok(NetworkPath::Circuit(circuit.proxy_url()));
        }
        if let Some(pool) = &self.proxies
            && let Some(address) = pool.get_proxy()
        {
            return Ok(NetworkPath::Proxy(address));
        }
        if self.config.require_proxy {
            return Err(AppError::ProxyUnavailable);
        }
        Ok(NetworkPath::Direct)
    }

    fn report_path_outcome(&self, path: &NetworkPath, result: &Result<String, AppError>) {
        let (Some(pool), NetworkPath::Proxy(address)) = (&self.proxies, path) else {
            return;
        };
        match result {
            Ok(_) => pool.report_success(address),
            Err(e) if e.implicates_path() => pool.report_failure(address),
            Err(_) => {}
        }
    }
}
