//! Per-origin crawl delay for polite fetching.
//!
//! Wraps any [`Renderer`] so that consecutive sessions against the same
//! origin are spaced by at least the configured delay, plus random jitter.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use veil_core::throttle::{ThrottleConfig, ThrottledRenderer};
//!
//! # fn wrap<R: veil_core::traits::Renderer>(inner: R) {
//! let config = ThrottleConfig::new(Duration::from_secs(1))
//!     .with_jitter(Duration::from_millis(500));
//! let renderer = ThrottledRenderer::new(inner, config);
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;
use url::Url;

use crate::error::AppError;
use crate::traits::{RenderRequest, Renderer};

/// Configuration for the throttled renderer.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum delay between consecutive requests to the same origin.
    pub delay: Duration,

    /// Maximum random jitter added on top of `delay` (uniform [0, jitter]).
    pub jitter: Duration,
}

impl ThrottleConfig {
    /// Create a new config with the given per-origin delay and no jitter.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
        }
    }

    /// Add random jitter (uniform [0, jitter]) on top of the base delay.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// A zero delay turns the wrapper into a pass-through.
    pub fn is_disabled(&self) -> bool {
        self.delay.is_zero() && self.jitter.is_zero()
    }

    /// Compute the effective delay for a single wait (delay + random jitter).
    fn effective_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.delay;
        }
        self.delay + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}

impl Default for ThrottleConfig {
    /// 1 second delay, 500ms jitter.
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            jitter: Duration::from_millis(500),
        }
    }
}

/// A [`Renderer`] wrapper that enforces per-origin throttling.
///
/// Tracks the last request time for each origin (scheme + host + port) and
/// sleeps before dispatching if the minimum delay hasn't elapsed.
#[derive(Clone)]
pub struct ThrottledRenderer<R> {
    inner: R,
    config: ThrottleConfig,
    last_request: Arc<Mutex<HashMap<String, Instant>>>,
}

impl<R: Renderer> ThrottledRenderer<R> {
    pub fn new(inner: R, config: ThrottleConfig) -> Self {
        Self {
            inner,
            config,
            last_request: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait until the per-origin delay has elapsed, then record the current
    /// time as the last request for this origin.
    async fn wait_for_origin(&self, origin: &str) {
        let mut map = self.last_request.lock().await;
        let now = Instant::now();
        let ready_at = map
            .get(origin)
            .map(|&last| last + self.config.effective_delay())
            .filter(|&at| at > now);

        match ready_at {
            Some(at) => {
                // Reserve the slot, then drop the lock while sleeping so other
                // origins aren't blocked and later callers queue behind us.
                map.insert(origin.to_string(), at);
                drop(map);
                let sleep_duration = at - now;
                tracing::debug!(
                    origin = %origin,
                    sleep_ms = %sleep_duration.as_millis(),
                    "Throttling request"
                );
                tokio::time::sleep(sleep_duration).await;
            }
            None => {
                map.insert(origin.to_string(), now);
            }
        }
    }
}

impl<R: Renderer> Renderer for ThrottledRenderer<R> {
    async fn render(&self, request: RenderRequest<'_>) -> Result<String, AppError> {
        if !self.config.is_disabled()
            && let Some(origin) = origin_key(request.url)
        {
            self.wait_for_origin(&origin).await;
        }
        self.inner.render(request).await
    }
}

/// Extract the origin key from a URL (`scheme://host:port`).
pub fn origin_key(url_str: &str) -> Option<String> {
    let url = Url::parse(url_str).ok()?;
    let host = url.host_str()?;
    let port = url
        .port_or_known_default()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();
    Some(format!("{}://{}{}", url.scheme(), host, port))
}
