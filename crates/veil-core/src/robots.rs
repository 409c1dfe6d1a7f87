//! robots.txt compliance cache.
//!
//! Each origin's policy is fetched at most once per process. Concurrent
//! lookups for an origin that is not cached yet share a single fetch
//! (`moka`'s `get_with` coalesces initializers for the same key).
//!
//! Policy retrieval fails open: a network error, a timeout, or any status
//! other than 200/404 marks the origin as unavailable, which allows
//! everything.

use std::sync::Arc;

use moka::future::Cache;
use robotstxt::DefaultMatcher;

use crate::throttle::origin_key;
use crate::traits::RobotsSource;

/// Cached policy for one origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotsPolicy {
    /// robots.txt body (empty for a 404).
    Rules(Arc<str>),
    /// Could not be retrieved: allow all.
    Unavailable,
}

impl RobotsPolicy {
    pub fn allows(&self, agent: &str, url: &str) -> bool {
        match self {
            RobotsPolicy::Unavailable => true,
            RobotsPolicy::Rules(body) if body.trim().is_empty() => true,
            RobotsPolicy::Rules(body) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(body, agent, url)
            }
        }
    }
}

/// Answers "may `agent` fetch `url`" from each origin's robots.txt.
#[derive(Clone)]
pub struct RobotsCache<S> {
    source: S,
    policies: Cache<String, RobotsPolicy>,
}

impl<S: RobotsSource> RobotsCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            policies: Cache::builder().build(),
        }
    }

    pub async fn is_allowed(&self, url: &str, agent: &str) -> bool {
        let Some(origin) = origin_key(url) else {
            tracing::debug!(url = %url, "Unparseable URL, skipping robots check");
            return true;
        };

        let policy = self.policy_for(&origin).await;
        let allowed = policy.allows(agent, url);
        if !allowed {
            tracing::info!(url = %url, agent = %agent, "robots.txt disallows URL");
        }
        allowed
    }

    /// Cached policy for an origin key, fetching it on first use.
    pub async fn policy_for(&self, origin: &str) -> RobotsPolicy {
        self.policies
            .get_with(origin.to_string(), self.load(origin))
            .await
    }

    /// Number of origins with a cached policy.
    pub fn cached_origins(&self) -> u64 {
        self.policies.entry_count()
    }

    async fn load(&self, origin: &str) -> RobotsPolicy {
        let robots_url = robots_url_for(origin);
        match self.source.fetch_robots(&robots_url).await {
            Ok(resp) if resp.status == 200 => {
                tracing::debug!(origin = %origin, bytes = resp.body.len(), "Loaded robots.txt");
                RobotsPolicy::Rules(Arc::from(resp.body))
            }
            Ok(resp) if resp.status == 404 => RobotsPolicy::Rules(Arc::from("")),
            Ok(resp) => {
                tracing::warn!(
                    origin = %origin,
                    status = resp.status,
                    "robots.txt unavailable, allowing all"
                );
                RobotsPolicy::Unavailable
            }
            Err(e) => {
                tracing::warn!(
                    origin = %origin,
                    error = %e,
                    "Failed to fetch robots.txt, allowing all"
                );
                RobotsPolicy::Unavailable
            }
        }
    }
}

/// `https://example.com:443` becomes `https://example.com/robots.txt`.
fn robots_url_for(origin: &str) -> String {
    let trimmed = origin
        .strip_suffix(":443")
        .filter(|_| origin.starts_with("https://"))
        .or_else(|| {
            origin
                .strip_suffix(":80")
                .filter(|_| origin.starts_with("http://"))
        })
        .unwrap_or(origin);
    format!("{trimmed}/robots.txt")
}
