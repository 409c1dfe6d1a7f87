//! Immutable configuration for every acquisition component.
//!
//! Built once at startup (defaults, then `VEIL_*` environment overrides, then
//! CLI flags) and handed to constructors by value.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::models::Engine;
use crate::retry::RetryConfig;
use crate::throttle::ThrottleConfig;

/// Settings for [`crate::crawler::ContentFetcher`] and its renderers.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub default_engine: Engine,
    /// Bounds every HTTP request and every browser session.
    pub request_timeout: Duration,
    /// Product token matched against robots.txt user-agent groups.
    pub robots_agent: String,
    /// Fail with `ProxyUnavailable` instead of falling back to direct access.
    pub require_proxy: bool,
    /// Post-load wait for [`Engine::ChromiumSettled`].
    pub settle_delay: Duration,
    /// Extra quiet period after navigation for [`Engine::ChromiumIdle`].
    pub idle_grace: Duration,
    pub retry: RetryConfig,
    pub throttle: ThrottleConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            default_engine: Engine::ChromiumIdle,
            request_timeout: Duration::from_secs(10),
            robots_agent: "VeilCrawler".to_string(),
            require_proxy: false,
            settle_delay: Duration::from_secs(2),
            idle_grace: Duration::from_millis(500),
            retry: RetryConfig::default(),
            throttle: ThrottleConfig::default(),
        }
    }
}

/// Settings for [`crate::proxy_pool::ProxyPool`].
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Echo endpoint each candidate is probed against.
    pub test_url: String,
    pub test_timeout: Duration,
    pub refresh_interval: Duration,
    pub validator_workers: usize,
    /// Capacity of the pending-candidate queue.
    pub queue_capacity: usize,
    /// Consecutive reported failures before eviction. `None` never evicts.
    pub max_failures: Option<u32>,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            test_url: "http://httpbin.org/ip".to_string(),
            test_timeout: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(300),
            validator_workers: 5,
            queue_capacity: 4096,
            max_failures: Some(3),
        }
    }
}

/// Settings for the Tor manager.
#[derive(Debug, Clone)]
pub struct TorConfig {
    pub socks_port: u16,
    pub control_port: u16,
    /// Control-port password. Cookie authentication is used when unset.
    pub password: Option<String>,
    /// Spawn our own `tor` process instead of attaching to a running one.
    pub launch: bool,
    pub tor_binary: PathBuf,
    pub data_dir: Option<PathBuf>,
    pub bootstrap_timeout: Duration,
    /// Wait after `NEWNYM` for the new circuit to come up.
    pub settle_delay: Duration,
    pub request_timeout: Duration,
}

impl TorConfig {
    pub fn socks_url(&self) -> String {
        format!("socks5h://127.0.0.1:{}", self.socks_port)
    }
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            socks_port: 9050,
            control_port: 9051,
            password: None,
            launch: true,
            tor_binary: PathBuf::from("tor"),
            data_dir: None,
            bootstrap_timeout: Duration::from_secs(90),
            settle_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(45),
        }
    }
}

/// Settings for [`crate::download::ResumableDownloader`].
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub download_dir: PathBuf,
    pub chunk_size: u64,
    pub max_workers: usize,
    pub request_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("data/downloads"),
            chunk_size: 1024 * 1024,
            max_workers: 5,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct VeilConfig {
    pub fetch: FetchConfig,
    pub proxy: ProxyPoolConfig,
    pub tor: TorConfig,
    pub download: DownloadConfig,
}

impl VeilConfig {
    /// Defaults overridden by environment variables.
    ///
    /// - `VEIL_ENGINE`: `light-http`, `chromium-settled`, `chromium-idle`
    /// - `VEIL_REQUEST_TIMEOUT_SECS`, `VEIL_MAX_RETRIES`, `VEIL_CRAWL_DELAY_MS`
    /// - `VEIL_ROBOTS_AGENT`, `VEIL_REQUIRE_PROXY`
    /// - `VEIL_PROXY_TEST_URL`, `VEIL_PROXY_TEST_TIMEOUT_SECS`,
    ///   `VEIL_PROXY_REFRESH_SECS`, `VEIL_PROXY_WORKERS`, `VEIL_PROXY_MAX_FAILURES`
    /// - `VEIL_TOR_SOCKS_PORT`, `VEIL_TOR_CONTROL_PORT`, `VEIL_TOR_PASSWORD`,
    ///   `VEIL_TOR_LAUNCH`, `VEIL_TOR_BINARY`, `VEIL_TOR_DATA_DIR`
    /// - `VEIL_DOWNLOAD_DIR`, `VEIL_CHUNK_SIZE`, `VEIL_DOWNLOAD_WORKERS`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = Env(lookup);

        if let Some(engine) = env.get("VEIL_ENGINE") {
            config.fetch.default_engine = engine
                .parse()
                .map_err(|e: String| AppError::ConfigError(format!("VEIL_ENGINE: {e}")))?;
        }
        if let Some(secs) = env.parse::<u64>("VEIL_REQUEST_TIMEOUT_SECS")? {
            let timeout = Duration::from_secs(secs.max(1));
            config.fetch.request_timeout = timeout;
            config.download.request_timeout = timeout;
        }
        if let Some(retries) = env.parse::<u32>("VEIL_MAX_RETRIES")? {
            config.fetch.retry.max_retries = retries;
        }
        if let Some(ms) = env.parse::<u64>("VEIL_CRAWL_DELAY_MS")? {
            config.fetch.throttle.delay = Duration::from_millis(ms);
        }
        if let Some(agent) = env.get("VEIL_ROBOTS_AGENT") {
            config.fetch.robots_agent = agent;
        }
        if let Some(require) = env.parse::<bool>("VEIL_REQUIRE_PROXY")? {
            config.fetch.require_proxy = require;
        }

        if let Some(url) = env.get("VEIL_PROXY_TEST_URL") {
            config.proxy.test_url = url;
        }
        if let Some(secs) = env.parse::<u64>("VEIL_PROXY_TEST_TIMEOUT_SECS")? {
            config.proxy.test_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = env.parse::<u64>("VEIL_PROXY_REFRESH_SECS")? {
            config.proxy.refresh_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(workers) = env.positive("VEIL_PROXY_WORKERS")? {
            config.proxy.validator_workers = workers;
        }
        if let Some(max) = env.parse::<u32>("VEIL_PROXY_MAX_FAILURES")? {
            config.proxy.max_failures = (max > 0).then_some(max);
        }

        if let Some(port) = env.parse::<u16>("VEIL_TOR_SOCKS_PORT")? {
            config.tor.socks_port = port;
        }
        if let Some(port) = env.parse::<u16>("VEIL_TOR_CONTROL_PORT")? {
            config.tor.control_port = port;
        }
        if let Some(password) = env.get("VEIL_TOR_PASSWORD") {
            config.tor.password = Some(password);
        }
        if let Some(launch) = env.parse::<bool>("VEIL_TOR_LAUNCH")? {
            config.tor.launch = launch;
        }
        if let Some(bin) = env.get("VEIL_TOR_BINARY") {
            config.tor.tor_binary = PathBuf::from(bin);
        }
        if let Some(dir) = env.get("VEIL_TOR_DATA_DIR") {
            config.tor.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(dir) = env.get("VEIL_DOWNLOAD_DIR") {
            config.download.download_dir = PathBuf::from(dir);
        }
        if let Some(size) = env.positive::<u64>("VEIL_CHUNK_SIZE")? {
            config.download.chunk_size = size;
        }
        if let Some(workers) = env.positive("VEIL_DOWNLOAD_WORKERS")? {
            config.download.max_workers = workers;
        }

        Ok(config)
    }
}

struct Env<L>(L);

impl<L: Fn(&str) -> Option<String>> Env<L> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, AppError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                AppError::ConfigError(format!("Invalid {key} '{raw}'"))
            }),
        }
    }

    fn positive<T: FromStr + PartialOrd + Default>(&self, key: &str) -> Result<Option<T>, AppError> {
        match self.parse::<T>(key)? {
            Some(v) if v <= T::default() => Err(AppError::ConfigError(format!(
                "{key} must be at least 1"
            ))),
            other => Ok(other),
        }
    }
}
