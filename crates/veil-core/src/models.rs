use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Rendering strategy used to turn a URL into markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Engine {
    /// Plain HTTP GET, no JavaScript.
    LightHttp,
    /// Headless Chromium, fixed settle delay after load.
    ChromiumSettled,
    /// Headless Chromium, waits for navigation to finish plus an idle grace.
    ChromiumIdle,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::LightHttp => "light-http",
            Engine::ChromiumSettled => "chromium-settled",
            Engine::ChromiumIdle => "chromium-idle",
        }
    }

    pub fn is_browser(&self) -> bool {
        !matches!(self, Engine::LightHttp)
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "light-http" | "http" | "requests" => Ok(Engine::LightHttp),
            "chromium-settled" | "settled" => Ok(Engine::ChromiumSettled),
            "chromium-idle" | "idle" => Ok(Engine::ChromiumIdle),
            _ => Err(format!("Unknown engine: {}", s)),
        }
    }
}

/// A single crawl request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub engine: Engine,
    /// Skip the robots check.
    pub force_override: bool,
    /// `None` means "dynamic unless the engine is [`Engine::LightHttp`]".
    pub use_dynamic: Option<bool>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, engine: Engine) -> Self {
        Self {
            url: url.into(),
            engine,
            force_override: false,
            use_dynamic: None,
        }
    }

    pub fn force(mut self, force_override: bool) -> Self {
        self.force_override = force_override;
        self
    }

    pub fn dynamic(mut self, use_dynamic: Option<bool>) -> Self {
        self.use_dynamic = use_dynamic;
        self
    }

    /// The engine that will actually render this request.
    pub fn effective_engine(&self) -> Engine {
        let dynamic = self
            .use_dynamic
            .unwrap_or(self.engine != Engine::LightHttp);
        if dynamic { self.engine } else { Engine::LightHttp }
    }
}

/// Category of a failed fetch, surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransportFailure,
    RenderFailure,
    ProxyUnavailable,
    ExtractionFailure,
}

impl From<&AppError> for FailureKind {
    fn from(err: &AppError) -> Self {
        match err {
            AppError::TransportFailure(_) | AppError::Timeout(_) => FailureKind::TransportFailure,
            AppError::ProxyUnavailable => FailureKind::ProxyUnavailable,
            AppError::ExtractionFailure(_) => FailureKind::ExtractionFailure,
            _ => FailureKind::RenderFailure,
        }
    }
}

/// Outcome of one fetch. Exactly one variant is produced per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchResult {
    Content {
        text: String,
        image_urls: BTreeSet<String>,
        video_urls: BTreeSet<String>,
    },
    Blocked {
        reason: String,
    },
    Failed {
        kind: FailureKind,
        cause: String,
    },
}

impl FetchResult {
    pub fn failed(err: &AppError) -> Self {
        FetchResult::Failed {
            kind: FailureKind::from(err),
            cause: err.to_string(),
        }
    }

    pub fn is_content(&self) -> bool {
        matches!(self, FetchResult::Content { .. })
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, FetchResult::Blocked { .. })
    }
}

/// Structured content pulled out of rendered markup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContent {
    pub text: String,
    pub image_urls: BTreeSet<String>,
    pub video_urls: BTreeSet<String>,
}

impl From<PageContent> for FetchResult {
    fn from(page: PageContent) -> Self {
        FetchResult::Content {
            text: page.text,
            image_urls: page.image_urls,
            video_urls: page.video_urls,
        }
    }
}

/// A validated proxy endpoint held by the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyRecord {
    /// `host:port`
    pub address: String,
    pub last_verified: DateTime<Utc>,
    pub success_count: u32,
    pub fail_count: u32,
    /// Failures since the last reported success.
    #[serde(skip)]
    pub consecutive_failures: u32,
}

impl ProxyRecord {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            last_verified: Utc::now(),
            success_count: 0,
            fail_count: 0,
            consecutive_failures: 0,
        }
    }
}

/// The path one request attempt is routed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkPath {
    Direct,
    /// HTTP proxy, `host:port`.
    Proxy(String),
    /// Anonymity relay, as a proxy URL (`socks5h://127.0.0.1:9050`).
    Circuit(String),
}

impl NetworkPath {
    /// Proxy URL usable by an HTTP client or a browser's `--proxy-server`.
    pub fn proxy_url(&self) -> Option<String> {
        match self {
            NetworkPath::Direct => None,
            NetworkPath::Proxy(addr) => Some(format!("http://{addr}")),
            NetworkPath::Circuit(url) => Some(url.clone()),
        }
    }
}

impl fmt::Display for NetworkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkPath::Direct => write!(f, "direct"),
            NetworkPath::Proxy(addr) => write!(f, "proxy {addr}"),
            NetworkPath::Circuit(url) => write!(f, "circuit {url}"),
        }
    }
}

/// Persisted progress of an incomplete download, stored as `<file>.ckpt`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Every byte below this offset is on disk.
    pub downloaded: u64,
}

/// A single resumable transfer.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub url: String,
    pub destination: PathBuf,
    pub total_size: u64,
    pub downloaded_offset: u64,
    pub chunk_size: u64,
}

impl DownloadJob {
    /// Path of the checkpoint record beside the destination.
    pub fn checkpoint_path(&self) -> PathBuf {
        checkpoint_path_for(&self.destination)
    }

    /// Inclusive `(start, end)` ranges still to fetch.
    pub fn remaining_chunks(&self) -> Vec<(u64, u64)> {
        let chunk = self.chunk_size.max(1);
        let mut chunks = Vec::new();
        let mut start = self.downloaded_offset;
        while start < self.total_size {
            let end = (start + chunk - 1).min(self.total_size - 1);
            chunks.push((start, end));
            start = end + 1;
        }
        chunks
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded_offset >= self.total_size
    }
}

/// `<destination>.ckpt`
pub fn checkpoint_path_for(destination: &std::path::Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(".ckpt");
    PathBuf::from(name)
}

/// Media category used by batch downloads to name files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" | "images" => Ok(MediaKind::Image),
            "video" | "videos" => Ok(MediaKind::Video),
            _ => Err(format!("Unknown media kind: {}", s)),
        }
    }
}
