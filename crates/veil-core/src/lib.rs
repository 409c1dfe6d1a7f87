pub mod checkpoint;
pub mod config;
pub mod crawler;
pub mod download;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod proxy_pool;
pub mod retry;
pub mod robots;
pub mod testutil;
pub mod throttle;
pub mod traits;

pub use config::{DownloadConfig, FetchConfig, ProxyPoolConfig, TorConfig, VeilConfig};
pub use crawler::ContentFetcher;
pub use download::ResumableDownloader;
pub use error::AppError;
pub use fingerprint::{Fingerprint, FingerprintGenerator};
pub use models::{Engine, FailureKind, FetchRequest, FetchResult, MediaKind, NetworkPath, PageContent};
pub use proxy_pool::ProxyPool;
pub use robots::RobotsCache;
pub use traits::{
    CircuitRoute, PageExtractor, ProxyProber, ProxySource, RangeSource, RenderRequest, Renderer,
    RobotsResponse, RobotsSource,
};
