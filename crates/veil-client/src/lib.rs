#[cfg_attr(not(feature = "browser"), allow(dead_code))]
mod browser_args;
#[cfg(feature = "browser")]
pub mod browser_fetcher;
pub mod engine;
pub mod extract;
pub mod fetcher;
pub mod proxy_sources;
pub mod range;
pub mod robots;
pub mod tor;

#[cfg(feature = "browser")]
pub use browser_fetcher::ChromiumRenderer;
pub use engine::EngineRenderer;
pub use extract::HtmlExtractor;
pub use fetcher::HttpRenderer;
pub use proxy_sources::{HttpProxyProber, ListFormat, ProxyListSource};
pub use range::ReqwestRangeSource;
pub use robots::ReqwestRobotsSource;
pub use tor::TorManager;
