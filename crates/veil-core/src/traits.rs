use std::future::Future;
use std::path::Path;

use crate::error::AppError;
use crate::fingerprint::Fingerprint;
use crate::models::{Engine, NetworkPath, PageContent};

/// Everything a renderer needs for one session.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub url: &'a str,
    pub engine: Engine,
    pub fingerprint: &'a Fingerprint,
    pub path: &'a NetworkPath,
}

/// Turns a URL into raw markup using the requested engine.
///
/// New engines are new [`Engine`] variants handled by an implementation,
/// not new branches in the caller.
pub trait Renderer: Send + Sync + Clone {
    fn render(
        &self,
        request: RenderRequest<'_>,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Pulls visible text and media URLs out of rendered markup.
pub trait PageExtractor: Send + Sync + Clone {
    fn extract(&self, html: &str, page_url: &str) -> Result<PageContent, AppError>;
}

/// Raw answer to a robots.txt request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsResponse {
    pub status: u16,
    pub body: String,
}

/// Retrieves robots.txt documents.
pub trait RobotsSource: Send + Sync + Clone + 'static {
    fn fetch_robots(
        &self,
        robots_url: &str,
    ) -> impl Future<Output = Result<RobotsResponse, AppError>> + Send;
}

/// Retrieves candidate proxy addresses (`host:port`) from one published list.
pub trait ProxySource: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn discover(&self) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;
}

/// Checks that a candidate proxy actually relays traffic.
pub trait ProxyProber: Send + Sync + 'static {
    fn probe(&self, address: &str) -> impl Future<Output = bool> + Send;
}

/// Byte-range access to a remote resource.
pub trait RangeSource: Send + Sync + Clone + 'static {
    /// Total size of the resource, from a metadata-only request.
    fn content_length(&self, url: &str) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Bytes `start..=end`. A server that ignores the range is reported as
    /// [`AppError::RangeUnsupported`], never by returning the full body.
    fn fetch_range(
        &self,
        url: &str,
        start: u64,
        end: u64,
    ) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;

    /// Stream the whole resource into `dest` in one sequential request,
    /// replacing its contents. Returns the number of bytes written.
    fn fetch_all(&self, url: &str, dest: &Path)
    -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// An anonymity relay that requests can be routed through.
pub trait CircuitRoute: Send + Sync {
    /// Proxy URL of the relay's local SOCKS endpoint.
    fn proxy_url(&self) -> String;
}
