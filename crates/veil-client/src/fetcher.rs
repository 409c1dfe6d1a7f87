use std::time::Duration;

use moka::future::Cache;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use veil_core::error::AppError;
use veil_core::models::NetworkPath;
use veil_core::traits::{RenderRequest, Renderer};

/// Light engine: a plain HTTP GET with the session's fingerprint headers.
///
/// Keeps one direct client, one client per proxy URL (built on first use),
/// and optionally a shared circuit session supplied by the Tor manager.
#[derive(Clone)]
pub struct HttpRenderer {
    direct: Client,
    proxied: Cache<String, Client>,
    circuit: Option<Client>,
    timeout: Duration,
}

impl HttpRenderer {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            direct: build_client(timeout, None)?,
            proxied: Cache::builder().max_capacity(256).build(),
            circuit: None,
            timeout,
        })
    }

    /// Use `session` for every [`NetworkPath::Circuit`] request.
    pub fn with_circuit_session(mut self, session: Client) -> Self {
        self.circuit = Some(session);
        self
    }

    async fn client_for(&self, path: &NetworkPath) -> Result<Client, AppError> {
        match (path, &self.circuit) {
            (NetworkPath::Direct, _) => Ok(self.direct.clone()),
            (NetworkPath::Circuit(_), Some(session)) => Ok(session.clone()),
            (NetworkPath::Proxy(_) | NetworkPath::Circuit(_), _) => {
                let Some(proxy_url) = path.proxy_url() else {
                    return Ok(self.direct.clone());
                };
                let timeout = self.timeout;
                self.proxied
                    .try_get_with(proxy_url.clone(), async move {
                        build_client(timeout, Some(&proxy_url))
                    })
                    .await
                    .map_err(|e| AppError::TransportFailure(e.to_string()))
            }
        }
    }
}

impl Renderer for HttpRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<String, AppError> {
        let client = self.client_for(request.path).await?;
        let fingerprint = request.fingerprint;

        tracing::debug!(url = %request.url, path = %request.path, "HTTP GET");
        let response = client
            .get(request.url)
            .header(USER_AGENT, &fingerprint.user_agent)
            .header(ACCEPT_LANGUAGE, fingerprint.accept_language())
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::TransportFailure(format!(
                "HTTP {} for {}",
                status.as_u16(),
                request.url
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::TransportFailure(format!("Failed to read response body: {e}")))
    }
}

/// Client with a total timeout, optionally routed through `proxy_url`.
pub(crate) fn build_client(timeout: Duration, proxy_url: Option<&str>) -> Result<Client, AppError> {
    let mut builder = Client::builder().timeout(timeout);
    if let Some(url) = proxy_url {
        let proxy = reqwest::Proxy::all(url)
            .map_err(|e| AppError::TransportFailure(format!("Invalid proxy {url}: {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| AppError::TransportFailure(e.to_string()))
}

/// Timeouts, connection failures, and everything else, in that order.
pub(crate) fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout.as_secs())
    } else if e.is_connect() {
        AppError::TransportFailure(format!("Connection failed: {e}"))
    } else {
        AppError::TransportFailure(e.to_string())
    }
}
