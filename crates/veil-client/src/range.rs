use std::path::Path;
use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE};
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use veil_core::error::AppError;
use veil_core::traits::RangeSource;

use crate::fetcher::map_reqwest_error;

/// Byte-range access over HTTP.
///
/// Sizes come from `HEAD` + `Content-Length`, falling back to a one-byte
/// ranged `GET` and its `Content-Range` when the server gives no usable
/// length. A `200` to a ranged request is reported as
/// [`AppError::RangeUnsupported`] without reading the body, unless the range
/// already spans the whole resource.
#[derive(Clone)]
pub struct ReqwestRangeSource {
    client: Client,
    timeout: Duration,
}

impl ReqwestRangeSource {
    /// `timeout` bounds connecting and each read, not the whole transfer.
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| AppError::TransportFailure(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    /// Route transfers through an existing client (e.g. a circuit session).
    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn probe_with_range(&self, url: &str) -> Result<u64, AppError> {
        let response = self
            .client
            .get(url)
            .header(RANGE, "bytes=0-0")
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(total_from_content_range)
                .ok_or_else(|| {
                    AppError::TransportFailure(format!("No usable Content-Range for {url}"))
                }),
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(0),
            status if status.is_success() => header_length(response.headers()).ok_or_else(|| {
                AppError::TransportFailure(format!("No Content-Length for {url}"))
            }),
            status => Err(http_error(status, url)),
        }
    }
}

impl RangeSource for ReqwestRangeSource {
    async fn content_length(&self, url: &str) -> Result<u64, AppError> {
        match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => {
                if let Some(len) = header_length(response.headers()) {
                    return Ok(len);
                }
                tracing::debug!(url = %url, "HEAD gave no length, probing with a ranged GET");
            }
            Ok(response) => {
                tracing::debug!(url = %url, status = response.status().as_u16(), "HEAD rejected, probing with a ranged GET");
            }
            Err(e) => return Err(map_reqwest_error(e, self.timeout)),
        }
        self.probe_with_range(url).await
    }

    async fn fetch_range(&self, url: &str, start: u64, end: u64) -> Result<Vec<u8>, AppError> {
        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={start}-{end}"))
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK if start == 0 && header_length(response.headers()) == Some(end + 1) => {}
            StatusCode::OK => {
                return Err(AppError::RangeUnsupported(format!(
                    "{url} answered 200 to bytes={start}-{end}"
                )));
            }
            status => return Err(http_error(status, url)),
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;
        Ok(body.to_vec())
    }

    async fn fetch_all(&self, url: &str, dest: &Path) -> Result<u64, AppError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;
        if !response.status().is_success() {
            return Err(http_error(response.status(), url));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

fn header_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// `bytes 0-0/1234` gives `1234`; an unknown total (`*`) gives `None`.
fn total_from_content_range(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

fn http_error(status: StatusCode, url: &str) -> AppError {
    AppError::TransportFailure(format!("HTTP {} for {}", status.as_u16(), url))
}
