//! Published proxy lists and the HTTP prober used to validate candidates.

use std::time::Duration;

use reqwest::Client;
use scraper::{Html, Selector};
use veil_core::error::AppError;
use veil_core::fingerprint::random_user_agent;
use veil_core::proxy_pool::normalize_address;
use veil_core::traits::{ProxyProber, ProxySource};

use crate::fetcher::{build_client, map_reqwest_error};

pub const FREE_PROXY_LIST_URL: &str = "https://free-proxy-list.net/";

/// Layout of a published proxy list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFormat {
    /// HTML table: IP in column 0, port in column 1, "yes" in column 6 for HTTPS.
    HtmlTable { https_only: bool },
    /// One `host:port` per line; `#` starts a comment.
    PlainText,
}

/// A proxy list fetched over HTTP.
#[derive(Clone)]
pub struct ProxyListSource {
    name: String,
    url: String,
    format: ListFormat,
    client: Client,
    timeout: Duration,
}

impl ProxyListSource {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        format: ListFormat,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        Ok(Self {
            name: name.into(),
            url: url.into(),
            format,
            client: build_client(timeout, None)?,
            timeout,
        })
    }

    /// HTTPS-capable entries from free-proxy-list.net.
    pub fn free_proxy_list(timeout: Duration) -> Result<Self, AppError> {
        Self::new(
            "free-proxy-list",
            FREE_PROXY_LIST_URL,
            ListFormat::HtmlTable { https_only: true },
            timeout,
        )
    }
}

impl ProxySource for ProxyListSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn discover(&self) -> Result<Vec<String>, AppError> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::TransportFailure(format!(
                "HTTP {} for {}",
                status.as_u16(),
                self.url
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;

        match self.format {
            ListFormat::HtmlTable { https_only } => parse_html_table(&body, https_only),
            ListFormat::PlainText => Ok(parse_plain_list(&body)),
        }
    }
}

/// Rows of the first table's body.
pub fn parse_html_table(html: &str, https_only: bool) -> Result<Vec<String>, AppError> {
    let document = Html::parse_document(html);
    let table = Selector::parse("table")
        .map_err(|e| AppError::ExtractionFailure(e.to_string()))?;
    let row = Selector::parse("tbody tr").map_err(|e| AppError::ExtractionFailure(e.to_string()))?;
    let cell = Selector::parse("td").map_err(|e| AppError::ExtractionFailure(e.to_string()))?;

    let Some(table) = document.select(&table).next() else {
        return Ok(Vec::new());
    };

    let mut proxies = Vec::new();
    for tr in table.select(&row) {
        let cells: Vec<String> = tr
            .select(&cell)
            .map(|td| td.text().collect::<String>().trim().to_string())
            .collect();
        if cells.len() < 2 {
            continue;
        }
        if https_only && cells.get(6).map(String::as_str) != Some("yes") {
            continue;
        }
        if let Some(address) = normalize_address(&format!("{}:{}", cells[0], cells[1])) {
            proxies.push(address);
        }
    }
    Ok(proxies)
}

pub fn parse_plain_list(body: &str) -> Vec<String> {
    body.lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .filter_map(normalize_address)
        .collect()
}

/// Validates a candidate by fetching an echo endpoint through it.
#[derive(Clone)]
pub struct HttpProxyProber {
    test_url: String,
    timeout: Duration,
}

impl HttpProxyProber {
    pub fn new(test_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            test_url: test_url.into(),
            timeout,
        }
    }
}

impl ProxyProber for HttpProxyProber {
    async fn probe(&self, address: &str) -> bool {
        let client = match build_client(self.timeout, Some(&format!("http://{address}"))) {
            Ok(client) => client,
            Err(e) => {
                tracing::debug!(proxy = %address, error = %e, "Unusable proxy address");
                return false;
            }
        };
        match client.get(&self.test_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::trace!(proxy = %address, error = %e, "Probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
        <table class="table">
          <thead><tr><th>IP Address</th><th>Port</th><th>Code</th><th>Country</th>
            <th>Anonymity</th><th>Google</th><th>Https</th><th>Last Checked</th></tr></thead>
          <tbody>
            <tr><td>1.2.3.4</td><td>8080</td><td>US</td><td>United States</td><td>elite proxy</td><td>no</td><td>yes</td><td>1 min ago</td></tr>
            <tr><td>5.6.7.8</td><td>3128</td><td>DE</td><td>Germany</td><td>anonymous</td><td>no</td><td>no</td><td>2 mins ago</td></tr>
            <tr><td>9.9.9.9</td><td>notaport</td><td>FR</td><td>France</td><td>elite proxy</td><td>no</td><td>yes</td><td>3 mins ago</td></tr>
          </tbody>
        </table>
        <table><tbody><tr><td>10.0.0.1</td><td>80</td></tr></tbody></table>"#;

    #[test]
    fn test_html_table_keeps_https_rows() {
        assert_eq!(parse_html_table(TABLE, true).unwrap(), vec!["1.2.3.4:8080"]);
    }

    #[test]
    fn test_html_table_without_https_filter() {
        assert_eq!(
            parse_html_table(TABLE, false).unwrap(),
            vec!["1.2.3.4:8080", "5.6.7.8:3128"]
        );
    }

    #[test]
    fn test_page_without_table() {
        assert!(parse_html_table("<p>maintenance</p>", true).unwrap().is_empty());
    }

    #[test]
    fn test_plain_list() {
        let body = "# updated hourly\n1.1.1.1:80\n\n  2.2.2.2:8080  # fast\nbogus\n";
        assert_eq!(parse_plain_list(body), vec!["1.1.1.1:80", "2.2.2.2:8080"]);
    }
}
