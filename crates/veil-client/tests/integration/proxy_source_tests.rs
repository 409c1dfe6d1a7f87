use std::time::Duration;

use veil_client::{HttpProxyProber, ListFormat, ProxyListSource};
use veil_core::config::ProxyPoolConfig;
use veil_core::error::AppError;
use veil_core::testutil::MockProber;
use veil_core::traits::{ProxyProber, ProxySource};
use veil_core::ProxyPool;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TABLE_PAGE: &str = r#"<html><body>
<table id="proxylisttable">
  <thead><tr><th>IP Address</th><th>Port</th><th>Code</th><th>Country</th>
    <th>Anonymity</th><th>Google</th><th>Https</th><th>Last Checked</th></tr></thead>
  <tbody>
    <tr><td>203.0.113.10</td><td>8080</td><td>NL</td><td>Netherlands</td><td>elite proxy</td><td>no</td><td>yes</td><td>10 secs ago</td></tr>
    <tr><td>203.0.113.11</td><td>3128</td><td>BR</td><td>Brazil</td><td>anonymous</td><td>no</td><td>no</td><td>1 min ago</td></tr>
    <tr><td>203.0.113.12</td><td>80</td><td>JP</td><td>Japan</td><td>elite proxy</td><td>yes</td><td>yes</td><td>2 mins ago</td></tr>
  </tbody>
</table></body></html>"#;

async fn list_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/table"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TABLE_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/list.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("# mirror\n198.51.100.1:1080\n198.51.100.2:8000\n"),
        )
        .mount(&server)
        .await;
    server
}

fn source(server: &MockServer, route: &str, format: ListFormat) -> ProxyListSource {
    ProxyListSource::new(
        route,
        format!("{}{route}", server.uri()),
        format,
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_html_table_discovery() {
    let server = list_server().await;
    let table = source(&server, "/table", ListFormat::HtmlTable { https_only: true });

    assert_eq!(table.name(), "/table");
    assert_eq!(
        table.discover().await.unwrap(),
        vec!["203.0.113.10:8080", "203.0.113.12:80"]
    );
}

#[tokio::test]
async fn test_plain_text_discovery() {
    let server = list_server().await;
    let list = source(&server, "/list.txt", ListFormat::PlainText);

    assert_eq!(
        list.discover().await.unwrap(),
        vec!["198.51.100.1:1080", "198.51.100.2:8000"]
    );
}

#[tokio::test]
async fn test_unreachable_list_is_an_error() {
    let server = list_server().await;
    let missing = source(&server, "/gone", ListFormat::PlainText);

    let err = missing.discover().await.unwrap_err();
    assert!(matches!(err, AppError::TransportFailure(ref m) if m.contains("HTTP 404")), "{err}");
}

#[tokio::test]
async fn test_prober_rejects_dead_proxy() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let prober = HttpProxyProber::new("http://example.com/", Duration::from_millis(500));
    assert!(!prober.probe(&format!("127.0.0.1:{port}")).await);
}

#[tokio::test]
async fn test_pool_fills_from_published_lists() {
    let server = list_server().await;
    let sources = vec![
        source(&server, "/table", ListFormat::HtmlTable { https_only: true }),
        source(&server, "/list.txt", ListFormat::PlainText),
        source(&server, "/gone", ListFormat::PlainText),
    ];
    let prober = MockProber::accepting(&["203.0.113.12:80", "198.51.100.2:8000"]);

    let pool = ProxyPool::new(ProxyPoolConfig {
        refresh_interval: Duration::from_secs(3600),
        validator_workers: 2,
        ..ProxyPoolConfig::default()
    });
    pool.start(sources, prober);

    tokio::time::timeout(Duration::from_secs(5), async {
        while pool.len() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("pool never filled");

    let mut served = vec![pool.get_proxy().unwrap(), pool.get_proxy().unwrap()];
    served.sort();
    assert_eq!(served, vec!["198.51.100.2:8000", "203.0.113.12:80"]);

    pool.shutdown();
    pool.wait().await;
    assert!(!pool.is_running());
}
