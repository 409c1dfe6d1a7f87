use std::time::Duration;

use veil_client::{EngineRenderer, HtmlExtractor, ReqwestRobotsSource};
use veil_core::config::FetchConfig;
use veil_core::models::{Engine, FailureKind, FetchRequest, FetchResult};
use veil_core::retry::RetryConfig;
use veil_core::ContentFetcher;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type HttpFetcher = ContentFetcher<EngineRenderer, HtmlExtractor, ReqwestRobotsSource>;

const GALLERY: &str = r#"<html>
  <head><title>Gallery</title><script>var tracking = true;</script></head>
  <body>
    <h1>Harbour at dusk</h1>
    <p>Photos from the evening walk.</p>
    <img src="/img/boats.jpg">
    <img src="https://cdn.example.org/lighthouse.png">
    <video><source src="/media/waves.mp4"></video>
  </body>
</html>"#;

fn fetcher() -> HttpFetcher {
    let config = FetchConfig {
        default_engine: Engine::LightHttp,
        request_timeout: Duration::from_secs(5),
        retry: RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
        },
        ..FetchConfig::default()
    };
    let renderer = EngineRenderer::new(&config).unwrap();
    let robots = ReqwestRobotsSource::new(&config.robots_agent, config.request_timeout).unwrap();
    ContentFetcher::new(renderer, HtmlExtractor, robots, config)
}

async fn site() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gallery"))
        .and(header_exists("user-agent"))
        .and(header_exists("accept-language"))
        .respond_with(ResponseTemplate::new(200).set_body_string(GALLERY))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_light_crawl_extracts_text_and_media() {
    let server = site().await;
    let base = server.uri();

    let result = fetcher().crawl_url(&format!("{base}/gallery"), false, None).await;

    let FetchResult::Content {
        text,
        image_urls,
        video_urls,
    } = result
    else {
        panic!("expected content, got {result:?}");
    };
    assert!(text.contains("Harbour at dusk"));
    assert!(text.contains("Photos from the evening walk."));
    assert!(!text.contains("tracking"));
    assert_eq!(
        image_urls.into_iter().collect::<Vec<_>>(),
        vec![
            format!("{base}/img/boats.jpg"),
            "https://cdn.example.org/lighthouse.png".to_string(),
        ]
    );
    assert_eq!(
        video_urls.into_iter().collect::<Vec<_>>(),
        vec![format!("{base}/media/waves.mp4")]
    );
}

#[tokio::test]
async fn test_disallowed_path_is_never_requested() {
    let server = site().await;
    Mock::given(method("GET"))
        .and(path("/private/ledger"))
        .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
        .expect(0)
        .mount(&server)
        .await;

    let result = fetcher()
        .crawl_url(&format!("{}/private/ledger", server.uri()), false, None)
        .await;

    assert!(result.is_blocked(), "{result:?}");
}

#[tokio::test]
async fn test_force_override_skips_robots() {
    let server = site().await;
    Mock::given(method("GET"))
        .and(path("/private/ledger"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>ledger</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let result = fetcher()
        .crawl_url(&format!("{}/private/ledger", server.uri()), true, None)
        .await;

    assert!(result.is_content(), "{result:?}");
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let server = site().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>third time lucky</p>"))
        .mount(&server)
        .await;

    let request = FetchRequest::new(format!("{}/flaky", server.uri()), Engine::LightHttp);
    let result = fetcher().crawl(&request).await;

    match result {
        FetchResult::Content { text, .. } => assert_eq!(text, "third time lucky"),
        other => panic!("expected content, got {other:?}"),
    }
}

#[tokio::test]
async fn test_persistent_errors_surface_as_failure() {
    let server = site().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let result = fetcher()
        .crawl_url(&format!("{}/down", server.uri()), false, None)
        .await;

    match result {
        FetchResult::Failed { kind, cause } => {
            assert_eq!(kind, FailureKind::TransportFailure);
            assert!(cause.contains("HTTP 500"), "{cause}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}
