use std::time::Duration;

use veil_client::ReqwestRobotsSource;
use veil_core::robots::{RobotsCache, RobotsPolicy};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const AGENT: &str = "VeilBot";

fn cache(timeout: Duration) -> RobotsCache<ReqwestRobotsSource> {
    RobotsCache::new(ReqwestRobotsSource::new(AGENT, timeout).unwrap())
}

#[tokio::test]
async fn test_disallow_rules_are_enforced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let robots = cache(Duration::from_secs(5));
    let base = server.uri();

    assert!(!robots.is_allowed(&format!("{base}/private/page"), AGENT).await);
    assert!(robots.is_allowed(&format!("{base}/public"), AGENT).await);
    assert!(robots.is_allowed(&format!("{base}/"), AGENT).await);
    // Three lookups, one fetch (verified by `expect(1)` on drop).
}

#[tokio::test]
async fn test_missing_robots_allows_everything() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let robots = cache(Duration::from_secs(5));
    assert!(robots.is_allowed(&format!("{}/anything", server.uri()), AGENT).await);
}

#[tokio::test]
async fn test_server_error_fails_open() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let robots = cache(Duration::from_secs(5));
    let url = format!("{}/private", server.uri());
    assert!(robots.is_allowed(&url, AGENT).await);

    let origin = veil_core::throttle::origin_key(&url).unwrap();
    assert_eq!(robots.policy_for(&origin).await, RobotsPolicy::Unavailable);
}

#[tokio::test]
async fn test_slow_robots_fails_open() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("User-agent: *\nDisallow: /\n")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let robots = cache(Duration::from_millis(200));
    assert!(robots.is_allowed(&format!("{}/page", server.uri()), AGENT).await);
}

#[tokio::test]
async fn test_agent_specific_groups() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "User-agent: VeilBot\nDisallow: /\n\nUser-agent: *\nAllow: /\n",
        ))
        .mount(&server)
        .await;

    let robots = cache(Duration::from_secs(5));
    let url = format!("{}/page", server.uri());
    assert!(!robots.is_allowed(&url, AGENT).await);
    assert!(robots.is_allowed(&url, "OtherBot").await);
}

#[tokio::test]
async fn test_supplied_client_carries_robots_requests() {
    // Stands in for the circuit's proxy; the target host never resolves locally.
    let relay = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"))
        .expect(1)
        .mount(&relay)
        .await;

    let client = reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(relay.uri()).unwrap())
        .build()
        .unwrap();
    let robots = RobotsCache::new(ReqwestRobotsSource::with_client(
        client,
        AGENT,
        Duration::from_secs(5),
    ));

    assert!(!robots.is_allowed("http://hidden.invalid/page", AGENT).await);
    let received = relay.received_requests().await.unwrap();
    assert_eq!(received[0].headers.get("user-agent").unwrap(), AGENT);
}
