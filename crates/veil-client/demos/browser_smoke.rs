/// Smoke-test for `ChromiumRenderer`.
///
/// Renders <https://example.com> with both browser engines and verifies the
/// rendered HTML contains the expected `<h1>`.
///
/// Run with:
///   cargo run --example browser_smoke --features browser
use veil_client::ChromiumRenderer;
use veil_core::config::FetchConfig;
use veil_core::fingerprint::FingerprintGenerator;
use veil_core::models::{Engine, NetworkPath};
use veil_core::traits::{RenderRequest, Renderer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let renderer = ChromiumRenderer::new(&FetchConfig::default());
    let fingerprints = FingerprintGenerator::new();
    let url = "https://example.com";

    for engine in [Engine::ChromiumSettled, Engine::ChromiumIdle] {
        let fingerprint = fingerprints.generate();
        println!("Rendering {url} with {engine} as {}", fingerprint.user_agent);
        let html = renderer
            .render(RenderRequest {
                url,
                engine,
                fingerprint: &fingerprint,
                path: &NetworkPath::Direct,
            })
            .await?;

        assert!(
            html.contains("<h1>Example Domain</h1>"),
            "Expected <h1> not found in rendered HTML"
        );
        println!("OK: {engine} returned {} bytes", html.len());
    }
    Ok(())
}
