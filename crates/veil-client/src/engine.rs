use veil_core::config::FetchConfig;
use veil_core::error::AppError;
use veil_core::models::Engine;
use veil_core::traits::{RenderRequest, Renderer};

#[cfg(feature = "browser")]
use crate::browser_fetcher::ChromiumRenderer;
use crate::fetcher::HttpRenderer;

/// Dispatches each request to the renderer for its [`Engine`].
///
/// Browser engines are only available with the `browser` feature; without
/// it they fail with a render error.
#[derive(Clone)]
pub struct EngineRenderer {
    http: HttpRenderer,
    #[cfg(feature = "browser")]
    chromium: ChromiumRenderer,
}

impl EngineRenderer {
    pub fn new(config: &FetchConfig) -> Result<Self, AppError> {
        Ok(Self {
            http: HttpRenderer::new(config.request_timeout)?,
            #[cfg(feature = "browser")]
            chromium: ChromiumRenderer::new(config),
        })
    }

    /// Use `session` for light-engine requests routed through the circuit.
    pub fn with_circuit_session(mut self, session: reqwest::Client) -> Self {
        self.http = self.http.with_circuit_session(session);
        self
    }

    pub fn supports(engine: Engine) -> bool {
        !engine.is_browser() || cfg!(feature = "browser")
    }
}

impl Renderer for EngineRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<String, AppError> {
        match request.engine {
            Engine::LightHttp => self.http.render(request).await,
            #[cfg(feature = "browser")]
            Engine::ChromiumSettled | Engine::ChromiumIdle => self.chromium.render(request).await,
            #[cfg(not(feature = "browser"))]
            engine @ (Engine::ChromiumSettled | Engine::ChromiumIdle) => Err(AppError::RenderFailure(
                format!("engine {engine} requires the `browser` feature"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_engine_always_supported() {
        assert!(EngineRenderer::supports(Engine::LightHttp));
        assert_eq!(
            EngineRenderer::supports(Engine::ChromiumIdle),
            cfg!(feature = "browser")
        );
    }

    #[cfg(not(feature = "browser"))]
    #[tokio::test]
    async fn test_browser_engine_without_feature_is_render_failure() {
        use veil_core::fingerprint::FingerprintGenerator;
        use veil_core::models::NetworkPath;

        let renderer = EngineRenderer::new(&FetchConfig::default()).unwrap();
        let fingerprint = FingerprintGenerator::seeded(1).generate();
        let err = renderer
            .render(RenderRequest {
                url: "http://example.com/",
                engine: Engine::ChromiumSettled,
                fingerprint: &fingerprint,
                path: &NetworkPath::Direct,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RenderFailure(_)));
        assert!(err.to_string().contains("browser"));
    }
}
