use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use veil_core::config::FetchConfig;
use veil_core::error::AppError;
use veil_core::models::Engine;
use veil_core::traits::{RenderRequest, Renderer};

use crate::browser_args::launch_args;

/// Hides the usual automation tells from page scripts.
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
window.chrome = window.chrome || { runtime: {} };
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
"#;

/// Headless Chromium renderer for the browser engines.
///
/// Every render launches its own browser process, configured with the
/// session's fingerprint and network path, and closes it on every exit path.
/// [`Engine::ChromiumSettled`] waits a fixed delay after load;
/// [`Engine::ChromiumIdle`] waits for navigation to finish, then a short
/// quiet period.
///
/// # Example
///
/// ```rust,no_run
/// use veil_client::ChromiumRenderer;
/// use veil_core::config::FetchConfig;
///
/// let renderer = ChromiumRenderer::new(&FetchConfig::default());
/// ```
#[derive(Clone)]
pub struct ChromiumRenderer {
    timeout: Duration,
    settle_delay: Duration,
    idle_grace: Duration,
    executable: Option<PathBuf>,
}

impl ChromiumRenderer {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            timeout: config.request_timeout + config.settle_delay + config.idle_grace,
            settle_delay: config.settle_delay,
            idle_grace: config.idle_grace,
            executable: find_chrome_binary(),
        }
    }

    async fn launch(&self, request: &RenderRequest<'_>) -> Result<(Browser, JoinHandle<()>), AppError> {
        let fingerprint = request.fingerprint;
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .disable_default_args()
            .window_size(fingerprint.viewport.width, fingerprint.viewport.height);

        if let Some(bin) = &self.executable {
            builder = builder.chrome_executable(bin);
        }
        for arg in launch_args(request) {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| AppError::RenderFailure(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::RenderFailure(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::debug!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok((browser, handler_task))
    }

    async fn capture(&self, browser: &Browser, request: &RenderRequest<'_>) -> Result<String, AppError> {
        let fingerprint = request.fingerprint;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| render_error("open tab", e))?;

        emulate(&page, request).await?;

        page.goto(request.url)
            .await
            .map_err(|e| render_error(&format!("navigate to {}", request.url), e))?;

        match request.engine {
            Engine::ChromiumIdle => {
                page.wait_for_navigation()
                    .await
                    .map_err(|e| render_error("wait for navigation", e))?;
                tokio::time::sleep(self.idle_grace).await;
            }
            _ => tokio::time::sleep(self.settle_delay).await,
        }

        let html = page
            .content()
            .await
            .map_err(|e| render_error("read page content", e))?;

        tracing::debug!(
            url = %request.url,
            engine = %request.engine,
            viewport = %format!("{}x{}", fingerprint.viewport.width, fingerprint.viewport.height),
            bytes = html.len(),
            "Captured rendered DOM"
        );

        if let Err(e) = page.close().await {
            tracing::debug!(error = %e, "Page close failed");
        }
        Ok(html)
    }
}

impl Renderer for ChromiumRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<String, AppError> {
        let (mut browser, handler_task) = self.launch(&request).await?;

        let result = match tokio::time::timeout(self.timeout, self.capture(&browser, &request)).await {
            Ok(inner) => inner,
            Err(_) => Err(AppError::Timeout(self.timeout.as_secs())),
        };

        if let Err(e) = browser.close().await {
            tracing::debug!(error = %e, "Browser close failed");
        }
        let _ = browser.wait().await;
        handler_task.abort();

        result
    }
}

async fn emulate(page: &Page, request: &RenderRequest<'_>) -> Result<(), AppError> {
    let fingerprint = request.fingerprint;

    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
        .await
        .map_err(|e| render_error("inject stealth script", e))?;

    page.execute(SetDeviceMetricsOverrideParams::new(
        i64::from(fingerprint.viewport.width),
        i64::from(fingerprint.viewport.height),
        1.0,
        false,
    ))
    .await
    .map_err(|e| render_error("emulate viewport", e))?;

    page.execute(SetLocaleOverrideParams {
        locale: Some(fingerprint.locale.clone()),
    })
    .await
    .map_err(|e| render_error("emulate locale", e))?;

    page.execute(SetTimezoneOverrideParams::new(fingerprint.timezone.clone()))
        .await
        .map_err(|e| render_error("emulate timezone", e))?;

    Ok(())
}

fn render_error(step: &str, e: impl std::fmt::Display) -> AppError {
    AppError::RenderFailure(format!("Failed to {step}: {e}"))
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// On systems where Chromium is installed via **snap**, the wrapper at
/// `/snap/bin/chromium` strips unknown CLI flags, breaking headless mode.
/// We look for the real binary inside the snap first, then fall back to
/// well-known system paths. `None` lets `chromiumoxide` do its own lookup.
pub fn find_chrome_binary() -> Option<PathBuf> {
    let candidates: &[&str] = &[
        // Snap (Ubuntu default)
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        // Flatpak
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_timeout_covers_settle_time() {
        let config = FetchConfig::default();
        let renderer = ChromiumRenderer::new(&config);
        assert_eq!(
            renderer.timeout,
            config.request_timeout + config.settle_delay + config.idle_grace
        );
    }

    #[test]
    fn test_stealth_script_hides_webdriver() {
        assert!(STEALTH_SCRIPT.contains("navigator, 'webdriver'"));
    }
}
