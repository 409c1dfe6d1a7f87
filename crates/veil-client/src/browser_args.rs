//! Command-line flags for one headless Chromium session.

use veil_core::models::NetworkPath;
use veil_core::traits::RenderRequest;

/// Keeps every lookup on the proxy; only the loopback proxy host resolves locally.
const NO_LOCAL_DNS: &str = "--host-resolver-rules=MAP * ~NOTFOUND , EXCLUDE 127.0.0.1";

/// Flags carrying the session's network path and fingerprint.
pub(crate) fn launch_args(request: &RenderRequest<'_>) -> Vec<String> {
    let fingerprint = request.fingerprint;
    let mut args = vec![
        "--headless=new".to_string(),
        "--disable-gpu".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-extensions".to_string(),
        "--disable-popup-blocking".to_string(),
        "--no-first-run".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        format!("--user-agent={}", fingerprint.user_agent),
        format!("--lang={}", fingerprint.locale),
    ];

    if let Some(proxy) = proxy_server(request.path) {
        if proxy.starts_with("socks") {
            args.push(NO_LOCAL_DNS.to_string());
        }
        args.push(format!("--proxy-server={proxy}"));
    }
    args
}

/// `--proxy-server` value for `path`.
///
/// Chromium has no `socks5h` scheme; its `socks5` already resolves host
/// names on the proxy side.
pub(crate) fn proxy_server(path: &NetworkPath) -> Option<String> {
    let url = path.proxy_url()?;
    let Some((scheme, rest)) = url.split_once("://") else {
        return Some(format!("http://{url}"));
    };
    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "socks5h" | "socks5" | "socks" => "socks5",
        "socks4a" | "socks4" => "socks4",
        "https" => "https",
        _ => "http",
    };
    Some(format!("{scheme}://{}", rest.trim_end_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::fingerprint::{Fingerprint, Viewport};
    use veil_core::models::Engine;

    fn fingerprint() -> Fingerprint {
        Fingerprint {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Chrome/135.0.0.0 Safari/537.36".into(),
            viewport: Viewport {
                width: 1366,
                height: 768,
            },
            locale: "de-DE".into(),
            timezone: "Europe/Berlin".into(),
        }
    }

    fn args_for(path: NetworkPath) -> Vec<String> {
        let fingerprint = fingerprint();
        launch_args(&RenderRequest {
            url: "https://example.com/",
            engine: Engine::ChromiumIdle,
            fingerprint: &fingerprint,
            path: &path,
        })
    }

    fn proxy_flag(args: &[String]) -> Option<&str> {
        args.iter()
            .find_map(|a| a.strip_prefix("--proxy-server="))
    }

    #[test]
    fn test_direct_session_has_no_proxy() {
        let args = args_for(NetworkPath::Direct);
        assert_eq!(proxy_flag(&args), None);
        assert!(!args.iter().any(|a| a.starts_with("--host-resolver-rules")));
    }

    #[test]
    fn test_fingerprint_and_stealth_flags() {
        let args = args_for(NetworkPath::Direct);
        assert!(args.contains(&"--user-agent=Mozilla/5.0 (X11; Linux x86_64) Chrome/135.0.0.0 Safari/537.36".to_string()));
        assert!(args.contains(&"--lang=de-DE".to_string()));
        assert!(args.contains(&"--disable-blink-features=AutomationControlled".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
    }

    #[test]
    fn test_pool_proxy_is_http() {
        let args = args_for(NetworkPath::Proxy("203.0.113.7:3128".into()));
        assert_eq!(proxy_flag(&args), Some("http://203.0.113.7:3128"));
        assert!(!args.iter().any(|a| a.starts_with("--host-resolver-rules")));
    }

    #[test]
    fn test_circuit_uses_chromium_socks_scheme() {
        let args = args_for(NetworkPath::Circuit("socks5h://127.0.0.1:9050".into()));
        assert_eq!(proxy_flag(&args), Some("socks5://127.0.0.1:9050"));
        assert!(args.iter().all(|a| !a.contains("socks5h")));
        assert!(args.contains(&NO_LOCAL_DNS.to_string()));
    }

    #[test]
    fn test_proxy_server_schemes() {
        let server = |url: &str| proxy_server(&NetworkPath::Circuit(url.into()));
        assert_eq!(server("socks5://10.0.0.2:1080/"), Some("socks5://10.0.0.2:1080".into()));
        assert_eq!(server("SOCKS4A://10.0.0.2:1080"), Some("socks4://10.0.0.2:1080".into()));
        assert_eq!(server("https://proxy.local:443"), Some("https://proxy.local:443".into()));
        assert_eq!(server("127.0.0.1:8118"), Some("http://127.0.0.1:8118".into()));
        assert_eq!(proxy_server(&NetworkPath::Direct), None);
    }
}
