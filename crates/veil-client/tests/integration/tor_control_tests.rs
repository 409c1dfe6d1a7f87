use std::time::Duration;

use veil_client::TorManager;
use veil_core::config::TorConfig;
use veil_core::error::AppError;

use crate::common::fake_control_port;

fn attached(control_port: u16, password: Option<&str>) -> TorManager {
    TorManager::new(TorConfig {
        control_port,
        password: password.map(str::to_string),
        launch: false,
        settle_delay: Duration::ZERO,
        ..TorConfig::default()
    })
}

fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_renew_identity_with_password() {
    let (port, server) = fake_control_port(|line| match line {
        "QUIT" => "250 closing connection\r\n".to_string(),
        _ => "250 OK\r\n".to_string(),
    })
    .await;

    attached(port, Some("s3cret")).renew_identity().await.unwrap();

    assert_eq!(
        server.await.unwrap(),
        vec!["AUTHENTICATE \"s3cret\"", "SIGNAL NEWNYM", "QUIT"]
    );
}

#[tokio::test]
async fn test_rejected_password_is_auth_failure() {
    let (port, server) = fake_control_port(|line| {
        if line.starts_with("AUTHENTICATE") {
            "515 Authentication failed: Password did not match HashedControlPassword value\r\n"
                .to_string()
        } else {
            "250 OK\r\n".to_string()
        }
    })
    .await;

    let err = attached(port, Some("wrong")).renew_identity().await.unwrap_err();

    assert!(matches!(err, AppError::RelayAuthFailure(ref m) if m.contains("515")), "{err}");
    // No NEWNYM after a failed login.
    assert_eq!(server.await.unwrap(), vec!["AUTHENTICATE \"wrong\""]);
}

#[tokio::test]
async fn test_cookie_auth_from_protocolinfo() {
    let dir = tempfile::tempdir().unwrap();
    let cookie_path = dir.path().join("control_auth_cookie");
    std::fs::write(&cookie_path, [0xde, 0xad, 0xbe, 0xef]).unwrap();

    let info = format!(
        "250-PROTOCOLINFO 1\r\n250-AUTH METHODS=COOKIE,SAFECOOKIE COOKIEFILE=\"{}\"\r\n250-VERSION Tor=\"0.4.8.12\"\r\n250 OK\r\n",
        cookie_path.display()
    );
    let (port, server) = fake_control_port(move |line| {
        if line.starts_with("PROTOCOLINFO") {
            info.clone()
        } else {
            "250 OK\r\n".to_string()
        }
    })
    .await;

    attached(port, None).renew_identity().await.unwrap();

    assert_eq!(
        server.await.unwrap(),
        vec!["PROTOCOLINFO 1", "AUTHENTICATE deadbeef", "SIGNAL NEWNYM", "QUIT"]
    );
}

#[tokio::test]
async fn test_null_auth() {
    let (port, server) = fake_control_port(|line| {
        if line.starts_with("PROTOCOLINFO") {
            "250-PROTOCOLINFO 1\r\n250-AUTH METHODS=NULL\r\n250 OK\r\n".to_string()
        } else {
            "250 OK\r\n".to_string()
        }
    })
    .await;

    attached(port, None).renew_identity().await.unwrap();

    let received = server.await.unwrap();
    assert_eq!(received[1], "AUTHENTICATE");
    assert_eq!(received[2], "SIGNAL NEWNYM");
}

#[tokio::test]
async fn test_refused_signal_is_relay_error() {
    let (port, _server) = fake_control_port(|line| {
        if line.starts_with("SIGNAL") {
            "552 Unrecognized signal\r\n".to_string()
        } else {
            "250 OK\r\n".to_string()
        }
    })
    .await;

    let err = attached(port, Some("pw")).renew_identity().await.unwrap_err();
    assert!(matches!(err, AppError::RelayError(_)), "{err}");
}

#[tokio::test]
async fn test_renew_without_relay_fails() {
    let err = attached(unused_port(), None).renew_identity().await.unwrap_err();
    assert!(
        matches!(err, AppError::RelayError(_) | AppError::RelayStartupFailure(_)),
        "{err}"
    );
}

#[tokio::test]
async fn test_attach_to_running_relay() {
    let (port, _server) = fake_control_port(|_| "250 OK\r\n".to_string()).await;

    let tor = attached(port, None);
    tor.start().await.unwrap();
    // Attached relays are not owned, so there is nothing to stop.
    assert!(!tor.is_running().await);
    tor.stop().await;
}

#[tokio::test]
async fn test_attach_without_relay_is_startup_failure() {
    let err = attached(unused_port(), None).start().await.unwrap_err();
    assert!(matches!(err, AppError::RelayStartupFailure(_)), "{err}");
}

#[tokio::test]
async fn test_session_is_cached() {
    let tor = attached(unused_port(), None);
    tor.get_session().unwrap();
    tor.get_session().unwrap();
}
