//! Tor relay lifecycle and control-port client.
//!
//! The manager either launches its own `tor` process or attaches to one that
//! is already running, hands out a shared SOCKS5h-routed HTTP session, and
//! requests fresh circuits through the control protocol
//! (`PROTOCOLINFO`, `AUTHENTICATE`, `SIGNAL NEWNYM`, `QUIT`).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use reqwest::Client;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::process::{Child, Command};
use veil_core::config::TorConfig;
use veil_core::error::AppError;
use veil_core::traits::CircuitRoute;

use crate::fetcher::build_client;

const BOOTSTRAP_DONE: &str = "Bootstrapped 100%";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns (or attaches to) one Tor relay.
pub struct TorManager {
    config: TorConfig,
    child: tokio::sync::Mutex<Option<Child>>,
    session: Mutex<Option<Client>>,
}

impl TorManager {
    pub fn new(config: TorConfig) -> Self {
        Self {
            config,
            child: tokio::sync::Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TorConfig {
        &self.config
    }

    /// Launch `tor` and wait for it to bootstrap, or verify that an already
    /// running relay's control port accepts connections.
    pub async fn start(&self) -> Result<(), AppError> {
        if !self.config.launch {
            return self.attach().await;
        }

        let mut guard = self.child.lock().await;
        if guard.is_some() {
            tracing::debug!("Tor already running");
            return Ok(());
        }

        let args = self.launch_args().await?;
        tracing::info!(
            binary = %self.config.tor_binary.display(),
            socks_port = self.config.socks_port,
            control_port = self.config.control_port,
            "Starting Tor"
        );

        let mut child = Command::new(&self.config.tor_binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::RelayStartupFailure(format!(
                    "Failed to launch {}: {e}",
                    self.config.tor_binary.display()
                ))
            })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill().await;
            return Err(AppError::RelayStartupFailure("tor stdout unavailable".into()));
        };
        let mut lines = BufReader::new(stdout).lines();

        let bootstrapped =
            tokio::time::timeout(self.config.bootstrap_timeout, wait_for_bootstrap(&mut lines)).await;
        match bootstrapped {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(e);
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(AppError::RelayStartupFailure(format!(
                    "tor did not bootstrap within {}s",
                    self.config.bootstrap_timeout.as_secs()
                )));
            }
        }

        // Keep draining stdout so tor never blocks on a full pipe.
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::trace!(target: "veil_client::tor::log", "{line}");
            }
        });

        tracing::info!("Tor started successfully");
        *guard = Some(child);
        Ok(())
    }

    async fn attach(&self) -> Result<(), AppError> {
        let addr = ("127.0.0.1", self.config.control_port);
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => {
                tracing::info!(control_port = self.config.control_port, "Attached to running Tor");
                Ok(())
            }
            Ok(Err(e)) => Err(AppError::RelayStartupFailure(format!(
                "No Tor control port on {}: {e}",
                self.config.control_port
            ))),
            Err(_) => Err(AppError::RelayStartupFailure(format!(
                "Timed out connecting to Tor control port {}",
                self.config.control_port
            ))),
        }
    }

    async fn launch_args(&self) -> Result<Vec<String>, AppError> {
        let mut args = vec![
            "--SocksPort".to_string(),
            self.config.socks_port.to_string(),
            "--ControlPort".to_string(),
            self.config.control_port.to_string(),
        ];
        match &self.config.password {
            Some(password) => {
                let hashed = hash_password(&self.config.tor_binary, password).await?;
                args.extend(["--HashedControlPassword".to_string(), hashed]);
                args.extend(["--CookieAuthentication".to_string(), "0".to_string()]);
            }
            None => args.extend(["--CookieAuthentication".to_string(), "1".to_string()]),
        }
        if let Some(dir) = &self.config.data_dir {
            args.extend([
                "--DataDirectory".to_string(),
                dir.to_string_lossy().into_owned(),
            ]);
        }
        Ok(args)
    }

    /// Ask the relay for a new circuit, then wait for it to come up.
    pub async fn renew_identity(&self) -> Result<(), AppError> {
        let mut control = ControlConnection::connect(self.config.control_port).await?;
        control.authenticate(self.config.password.as_deref()).await?;
        control.command("SIGNAL NEWNYM").await?;
        let _ = control.command("QUIT").await;

        tracing::info!("Tor identity renewed");
        tokio::time::sleep(self.config.settle_delay).await;
        Ok(())
    }

    /// Shared HTTP session routed through the relay. Built once.
    pub fn get_session(&self) -> Result<Client, AppError> {
        let mut session = self.lock_session();
        if let Some(client) = session.as_ref() {
            return Ok(client.clone());
        }
        let client = build_client(self.config.request_timeout, Some(&self.config.socks_url()))?;
        *session = Some(client.clone());
        Ok(client)
    }

    /// Kill the launched relay, if any. Safe to call repeatedly.
    pub async fn stop(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        if let Err(e) = child.kill().await {
            tracing::warn!(error = %e, "Failed to kill Tor");
        } else {
            tracing::info!("Tor stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.child.lock().await.is_some()
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Client>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CircuitRoute for TorManager {
    fn proxy_url(&self) -> String {
        self.config.socks_url()
    }
}

/// Read tor's log until bootstrapping completes.
async fn wait_for_bootstrap<R: AsyncBufRead + Unpin>(lines: &mut Lines<R>) -> Result<(), AppError> {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.contains("Bootstrapped") {
                    tracing::debug!("{}", line.trim());
                }
                if line.contains(BOOTSTRAP_DONE) {
                    return Ok(());
                }
            }
            Ok(None) => {
                return Err(AppError::RelayStartupFailure(
                    "tor exited before bootstrapping".into(),
                ));
            }
            Err(e) => {
                return Err(AppError::RelayStartupFailure(format!("reading tor output: {e}")));
            }
        }
    }
}

/// `tor --hash-password <password>` prints the hash as its last line.
async fn hash_password(binary: &Path, password: &str) -> Result<String, AppError> {
    let output = Command::new(binary)
        .arg("--hash-password")
        .arg(password)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| AppError::RelayStartupFailure(format!("Failed to hash password: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .map(str::trim)
        .rfind(|line| line.starts_with("16:"))
        .map(str::to_string)
        .ok_or_else(|| AppError::RelayStartupFailure("tor --hash-password gave no hash".into()))
}

/// One reply from the control port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl ControlReply {
    pub fn is_ok(&self) -> bool {
        self.code == 250
    }

    fn message(&self) -> String {
        self.lines.last().cloned().unwrap_or_default()
    }
}

/// Minimal Tor control-protocol client.
pub struct ControlConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ControlConnection {
    pub async fn connect(port: u16) -> Result<Self, AppError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(("127.0.0.1", port)))
            .await
            .map_err(|_| AppError::RelayError(format!("Timed out connecting to control port {port}")))?
            .map_err(|e| AppError::RelayError(format!("Control port {port}: {e}")))?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    /// Send one command and read its reply.
    pub async fn send(&mut self, line: &str) -> Result<ControlReply, AppError> {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .map_err(|e| AppError::RelayError(format!("write: {e}")))?;
        read_reply(&mut self.reader).await
    }

    /// Like [`send`](Self::send), but any non-250 reply is a [`AppError::RelayError`].
    pub async fn command(&mut self, line: &str) -> Result<ControlReply, AppError> {
        let verb = line.split_whitespace().next().unwrap_or(line).to_string();
        let reply = self.send(line).await?;
        if !reply.is_ok() {
            return Err(AppError::RelayError(format!(
                "{verb} rejected: {} {}",
                reply.code,
                reply.message()
            )));
        }
        Ok(reply)
    }

    /// Password if given, else cookie from `PROTOCOLINFO`, else null auth.
    pub async fn authenticate(&mut self, password: Option<&str>) -> Result<(), AppError> {
        let request = match password {
            Some(password) => format!("AUTHENTICATE {}", quote(password)),
            None => {
                let info = self.command("PROTOCOLINFO 1").await?;
                let auth = parse_auth_methods(&info);
                match (&auth.cookie_file, auth.methods.iter().any(|m| m == "NULL")) {
                    (_, true) => "AUTHENTICATE".to_string(),
                    (Some(path), false) if auth.methods.iter().any(|m| m == "COOKIE") => {
                        let cookie = tokio::fs::read(path).await.map_err(|e| {
                            AppError::RelayAuthFailure(format!("cookie {}: {e}", path.display()))
                        })?;
                        format!("AUTHENTICATE {}", hex::encode(cookie))
                    }
                    _ => {
                        return Err(AppError::RelayAuthFailure(format!(
                            "no usable auth method in {:?}",
                            auth.methods
                        )));
                    }
                }
            }
        };

        let reply = self.send(&request).await?;
        if !reply.is_ok() {
            return Err(AppError::RelayAuthFailure(format!(
                "{} {}",
                reply.code,
                reply.message()
            )));
        }
        Ok(())
    }
}

/// Read reply lines up to the final `NNN <text>` line. Data blocks
/// (`NNN+`, terminated by `.`) are folded into the preceding line.
async fn read_reply<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<ControlReply, AppError> {
    let mut lines = Vec::new();
    loop {
        let line = read_line(reader).await?;
        // An ASCII separator at byte 3 makes both slices below char-aligned.
        let separator = match line.as_bytes().get(3) {
            Some(&sep @ (b' ' | b'-' | b'+')) => sep,
            _ => return Err(AppError::RelayError(format!("malformed reply line: {line:?}"))),
        };
        let code: u16 = line[..3]
            .parse()
            .map_err(|_| AppError::RelayError(format!("malformed reply code: {line:?}")))?;
        let text = line[4..].to_string();

        match separator {
            b' ' => {
                lines.push(text);
                return Ok(ControlReply { code, lines });
            }
            b'-' => lines.push(text),
            // b'+'
            _ => {
                let mut block = text;
                loop {
                    let data = read_line(reader).await?;
                    if data == "." {
                        break;
                    }
                    block.push('\n');
                    block.push_str(&data);
                }
                lines.push(block);
            }
        }
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, AppError> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(|e| AppError::RelayError(format!("read: {e}")))?;
    if n == 0 {
        return Err(AppError::RelayError("control connection closed".into()));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct AuthInfo {
    methods: Vec<String>,
    cookie_file: Option<PathBuf>,
}

/// Pull `METHODS=` and `COOKIEFILE=` out of a `PROTOCOLINFO` reply.
fn parse_auth_methods(reply: &ControlReply) -> AuthInfo {
    let mut info = AuthInfo::default();
    let Some(line) = reply.lines.iter().find(|l| l.starts_with("AUTH ")) else {
        return info;
    };
    if let Some(rest) = line.split("METHODS=").nth(1) {
        let methods = rest.split_whitespace().next().unwrap_or_default();
        info.methods = methods.split(',').map(str::to_string).collect();
    }
    if let Some(rest) = line.split("COOKIEFILE=").nth(1) {
        info.cookie_file = unquote(rest).map(PathBuf::from);
    }
    info
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Leading quoted string of `s`, with escapes resolved.
fn unquote(s: &str) -> Option<String> {
    let mut chars = s.strip_prefix('"')?.chars();
    let mut out = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push(chars.next()?),
            '"' => return Some(out),
            c => out.push(c),
        }
    }
    None
}
