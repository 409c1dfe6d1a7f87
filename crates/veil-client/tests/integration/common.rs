use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use wiremock::{Request, Respond, ResponseTemplate};

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

/// Serves `Range: bytes=a-b` requests from memory, optionally failing the
/// chunk starting at `fail_at` exactly once.
pub struct RangeResponder {
    data: Arc<Vec<u8>>,
    fail_at: Option<u64>,
    failed: AtomicBool,
    pub served: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl RangeResponder {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            fail_at: None,
            failed: AtomicBool::new(false),
            served: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_once_at(mut self, start: u64) -> Self {
        self.fail_at = Some(start);
        self
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Some((start, end)) = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range)
        else {
            return ResponseTemplate::new(200).set_body_bytes(self.data.as_ref().clone());
        };

        let last = self.data.len() as u64 - 1;
        if start > last {
            return ResponseTemplate::new(416);
        }
        if self.fail_at == Some(start) && !self.failed.swap(true, Ordering::SeqCst) {
            return ResponseTemplate::new(500);
        }

        let end = end.min(last);
        self.served.lock().unwrap().push((start, end));
        ResponseTemplate::new(206)
            .insert_header(
                "content-range",
                format!("bytes {start}-{end}/{}", self.data.len()).as_str(),
            )
            .set_body_bytes(self.data[start as usize..=end as usize].to_vec())
    }
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// A scripted Tor control port. Answers each command with the reply chosen
/// by `script` and records every line it receives.
pub async fn fake_control_port<F>(script: F) -> (u16, JoinHandle<Vec<String>>)
where
    F: Fn(&str) -> String + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let mut received = Vec::new();
        let Ok((stream, _)) = listener.accept().await else {
            return received;
        };
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let reply = script(&line);
            received.push(line.clone());
            if write.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
            if line == "QUIT" {
                break;
            }
        }
        received
    });

    (port, handle)
}
