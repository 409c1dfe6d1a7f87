//! Self-refreshing pool of validated HTTP proxies.
//!
//! ```text
//! sources --[discovery loop]--> pending queue --[N validators]--> active list --> get_proxy()
//!                                                                     ^
//!                                  report_success / report_failure ---+ (eviction)
//! ```
//!
//! The active list lives behind a single mutex and is only reachable through
//! pop-front/push-back serving, push-back on validation, and the feedback
//! operations. Without feedback calls the pool serves strict round-robin.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ProxyPoolConfig;
use crate::models::ProxyRecord;
use crate::traits::{ProxyProber, ProxySource};

/// Events emitted by the pool for monitoring/logging.
#[derive(Debug, Clone)]
pub enum PoolEvent<'a> {
    Started { validators: usize },
    Discovered { source: &'a str, count: usize },
    SourceFailed { source: &'a str, error: &'a str },
    Validated { address: &'a str },
    Refreshed { address: &'a str },
    Rejected { address: &'a str },
    Evicted { address: &'a str, failures: u32 },
    Stopped,
}

/// Trait for receiving pool events (decoupled logging).
pub trait PoolReporter: Send + Sync {
    fn report(&self, event: PoolEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPoolReporter;

impl PoolReporter for TracingPoolReporter {
    fn report(&self, event: PoolEvent<'_>) {
        match event {
            PoolEvent::Started { validators } => {
                tracing::info!(%validators, "Proxy pool started");
            }
            PoolEvent::Discovered { source, count } => {
                tracing::info!(%source, %count, "Fetched proxy candidates");
            }
            PoolEvent::SourceFailed { source, error } => {
                tracing::warn!(%source, %error, "Proxy source failed");
            }
            PoolEvent::Validated { address } => {
                tracing::debug!(proxy = %address, "Proxy validated");
            }
            PoolEvent::Refreshed { address } => {
                tracing::trace!(proxy = %address, "Proxy re-validated");
            }
            PoolEvent::Rejected { address } => {
                tracing::trace!(proxy = %address, "Proxy rejected");
            }
            PoolEvent::Evicted { address, failures } => {
                tracing::info!(proxy = %address, %failures, "Proxy evicted");
            }
            PoolEvent::Stopped => {
                tracing::info!("Proxy pool stopped");
            }
        }
    }
}

struct PoolShared {
    config: ProxyPoolConfig,
    active: Mutex<VecDeque<ProxyRecord>>,
    reporter: Box<dyn PoolReporter>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl PoolShared {
    /// Acquires the active-list lock, recovering from poison if necessary.
    fn lock_active(&self) -> MutexGuard<'_, VecDeque<ProxyRecord>> {
        self.active.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned proxy list mutex");
            poisoned.into_inner()
        })
    }

    /// Append a freshly validated proxy, or refresh it if already active.
    fn insert_validated(&self, address: &str) -> bool {
        let inserted = {
            let mut active = self.lock_active();
            match active.iter_mut().find(|r| r.address == address) {
                Some(existing) => {
                    existing.last_verified = Utc::now();
                    false
                }
                None => {
                    active.push_back(ProxyRecord::new(address));
                    true
                }
            }
        };
        if inserted {
            self.reporter.report(PoolEvent::Validated { address });
        } else {
            self.reporter.report(PoolEvent::Refreshed { address });
        }
        inserted
    }
}

/// Rotating pool of validated proxy endpoints.
///
/// Cheap to clone; all clones share one active list and one set of tasks.
#[derive(Clone)]
pub struct ProxyPool {
    shared: Arc<PoolShared>,
}

impl ProxyPool {
    pub fn new(config: ProxyPoolConfig) -> Self {
        Self::with_reporter(config, TracingPoolReporter)
    }

    pub fn with_reporter<WR: PoolReporter + 'static>(config: ProxyPoolConfig, reporter: WR) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config,
                active: Mutex::new(VecDeque::new()),
                reporter: Box::new(reporter),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Launch the discovery loop and the validator workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<S, P>(&self, sources: Vec<S>, prober: P)
    where
        S: ProxySource,
        P: ProxyProber,
    {
        let config = &self.shared.config;
        let workers = config.validator_workers.max(1);
        let (tx, rx) = mpsc::channel::<String>(config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let prober = Arc::new(prober);

        self.shared.reporter.report(PoolEvent::Started {
            validators: workers,
        });

        let shared = Arc::clone(&self.shared);
        self.shared
            .tracker
            .spawn(async move { discovery_loop(shared, sources, tx).await });

        for _ in 0..workers {
            let shared = Arc::clone(&self.shared);
            let rx = Arc::clone(&rx);
            let prober = Arc::clone(&prober);
            self.shared
                .tracker
                .spawn(async move { validator_loop(shared, rx, prober).await });
        }
    }

    /// Next proxy in round-robin order, or `None` if the pool is empty.
    ///
    /// Never blocks on network activity.
    pub fn get_proxy(&self) -> Option<String> {
        let mut active = self.shared.lock_active();
        let record = active.pop_front()?;
        let address = record.address.clone();
        active.push_back(record);
        Some(address)
    }

    /// Add known-good proxies without probing them.
    pub fn seed<I, A>(&self, addresses: I)
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        for address in addresses {
            if let Some(address) = normalize_address(address.as_ref()) {
                self.shared.insert_validated(&address);
            }
        }
    }

    /// A request through `address` succeeded.
    pub fn report_success(&self, address: &str) {
        let mut active = self.shared.lock_active();
        if let Some(record) = active.iter_mut().find(|r| r.address == address) {
            record.success_count += 1;
            record.consecutive_failures = 0;
        }
    }

    /// A request through `address` failed. Evicts the proxy once its
    /// consecutive failures reach `max_failures`.
    pub fn report_failure(&self, address: &str) {
        let evicted = {
            let mut active = self.shared.lock_active();
            let Some(pos) = active.iter().position(|r| r.address == address) else {
                return;
            };
            let record = &mut active[pos];
            record.fail_count += 1;
            record.consecutive_failures += 1;
            match self.shared.config.max_failures {
                Some(max) if record.consecutive_failures >= max => active.remove(pos),
                _ => None,
            }
        };
        if let Some(record) = evicted {
            self.shared.reporter.report(PoolEvent::Evicted {
                address: &record.address,
                failures: record.consecutive_failures,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.shared.lock_active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the active records in serving order.
    pub fn snapshot(&self) -> Vec<ProxyRecord> {
        self.shared.lock_active().iter().cloned().collect()
    }

    /// Stop discovery and validation at the next iteration boundary.
    /// In-flight probes are allowed to finish.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
        self.shared.tracker.close();
    }

    /// Wait for all pool tasks to exit after [`shutdown`](Self::shutdown).
    pub async fn wait(&self) {
        self.shared.tracker.wait().await;
        self.shared.reporter.report(PoolEvent::Stopped);
    }

    pub fn is_running(&self) -> bool {
        !self.shared.cancel.is_cancelled() && !self.shared.tracker.is_empty()
    }
}

async fn discovery_loop<S: ProxySource>(
    shared: Arc<PoolShared>,
    sources: Vec<S>,
    tx: mpsc::Sender<String>,
) {
    let cancel = shared.cancel.clone();
    let refresh = shared.config.refresh_interval;

    loop {
        for source in &sources {
            if cancel.is_cancelled() {
                return;
            }
            match source.discover().await {
                Ok(candidates) => {
                    shared.reporter.report(PoolEvent::Discovered {
                        source: source.name(),
                        count: candidates.len(),
                    });
                    for candidate in candidates {
                        let Some(address) = normalize_address(&candidate) else {
                            continue;
                        };
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => return,
                            sent = tx.send(address) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    let error = e.to_string();
                    shared.reporter.report(PoolEvent::SourceFailed {
                        source: source.name(),
                        error: &error,
                    });
                }
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(refresh) => {}
        }
    }
}

async fn validator_loop<P: ProxyProber>(
    shared: Arc<PoolShared>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    prober: Arc<P>,
) {
    let cancel = shared.cancel.clone();
    let timeout = shared.config.test_timeout;

    loop {
        let candidate = {
            let mut rx = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                guard = rx.lock() => guard,
            };
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                candidate = rx.recv() => candidate,
            }
        };
        let Some(candidate) = candidate else {
            return;
        };

        if probe_with_timeout(prober.as_ref(), &candidate, timeout).await {
            shared.insert_validated(&candidate);
        } else {
            shared.reporter.report(PoolEvent::Rejected {
                address: &candidate,
            });
        }
    }
}

async fn probe_with_timeout<P: ProxyProber>(prober: &P, address: &str, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, prober.probe(address))
        .await
        .unwrap_or(false)
}

/// Trim and validate a `host:port` candidate.
pub fn normalize_address(raw: &str) -> Option<String> {
    let candidate = raw.trim();
    let candidate = candidate
        .strip_prefix("http://")
        .or_else(|| candidate.strip_prefix("https://"))
        .unwrap_or(candidate)
        .trim_end_matches('/');
    let (host, port) = candidate.rsplit_once(':')?;
    if host.is_empty() || host.contains(char::is_whitespace) {
        return None;
    }
    let port: u16 = port.parse().ok()?;
    if port == 0 {
        return None;
    }
    Some(format!("{host}:{port}"))
}
