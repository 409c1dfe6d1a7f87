use thiserror::Error;

/// Application-wide error types for Veil.
#[derive(Error, Debug)]
pub enum AppError {
    /// The site's robots policy disallows the URL.
    #[error("Blocked by robots policy: {0}")]
    ComplianceBlocked(String),

    /// Connection, protocol, or HTTP-status failure.
    #[error("Transport error: {0}")]
    TransportFailure(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Headless browser navigation, emulation, or script-injection failure.
    #[error("Render error: {0}")]
    RenderFailure(String),

    /// A proxy was required but the pool had none to serve.
    #[error("No proxy available in the pool")]
    ProxyUnavailable,

    /// The Tor process could not be launched or did not bootstrap.
    #[error("Relay startup failed: {0}")]
    RelayStartupFailure(String),

    /// The Tor control port rejected our credentials.
    #[error("Relay authentication failed: {0}")]
    RelayAuthFailure(String),

    /// Any other control-channel failure (unexpected reply, dropped socket).
    #[error("Relay control error: {0}")]
    RelayError(String),

    /// A download chunk could not be fetched or written.
    #[error("Chunk {start}-{end} failed: {message}")]
    ChunkWriteFailure {
        start: u64,
        end: u64,
        message: String,
    },

    /// The server answered a ranged request with the whole resource.
    #[error("Byte ranges not supported: {0}")]
    RangeUnsupported(String),

    /// Markup could not be turned into structured content.
    #[error("Extraction error: {0}")]
    ExtractionFailure(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A cooperative stop signal interrupted the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Local file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::TransportFailure(_) | AppError::Timeout(_))
    }

    /// Returns true if the failure says something about the network path
    /// (and therefore about the proxy it went through).
    pub fn implicates_path(&self) -> bool {
        match self {
            AppError::Timeout(_) => true,
            AppError::TransportFailure(msg) => !msg.starts_with("HTTP 4"),
            _ => false,
        }
    }
}
