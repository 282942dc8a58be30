//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum Error {
    /// Core event error.
    #[error(transparent)]
    Core(#[from] hearth_core::Error),

    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The hub closed the connection or the stream ended.
    #[error("hub connection closed")]
    ConnectionClosed,

    /// Connection establishment or a handshake read exceeded its timeout.
    #[error("connection attempt timed out after {timeout_secs}s")]
    ConnectTimeout {
        /// The configured connect timeout in seconds.
        timeout_secs: u64,
    },

    /// The hub rejected our credentials for one connection attempt.
    #[error("hub rejected authentication: {0}")]
    AuthRejected(String),

    /// Authentication failed repeatedly with the same credentials. Fatal;
    /// the service is marked unhealthy instead of retrying forever.
    #[error("authentication failed {attempts} times, giving up")]
    AuthFailed {
        /// How many attempts were made before giving up.
        attempts: u32,
    },

    /// The hub rejected our event subscription.
    #[error("hub rejected subscription: {0}")]
    SubscribeRejected(String),

    /// A keepalive ping received no pong within the timeout.
    #[error("keepalive timeout: no pong within {timeout_secs}s")]
    KeepaliveTimeout {
        /// The configured pong timeout in seconds.
        timeout_secs: u64,
    },

    /// The circuit breaker is open; the call was not attempted.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// Hand-off to the processing stage timed out (queue full).
    #[error("processing stage did not accept the event in time")]
    SubmitTimeout,

    /// A pipeline channel closed while the pipeline was still running.
    #[error("pipeline channel closed")]
    ChannelClosed,

    /// Weather provider HTTP error.
    #[error("weather provider error: {0}")]
    Http(#[from] reqwest::Error),

    /// ClickHouse error.
    #[error("ClickHouse error: {0}")]
    ClickHouse(#[from] clickhouse::error::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failed_display() {
        let err = Error::AuthFailed { attempts: 3 };
        assert!(err.to_string().contains("3 times"));
    }

    #[test]
    fn test_keepalive_timeout_display() {
        let err = Error::KeepaliveTimeout { timeout_secs: 10 };
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn test_circuit_open_display() {
        assert_eq!(Error::CircuitOpen.to_string(), "circuit breaker is open");
    }
}
