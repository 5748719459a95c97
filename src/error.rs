//! Error types for the exchange-feed crate.
//!
//! This module defines the errors that can occur while streaming market data,
//! including transport failures, sequence gaps, REST snapshot failures, and
//! venue decode errors.
//!
//! Most of these are handled inside the crate: transport errors trigger a
//! reconnect, sequence gaps trigger a resync, decode errors drop a single
//! message. They surface to the caller only where the caller has to decide
//! something (a failed replay, a book that is not ready yet).

use thiserror::Error;

/// The main error type for this crate
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Socket-level I/O error (proxy tunnelling, TCP connect)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid configuration (missing fields, bad format)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Venue returned an error response
    #[error("API error ({}): {}", .0.status, .0.message)]
    Api(ApiError),

    /// Rate limit exceeded
    #[error("Rate limited{}", retry_suffix(.retry_after_ms))]
    RateLimited {
        /// Retry after this many milliseconds
        retry_after_ms: Option<u64>,
    },

    /// Streaming connection closed unexpectedly
    #[error("WebSocket connection closed")]
    ConnectionClosed,

    /// The order book has no authoritative state yet
    #[error("Order book {0} is not ready")]
    NotReady(String),

    /// A venue payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Re-issuing a registered subscription after reconnect failed
    #[error("Subscription replay failed for {channel}: {source}")]
    ReplayFailed {
        /// Channel of the subscription that failed
        channel: String,
        /// Underlying send error
        #[source]
        source: Box<Error>,
    },

    /// Instrument symbol not understood by the venue adapter
    #[error("Invalid instrument: {0}")]
    InvalidInstrument(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,
}

/// Error returned by a venue REST API
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Error code from API (if provided)
    pub code: Option<String>,
    /// Error message
    pub message: String,
}

fn retry_suffix(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(", retry after {}ms", ms),
        None => String::new(),
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Config(format!("invalid URL: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::http::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::http::Error) -> Self {
        Error::Config(format!("HTTP error building WebSocket request: {}", err))
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::Tls(err.to_string())
    }
}

impl Error {
    /// Whether this error is a transport failure that a reconnect can fix
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::WebSocket(_) | Error::Io(_) | Error::ConnectionClosed | Error::Timeout
        )
    }
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// Create an API error with an error code
    pub fn with_code(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = Error::Api(ApiError::new(400, "Bad request"));
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("Bad request"));
    }

    #[test]
    fn test_rate_limited_display() {
        let err = Error::RateLimited {
            retry_after_ms: Some(1000),
        };
        assert!(err.to_string().contains("1000"));

        let err = Error::RateLimited {
            retry_after_ms: None,
        };
        assert_eq!(err.to_string(), "Rate limited");
    }

    #[test]
    fn test_replay_failed_keeps_source() {
        let err = Error::ReplayFailed {
            channel: "btcusdt@depth@100ms".to_string(),
            source: Box::new(Error::ConnectionClosed),
        };
        assert!(err.to_string().contains("btcusdt@depth@100ms"));
        let source = std::error::Error::source(&err).map(|e| e.to_string());
        assert_eq!(source.as_deref(), Some("WebSocket connection closed"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Timeout.is_transient());
        assert!(Error::ConnectionClosed.is_transient());
        assert!(!Error::NotReady("binance_spot_BTC_USDT".into()).is_transient());
        assert!(!Error::Decode("bad".into()).is_transient());
    }

    #[test]
    fn test_api_error_classes() {
        assert!(ApiError::new(404, "missing").is_client_error());
        assert!(ApiError::with_code(503, "UNAVAILABLE", "down").is_server_error());
    }
}
