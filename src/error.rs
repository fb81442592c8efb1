//! Error types for the Rainbow Bridge client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use rainbow_bridge::{Client, Error, Result};
//!
//! async fn ask(client: &Client) -> Result<()> {
//!     match client.send_message("hello").await {
//!         Ok(answer) => println!("{answer}"),
//!         Err(Error::NotConnected) => println!("not connected, try again later"),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::NotConnected`], [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::Cancelled`] |
//! | Request | [`Error::RequestInFlight`], [`Error::RequestTimeout`] |
//! | Reply | [`Error::Protocol`], [`Error::Server`] |
//! | External | [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned by [`ClientBuilder::build`](crate::ClientBuilder::build)
    /// when the configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// A request was issued while the transport is not connected.
    ///
    /// Nothing is written to the socket.
    #[error("Not connected to Rainbow Bridge")]
    NotConnected,

    /// Transport-level failure reported by the socket.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The connection dropped while a request was waiting for its reply.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The request was cancelled by a manual disconnect.
    #[error("Request cancelled by disconnect")]
    Cancelled,

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// Another request is already waiting for its reply.
    ///
    /// The protocol carries one exchange at a time; callers must wait for the
    /// previous reply before sending again.
    #[error("A request is already in flight")]
    RequestInFlight,

    /// No reply arrived within the configured request timeout.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Reply Errors
    // ========================================================================
    /// Inbound payload could not be understood.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// The server answered with a failure.
    #[error("{message}")]
    Server {
        /// Message provided by the server.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Endpoint URL could not be parsed.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a server-reported error.
    #[inline]
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::Cancelled
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the server itself reported the failure.
    #[inline]
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Server { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed when the request is sent again.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::ConnectionClosed
                | Self::RequestInFlight
                | Self::RequestTimeout { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::connection("refused");
        assert_eq!(err.to_string(), "Connection failed: refused");
    }

    #[test]
    fn test_not_connected_display() {
        assert_eq!(
            Error::NotConnected.to_string(),
            "Not connected to Rainbow Bridge"
        );
    }

    #[test]
    fn test_server_error_keeps_message() {
        let err = Error::server("boom");
        assert_eq!(err.to_string(), "boom");
        assert!(err.is_server_error());
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::request_timeout(RequestId::generate(), 5000);
        let other_err = Error::protocol("bad");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::NotConnected.is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::Cancelled.is_connection_error());
        assert!(Error::connection("x").is_connection_error());
        assert!(!Error::config("x").is_connection_error());
        assert!(!Error::server("x").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::RequestInFlight.is_recoverable());
        assert!(Error::ConnectionClosed.is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
        assert!(!Error::server("x").is_recoverable());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_url_error() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err, Error::Url(_)));
    }
}
