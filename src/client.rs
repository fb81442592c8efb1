//! Client façade.
//!
//! [`Client`] composes the transport and the correlator behind a small
//! request/response API for UI code.
//!
//! # Example
//!
//! ```no_run
//! use rainbow_bridge::{Client, ConnectionState};
//!
//! # async fn example() -> rainbow_bridge::Result<()> {
//! let client = Client::builder().build()?;
//! client.connect();
//! client.watch_status().wait_for(ConnectionState::Connected).await?;
//!
//! let reply = client.send_message("Hello").await?;
//! println!("{reply}");
//!
//! client.disconnect();
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use url::Url;

use crate::config::{ClientBuilder, ClientConfig};
use crate::correlator::Correlator;
use crate::error::Result;
use crate::protocol::{Answer, ChatTurn, Codec, Inbound, Prompt};
use crate::transport::{ConnectionState, StatusObserver, Transport};

// ============================================================================
// Client
// ============================================================================

/// Reconnecting chat client.
///
/// Cloning yields another handle to the same connection. The socket closes
/// once every handle is dropped.
#[derive(Clone)]
pub struct Client {
    transport: Transport,
    correlator: Arc<Correlator>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url().as_str())
            .field("status", &self.status())
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl Client {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn new(config: ClientConfig, codec: Arc<dyn Codec>) -> Self {
        let correlator = Arc::new(Correlator::new(
            codec,
            config.request_timeout,
            config.notification_capacity,
        ));
        let transport = Transport::new(config, correlator.clone());

        Self {
            transport,
            correlator,
        }
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Opens the connection.
    ///
    /// Returns immediately; watch [`Client::watch_status`] for the outcome.
    /// Does nothing while a socket is already open or opening. Must be
    /// called from within a tokio runtime.
    pub fn connect(&self) {
        self.transport.connect();
    }

    /// Closes the connection with code 1000.
    ///
    /// Cancels any scheduled reconnect and fails an outstanding request
    /// with [`Error::Cancelled`](crate::Error::Cancelled).
    pub fn disconnect(&self) {
        self.transport.disconnect();
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Sends a chat message and returns the reply text.
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub async fn send_message(&self, content: impl Into<String>) -> Result<String> {
        let answer = self.request(&Prompt::chat(content)).await?;
        Ok(answer.content)
    }

    /// Submits structured form data for a tool.
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub async fn submit_form(&self, tool_type: impl Into<String>, data: Value) -> Result<Answer> {
        self.request(&Prompt::form(tool_type, data)).await
    }

    /// Sends a message with optional structured data attached.
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub async fn send_hybrid(
        &self,
        content: impl Into<String>,
        data: Option<Value>,
    ) -> Result<Answer> {
        self.request(&Prompt::hybrid(content, data)).await
    }

    /// Sends a prompt and waits for its reply.
    ///
    /// Only one request may be outstanding at a time.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`](crate::Error::NotConnected) unless connected
    /// - [`Error::RequestInFlight`](crate::Error::RequestInFlight) if another
    ///   request is outstanding
    /// - [`Error::RequestTimeout`](crate::Error::RequestTimeout) if no reply
    ///   arrives in time
    /// - [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) or
    ///   [`Error::Cancelled`](crate::Error::Cancelled) if the connection
    ///   goes away first
    /// - [`Error::Server`](crate::Error::Server) for a failure reported by
    ///   the backend
    /// - [`Error::Protocol`](crate::Error::Protocol) for a malformed reply
    pub async fn request(&self, prompt: &Prompt) -> Result<Answer> {
        self.correlator.request(&self.transport, prompt).await
    }

    /// Returns the conversation history the codec sends with requests.
    #[must_use]
    pub fn history(&self) -> Vec<ChatTurn> {
        self.correlator.codec().history()
    }

    /// Forgets the conversation history, e.g. to start a new conversation.
    pub fn clear_history(&self) {
        self.correlator.codec().clear_history();
    }

    /// Subscribes to messages that answer no outstanding request.
    #[must_use]
    pub fn notifications(&self) -> broadcast::Receiver<Inbound> {
        self.correlator.subscribe()
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Returns the current connection state.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionState {
        self.transport.status()
    }

    /// Returns `true` if requests may be sent.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionState::Connected
    }

    /// Returns `true` while a socket is opening.
    #[inline]
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.status() == ConnectionState::Connecting
    }

    /// Creates an observer of state transitions.
    #[must_use]
    pub fn watch_status(&self) -> StatusObserver {
        self.transport.watch_status()
    }

    /// Returns the reconnects scheduled since the last successful open.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.transport.attempt_count()
    }

    /// Returns `true` once automatic reconnects gave up.
    ///
    /// Only a manual [`Client::connect`] opens the connection again.
    #[must_use]
    pub fn reconnect_exhausted(&self) -> bool {
        self.transport.reconnect_exhausted()
    }

    /// Returns `true` while a request waits for its reply.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.correlator.is_busy()
    }

    /// Returns the endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.transport.config().url
    }
}

// ============================================================================
// Tests
// ============================================================================
