//! Rainbow Bridge - Reconnecting WebSocket chat client.
//!
//! This library provides the real-time connection core of a chat front-end:
//! a WebSocket transport that reconnects on its own, sends one request at a
//! time and pairs each reply with the call that is waiting for it.
//!
//! # Architecture
//!
//! The client sits between UI code and the Rainbow Bridge backend:
//!
//! - **Transport**: owns the single socket, publishes connection state
//! - **Reconnect policy**: bounded, fixed-delay retries after unclean closes
//! - **Correlator**: one pending request, resolved by the next reply
//! - **Codec**: chooses the wire envelope (simple chat or full ask)
//!
//! Key design principles:
//!
//! - At most one physical connection per [`Client`]
//! - At most one request in flight; a second one is rejected, never misrouted
//! - Every request settles exactly once (reply, error, loss, cancel, timeout)
//! - State changes are pushed to observers (no polling)
//!
//! # Quick Start
//!
//! ```no_run
//! use rainbow_bridge::{Client, ConnectionState, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Endpoint from RAINBOW_BRIDGE_WS_URL, or ws://localhost:8001/ws
//!     let client = Client::builder().build()?;
//!
//!     client.connect();
//!     client.watch_status().wait_for(ConnectionState::Connected).await?;
//!
//!     let reply = client.send_message("What can you do?").await?;
//!     println!("{reply}");
//!
//!     client.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Client`] façade |
//! | [`config`] | [`ClientBuilder`] and defaults |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire envelopes, replies and codecs |
//! | [`transport`] | Connection state and reconnect policy |

// ============================================================================
// Modules
// ============================================================================

/// Client façade.
///
/// Use [`Client::builder()`] to create a configured client.
pub mod client;

/// Client configuration and defaults.
pub mod config;

/// Request/response correlation.
mod correlator;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire protocol message types.
///
/// Outbound envelopes, inbound replies and the codecs that select them.
pub mod protocol;

/// WebSocket transport layer.
///
/// Connection state, observers and the reconnect policy.
pub mod transport;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::Client;
pub use config::{ClientBuilder, ClientConfig};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::RequestId;

// Protocol types
pub use protocol::{
    Answer, AskCodec, ChatCodec, ChatTurn, Codec, ConversationMessage, Inbound, Prompt, Role,
    SessionContext, build_chat_history,
};

// Transport types
pub use transport::{ConnectionState, ReconnectState, StatusObserver};
