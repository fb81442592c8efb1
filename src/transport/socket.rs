//! Socket task.
//!
//! Each physical connection is driven by one tokio task that owns the
//! WebSocket stream. The task reports what happens on the wire through
//! [`SocketEvents`] and takes writes and close requests from a command
//! channel.
//!
//! # Event Order
//!
//! Every socket reports either `open` or `error` first and always ends with
//! exactly one `close`:
//!
//! - connect failure: `error`, `close(1006)`
//! - remote close: `open`, messages…, `close(code)`
//! - read/write failure: `open`, messages…, `error`, `close(1006)`

// ============================================================================
// Imports
// ============================================================================

use std::sync::Weak;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace, warn};

use crate::error::Error;

use super::reconnect::{ABNORMAL_CLOSURE, NO_STATUS_RECEIVED, NORMAL_CLOSURE};

// ============================================================================
// Types
// ============================================================================

/// Commands accepted by the socket task.
#[derive(Debug)]
pub(crate) enum SocketCommand {
    /// Write a text frame.
    Send(String),
    /// Close with the given code and reason.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: &'static str,
    },
}

/// Receiver of socket events.
///
/// `generation` identifies the socket that produced the event so stale
/// events from a replaced socket can be ignored.
pub(crate) trait SocketEvents: Send + Sync + 'static {
    /// The connection is open.
    fn on_open(&self, generation: u64);

    /// A text frame arrived.
    fn on_message(&self, generation: u64, text: &str);

    /// The connection failed.
    fn on_error(&self, generation: u64, error: Error);

    /// The connection is gone.
    fn on_close(&self, generation: u64, code: u16);
}

/// Parameters of one socket task.
pub(crate) struct SocketTask {
    /// Endpoint URL.
    pub url: String,
    /// Generation reported with every event.
    pub generation: u64,
    /// Limit for the opening handshake.
    pub connect_timeout: Duration,
    /// Commands from the transport.
    pub commands: mpsc::UnboundedReceiver<SocketCommand>,
    /// Event receiver; the task stops reporting once it is gone.
    pub events: Weak<dyn SocketEvents>,
}

// ============================================================================
// Event Loop
// ============================================================================

impl SocketTask {
    /// Connects and runs until the socket closes.
    pub(crate) async fn run(self) {
        let Self {
            url,
            generation,
            connect_timeout,
            mut commands,
            events,
        } = self;

        let emit = |f: &dyn Fn(&dyn SocketEvents)| {
            if let Some(events) = events.upgrade() {
                f(events.as_ref());
            }
        };

        debug!(%url, generation, "Opening WebSocket");

        let ws_stream = match timeout(connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws_stream, _response))) => ws_stream,
            Ok(Err(e)) => {
                emit_error(&events, generation, Error::WebSocket(e));
                emit(&|ev| ev.on_close(generation, ABNORMAL_CLOSURE));
                return;
            }
            Err(_) => {
                let error = Error::connection(format!(
                    "Connection timeout after {}ms",
                    connect_timeout.as_millis()
                ));
                emit_error(&events, generation, error);
                emit(&|ev| ev.on_close(generation, ABNORMAL_CLOSURE));
                return;
            }
        };

        emit(&|ev| ev.on_open(generation));

        let (mut ws_write, mut ws_read) = ws_stream.split();

        let code = loop {
            tokio::select! {
                // Incoming frames from the server
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            trace!(generation, len = text.len(), "Frame received");
                            emit(&|ev| ev.on_message(generation, text.as_str()));
                        }

                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map_or(NO_STATUS_RECEIVED, |f| u16::from(f.code));
                            debug!(generation, code, "WebSocket closed by remote");
                            break code;
                        }

                        Some(Ok(Message::Binary(_))) => {
                            warn!(generation, "Ignoring binary frame");
                        }

                        Some(Err(e)) => {
                            emit_error(&events, generation, Error::WebSocket(e));
                            break ABNORMAL_CLOSURE;
                        }

                        None => {
                            debug!(generation, "WebSocket stream ended");
                            break ABNORMAL_CLOSURE;
                        }

                        // Ping, Pong and raw frames are handled by tungstenite
                        _ => {}
                    }
                }

                // Commands from the transport
                command = commands.recv() => {
                    match command {
                        Some(SocketCommand::Send(text)) => {
                            if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                emit_error(&events, generation, Error::WebSocket(e));
                                break ABNORMAL_CLOSURE;
                            }
                            trace!(generation, "Frame sent");
                        }

                        Some(SocketCommand::Close { code, reason }) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            };
                            if let Err(e) = ws_write.send(Message::Close(Some(frame))).await {
                                debug!(generation, error = %e, "Failed to send close frame");
                            }
                            break code;
                        }

                        None => {
                            debug!(generation, "Transport dropped");
                            break NORMAL_CLOSURE;
                        }
                    }
                }
            }
        };

        // Flushes a pending close reply or our own close frame
        let _ = ws_write.close().await;

        emit(&|ev| ev.on_close(generation, code));

        debug!(generation, code, "Socket task terminated");
    }
}

/// Reports an error to the transport.
fn emit_error(events: &Weak<dyn SocketEvents>, generation: u64, error: Error) {
    if let Some(events) = events.upgrade() {
        events.on_error(generation, error);
    }
}

// ============================================================================
// Tests
// ============================================================================
