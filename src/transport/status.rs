//! Connection state and its observers.
//!
//! The latest state lives in a [`tokio::sync::watch`] channel for cheap
//! reads and level waits. Every transition is also pushed on a
//! [`tokio::sync::broadcast`] channel, so a short-lived state such as
//! `error`, immediately followed by `disconnected`, still reaches observers.
//! Nothing is published when the state does not change.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Transitions buffered per observer before the oldest are dropped.
const TRANSITION_CAPACITY: usize = 32;

// ============================================================================
// ConnectionState
// ============================================================================

/// Connection state of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Socket opening.
    Connecting,
    /// Socket open, requests allowed.
    Connected,
    /// Socket reported an error; a close follows.
    Error,
}

impl ConnectionState {
    /// Returns the lowercase name of the state.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    /// Returns `true` if requests may be sent.
    #[inline]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// StatusPublisher
// ============================================================================

/// Write side of the status channel, owned by the transport.
#[derive(Debug)]
pub(crate) struct StatusPublisher {
    tx: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
}

impl StatusPublisher {
    /// Creates a publisher in the `Disconnected` state.
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self { tx, transitions }
    }

    /// Returns the current state.
    #[inline]
    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Moves to `state`, notifying observers only on a change.
    ///
    /// Returns `true` if the state changed.
    pub(crate) fn set(&self, state: ConnectionState) -> bool {
        let mut previous = state;
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            previous = *current;
            *current = state;
            true
        });

        if changed {
            debug!(from = %previous, to = %state, "Connection state changed");
            let _ = self.transitions.send(state);
        }

        changed
    }

    /// Creates a new observer.
    pub(crate) fn subscribe(&self) -> StatusObserver {
        StatusObserver {
            rx: self.tx.subscribe(),
            transitions: self.transitions.subscribe(),
        }
    }
}

// ============================================================================
// StatusObserver
// ============================================================================

/// Read side of the connection state.
///
/// Obtained from [`Client::watch_status`](crate::Client::watch_status).
/// [`changed`](Self::changed) yields every transition made after the
/// observer was created, in order.
///
/// # Example
///
/// ```ignore
/// let mut status = client.watch_status();
/// while let Ok(state) = status.changed().await {
///     println!("connection is now {state}");
/// }
/// ```
#[derive(Debug)]
pub struct StatusObserver {
    rx: watch::Receiver<ConnectionState>,
    transitions: broadcast::Receiver<ConnectionState>,
}

impl Clone for StatusObserver {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            transitions: self.transitions.resubscribe(),
        }
    }
}

impl StatusObserver {
    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }

    /// Waits for the next transition and returns the new state.
    ///
    /// If the observer fell more than a few dozen transitions behind, the
    /// oldest ones are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] once the client is dropped.
    pub async fn changed(&mut self) -> Result<ConnectionState> {
        loop {
            match self.transitions.recv().await {
                Ok(state) => return Ok(state),
                Err(RecvError::Lagged(skipped)) => {
                    trace!(skipped, "Status observer lagged");
                }
                Err(RecvError::Closed) => return Err(Error::ConnectionClosed),
            }
        }
    }

    /// Waits until the state equals `state`.
    ///
    /// Returns immediately if it already does. Transitions seen while
    /// waiting are consumed, so a following [`changed`](Self::changed)
    /// reports only later ones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] once the client is dropped.
    pub async fn wait_for(&mut self, state: ConnectionState) -> Result<()> {
        self.rx
            .wait_for(|current| *current == state)
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        self.skip_pending();
        Ok(())
    }

    /// Drops buffered transitions.
    fn skip_pending(&mut self) {
        loop {
            match self.transitions.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
