//! WebSocket transport layer.
//!
//! This module owns the single physical connection to the Rainbow Bridge
//! backend and keeps it alive.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐   commands    ┌─────────────┐   WebSocket   ┌──────────┐
//! │ Transport          │──────────────►│ SocketTask  │◄─────────────►│ Backend  │
//! │  status / reconnect│◄──────────────│ (tokio task)│               │          │
//! └────────┬───────────┘    events     └─────────────┘               └──────────┘
//!          │ inbound text, connection loss
//!          ▼
//!    InboundSink (correlator)
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `connect` - state `connecting`, spawn a socket task
//! 2. open - state `connected`, reconnect budget restored
//! 3. error - state `error`, always followed by a close
//! 4. close - state `disconnected`; unclean closes schedule a reconnect
//! 5. `disconnect` - close with code 1000, cancel any scheduled reconnect
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `reconnect` | Retry decision after unclean close |
//! | `socket` | Socket task and its event interface |
//! | `status` | Connection state publication |

// ============================================================================
// Submodules
// ============================================================================

/// Reconnect policy.
pub mod reconnect;

/// Socket task.
pub(crate) mod socket;

/// Connection state and observers.
pub mod status;

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};

use self::reconnect::{NORMAL_CLOSURE, is_clean_close};
use self::socket::{SocketCommand, SocketEvents, SocketTask};
use self::status::StatusPublisher;

// ============================================================================
// Re-exports
// ============================================================================

pub use reconnect::ReconnectState;
pub use status::{ConnectionState, StatusObserver};

// ============================================================================
// Constants
// ============================================================================

/// Close reason sent on manual disconnect.
const MANUAL_DISCONNECT_REASON: &str = "Manual disconnect";

// ============================================================================
// InboundSink
// ============================================================================

/// Why a pending request can no longer be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionLoss {
    /// The socket closed.
    Closed,
    /// The caller disconnected on purpose.
    Cancelled,
}

/// Consumer of inbound traffic.
pub(crate) trait InboundSink: Send + Sync + 'static {
    /// A text frame arrived on the current socket.
    fn on_message(&self, text: &str);

    /// The current socket is gone.
    fn on_connection_lost(&self, loss: ConnectionLoss);
}

// ============================================================================
// Link
// ============================================================================

/// Handle of the live socket task.
#[derive(Debug)]
struct SocketHandle {
    generation: u64,
    commands: mpsc::UnboundedSender<SocketCommand>,
}

/// Mutable connection bookkeeping.
#[derive(Debug)]
struct Link {
    /// Last generation handed to a socket task.
    generation: u64,
    /// Current socket, if open or opening.
    socket: Option<SocketHandle>,
    reconnect: ReconnectState,
    /// Scheduled reconnect, tagged with the generation that scheduled it.
    reconnect_timer: Option<(u64, JoinHandle<()>)>,
    /// Set when an unclean close found the budget spent.
    exhausted: bool,
}

impl Link {
    #[inline]
    fn is_current(&self, generation: u64) -> bool {
        self.socket
            .as_ref()
            .is_some_and(|socket| socket.generation == generation)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Reconnecting WebSocket transport.
///
/// Owns at most one socket at a time. Cloning yields another handle to the
/// same transport.
#[derive(Clone)]
pub(crate) struct Transport {
    inner: Arc<TransportInner>,
}

/// Shared state behind a [`Transport`].
struct TransportInner {
    /// Self reference handed to socket and timer tasks.
    this: Weak<TransportInner>,
    config: ClientConfig,
    status: StatusPublisher,
    link: Mutex<Link>,
    sink: Arc<dyn InboundSink>,
}

impl Transport {
    /// Creates a disconnected transport.
    pub(crate) fn new(config: ClientConfig, sink: Arc<dyn InboundSink>) -> Self {
        let reconnect =
            ReconnectState::new(config.max_reconnect_attempts, config.reconnect_delay);

        let inner = Arc::new_cyclic(|this| TransportInner {
            this: this.clone(),
            config,
            status: StatusPublisher::new(),
            link: Mutex::new(Link {
                generation: 0,
                socket: None,
                reconnect,
                reconnect_timer: None,
                exhausted: false,
            }),
            sink,
        });

        Self { inner }
    }

    /// Opens the connection unless a socket is already open or opening.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn connect(&self) {
        self.inner.connect();
    }

    /// Closes the connection on purpose.
    ///
    /// Cancels any scheduled reconnect and restores the reconnect budget.
    pub(crate) fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Queues a text frame on the open socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] unless the state is `connected`.
    pub(crate) fn send(&self, payload: String) -> Result<()> {
        self.inner.send(payload)
    }

    /// Returns the current state.
    #[inline]
    pub(crate) fn status(&self) -> ConnectionState {
        self.inner.status.get()
    }

    /// Creates a state observer.
    #[inline]
    pub(crate) fn watch_status(&self) -> StatusObserver {
        self.inner.status.subscribe()
    }

    /// Returns the configuration.
    #[inline]
    pub(crate) fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Reconnects scheduled since the last successful open.
    pub(crate) fn attempt_count(&self) -> u32 {
        self.inner.link.lock().reconnect.attempt_count()
    }

    /// Returns `true` once automatic reconnects gave up.
    ///
    /// Only an unclean close with no budget left sets this; the next
    /// `connect`, open or `disconnect` clears it.
    pub(crate) fn reconnect_exhausted(&self) -> bool {
        self.inner.link.lock().exhausted
    }
}

// ============================================================================
// TransportInner - Operations
// ============================================================================

impl TransportInner {
    fn connect(&self) {
        if let Some(task) = self.begin_connect() {
            tokio::spawn(task.run());
        }
    }

    /// Registers a new socket and returns the task that drives it.
    fn begin_connect(&self) -> Option<SocketTask> {
        let mut link = self.link.lock();

        if let Some(socket) = &link.socket {
            trace!(generation = socket.generation, "Socket already open, connect ignored");
            return None;
        }

        if let Some((_, timer)) = link.reconnect_timer.take() {
            timer.abort();
        }

        link.exhausted = false;
        link.generation += 1;
        let generation = link.generation;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        link.socket = Some(SocketHandle {
            generation,
            commands: commands_tx,
        });
        self.status.set(ConnectionState::Connecting);
        drop(link);

        info!(url = %self.config.url, generation, "Connecting to Rainbow Bridge");

        let events: Weak<dyn SocketEvents> = self.this.clone();
        Some(SocketTask {
            url: self.config.url.to_string(),
            generation,
            connect_timeout: self.config.connect_timeout,
            commands: commands_rx,
            events,
        })
    }

    fn disconnect(&self) {
        let (socket, timer) = {
            let mut link = self.link.lock();
            link.reconnect.reset();
            link.exhausted = false;
            let socket = link.socket.take();
            let timer = link.reconnect_timer.take();
            self.status.set(ConnectionState::Disconnected);
            (socket, timer)
        };

        if let Some((_, timer)) = timer {
            timer.abort();
            debug!("Scheduled reconnect cancelled");
        }

        if let Some(socket) = socket {
            let _ = socket.commands.send(SocketCommand::Close {
                code: NORMAL_CLOSURE,
                reason: MANUAL_DISCONNECT_REASON,
            });
            info!(generation = socket.generation, "Disconnected from Rainbow Bridge");
        }

        self.sink.on_connection_lost(ConnectionLoss::Cancelled);
    }

    fn send(&self, payload: String) -> Result<()> {
        let link = self.link.lock();

        if !self.status.get().is_connected() {
            return Err(Error::NotConnected);
        }

        let socket = link.socket.as_ref().ok_or(Error::NotConnected)?;
        socket
            .commands
            .send(SocketCommand::Send(payload))
            .map_err(|_| Error::NotConnected)
    }

    /// Spawns the timer that reconnects after `delay`.
    fn schedule_reconnect(&self, generation: u64, delay: std::time::Duration) -> JoinHandle<()> {
        let this = self.this.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            if let Some(inner) = this.upgrade() {
                inner.reconnect_fired(generation);
            }
        })
    }

    fn reconnect_fired(&self, generation: u64) {
        {
            let mut link = self.link.lock();
            match link.reconnect_timer.take() {
                Some((scheduled_by, _)) if scheduled_by == generation => {}
                other => {
                    link.reconnect_timer = other;
                    return;
                }
            }
        }

        debug!(generation, "Reconnect timer fired");
        self.connect();
    }
}

// ============================================================================
// TransportInner - Socket Events
// ============================================================================

impl SocketEvents for TransportInner {
    fn on_open(&self, generation: u64) {
        let mut link = self.link.lock();
        if !link.is_current(generation) {
            trace!(generation, "Ignoring open of stale socket");
            return;
        }

        link.reconnect.record_open();
        link.exhausted = false;
        self.status.set(ConnectionState::Connected);
        info!(generation, "Connected to Rainbow Bridge");
    }

    fn on_message(&self, generation: u64, text: &str) {
        if !self.link.lock().is_current(generation) {
            trace!(generation, "Ignoring message of stale socket");
            return;
        }

        self.sink.on_message(text);
    }

    fn on_error(&self, generation: u64, error: Error) {
        let link = self.link.lock();
        if !link.is_current(generation) {
            trace!(generation, "Ignoring error of stale socket");
            return;
        }

        self.status.set(ConnectionState::Error);
        error!(generation, %error, "Rainbow Bridge connection error");
    }

    fn on_close(&self, generation: u64, code: u16) {
        {
            let mut link = self.link.lock();
            if !link.is_current(generation) {
                trace!(generation, code, "Ignoring close of stale socket");
                return;
            }

            link.socket = None;

            match link.reconnect.on_close(code) {
                Some(delay) => {
                    info!(
                        code,
                        attempt = link.reconnect.attempt_count(),
                        max = link.reconnect.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "Connection lost, scheduling reconnect"
                    );
                    let timer = self.schedule_reconnect(generation, delay);
                    link.reconnect_timer = Some((generation, timer));
                }
                None if is_clean_close(code) => {
                    info!(code, "Disconnected from Rainbow Bridge");
                }
                None => {
                    link.exhausted = true;
                    warn!(
                        code,
                        attempts = link.reconnect.attempt_count(),
                        "Reconnect attempts exhausted, staying disconnected"
                    );
                }
            }

            self.status.set(ConnectionState::Disconnected);
        }

        self.sink.on_connection_lost(ConnectionLoss::Closed);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::config::ClientBuilder;

    use super::reconnect::ABNORMAL_CLOSURE;

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<String>>,
        losses: Mutex<Vec<ConnectionLoss>>,
    }

    impl InboundSink for RecordingSink {
        fn on_message(&self, text: &str) {
            self.messages.lock().push(text.to_string());
        }

        fn on_connection_lost(&self, loss: ConnectionLoss) {
            self.losses.lock().push(loss);
        }
    }

    fn transport() -> (Transport, Arc<RecordingSink>) {
        let config = ClientBuilder::new()
            .url("ws://127.0.0.1:9/ws")
            .config()
            .expect("valid config");
        let sink = Arc::new(RecordingSink::default());
        (Transport::new(config, sink.clone()), sink)
    }

    /// Registers a socket without spawning it and opens it.
    fn open(transport: &Transport) -> SocketTask {
        let task = transport.inner.begin_connect().expect("not yet connected");
        transport.inner.on_open(task.generation);
        task
    }

    fn set_attempts(transport: &Transport, attempts: u32) {
        let mut link = transport.inner.link.lock();
        link.reconnect.reset();
        for _ in 0..attempts {
            link.reconnect.on_close(ABNORMAL_CLOSURE);
        }
    }

    fn has_timer(transport: &Transport) -> bool {
        transport.inner.link.lock().reconnect_timer.is_some()
    }

    #[tokio::test]
    async fn test_connect_then_open() {
        let (transport, _sink) = transport();
        let mut status = transport.watch_status();
        assert_eq!(transport.status(), ConnectionState::Disconnected);

        let task = transport.inner.begin_connect().expect("connect");
        assert_eq!(status.changed().await.expect("changed"), ConnectionState::Connecting);

        transport.inner.on_open(task.generation);
        assert_eq!(status.changed().await.expect("changed"), ConnectionState::Connected);
        assert_eq!(transport.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_error_then_close() {
        let (transport, sink) = transport();
        let task = transport.inner.begin_connect().expect("connect");

        transport
            .inner
            .on_error(task.generation, Error::connection("refused"));
        assert_eq!(transport.status(), ConnectionState::Error);

        transport.inner.on_close(task.generation, ABNORMAL_CLOSURE);
        assert_eq!(transport.status(), ConnectionState::Disconnected);
        assert_eq!(transport.attempt_count(), 1);
        assert!(has_timer(&transport));
        assert_eq!(*sink.losses.lock(), vec![ConnectionLoss::Closed]);
    }

    #[tokio::test]
    async fn test_connect_is_noop_while_opening_or_open() {
        let (transport, _sink) = transport();
        let task = transport.inner.begin_connect().expect("connect");
        assert!(transport.inner.begin_connect().is_none());

        transport.inner.on_open(task.generation);
        assert!(transport.inner.begin_connect().is_none());
        assert_eq!(transport.status(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_abnormal_close_at_four_schedules_last_attempt() {
        let (transport, _sink) = transport();
        let task = open(&transport);
        set_attempts(&transport, 4);

        transport.inner.on_close(task.generation, ABNORMAL_CLOSURE);

        assert_eq!(transport.status(), ConnectionState::Disconnected);
        assert_eq!(transport.attempt_count(), 5);
        assert!(has_timer(&transport));
        assert!(!transport.reconnect_exhausted());
    }

    #[tokio::test]
    async fn test_abnormal_close_at_max_gives_up() {
        let (transport, _sink) = transport();
        let task = open(&transport);
        set_attempts(&transport, 5);

        transport.inner.on_close(task.generation, ABNORMAL_CLOSURE);

        assert_eq!(transport.status(), ConnectionState::Disconnected);
        assert_eq!(transport.attempt_count(), 5);
        assert!(!has_timer(&transport));
        assert!(transport.reconnect_exhausted());
    }

    #[tokio::test]
    async fn test_error_then_close_is_observed() {
        let (transport, _sink) = transport();
        let mut status = transport.watch_status();
        let task = transport.inner.begin_connect().expect("connect");

        transport
            .inner
            .on_error(task.generation, Error::connection("refused"));
        transport.inner.on_close(task.generation, ABNORMAL_CLOSURE);

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(status.changed().await.expect("changed"));
        }
        assert_eq!(
            seen,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Error,
                ConnectionState::Disconnected
            ]
        );
    }

    #[tokio::test]
    async fn test_not_exhausted_before_any_retry() {
        let config = ClientBuilder::new()
            .url("ws://127.0.0.1:9/ws")
            .max_reconnect_attempts(0)
            .config()
            .expect("valid config");
        let transport = Transport::new(config, Arc::new(RecordingSink::default()));
        assert!(!transport.reconnect_exhausted());

        // A clean close with no budget is not a give-up.
        let task = open(&transport);
        transport.inner.on_close(task.generation, NORMAL_CLOSURE);
        assert!(!transport.reconnect_exhausted());

        let task = open(&transport);
        transport.inner.on_close(task.generation, ABNORMAL_CLOSURE);
        assert!(transport.reconnect_exhausted());

        // A manual connect clears the flag.
        let task = transport.inner.begin_connect().expect("connect");
        assert!(!transport.reconnect_exhausted());
        transport.inner.on_close(task.generation, ABNORMAL_CLOSURE);
        assert!(transport.reconnect_exhausted());

        transport.disconnect();
        assert!(!transport.reconnect_exhausted());
    }

    #[tokio::test]
    async fn test_clean_close_never_reconnects() {
        let (transport, _sink) = transport();
        let task = open(&transport);
        set_attempts(&transport, 2);

        transport.inner.on_close(task.generation, NORMAL_CLOSURE);

        assert_eq!(transport.status(), ConnectionState::Disconnected);
        assert_eq!(transport.attempt_count(), 2);
        assert!(!has_timer(&transport));
    }

    #[tokio::test]
    async fn test_open_restores_budget() {
        let (transport, _sink) = transport();
        let first = open(&transport);
        transport.inner.on_close(first.generation, ABNORMAL_CLOSURE);
        assert_eq!(transport.attempt_count(), 1);

        let second = open(&transport);
        assert!(second.generation > first.generation);
        assert_eq!(transport.attempt_count(), 0);
        assert!(!has_timer(&transport));
    }

    #[tokio::test]
    async fn test_disconnect_cancels_reconnect() {
        let (transport, sink) = transport();
        let task = open(&transport);
        transport.inner.on_close(task.generation, ABNORMAL_CLOSURE);
        assert!(has_timer(&transport));

        transport.disconnect();

        assert!(!has_timer(&transport));
        assert_eq!(transport.attempt_count(), 0);
        assert_eq!(transport.status(), ConnectionState::Disconnected);
        assert_eq!(
            *sink.losses.lock(),
            vec![ConnectionLoss::Closed, ConnectionLoss::Cancelled]
        );
    }

    #[tokio::test]
    async fn test_disconnect_sends_normal_closure() {
        let (transport, _sink) = transport();
        let mut task = open(&transport);

        transport.disconnect();

        match task.commands.recv().await {
            Some(SocketCommand::Close { code, reason }) => {
                assert_eq!(code, NORMAL_CLOSURE);
                assert_eq!(reason, MANUAL_DISCONNECT_REASON);
            }
            other => panic!("expected close command, got {other:?}"),
        }

        // The socket's own close report is stale and must not reconnect.
        transport.inner.on_close(task.generation, ABNORMAL_CLOSURE);
        assert!(!has_timer(&transport));
        assert_eq!(transport.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_events_are_ignored() {
        let (transport, sink) = transport();
        let task = transport.inner.begin_connect().expect("connect");
        transport.disconnect();

        transport.inner.on_open(task.generation);
        transport.inner.on_message(task.generation, "late");

        assert_eq!(transport.status(), ConnectionState::Disconnected);
        assert!(sink.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn test_send_requires_connected() {
        let (transport, _sink) = transport();
        let mut task = transport.inner.begin_connect().expect("connect");

        let err = transport.send("early".to_string()).unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert!(task.commands.try_recv().is_err());

        transport.inner.on_open(task.generation);
        transport.send("hello".to_string()).expect("send");
        assert!(matches!(
            task.commands.try_recv(),
            Ok(SocketCommand::Send(text)) if text == "hello"
        ));
    }

    #[tokio::test]
    async fn test_messages_reach_sink() {
        let (transport, sink) = transport();
        let task = open(&transport);

        transport.inner.on_message(task.generation, r#"{"success":true}"#);

        assert_eq!(*sink.messages.lock(), vec![r#"{"success":true}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_reconnect_timer_fires_connect() {
        let config = ClientBuilder::new()
            .url("ws://127.0.0.1:9/ws")
            .reconnect_delay(Duration::from_millis(10))
            .config()
            .expect("valid config");
        let transport = Transport::new(config, Arc::new(RecordingSink::default()));
        let task = open(&transport);
        let mut status = transport.watch_status();

        transport.inner.on_close(task.generation, ABNORMAL_CLOSURE);
        assert_eq!(status.changed().await.expect("changed"), ConnectionState::Disconnected);

        // The timer reconnects on its own with a fresh socket.
        status.changed().await.expect("changed");
        assert!(transport.inner.link.lock().generation > task.generation);
        transport.disconnect();
    }
}
