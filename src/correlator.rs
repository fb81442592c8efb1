//! Request/response correlation.
//!
//! The backend protocol is not multiplexed: replies arrive in request order
//! and may not echo the request `id`. The correlator therefore keeps a
//! single pending slot:
//!
//! - a request while another is outstanding fails with
//!   [`Error::RequestInFlight`] instead of risking misdelivery
//! - the next inbound message resolves the slot exactly once
//! - an inbound message whose `id` names another request, or that arrives
//!   with nothing pending, is broadcast as a notification
//! - connection loss, manual disconnect, timeout, or the caller dropping the
//!   request future all release the slot

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Answer, Codec, Inbound, Prompt};
use crate::transport::{ConnectionLoss, InboundSink, Transport};

// ============================================================================
// Types
// ============================================================================

/// The outstanding request.
struct Pending {
    id: RequestId,
    reply_tx: oneshot::Sender<Result<Answer>>,
}

/// Releases the slot when a request ends without a reply.
struct SlotGuard<'a> {
    correlator: &'a Correlator,
    id: RequestId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.correlator.release(self.id);
    }
}

// ============================================================================
// Correlator
// ============================================================================

/// Matches replies to the single outstanding request.
pub(crate) struct Correlator {
    codec: Arc<dyn Codec>,
    slot: Mutex<Option<Pending>>,
    notifications: broadcast::Sender<Inbound>,
    request_timeout: Option<Duration>,
}

impl Correlator {
    /// Creates an idle correlator.
    pub(crate) fn new(
        codec: Arc<dyn Codec>,
        request_timeout: Option<Duration>,
        notification_capacity: usize,
    ) -> Self {
        let (notifications, _) = broadcast::channel(notification_capacity);
        Self {
            codec,
            slot: Mutex::new(None),
            notifications,
            request_timeout,
        }
    }

    /// Subscribes to unsolicited messages.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Inbound> {
        self.notifications.subscribe()
    }

    /// Returns the wire codec.
    #[inline]
    pub(crate) fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Returns `true` while a request waits for its reply.
    pub(crate) fn is_busy(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Sends `prompt` and waits for its reply.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the transport is not connected
    /// - [`Error::RequestInFlight`] if another request is outstanding
    /// - [`Error::RequestTimeout`] if no reply arrives in time
    /// - [`Error::ConnectionClosed`] / [`Error::Cancelled`] if the
    ///   connection goes away first
    /// - [`Error::Server`] / [`Error::Protocol`] for failed replies
    pub(crate) async fn request(&self, transport: &Transport, prompt: &Prompt) -> Result<Answer> {
        if !transport.status().is_connected() {
            return Err(Error::NotConnected);
        }

        let id = RequestId::generate();
        let payload = self.codec.encode(id, prompt)?;

        let (reply_rx, _guard) = self.register(id)?;
        transport.send(payload)?;

        debug!(request_id = %id, "Request sent");

        let outcome = match self.request_timeout {
            Some(limit) => match timeout(limit, reply_rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(request_id = %id, timeout_ms = limit.as_millis() as u64, "Request timed out");
                    return Err(Error::request_timeout(id, limit.as_millis() as u64));
                }
            },
            None => reply_rx.await,
        };

        let answer = outcome.map_err(|_| Error::ConnectionClosed)??;
        self.codec.record_exchange(prompt, &answer);

        trace!(request_id = %id, "Request answered");
        Ok(answer)
    }

    /// Occupies the slot for `id`.
    fn register(&self, id: RequestId) -> Result<(oneshot::Receiver<Result<Answer>>, SlotGuard<'_>)> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(Error::RequestInFlight);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        *slot = Some(Pending { id, reply_tx });

        Ok((
            reply_rx,
            SlotGuard {
                correlator: self,
                id,
            },
        ))
    }

    /// Frees the slot if it still belongs to `id`.
    fn release(&self, id: RequestId) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|pending| pending.id == id) {
            *slot = None;
            trace!(request_id = %id, "Pending request released");
        }
    }

    /// Takes the pending request if `inbound` may answer it.
    fn take_matching(&self, inbound: &Inbound) -> Option<Pending> {
        let mut slot = self.slot.lock();
        match slot.take() {
            Some(pending) if inbound.correlates_with(pending.id) => Some(pending),
            other => {
                *slot = other;
                None
            }
        }
    }
}

// ============================================================================
// InboundSink
// ============================================================================

impl InboundSink for Correlator {
    fn on_message(&self, text: &str) {
        let inbound = match self.codec.decode(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                let pending = self.slot.lock().take();
                match pending {
                    Some(pending) => {
                        debug!(request_id = %pending.id, error = %e, "Unparseable reply");
                        let _ = pending.reply_tx.send(Err(e));
                    }
                    None => warn!(error = %e, "Discarding unparseable message"),
                }
                return;
            }
        };

        match self.take_matching(&inbound) {
            Some(pending) => {
                trace!(request_id = %pending.id, "Reply received");
                let _ = pending.reply_tx.send(inbound.into_answer());
            }
            None => {
                debug!(id = ?inbound.id, "Unsolicited message");
                let _ = self.notifications.send(inbound);
            }
        }
    }

    fn on_connection_lost(&self, loss: ConnectionLoss) {
        let Some(pending) = self.slot.lock().take() else {
            return;
        };

        debug!(request_id = %pending.id, ?loss, "Failing pending request");

        let error = match loss {
            ConnectionLoss::Closed => Error::ConnectionClosed,
            ConnectionLoss::Cancelled => Error::Cancelled,
        };
        let _ = pending.reply_tx.send(Err(error));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::ChatCodec;

    fn correlator() -> Correlator {
        Correlator::new(Arc::new(ChatCodec), None, 8)
    }

    #[test]
    fn test_register_is_single_slot() {
        let correlator = correlator();
        let first = RequestId::generate();

        let (_rx, guard) = correlator.register(first).expect("first");
        assert!(correlator.is_busy());
        assert!(matches!(
            correlator.register(RequestId::generate()),
            Err(Error::RequestInFlight)
        ));

        drop(guard);
        assert!(!correlator.is_busy());
    }

    #[test]
    fn test_reply_resolves_once() {
        let correlator = correlator();
        let (mut rx, _guard) = correlator.register(RequestId::generate()).expect("register");
        let mut notifications = correlator.subscribe();

        correlator.on_message(r#"{"success": true, "content": "hi"}"#);
        correlator.on_message(r#"{"success": true, "content": "again"}"#);

        let answer = rx.try_recv().expect("resolved").expect("answer");
        assert_eq!(answer.content, "hi");
        assert!(!correlator.is_busy());

        let extra = notifications.try_recv().expect("notification");
        assert_eq!(extra.content.as_deref(), Some("again"));
    }

    #[test]
    fn test_mismatched_id_is_not_a_reply() {
        let correlator = correlator();
        let (mut rx, _guard) = correlator.register(RequestId::generate()).expect("register");
        let mut notifications = correlator.subscribe();

        let other = RequestId::generate();
        correlator.on_message(&format!(r#"{{"id": "{other}", "success": true, "content": "x"}}"#));

        assert!(rx.try_recv().is_err());
        assert!(correlator.is_busy());
        assert!(notifications.try_recv().is_ok());
    }

    #[test]
    fn test_numeric_id_goes_to_notifications() {
        let correlator = correlator();
        let (mut rx, _guard) = correlator.register(RequestId::generate()).expect("register");
        let mut notifications = correlator.subscribe();

        correlator.on_message(r#"{"id": 42, "status": "processing", "message": "working"}"#);

        assert!(rx.try_recv().is_err());
        assert!(correlator.is_busy());
        let pushed = notifications.try_recv().expect("notification");
        assert_eq!(pushed.message.as_deref(), Some("working"));
    }

    #[test]
    fn test_numeric_id_without_pending_request_is_broadcast() {
        let correlator = correlator();
        let mut notifications = correlator.subscribe();

        correlator.on_message(r#"{"id": 1, "status": "processing"}"#);

        assert!(notifications.try_recv().is_ok());
    }

    #[test]
    fn test_unparseable_reply_fails_request() {
        let correlator = correlator();
        let (mut rx, _guard) = correlator.register(RequestId::generate()).expect("register");

        correlator.on_message("<html>");

        let result = rx.try_recv().expect("resolved");
        assert!(matches!(result, Err(Error::Protocol { .. })));
        assert!(!correlator.is_busy());
    }

    #[test]
    fn test_connection_loss_fails_request() {
        let correlator = correlator();
        let (mut rx, _guard) = correlator.register(RequestId::generate()).expect("register");

        correlator.on_connection_lost(ConnectionLoss::Closed);

        assert!(matches!(rx.try_recv(), Ok(Err(Error::ConnectionClosed))));
    }

    #[test]
    fn test_cancel_fails_request() {
        let correlator = correlator();
        let (mut rx, _guard) = correlator.register(RequestId::generate()).expect("register");

        correlator.on_connection_lost(ConnectionLoss::Cancelled);

        assert!(matches!(rx.try_recv(), Ok(Err(Error::Cancelled))));
    }

    #[test]
    fn test_stale_guard_keeps_newer_request() {
        let correlator = correlator();
        let first = RequestId::generate();
        let (_rx, guard) = correlator.register(first).expect("first");

        correlator.on_connection_lost(ConnectionLoss::Closed);
        let (_rx2, _guard2) = correlator.register(RequestId::generate()).expect("second");

        drop(guard);
        assert!(correlator.is_busy());
    }
}
