//! Wire codecs.
//!
//! A [`Codec`] turns prompts into text frames and text frames into
//! [`Inbound`] replies. Each client uses exactly one codec, so the two
//! envelope shapes are never mixed on one connection.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{Value, to_string};

use crate::error::Result;
use crate::identifiers::RequestId;

use super::request::{AskEnvelope, ChatEnvelope, Prompt};
use super::response::{Answer, Inbound};
use super::session::{ChatTurn, SessionContext};

// ============================================================================
// Codec
// ============================================================================

/// Encodes requests and decodes replies for one wire contract.
pub trait Codec: fmt::Debug + Send + Sync + 'static {
    /// Encodes a prompt into a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if serialization fails.
    fn encode(&self, id: RequestId, prompt: &Prompt) -> Result<String>;

    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`](crate::Error::Protocol) for malformed
    /// frames.
    fn decode(&self, text: &str) -> Result<Inbound> {
        Inbound::parse(text)
    }

    /// Called after a prompt received a successful answer.
    fn record_exchange(&self, _prompt: &Prompt, _answer: &Answer) {}

    /// Returns the conversation history sent with requests.
    ///
    /// Codecs without history return an empty list.
    fn history(&self) -> Vec<ChatTurn> {
        Vec::new()
    }

    /// Forgets the conversation history.
    fn clear_history(&self) {}
}

// ============================================================================
// ChatCodec
// ============================================================================

/// Codec for the simple `chat_message` envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatCodec;

impl Codec for ChatCodec {
    fn encode(&self, id: RequestId, prompt: &Prompt) -> Result<String> {
        Ok(to_string(&ChatEnvelope::new(id, prompt))?)
    }
}

// ============================================================================
// AskCodec
// ============================================================================

/// Codec for the rich ask envelope.
///
/// Keeps the conversation history: every answered chat or hybrid prompt is
/// appended as a [`ChatTurn`] and sent with later requests. An answered form
/// submission marks its tool in the session's structured inputs instead.
///
/// Build the client with [`ClientBuilder::shared_codec`](crate::ClientBuilder::shared_codec)
/// to keep a handle for updating the session.
#[derive(Debug)]
pub struct AskCodec {
    session: Mutex<SessionContext>,
    history: Mutex<VecDeque<ChatTurn>>,
    history_limit: Option<usize>,
}

impl AskCodec {
    /// Creates a codec for a session with empty history.
    #[must_use]
    pub fn new(session: SessionContext) -> Self {
        Self {
            session: Mutex::new(session),
            history: Mutex::new(VecDeque::new()),
            history_limit: None,
        }
    }

    /// Seeds the history, e.g. from [`build_chat_history`](super::build_chat_history).
    #[must_use]
    pub fn with_history(self, turns: impl IntoIterator<Item = ChatTurn>) -> Self {
        {
            let mut history = self.history.lock();
            history.extend(turns);
            Self::trim(&mut history, self.history_limit);
        }
        self
    }

    /// Keeps at most `limit` turns, dropping the oldest.
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        Self::trim(self.history.get_mut(), self.history_limit);
        self
    }

    /// Returns a snapshot of the session context.
    #[must_use]
    pub fn session(&self) -> SessionContext {
        self.session.lock().clone()
    }

    /// Sets one contextual data entry sent with later requests.
    pub fn set_contextual_data(&self, key: impl Into<String>, value: Value) {
        self.session.lock().insert_contextual_data(key, value);
    }

    /// Replaces the session context, e.g. when switching conversations.
    ///
    /// The history is kept; call [`Codec::clear_history`] to drop it.
    pub fn set_session(&self, session: SessionContext) {
        *self.session.lock() = session;
    }

    fn trim(history: &mut VecDeque<ChatTurn>, limit: Option<usize>) {
        if let Some(limit) = limit {
            while history.len() > limit {
                history.pop_front();
            }
        }
    }
}

impl Codec for AskCodec {
    fn encode(&self, id: RequestId, prompt: &Prompt) -> Result<String> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let history = self.history();
        let envelope = AskEnvelope::new(id, prompt, &self.session.lock(), history, timestamp);
        Ok(to_string(&envelope)?)
    }

    fn record_exchange(&self, prompt: &Prompt, answer: &Answer) {
        match prompt {
            Prompt::Chat { content } | Prompt::Hybrid { content, .. } => {
                let mut history = self.history.lock();
                history.push_back(ChatTurn::new(content.as_str(), answer.content.as_str()));
                Self::trim(&mut history, self.history_limit);
            }
            Prompt::Form { tool_type, .. } => {
                self.session.lock().add_structured_input(tool_type.as_str());
            }
        }
    }

    fn history(&self) -> Vec<ChatTurn> {
        self.history.lock().iter().cloned().collect()
    }

    fn clear_history(&self) {
        self.history.lock().clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
