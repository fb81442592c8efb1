//! Outbound message types.
//!
//! Two envelope shapes exist on the wire. A client speaks exactly one of
//! them, selected through its [`Codec`](super::Codec).

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::identifiers::RequestId;

use super::session::{ChatTurn, SessionContext};

// ============================================================================
// Constants
// ============================================================================

/// Message type tag of the simple chat envelope.
pub const CHAT_MESSAGE_TYPE: &str = "chat_message";

/// Caller name reported in ask metadata.
pub const CALLER: &str = "frontend_app";

// ============================================================================
// Prompt
// ============================================================================

/// A logical request issued by UI code.
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    /// Free-form chat text.
    Chat {
        /// The user's message.
        content: String,
    },
    /// Structured form submission for a named tool.
    Form {
        /// Tool the form belongs to (e.g. `QuickQuote`).
        tool_type: String,
        /// Form fields.
        data: Value,
    },
    /// Chat text that may carry structured data alongside.
    Hybrid {
        /// The user's message.
        content: String,
        /// Structured data sent with the message, if any.
        data: Option<Value>,
    },
}

impl Prompt {
    /// Creates a chat prompt.
    #[inline]
    #[must_use]
    pub fn chat(content: impl Into<String>) -> Self {
        Self::Chat {
            content: content.into(),
        }
    }

    /// Creates a form prompt.
    #[inline]
    #[must_use]
    pub fn form(tool_type: impl Into<String>, data: Value) -> Self {
        Self::Form {
            tool_type: tool_type.into(),
            data,
        }
    }

    /// Creates a hybrid prompt.
    #[inline]
    #[must_use]
    pub fn hybrid(content: impl Into<String>, data: Option<Value>) -> Self {
        Self::Hybrid {
            content: content.into(),
            data,
        }
    }

    /// Returns the question text sent for this prompt.
    ///
    /// Forms are phrased as `Process <tool> with provided data`.
    #[must_use]
    pub fn question(&self) -> Cow<'_, str> {
        match self {
            Self::Chat { content } | Self::Hybrid { content, .. } => Cow::Borrowed(content),
            Self::Form { tool_type, .. } => {
                Cow::Owned(format!("Process {tool_type} with provided data"))
            }
        }
    }

    /// Returns the tool type for form prompts.
    #[inline]
    #[must_use]
    pub fn tool_type(&self) -> Option<&str> {
        match self {
            Self::Form { tool_type, .. } => Some(tool_type),
            Self::Chat { .. } | Self::Hybrid { .. } => None,
        }
    }

    /// Returns the form data for form prompts.
    #[inline]
    #[must_use]
    pub fn form_data(&self) -> Option<&Value> {
        match self {
            Self::Form { data, .. } => Some(data),
            Self::Chat { .. } | Self::Hybrid { .. } => None,
        }
    }

    /// Returns the structured data of form and hybrid prompts.
    #[inline]
    #[must_use]
    pub fn structured_data(&self) -> Option<&Value> {
        match self {
            Self::Form { data, .. } => Some(data),
            Self::Hybrid { data, .. } => data.as_ref(),
            Self::Chat { .. } => None,
        }
    }
}

// ============================================================================
// ChatEnvelope
// ============================================================================

/// Simple chat envelope.
///
/// # Format
///
/// ```json
/// {
///   "id": "uuid",
///   "type": "chat_message",
///   "payload": { "content": "hello" }
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatEnvelope {
    /// Correlation tag.
    pub id: RequestId,

    /// Always `chat_message`.
    #[serde(rename = "type")]
    pub message_type: &'static str,

    /// Message body.
    pub payload: ChatPayload,
}

/// Body of a [`ChatEnvelope`].
#[derive(Debug, Clone, Serialize)]
pub struct ChatPayload {
    /// Text sent to the assistant.
    pub content: String,

    /// Tool name for form submissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<String>,

    /// Form fields or hybrid data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<Value>,
}

impl ChatEnvelope {
    /// Builds the envelope for a prompt.
    #[must_use]
    pub fn new(id: RequestId, prompt: &Prompt) -> Self {
        Self {
            id,
            message_type: CHAT_MESSAGE_TYPE,
            payload: ChatPayload {
                content: prompt.question().into_owned(),
                tool_type: prompt.tool_type().map(str::to_owned),
                structured_data: prompt.structured_data().cloned(),
            },
        }
    }
}

// ============================================================================
// AskEnvelope
// ============================================================================

/// Rich ask envelope carrying history, metadata and session context.
///
/// # Format
///
/// ```json
/// {
///   "id": "uuid",
///   "question": "hello",
///   "chat_history": [{ "human": "...", "ai": "..." }],
///   "metadata": { "caller": "frontend_app", "purpose": "chat_request", "timestamp": "..." },
///   "session": { "user_id": "u1", "context": { "conversation_id": "c1", "llm": "..." } },
///   "stream": false
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct AskEnvelope {
    /// Correlation tag.
    pub id: RequestId,
    /// Question text.
    pub question: String,
    /// Completed exchanges of this conversation.
    pub chat_history: Vec<ChatTurn>,
    /// Request metadata.
    pub metadata: AskMetadata,
    /// Session identification.
    pub session: AskSession,
    /// Streaming is never requested.
    pub stream: bool,
}

/// Why a request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    /// Conversational message.
    ChatRequest,
    /// Form-based calculation.
    StructuredCalculation,
    /// Message that may carry structured data.
    HybridRequest,
}

/// The `metadata` object of an [`AskEnvelope`].
#[derive(Debug, Clone, Serialize)]
pub struct AskMetadata {
    /// Always [`CALLER`].
    pub caller: &'static str,
    /// Request purpose.
    pub purpose: Purpose,
    /// RFC 3339 timestamp (UTC, milliseconds).
    pub timestamp: String,
    /// Tool name for form submissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<String>,
    /// Form fields for form submissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<Value>,
    /// Hybrid requests: whether structured data is attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_structured_data: Option<bool>,
}

/// The `session` object of an [`AskEnvelope`].
#[derive(Debug, Clone, Serialize)]
pub struct AskSession {
    /// User identifier.
    pub user_id: String,
    /// Conversation context.
    pub context: AskContext,
}

/// The `session.context` object of an [`AskEnvelope`].
#[derive(Debug, Clone, Serialize)]
pub struct AskContext {
    /// Conversation identifier.
    pub conversation_id: String,
    /// Model selector.
    pub llm: String,
    /// Tool name for form submissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<String>,
    /// Form fields for form submissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_data: Option<Value>,
    /// Chat requests: tools that already received structured input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_inputs: Option<Vec<String>>,
    /// Hybrid requests: the attached data, `null` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<Value>,
    /// Entities and preferences gathered by the UI.
    pub contextual_data: Map<String, Value>,
}

impl AskEnvelope {
    /// Builds the envelope for a prompt within a session.
    #[must_use]
    pub fn new(
        id: RequestId,
        prompt: &Prompt,
        session: &SessionContext,
        chat_history: Vec<ChatTurn>,
        timestamp: String,
    ) -> Self {
        let purpose = match prompt {
            Prompt::Chat { .. } => Purpose::ChatRequest,
            Prompt::Form { .. } => Purpose::StructuredCalculation,
            Prompt::Hybrid { .. } => Purpose::HybridRequest,
        };
        let tool_type = prompt.tool_type().map(str::to_owned);
        let form_data = prompt.form_data().cloned();

        let (has_structured_data, structured_data) = match prompt {
            Prompt::Hybrid { data, .. } => (
                Some(data.is_some()),
                Some(data.clone().unwrap_or(Value::Null)),
            ),
            Prompt::Chat { .. } | Prompt::Form { .. } => (None, None),
        };
        let structured_inputs = matches!(prompt, Prompt::Chat { .. })
            .then(|| session.structured_inputs.clone());

        Self {
            id,
            question: prompt.question().into_owned(),
            chat_history,
            metadata: AskMetadata {
                caller: CALLER,
                purpose,
                timestamp,
                tool_type: tool_type.clone(),
                structured_data: form_data.clone(),
                has_structured_data,
            },
            session: AskSession {
                user_id: session.user_id.clone(),
                context: AskContext {
                    conversation_id: session.conversation_id.clone(),
                    llm: session.llm.clone(),
                    tool_type,
                    form_data,
                    structured_inputs,
                    structured_data,
                    contextual_data: session.contextual_data.clone(),
                },
            },
            stream: false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
