//! Session identity and conversation history.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Constants
// ============================================================================

/// Model requested when none is configured.
pub const DEFAULT_LLM: &str = "openai_gpt_3_5_turbo";

// ============================================================================
// SessionContext
// ============================================================================

/// Identifies the user and conversation a request belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// User identifier.
    pub user_id: String,
    /// Conversation identifier.
    pub conversation_id: String,
    /// Model selector.
    pub llm: String,
    /// Tools that already received structured input.
    pub structured_inputs: Vec<String>,
    /// Entities and preferences gathered by the UI.
    pub contextual_data: Map<String, Value>,
}

impl SessionContext {
    /// Creates a session context using [`DEFAULT_LLM`].
    #[must_use]
    pub fn new(user_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            llm: DEFAULT_LLM.to_string(),
            structured_inputs: Vec::new(),
            contextual_data: Map::new(),
        }
    }

    /// Sets the model selector.
    #[inline]
    #[must_use]
    pub fn with_llm(mut self, llm: impl Into<String>) -> Self {
        self.llm = llm.into();
        self
    }

    /// Replaces the contextual data.
    #[must_use]
    pub fn with_contextual_data(mut self, data: Map<String, Value>) -> Self {
        self.contextual_data = data;
        self
    }

    /// Marks a tool as having received structured input.
    #[must_use]
    pub fn with_structured_input(mut self, tool_type: impl Into<String>) -> Self {
        self.add_structured_input(tool_type);
        self
    }

    /// Sets one contextual data entry.
    pub fn insert_contextual_data(&mut self, key: impl Into<String>, value: Value) {
        self.contextual_data.insert(key.into(), value);
    }

    /// Marks a tool as having received structured input.
    ///
    /// Returns `false` if it was already marked.
    pub fn add_structured_input(&mut self, tool_type: impl Into<String>) -> bool {
        let tool_type = tool_type.into();
        if self.structured_inputs.contains(&tool_type) {
            return false;
        }
        self.structured_inputs.push(tool_type);
        true
    }
}

// ============================================================================
// ChatTurn
// ============================================================================

/// One completed exchange as sent in `chat_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// What the user said.
    pub human: String,
    /// What the assistant answered.
    pub ai: String,
}

impl ChatTurn {
    /// Creates a turn.
    #[inline]
    #[must_use]
    pub fn new(human: impl Into<String>, ai: impl Into<String>) -> Self {
        Self {
            human: human.into(),
            ai: ai.into(),
        }
    }
}

// ============================================================================
// ConversationMessage
// ============================================================================

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message typed by the user.
    User,
    /// Message produced by the assistant.
    Assistant,
}

/// A message as kept by the UI message list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Author.
    pub role: Role,
    /// Text.
    pub content: String,
}

impl ConversationMessage {
    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Pairs a message list into chat history turns.
///
/// A user message is paired with the assistant message that follows it.
/// A newer user message replaces an unanswered one; assistant messages with
/// no preceding user message are skipped.
#[must_use]
pub fn build_chat_history<'a, I>(messages: I) -> Vec<ChatTurn>
where
    I: IntoIterator<Item = &'a ConversationMessage>,
{
    let mut turns = Vec::new();
    let mut human: Option<&str> = None;

    for message in messages {
        match message.role {
            Role::User => human = Some(message.content.as_str()),
            Role::Assistant => {
                if let Some(question) = human.take() {
                    turns.push(ChatTurn::new(question, message.content.as_str()));
                }
            }
        }
    }

    turns
}

// ============================================================================
// Tests
// ============================================================================
