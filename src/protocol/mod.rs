//! WebSocket protocol message types.
//!
//! This module defines the messages exchanged with the Rainbow Bridge
//! backend.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `ChatEnvelope` | Client → Server | Simple chat request |
//! | `AskEnvelope` | Client → Server | Request with history and session |
//! | `Inbound` | Server → Client | Reply (flag or status shape) |
//!
//! The protocol is not multiplexed: the server answers requests in order
//! and may not echo the request `id`.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Wire contract selection |
//! | `request` | Outbound envelopes |
//! | `response` | Inbound replies |
//! | `session` | Session context and chat history |

// ============================================================================
// Submodules
// ============================================================================

/// Wire codecs.
pub mod codec;

/// Outbound message types.
pub mod request;

/// Inbound reply types.
pub mod response;

/// Session context and chat history.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{AskCodec, ChatCodec, Codec};
pub use request::{AskEnvelope, ChatEnvelope, Prompt, Purpose};
pub use response::{Answer, Inbound, ReplyStatus};
pub use session::{ChatTurn, ConversationMessage, Role, SessionContext, build_chat_history};
