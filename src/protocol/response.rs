//! Inbound reply types.
//!
//! The backend answers in one of two shapes:
//!
//! Flag shape:
//! ```json
//! { "success": true, "content": "hi" }
//! { "success": false, "error": "boom" }
//! ```
//!
//! Status shape:
//! ```json
//! { "status": "success", "output": { "answer": "hi", "run_id": "r1", "agent": "a" } }
//! { "status": "error", "message": "boom" }
//! ```
//!
//! Either shape may carry an `id` echoing the request's correlation tag.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::{Value, from_str};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// Fallback text when a failure carries no message.
const UNKNOWN_ERROR: &str = "Unknown error";

/// Fallback text when a status-shaped run failed without a message.
const RUN_FAILED: &str = "API request failed";

// ============================================================================
// ReplyStatus
// ============================================================================

/// Status discriminator of the status shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    /// Successful reply.
    Success,
    /// Error reply.
    Error,
    /// Any other status, such as a progress update.
    #[serde(other)]
    Unknown,
}

// ============================================================================
// Inbound
// ============================================================================

/// A parsed inbound message of either shape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inbound {
    /// Echoed correlation tag, if the server sends one.
    ///
    /// Kept as raw JSON so a server-side numeric id does not reject the frame.
    #[serde(default)]
    pub id: Option<Value>,

    /// Flag shape: success marker.
    #[serde(default)]
    pub success: Option<bool>,

    /// Flag shape: answer text.
    #[serde(default)]
    pub content: Option<String>,

    /// Flag shape: failure reason.
    #[serde(default)]
    pub error: Option<String>,

    /// Status shape: discriminator.
    #[serde(default)]
    pub status: Option<ReplyStatus>,

    /// Status shape: run output.
    #[serde(default)]
    pub output: Option<Output>,

    /// Status shape: failure reason.
    #[serde(default)]
    pub message: Option<String>,

    /// Agents the backend activated for this reply.
    #[serde(default, rename = "activatedAgents")]
    pub activated_agents: Option<Vec<String>>,

    /// Reply metadata.
    #[serde(default)]
    pub metadata: Option<ReplyMetadata>,
}

/// The `output` object of the status shape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Output {
    /// Answer text.
    #[serde(default)]
    pub answer: Option<String>,

    /// Backend run identifier.
    #[serde(default)]
    pub run_id: Option<String>,

    /// Agent that produced the answer.
    #[serde(default)]
    pub agent: Option<String>,

    /// Run status; `failed` marks a failed run.
    #[serde(default)]
    pub status: Option<String>,

    /// Failure reason of a failed run.
    #[serde(default)]
    pub error: Option<String>,

    /// Agents the backend activated for this run.
    #[serde(default, rename = "activatedAgents")]
    pub activated_agents: Option<Vec<String>>,

    /// Run metadata.
    #[serde(default)]
    pub metadata: Option<ReplyMetadata>,
}

/// Metadata attached to a reply or its output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplyMetadata {
    /// Agents the backend activated.
    #[serde(default, rename = "activatedAgents")]
    pub activated_agents: Option<Vec<String>>,
}

impl Inbound {
    /// Parses an inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the text is not a JSON object of the
    /// expected shape.
    pub fn parse(text: &str) -> Result<Self> {
        from_str(text).map_err(|e| Error::protocol(format!("Failed to parse response: {e}")))
    }

    /// Returns `true` if this message may be the reply to `request_id`.
    ///
    /// Messages without an `id` (or with `"id": null`) match any request.
    /// A non-string `id` never names one of ours.
    #[must_use]
    pub fn correlates_with(&self, request_id: RequestId) -> bool {
        match &self.id {
            None | Some(Value::Null) => true,
            Some(Value::String(id)) => id
                .parse::<RequestId>()
                .is_ok_and(|echoed| echoed == request_id),
            Some(_) => false,
        }
    }

    /// Returns the activated agents wherever the backend placed them.
    #[must_use]
    pub fn activated_agents(&self) -> Vec<String> {
        let output = self.output.as_ref();
        [
            output.and_then(|o| o.activated_agents.as_ref()),
            self.activated_agents.as_ref(),
            output
                .and_then(|o| o.metadata.as_ref())
                .and_then(|m| m.activated_agents.as_ref()),
            self.metadata
                .as_ref()
                .and_then(|m| m.activated_agents.as_ref()),
        ]
        .into_iter()
        .flatten()
        .next()
        .cloned()
        .unwrap_or_default()
    }

    /// Converts the message into the answer or the failure it reports.
    ///
    /// # Errors
    ///
    /// - [`Error::Server`] if the server reported a failure
    /// - [`Error::Protocol`] if the message matches neither shape
    pub fn into_answer(self) -> Result<Answer> {
        let activated_agents = self.activated_agents();

        if let Some(success) = self.success {
            return match self.content {
                Some(content) if success && !content.is_empty() => Ok(Answer {
                    content,
                    run_id: None,
                    agent: None,
                    activated_agents,
                }),
                _ => Err(Error::server(
                    self.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
                )),
            };
        }

        match self.status {
            Some(ReplyStatus::Success) => {
                let output = self.output.unwrap_or_default();

                if output.status.as_deref() == Some("failed") {
                    return Err(Error::server(
                        output
                            .error
                            .or(self.message)
                            .unwrap_or_else(|| RUN_FAILED.to_string()),
                    ));
                }

                let content = output
                    .answer
                    .ok_or_else(|| Error::protocol("Success reply carries no answer"))?;

                Ok(Answer {
                    content,
                    run_id: output.run_id,
                    agent: output.agent,
                    activated_agents,
                })
            }
            Some(ReplyStatus::Error) => Err(Error::server(
                self.message
                    .or_else(|| self.output.and_then(|o| o.error))
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
            )),
            Some(ReplyStatus::Unknown) => Err(Error::protocol("Unexpected reply status")),
            None => Err(Error::protocol(
                "Reply carries neither `success` nor `status`",
            )),
        }
    }
}

// ============================================================================
// Answer
// ============================================================================

/// A successful reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// Answer text.
    pub content: String,
    /// Backend run identifier.
    pub run_id: Option<String>,
    /// Agent that produced the answer.
    pub agent: Option<String>,
    /// Agents the backend activated.
    pub activated_agents: Vec<String>,
}

// ============================================================================
// Tests
// ============================================================================
