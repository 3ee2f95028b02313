//! Chat message and content model.
//!
//! [`ChatMessage`] is the unit of conversation exchanged with agents and
//! chat clients: a role plus an ordered sequence of [`Content`] items.
//! Messages are immutable once created — builders return new values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Author role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System / developer instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool execution results.
    Tool,
}

impl Role {
    /// Lowercase wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A single content item within a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    /// Plain text.
    Text {
        /// The text body.
        text: String,
    },
    /// A tool/function invocation requested by the model.
    FunctionCall {
        /// Correlation id for the matching result.
        call_id: String,
        /// Function name.
        name: String,
        /// JSON-encoded arguments.
        arguments: Value,
    },
    /// The result of executing a function call.
    FunctionResult {
        /// Correlation id of the originating call.
        call_id: String,
        /// Result payload.
        result: Value,
    },
    /// A request for a human to approve a function call before it runs.
    FunctionApprovalRequest {
        /// Approval correlation id.
        approval_id: String,
        /// The call awaiting approval.
        call_id: String,
        /// Function name.
        name: String,
        /// JSON-encoded arguments.
        arguments: Value,
    },
    /// A human's answer to a [`Content::FunctionApprovalRequest`].
    FunctionApprovalResponse {
        /// Approval correlation id.
        approval_id: String,
        /// Whether the call may proceed.
        approved: bool,
    },
    /// A reference to a provider-hosted file.
    HostedFile {
        /// Provider file id.
        file_id: String,
    },
    /// A citation attached to generated text.
    Citation {
        /// Source locator (url or document id).
        source: String,
        /// Optional quoted snippet.
        #[serde(skip_serializing_if = "Option::is_none")]
        snippet: Option<String>,
    },
    /// An inline binary blob.
    DataBlob {
        /// MIME type of the data.
        media_type: String,
        /// Base64-encoded bytes.
        data: String,
    },
}

impl Content {
    /// Text content helper.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The text body, if this is a text item.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A chat message: a role plus an ordered sequence of content items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: Role,
    /// Ordered content items.
    pub contents: Vec<Content>,
    /// Display name of the author (e.g. the agent name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    /// Stable message id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Provider-specific raw representation, if retained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    /// Free-form extension properties.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub additional_properties: HashMap<String, Value>,
}

impl ChatMessage {
    /// Create a message with a single text content item and a fresh id.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            contents: vec![Content::text(text)],
            author_name: None,
            message_id: Some(Uuid::new_v4().to_string()),
            raw: None,
            additional_properties: HashMap::new(),
        }
    }

    /// Create a message from explicit content items.
    pub fn from_contents(role: Role, contents: Vec<Content>) -> Self {
        Self {
            role,
            contents,
            author_name: None,
            message_id: Some(Uuid::new_v4().to_string()),
            raw: None,
            additional_properties: HashMap::new(),
        }
    }

    /// A user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// An assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// A system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Set the author name.
    pub fn with_author_name(mut self, name: impl Into<String>) -> Self {
        self.author_name = Some(name.into());
        self
    }

    /// Concatenated text of every text content item.
    pub fn text(&self) -> String {
        self.contents
            .iter()
            .filter_map(Content::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// Function-call items within the message.
    pub fn function_calls(&self) -> Vec<&Content> {
        self.contents
            .iter()
            .filter(|c| matches!(c, Content::FunctionCall { .. }))
            .collect()
    }
}

impl crate::envelope::WorkflowMessage for ChatMessage {
    fn type_name() -> String {
        "agentflow::ChatMessage".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_text_concatenation() {
        let msg = ChatMessage::from_contents(
            Role::Assistant,
            vec![Content::text("hello "), Content::text("world")],
        );
        assert_eq!(msg.text(), "hello world");
        assert_eq!(msg.role.as_str(), "assistant");
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = ChatMessage::user("x");
        let b = ChatMessage::user("x");
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn test_function_call_round_trip() {
        let msg = ChatMessage::from_contents(
            Role::Assistant,
            vec![Content::FunctionCall {
                call_id: "call-1".to_string(),
                name: "lookup".to_string(),
                arguments: json!({"q": "rust"}),
            }],
        );
        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: ChatMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.function_calls().len(), 1);
        assert_eq!(decoded, msg);
    }
}
