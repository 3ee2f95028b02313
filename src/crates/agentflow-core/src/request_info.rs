//! Request/response protocol for human-in-the-loop pauses.
//!
//! An executor that needs external input calls
//! [`WorkflowContext::request_info`](crate::context::WorkflowContext::request_info).
//! That registers a [`PendingRequest`], emits a [`RequestInfoEvent`] and
//! returns immediately — the handler does not block. Once the workflow
//! quiesces with requests outstanding, the run ends in the
//! `idle-with-pending-requests` state and the caller resumes it with
//! `send_responses`, which validates each response against the stored
//! response type and delivers a [`RequestResponse`] message to the
//! requesting executor's response handler.
//!
//! Request-info is not an error. It is a normal pause.

use crate::envelope::WorkflowMessage;
use crate::error::Result;
use crate::typing::TypeDescriptor;
use agentflow_checkpoint::{encoding, PendingRequestState, TypeRegistry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ChatMessage;

/// A pending external request tracked by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// Fresh UUID identifying the request.
    pub request_id: String,
    /// Executor that issued the request; its response handler receives
    /// the eventual [`RequestResponse`].
    pub source_executor_id: String,
    /// Fully qualified name of the request payload type.
    pub request_type: String,
    /// Serialized request payload.
    pub payload: Value,
    /// Fully qualified name of the declared response type.
    pub response_type: String,
    /// Reflected descriptor of the declared response type.
    pub response_descriptor: TypeDescriptor,
    /// When the request was issued.
    pub created_at: DateTime<Utc>,
}

impl PendingRequest {
    /// Snapshot for checkpoint encoding. The payload is wrapped in a
    /// dataclass marker keyed by the request type.
    pub fn to_state(&self) -> Result<PendingRequestState> {
        Ok(PendingRequestState {
            request_id: self.request_id.clone(),
            source_executor_id: self.source_executor_id.clone(),
            request_type: self.request_type.clone(),
            request_data: encoding::encode_dataclass(&self.request_type, self.payload.clone()),
            response_type: self.response_type.clone(),
            response_descriptor: serde_json::to_value(&self.response_descriptor)?,
            created_at: self.created_at,
        })
    }

    /// Re-hydrate from a checkpoint snapshot.
    ///
    /// Fails if the request type cannot be resolved in `registry` or the
    /// stored payload disagrees with the registered shape — a caller
    /// cannot meaningfully respond to a request it cannot reconstruct.
    pub fn from_state(state: &PendingRequestState, registry: &TypeRegistry) -> Result<Self> {
        let decoded = encoding::decode_typed(&state.request_data, registry)?;
        Ok(Self {
            request_id: state.request_id.clone(),
            source_executor_id: state.source_executor_id.clone(),
            request_type: state.request_type.clone(),
            payload: decoded.value,
            response_type: state.response_type.clone(),
            response_descriptor: serde_json::from_value(state.response_descriptor.clone())?,
            created_at: state.created_at,
        })
    }

    /// Snapshot as a [`RequestInfoEvent`].
    pub fn to_event(&self) -> RequestInfoEvent {
        RequestInfoEvent {
            request_id: self.request_id.clone(),
            source_executor_id: self.source_executor_id.clone(),
            request_type: self.request_type.clone(),
            response_type: self.response_type.clone(),
            data: self.payload.clone(),
        }
    }
}

/// Event emitted when an executor requests external input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInfoEvent {
    /// Id to address the response to.
    pub request_id: String,
    /// Executor awaiting the response.
    pub source_executor_id: String,
    /// Fully qualified name of the request payload type.
    pub request_type: String,
    /// Fully qualified name of the expected response type.
    pub response_type: String,
    /// The request payload.
    pub data: Value,
}

/// The message delivered to an executor's response handler when the
/// caller answers one of its pending requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResponse {
    /// Id of the answered request.
    pub request_id: String,
    /// The supplied response value.
    pub data: Value,
    /// Fully qualified name of the original request payload type.
    pub request_type: String,
    /// The original request payload.
    pub original_request: Value,
}

impl RequestResponse {
    /// Decode the response value.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Decode the original request payload.
    pub fn request_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.original_request.clone())?)
    }
}

impl WorkflowMessage for RequestResponse {
    fn type_name() -> String {
        "agentflow::RequestResponse".to_string()
    }
}

/// Request payload asking a human to review an agent's pending output
/// before it continues through the workflow. Used by the orchestration
/// builders' `.with_request_info(...)` pause points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInputRequest {
    /// The participant whose output is under review.
    pub target_agent_id: String,
    /// The conversation so far, including the output under review.
    #[serde(default)]
    pub conversation: Vec<ChatMessage>,
    /// Optional instruction for the reviewer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl AgentInputRequest {
    /// Create a review request for a participant.
    pub fn new(target_agent_id: impl Into<String>) -> Self {
        Self {
            target_agent_id: target_agent_id.into(),
            conversation: Vec::new(),
            instruction: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach the conversation under review.
    pub fn with_conversation(mut self, conversation: Vec<ChatMessage>) -> Self {
        self.conversation = conversation;
        self
    }

    /// Attach a reviewer instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }
}

impl WorkflowMessage for AgentInputRequest {
    fn type_name() -> String {
        "agentflow::AgentInputRequest".to_string()
    }
}

/// A human's answer to an [`AgentInputRequest`]: approve the output
/// as-is, or inject steering messages before it continues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AgentInputResponse {
    /// Let the reviewed output continue unchanged.
    Approve,
    /// Append these messages to the conversation before it continues.
    InjectMessages {
        /// Messages to append.
        messages: Vec<ChatMessage>,
    },
}

impl AgentInputResponse {
    /// Approve helper.
    pub fn approve() -> Self {
        Self::Approve
    }

    /// Inject helper.
    pub fn inject(messages: Vec<ChatMessage>) -> Self {
        Self::InjectMessages { messages }
    }
}

impl WorkflowMessage for AgentInputResponse {
    fn type_name() -> String {
        "agentflow::AgentInputResponse".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct MockRequest {
        prompt: String,
    }

    fn pending() -> PendingRequest {
        PendingRequest {
            request_id: "request-123".to_string(),
            source_executor_id: "review_gateway".to_string(),
            request_type: std::any::type_name::<MockRequest>().to_string(),
            payload: json!({"prompt": "review"}),
            response_type: "str".to_string(),
            response_descriptor: TypeDescriptor::String,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_state_round_trip() {
        let registry = TypeRegistry::new();
        registry.register::<MockRequest>();

        let original = pending();
        let state = original.to_state().unwrap();
        assert_eq!(state.request_type, original.request_type);

        let restored = PendingRequest::from_state(&state, &registry).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_rehydrate_fails_when_request_type_missing() {
        let registry = TypeRegistry::new();
        let mut state = pending().to_state().unwrap();
        state.request_data = agentflow_checkpoint::encode_dataclass(
            "nonexistent::MissingRequest",
            json!({"prompt": "review"}),
        );
        assert!(PendingRequest::from_state(&state, &registry).is_err());
    }

    #[test]
    fn test_request_response_decoding() {
        let response = RequestResponse {
            request_id: "r1".to_string(),
            data: json!("approve"),
            request_type: "tests::MockRequest".to_string(),
            original_request: json!({"prompt": "review"}),
        };
        assert_eq!(response.data_as::<String>().unwrap(), "approve");
        assert_eq!(
            response.request_as::<MockRequest>().unwrap(),
            MockRequest {
                prompt: "review".to_string()
            }
        );
    }

    #[test]
    fn test_agent_input_response_variants() {
        let approve = AgentInputResponse::approve();
        assert_eq!(approve, AgentInputResponse::Approve);

        let inject = AgentInputResponse::inject(vec![ChatMessage::user("steer it")]);
        match inject {
            AgentInputResponse::InjectMessages { messages } => {
                assert_eq!(messages.len(), 1);
            }
            _ => panic!("expected inject variant"),
        }
    }
}
