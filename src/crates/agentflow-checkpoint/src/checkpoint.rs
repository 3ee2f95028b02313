//! Core checkpoint data structures.
//!
//! A [`WorkflowCheckpoint`] is a complete, JSON-serializable snapshot of a
//! workflow run: the queued messages awaiting the next superstep, the shared
//! state, every executor's private state, the pending external requests and
//! the iteration bookkeeping. A checkpoint saved through any
//! [`CheckpointStorage`](crate::CheckpointStorage) backend can be re-hydrated
//! into a compatible process to resume the run.
//!
//! The runtime creates checkpoints at superstep boundaries (when configured)
//! or on explicit request. The payload schemas for queued messages and
//! executor states are owned by the runtime crate; this crate treats them as
//! opaque JSON enriched with the type markers from [`crate::encoding`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Checkpoint id type.
pub type CheckpointId = String;

/// A pending external request captured inside a checkpoint.
///
/// The request payload is stored marker-encoded together with the fully
/// qualified names of the request and response types. Reconstruction happens
/// only in a process that has those types registered; see
/// [`TypeRegistry`](crate::TypeRegistry).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingRequestState {
    /// Request id (UUID v4, unique per run).
    pub request_id: String,
    /// Executor that issued the request.
    pub source_executor_id: String,
    /// Fully qualified name of the request payload type.
    pub request_type: String,
    /// Marker-encoded request payload.
    pub request_data: Value,
    /// Fully qualified name of the declared response type.
    pub response_type: String,
    /// Reflected descriptor of the response type, used to validate
    /// supplied responses. Opaque to this crate.
    pub response_descriptor: Value,
    /// When the request was issued.
    pub created_at: DateTime<Utc>,
}

/// A complete snapshot of workflow runner state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    /// Unique id of this checkpoint.
    pub checkpoint_id: CheckpointId,

    /// Id of the workflow this checkpoint belongs to.
    pub workflow_id: String,

    /// Wall-clock creation time.
    pub timestamp: DateTime<Utc>,

    /// Messages queued for delivery in the next superstep, in enqueue
    /// order. Each entry is an encoded message envelope.
    pub messages: Vec<Value>,

    /// Shared-state mapping at snapshot time (marker-encoded values).
    pub shared_state: HashMap<String, Value>,

    /// Per-executor private state, keyed by executor id.
    pub executor_states: HashMap<String, Value>,

    /// Pending external requests, keyed by request id.
    pub pending_requests: HashMap<String, PendingRequestState>,

    /// Supersteps completed so far.
    pub iteration_count: usize,

    /// Iteration cap the run was started with. A resumed run keeps the
    /// original cap.
    pub max_iterations: usize,

    /// Arbitrary metadata (e.g. the superstep number that produced an
    /// automatic checkpoint).
    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    /// Checkpoint format version.
    pub version: String,
}

impl WorkflowCheckpoint {
    /// Current checkpoint format version.
    pub const CURRENT_VERSION: &'static str = "1.0";

    /// Create an empty checkpoint for a workflow.
    pub fn new(workflow_id: impl Into<String>, max_iterations: usize) -> Self {
        Self {
            checkpoint_id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            timestamp: Utc::now(),
            messages: Vec::new(),
            shared_state: HashMap::new(),
            executor_states: HashMap::new(),
            pending_requests: HashMap::new(),
            iteration_count: 0,
            max_iterations,
            metadata: HashMap::new(),
            version: Self::CURRENT_VERSION.to_string(),
        }
    }

    /// Set the queued messages.
    pub fn with_messages(mut self, messages: Vec<Value>) -> Self {
        self.messages = messages;
        self
    }

    /// Set the shared-state snapshot.
    pub fn with_shared_state(mut self, shared_state: HashMap<String, Value>) -> Self {
        self.shared_state = shared_state;
        self
    }

    /// Set the per-executor states.
    pub fn with_executor_states(mut self, executor_states: HashMap<String, Value>) -> Self {
        self.executor_states = executor_states;
        self
    }

    /// Set the pending requests.
    pub fn with_pending_requests(
        mut self,
        pending_requests: HashMap<String, PendingRequestState>,
    ) -> Self {
        self.pending_requests = pending_requests;
        self
    }

    /// Set the iteration count.
    pub fn with_iteration_count(mut self, iteration_count: usize) -> Self {
        self.iteration_count = iteration_count;
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// True if the snapshot carries unanswered external requests.
    pub fn has_pending_requests(&self) -> bool {
        !self.pending_requests.is_empty()
    }
}
