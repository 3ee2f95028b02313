//! Workflow events and run states.
//!
//! Everything observable about a run arrives as a [`WorkflowEvent`]: a
//! flat [`EventOrigin`] plus a tagged [`EventKind`]. Consumers switch on
//! the kind; the origin distinguishes lifecycle events emitted by the
//! runner itself (`Framework`) from data-plane events emitted inside
//! handlers (`Executor`). The origin is deliberately a flat enum, never
//! derived from the kind.

use crate::request_info::RequestInfoEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Run-state of a workflow within a single invocation.
///
/// Transitions are strictly one-way within one `run`/`run_stream` call:
/// `InProgress` → (`InProgressPendingRequests`) → a terminal state.
/// Resumption is a fresh invocation keyed by checkpoint or by supplying
/// responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunState {
    /// Supersteps are executing.
    InProgress,
    /// Supersteps are executing and external requests are outstanding.
    InProgressPendingRequests,
    /// Terminal: no messages pending, no requests outstanding.
    Idle,
    /// Terminal: quiesced with outstanding external requests. The caller
    /// can resume by supplying responses.
    IdleWithPendingRequests,
    /// Terminal: the run failed.
    Failed,
}

impl WorkflowRunState {
    /// True for the three terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::IdleWithPendingRequests | Self::Failed
        )
    }
}

/// Who emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventOrigin {
    /// Emitted by the runner itself (lifecycle, status).
    Framework,
    /// Emitted from inside a handler (data plane).
    Executor,
}

/// The tagged payload of a [`WorkflowEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// The run started.
    WorkflowStarted,
    /// An executor is about to run a handler.
    ExecutorInvoked {
        /// Target executor id.
        executor_id: String,
    },
    /// A handler completed successfully.
    ExecutorCompleted {
        /// Target executor id.
        executor_id: String,
    },
    /// A handler failed.
    ExecutorFailed {
        /// Target executor id.
        executor_id: String,
        /// Error message.
        error: String,
    },
    /// A streaming chunk of assistant output from an agent-backed
    /// executor. Updates sharing a `response_id` belong to one response.
    AgentRunUpdate {
        /// Originating executor id.
        executor_id: String,
        /// Stable id grouping the updates of one response.
        response_id: String,
        /// Incremental text.
        text: String,
        /// Author name, when the agent advertises one.
        #[serde(skip_serializing_if = "Option::is_none")]
        author_name: Option<String>,
    },
    /// A workflow-level output yielded by a handler. Outputs do not
    /// terminate the run by themselves.
    WorkflowOutput {
        /// Executor that yielded the output.
        executor_id: String,
        /// The output value.
        data: Value,
    },
    /// An executor needs external input; the run will quiesce into
    /// [`WorkflowRunState::IdleWithPendingRequests`] once no more
    /// messages are in flight.
    RequestInfo(RequestInfoEvent),
    /// A run-state transition.
    Status {
        /// The new state.
        state: WorkflowRunState,
    },
    /// The run failed.
    WorkflowFailed {
        /// Error message.
        error: String,
    },
    /// A user-defined event injected via `WorkflowContext::add_event`.
    Custom {
        /// Emitting executor id.
        executor_id: String,
        /// Event name.
        name: String,
        /// Event payload.
        data: Value,
    },
}

/// An event on a workflow run's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Who emitted the event.
    pub origin: EventOrigin,
    /// What happened.
    pub kind: EventKind,
}

impl WorkflowEvent {
    /// A framework-origin event.
    pub fn framework(kind: EventKind) -> Self {
        Self {
            origin: EventOrigin::Framework,
            kind,
        }
    }

    /// An executor-origin event.
    pub fn executor(kind: EventKind) -> Self {
        Self {
            origin: EventOrigin::Executor,
            kind,
        }
    }

    /// The status state, if this is a status event.
    pub fn status(&self) -> Option<WorkflowRunState> {
        match &self.kind {
            EventKind::Status { state } => Some(*state),
            _ => None,
        }
    }

    /// The output value, if this is an output event.
    pub fn output(&self) -> Option<&Value> {
        match &self.kind {
            EventKind::WorkflowOutput { data, .. } => Some(data),
            _ => None,
        }
    }

    /// The request-info snapshot, if this is a request-info event.
    pub fn request_info(&self) -> Option<&RequestInfoEvent> {
        match &self.kind {
            EventKind::RequestInfo(ev) => Some(ev),
            _ => None,
        }
    }
}
