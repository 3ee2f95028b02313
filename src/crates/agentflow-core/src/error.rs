//! Error types for workflow construction and execution.
//!
//! All fallible operations in this crate return [`Result`]. The
//! [`WorkflowError`] enum covers the full taxonomy: graph-validation
//! failures raised from `build()`, handler and dispatch failures raised
//! during supersteps, the iteration quota, response-injection errors, and
//! cancellation. A request-info pause is *not* an error; it is a normal
//! run state (`idle-with-pending-requests`).
//!
//! Errors surface twice during a streaming run: as a terminal
//! `WorkflowFailed` event on the stream, and as the `Err` returned from
//! blocking entry points such as [`Workflow::run`](crate::Workflow::run).

use thiserror::Error;

/// Convenience result type using [`WorkflowError`].
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors raised by workflow construction and execution.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Graph structure validation failed: missing start executor, unknown
    /// executor id, duplicate id, or a provably incompatible edge. Raised
    /// from `build()`; non-recoverable.
    #[error("Graph validation failed: {0}")]
    GraphValidation(String),

    /// An executor's handler returned an error or panicked.
    #[error("Executor '{executor_id}' failed: {error}")]
    ExecutorFailure {
        /// Id of the failing executor.
        executor_id: String,
        /// Error message from the handler.
        error: String,
    },

    /// A message reached an executor with no handler accepting its type.
    /// Treated as a handler failure on the target.
    #[error("Executor '{executor_id}' has no handler for message type '{message_type}'")]
    Dispatch {
        /// Target executor id.
        executor_id: String,
        /// Fully qualified type name of the rejected message.
        message_type: String,
    },

    /// The superstep count exceeded the configured cap.
    #[error("Workflow exceeded maximum iterations ({max_iterations})")]
    IterationLimitExceeded {
        /// The configured cap.
        max_iterations: usize,
    },

    /// A supplied response does not satisfy the stored response type of
    /// its pending request. State is unchanged.
    #[error("Response for request '{request_id}' does not match expected type '{expected}'")]
    ResponseTypeMismatch {
        /// Request id the response was addressed to.
        request_id: String,
        /// Declared response type of the pending request.
        expected: String,
    },

    /// A response was supplied for a request id that is not pending.
    /// State is unchanged.
    #[error("No pending request with id '{0}'")]
    UnknownRequestId(String),

    /// The run was cancelled externally.
    #[error("Workflow run cancelled")]
    Cancelled,

    /// A handler exceeded its soft timeout.
    #[error("Executor '{executor_id}' timed out after {timeout_ms}ms")]
    HandlerTimeout {
        /// Id of the timed-out executor.
        executor_id: String,
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Checkpoint persistence or re-hydration failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] agentflow_checkpoint::CheckpointError),

    /// A payload could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Application-defined error for custom executors.
    #[error("{0}")]
    Custom(String),
}

impl WorkflowError {
    /// Create an executor-failure error with context.
    pub fn executor_failure(executor_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::ExecutorFailure {
            executor_id: executor_id.into(),
            error: error.into(),
        }
    }

    /// Create a dispatch-failure error with context.
    pub fn dispatch(executor_id: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self::Dispatch {
            executor_id: executor_id.into(),
            message_type: message_type.into(),
        }
    }

    /// Create a graph-validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::GraphValidation(message.into())
    }

    /// True for the failure kinds that terminate a run (as opposed to
    /// build-time validation errors).
    pub fn is_run_failure(&self) -> bool {
        !matches!(self, Self::GraphValidation(_))
    }
}
