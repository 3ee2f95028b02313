//! Operator-facing checkpoint digests.

use crate::checkpoint::{PendingRequestState, WorkflowCheckpoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A compact, display-friendly digest of a checkpoint.
///
/// Summaries are what an operator console lists when offering resume
/// points: enough to pick a checkpoint without deserializing the full
/// message queue or state maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSummary {
    /// Id of the summarized checkpoint.
    pub checkpoint_id: String,
    /// Workflow the checkpoint belongs to.
    pub workflow_id: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Supersteps completed when the snapshot was taken.
    pub iteration_count: usize,
    /// `"awaiting request response"` when external requests are pending,
    /// `"idle"` otherwise.
    pub status: String,
    /// Executors with private state in the snapshot.
    pub executor_ids: Vec<String>,
    /// Messages queued for the next superstep.
    pub queued_message_count: usize,
    /// Snapshots of the pending external requests.
    pub pending_requests: Vec<PendingRequestState>,
}

/// Build a [`CheckpointSummary`] from a full checkpoint.
pub fn checkpoint_summary(checkpoint: &WorkflowCheckpoint) -> CheckpointSummary {
    let status = if checkpoint.has_pending_requests() {
        "awaiting request response"
    } else {
        "idle"
    };
    let mut executor_ids: Vec<String> = checkpoint.executor_states.keys().cloned().collect();
    executor_ids.sort();
    let mut pending_requests: Vec<PendingRequestState> =
        checkpoint.pending_requests.values().cloned().collect();
    pending_requests.sort_by(|a, b| a.request_id.cmp(&b.request_id));

    CheckpointSummary {
        checkpoint_id: checkpoint.checkpoint_id.clone(),
        workflow_id: checkpoint.workflow_id.clone(),
        timestamp: checkpoint.timestamp,
        iteration_count: checkpoint.iteration_count,
        status: status.to_string(),
        executor_ids,
        queued_message_count: checkpoint.messages.len(),
        pending_requests,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_idle() {
        let cp = WorkflowCheckpoint::new("wf-1", 100).with_iteration_count(4);
        let summary = checkpoint_summary(&cp);
        assert_eq!(summary.status, "idle");
        assert_eq!(summary.iteration_count, 4);
        assert!(summary.pending_requests.is_empty());
    }

    #[test]
    fn test_summary_awaiting_request_response() {
        let mut cp = WorkflowCheckpoint::new("wf-1", 100);
        cp.pending_requests.insert(
            "request-123".to_string(),
            PendingRequestState {
                request_id: "request-123".to_string(),
                source_executor_id: "review_gateway".to_string(),
                request_type: "tests::MockRequest".to_string(),
                request_data: json!({}),
                response_type: "bool".to_string(),
                response_descriptor: json!("bool"),
                created_at: Utc::now(),
            },
        );
        cp.executor_states.insert("review_gateway".to_string(), json!({}));

        let summary = checkpoint_summary(&cp);
        assert_eq!(summary.status, "awaiting request response");
        assert_eq!(summary.executor_ids, vec!["review_gateway"]);
        assert_eq!(summary.pending_requests.len(), 1);
        assert_eq!(summary.pending_requests[0].request_id, "request-123");
        assert_eq!(
            summary.pending_requests[0].source_executor_id,
            "review_gateway"
        );
    }
}
