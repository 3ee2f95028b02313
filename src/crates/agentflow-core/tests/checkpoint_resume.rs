//! Checkpoint save/restore across runtime instances.
//!
//! The serialization boundary must be invisible: a workflow paused on a
//! pending request, checkpointed, and re-hydrated into a fresh instance
//! terminates identically to one that never crossed a process boundary.

use agentflow_core::{
    checkpoint_summary, FileCheckpointStorage, FnExecutor, HandlerRegistry,
    InMemoryCheckpointStorage, RequestResponse, Workflow, WorkflowBuilder, WorkflowContext,
    WorkflowMessage, WorkflowRunState,
};
use agentflow_checkpoint::{encode_dataclass, CheckpointStorage};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApprovalRequest {
    prompt: String,
}

impl WorkflowMessage for ApprovalRequest {}

fn gateway() -> Arc<FnExecutor> {
    let registry = HandlerRegistry::new()
        .on::<String, _, _>(|msg: String, ctx: WorkflowContext| async move {
            ctx.set_shared_state("draft", &msg).await?;
            ctx.request_info::<ApprovalRequest, String>(&ApprovalRequest {
                prompt: "approve the draft".to_string(),
            })?;
            Ok(())
        })
        .on_response(|response: RequestResponse, ctx: WorkflowContext| async move {
            let decision: String = response.data_as()?;
            let draft = ctx
                .get_shared_state("draft")
                .await
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            ctx.yield_output(&format!("{draft}: {decision}"))?;
            Ok(())
        });
    Arc::new(FnExecutor::new("gateway", registry))
}

fn build_workflow(storage: Arc<dyn CheckpointStorage>) -> Workflow {
    WorkflowBuilder::new()
        .start_with(gateway())
        .register_message_type::<ApprovalRequest>()
        .with_checkpoint_storage(storage)
        .with_id("approval-flow")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_checkpoint_resume_matches_uninterrupted_run() {
    let storage: Arc<dyn CheckpointStorage> = Arc::new(InMemoryCheckpointStorage::new());

    // Reference run without a serialization boundary.
    let reference = build_workflow(storage.clone());
    let paused = reference.run(&"the draft".to_string()).await.unwrap();
    let request_id = paused.request_info_events()[0].request_id.clone();
    let mut responses = HashMap::new();
    responses.insert(request_id, json!("approved"));
    let reference_result = reference.send_responses(responses).await.unwrap();

    // Interrupted run: pause, checkpoint, re-hydrate a fresh instance.
    let first = build_workflow(storage.clone());
    let paused = first.run(&"the draft".to_string()).await.unwrap();
    assert_eq!(
        paused.get_final_state(),
        Some(WorkflowRunState::IdleWithPendingRequests)
    );
    let request_id = paused.request_info_events()[0].request_id.clone();
    let checkpoint_id = first.create_checkpoint().await.unwrap().unwrap();
    drop(first);

    let second = build_workflow(storage.clone());
    let checkpoint = storage
        .load_checkpoint(&checkpoint_id)
        .await
        .unwrap()
        .unwrap();
    second.apply_checkpoint(&checkpoint).await.unwrap();

    let restored = second.pending_requests();
    assert_eq!(restored.len(), 1);
    assert!(restored.contains_key(&request_id));
    assert_eq!(
        second.shared_state().get("draft").await,
        Some(json!("the draft"))
    );

    let mut responses = HashMap::new();
    responses.insert(request_id, json!("approved"));
    let resumed_result = second.send_responses(responses).await.unwrap();

    assert_eq!(resumed_result.get_final_state(), Some(WorkflowRunState::Idle));
    assert_eq!(resumed_result.get_outputs(), reference_result.get_outputs());
    assert_eq!(
        resumed_result.get_outputs(),
        vec![json!("the draft: approved")]
    );
}

#[tokio::test]
async fn test_rehydrate_fails_when_request_type_missing() {
    let storage: Arc<dyn CheckpointStorage> = Arc::new(InMemoryCheckpointStorage::new());
    let wf = build_workflow(storage.clone());
    wf.run(&"draft".to_string()).await.unwrap();
    let checkpoint_id = wf.create_checkpoint().await.unwrap().unwrap();

    let mut checkpoint = storage
        .load_checkpoint(&checkpoint_id)
        .await
        .unwrap()
        .unwrap();
    // Simulate a process that does not know the request type.
    for pending in checkpoint.pending_requests.values_mut() {
        pending.request_type = "nonexistent::MissingRequest".to_string();
        pending.request_data =
            encode_dataclass("nonexistent::MissingRequest", json!({"prompt": "x"}));
    }

    let fresh = build_workflow(storage);
    assert!(fresh.apply_checkpoint(&checkpoint).await.is_err());
}

#[tokio::test]
async fn test_automatic_checkpoints_at_superstep_boundaries() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    let wf = build_workflow(storage.clone());
    wf.run(&"draft".to_string()).await.unwrap();

    let checkpoints = storage.list_checkpoints(Some("approval-flow")).await.unwrap();
    assert!(!checkpoints.is_empty());
    assert!(checkpoints
        .iter()
        .all(|cp| cp.metadata.contains_key("superstep")));

    let awaiting: Vec<_> = checkpoints
        .iter()
        .filter(|cp| cp.has_pending_requests())
        .collect();
    assert!(!awaiting.is_empty());
    let summary = checkpoint_summary(awaiting[0]);
    assert_eq!(summary.status, "awaiting request response");
    assert_eq!(summary.pending_requests[0].source_executor_id, "gateway");
}

#[tokio::test]
async fn test_file_backed_checkpoint_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn CheckpointStorage> =
        Arc::new(FileCheckpointStorage::new(dir.path()).unwrap());

    let wf = build_workflow(storage.clone());
    let paused = wf.run(&"persisted draft".to_string()).await.unwrap();
    let request_id = paused.request_info_events()[0].request_id.clone();
    let checkpoint_id = wf.create_checkpoint().await.unwrap().unwrap();
    drop(wf);

    let restored = build_workflow(storage.clone());
    let checkpoint = storage
        .load_checkpoint(&checkpoint_id)
        .await
        .unwrap()
        .unwrap();
    restored.apply_checkpoint(&checkpoint).await.unwrap();

    let mut responses = HashMap::new();
    responses.insert(request_id, json!("yes"));
    let result = restored.send_responses(responses).await.unwrap();
    assert_eq!(result.get_outputs(), vec![json!("persisted draft: yes")]);
}
