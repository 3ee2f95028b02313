//! Human-in-the-loop round trips through `request_info` and
//! `send_responses`.

use agentflow_core::{
    FnExecutor, HandlerRegistry, RequestResponse, WorkflowBuilder, WorkflowContext, WorkflowError,
    WorkflowMessage, WorkflowRunState,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReviewRequest {
    prompt: String,
}

impl WorkflowMessage for ReviewRequest {}

/// Executor that asks for a review, then yields the supplied answer.
fn review_gateway() -> Arc<FnExecutor> {
    let registry = HandlerRegistry::new()
        .on::<String, _, _>(|_msg: String, ctx: WorkflowContext| async move {
            ctx.request_info::<ReviewRequest, String>(&ReviewRequest {
                prompt: "review".to_string(),
            })?;
            Ok(())
        })
        .on_response(|response: RequestResponse, ctx: WorkflowContext| async move {
            let answer: String = response.data_as()?;
            ctx.yield_output(&format!("reviewed: {answer}"))?;
            Ok(())
        });
    Arc::new(FnExecutor::new("gateway", registry))
}

#[tokio::test]
async fn test_hitl_round_trip() {
    let wf = WorkflowBuilder::new()
        .start_with(review_gateway())
        .register_message_type::<ReviewRequest>()
        .build()
        .unwrap();

    // First leg: quiesce awaiting the review.
    let result = wf.run(&"draft".to_string()).await.unwrap();
    assert_eq!(
        result.get_final_state(),
        Some(WorkflowRunState::IdleWithPendingRequests)
    );
    let requests = result.request_info_events();
    assert_eq!(requests.len(), 1);
    let request_id = requests[0].request_id.clone();
    assert_eq!(requests[0].source_executor_id, "gateway");
    assert_eq!(requests[0].data, json!({"prompt": "review"}));

    // Second leg: answer and run to idle.
    let mut responses = HashMap::new();
    responses.insert(request_id, json!("approve"));
    let resumed = wf.send_responses(responses).await.unwrap();

    assert_eq!(resumed.get_final_state(), Some(WorkflowRunState::Idle));
    assert_eq!(resumed.get_outputs(), vec![json!("reviewed: approve")]);
    assert!(wf.pending_requests().is_empty());
}

#[tokio::test]
async fn test_unknown_request_id_leaves_state_unchanged() {
    let wf = WorkflowBuilder::new()
        .start_with(review_gateway())
        .register_message_type::<ReviewRequest>()
        .build()
        .unwrap();
    wf.run(&"draft".to_string()).await.unwrap();
    assert_eq!(wf.pending_requests().len(), 1);

    let mut responses = HashMap::new();
    responses.insert("no-such-request".to_string(), json!("approve"));
    let err = wf.send_responses(responses).await.unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownRequestId(_)));

    // The original request is still pending and answerable.
    assert_eq!(wf.pending_requests().len(), 1);
}

#[tokio::test]
async fn test_response_type_mismatch_is_rejected() {
    let wf = WorkflowBuilder::new()
        .start_with(review_gateway())
        .register_message_type::<ReviewRequest>()
        .build()
        .unwrap();
    let result = wf.run(&"draft".to_string()).await.unwrap();
    let request_id = result.request_info_events()[0].request_id.clone();

    // The gateway declared a string response; send an integer.
    let mut responses = HashMap::new();
    responses.insert(request_id.clone(), json!(42));
    let err = wf.send_responses(responses).await.unwrap_err();
    assert!(matches!(err, WorkflowError::ResponseTypeMismatch { .. }));
    assert_eq!(wf.pending_requests().len(), 1);

    // The correct type still goes through afterwards.
    let mut responses = HashMap::new();
    responses.insert(request_id, json!("ship it"));
    let resumed = wf.send_responses(responses).await.unwrap();
    assert_eq!(resumed.get_outputs(), vec![json!("reviewed: ship it")]);
}

#[tokio::test]
async fn test_response_handler_sees_original_request() {
    let registry = HandlerRegistry::new()
        .on::<String, _, _>(|_msg: String, ctx: WorkflowContext| async move {
            ctx.request_info::<ReviewRequest, String>(&ReviewRequest {
                prompt: "check figures".to_string(),
            })?;
            Ok(())
        })
        .on_response(|response: RequestResponse, ctx: WorkflowContext| async move {
            let original: ReviewRequest = response.request_as()?;
            ctx.yield_output(&original.prompt)?;
            Ok(())
        });
    let wf = WorkflowBuilder::new()
        .start_with(Arc::new(FnExecutor::new("gateway", registry)))
        .register_message_type::<ReviewRequest>()
        .build()
        .unwrap();

    let result = wf.run(&"go".to_string()).await.unwrap();
    let request_id = result.request_info_events()[0].request_id.clone();

    let mut responses = HashMap::new();
    responses.insert(request_id, json!("ok"));
    let resumed = wf.send_responses(responses).await.unwrap();
    assert_eq!(resumed.get_outputs(), vec![json!("check figures")]);
}

#[tokio::test]
async fn test_multiple_pending_requests_answered_together() {
    // Answers route back to the asker; wire the response handler there.
    let asker = Arc::new(FnExecutor::new(
        "asker",
        HandlerRegistry::new()
            .on::<String, _, _>(|_msg: String, ctx: WorkflowContext| async move {
                ctx.request_info::<ReviewRequest, String>(&ReviewRequest {
                    prompt: "first".to_string(),
                })?;
                ctx.request_info::<ReviewRequest, String>(&ReviewRequest {
                    prompt: "second".to_string(),
                })?;
                Ok(())
            })
            .on_response(|response: RequestResponse, ctx: WorkflowContext| async move {
                let answer: String = response.data_as()?;
                ctx.yield_output(&answer)?;
                Ok(())
            }),
    ));

    let wf = WorkflowBuilder::new()
        .start_with(asker)
        .register_message_type::<ReviewRequest>()
        .build()
        .unwrap();

    let result = wf.run(&"go".to_string()).await.unwrap();
    let ids: Vec<String> = result
        .request_info_events()
        .iter()
        .map(|r| r.request_id.clone())
        .collect();
    assert_eq!(ids.len(), 2);

    let mut responses = HashMap::new();
    responses.insert(ids[0].clone(), json!("a"));
    responses.insert(ids[1].clone(), json!("b"));
    let resumed = wf.send_responses(responses).await.unwrap();

    let mut outputs = resumed.get_outputs();
    outputs.sort_by_key(|v| v.as_str().map(String::from));
    assert_eq!(outputs, vec![json!("a"), json!("b")]);
    assert_eq!(resumed.get_final_state(), Some(WorkflowRunState::Idle));
}
