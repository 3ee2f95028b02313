//! End-to-end orchestration scenarios.

use agentflow_core::{
    Agent, AgentExecutorResponse, AgentInputResponse, AgentResponse, ChatMessage, Result, Role,
    WorkflowRunState,
};
use agentflow_orchestrations::{ConcurrentBuilder, ConcurrentReducer, SequentialBuilder};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

struct ScriptedAgent {
    id: String,
    reply: String,
}

impl ScriptedAgent {
    fn new(id: &str, reply: &str) -> Arc<dyn Agent> {
        Arc::new(Self {
            id: id.to_string(),
            reply: reply.to_string(),
        })
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, _messages: &[ChatMessage]) -> Result<AgentResponse> {
        Ok(AgentResponse::new(vec![ChatMessage::assistant(
            self.reply.clone(),
        )
        .with_author_name(self.id.clone())]))
    }
}

/// Sequential two-agent flow: writer drafts, reviewer replies; the
/// final conversation starts with the user prompt and carries the
/// writer's draft.
#[tokio::test]
async fn test_sequential_two_agent_conversation() {
    let wf = SequentialBuilder::new()
        .participants(vec![
            ScriptedAgent::new("writer", "draft reply"),
            ScriptedAgent::new("reviewer", "approved"),
        ])
        .build()
        .unwrap();

    let result = wf.run(&"hello world".to_string()).await.unwrap();
    assert_eq!(result.get_final_state(), Some(WorkflowRunState::Idle));

    let conversations: Vec<Vec<ChatMessage>> = result.outputs_as().unwrap();
    assert_eq!(conversations.len(), 1);
    let conversation = &conversations[0];

    assert_eq!(conversation[0].role, Role::User);
    assert!(conversation[0].text().contains("hello world"));
    assert_eq!(conversation[1].role, Role::Assistant);
    assert!(conversation[1].text().contains("draft reply"));
    assert!(conversation
        .last()
        .unwrap()
        .text()
        .contains("approved"));
}

/// The two-message shape from the writer's perspective: roles
/// `[user, assistant]` with the draft in the assistant slot.
#[tokio::test]
async fn test_sequential_single_agent_roles() {
    let wf = SequentialBuilder::new()
        .participants(vec![ScriptedAgent::new("writer", "draft reply")])
        .build()
        .unwrap();

    let result = wf.run(&"hello world".to_string()).await.unwrap();
    let conversations: Vec<Vec<ChatMessage>> = result.outputs_as().unwrap();
    let conversation = &conversations[0];

    assert_eq!(conversation.len(), 2);
    let roles: Vec<Role> = conversation.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert!(conversation[1].text().contains("draft reply"));
}

/// Fan-out/fan-in: three participants, one reduced string naming each.
#[tokio::test]
async fn test_concurrent_fan_out_fan_in_with_reducer() {
    let reducer: ConcurrentReducer = Arc::new(|responses: Vec<AgentExecutorResponse>| {
        Box::pin(async move {
            let ids: Vec<String> = responses.iter().map(|r| r.executor_id.clone()).collect();
            Ok(json!(format!("contributions from: {}", ids.join(", "))))
        })
    });

    let wf = ConcurrentBuilder::new()
        .participants(vec![
            ScriptedAgent::new("researcher", "market research"),
            ScriptedAgent::new("marketer", "campaign ideas"),
            ScriptedAgent::new("legal", "compliance notes"),
        ])
        .with_reducer(reducer)
        .build()
        .unwrap();

    let result = wf.run(&"launch e-bike".to_string()).await.unwrap();
    assert_eq!(result.get_final_state(), Some(WorkflowRunState::Idle));

    let outputs = result.get_outputs();
    assert_eq!(outputs.len(), 1);
    let summary = outputs[0].as_str().unwrap();
    for id in ["researcher", "marketer", "legal"] {
        assert!(summary.contains(id), "missing {id} in: {summary}");
    }
}

/// A concurrent flow with a human pause before aggregation: the flow
/// idles with one request per participant, and injected steering
/// messages appear in the aggregated output.
#[tokio::test]
async fn test_concurrent_with_request_info_pause() {
    let wf = ConcurrentBuilder::new()
        .participants(vec![
            ScriptedAgent::new("alpha", "alpha says hi"),
            ScriptedAgent::new("beta", "beta says hi"),
        ])
        .with_request_info()
        .build()
        .unwrap();

    let paused = wf.run(&"greetings".to_string()).await.unwrap();
    assert_eq!(
        paused.get_final_state(),
        Some(WorkflowRunState::IdleWithPendingRequests)
    );
    let requests = paused.request_info_events();
    assert_eq!(requests.len(), 2);

    let mut responses = HashMap::new();
    for request in &requests {
        let verdict = if request.data["target_agent_id"] == json!("alpha") {
            serde_json::to_value(AgentInputResponse::inject(vec![ChatMessage::user(
                "steered alpha",
            )]))
            .unwrap()
        } else {
            serde_json::to_value(AgentInputResponse::approve()).unwrap()
        };
        responses.insert(request.request_id.clone(), verdict);
    }

    let result = wf.send_responses(responses).await.unwrap();
    assert_eq!(result.get_final_state(), Some(WorkflowRunState::Idle));

    let outputs = result.get_outputs();
    assert_eq!(outputs.len(), 1);
    let aggregated: Vec<AgentExecutorResponse> =
        serde_json::from_value(outputs[0].clone()).unwrap();
    assert_eq!(aggregated.len(), 2);

    let alpha = aggregated
        .iter()
        .find(|r| r.executor_id == "alpha")
        .unwrap();
    assert!(alpha
        .full_conversation
        .iter()
        .any(|m| m.text() == "steered alpha"));
}

/// Only the filtered participant pauses; the rest pass straight
/// through to aggregation.
#[tokio::test]
async fn test_request_info_filter_limits_pauses() {
    let wf = ConcurrentBuilder::new()
        .participants(vec![
            ScriptedAgent::new("alpha", "a"),
            ScriptedAgent::new("beta", "b"),
        ])
        .with_request_info_for(vec!["beta".to_string()])
        .build()
        .unwrap();

    let paused = wf.run(&"go".to_string()).await.unwrap();
    let requests = paused.request_info_events();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].data["target_agent_id"], json!("beta"));

    let mut responses = HashMap::new();
    responses.insert(
        requests[0].request_id.clone(),
        serde_json::to_value(AgentInputResponse::approve()).unwrap(),
    );
    let result = wf.send_responses(responses).await.unwrap();
    assert_eq!(result.get_final_state(), Some(WorkflowRunState::Idle));
    assert_eq!(result.get_outputs().len(), 1);
}
