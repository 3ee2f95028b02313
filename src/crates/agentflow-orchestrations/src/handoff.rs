//! Handoff orchestration: a coordinator routes work to specialists via
//! tool-like "handoff" calls embedded in agent replies.
//!
//! Every participant's reply is scanned for a function call named
//! `handoff_to_<participant>`. The coordinator hands off to the named
//! specialist; a specialist hands back to the coordinator. In
//! autonomous mode a specialist iterates multiple turns until it emits
//! a handoff call, bounded by a per-agent turn cap (default
//! [`DEFAULT_TURN_CAP`]).

use agentflow_core::{
    Agent, AgentExecutorRequest, ChatMessage, Content, Envelope, Executor, Result, TypeDescriptor,
    Workflow, WorkflowBuilder, WorkflowContext, WorkflowError, WorkflowMessage,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Default per-agent turn cap in autonomous mode.
pub const DEFAULT_TURN_CAP: usize = 50;

/// Extract the handoff target from a reply, if any: the suffix of the
/// first function call named `handoff_to_<target>`.
pub fn handoff_target(message: &ChatMessage) -> Option<String> {
    message.contents.iter().find_map(|content| match content {
        Content::FunctionCall { name, .. } => name
            .strip_prefix("handoff_to_")
            .map(|target| target.to_string()),
        _ => None,
    })
}

/// The coordinator: runs its agent over the conversation and either
/// hands off to a specialist or finishes the workflow with the full
/// conversation.
struct CoordinatorExecutor {
    id: String,
    agent: Arc<dyn Agent>,
    specialist_ids: Vec<String>,
}

#[async_trait]
impl Executor for CoordinatorExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    fn input_types(&self) -> Vec<TypeDescriptor> {
        vec![
            AgentExecutorRequest::descriptor(),
            TypeDescriptor::String,
        ]
    }

    fn output_types(&self) -> Vec<TypeDescriptor> {
        vec![AgentExecutorRequest::descriptor()]
    }

    async fn handle(&self, envelope: Envelope, ctx: WorkflowContext) -> Result<()> {
        let mut conversation = if envelope.is::<AgentExecutorRequest>() {
            envelope.decode::<AgentExecutorRequest>()?.messages
        } else {
            vec![ChatMessage::user(envelope.decode::<String>()?)]
        };

        let response = self.agent.run(&conversation).await?;
        conversation.extend(response.messages.iter().cloned());

        let target = response.messages.iter().find_map(handoff_target);
        match target {
            Some(target) if self.specialist_ids.contains(&target) => {
                tracing::debug!(coordinator = %self.id, specialist = %target, "handoff");
                ctx.send_message_to(&AgentExecutorRequest::respond_to(conversation), target)?;
            }
            Some(unknown) => {
                return Err(WorkflowError::Custom(format!(
                    "handoff to unknown specialist '{unknown}'"
                )));
            }
            None => {
                // No handoff: the conversation is the final output.
                ctx.yield_output(&conversation)?;
            }
        }
        Ok(())
    }
}

/// A specialist: iterates its agent until it emits a handoff call (or
/// immediately hands back in single-turn mode), bounded by the turn
/// cap.
struct SpecialistExecutor {
    id: String,
    agent: Arc<dyn Agent>,
    /// Where finished conversations go: the coordinator, or a
    /// request-info interceptor in front of it.
    handback_target: String,
    autonomous: bool,
    turn_cap: usize,
}

#[async_trait]
impl Executor for SpecialistExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    fn input_types(&self) -> Vec<TypeDescriptor> {
        vec![AgentExecutorRequest::descriptor()]
    }

    fn output_types(&self) -> Vec<TypeDescriptor> {
        vec![AgentExecutorRequest::descriptor()]
    }

    async fn handle(&self, envelope: Envelope, ctx: WorkflowContext) -> Result<()> {
        let mut conversation = envelope.decode::<AgentExecutorRequest>()?.messages;
        let max_turns = if self.autonomous { self.turn_cap } else { 1 };

        for turn in 1..=max_turns {
            let response = self.agent.run(&conversation).await?;
            conversation.extend(response.messages.iter().cloned());

            let wants_handoff = response.messages.iter().any(|m| handoff_target(m).is_some());
            if wants_handoff || !self.autonomous {
                tracing::debug!(specialist = %self.id, turn, "handing back");
                break;
            }
            if turn == max_turns {
                tracing::warn!(specialist = %self.id, turn_cap = self.turn_cap, "turn cap reached");
            }
        }

        ctx.send_message_to(
            &AgentExecutorRequest::respond_to(conversation),
            &self.handback_target,
        )?;
        Ok(())
    }
}

/// Builds a coordinator-plus-specialists handoff workflow.
pub struct HandoffBuilder {
    coordinator: Option<Arc<dyn Agent>>,
    specialists: Vec<Arc<dyn Agent>>,
    autonomous: bool,
    turn_cap: usize,
    request_info_filter: Option<Option<Vec<String>>>,
    name: Option<String>,
}

impl Default for HandoffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HandoffBuilder {
    /// Create an empty builder (single-turn specialists,
    /// [`DEFAULT_TURN_CAP`] autonomous cap).
    pub fn new() -> Self {
        Self {
            coordinator: None,
            specialists: Vec::new(),
            autonomous: false,
            turn_cap: DEFAULT_TURN_CAP,
            request_info_filter: None,
            name: None,
        }
    }

    /// Set the coordinator agent.
    pub fn coordinator(mut self, coordinator: Arc<dyn Agent>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Set the specialist agents.
    pub fn specialists(mut self, specialists: Vec<Arc<dyn Agent>>) -> Self {
        self.specialists = specialists;
        self
    }

    /// Let specialists iterate multiple turns until they hand off.
    pub fn autonomous(mut self) -> Self {
        self.autonomous = true;
        self
    }

    /// Override the per-agent turn cap used in autonomous mode.
    pub fn with_turn_cap(mut self, turn_cap: usize) -> Self {
        self.turn_cap = turn_cap;
        self
    }

    /// Pause every specialist's handed-back conversation for human
    /// review before the coordinator resumes.
    pub fn with_request_info(mut self) -> Self {
        self.request_info_filter = Some(None);
        self
    }

    /// Pause only the named specialists' handbacks.
    pub fn with_request_info_for(mut self, specialists: Vec<String>) -> Self {
        self.request_info_filter = Some(Some(specialists));
        self
    }

    /// Set the workflow name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Assemble and validate the workflow.
    pub fn build(self) -> Result<Workflow> {
        let coordinator_agent = self
            .coordinator
            .ok_or_else(|| WorkflowError::validation("handoff requires a coordinator"))?;
        if self.specialists.is_empty() {
            return Err(WorkflowError::validation(
                "handoff requires at least one specialist",
            ));
        }

        let specialist_ids: Vec<String> = self
            .specialists
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        let coordinator = Arc::new(CoordinatorExecutor {
            id: "handoff_coordinator".to_string(),
            agent: coordinator_agent,
            specialist_ids: specialist_ids.clone(),
        });

        let filter = self
            .request_info_filter
            .as_ref()
            .map(|names| crate::request_info::resolve_request_info_filter(names.as_deref()));

        let mut builder = WorkflowBuilder::new()
            .with_name(self.name.unwrap_or_else(|| "handoff".to_string()))
            .start_with(coordinator);

        for (agent, id) in self.specialists.into_iter().zip(specialist_ids) {
            // With review enabled, handbacks route through an
            // interceptor before reaching the coordinator.
            let handback_target = match &filter {
                Some(_) => format!("request_info:{id}"),
                None => "handoff_coordinator".to_string(),
            };
            if let Some(filter) = &filter {
                let mut interceptor =
                    crate::request_info::RequestInfoInterceptor::with_executor_id(
                        &handback_target,
                    );
                if let Some(filter) = filter {
                    interceptor = interceptor.with_agent_filter(filter.clone());
                }
                builder = builder
                    .register_executor(Arc::new(interceptor))
                    .add_edge(handback_target.clone(), "handoff_coordinator");
            }
            builder = builder
                .register_executor(Arc::new(SpecialistExecutor {
                    id: id.clone(),
                    agent,
                    handback_target: handback_target.clone(),
                    autonomous: self.autonomous,
                    turn_cap: self.turn_cap,
                }))
                .add_edge("handoff_coordinator", id.clone())
                .add_edge(id, handback_target);
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::{AgentResponse, Role};
    use serde_json::json;

    fn handoff_call(target: &str) -> ChatMessage {
        ChatMessage::from_contents(
            Role::Assistant,
            vec![
                Content::text(format!("routing to {target}")),
                Content::FunctionCall {
                    call_id: "call-1".to_string(),
                    name: format!("handoff_to_{target}"),
                    arguments: json!({}),
                },
            ],
        )
    }

    /// Coordinator that hands off on first contact, then finishes.
    struct Router;

    #[async_trait]
    impl Agent for Router {
        fn id(&self) -> &str {
            "router"
        }

        async fn run(&self, messages: &[ChatMessage]) -> Result<AgentResponse> {
            let seen_specialist = messages
                .iter()
                .any(|m| m.author_name.as_deref() == Some("billing"));
            let reply = if seen_specialist {
                ChatMessage::assistant("all resolved").with_author_name("router")
            } else {
                handoff_call("billing")
            };
            Ok(AgentResponse::new(vec![reply]))
        }
    }

    /// Specialist that works for a few turns, then hands back.
    struct Billing {
        turns_before_handoff: usize,
    }

    #[async_trait]
    impl Agent for Billing {
        fn id(&self) -> &str {
            "billing"
        }

        async fn run(&self, messages: &[ChatMessage]) -> Result<AgentResponse> {
            let own_turns = messages
                .iter()
                .filter(|m| m.author_name.as_deref() == Some("billing"))
                .count();
            let reply = if own_turns + 1 >= self.turns_before_handoff {
                let mut msg = handoff_call("handoff_coordinator");
                msg.author_name = Some("billing".to_string());
                msg
            } else {
                ChatMessage::assistant(format!("billing step {}", own_turns + 1))
                    .with_author_name("billing")
            };
            Ok(AgentResponse::new(vec![reply]))
        }
    }

    #[tokio::test]
    async fn test_single_turn_handoff_round_trip() {
        let wf = HandoffBuilder::new()
            .coordinator(Arc::new(Router))
            .specialists(vec![Arc::new(Billing {
                turns_before_handoff: 1,
            }) as Arc<dyn Agent>])
            .build()
            .unwrap();

        let result = wf.run(&"refund please".to_string()).await.unwrap();
        let conversations: Vec<Vec<ChatMessage>> = result.outputs_as().unwrap();
        let conversation = &conversations[0];

        // user, router handoff, billing reply, router wrap-up.
        assert_eq!(conversation[0].role, Role::User);
        assert!(conversation
            .iter()
            .any(|m| m.author_name.as_deref() == Some("billing")));
        assert_eq!(conversation.last().unwrap().text(), "all resolved");
    }

    #[tokio::test]
    async fn test_autonomous_specialist_iterates_until_handoff() {
        let wf = HandoffBuilder::new()
            .coordinator(Arc::new(Router))
            .specialists(vec![Arc::new(Billing {
                turns_before_handoff: 3,
            }) as Arc<dyn Agent>])
            .autonomous()
            .build()
            .unwrap();

        let result = wf.run(&"refund please".to_string()).await.unwrap();
        let conversations: Vec<Vec<ChatMessage>> = result.outputs_as().unwrap();
        let billing_turns = conversations[0]
            .iter()
            .filter(|m| m.author_name.as_deref() == Some("billing"))
            .count();
        assert_eq!(billing_turns, 3);
    }

    #[tokio::test]
    async fn test_turn_cap_bounds_autonomous_iteration() {
        // A specialist that never hands off stops at the cap.
        let wf = HandoffBuilder::new()
            .coordinator(Arc::new(Router))
            .specialists(vec![Arc::new(Billing {
                turns_before_handoff: usize::MAX,
            }) as Arc<dyn Agent>])
            .autonomous()
            .with_turn_cap(4)
            .build()
            .unwrap();

        let result = wf.run(&"refund please".to_string()).await.unwrap();
        let conversations: Vec<Vec<ChatMessage>> = result.outputs_as().unwrap();
        let billing_turns = conversations[0]
            .iter()
            .filter(|m| m.author_name.as_deref() == Some("billing"))
            .count();
        assert_eq!(billing_turns, 4);
    }

    #[tokio::test]
    async fn test_request_info_pauses_handback() {
        use agentflow_core::{AgentInputResponse, WorkflowRunState};
        use std::collections::HashMap;

        let wf = HandoffBuilder::new()
            .coordinator(Arc::new(Router))
            .specialists(vec![Arc::new(Billing {
                turns_before_handoff: 1,
            }) as Arc<dyn Agent>])
            .with_request_info()
            .build()
            .unwrap();

        let paused = wf.run(&"refund please".to_string()).await.unwrap();
        assert_eq!(
            paused.get_final_state(),
            Some(WorkflowRunState::IdleWithPendingRequests)
        );
        let request = &paused.request_info_events()[0];
        assert_eq!(request.data["target_agent_id"], json!("billing"));

        let mut responses = HashMap::new();
        responses.insert(
            request.request_id.clone(),
            serde_json::to_value(AgentInputResponse::approve()).unwrap(),
        );
        let result = wf.send_responses(responses).await.unwrap();
        assert_eq!(result.get_final_state(), Some(WorkflowRunState::Idle));
        let conversations: Vec<Vec<ChatMessage>> = result.outputs_as().unwrap();
        assert_eq!(conversations[0].last().unwrap().text(), "all resolved");
    }

    #[test]
    fn test_handoff_target_extraction() {
        assert_eq!(handoff_target(&handoff_call("legal")).as_deref(), Some("legal"));
        assert_eq!(handoff_target(&ChatMessage::assistant("plain")), None);
    }
}
