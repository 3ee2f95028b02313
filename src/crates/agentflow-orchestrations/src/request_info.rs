//! The request-info interceptor used by `.with_request_info(...)`.
//!
//! An interceptor sits on the edge between a participant and whatever
//! consumes its output. For participants matching the filter, the
//! participant's output — an [`AgentExecutorResponse`], or the
//! conversation-carrying [`AgentExecutorRequest`] a handoff specialist
//! hands back — is parked and an [`AgentInputRequest`] pause is raised;
//! the human's [`AgentInputResponse`] either releases the output as-is
//! or injects steering messages first. Participants outside the filter
//! pass through untouched.

use agentflow_core::{
    AgentExecutorRequest, AgentExecutorResponse, AgentInputRequest, AgentInputResponse,
    ChatMessage, Envelope, Executor, RequestResponse, Result, Role, TypeDescriptor,
    WorkflowContext, WorkflowError, WorkflowMessage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Resolve an optional participant filter into a set of names.
///
/// `None` or an empty list means "pause for everyone".
pub fn resolve_request_info_filter(participants: Option<&[String]>) -> Option<HashSet<String>> {
    let participants = participants?;
    if participants.is_empty() {
        return None;
    }
    Some(participants.iter().cloned().collect())
}

/// The participant output an interceptor has parked while awaiting a
/// verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum ParkedOutput {
    Response(AgentExecutorResponse),
    Request(AgentExecutorRequest),
}

/// Executor that pauses selected participants' outputs for review.
pub struct RequestInfoInterceptor {
    id: String,
    agent_filter: Option<HashSet<String>>,
}

impl Default for RequestInfoInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestInfoInterceptor {
    /// Create an interceptor with a generated id.
    pub fn new() -> Self {
        Self {
            id: format!("request_info_interceptor-{}", Uuid::new_v4().simple()),
            agent_filter: None,
        }
    }

    /// Create an interceptor with an explicit id.
    pub fn with_executor_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_filter: None,
        }
    }

    /// Restrict pauses to the given participants.
    pub fn with_agent_filter(mut self, agent_filter: HashSet<String>) -> Self {
        self.agent_filter = Some(agent_filter);
        self
    }

    /// Should this interceptor pause for the given participant?
    ///
    /// Prefixed executor ids (`"groupchat_agent:writer"`) match on the
    /// segment after the colon.
    pub fn should_pause_for_agent(&self, agent_id: Option<&str>) -> bool {
        let Some(filter) = &self.agent_filter else {
            return true;
        };
        let Some(agent_id) = agent_id else {
            return false;
        };
        if filter.contains(agent_id) {
            return true;
        }
        agent_id
            .rsplit(':')
            .next()
            .map(|name| filter.contains(name))
            .unwrap_or(false)
    }

    fn park_and_pause(
        &self,
        agent_id: &str,
        conversation: Vec<ChatMessage>,
        parked: ParkedOutput,
        ctx: &WorkflowContext,
    ) -> Result<()> {
        let request = AgentInputRequest::new(agent_id).with_conversation(conversation);
        ctx.set_state(serde_json::to_value(&parked)?);
        ctx.request_info::<AgentInputRequest, AgentInputResponse>(&request)?;
        Ok(())
    }
}

#[async_trait]
impl Executor for RequestInfoInterceptor {
    fn id(&self) -> &str {
        &self.id
    }

    fn input_types(&self) -> Vec<TypeDescriptor> {
        vec![
            AgentExecutorResponse::descriptor(),
            AgentExecutorRequest::descriptor(),
            RequestResponse::descriptor(),
        ]
    }

    fn output_types(&self) -> Vec<TypeDescriptor> {
        // Outputs mirror whichever input was intercepted; deliveries are
        // gated per message.
        Vec::new()
    }

    async fn handle(&self, envelope: Envelope, ctx: WorkflowContext) -> Result<()> {
        if envelope.is::<RequestResponse>() {
            let response: RequestResponse = envelope.decode()?;
            let decision: AgentInputResponse = response.data_as()?;
            let parked: ParkedOutput = ctx
                .get_state()
                .map(serde_json::from_value)
                .transpose()?
                .ok_or_else(|| {
                    WorkflowError::Custom("no parked output awaiting review".to_string())
                })?;

            let injected = match decision {
                AgentInputResponse::Approve => Vec::new(),
                AgentInputResponse::InjectMessages { messages } => messages,
            };
            match parked {
                ParkedOutput::Response(mut released) => {
                    released.full_conversation.extend(injected);
                    ctx.send_message(&released)?;
                }
                ParkedOutput::Request(mut released) => {
                    released.messages.extend(injected);
                    ctx.send_message(&released)?;
                }
            }
            return Ok(());
        }

        if envelope.is::<AgentExecutorResponse>() {
            let response: AgentExecutorResponse = envelope.decode()?;
            if !self.should_pause_for_agent(Some(&response.executor_id)) {
                ctx.send_message(&response)?;
                return Ok(());
            }
            let agent_id = response.executor_id.clone();
            let conversation = response.full_conversation.clone();
            return self.park_and_pause(
                &agent_id,
                conversation,
                ParkedOutput::Response(response),
                &ctx,
            );
        }

        // A conversation-carrying request handed back by a specialist:
        // attribute it to the last assistant author.
        let request: AgentExecutorRequest = envelope.decode()?;
        let agent_id = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .and_then(|m| m.author_name.clone());
        if !self.should_pause_for_agent(agent_id.as_deref()) {
            ctx.send_message(&request)?;
            return Ok(());
        }
        let agent_id = agent_id.unwrap_or_default();
        let conversation = request.messages.clone();
        self.park_and_pause(&agent_id, conversation, ParkedOutput::Request(request), &ctx)
    }
}
