//! Sequential orchestration: participants run in order, each seeing the
//! conversation accumulated so far.

use crate::adapters::{conversation_input, conversation_output, response_to_request};
use crate::request_info::{resolve_request_info_filter, RequestInfoInterceptor};
use agentflow_core::{
    Agent, AgentExecutor, Result, Workflow, WorkflowBuilder, WorkflowError,
};
use std::sync::Arc;

/// Builds a pipeline workflow over ordered participants.
///
/// The input (a string or a conversation) becomes the first
/// participant's request; each participant's `full_conversation` feeds
/// the next; the final output is the accumulated conversation list.
///
/// ```rust,ignore
/// let workflow = SequentialBuilder::new()
///     .participants(vec![writer, reviewer])
///     .build()?;
/// let result = workflow.run(&"hello".to_string()).await?;
/// ```
pub struct SequentialBuilder {
    participants: Vec<Arc<dyn Agent>>,
    request_info_filter: Option<Option<Vec<String>>>,
    name: Option<String>,
}

impl Default for SequentialBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SequentialBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            participants: Vec::new(),
            request_info_filter: None,
            name: None,
        }
    }

    /// Set the ordered participants.
    pub fn participants(mut self, participants: Vec<Arc<dyn Agent>>) -> Self {
        self.participants = participants;
        self
    }

    /// Append one participant.
    pub fn add_participant(mut self, participant: Arc<dyn Agent>) -> Self {
        self.participants.push(participant);
        self
    }

    /// Pause every participant's output for human review.
    pub fn with_request_info(mut self) -> Self {
        self.request_info_filter = Some(None);
        self
    }

    /// Pause only the named participants' outputs for human review.
    pub fn with_request_info_for(mut self, participants: Vec<String>) -> Self {
        self.request_info_filter = Some(Some(participants));
        self
    }

    /// Set the workflow name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Assemble and validate the workflow.
    pub fn build(self) -> Result<Workflow> {
        if self.participants.is_empty() {
            return Err(WorkflowError::validation(
                "sequential orchestration requires at least one participant",
            ));
        }

        let filter = self
            .request_info_filter
            .as_ref()
            .map(|names| resolve_request_info_filter(names.as_deref()));

        let mut builder = WorkflowBuilder::new()
            .with_name(
                self.name
                    .unwrap_or_else(|| "sequential-orchestration".to_string()),
            )
            .start_with(conversation_input("conversation_input"))
            .register_executor(conversation_output("conversation_output"));

        let mut upstream = "conversation_input".to_string();
        let last_index = self.participants.len() - 1;
        for (index, agent) in self.participants.into_iter().enumerate() {
            let agent_id = agent.name().to_string();
            builder = builder
                .register_executor(Arc::new(AgentExecutor::from_agent(agent)))
                .add_edge(upstream.clone(), agent_id.clone());

            // Optionally pause this participant's output before it moves
            // on.
            let mut stage_tail = agent_id.clone();
            if let Some(filter) = &filter {
                let interceptor_id = format!("request_info:{agent_id}");
                let mut interceptor = RequestInfoInterceptor::with_executor_id(&interceptor_id);
                if let Some(filter) = filter {
                    interceptor = interceptor.with_agent_filter(filter.clone());
                }
                builder = builder
                    .register_executor(Arc::new(interceptor))
                    .add_edge(stage_tail, interceptor_id.clone());
                stage_tail = interceptor_id;
            }

            if index == last_index {
                builder = builder.add_edge(stage_tail, "conversation_output");
            } else {
                let adapter_id = format!("to_request_{index}");
                builder = builder
                    .register_executor(response_to_request(&adapter_id))
                    .add_edge(stage_tail, adapter_id.clone());
                upstream = adapter_id;
            }
        }

        builder.build()
    }
}
