//! Concurrent orchestration: one input fans out to every participant;
//! an aggregator fans their responses back in.

use crate::adapters::conversation_input;
use crate::request_info::{resolve_request_info_filter, RequestInfoInterceptor};
use agentflow_core::{
    Agent, AgentExecutor, AgentExecutorResponse, FnExecutor, HandlerRegistry, Result, Workflow,
    WorkflowBuilder, WorkflowContext, WorkflowError,
};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// Reducer invoked with every participant's response once all have
/// answered. May itself call out (e.g. to a chat client) to synthesize.
pub type ConcurrentReducer =
    Arc<dyn Fn(Vec<AgentExecutorResponse>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Builds a fan-out/fan-in workflow over participants.
///
/// The dispatcher copies one input request to all participants; the
/// aggregator receives the list of their responses (every participant
/// answers exactly once per round, so the list carries one entry per
/// participant) and yields either the raw list or the reducer's value.
pub struct ConcurrentBuilder {
    participants: Vec<Arc<dyn Agent>>,
    reducer: Option<ConcurrentReducer>,
    request_info_filter: Option<Option<Vec<String>>>,
    name: Option<String>,
}

impl Default for ConcurrentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrentBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            participants: Vec::new(),
            reducer: None,
            request_info_filter: None,
            name: None,
        }
    }

    /// Set the participants.
    pub fn participants(mut self, participants: Vec<Arc<dyn Agent>>) -> Self {
        self.participants = participants;
        self
    }

    /// Append one participant.
    pub fn add_participant(mut self, participant: Arc<dyn Agent>) -> Self {
        self.participants.push(participant);
        self
    }

    /// Replace the default list output with a custom reducer.
    pub fn with_reducer(mut self, reducer: ConcurrentReducer) -> Self {
        self.reducer = Some(reducer);
        self
    }

    /// Pause every participant's output for human review before
    /// aggregation.
    pub fn with_request_info(mut self) -> Self {
        self.request_info_filter = Some(None);
        self
    }

    /// Pause only the named participants' outputs.
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
                "concurrent orchestration requires at least one participant",
            ));
        }

        let filter = self
            .request_info_filter
            .as_ref()
            .map(|names| resolve_request_info_filter(names.as_deref()));

        let reducer = self.reducer;
        let aggregator_registry = HandlerRegistry::new().on::<Vec<AgentExecutorResponse>, _, _>(
            move |responses: Vec<AgentExecutorResponse>, ctx: WorkflowContext| {
                let reducer = reducer.clone();
                async move {
                    match reducer {
                        Some(reduce) => {
                            let value = reduce(responses).await?;
                            ctx.yield_output(&value)?;
                        }
                        None => ctx.yield_output(&responses)?,
                    }
                    Ok(())
                }
            },
        );
        let aggregator = Arc::new(FnExecutor::new("aggregator", aggregator_registry));

        let mut builder = WorkflowBuilder::new()
            .with_name(
                self.name
                    .unwrap_or_else(|| "concurrent-orchestration".to_string()),
            )
            .start_with(conversation_input("dispatcher"))
            .register_executor(aggregator);

        let mut participant_ids = Vec::new();
        let mut fan_in_sources = Vec::new();
        for agent in self.participants {
            let agent_id = agent.name().to_string();
            builder = builder.register_executor(Arc::new(AgentExecutor::from_agent(agent)));

            let tail = if let Some(filter) = &filter {
                let interceptor_id = format!("request_info:{agent_id}");
                let mut interceptor = RequestInfoInterceptor::with_executor_id(&interceptor_id);
                if let Some(filter) = filter {
                    interceptor = interceptor.with_agent_filter(filter.clone());
                }
                builder = builder
                    .register_executor(Arc::new(interceptor))
                    .add_edge(agent_id.clone(), interceptor_id.clone());
                interceptor_id
            } else {
                agent_id.clone()
            };

            participant_ids.push(agent_id);
            fan_in_sources.push(tail);
        }

        builder = builder
            .add_fan_out_edges("dispatcher", participant_ids)
            .add_fan_in_edges(fan_in_sources, "aggregator");

        builder.build()
    }
}
