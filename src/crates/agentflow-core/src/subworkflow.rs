//! Sub-workflows: a child workflow embedded as an executor.
//!
//! A [`SubWorkflowExecutor`] starts a nested run of its child workflow
//! for every inbound message. While the child runs:
//!
//! - outputs the child yields become outbound messages from this
//!   executor, so parent edges can route them;
//! - the child's streaming events are forwarded into the parent's event
//!   stream (agent updates and custom events as-is, lifecycle events
//!   wrapped in a custom event annotated with this executor's id);
//! - pending-request events propagate upward re-keyed to this executor,
//!   and responses addressed to this executor are forwarded back down
//!   into the child.
//!
//! The child's shared state is isolated from the parent's.

use crate::context::WorkflowContext;
use crate::envelope::{Envelope, WorkflowMessage};
use crate::error::{Result, WorkflowError};
use crate::event::{EventKind, WorkflowEvent, WorkflowRunState};
use crate::executor::Executor;
use crate::request_info::RequestResponse;
use crate::typing::TypeDescriptor;
use crate::workflow::{Workflow, WorkflowEventStream};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;

/// An executor that encapsulates a child [`Workflow`].
pub struct SubWorkflowExecutor {
    id: String,
    child: Workflow,
}

impl SubWorkflowExecutor {
    /// Embed a child workflow under the given executor id.
    pub fn new(child: Workflow, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            child,
        }
    }

    /// The embedded child workflow.
    pub fn child(&self) -> &Workflow {
        &self.child
    }

    /// Drain a child event stream, forwarding into the parent context.
    /// Returns the child's terminal state.
    async fn forward_child_events(
        &self,
        mut stream: WorkflowEventStream,
        ctx: &WorkflowContext,
    ) -> Result<WorkflowRunState> {
        let mut terminal = WorkflowRunState::Idle;
        let mut failure: Option<String> = None;

        while let Some(event) = stream.next().await {
            match event.kind {
                EventKind::WorkflowOutput { data, .. } => {
                    // Child outputs become this executor's outbound
                    // messages.
                    let envelope =
                        Envelope::from_parts("any".to_string(), TypeDescriptor::Any, data);
                    ctx.send_envelope(envelope, None);
                }
                EventKind::RequestInfo(info) => {
                    // Propagate upward, re-keyed to this executor so the
                    // parent routes the response back here.
                    if let Some(mut pending) =
                        self.child.pending_requests().remove(&info.request_id)
                    {
                        pending.source_executor_id = self.id.clone();
                        let event = pending.to_event();
                        ctx.runner().add_pending_request(pending);
                        ctx.emit_event(WorkflowEvent::executor(EventKind::RequestInfo(event)));
                    }
                }
                EventKind::Status { state } => {
                    if state.is_terminal() {
                        terminal = state;
                    }
                }
                EventKind::WorkflowFailed { error } => {
                    failure = Some(error);
                }
                EventKind::WorkflowStarted => {}
                kind @ (EventKind::AgentRunUpdate { .. } | EventKind::Custom { .. }) => {
                    ctx.emit_event(WorkflowEvent {
                        origin: event.origin,
                        kind,
                    });
                }
                kind => {
                    // Lifecycle events forwarded annotated with this
                    // executor's id.
                    ctx.add_event(
                        "subworkflow_event",
                        serde_json::json!({
                            "subworkflow": self.id,
                            "event": serde_json::to_value(&kind)?,
                        }),
                    );
                }
            }
        }

        if let Some(error) = failure {
            return Err(WorkflowError::executor_failure(&self.id, error));
        }
        Ok(terminal)
    }
}

#[async_trait]
impl Executor for SubWorkflowExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    fn input_types(&self) -> Vec<TypeDescriptor> {
        vec![RequestResponse::descriptor(), TypeDescriptor::Any]
    }

    async fn handle(&self, envelope: Envelope, ctx: WorkflowContext) -> Result<()> {
        let stream = if envelope.is::<RequestResponse>() {
            // A response for a request the child propagated upward:
            // forward it down and continue the child run.
            let response: RequestResponse = envelope.decode()?;
            let mut responses: HashMap<String, Value> = HashMap::new();
            responses.insert(response.request_id.clone(), response.data.clone());
            self.child.send_responses_stream(responses).await?
        } else {
            self.child.run_stream_envelope(envelope).await?
        };

        let terminal = self.forward_child_events(stream, &ctx).await?;
        tracing::debug!(
            subworkflow = %self.id,
            child_id = %self.child.id(),
            ?terminal,
            "child workflow quiesced"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::executor_fn;
    use crate::workflow::WorkflowBuilder;

    fn child_workflow() -> Workflow {
        let counter = executor_fn("count_words", |text: String, ctx: WorkflowContext| {
            async move {
                ctx.yield_output(&(text.split_whitespace().count() as u64))?;
                Ok(())
            }
        });
        WorkflowBuilder::new()
            .start_with(counter)
            .with_name("word-counter")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_child_outputs_become_parent_messages() {
        let sub = std::sync::Arc::new(SubWorkflowExecutor::new(child_workflow(), "counter"));
        let sink = executor_fn("sink", |count: u64, ctx: WorkflowContext| async move {
            ctx.yield_output(&count)?;
            Ok(())
        });

        let wf = WorkflowBuilder::new()
            .start_with(sub)
            .register_executor(sink)
            .add_edge("counter", "sink")
            .build()
            .unwrap();

        let result = wf.run(&"one two three".to_string()).await.unwrap();
        assert_eq!(result.get_outputs(), vec![serde_json::json!(3)]);
    }

    #[tokio::test]
    async fn test_child_shared_state_is_isolated() {
        let writer = executor_fn("writer", |text: String, ctx: WorkflowContext| async move {
            ctx.set_shared_state("child_key", "child_value").await?;
            ctx.yield_output(&text)?;
            Ok(())
        });
        let child = WorkflowBuilder::new().start_with(writer).build().unwrap();
        let sub = std::sync::Arc::new(SubWorkflowExecutor::new(child, "sub"));

        let wf = WorkflowBuilder::new().start_with(sub).build().unwrap();
        wf.run(&"x".to_string()).await.unwrap();

        assert!(wf.shared_state().get("child_key").await.is_none());
    }
}
