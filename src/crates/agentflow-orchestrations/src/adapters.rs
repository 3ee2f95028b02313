//! Small conversation-plumbing executors shared by the builders.

use agentflow_core::{
    AgentExecutorRequest, AgentExecutorResponse, ChatMessage, FnExecutor, HandlerRegistry,
    WorkflowContext, WorkflowMessage,
};
use std::sync::Arc;

/// Normalizes a run input (string, conversation, or ready-made request)
/// into an [`AgentExecutorRequest`].
pub fn conversation_input(id: &str) -> Arc<FnExecutor> {
    let registry = HandlerRegistry::new()
        .on::<AgentExecutorRequest, _, _>(
            |request: AgentExecutorRequest, ctx: WorkflowContext| async move {
                ctx.send_message(&request)?;
                Ok(())
            },
        )
        .on::<Vec<ChatMessage>, _, _>(
            |conversation: Vec<ChatMessage>, ctx: WorkflowContext| async move {
                ctx.send_message(&AgentExecutorRequest::respond_to(conversation))?;
                Ok(())
            },
        )
        .on::<String, _, _>(|text: String, ctx: WorkflowContext| async move {
            ctx.send_message(&AgentExecutorRequest::respond_to(vec![ChatMessage::user(
                text,
            )]))?;
            Ok(())
        });
    Arc::new(
        FnExecutor::new(id, registry)
            .with_output_types(vec![AgentExecutorRequest::descriptor()]),
    )
}

/// Turns a participant's response into the next participant's request,
/// threading the full conversation.
pub fn response_to_request(id: &str) -> Arc<FnExecutor> {
    let registry = HandlerRegistry::new().on::<AgentExecutorResponse, _, _>(
        |response: AgentExecutorResponse, ctx: WorkflowContext| async move {
            ctx.send_message(&AgentExecutorRequest::respond_to(
                response.full_conversation,
            ))?;
            Ok(())
        },
    );
    Arc::new(
        FnExecutor::new(id, registry)
            .with_output_types(vec![AgentExecutorRequest::descriptor()]),
    )
}

/// Yields the accumulated conversation as the workflow output.
pub fn conversation_output(id: &str) -> Arc<FnExecutor> {
    let registry = HandlerRegistry::new().on::<AgentExecutorResponse, _, _>(
        |response: AgentExecutorResponse, ctx: WorkflowContext| async move {
            ctx.yield_output(&response.full_conversation)?;
            Ok(())
        },
    );
    Arc::new(FnExecutor::new(id, registry))
}
