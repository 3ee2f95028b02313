//! Agent and chat-client contracts, and the agent-backed executor.
//!
//! Providers live outside this crate. The runtime only sees:
//!
//! - [`ChatClient`] — produces a response (or a stream of updates) from a
//!   sequence of messages plus [`ChatOptions`]. Options a provider does
//!   not support are ignored.
//! - [`Agent`] — `run(messages) → response` / `run_stream(messages) →
//!   updates`, plus a session factory for providers that keep
//!   server-side conversation state.
//! - [`ContextProvider`] — optional `before_run`/`after_run` hooks.
//!
//! [`AgentExecutor`] adapts any [`Agent`] into a workflow executor with
//! the two canonical handler shapes: an [`AgentExecutorRequest`] carrying
//! a conversation, or a free-form string wrapped as a single user
//! message. While the agent streams, the executor emits `AgentRunUpdate`
//! events grouped by a stable response id; on completion it sends an
//! [`AgentExecutorResponse`] whose `full_conversation` is exactly the
//! inbound conversation plus the agent's reply, with replayed messages
//! de-duplicated by message id.

use crate::context::WorkflowContext;
use crate::envelope::{Envelope, WorkflowMessage};
use crate::error::Result;
use crate::event::{EventKind, WorkflowEvent};
use crate::executor::Executor;
use crate::message::{ChatMessage, Role};
use crate::typing::TypeDescriptor;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Options passed to a chat client. Providers ignore options they do not
/// support.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Model identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Tool definitions offered to the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    /// Tool-choice directive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    /// Response format directive (e.g. JSON schema).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    /// Frequency penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    /// Presence penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// Whether the model may emit several tool calls per turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_multiple_tool_calls: Option<bool>,
    /// Provider-specific extensions.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

/// A complete chat-client response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Messages produced by the model.
    pub messages: Vec<ChatMessage>,
    /// Stable response id.
    pub response_id: String,
    /// Model that produced the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

/// An incremental chat-client update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponseUpdate {
    /// Incremental text.
    pub text: String,
    /// Stable id grouping the updates of one response.
    pub response_id: String,
    /// Author name, when advertised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    /// Finish sentinel: `true` on the last update of a response.
    #[serde(default)]
    pub is_final: bool,
}

/// External collaborator: a chat completion client.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Produce a complete response for a conversation.
    async fn get_response(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse>;

    /// Produce a stream of incremental updates. The default adapter
    /// materializes [`ChatClient::get_response`] as one final update per
    /// message.
    fn get_streaming_response<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &'a ChatOptions,
    ) -> BoxStream<'a, Result<ChatResponseUpdate>> {
        Box::pin(async_stream::try_stream! {
            let response = self.get_response(messages, options).await?;
            let total = response.messages.len();
            for (index, message) in response.messages.into_iter().enumerate() {
                yield ChatResponseUpdate {
                    text: message.text(),
                    response_id: response.response_id.clone(),
                    author_name: message.author_name.clone(),
                    is_final: index + 1 == total,
                };
            }
        })
    }
}

/// A complete agent response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Messages produced by the agent (usually one assistant message).
    pub messages: Vec<ChatMessage>,
    /// Stable response id.
    pub response_id: String,
}

impl AgentResponse {
    /// Build a response from messages with a fresh id.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            response_id: Uuid::new_v4().to_string(),
        }
    }

    /// Concatenated text of all response messages.
    pub fn text(&self) -> String {
        self.messages
            .iter()
            .map(ChatMessage::text)
            .collect::<Vec<_>>()
            .join("")
    }
}

/// An incremental agent update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponseUpdate {
    /// Incremental text.
    pub text: String,
    /// Stable id grouping the updates of one response.
    pub response_id: String,
    /// Author name, when advertised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    /// Finish sentinel.
    #[serde(default)]
    pub is_final: bool,
}

/// External collaborator: an agent.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique agent id.
    fn id(&self) -> &str;

    /// Display name; defaults to the id.
    fn name(&self) -> &str {
        self.id()
    }

    /// Run the agent over a conversation and return its response.
    async fn run(&self, messages: &[ChatMessage]) -> Result<AgentResponse>;

    /// Run the agent with streaming updates. The default adapter
    /// materializes [`Agent::run`] as a single final update.
    fn run_stream<'a>(
        &'a self,
        messages: &'a [ChatMessage],
    ) -> BoxStream<'a, Result<AgentResponseUpdate>> {
        Box::pin(async_stream::try_stream! {
            let response = self.run(messages).await?;
            yield AgentResponseUpdate {
                text: response.text(),
                response_id: response.response_id.clone(),
                author_name: Some(self.name().to_string()),
                is_final: true,
            };
        })
    }

    /// Create a fresh provider-side session id, for providers that keep
    /// server-side conversation state. Defaults to a local UUID.
    fn get_new_session(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Optional hooks invoked around each agent run.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Called before the agent runs; may inject extra messages into the
    /// conversation.
    async fn before_run(&self, agent_id: &str, messages: &mut Vec<ChatMessage>) -> Result<()>;

    /// Called after the agent runs; may persist a digest of the
    /// conversation.
    async fn after_run(&self, agent_id: &str, messages: &[ChatMessage]) -> Result<()>;
}

/// An [`Agent`] implemented over a [`ChatClient`] with fixed
/// instructions.
pub struct ChatAgent {
    id: String,
    name: String,
    instructions: Option<String>,
    client: Arc<dyn ChatClient>,
    options: ChatOptions,
    context_providers: Vec<Arc<dyn ContextProvider>>,
}

impl ChatAgent {
    /// Create a chat agent.
    pub fn new(id: impl Into<String>, client: Arc<dyn ChatClient>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            instructions: None,
            client,
            options: ChatOptions::default(),
            context_providers: Vec::new(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the system instructions prepended to every run.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Set the chat options used for every run.
    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach a context provider, invoked around every run.
    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context_providers.push(provider);
        self
    }

    fn prepare(&self, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut prepared = Vec::with_capacity(messages.len() + 1);
        if let Some(instructions) = &self.instructions {
            prepared.push(ChatMessage::system(instructions.clone()));
        }
        prepared.extend_from_slice(messages);
        prepared
    }
}

#[async_trait]
impl Agent for ChatAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, messages: &[ChatMessage]) -> Result<AgentResponse> {
        let mut prepared = self.prepare(messages);
        for provider in &self.context_providers {
            provider.before_run(&self.id, &mut prepared).await?;
        }
        let response = self.client.get_response(&prepared, &self.options).await?;
        let reply: Vec<ChatMessage> = response
            .messages
            .into_iter()
            .map(|m| m.with_author_name(self.name.clone()))
            .collect();

        let mut full = prepared;
        full.extend(reply.iter().cloned());
        for provider in &self.context_providers {
            provider.after_run(&self.id, &full).await?;
        }

        Ok(AgentResponse {
            messages: reply,
            response_id: response.response_id,
        })
    }
}

/// Inbound message for an agent-backed executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutorRequest {
    /// The conversation to run the agent over.
    pub messages: Vec<ChatMessage>,
    /// When `false`, the executor records the conversation but does not
    /// invoke the agent or emit a response.
    pub should_respond: bool,
}

impl AgentExecutorRequest {
    /// Request a response over a conversation.
    pub fn respond_to(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            should_respond: true,
        }
    }
}

impl WorkflowMessage for AgentExecutorRequest {
    fn type_name() -> String {
        "agentflow::AgentExecutorRequest".to_string()
    }
}

/// Outbound message from an agent-backed executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutorResponse {
    /// Id of the emitting executor.
    pub executor_id: String,
    /// The agent's response.
    pub agent_response: AgentResponse,
    /// The inbound conversation plus the agent's reply, with no
    /// duplication across replays.
    pub full_conversation: Vec<ChatMessage>,
}

impl WorkflowMessage for AgentExecutorResponse {
    fn type_name() -> String {
        "agentflow::AgentExecutorResponse".to_string()
    }
}

/// An executor whose handler delegates to an external agent.
pub struct AgentExecutor {
    id: String,
    agent: Arc<dyn Agent>,
}

impl AgentExecutor {
    /// Wrap an agent under an explicit executor id.
    pub fn new(agent: Arc<dyn Agent>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent,
        }
    }

    /// Wrap an agent under its own name.
    pub fn from_agent(agent: Arc<dyn Agent>) -> Self {
        let id = agent.name().to_string();
        Self { id, agent }
    }

    /// The wrapped agent.
    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    async fn run_agent(&self, conversation: Vec<ChatMessage>, ctx: &WorkflowContext) -> Result<()> {
        let mut aggregated = String::new();
        let mut response_id = None;
        let mut author_name = None;
        {
            let mut stream = self.agent.run_stream(&conversation);
            while let Some(update) = stream.next().await {
                let update = update?;
                aggregated.push_str(&update.text);
                author_name = update.author_name.clone().or(author_name);
                response_id.get_or_insert_with(|| update.response_id.clone());
                ctx.emit_event(WorkflowEvent::executor(EventKind::AgentRunUpdate {
                    executor_id: self.id.clone(),
                    response_id: update.response_id.clone(),
                    text: update.text.clone(),
                    author_name: update.author_name.clone(),
                }));
            }
        }

        let reply = ChatMessage::assistant(aggregated)
            .with_author_name(author_name.unwrap_or_else(|| self.agent.name().to_string()));
        let agent_response = AgentResponse {
            messages: vec![reply.clone()],
            response_id: response_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        };

        // Replay guard: a conversation that round-trips through this
        // executor already contains earlier replies; never re-append a
        // message id that is already present.
        let seen: HashSet<&String> = conversation
            .iter()
            .filter_map(|m| m.message_id.as_ref())
            .collect();
        let mut full_conversation = conversation.clone();
        for message in &agent_response.messages {
            let duplicate = message
                .message_id
                .as_ref()
                .map(|id| seen.contains(id))
                .unwrap_or(false);
            if !duplicate {
                full_conversation.push(message.clone());
            }
        }

        let response = AgentExecutorResponse {
            executor_id: self.id.clone(),
            agent_response,
            full_conversation,
        };
        ctx.send_message(&response)?;
        Ok(())
    }
}

#[async_trait]
impl Executor for AgentExecutor {
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
        vec![AgentExecutorResponse::descriptor()]
    }

    async fn handle(&self, envelope: Envelope, ctx: WorkflowContext) -> Result<()> {
        if envelope.is::<AgentExecutorRequest>() {
            let request: AgentExecutorRequest = envelope.decode()?;
            if !request.should_respond {
                // Record the conversation for a later round.
                ctx.set_state(serde_json::to_value(&request.messages)?);
                return Ok(());
            }
            self.run_agent(request.messages, &ctx).await
        } else {
            let text: String = envelope.decode()?;
            let conversation = vec![ChatMessage::new(Role::User, text)];
            self.run_agent(conversation, &ctx).await
        }
    }
}
