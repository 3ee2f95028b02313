//! # agentflow-core - Graph-based message-passing workflow runtime
//!
//! `agentflow-core` composes independent executors (including agent
//! wrappers) into directed graphs, routes typed messages along edges,
//! and drives execution as supersteps with quiescence detection. It
//! supports fan-out/fan-in, cyclic loops, conditional routing,
//! sub-workflows, shared state with exclusive holds, human-in-the-loop
//! pauses, and checkpoint-based pause/resume.
//!
//! ## Overview
//!
//! - **Executors** ([`Executor`]) are named nodes with typed handlers;
//!   dispatch picks the most specific handler for each message.
//! - **Edges** ([`edge`]) gate deliveries by type compatibility and
//!   optional predicates; fan-out duplicates, fan-in accumulates.
//! - **The scheduler** ([`runner`]) drains the message queue in
//!   supersteps until the run idles, idles with pending requests, or
//!   fails.
//! - **Request/response** ([`request_info`]) lets an executor pause the
//!   workflow awaiting typed external input.
//! - **Checkpoints** (via [`agentflow_checkpoint`]) snapshot queue,
//!   shared state, executor state and pending requests for resumption
//!   in a compatible process.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use agentflow_core::{executor_fn, WorkflowBuilder, WorkflowContext};
//!
//! # async fn example() -> agentflow_core::Result<()> {
//! let shout = executor_fn("shout", |msg: String, ctx: WorkflowContext| async move {
//!     ctx.send_message(&msg.to_uppercase())?;
//!     Ok(())
//! });
//! let publish = executor_fn("publish", |msg: String, ctx: WorkflowContext| async move {
//!     ctx.yield_output(&msg)?;
//!     Ok(())
//! });
//!
//! let workflow = WorkflowBuilder::new()
//!     .start_with(shout)
//!     .register_executor(publish)
//!     .add_edge("shout", "publish")
//!     .build()?;
//!
//! let result = workflow.run(&"hello".to_string()).await?;
//! assert_eq!(result.get_outputs(), vec![serde_json::json!("HELLO")]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module map
//!
//! - [`typing`] - reflected type descriptors and compatibility checks
//! - [`envelope`] - typed message envelopes
//! - [`message`] - chat message and content model
//! - [`shared_state`] - keyed state with exclusive holds
//! - [`context`] - runner ledger and per-handler context
//! - [`executor`] - executor trait and handler registry
//! - [`agent`] - agent/chat-client contracts and the agent executor
//! - [`edge`] - edges and edge groups
//! - [`workflow`] - graphs, builder, run entry points
//! - [`runner`] - the superstep scheduler
//! - [`request_info`] - human-in-the-loop protocol
//! - [`subworkflow`] - child workflows as executors
//! - [`event`] - the workflow event stream
//! - [`error`] - the error taxonomy

pub mod agent;
pub mod context;
pub mod edge;
pub mod envelope;
pub mod error;
pub mod event;
pub mod executor;
pub mod message;
pub mod request_info;
pub mod runner;
pub mod shared_state;
pub mod subworkflow;
pub mod typing;
pub mod workflow;

pub use agent::{
    Agent, AgentExecutor, AgentExecutorRequest, AgentExecutorResponse, AgentResponse,
    AgentResponseUpdate, ChatAgent, ChatClient, ChatOptions, ChatResponse, ChatResponseUpdate,
    ContextProvider,
};
pub use context::{
    ContextHold, QueuedMessage, RunnerContext, WorkflowContext, INPUT_SOURCE_ID,
    RESPONSES_SOURCE_ID,
};
pub use edge::{Edge, EdgeGroup, EdgePredicate, FanOutSelector};
pub use envelope::{Envelope, WorkflowMessage};
pub use error::{Result, WorkflowError};
pub use event::{EventKind, EventOrigin, WorkflowEvent, WorkflowRunState};
pub use executor::{executor_fn, Executor, ExecutorFactory, FnExecutor, HandlerRegistry};
pub use message::{ChatMessage, Content, Role};
pub use request_info::{
    AgentInputRequest, AgentInputResponse, PendingRequest, RequestInfoEvent, RequestResponse,
};
pub use runner::{CancellationToken, RunOptions};
pub use shared_state::{SharedState, SharedStateHold};
pub use subworkflow::SubWorkflowExecutor;
pub use typing::{is_instance_of, is_type_compatible, TypeDescriptor};
pub use workflow::{
    default_registry, Workflow, WorkflowAgent, WorkflowBuilder, WorkflowEventStream,
    WorkflowRunResult, DEFAULT_MAX_ITERATIONS,
};

// Re-export the checkpoint crate's public surface for convenience.
pub use agentflow_checkpoint::{
    checkpoint_summary, CheckpointStorage, CheckpointSummary, FileCheckpointStorage,
    InMemoryCheckpointStorage, TypeRegistry, WorkflowCheckpoint,
};
