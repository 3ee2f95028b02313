//! Workflow graphs, the fluent builder, and the run entry points.
//!
//! A [`Workflow`] is an immutable bundle of executors, edges and a start
//! executor, plus the per-instance run state (runner context, shared
//! state, iteration counter) that lets a paused instance be resumed with
//! [`Workflow::send_responses`] or re-hydrated from a checkpoint with
//! [`Workflow::apply_checkpoint`].
//!
//! Graphs are constructed through [`WorkflowBuilder`], which validates on
//! [`WorkflowBuilder::build`]: the start executor exists, every edge
//! endpoint is registered, ids are unique, and every edge is type-
//! compatible with its target's handlers (edges from executors with
//! undeclared outputs are admitted with a warning and gated per message
//! at dispatch time).
//!
//! # Example
//!
//! ```rust,ignore
//! let workflow = WorkflowBuilder::new()
//!     .register_executor(writer.clone())
//!     .register_executor(reviewer.clone())
//!     .set_start_executor("writer")
//!     .add_edge("writer", "reviewer")
//!     .build()?;
//!
//! let result = workflow.run(&"hello world".to_string()).await?;
//! for output in result.get_outputs() {
//!     println!("{output}");
//! }
//! ```

use crate::agent::{Agent, AgentExecutor, AgentExecutorRequest, AgentResponse};
use crate::context::{RunnerContext, RESPONSES_SOURCE_ID};
use crate::edge::{Edge, EdgeGroup, EdgePredicate, FanOutSelector};
use crate::envelope::{Envelope, WorkflowMessage};
use crate::error::{Result, WorkflowError};
use crate::event::{EventKind, WorkflowEvent, WorkflowRunState};
use crate::executor::{Executor, ExecutorFactory};
use crate::message::{ChatMessage, Content, Role};
use crate::request_info::{
    AgentInputRequest, AgentInputResponse, PendingRequest, RequestInfoEvent, RequestResponse,
};
use crate::runner::{self, RunOptions};
use crate::shared_state::SharedState;
use crate::typing::{is_instance_of, is_type_compatible, TypeDescriptor};
use agentflow_checkpoint::{CheckpointStorage, TypeRegistry, WorkflowCheckpoint};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

/// Default superstep cap for a run.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Stream of workflow events from a streaming run.
pub type WorkflowEventStream = BoxStream<'static, WorkflowEvent>;

/// A type registry pre-loaded with the runtime's own protocol types.
pub fn default_registry() -> TypeRegistry {
    let registry = TypeRegistry::new();
    registry.register_named::<RequestResponse>(&RequestResponse::type_name());
    registry.register_named::<AgentExecutorRequest>(&AgentExecutorRequest::type_name());
    registry.register_named::<crate::agent::AgentExecutorResponse>(
        &crate::agent::AgentExecutorResponse::type_name(),
    );
    registry.register_named::<AgentInputRequest>(&AgentInputRequest::type_name());
    registry.register_named::<AgentInputResponse>(&AgentInputResponse::type_name());
    registry.register_named::<ChatMessage>(&ChatMessage::type_name());
    registry
}

pub(crate) struct WorkflowInner {
    pub(crate) id: String,
    pub(crate) name: Option<String>,
    pub(crate) executors: HashMap<String, Arc<dyn Executor>>,
    pub(crate) edge_groups: Vec<EdgeGroup>,
    pub(crate) start_id: String,
    pub(crate) output_executors: Option<HashSet<String>>,
    pub(crate) max_iterations: AtomicUsize,
    pub(crate) iteration: AtomicUsize,
    pub(crate) auto_checkpoint: bool,
    pub(crate) runner: RunnerContext,
    pub(crate) shared_state: SharedState,
}

/// An immutable workflow graph plus its per-instance run state.
#[derive(Clone)]
pub struct Workflow {
    inner: Arc<WorkflowInner>,
}

impl Workflow {
    /// Workflow id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Human-readable name, when set.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Id of the start executor.
    pub fn start_executor_id(&self) -> &str {
        &self.inner.start_id
    }

    /// The current superstep cap.
    pub fn max_iterations(&self) -> usize {
        self.inner.max_iterations.load(Ordering::Relaxed)
    }

    /// The runner context backing this instance.
    pub fn runner_context(&self) -> &RunnerContext {
        &self.inner.runner
    }

    /// The shared state backing this instance.
    pub fn shared_state(&self) -> &SharedState {
        &self.inner.shared_state
    }

    /// Snapshot of the pending external requests.
    pub fn pending_requests(&self) -> HashMap<String, PendingRequest> {
        self.inner.runner.pending_requests()
    }

    /// Run to quiescence and collect the result.
    pub async fn run<T: WorkflowMessage>(&self, input: &T) -> Result<WorkflowRunResult> {
        self.run_with_options(input, RunOptions::default()).await
    }

    /// Run with explicit options (cancellation, handler timeout).
    pub async fn run_with_options<T: WorkflowMessage>(
        &self,
        input: &T,
        options: RunOptions,
    ) -> Result<WorkflowRunResult> {
        let envelope = Envelope::new(input)?;
        self.run_envelope_with_options(envelope, options).await
    }

    /// Run a pre-built envelope to quiescence.
    pub async fn run_envelope(&self, envelope: Envelope) -> Result<WorkflowRunResult> {
        self.run_envelope_with_options(envelope, RunOptions::default())
            .await
    }

    /// Run a pre-built envelope with explicit options.
    pub async fn run_envelope_with_options(
        &self,
        envelope: Envelope,
        options: RunOptions,
    ) -> Result<WorkflowRunResult> {
        self.prepare_fresh_run(envelope).await?;
        self.drive_blocking(options, true).await
    }

    /// Run as an async event stream. The stream closes when the run
    /// reaches a terminal state; failures surface as `WorkflowFailed`
    /// and `Status(Failed)` events.
    pub async fn run_stream<T: WorkflowMessage>(&self, input: &T) -> Result<WorkflowEventStream> {
        self.run_stream_with_options(input, RunOptions::default())
            .await
    }

    /// Streaming run of a pre-built envelope.
    pub async fn run_stream_envelope(&self, envelope: Envelope) -> Result<WorkflowEventStream> {
        self.prepare_fresh_run(envelope).await?;
        Ok(self.spawn_stream(RunOptions::default(), true))
    }

    /// Streaming run with explicit options.
    pub async fn run_stream_with_options<T: WorkflowMessage>(
        &self,
        input: &T,
        options: RunOptions,
    ) -> Result<WorkflowEventStream> {
        let envelope = Envelope::new(input)?;
        self.prepare_fresh_run(envelope).await?;
        Ok(self.spawn_stream(options, true))
    }

    /// Resume a previously idle-with-pending-requests instance by
    /// supplying `{request_id → response}` and running to quiescence.
    ///
    /// Every entry is validated against its pending request before any
    /// state changes: an unknown id or a type mismatch leaves the
    /// instance untouched.
    pub async fn send_responses(
        &self,
        responses: HashMap<String, Value>,
    ) -> Result<WorkflowRunResult> {
        self.inject_responses(responses)?;
        self.drive_blocking(RunOptions::default(), false).await
    }

    /// Streaming variant of [`Workflow::send_responses`].
    pub async fn send_responses_stream(
        &self,
        responses: HashMap<String, Value>,
    ) -> Result<WorkflowEventStream> {
        self.inject_responses(responses)?;
        Ok(self.spawn_stream(RunOptions::default(), false))
    }

    /// Continue supersteps from the instance's current queue (e.g. after
    /// [`Workflow::apply_checkpoint`]).
    pub async fn resume(&self) -> Result<WorkflowRunResult> {
        self.drive_blocking(RunOptions::default(), false).await
    }

    /// Streaming variant of [`Workflow::resume`].
    pub async fn resume_stream(&self) -> Result<WorkflowEventStream> {
        Ok(self.spawn_stream(RunOptions::default(), false))
    }

    /// Snapshot the instance into a checkpoint through the attached
    /// storage. Returns `None` when no storage is attached.
    pub async fn create_checkpoint(&self) -> Result<Option<String>> {
        self.inner
            .runner
            .create_checkpoint(
                &self.inner.id,
                &self.inner.shared_state,
                self.inner.iteration.load(Ordering::Relaxed),
                self.max_iterations(),
                HashMap::new(),
            )
            .await
    }

    /// Restore queue, shared state, executor states, pending requests
    /// and iteration bookkeeping from a checkpoint. Validates that every
    /// pending request's type resolves in this process; failure is
    /// fatal.
    pub async fn apply_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> Result<()> {
        let iteration = self
            .inner
            .runner
            .apply_checkpoint(checkpoint, &self.inner.shared_state)
            .await?;
        self.inner.iteration.store(iteration, Ordering::Relaxed);
        self.inner
            .max_iterations
            .store(checkpoint.max_iterations, Ordering::Relaxed);
        for (executor_id, state) in &checkpoint.executor_states {
            if let Some(executor) = self.inner.executors.get(executor_id) {
                executor.restore_state(state.clone())?;
            }
        }
        Ok(())
    }

    /// Wrap this workflow as an [`Agent`] for compositional use.
    pub fn as_agent(&self, name: impl Into<String>) -> WorkflowAgent {
        WorkflowAgent {
            workflow: self.clone(),
            name: name.into(),
        }
    }

    async fn prepare_fresh_run(&self, envelope: Envelope) -> Result<()> {
        let start = self
            .inner
            .executors
            .get(&self.inner.start_id)
            .ok_or_else(|| WorkflowError::validation("start executor missing"))?;
        if !start.accepts(&envelope) {
            return Err(WorkflowError::dispatch(
                &self.inner.start_id,
                envelope.type_name.clone(),
            ));
        }
        self.inner.runner.reset_for_new_run();
        self.inner.shared_state.reset_for_new_run().await;
        self.inner.iteration.store(0, Ordering::Relaxed);
        self.inner.runner.enqueue(
            envelope,
            crate::context::INPUT_SOURCE_ID.to_string(),
            Some(self.inner.start_id.clone()),
        );
        Ok(())
    }

    fn inject_responses(&self, responses: HashMap<String, Value>) -> Result<()> {
        if responses.is_empty() {
            return Err(WorkflowError::Custom(
                "send_responses requires at least one response".to_string(),
            ));
        }
        // Validate everything before mutating anything.
        for (request_id, value) in &responses {
            let pending = self
                .inner
                .runner
                .get_pending_request(request_id)
                .ok_or_else(|| WorkflowError::UnknownRequestId(request_id.clone()))?;
            let ok = match &pending.response_descriptor {
                TypeDescriptor::Named { .. } => value.is_object(),
                descriptor => is_instance_of(value, descriptor),
            };
            if !ok {
                return Err(WorkflowError::ResponseTypeMismatch {
                    request_id: request_id.clone(),
                    expected: pending.response_type.clone(),
                });
            }
        }
        for (request_id, value) in responses {
            // Presence was validated above.
            let Some(pending) = self.inner.runner.take_pending_request(&request_id) else {
                continue;
            };
            let response = RequestResponse {
                request_id: request_id.clone(),
                data: value,
                request_type: pending.request_type.clone(),
                original_request: pending.payload.clone(),
            };
            let envelope = Envelope::new(&response)?;
            self.inner.runner.enqueue(
                envelope,
                RESPONSES_SOURCE_ID.to_string(),
                Some(pending.source_executor_id.clone()),
            );
        }
        Ok(())
    }

    async fn drive_blocking(&self, options: RunOptions, fresh: bool) -> Result<WorkflowRunResult> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.inner.runner.set_event_sink(tx);
        let outcome = runner::run_loop(self.inner.clone(), options, fresh).await;
        self.inner.runner.clear_event_sink();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        outcome?;
        Ok(WorkflowRunResult::new(
            events,
            self.inner.output_executors.clone(),
        ))
    }

    fn spawn_stream(&self, options: RunOptions, fresh: bool) -> WorkflowEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.runner.set_event_sink(tx);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let outcome = runner::run_loop(inner.clone(), options, fresh).await;
            inner.runner.clear_event_sink();
            if let Err(err) = outcome {
                tracing::error!(workflow_id = %inner.id, %err, "workflow run failed");
            }
        });
        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.inner.id)
            .field("start", &self.inner.start_id)
            .field("executors", &self.inner.executors.len())
            .field("edge_groups", &self.inner.edge_groups.len())
            .finish()
    }
}

enum Registration {
    Instance(Arc<dyn Executor>),
    Factory(ExecutorFactory),
}

/// Fluent builder for [`Workflow`] graphs.
pub struct WorkflowBuilder {
    registrations: Vec<Registration>,
    edge_groups: Vec<EdgeGroup>,
    start_id: Option<String>,
    output_executors: Option<HashSet<String>>,
    max_iterations: usize,
    checkpoint_storage: Option<Arc<dyn CheckpointStorage>>,
    registry: TypeRegistry,
    id: Option<String>,
    name: Option<String>,
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
            edge_groups: Vec::new(),
            start_id: None,
            output_executors: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            checkpoint_storage: None,
            registry: default_registry(),
            id: None,
            name: None,
        }
    }

    /// Register an executor instance. Registering the same instance
    /// twice is a no-op; two different executors with one id fail
    /// validation in [`WorkflowBuilder::build`].
    pub fn register_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.registrations.push(Registration::Instance(executor));
        self
    }

    /// Register an executor factory; a fresh instance is created per
    /// built workflow.
    pub fn register_executor_factory(mut self, factory: ExecutorFactory) -> Self {
        self.registrations.push(Registration::Factory(factory));
        self
    }

    /// Register an agent, wrapped in an [`AgentExecutor`] under the
    /// agent's name.
    pub fn register_agent(self, agent: Arc<dyn Agent>) -> Self {
        self.register_executor(Arc::new(AgentExecutor::from_agent(agent)))
    }

    /// Set the start executor by id.
    pub fn set_start_executor(mut self, id: impl Into<String>) -> Self {
        self.start_id = Some(id.into());
        self
    }

    /// Register an executor and make it the start executor.
    pub fn start_with(self, executor: Arc<dyn Executor>) -> Self {
        let id = executor.id().to_string();
        self.register_executor(executor).set_start_executor(id)
    }

    /// Add a single edge.
    pub fn add_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edge_groups
            .push(EdgeGroup::Single(Edge::new(source, target)));
        self
    }

    /// Add a conditional edge; delivery is skipped when the predicate
    /// rejects the message.
    pub fn add_edge_with(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        predicate: EdgePredicate,
    ) -> Self {
        self.edge_groups
            .push(EdgeGroup::Single(Edge::with_predicate(
                source, target, predicate,
            )));
        self
    }

    /// Add a fan-out group: the message goes to every listed target.
    pub fn add_fan_out_edges(
        mut self,
        source: impl Into<String>,
        targets: Vec<impl Into<String>>,
    ) -> Self {
        let source = source.into();
        let edges = targets
            .into_iter()
            .map(|t| Edge::new(source.clone(), t))
            .collect();
        self.edge_groups.push(EdgeGroup::FanOut {
            source,
            edges,
            selector: None,
        });
        self
    }

    /// Add a fan-out group with a selector deciding the target subset
    /// per message.
    pub fn add_fan_out_edges_with_selector(
        mut self,
        source: impl Into<String>,
        targets: Vec<impl Into<String>>,
        selector: FanOutSelector,
    ) -> Self {
        let source = source.into();
        let edges = targets
            .into_iter()
            .map(|t| Edge::new(source.clone(), t))
            .collect();
        self.edge_groups.push(EdgeGroup::FanOut {
            source,
            edges,
            selector: Some(selector),
        });
        self
    }

    /// Add a fan-in group: the target receives a list assembled from all
    /// sources once each has contributed.
    pub fn add_fan_in_edges(
        mut self,
        sources: Vec<impl Into<String>>,
        target: impl Into<String>,
    ) -> Self {
        let target = target.into();
        let sources: Vec<String> = sources.into_iter().map(Into::into).collect();
        self.edge_groups.push(EdgeGroup::FanIn {
            id: format!("fan_in:{target}:{}", self.edge_groups.len()),
            sources,
            target,
        });
        self
    }

    /// Restrict which executors' outputs land in
    /// [`WorkflowRunResult::get_outputs`]. Defaults to every executor
    /// that yields.
    pub fn with_output_executors(mut self, ids: Vec<impl Into<String>>) -> Self {
        self.output_executors = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Set the superstep cap (default [`DEFAULT_MAX_ITERATIONS`]).
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Attach checkpoint storage and checkpoint automatically at each
    /// superstep boundary.
    pub fn with_checkpoint_storage(mut self, storage: Arc<dyn CheckpointStorage>) -> Self {
        self.checkpoint_storage = Some(storage);
        self
    }

    /// Replace the type registry used for checkpoint encoding.
    pub fn with_type_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register a message type (e.g. a request-info payload) so
    /// checkpoints carrying it can be re-hydrated in this process.
    pub fn register_message_type<T: WorkflowMessage>(self) -> Self {
        self.registry.register_named::<T>(&T::type_name());
        self
    }

    /// Set an explicit workflow id (default: fresh UUID).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set a human-readable name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Validate the graph and produce an immutable [`Workflow`].
    pub fn build(self) -> Result<Workflow> {
        let mut executors: HashMap<String, Arc<dyn Executor>> = HashMap::new();
        for registration in self.registrations {
            let executor = match registration {
                Registration::Instance(executor) => executor,
                Registration::Factory(factory) => factory(),
            };
            let id = executor.id().to_string();
            if let Some(existing) = executors.get(&id) {
                if Arc::ptr_eq(existing, &executor) {
                    continue; // Idempotent re-registration.
                }
                return Err(WorkflowError::validation(format!(
                    "duplicate executor id '{id}'"
                )));
            }
            executors.insert(id, executor);
        }

        let start_id = self
            .start_id
            .ok_or_else(|| WorkflowError::validation("no start executor set"))?;
        if !executors.contains_key(&start_id) {
            return Err(WorkflowError::validation(format!(
                "start executor '{start_id}' is not registered"
            )));
        }

        for group in &self.edge_groups {
            for endpoint in group.sources().iter().chain(group.targets().iter()) {
                if !executors.contains_key(*endpoint) {
                    return Err(WorkflowError::validation(format!(
                        "edge references unregistered executor '{endpoint}'"
                    )));
                }
            }
        }

        validate_edge_types(&executors, &self.edge_groups)?;

        let runner = RunnerContext::new(self.registry);
        if let Some(storage) = &self.checkpoint_storage {
            runner.attach_checkpoint_storage(storage.clone());
        }

        Ok(Workflow {
            inner: Arc::new(WorkflowInner {
                id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                name: self.name,
                executors,
                edge_groups: self.edge_groups,
                start_id,
                output_executors: self.output_executors,
                max_iterations: AtomicUsize::new(self.max_iterations),
                iteration: AtomicUsize::new(0),
                auto_checkpoint: self.checkpoint_storage.is_some(),
                runner,
                shared_state: SharedState::new(),
            }),
        })
    }
}

/// Edge-type validation: every declared source output must be accepted
/// by some target handler. Sources with undeclared (dynamic) outputs are
/// admitted with a warning and gated per message.
fn validate_edge_types(
    executors: &HashMap<String, Arc<dyn Executor>>,
    edge_groups: &[EdgeGroup],
) -> Result<()> {
    let check_pair = |source_id: &str, target_id: &str| -> Result<()> {
        let source_outputs = executors[source_id].output_types();
        if source_outputs.is_empty() {
            tracing::warn!(
                source = source_id,
                target = target_id,
                "source declares no output types; edge gated at dispatch time"
            );
            return Ok(());
        }
        let target_inputs = executors[target_id].input_types();
        for output in &source_outputs {
            if !target_inputs
                .iter()
                .any(|input| is_type_compatible(output, input))
            {
                return Err(WorkflowError::validation(format!(
                    "edge {source_id} -> {target_id}: output type '{output}' has no compatible handler"
                )));
            }
        }
        Ok(())
    };

    for group in edge_groups {
        match group {
            EdgeGroup::Single(edge) => check_pair(&edge.source, &edge.target)?,
            EdgeGroup::FanOut { source, edges, .. } => {
                for edge in edges {
                    check_pair(source, &edge.target)?;
                }
            }
            EdgeGroup::FanIn {
                sources, target, ..
            } => {
                let mut element_types = Vec::new();
                let mut dynamic = false;
                for source in sources {
                    let outputs = executors[source.as_str()].output_types();
                    if outputs.is_empty() {
                        tracing::warn!(
                            source = source.as_str(),
                            target = target.as_str(),
                            "fan-in source declares no output types; gated at dispatch time"
                        );
                        dynamic = true;
                        break;
                    }
                    element_types.extend(outputs);
                }
                if dynamic {
                    continue;
                }
                element_types.dedup();
                let element = if element_types.len() == 1 {
                    element_types.remove(0)
                } else {
                    TypeDescriptor::union(element_types)
                };
                let list_type = TypeDescriptor::sequence_of(element);
                let target_inputs = executors[target.as_str()].input_types();
                if !target_inputs
                    .iter()
                    .any(|input| is_type_compatible(&list_type, input))
                {
                    return Err(WorkflowError::validation(format!(
                        "fan-in into '{target}': no handler accepts '{list_type}'"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// The collected outcome of a blocking run.
#[derive(Debug, Clone)]
pub struct WorkflowRunResult {
    events: Vec<WorkflowEvent>,
    output_filter: Option<HashSet<String>>,
}

impl WorkflowRunResult {
    pub(crate) fn new(events: Vec<WorkflowEvent>, output_filter: Option<HashSet<String>>) -> Self {
        Self {
            events,
            output_filter,
        }
    }

    /// Every event the run emitted, in stream order.
    pub fn events(&self) -> &[WorkflowEvent] {
        &self.events
    }

    /// Workflow outputs, in yield order. When the workflow declares
    /// explicit output executors, outputs from other executors are
    /// filtered out.
    pub fn get_outputs(&self) -> Vec<Value> {
        self.events
            .iter()
            .filter_map(|event| match &event.kind {
                EventKind::WorkflowOutput { executor_id, data } => {
                    let admitted = self
                        .output_filter
                        .as_ref()
                        .map_or(true, |filter| filter.contains(executor_id));
                    admitted.then(|| data.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Decode each output into a concrete type.
    pub fn outputs_as<T: serde::de::DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.get_outputs()
            .into_iter()
            .map(|value| Ok(serde_json::from_value(value)?))
            .collect()
    }

    /// The sequence of status transitions the run emitted.
    pub fn status_timeline(&self) -> Vec<WorkflowRunState> {
        self.events
            .iter()
            .filter_map(WorkflowEvent::status)
            .collect()
    }

    /// The terminal state, when the run emitted one.
    pub fn get_final_state(&self) -> Option<WorkflowRunState> {
        self.status_timeline().last().copied()
    }

    /// Request-info events emitted during the run.
    pub fn request_info_events(&self) -> Vec<&RequestInfoEvent> {
        self.events
            .iter()
            .filter_map(WorkflowEvent::request_info)
            .collect()
    }
}

/// A workflow wrapped as an [`Agent`].
///
/// `run(messages)` feeds the conversation into the workflow, collects
/// until terminal, and returns the aggregated assistant messages.
/// Pending external requests surface as `request_info` function-call
/// contents whose call id is the request id; a later `run` whose
/// messages carry matching function-result contents resumes the
/// workflow instead of starting a new run.
pub struct WorkflowAgent {
    workflow: Workflow,
    name: String,
}

#[async_trait]
impl Agent for WorkflowAgent {
    fn id(&self) -> &str {
        self.workflow.id()
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, messages: &[ChatMessage]) -> Result<AgentResponse> {
        let pending = self.workflow.pending_requests();
        let mut responses: HashMap<String, Value> = HashMap::new();
        for message in messages {
            for content in &message.contents {
                if let Content::FunctionResult { call_id, result } = content {
                    if pending.contains_key(call_id) {
                        responses.insert(call_id.clone(), result.clone());
                    }
                }
            }
        }

        let result = if responses.is_empty() {
            let envelope = self.input_envelope(messages)?;
            self.workflow.run_envelope(envelope).await?
        } else {
            self.workflow.send_responses(responses).await?
        };

        let mut out = Vec::new();
        for output in result.get_outputs() {
            if let Ok(list) = serde_json::from_value::<Vec<ChatMessage>>(output.clone()) {
                out.extend(list);
            } else if let Ok(message) = serde_json::from_value::<ChatMessage>(output.clone()) {
                out.push(message);
            } else if let Some(text) = output.as_str() {
                out.push(ChatMessage::assistant(text).with_author_name(self.name.clone()));
            } else {
                out.push(
                    ChatMessage::assistant(output.to_string()).with_author_name(self.name.clone()),
                );
            }
        }

        // Surface still-pending requests as tool-like calls.
        for (request_id, request) in self.workflow.pending_requests() {
            out.push(ChatMessage::from_contents(
                Role::Assistant,
                vec![Content::FunctionCall {
                    call_id: request_id,
                    name: "request_info".to_string(),
                    arguments: request.payload.clone(),
                }],
            ));
        }

        Ok(AgentResponse::new(out))
    }
}

impl WorkflowAgent {
    /// The wrapped workflow.
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    fn input_envelope(&self, messages: &[ChatMessage]) -> Result<Envelope> {
        let start = &self.workflow.inner.executors[&self.workflow.inner.start_id];
        let candidates = [
            Envelope::new(&AgentExecutorRequest::respond_to(messages.to_vec()))?,
            Envelope::new(&messages.to_vec())?,
            Envelope::new(&messages.first().map(ChatMessage::text).unwrap_or_default())?,
        ];
        for candidate in candidates {
            if start.accepts(&candidate) {
                return Ok(candidate);
            }
        }
        Err(WorkflowError::dispatch(
            start.id(),
            "conversation input".to_string(),
        ))
    }
}
