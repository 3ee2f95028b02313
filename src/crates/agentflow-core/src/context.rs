//! Runner context and the per-handler workflow context.
//!
//! [`RunnerContext`] is the per-run ledger: the FIFO queue of messages to
//! deliver next superstep, the event stream, the map of pending external
//! requests and the per-executor state store. It also orchestrates
//! checkpoint creation and re-hydration.
//!
//! [`WorkflowContext`] is the narrow facade a handler receives for one
//! invocation: `send_message`, `add_event`, `yield_output`,
//! `request_info` and the shared-state and executor-state accessors.

use crate::envelope::{Envelope, WorkflowMessage};
use crate::error::{Result, WorkflowError};
use crate::event::{EventKind, WorkflowEvent};
use crate::request_info::PendingRequest;
use crate::shared_state::{SharedState, SharedStateHold};
use agentflow_checkpoint::{
    CheckpointStorage, PendingRequestState, TypeRegistry, WorkflowCheckpoint,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// A message waiting in the runner's queue for the next superstep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// The typed message.
    pub envelope: Envelope,
    /// Executor that sent it (`"__input__"` for the run input).
    pub source_id: String,
    /// Explicit target, when the sender addressed a specific edge.
    pub target_id: Option<String>,
    /// Monotonic enqueue index; dispatch order within a superstep is
    /// keyed by `(source_id, enqueue_index)`.
    pub enqueue_index: u64,
}

/// Source id used for the message that starts a run.
pub const INPUT_SOURCE_ID: &str = "__input__";

/// Source id used for injected request responses.
pub const RESPONSES_SOURCE_ID: &str = "__responses__";

struct RunnerContextInner {
    queue: Mutex<Vec<QueuedMessage>>,
    enqueue_counter: AtomicU64,
    event_buffer: Mutex<Vec<WorkflowEvent>>,
    event_sink: Mutex<Option<UnboundedSender<WorkflowEvent>>>,
    pending_requests: Mutex<HashMap<String, PendingRequest>>,
    executor_states: Mutex<HashMap<String, Value>>,
    checkpoint_storage: Mutex<Option<Arc<dyn CheckpointStorage>>>,
    fan_in: Mutex<HashMap<String, HashMap<String, Envelope>>>,
    registry: TypeRegistry,
}

/// The per-run ledger shared by the scheduler and every handler context.
///
/// Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct RunnerContext {
    inner: Arc<RunnerContextInner>,
}

impl RunnerContext {
    /// Create a fresh context with the given type registry.
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            inner: Arc::new(RunnerContextInner {
                queue: Mutex::new(Vec::new()),
                enqueue_counter: AtomicU64::new(0),
                event_buffer: Mutex::new(Vec::new()),
                event_sink: Mutex::new(None),
                pending_requests: Mutex::new(HashMap::new()),
                executor_states: Mutex::new(HashMap::new()),
                checkpoint_storage: Mutex::new(None),
                fan_in: Mutex::new(HashMap::new()),
                registry,
            }),
        }
    }

    /// The type registry used for checkpoint encoding and decoding.
    pub fn registry(&self) -> &TypeRegistry {
        &self.inner.registry
    }

    // ---- events ----

    /// Route events to a live stream. Events emitted while a sink is
    /// installed bypass the buffer.
    pub fn set_event_sink(&self, tx: UnboundedSender<WorkflowEvent>) {
        *self.inner.event_sink.lock() = Some(tx);
    }

    /// Remove the stream sink; subsequent events buffer again.
    pub fn clear_event_sink(&self) {
        *self.inner.event_sink.lock() = None;
    }

    /// Emit an event to the stream (or the buffer when no stream is
    /// attached).
    pub fn emit(&self, event: WorkflowEvent) {
        let sink = self.inner.event_sink.lock();
        match sink.as_ref() {
            Some(tx) => {
                if tx.send(event.clone()).is_err() {
                    // Receiver gone: keep the event for drain_events.
                    self.inner.event_buffer.lock().push(event);
                }
            }
            None => self.inner.event_buffer.lock().push(event),
        }
    }

    /// Drain and return the buffered events.
    pub fn drain_events(&self) -> Vec<WorkflowEvent> {
        std::mem::take(&mut *self.inner.event_buffer.lock())
    }

    // ---- message queue ----

    /// Queue a message for delivery in the next superstep.
    pub fn enqueue(&self, envelope: Envelope, source_id: String, target_id: Option<String>) {
        let enqueue_index = self.inner.enqueue_counter.fetch_add(1, Ordering::Relaxed);
        self.inner.queue.lock().push(QueuedMessage {
            envelope,
            source_id,
            target_id,
            enqueue_index,
        });
    }

    /// Take the current queue snapshot, ordered by
    /// `(source_id, enqueue_index)`. Messages enqueued afterwards land in
    /// the next snapshot.
    pub fn drain_queue(&self) -> Vec<QueuedMessage> {
        let mut batch = std::mem::take(&mut *self.inner.queue.lock());
        batch.sort_by(|a, b| {
            (a.source_id.as_str(), a.enqueue_index).cmp(&(b.source_id.as_str(), b.enqueue_index))
        });
        batch
    }

    /// Number of queued messages.
    pub fn queued_message_count(&self) -> usize {
        self.inner.queue.lock().len()
    }

    // ---- pending requests ----

    /// Track a pending external request.
    pub fn add_pending_request(&self, request: PendingRequest) {
        self.inner
            .pending_requests
            .lock()
            .insert(request.request_id.clone(), request);
    }

    /// Remove and return a pending request by id.
    pub fn take_pending_request(&self, request_id: &str) -> Option<PendingRequest> {
        self.inner.pending_requests.lock().remove(request_id)
    }

    /// Look up a pending request without removing it.
    pub fn get_pending_request(&self, request_id: &str) -> Option<PendingRequest> {
        self.inner.pending_requests.lock().get(request_id).cloned()
    }

    /// Immutable snapshot of the pending-request map.
    pub fn pending_requests(&self) -> HashMap<String, PendingRequest> {
        self.inner.pending_requests.lock().clone()
    }

    /// True when external requests are outstanding.
    pub fn has_pending_requests(&self) -> bool {
        !self.inner.pending_requests.lock().is_empty()
    }

    // ---- fan-in accumulation ----

    /// Record a source's contribution to a fan-in group. Within one
    /// accumulation window, the last message per source wins.
    pub fn fan_in_store(&self, group_id: &str, source_id: &str, envelope: Envelope) {
        self.inner
            .fan_in
            .lock()
            .entry(group_id.to_string())
            .or_default()
            .insert(source_id.to_string(), envelope);
    }

    /// If every declared source has contributed, take and return the
    /// contributions in declared-source order, clearing the window.
    pub fn fan_in_take_if_complete(
        &self,
        group_id: &str,
        sources: &[String],
    ) -> Option<Vec<(String, Envelope)>> {
        let mut fan_in = self.inner.fan_in.lock();
        let ready = fan_in
            .get(group_id)
            .map(|window| sources.iter().all(|s| window.contains_key(s)))
            .unwrap_or(false);
        if !ready {
            return None;
        }
        let mut window = fan_in.remove(group_id)?;
        Some(
            sources
                .iter()
                .filter_map(|s| window.remove(s).map(|env| (s.clone(), env)))
                .collect(),
        )
    }

    // ---- per-executor state ----

    /// Read an executor's private state.
    pub fn get_executor_state(&self, executor_id: &str) -> Option<Value> {
        self.inner.executor_states.lock().get(executor_id).cloned()
    }

    /// Write an executor's private state.
    pub fn set_executor_state(&self, executor_id: &str, state: Value) {
        self.inner
            .executor_states
            .lock()
            .insert(executor_id.to_string(), state);
    }

    // ---- checkpointing ----

    /// Attach a checkpoint storage backend.
    pub fn attach_checkpoint_storage(&self, storage: Arc<dyn CheckpointStorage>) {
        *self.inner.checkpoint_storage.lock() = Some(storage);
    }

    /// The attached storage, if any.
    pub fn checkpoint_storage(&self) -> Option<Arc<dyn CheckpointStorage>> {
        self.inner.checkpoint_storage.lock().clone()
    }

    /// Snapshot the run into a checkpoint and persist it. Returns `None`
    /// when no storage is attached.
    pub async fn create_checkpoint(
        &self,
        workflow_id: &str,
        shared_state: &SharedState,
        iteration_count: usize,
        max_iterations: usize,
        metadata: HashMap<String, Value>,
    ) -> Result<Option<String>> {
        let Some(storage) = self.checkpoint_storage() else {
            return Ok(None);
        };

        let messages: Vec<Value> = {
            let queue = self.inner.queue.lock();
            queue
                .iter()
                .map(serde_json::to_value)
                .collect::<std::result::Result<_, _>>()?
        };
        let pending_requests: HashMap<String, PendingRequestState> = {
            let pending = self.inner.pending_requests.lock();
            pending
                .iter()
                .map(|(id, req)| Ok((id.clone(), req.to_state()?)))
                .collect::<Result<_>>()?
        };

        let mut checkpoint = WorkflowCheckpoint::new(workflow_id, max_iterations)
            .with_messages(messages)
            .with_shared_state(shared_state.snapshot().await)
            .with_executor_states(self.inner.executor_states.lock().clone())
            .with_pending_requests(pending_requests)
            .with_iteration_count(iteration_count);
        checkpoint.metadata = metadata;
        checkpoint.timestamp = Utc::now();

        let id = storage.save_checkpoint(&checkpoint).await?;
        Ok(Some(id))
    }

    /// Load a checkpoint by id from the attached storage.
    pub async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<WorkflowCheckpoint>> {
        let Some(storage) = self.checkpoint_storage() else {
            return Ok(None);
        };
        Ok(storage.load_checkpoint(checkpoint_id).await?)
    }

    /// Restore queue, pending requests, executor states and shared state
    /// from a checkpoint. Returns the restored iteration count.
    ///
    /// Every pending request's declared type must resolve in the type
    /// registry; failure is fatal because the caller could not
    /// meaningfully respond after resuming.
    pub async fn apply_checkpoint(
        &self,
        checkpoint: &WorkflowCheckpoint,
        shared_state: &SharedState,
    ) -> Result<usize> {
        let mut pending = HashMap::new();
        for (id, state) in &checkpoint.pending_requests {
            let request = PendingRequest::from_state(state, &self.inner.registry)?;
            pending.insert(id.clone(), request);
        }

        let mut queue = Vec::with_capacity(checkpoint.messages.len());
        for raw in &checkpoint.messages {
            queue.push(serde_json::from_value::<QueuedMessage>(raw.clone())?);
        }

        *self.inner.queue.lock() = queue;
        *self.inner.pending_requests.lock() = pending;
        *self.inner.executor_states.lock() = checkpoint.executor_states.clone();
        shared_state.restore(checkpoint.shared_state.clone()).await;

        Ok(checkpoint.iteration_count)
    }

    /// Clear all run state for a fresh invocation.
    pub fn reset_for_new_run(&self) {
        self.inner.queue.lock().clear();
        self.inner.event_buffer.lock().clear();
        self.inner.pending_requests.lock().clear();
        self.inner.executor_states.lock().clear();
        self.inner.fan_in.lock().clear();
        self.inner.enqueue_counter.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for RunnerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerContext")
            .field("queued", &self.queued_message_count())
            .field("pending_requests", &self.has_pending_requests())
            .finish()
    }
}

/// The per-invocation facade handed to a handler.
#[derive(Clone)]
pub struct WorkflowContext {
    executor_id: String,
    source_ids: Vec<String>,
    runner: RunnerContext,
    shared: SharedState,
    holding: Arc<AtomicBool>,
}

impl WorkflowContext {
    /// Build a context for one handler invocation.
    pub fn new(
        executor_id: impl Into<String>,
        source_ids: Vec<String>,
        runner: RunnerContext,
        shared: SharedState,
    ) -> Self {
        Self {
            executor_id: executor_id.into(),
            source_ids,
            runner,
            shared,
            holding: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Id of the executor this context belongs to.
    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    /// Ids of the executors whose messages triggered this invocation.
    pub fn source_executor_ids(&self) -> &[String] {
        &self.source_ids
    }

    /// The underlying runner context.
    pub fn runner(&self) -> &RunnerContext {
        &self.runner
    }

    /// The run's shared state.
    pub fn shared_state(&self) -> &SharedState {
        &self.shared
    }

    /// Queue a typed message for the next superstep, delivered along all
    /// outgoing edges of this executor.
    pub fn send_message<T: WorkflowMessage>(&self, value: &T) -> Result<()> {
        let envelope = Envelope::new(value)?;
        self.runner
            .enqueue(envelope, self.executor_id.clone(), None);
        Ok(())
    }

    /// Queue a typed message addressed to one specific target; only the
    /// edge to that target is used.
    pub fn send_message_to<T: WorkflowMessage>(
        &self,
        value: &T,
        target_id: impl Into<String>,
    ) -> Result<()> {
        let envelope = Envelope::new(value)?;
        self.runner
            .enqueue(envelope, self.executor_id.clone(), Some(target_id.into()));
        Ok(())
    }

    /// Queue a pre-built envelope.
    pub fn send_envelope(&self, envelope: Envelope, target_id: Option<String>) {
        self.runner
            .enqueue(envelope, self.executor_id.clone(), target_id);
    }

    /// Inject a user-defined event into the run's stream.
    pub fn add_event(&self, name: impl Into<String>, data: Value) {
        self.runner.emit(WorkflowEvent::executor(EventKind::Custom {
            executor_id: self.executor_id.clone(),
            name: name.into(),
            data,
        }));
    }

    /// Emit a raw event. Used by agent-backed executors for streaming
    /// updates.
    pub fn emit_event(&self, event: WorkflowEvent) {
        self.runner.emit(event);
    }

    /// Record a workflow-level output. Outputs accumulate; they do not
    /// terminate the run.
    pub fn yield_output<T: Serialize>(&self, value: &T) -> Result<()> {
        let data = serde_json::to_value(value)?;
        self.runner
            .emit(WorkflowEvent::executor(EventKind::WorkflowOutput {
                executor_id: self.executor_id.clone(),
                data,
            }));
        Ok(())
    }

    /// Register a pending external request and emit a request-info
    /// event. Returns the fresh request id. The handler keeps running;
    /// the workflow pauses once it quiesces.
    pub fn request_info<Req, Resp>(&self, payload: &Req) -> Result<String>
    where
        Req: WorkflowMessage,
        Resp: WorkflowMessage,
    {
        let request = PendingRequest {
            request_id: Uuid::new_v4().to_string(),
            source_executor_id: self.executor_id.clone(),
            request_type: Req::type_name(),
            payload: serde_json::to_value(payload)?,
            response_type: Resp::type_name(),
            response_descriptor: Resp::descriptor(),
            created_at: Utc::now(),
        };
        let request_id = request.request_id.clone();
        let event = request.to_event();
        self.runner.add_pending_request(request);
        self.runner
            .emit(WorkflowEvent::executor(EventKind::RequestInfo(event)));
        tracing::debug!(
            executor_id = %self.executor_id,
            request_id = %request_id,
            "registered pending request"
        );
        Ok(request_id)
    }

    /// Read a shared-state key.
    pub async fn get_shared_state(&self, key: &str) -> Option<Value> {
        self.shared.get(key).await
    }

    /// Write a shared-state key.
    pub async fn set_shared_state<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> Result<()> {
        self.shared.set(key, value).await
    }

    /// Acquire the exclusive shared-state hold. Fails fast on nested
    /// acquisition from the same handler; blocks cooperatively while
    /// another handler holds the state.
    pub async fn hold_shared_state(&self) -> Result<ContextHold> {
        if self.holding.swap(true, Ordering::SeqCst) {
            return Err(WorkflowError::Custom(
                "shared-state hold already active in this handler".to_string(),
            ));
        }
        let inner = self.shared.hold().await;
        Ok(ContextHold {
            inner,
            holding: self.holding.clone(),
        })
    }

    /// Read this executor's private state (survives checkpoints).
    pub fn get_state(&self) -> Option<Value> {
        self.runner.get_executor_state(&self.executor_id)
    }

    /// Write this executor's private state.
    pub fn set_state(&self, state: Value) {
        self.runner.set_executor_state(&self.executor_id, state);
    }
}

/// A hold acquired through [`WorkflowContext::hold_shared_state`].
/// Releases both the state lock and the context's re-entrancy flag on
/// drop.
pub struct ContextHold {
    inner: SharedStateHold,
    holding: Arc<AtomicBool>,
}

impl Drop for ContextHold {
    fn drop(&mut self) {
        self.holding.store(false, Ordering::SeqCst);
    }
}

impl std::ops::Deref for ContextHold {
    type Target = SharedStateHold;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl std::ops::DerefMut for ContextHold {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
