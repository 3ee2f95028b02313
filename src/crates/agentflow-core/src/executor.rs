//! Executors: the unit of dispatch.
//!
//! An [`Executor`] is a named node with a set of typed handlers. The
//! scheduler gates deliveries on [`Executor::input_types`] and calls
//! [`Executor::handle`] with the message envelope and a fresh
//! [`WorkflowContext`].
//!
//! Two registration styles are supported, mirroring the class and
//! function forms of the source framework:
//!
//! - **Struct form**: implement [`Executor`] directly, usually embedding
//!   a [`HandlerRegistry`] for typed dispatch across several handlers.
//! - **Function form**: wrap a single async closure with
//!   [`executor_fn`], declaring the input type through the closure's
//!   argument.
//!
//! When several handlers match an inbound message, the registry picks
//! the one whose declared input type is most specific
//! ([`TypeDescriptor::specificity`]), breaking ties by registration
//! order.

use crate::context::{RunnerContext, WorkflowContext};
use crate::envelope::{Envelope, WorkflowMessage};
use crate::error::{Result, WorkflowError};
use crate::event::{EventKind, WorkflowEvent};
use crate::request_info::RequestResponse;
use crate::shared_state::SharedState;
use crate::typing::TypeDescriptor;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Boxed future returned by handler closures.
pub type HandlerFuture = BoxFuture<'static, Result<()>>;

type HandlerFn = Arc<dyn Fn(Envelope, WorkflowContext) -> HandlerFuture + Send + Sync>;

struct HandlerEntry {
    input: TypeDescriptor,
    handler: HandlerFn,
}

/// A table of typed handlers with most-specific-match dispatch.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: Vec<HandlerEntry>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for messages of type `T`.
    pub fn on<T, F, Fut>(mut self, handler: F) -> Self
    where
        T: WorkflowMessage,
        F: Fn(T, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let wrapped: HandlerFn = Arc::new(move |envelope, ctx| {
            match envelope.decode::<T>() {
                Ok(message) => Box::pin(handler(message, ctx)),
                Err(err) => Box::pin(async move { Err(err) }),
            }
        });
        self.entries.push(HandlerEntry {
            input: T::descriptor(),
            handler: wrapped,
        });
        self
    }

    /// Register a response handler, keyed to the [`RequestResponse`]
    /// messages delivered when the caller answers this executor's
    /// pending requests.
    pub fn on_response<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(RequestResponse, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on::<RequestResponse, _, _>(handler)
    }

    /// Declared input types, in registration order.
    pub fn input_types(&self) -> Vec<TypeDescriptor> {
        self.entries.iter().map(|e| e.input.clone()).collect()
    }

    /// True if any handler accepts the envelope.
    pub fn accepts(&self, envelope: &Envelope) -> bool {
        self.entries.iter().any(|e| envelope.matches(&e.input))
    }

    /// Dispatch to the most specific matching handler.
    pub async fn dispatch(
        &self,
        executor_id: &str,
        envelope: Envelope,
        ctx: WorkflowContext,
    ) -> Result<()> {
        let selected = self
            .entries
            .iter()
            .filter(|e| envelope.matches(&e.input))
            // max_by_key returns the last maximal element; enumerate and
            // negate the index so earlier registration wins ties.
            .enumerate()
            .max_by_key(|(index, e)| (e.input.specificity(), usize::MAX - *index))
            .map(|(_, e)| e);

        match selected {
            Some(entry) => (entry.handler)(envelope, ctx).await,
            None => Err(WorkflowError::dispatch(
                executor_id,
                envelope.type_name.clone(),
            )),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("inputs", &self.input_types())
            .finish()
    }
}

/// A named node with a handler table; the unit of dispatch.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Unique id within a workflow.
    fn id(&self) -> &str;

    /// The union of the handlers' declared input types. The scheduler
    /// only delivers messages matching one of these.
    fn input_types(&self) -> Vec<TypeDescriptor>;

    /// Declared output message types, used for build-time edge
    /// validation. An empty list means "dynamic": edges from this
    /// executor are admitted at build time and gated per message.
    fn output_types(&self) -> Vec<TypeDescriptor> {
        Vec::new()
    }

    /// Handle one inbound message.
    async fn handle(&self, envelope: Envelope, ctx: WorkflowContext) -> Result<()>;

    /// Snapshot serializable private state for checkpoints, when the
    /// executor keeps state outside the context's state store.
    fn snapshot_state(&self) -> Option<Value> {
        None
    }

    /// Restore private state from a checkpoint snapshot.
    fn restore_state(&self, _state: Value) -> Result<()> {
        Ok(())
    }

    /// True if any declared input type accepts the envelope.
    fn accepts(&self, envelope: &Envelope) -> bool {
        self.input_types().iter().any(|t| envelope.matches(t))
    }

    /// Run one message through this executor outside a workflow,
    /// emitting the same lifecycle events the scheduler would. Useful in
    /// tests and for embedding executors directly.
    async fn execute(
        &self,
        envelope: Envelope,
        source_ids: Vec<String>,
        shared_state: SharedState,
        runner: RunnerContext,
    ) -> Result<()> {
        let ctx = WorkflowContext::new(
            self.id().to_string(),
            source_ids,
            runner.clone(),
            shared_state,
        );
        runner.emit(WorkflowEvent::framework(EventKind::ExecutorInvoked {
            executor_id: self.id().to_string(),
        }));
        match self.handle(envelope, ctx).await {
            Ok(()) => {
                runner.emit(WorkflowEvent::framework(EventKind::ExecutorCompleted {
                    executor_id: self.id().to_string(),
                }));
                Ok(())
            }
            Err(err) => {
                runner.emit(WorkflowEvent::framework(EventKind::ExecutorFailed {
                    executor_id: self.id().to_string(),
                    error: err.to_string(),
                }));
                Err(err)
            }
        }
    }
}

/// Zero-arg factory producing a fresh executor instance. Builders use
/// factories to create isolated instances per built workflow.
pub type ExecutorFactory = Arc<dyn Fn() -> Arc<dyn Executor> + Send + Sync>;

/// Function-form executor: an id plus a handler registry.
pub struct FnExecutor {
    id: String,
    registry: HandlerRegistry,
    output_types: Vec<TypeDescriptor>,
}

impl FnExecutor {
    /// Create an executor from a registry.
    pub fn new(id: impl Into<String>, registry: HandlerRegistry) -> Self {
        Self {
            id: id.into(),
            registry,
            output_types: Vec::new(),
        }
    }

    /// Declare the output message types for build-time edge validation.
    pub fn with_output_types(mut self, output_types: Vec<TypeDescriptor>) -> Self {
        self.output_types = output_types;
        self
    }
}

#[async_trait]
impl Executor for FnExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    fn input_types(&self) -> Vec<TypeDescriptor> {
        self.registry.input_types()
    }

    fn output_types(&self) -> Vec<TypeDescriptor> {
        self.output_types.clone()
    }

    async fn handle(&self, envelope: Envelope, ctx: WorkflowContext) -> Result<()> {
        self.registry.dispatch(&self.id, envelope, ctx).await
    }
}

/// Wrap a single async function as an executor with a declared id.
pub fn executor_fn<T, F, Fut>(id: impl Into<String>, handler: F) -> Arc<FnExecutor>
where
    T: WorkflowMessage,
    F: Fn(T, WorkflowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnExecutor::new(
        id,
        HandlerRegistry::new().on::<T, _, _>(handler),
    ))
}
