//! The superstep scheduler.
//!
//! One superstep drains the queue snapshot, routes each message along
//! its source's edges (applying predicates and selectors, accumulating
//! fan-in windows), and dispatches the resulting deliveries
//! sequentially. Messages enqueued during a superstep are deferred to
//! the next. After all deliveries complete the scheduler decides the
//! next state: more messages → continue; quiescent → `Idle` or
//! `IdleWithPendingRequests`; a failed handler, an exceeded iteration
//! cap, or an external cancel → `Failed`.
//!
//! Ordering guarantees: the queue snapshot is dispatched in
//! `(source executor id, enqueue index)` order; events emitted from a
//! single handler appear on the stream in emission order; no event
//! reorders relative to its emitting superstep.

use crate::context::{QueuedMessage, RunnerContext, INPUT_SOURCE_ID, RESPONSES_SOURCE_ID};
use crate::edge::EdgeGroup;
use crate::envelope::Envelope;
use crate::error::{Result, WorkflowError};
use crate::event::{EventKind, WorkflowEvent, WorkflowRunState};
use crate::typing::TypeDescriptor;
use crate::workflow::WorkflowInner;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative cancellation signal for a run.
///
/// On cancel, the in-flight handler finishes its current suspension
/// point; the runner then stops dispatching, emits `WorkflowFailed` with
/// a cancellation kind and transitions to `Failed`.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create an un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Has cancellation been signalled?
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-run options.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// External cancellation signal.
    pub cancellation: CancellationToken,
    /// Optional soft timeout applied to each handler invocation.
    pub handler_timeout: Option<Duration>,
}

impl RunOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cancellation token.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Set the per-handler soft timeout.
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }
}

/// One resolved delivery: a message bound for a target executor.
struct Delivery {
    target_id: String,
    envelope: Envelope,
    source_ids: Vec<String>,
}

fn emit_status(runner: &RunnerContext, state: WorkflowRunState) {
    runner.emit(WorkflowEvent::framework(EventKind::Status { state }));
}

fn fail<T>(wf: &WorkflowInner, err: WorkflowError) -> Result<T> {
    tracing::error!(workflow_id = %wf.id, error = %err, "workflow failed");
    wf.runner
        .emit(WorkflowEvent::framework(EventKind::WorkflowFailed {
            error: err.to_string(),
        }));
    emit_status(&wf.runner, WorkflowRunState::Failed);
    Err(err)
}

/// Drive supersteps until quiescence, failure or cancellation.
pub(crate) async fn run_loop(
    wf: Arc<WorkflowInner>,
    options: RunOptions,
    fresh: bool,
) -> Result<()> {
    let runner = wf.runner.clone();
    if fresh {
        tracing::info!(workflow_id = %wf.id, "workflow run started");
        runner.emit(WorkflowEvent::framework(EventKind::WorkflowStarted));
    }
    emit_status(&runner, WorkflowRunState::InProgress);

    loop {
        if options.cancellation.is_cancelled() {
            return fail(&wf, WorkflowError::Cancelled);
        }

        let batch = runner.drain_queue();
        if batch.is_empty() {
            return finish_idle(&wf);
        }

        let max_iterations = wf.max_iterations.load(Ordering::Relaxed);
        let iteration = wf.iteration.load(Ordering::Relaxed);
        if iteration >= max_iterations {
            return fail(&wf, WorkflowError::IterationLimitExceeded { max_iterations });
        }
        wf.iteration.store(iteration + 1, Ordering::Relaxed);
        tracing::debug!(
            workflow_id = %wf.id,
            superstep = iteration + 1,
            messages = batch.len(),
            "superstep begin"
        );

        let deliveries = route_batch(&wf, &runner, batch);
        for delivery in deliveries {
            if let Err(err) = dispatch_one(&wf, &runner, delivery, &options).await {
                return fail(&wf, err);
            }
            if options.cancellation.is_cancelled() {
                return fail(&wf, WorkflowError::Cancelled);
            }
        }

        if wf.auto_checkpoint {
            let iteration_count = wf.iteration.load(Ordering::Relaxed);
            let mut metadata = HashMap::new();
            metadata.insert("superstep".to_string(), Value::from(iteration_count as u64));
            if let Err(err) = runner
                .create_checkpoint(
                    &wf.id,
                    &wf.shared_state,
                    iteration_count,
                    max_iterations,
                    metadata,
                )
                .await
            {
                return fail(&wf, err);
            }
        }

        let pending = runner.has_pending_requests();
        if pending {
            emit_status(&runner, WorkflowRunState::InProgressPendingRequests);
        }
        if runner.queued_message_count() == 0 {
            return finish_idle(&wf);
        }
        if !pending {
            emit_status(&runner, WorkflowRunState::InProgress);
        }
    }
}

fn finish_idle(wf: &WorkflowInner) -> Result<()> {
    let state = if wf.runner.has_pending_requests() {
        WorkflowRunState::IdleWithPendingRequests
    } else {
        WorkflowRunState::Idle
    };
    tracing::info!(workflow_id = %wf.id, ?state, "workflow quiesced");
    emit_status(&wf.runner, state);
    Ok(())
}

/// Route one queue snapshot into concrete deliveries.
///
/// Input and response messages are addressed directly. Everything else
/// follows the source's edge groups; a targeted message with no
/// matching edge is delivered directly as a fallback (used by
/// coordinator patterns that address specialists explicitly).
fn route_batch(
    wf: &WorkflowInner,
    runner: &RunnerContext,
    batch: Vec<QueuedMessage>,
) -> Vec<Delivery> {
    let mut deliveries = Vec::new();

    for message in batch {
        if message.source_id == INPUT_SOURCE_ID || message.source_id == RESPONSES_SOURCE_ID {
            if let Some(target_id) = message.target_id {
                deliveries.push(Delivery {
                    target_id,
                    envelope: message.envelope,
                    source_ids: vec![message.source_id],
                });
            }
            continue;
        }

        let mut routed = false;
        for group in &wf.edge_groups {
            if !group.has_source(&message.source_id) {
                continue;
            }
            match group {
                EdgeGroup::Single(edge) => {
                    if let Some(target) = &message.target_id {
                        if target != &edge.target {
                            continue;
                        }
                    }
                    routed = true;
                    if edge.admits(&message.envelope) {
                        deliveries.push(Delivery {
                            target_id: edge.target.clone(),
                            envelope: message.envelope.clone(),
                            source_ids: vec![message.source_id.clone()],
                        });
                    } else {
                        tracing::debug!(
                            source = %message.source_id,
                            target = %edge.target,
                            "edge predicate rejected message"
                        );
                    }
                }
                EdgeGroup::FanOut {
                    edges, selector, ..
                } => {
                    let all_targets: Vec<String> =
                        edges.iter().map(|e| e.target.clone()).collect();
                    let selected =
                        selector.as_ref().map(|s| s(&message.envelope, &all_targets));
                    for edge in edges {
                        if let Some(target) = &message.target_id {
                            if target != &edge.target {
                                continue;
                            }
                        }
                        routed = true;
                        if let Some(selected) = &selected {
                            if !selected.contains(&edge.target) {
                                continue;
                            }
                        }
                        if edge.admits(&message.envelope) {
                            deliveries.push(Delivery {
                                target_id: edge.target.clone(),
                                envelope: message.envelope.clone(),
                                source_ids: vec![message.source_id.clone()],
                            });
                        }
                    }
                }
                EdgeGroup::FanIn {
                    id,
                    sources,
                    target,
                } => {
                    if let Some(requested) = &message.target_id {
                        if requested != target {
                            continue;
                        }
                    }
                    routed = true;
                    runner.fan_in_store(id, &message.source_id, message.envelope.clone());
                    if let Some(contributions) = runner.fan_in_take_if_complete(id, sources) {
                        tracing::debug!(group = %id, target = %target, "fan-in group ready");
                        let source_ids =
                            contributions.iter().map(|(s, _)| s.clone()).collect();
                        deliveries.push(Delivery {
                            target_id: target.clone(),
                            envelope: assemble_fan_in(&contributions),
                            source_ids,
                        });
                    }
                }
            }
        }

        if !routed {
            match message.target_id {
                Some(target_id) => {
                    tracing::debug!(
                        source = %message.source_id,
                        target = %target_id,
                        "no edge for targeted message; delivering directly"
                    );
                    deliveries.push(Delivery {
                        target_id,
                        envelope: message.envelope,
                        source_ids: vec![message.source_id],
                    });
                }
                None => {
                    tracing::debug!(
                        source = %message.source_id,
                        "message from executor with no outgoing edges dropped"
                    );
                }
            }
        }
    }

    deliveries
}

/// Build the list-typed envelope a fan-in target receives.
fn assemble_fan_in(contributions: &[(String, Envelope)]) -> Envelope {
    let mut element_descriptors: Vec<TypeDescriptor> = Vec::new();
    let mut element_names: Vec<String> = Vec::new();
    for (_, envelope) in contributions {
        if !element_descriptors.contains(&envelope.descriptor) {
            element_descriptors.push(envelope.descriptor.clone());
        }
        if !element_names.contains(&envelope.type_name) {
            element_names.push(envelope.type_name.clone());
        }
    }
    let element = if element_descriptors.len() == 1 {
        element_descriptors.remove(0)
    } else {
        TypeDescriptor::union(element_descriptors)
    };
    let body = Value::Array(contributions.iter().map(|(_, e)| e.body.clone()).collect());
    Envelope::from_parts(
        format!("list[{}]", element_names.join(" | ")),
        TypeDescriptor::sequence_of(element),
        body,
    )
}

async fn dispatch_one(
    wf: &WorkflowInner,
    runner: &RunnerContext,
    delivery: Delivery,
    options: &RunOptions,
) -> Result<()> {
    let Some(executor) = wf.executors.get(&delivery.target_id) else {
        return Err(WorkflowError::dispatch(
            &delivery.target_id,
            delivery.envelope.type_name.clone(),
        ));
    };

    if !executor.accepts(&delivery.envelope) {
        let err = WorkflowError::dispatch(executor.id(), delivery.envelope.type_name.clone());
        runner.emit(WorkflowEvent::framework(EventKind::ExecutorFailed {
            executor_id: executor.id().to_string(),
            error: err.to_string(),
        }));
        return Err(err);
    }

    runner.emit(WorkflowEvent::framework(EventKind::ExecutorInvoked {
        executor_id: executor.id().to_string(),
    }));

    let ctx = crate::context::WorkflowContext::new(
        executor.id().to_string(),
        delivery.source_ids,
        runner.clone(),
        wf.shared_state.clone(),
    );
    let invocation = executor.handle(delivery.envelope, ctx);
    let outcome = match options.handler_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, invocation).await {
            Ok(result) => result,
            Err(_) => Err(WorkflowError::HandlerTimeout {
                executor_id: executor.id().to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        },
        None => invocation.await,
    };

    match outcome {
        Ok(()) => {
            runner.emit(WorkflowEvent::framework(EventKind::ExecutorCompleted {
                executor_id: executor.id().to_string(),
            }));
            Ok(())
        }
        Err(err) => {
            tracing::error!(executor_id = %executor.id(), error = %err, "handler failed");
            runner.emit(WorkflowEvent::framework(EventKind::ExecutorFailed {
                executor_id: executor.id().to_string(),
                error: err.to_string(),
            }));
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkflowContext;
    use crate::executor::executor_fn;
    use crate::workflow::WorkflowBuilder;

    #[tokio::test]
    async fn test_linear_run_reaches_idle() {
        let first = executor_fn("first", |msg: String, ctx: WorkflowContext| async move {
            ctx.send_message(&format!("{msg}!"))?;
            Ok(())
        });
        let second = executor_fn("second", |msg: String, ctx: WorkflowContext| async move {
            ctx.yield_output(&msg)?;
            Ok(())
        });

        let wf = WorkflowBuilder::new()
            .start_with(first)
            .register_executor(second)
            .add_edge("first", "second")
            .build()
            .unwrap();

        let result = wf.run(&"hello".to_string()).await.unwrap();
        assert_eq!(result.get_outputs(), vec![serde_json::json!("hello!")]);
        assert_eq!(
            result.get_final_state(),
            Some(WorkflowRunState::Idle)
        );
    }

    #[tokio::test]
    async fn test_iteration_cap_fails_with_quota_kind() {
        // A self-loop that never terminates on its own.
        let looper = executor_fn("looper", |msg: i64, ctx: WorkflowContext| async move {
            ctx.send_message(&(msg + 1))?;
            Ok(())
        });

        let wf = WorkflowBuilder::new()
            .start_with(looper)
            .add_edge("looper", "looper")
            .with_max_iterations(5)
            .build()
            .unwrap();

        let err = wf.run(&0i64).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::IterationLimitExceeded { max_iterations: 5 }
        ));
    }

    #[tokio::test]
    async fn test_cancellation_fails_the_run() {
        let looper = executor_fn("looper", |msg: i64, ctx: WorkflowContext| async move {
            ctx.send_message(&(msg + 1))?;
            Ok(())
        });

        let wf = WorkflowBuilder::new()
            .start_with(looper)
            .add_edge("looper", "looper")
            .with_max_iterations(1_000)
            .build()
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let err = wf
            .run_with_options(&0i64, RunOptions::new().with_cancellation(token))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled));
    }

    #[tokio::test]
    async fn test_handler_timeout() {
        let sleeper = executor_fn("sleeper", |_msg: String, _ctx: WorkflowContext| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });

        let wf = WorkflowBuilder::new().start_with(sleeper).build().unwrap();
        let err = wf
            .run_with_options(
                &"x".to_string(),
                RunOptions::new().with_handler_timeout(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::HandlerTimeout { .. }));
    }

    #[tokio::test]
    async fn test_conditional_edge_skips_rejected_messages() {
        let gate = executor_fn("gate", |msg: String, ctx: WorkflowContext| async move {
            ctx.send_message(&msg)?;
            Ok(())
        });
        let sink = executor_fn("sink", |msg: String, ctx: WorkflowContext| async move {
            ctx.yield_output(&msg)?;
            Ok(())
        });

        let wf = WorkflowBuilder::new()
            .start_with(gate)
            .register_executor(sink)
            .add_edge_with(
                "gate",
                "sink",
                Arc::new(|env: &Envelope| env.body.as_str() == Some("pass")),
            )
            .build()
            .unwrap();

        let blocked = wf.run(&"fail".to_string()).await.unwrap();
        assert!(blocked.get_outputs().is_empty());

        let admitted = wf.run(&"pass".to_string()).await.unwrap();
        assert_eq!(admitted.get_outputs(), vec![serde_json::json!("pass")]);
    }
}
