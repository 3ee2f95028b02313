//! Run-state transitions and event origins across complete runs.

use agentflow_core::{
    executor_fn, Envelope, EventKind, EventOrigin, Executor, RunnerContext, SharedState,
    TypeRegistry, WorkflowBuilder, WorkflowContext, WorkflowError, WorkflowEvent,
    WorkflowRunState, INPUT_SOURCE_ID,
};
use futures::StreamExt;
use std::sync::Arc;

fn failing_executor() -> Arc<agentflow_core::FnExecutor> {
    executor_fn("f", |_msg: i64, _ctx: WorkflowContext| async move {
        Err(WorkflowError::Custom("boom".to_string()))
    })
}

fn simple_executor() -> Arc<agentflow_core::FnExecutor> {
    executor_fn("simple", |msg: String, ctx: WorkflowContext| async move {
        ctx.send_message(&msg)?;
        Ok(())
    })
}

fn requester() -> Arc<agentflow_core::FnExecutor> {
    executor_fn("req", |_msg: String, ctx: WorkflowContext| async move {
        ctx.request_info::<String, String>(&"Mock request data".to_string())?;
        Ok(())
    })
}

fn completer(id: &str) -> Arc<agentflow_core::FnExecutor> {
    executor_fn(id, |msg: String, ctx: WorkflowContext| async move {
        ctx.yield_output(&msg)?;
        Ok(())
    })
}

async fn collect_stream(
    wf: &agentflow_core::Workflow,
    input: &str,
) -> Vec<WorkflowEvent> {
    wf.run_stream(&input.to_string())
        .await
        .unwrap()
        .collect::<Vec<_>>()
        .await
}

#[tokio::test]
async fn test_executor_failed_and_workflow_failed_events_streaming() {
    let wf = WorkflowBuilder::new()
        .start_with(failing_executor())
        .build()
        .unwrap();

    let events = wf
        .run_stream(&0i64)
        .await
        .unwrap()
        .collect::<Vec<_>>()
        .await;

    let failed: Vec<_> = events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::WorkflowFailed { .. }))
        .collect();
    assert!(!failed.is_empty());
    assert!(failed.iter().all(|e| e.origin == EventOrigin::Framework));

    let status: Vec<_> = events.iter().filter(|e| e.status().is_some()).collect();
    assert!(!status.is_empty());
    assert_eq!(
        status.last().unwrap().status(),
        Some(WorkflowRunState::Failed)
    );
    assert!(status.iter().all(|e| e.origin == EventOrigin::Framework));
}

#[tokio::test]
async fn test_executor_failed_event_emitted_on_direct_execute() {
    let failing = failing_executor();
    let runner = RunnerContext::new(TypeRegistry::new());
    let shared = SharedState::new();

    let err = failing
        .execute(
            Envelope::new(&0i64).unwrap(),
            vec![INPUT_SOURCE_ID.to_string()],
            shared,
            runner.clone(),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("boom"));

    let drained = runner.drain_events();
    let failed: Vec<_> = drained
        .iter()
        .filter(|e| matches!(e.kind, EventKind::ExecutorFailed { .. }))
        .collect();
    assert!(!failed.is_empty());
    assert!(failed.iter().all(|e| e.origin == EventOrigin::Framework));
}

#[tokio::test]
async fn test_idle_with_pending_requests_status_streaming() {
    let wf = WorkflowBuilder::new()
        .start_with(simple_executor())
        .register_executor(requester())
        .add_edge("simple", "req")
        .build()
        .unwrap();

    let events = collect_stream(&wf, "start").await;

    assert!(events
        .iter()
        .any(|e| matches!(e.kind, EventKind::RequestInfo(_))));

    let statuses: Vec<WorkflowRunState> =
        events.iter().filter_map(WorkflowEvent::status).collect();
    assert!(statuses.len() >= 3);
    assert_eq!(
        statuses[statuses.len() - 2],
        WorkflowRunState::InProgressPendingRequests
    );
    assert_eq!(
        statuses[statuses.len() - 1],
        WorkflowRunState::IdleWithPendingRequests
    );
}

#[tokio::test]
async fn test_completed_status_streaming() {
    let wf = WorkflowBuilder::new()
        .start_with(completer("c"))
        .build()
        .unwrap();

    let events = collect_stream(&wf, "ok").await;
    let statuses: Vec<_> = events.iter().filter(|e| e.status().is_some()).collect();
    assert!(!statuses.is_empty());
    assert_eq!(
        statuses.last().unwrap().status(),
        Some(WorkflowRunState::Idle)
    );
    assert!(statuses.iter().all(|e| e.origin == EventOrigin::Framework));
}

#[tokio::test]
async fn test_started_and_completed_event_origins() {
    let wf = WorkflowBuilder::new()
        .start_with(completer("c-origin"))
        .build()
        .unwrap();

    let events = collect_stream(&wf, "payload").await;

    let started = events
        .iter()
        .find(|e| matches!(e.kind, EventKind::WorkflowStarted))
        .expect("expected a started event");
    assert_eq!(started.origin, EventOrigin::Framework);

    let idle = events
        .iter()
        .find(|e| e.status() == Some(WorkflowRunState::Idle))
        .expect("expected an idle status");
    assert_eq!(idle.origin, EventOrigin::Framework);
}

#[tokio::test]
async fn test_non_streaming_final_state_helpers() {
    let wf1 = WorkflowBuilder::new()
        .start_with(completer("c"))
        .build()
        .unwrap();
    let result1 = wf1.run(&"done".to_string()).await.unwrap();
    assert_eq!(result1.get_final_state(), Some(WorkflowRunState::Idle));

    let wf2 = WorkflowBuilder::new()
        .start_with(simple_executor())
        .register_executor(requester())
        .add_edge("simple", "req")
        .build()
        .unwrap();
    let result2 = wf2.run(&"start".to_string()).await.unwrap();
    assert_eq!(
        result2.get_final_state(),
        Some(WorkflowRunState::IdleWithPendingRequests)
    );
}

#[tokio::test]
async fn test_run_includes_status_events_completed() {
    let wf = WorkflowBuilder::new()
        .start_with(completer("c2"))
        .build()
        .unwrap();
    let result = wf.run(&"ok".to_string()).await.unwrap();
    let timeline = result.status_timeline();
    assert!(!timeline.is_empty(), "expected a status timeline");
    assert_eq!(timeline.last(), Some(&WorkflowRunState::Idle));
}

#[tokio::test]
async fn test_run_includes_status_events_idle_with_requests() {
    let wf = WorkflowBuilder::new()
        .start_with(simple_executor())
        .register_executor(requester())
        .add_edge("simple", "req")
        .build()
        .unwrap();
    let result = wf.run(&"start".to_string()).await.unwrap();
    let timeline = result.status_timeline();
    assert!(timeline.len() >= 3);
    assert_eq!(
        timeline[timeline.len() - 2],
        WorkflowRunState::InProgressPendingRequests
    );
    assert_eq!(
        timeline[timeline.len() - 1],
        WorkflowRunState::IdleWithPendingRequests
    );
}

#[tokio::test]
async fn test_status_transitions_are_monotonic() {
    let wf = WorkflowBuilder::new()
        .start_with(simple_executor())
        .register_executor(completer("end"))
        .add_edge("simple", "end")
        .build()
        .unwrap();
    let result = wf.run(&"x".to_string()).await.unwrap();

    // InProgress states never reappear after a terminal state.
    let timeline = result.status_timeline();
    let terminal_at = timeline
        .iter()
        .position(|s| s.is_terminal())
        .expect("expected a terminal state");
    assert_eq!(terminal_at, timeline.len() - 1);
}
