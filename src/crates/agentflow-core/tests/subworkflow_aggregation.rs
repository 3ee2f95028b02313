//! Sub-workflow composition: a parent fans texts into a child workflow
//! and aggregates the child's outputs.

use agentflow_core::{
    executor_fn, FnExecutor, HandlerRegistry, SubWorkflowExecutor, Workflow, WorkflowBuilder,
    WorkflowContext, WorkflowRunState,
};
use serde_json::json;
use std::sync::Arc;

/// Child workflow: one executor that counts words in a text.
fn word_count_child() -> Workflow {
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
async fn test_parent_aggregates_child_word_counts() {
    let texts = vec![
        "one two three four five six".to_string(),
        "a b c d e f g h i j".to_string(),
        "hello world".to_string(),
        "w w w w w w w w w w w w w w w w w w w w".to_string(),
        String::new(),
        "x y z".to_string(),
    ];
    let expected_total: u64 = 6 + 10 + 2 + 20 + 0 + 3;

    // Spread: one message per text, all routed to the sub-workflow.
    let spread = executor_fn(
        "spread",
        |texts: Vec<String>, ctx: WorkflowContext| async move {
            ctx.set_shared_state("expected", texts.len() as u64).await?;
            for text in &texts {
                ctx.send_message(text)?;
            }
            Ok(())
        },
    );

    let sub = Arc::new(SubWorkflowExecutor::new(word_count_child(), "counter"));

    // Aggregate: accumulate counts until every text is accounted for.
    let aggregate = Arc::new(FnExecutor::new(
        "aggregate",
        HandlerRegistry::new().on::<u64, _, _>(|count: u64, ctx: WorkflowContext| async move {
            let expected: u64 = ctx
                .get_shared_state("expected")
                .await
                .and_then(|v| v.as_u64())
                .unwrap_or(0);

            let mut hold = ctx.hold_shared_state().await?;
            let seen: u64 = hold.get_within_hold_as("seen")?.unwrap_or(0) + 1;
            let total: u64 = hold.get_within_hold_as("total")?.unwrap_or(0) + count;
            hold.set_within_hold("seen", seen)?;
            hold.set_within_hold("total", total)?;
            drop(hold);

            if seen == expected {
                ctx.yield_output(&json!({
                    "total_texts": seen,
                    "total_words": total,
                }))?;
            }
            Ok(())
        }),
    ));

    let wf = WorkflowBuilder::new()
        .start_with(spread)
        .register_executor(sub)
        .register_executor(aggregate)
        .add_edge("spread", "counter")
        .add_edge("counter", "aggregate")
        .build()
        .unwrap();

    let result = wf.run(&texts).await.unwrap();

    assert_eq!(result.get_final_state(), Some(WorkflowRunState::Idle));
    assert_eq!(
        result.get_outputs(),
        vec![json!({"total_texts": 6, "total_words": expected_total})]
    );
}
