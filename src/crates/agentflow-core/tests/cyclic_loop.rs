//! Cyclic graphs: a guess/judge loop that converges by binary search.

use agentflow_core::{
    executor_fn, FnExecutor, HandlerRegistry, WorkflowBuilder, WorkflowContext, WorkflowMessage,
    WorkflowRunState,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Guess {
    value: i64,
}
impl WorkflowMessage for Guess {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Verdict {
    text: String,
}
impl WorkflowMessage for Verdict {}

const TARGET: i64 = 30;

/// Judge: compares a guess to the hidden target.
fn judge() -> Arc<FnExecutor> {
    executor_fn("judge", |guess: Guess, ctx: WorkflowContext| async move {
        let text = if guess.value == TARGET {
            "MATCHED"
        } else if guess.value > TARGET {
            "ABOVE"
        } else {
            "BELOW"
        };
        ctx.send_message(&Verdict {
            text: text.to_string(),
        })?;
        Ok(())
    })
}

/// Guesser: binary search over [1, 100], narrowing on each verdict.
fn guesser() -> Arc<FnExecutor> {
    let registry = HandlerRegistry::new()
        .on::<String, _, _>(|_start: String, ctx: WorkflowContext| async move {
            ctx.set_state(json!({"low": 1, "high": 100, "guesses": 0}));
            next_guess(&ctx)
        })
        .on::<Verdict, _, _>(|verdict: Verdict, ctx: WorkflowContext| async move {
            let state = ctx.get_state().unwrap_or(json!({}));
            let low = state["low"].as_i64().unwrap_or(1);
            let high = state["high"].as_i64().unwrap_or(100);
            let guesses = state["guesses"].as_i64().unwrap_or(0);
            let last = (low + high) / 2;

            match verdict.text.as_str() {
                "MATCHED" => {
                    ctx.yield_output(&format!("Guessed the number: {last}"))?;
                    Ok(())
                }
                "ABOVE" => {
                    ctx.set_state(json!({"low": low, "high": last - 1, "guesses": guesses}));
                    next_guess(&ctx)
                }
                _ => {
                    ctx.set_state(json!({"low": last + 1, "high": high, "guesses": guesses}));
                    next_guess(&ctx)
                }
            }
        });
    Arc::new(FnExecutor::new("guesser", registry))
}

fn next_guess(ctx: &WorkflowContext) -> agentflow_core::Result<()> {
    let state = ctx.get_state().unwrap_or(json!({}));
    let low = state["low"].as_i64().unwrap_or(1);
    let high = state["high"].as_i64().unwrap_or(100);
    let guesses = state["guesses"].as_i64().unwrap_or(0) + 1;
    ctx.set_state(json!({"low": low, "high": high, "guesses": guesses}));
    ctx.send_message(&Guess {
        value: (low + high) / 2,
    })?;
    Ok(())
}

#[tokio::test]
async fn test_guessing_loop_converges_within_seven_guesses() {
    let wf = WorkflowBuilder::new()
        .start_with(guesser())
        .register_executor(judge())
        .add_edge("guesser", "judge")
        .add_edge("judge", "guesser")
        .build()
        .unwrap();

    let result = wf.run(&"start".to_string()).await.unwrap();

    assert_eq!(result.get_final_state(), Some(WorkflowRunState::Idle));
    assert_eq!(
        result.get_outputs(),
        vec![json!(format!("Guessed the number: {TARGET}"))]
    );

    let guesses = wf
        .runner_context()
        .get_executor_state("guesser")
        .and_then(|s| s["guesses"].as_i64())
        .unwrap();
    assert!(guesses <= 7, "binary search took {guesses} guesses");
}

#[tokio::test]
async fn test_loop_without_termination_hits_iteration_cap() {
    // Same loop, but the judge never says MATCHED.
    let stubborn_judge = executor_fn("judge", |_guess: Guess, ctx: WorkflowContext| async move {
        ctx.send_message(&Verdict {
            text: "ABOVE".to_string(),
        })?;
        Ok(())
    });

    let wf = WorkflowBuilder::new()
        .start_with(guesser())
        .register_executor(stubborn_judge)
        .add_edge("guesser", "judge")
        .add_edge("judge", "guesser")
        .with_max_iterations(10)
        .build()
        .unwrap();

    let err = wf.run(&"start".to_string()).await.unwrap_err();
    assert!(matches!(
        err,
        agentflow_core::WorkflowError::IterationLimitExceeded { .. }
    ));
}
