//! Magentic orchestration: a manager plans, picks a participant per
//! round, tracks a progress ledger, and optionally pauses for a human
//! plan review before executing.
//!
//! The loop is bounded three ways: a round cap, a stall cap (rounds
//! judged to make no progress), and a reset cap (how many times the
//! manager may re-plan after stalling out).

use agentflow_core::{
    Agent, AgentExecutor, AgentExecutorRequest, AgentExecutorResponse, ChatMessage, Envelope,
    Executor, RequestResponse, Result, TypeDescriptor, Workflow, WorkflowBuilder, WorkflowContext,
    WorkflowError, WorkflowMessage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default round cap.
pub const DEFAULT_MAX_ROUNDS: usize = 20;
/// Default stall cap.
pub const DEFAULT_MAX_STALLS: usize = 3;
/// Default reset cap.
pub const DEFAULT_MAX_RESETS: usize = 2;

/// The manager's working ledger for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MagenticLedger {
    /// The task under execution.
    pub task: String,
    /// The current plan text.
    pub plan: String,
    /// Participant executor ids.
    pub participants: Vec<String>,
    /// The conversation so far.
    pub transcript: Vec<ChatMessage>,
    /// Completed rounds.
    pub round: usize,
    /// Consecutive rounds judged stalled.
    pub stall_count: usize,
    /// Re-plans performed so far.
    pub reset_count: usize,
}

/// A manager's judgement of the current ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MagenticProgress {
    /// The task is complete; the manager can produce a final answer.
    pub is_complete: bool,
    /// The last round made no progress.
    pub is_stalled: bool,
}

/// The planning/selection brain of a Magentic workflow.
///
/// Implementations typically wrap a chat client; tests use scripted
/// managers.
#[async_trait]
pub trait MagenticManager: Send + Sync {
    /// Produce (or re-produce) a plan for the task.
    async fn plan(&self, task: &str, participants: &[String]) -> Result<String>;

    /// Pick the participant to act next round.
    async fn select_participant(&self, ledger: &MagenticLedger) -> Result<String>;

    /// Judge progress after a round.
    async fn evaluate(&self, ledger: &MagenticLedger) -> Result<MagenticProgress>;

    /// Produce the final answer once complete (or when caps force
    /// termination).
    async fn final_answer(&self, ledger: &MagenticLedger) -> Result<String>;
}

/// Plan-review request surfaced when human review is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MagenticPlanReviewRequest {
    /// The task being planned for.
    pub task: String,
    /// The proposed plan.
    pub plan: String,
}

impl WorkflowMessage for MagenticPlanReviewRequest {
    fn type_name() -> String {
        "agentflow::MagenticPlanReviewRequest".to_string()
    }
}

/// A human's verdict on a proposed plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum MagenticPlanReviewResponse {
    /// Execute the plan as proposed.
    Approve,
    /// Execute a revised plan instead.
    Revise {
        /// The replacement plan text.
        plan: String,
    },
}

impl WorkflowMessage for MagenticPlanReviewResponse {
    fn type_name() -> String {
        "agentflow::MagenticPlanReviewResponse".to_string()
    }
}

struct MagenticOrchestrator {
    id: String,
    manager: Arc<dyn MagenticManager>,
    participant_ids: Vec<String>,
    max_rounds: usize,
    max_stalls: usize,
    max_resets: usize,
    plan_review: bool,
}

impl MagenticOrchestrator {
    async fn dispatch_next(&self, ledger: &mut MagenticLedger, ctx: &WorkflowContext) -> Result<()> {
        let participant = self.manager.select_participant(ledger).await?;
        if !self.participant_ids.contains(&participant) {
            return Err(WorkflowError::Custom(format!(
                "manager selected unknown participant '{participant}'"
            )));
        }
        tracing::debug!(round = ledger.round, participant = %participant, "magentic dispatch");

        let mut messages = vec![ChatMessage::system(format!(
            "Task: {}\nPlan: {}",
            ledger.task, ledger.plan
        ))];
        messages.extend(ledger.transcript.iter().cloned());
        ctx.set_state(serde_json::to_value(&ledger)?);
        ctx.send_message_to(&AgentExecutorRequest::respond_to(messages), participant)?;
        Ok(())
    }

    async fn finish(&self, ledger: &MagenticLedger, ctx: &WorkflowContext) -> Result<()> {
        let answer = self.manager.final_answer(ledger).await?;
        ctx.set_state(serde_json::to_value(ledger)?);
        ctx.yield_output(&answer)?;
        Ok(())
    }

    async fn advance(&self, mut ledger: MagenticLedger, ctx: &WorkflowContext) -> Result<()> {
        let progress = self.manager.evaluate(&ledger).await?;
        if progress.is_complete {
            return self.finish(&ledger, ctx).await;
        }
        if progress.is_stalled {
            ledger.stall_count += 1;
        } else {
            ledger.stall_count = 0;
        }

        if ledger.stall_count > self.max_stalls {
            if ledger.reset_count >= self.max_resets {
                tracing::warn!(task = %ledger.task, "magentic reset cap reached");
                return self.finish(&ledger, ctx).await;
            }
            // Re-plan and start over with the transcript retained.
            ledger.reset_count += 1;
            ledger.stall_count = 0;
            ledger.plan = self
                .manager
                .plan(&ledger.task, &self.participant_ids)
                .await?;
            tracing::info!(resets = ledger.reset_count, "magentic re-planned");
        }

        if ledger.round >= self.max_rounds {
            tracing::warn!(task = %ledger.task, "magentic round cap reached");
            return self.finish(&ledger, ctx).await;
        }

        self.dispatch_next(&mut ledger, ctx).await
    }
}

#[async_trait]
impl Executor for MagenticOrchestrator {
    fn id(&self) -> &str {
        &self.id
    }

    fn input_types(&self) -> Vec<TypeDescriptor> {
        vec![
            AgentExecutorResponse::descriptor(),
            RequestResponse::descriptor(),
            TypeDescriptor::String,
        ]
    }

    fn output_types(&self) -> Vec<TypeDescriptor> {
        vec![AgentExecutorRequest::descriptor()]
    }

    async fn handle(&self, envelope: Envelope, ctx: WorkflowContext) -> Result<()> {
        if envelope.is::<RequestResponse>() {
            // Plan-review verdict.
            let response: RequestResponse = envelope.decode()?;
            let verdict: MagenticPlanReviewResponse = response.data_as()?;
            let mut ledger: MagenticLedger = ctx
                .get_state()
                .map(serde_json::from_value)
                .transpose()?
                .ok_or_else(|| {
                    WorkflowError::Custom("plan review verdict without a ledger".to_string())
                })?;
            if let MagenticPlanReviewResponse::Revise { plan } = verdict {
                ledger.plan = plan;
            }
            return self.dispatch_next(&mut ledger, &ctx).await;
        }

        if envelope.is::<AgentExecutorResponse>() {
            // A participant acted: fold its reply into the ledger.
            let response: AgentExecutorResponse = envelope.decode()?;
            let mut ledger: MagenticLedger = ctx
                .get_state()
                .map(serde_json::from_value)
                .transpose()?
                .ok_or_else(|| {
                    WorkflowError::Custom("participant response without a ledger".to_string())
                })?;
            ledger
                .transcript
                .extend(response.agent_response.messages.clone());
            ledger.round += 1;
            return self.advance(ledger, &ctx).await;
        }

        // Fresh task.
        let task: String = envelope.decode()?;
        let plan = self.manager.plan(&task, &self.participant_ids).await?;
        let mut ledger = MagenticLedger {
            task: task.clone(),
            plan: plan.clone(),
            participants: self.participant_ids.clone(),
            transcript: vec![ChatMessage::user(task)],
            round: 0,
            stall_count: 0,
            reset_count: 0,
        };

        if self.plan_review {
            ctx.set_state(serde_json::to_value(&ledger)?);
            ctx.request_info::<MagenticPlanReviewRequest, MagenticPlanReviewResponse>(
                &MagenticPlanReviewRequest {
                    task: ledger.task.clone(),
                    plan,
                },
            )?;
            return Ok(());
        }

        self.dispatch_next(&mut ledger, &ctx).await
    }
}

/// Builds a manager-driven Magentic workflow.
pub struct MagenticBuilder {
    manager: Option<Arc<dyn MagenticManager>>,
    participants: Vec<Arc<dyn Agent>>,
    max_rounds: usize,
    max_stalls: usize,
    max_resets: usize,
    plan_review: bool,
    request_info_filter: Option<Option<Vec<String>>>,
    name: Option<String>,
}

impl Default for MagenticBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MagenticBuilder {
    /// Create an empty builder with the default caps.
    pub fn new() -> Self {
        Self {
            manager: None,
            participants: Vec::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_stalls: DEFAULT_MAX_STALLS,
            max_resets: DEFAULT_MAX_RESETS,
            plan_review: false,
            request_info_filter: None,
            name: None,
        }
    }

    /// Set the manager.
    pub fn manager(mut self, manager: Arc<dyn MagenticManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Set the participants.
    pub fn participants(mut self, participants: Vec<Arc<dyn Agent>>) -> Self {
        self.participants = participants;
        self
    }

    /// Cap the number of rounds.
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Cap consecutive stalled rounds before a re-plan.
    pub fn with_max_stalls(mut self, max_stalls: usize) -> Self {
        self.max_stalls = max_stalls;
        self
    }

    /// Cap re-plans before forced termination.
    pub fn with_max_resets(mut self, max_resets: usize) -> Self {
        self.max_resets = max_resets;
        self
    }

    /// Pause for a human plan review before executing.
    pub fn with_plan_review(mut self) -> Self {
        self.plan_review = true;
        self
    }

    /// Pause every participant's output for human review before the
    /// manager folds it into the ledger.
    pub fn with_request_info(mut self) -> Self {
        self.request_info_filter = Some(None);
        self
    }

    /// Pause only the named participants' outputs.
    pub fn with_request_info_for(mut self, participants: Vec<String>) -> Self {
        self.request_info_filter = Some(Some(participants));
        self
    }

    /// Set the workflow name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Assemble and validate the workflow.
    pub fn build(self) -> Result<Workflow> {
        let manager = self
            .manager
            .ok_or_else(|| WorkflowError::validation("magentic requires a manager"))?;
        if self.participants.is_empty() {
            return Err(WorkflowError::validation(
                "magentic requires at least one participant",
            ));
        }

        let participant_ids: Vec<String> = self
            .participants
            .iter()
            .map(|a| a.name().to_string())
            .collect();

        let orchestrator = Arc::new(MagenticOrchestrator {
            id: "magentic_manager".to_string(),
            manager,
            participant_ids: participant_ids.clone(),
            max_rounds: self.max_rounds,
            max_stalls: self.max_stalls,
            max_resets: self.max_resets,
            plan_review: self.plan_review,
        });

        let mut builder = WorkflowBuilder::new()
            .with_name(self.name.unwrap_or_else(|| "magentic".to_string()))
            .start_with(orchestrator)
            .register_message_type::<MagenticPlanReviewRequest>()
            .register_message_type::<MagenticPlanReviewResponse>();

        let filter = self
            .request_info_filter
            .as_ref()
            .map(|names| crate::request_info::resolve_request_info_filter(names.as_deref()));

        for (agent, id) in self.participants.into_iter().zip(participant_ids) {
            builder = builder
                .register_executor(Arc::new(AgentExecutor::new(agent, id.clone())))
                .add_edge("magentic_manager", id.clone());

            match &filter {
                Some(filter) => {
                    let interceptor_id = format!("request_info:{id}");
                    let mut interceptor =
                        crate::request_info::RequestInfoInterceptor::with_executor_id(
                            &interceptor_id,
                        );
                    if let Some(filter) = filter {
                        interceptor = interceptor.with_agent_filter(filter.clone());
                    }
                    builder = builder
                        .register_executor(Arc::new(interceptor))
                        .add_edge(id, interceptor_id.clone())
                        .add_edge(interceptor_id, "magentic_manager");
                }
                None => {
                    builder = builder.add_edge(id, "magentic_manager");
                }
            }
        }

        builder.build()
    }
}
