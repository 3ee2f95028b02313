//! Group-chat orchestration: a manager drives rounds of conversation,
//! choosing the next speaker and checking a termination condition.

use agentflow_core::{
    Agent, AgentExecutor, AgentExecutorRequest, AgentExecutorResponse, ChatMessage, Envelope,
    Executor, Result, TypeDescriptor, Workflow, WorkflowBuilder, WorkflowContext, WorkflowError,
    WorkflowMessage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default round cap for a group chat.
pub const DEFAULT_MAX_ROUNDS: usize = 10;

/// Predicate over the latest message's text; `true` ends the chat.
pub type TextPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// How the manager picks the next speaker.
#[derive(Clone)]
pub enum SpeakerSelection {
    /// Cycle through participants in registration order.
    RoundRobin,
    /// A custom selector over the transcript; returns the index of the
    /// next speaker.
    Selector(Arc<dyn Fn(&GroupChatState) -> usize + Send + Sync>),
}

/// Serializable loop state kept by the manager executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupChatState {
    /// The conversation transcript so far.
    pub transcript: Vec<ChatMessage>,
    /// Completed rounds.
    pub round: usize,
    /// Index of the speaker for the round in flight.
    pub speaker: usize,
}

struct GroupChatManager {
    id: String,
    participant_ids: Vec<String>,
    max_rounds: usize,
    text_predicate: Option<TextPredicate>,
    manager_agent: Option<Arc<dyn Agent>>,
    selection: SpeakerSelection,
}

impl GroupChatManager {
    fn select_speaker(&self, state: &GroupChatState) -> usize {
        match &self.selection {
            SpeakerSelection::RoundRobin => state.round % self.participant_ids.len(),
            SpeakerSelection::Selector(select) => {
                select(state) % self.participant_ids.len()
            }
        }
    }

    async fn should_terminate(&self, state: &GroupChatState) -> Result<bool> {
        if state.round >= self.max_rounds {
            return Ok(true);
        }
        if let (Some(predicate), Some(last)) = (&self.text_predicate, state.transcript.last()) {
            if predicate(&last.text()) {
                return Ok(true);
            }
        }
        if let Some(manager) = &self.manager_agent {
            let verdict = manager.run(&state.transcript).await?;
            if verdict.text().to_uppercase().contains("TERMINATE") {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn dispatch_round(&self, state: &GroupChatState, ctx: &WorkflowContext) -> Result<()> {
        let speaker = &self.participant_ids[state.speaker];
        tracing::debug!(round = state.round, speaker = %speaker, "group chat round");
        ctx.send_message_to(
            &AgentExecutorRequest::respond_to(state.transcript.clone()),
            speaker,
        )?;
        Ok(())
    }
}

#[async_trait]
impl Executor for GroupChatManager {
    fn id(&self) -> &str {
        &self.id
    }

    fn input_types(&self) -> Vec<TypeDescriptor> {
        vec![
            AgentExecutorResponse::descriptor(),
            Vec::<ChatMessage>::descriptor(),
            TypeDescriptor::String,
        ]
    }

    fn output_types(&self) -> Vec<TypeDescriptor> {
        vec![AgentExecutorRequest::descriptor()]
    }

    async fn handle(&self, envelope: Envelope, ctx: WorkflowContext) -> Result<()> {
        let mut state = if envelope.is::<AgentExecutorResponse>() {
            // A participant spoke: append its reply and close the round.
            let response: AgentExecutorResponse = envelope.decode()?;
            let mut state: GroupChatState = ctx
                .get_state()
                .map(serde_json::from_value)
                .transpose()?
                .ok_or_else(|| {
                    WorkflowError::Custom("group chat response without an open round".to_string())
                })?;
            state
                .transcript
                .extend(response.agent_response.messages.clone());
            state.round += 1;
            state
        } else {
            // Fresh chat from a string or conversation input.
            let transcript = if envelope.is::<Vec<ChatMessage>>() {
                envelope.decode()?
            } else {
                vec![ChatMessage::user(envelope.decode::<String>()?)]
            };
            GroupChatState {
                transcript,
                round: 0,
                speaker: 0,
            }
        };

        if self.should_terminate(&state).await? {
            ctx.set_state(serde_json::to_value(&state)?);
            ctx.yield_output(&state.transcript)?;
            return Ok(());
        }

        state.speaker = self.select_speaker(&state);
        ctx.set_state(serde_json::to_value(&state)?);
        self.dispatch_round(&state, &ctx)
    }
}

/// Builds a manager-driven group chat over participants.
pub struct GroupChatBuilder {
    participants: Vec<Arc<dyn Agent>>,
    max_rounds: usize,
    text_predicate: Option<TextPredicate>,
    manager_agent: Option<Arc<dyn Agent>>,
    selection: SpeakerSelection,
    request_info_filter: Option<Option<Vec<String>>>,
    name: Option<String>,
}

impl Default for GroupChatBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupChatBuilder {
    /// Create an empty builder (round-robin selection,
    /// [`DEFAULT_MAX_ROUNDS`] rounds).
    pub fn new() -> Self {
        Self {
            participants: Vec::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            text_predicate: None,
            manager_agent: None,
            selection: SpeakerSelection::RoundRobin,
            request_info_filter: None,
            name: None,
        }
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

    /// End the chat when the latest message's text satisfies the
    /// predicate.
    pub fn with_termination_text(mut self, predicate: TextPredicate) -> Self {
        self.text_predicate = Some(predicate);
        self
    }

    /// Consult a manager agent after each round; a reply containing
    /// `TERMINATE` ends the chat.
    pub fn with_manager_agent(mut self, manager: Arc<dyn Agent>) -> Self {
        self.manager_agent = Some(manager);
        self
    }

    /// Replace round-robin speaker selection.
    pub fn with_speaker_selection(mut self, selection: SpeakerSelection) -> Self {
        self.selection = selection;
        self
    }

    /// Pause every speaker's output for human review before the manager
    /// folds it into the transcript.
    pub fn with_request_info(mut self) -> Self {
        self.request_info_filter = Some(None);
        self
    }

    /// Pause only the named speakers' outputs.
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
        if self.participants.is_empty() {
            return Err(WorkflowError::validation(
                "group chat requires at least one participant",
            ));
        }

        let participant_ids: Vec<String> = self
            .participants
            .iter()
            .map(|a| format!("groupchat_agent:{}", a.name()))
            .collect();

        let manager = Arc::new(GroupChatManager {
            id: "groupchat_manager".to_string(),
            participant_ids: participant_ids.clone(),
            max_rounds: self.max_rounds,
            text_predicate: self.text_predicate,
            manager_agent: self.manager_agent,
            selection: self.selection,
        });

        let filter = self
            .request_info_filter
            .as_ref()
            .map(|names| crate::request_info::resolve_request_info_filter(names.as_deref()));

        let mut builder = WorkflowBuilder::new()
            .with_name(self.name.unwrap_or_else(|| "group-chat".to_string()))
            .start_with(manager);

        for (agent, executor_id) in self.participants.into_iter().zip(participant_ids) {
            let agent_name = agent.name().to_string();
            builder = builder
                .register_executor(Arc::new(AgentExecutor::new(agent, executor_id.clone())))
                .add_edge("groupchat_manager", executor_id.clone());

            match &filter {
                Some(filter) => {
                    let interceptor_id = format!("request_info:{agent_name}");
                    let mut interceptor =
                        crate::request_info::RequestInfoInterceptor::with_executor_id(
                            &interceptor_id,
                        );
                    if let Some(filter) = filter {
                        interceptor = interceptor.with_agent_filter(filter.clone());
                    }
                    builder = builder
                        .register_executor(Arc::new(interceptor))
                        .add_edge(executor_id, interceptor_id.clone())
                        .add_edge(interceptor_id, "groupchat_manager");
                }
                None => {
                    builder = builder.add_edge(executor_id, "groupchat_manager");
                }
            }
        }

        builder.build()
    }
}
