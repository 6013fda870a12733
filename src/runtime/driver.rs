//! Step driver
//!
//! Executes steps in order, applying each step's effects to the state and
//! consulting the pure `transition` for the next one. The snapshot is
//! checkpointed after every step, so an abandoned drive resumes from the
//! last step that completed.

use super::DriveError;
use crate::config::{DriverSettings, TurnConfig};
use crate::context::ContextProvider;
use crate::llm::{LlmClient, LlmError, LlmRequest, LlmResponse};
use crate::registry::{ActionClass, AssistantRegistry};
use crate::state_machine::{
    transition, ConversationState, Message, Snapshot, Step, StepEvent, TransitionError,
};
use crate::store::SnapshotStore;
use crate::translator::{ENTER_NOTICE_MARKER, LEAVE_NOTICE_MARKER, SKIP_NOTICE_MARKER};

const CORRECTIVE_INSTRUCTION: &str = "Respond with a real output.";

/// Where a drive stopped
#[derive(Debug)]
pub(crate) struct DriveOutcome {
    pub events: Vec<StepEvent>,
    pub suspended: bool,
}

pub(crate) struct Driver<'a, S, C> {
    pub registry: &'a AssistantRegistry,
    pub store: &'a S,
    pub context: &'a C,
    pub settings: &'a DriverSettings,
    pub thread_id: &'a str,
    pub config: &'a TurnConfig,
}

impl<S: SnapshotStore, C: ContextProvider> Driver<'_, S, C> {
    /// Drive from `start` until the machine suspends or reaches `done`.
    ///
    /// `approved` lets the first sensitive step run; any later sensitive
    /// step suspends again.
    pub async fn run(
        &self,
        mut state: ConversationState,
        start: Step,
        mut events: Vec<StepEvent>,
        mut approved: bool,
    ) -> Result<DriveOutcome, DriveError> {
        let mut step = start;
        let mut executed = 0usize;

        loop {
            if step.is_done() {
                if executed == 0 {
                    self.checkpoint(&state, &step, &events).await?;
                }
                tracing::info!(thread_id = %self.thread_id, steps = executed, "Drive finished");
                return Ok(DriveOutcome {
                    events,
                    suspended: false,
                });
            }

            if step.is_sensitive_exec() && !approved {
                if executed == 0 {
                    self.checkpoint(&state, &step, &events).await?;
                }
                tracing::info!(
                    thread_id = %self.thread_id,
                    step = %step,
                    pending = state.trailing_requests().len(),
                    "Suspended awaiting approval"
                );
                return Ok(DriveOutcome {
                    events,
                    suspended: true,
                });
            }

            executed += 1;
            if executed > self.settings.max_steps {
                return Err(DriveError::StepLimit(self.settings.max_steps));
            }

            tracing::debug!(thread_id = %self.thread_id, step = %step, "Executing step");
            let produced = self.execute(&step, &mut state).await?;
            if step.is_sensitive_exec() {
                approved = false;
            }
            events.push(StepEvent::new(step.name(), produced));

            let next = transition(&step, &state, self.registry)?;
            tracing::debug!(thread_id = %self.thread_id, from = %step, to = %next, "Routed");
            self.checkpoint(&state, &next, &events).await?;
            step = next;
        }
    }

    async fn checkpoint(
        &self,
        state: &ConversationState,
        pending: &Step,
        events: &[StepEvent],
    ) -> Result<(), DriveError> {
        let snapshot = Snapshot::new(state.clone(), pending.clone(), events.to_vec());
        self.store.put(self.thread_id, &snapshot).await?;
        Ok(())
    }

    /// Apply one step to `state`, returning the messages it produced
    async fn execute(
        &self,
        step: &Step,
        state: &mut ConversationState,
    ) -> Result<Vec<Message>, DriveError> {
        match step {
            Step::ContextFetch => {
                state.context_info = self.context.fetch(self.config).await?;
                Ok(vec![])
            }
            Step::Assistant { id } => {
                let message = self.generate(id, state).await?;
                state.messages.push(message.clone());
                Ok(vec![message])
            }
            Step::Enter { id } => Ok(self.enter(id, state)),
            Step::SafeExec { id } | Step::SensitiveExec { id } => {
                let results = self.execute_actions(id, state).await;
                state.messages.extend(results.iter().cloned());
                Ok(results)
            }
            Step::Leave => Ok(self.leave(state)),
            Step::Done => Ok(vec![]),
        }
    }

    /// Answer the delegation request and push the specialist
    fn enter(&self, target: &str, state: &mut ConversationState) -> Vec<Message> {
        let owner = state.dialog_stack.current().to_string();
        let display = self.registry.display_name(target);
        let mut answered = false;

        let results: Vec<Message> = state
            .trailing_requests()
            .iter()
            .map(|req| {
                let is_entry = !answered
                    && self.registry.classify(&owner, &req.name)
                        == ActionClass::Delegate {
                            target: target.to_string(),
                        };
                if is_entry {
                    answered = true;
                    Message::action_result(
                        &req.id,
                        format!(
                            "{ENTER_NOTICE_MARKER} {display}. Reflect on the conversation above between \
                             the main assistant and the user. The user's intent is not yet satisfied: \
                             use the provided actions to help them. When the task is done, or the user \
                             needs something outside your actions, call complete_or_escalate."
                        ),
                    )
                } else {
                    Message::action_result(&req.id, format!("{SKIP_NOTICE_MARKER} to the {display}."))
                }
            })
            .collect();

        state.messages.extend(results.iter().cloned());
        state.dialog_stack = state.dialog_stack.push(target);
        tracing::info!(thread_id = %self.thread_id, assistant = %target, depth = state.dialog_stack.len(), "Entered assistant");
        results
    }

    /// Answer the escalation request and pop back to the parent
    fn leave(&self, state: &mut ConversationState) -> Vec<Message> {
        let parent = self.registry.display_name(state.dialog_stack.parent()).to_string();
        let mut answered = false;

        let results: Vec<Message> = state
            .trailing_requests()
            .iter()
            .map(|req| {
                if !answered && req.name == crate::registry::ESCALATE_ACTION {
                    answered = true;
                    Message::action_result(
                        &req.id,
                        format!(
                            "{LEAVE_NOTICE_MARKER} {parent}. Reflect on the past conversation \
                             and assist the user as needed."
                        ),
                    )
                } else {
                    Message::action_result(&req.id, format!("{SKIP_NOTICE_MARKER} to the {parent}."))
                }
            })
            .collect();

        state.messages.extend(results.iter().cloned());
        let left = state.dialog_stack.current().to_string();
        state.dialog_stack = state.dialog_stack.pop();
        tracing::info!(thread_id = %self.thread_id, assistant = %left, depth = state.dialog_stack.len(), "Left assistant");
        results
    }

    /// Run every trailing request. Failures become error results.
    async fn execute_actions(&self, assistant: &str, state: &ConversationState) -> Vec<Message> {
        let mut results = Vec::new();
        for req in state.trailing_requests() {
            match self.registry.actions().execute(req, self.config).await {
                Ok(output) => {
                    tracing::info!(thread_id = %self.thread_id, assistant, action = %req.name, "Action completed");
                    results.push(Message::action_result(&req.id, output));
                }
                Err(e) => {
                    tracing::warn!(thread_id = %self.thread_id, assistant, action = %req.name, error = %e, "Action failed");
                    results.push(Message::action_error(
                        &req.id,
                        format!("Action {} failed: {e}", req.name),
                    ));
                }
            }
        }
        results
    }

    /// Next message from `assistant`'s binding, re-asking on empty output
    async fn generate(&self, assistant: &str, state: &ConversationState) -> Result<Message, DriveError> {
        let binding = self
            .registry
            .binding(assistant)
            .ok_or_else(|| TransitionError::UnknownAssistant(assistant.to_string()))?;

        let mut request = LlmRequest {
            system: self.registry.render_system_prompt(assistant, &state.context_info),
            messages: state.messages.clone(),
            actions: self.registry.available_actions(assistant),
            max_tokens: None,
        };

        for attempt in 1..=self.settings.max_empty_attempts {
            let response = self.complete_with_retry(binding.as_ref(), &request).await?;
            if !response.is_empty() {
                return Ok(Message::assistant(
                    assistant,
                    response.content,
                    response.action_requests,
                ));
            }
            tracing::warn!(thread_id = %self.thread_id, assistant, attempt, "Empty generation, re-asking");
            request.messages.push(Message::user(CORRECTIVE_INSTRUCTION));
        }

        Err(LlmError::shape_mismatch(format!(
            "{assistant} returned no content and no actions after {} attempts",
            self.settings.max_empty_attempts
        ))
        .into())
    }

    async fn complete_with_retry(
        &self,
        binding: &dyn LlmClient,
        request: &LlmRequest,
    ) -> Result<LlmResponse, LlmError> {
        let mut attempt = 1;
        loop {
            match binding.complete(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.kind.is_retryable() && attempt < self.settings.max_generation_attempts => {
                    let delay = e.retry_after.unwrap_or_else(|| self.settings.retry_delay(attempt));
                    tracing::warn!(
                        thread_id = %self.thread_id,
                        attempt,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "Retrying generation"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
