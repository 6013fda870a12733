//! Turn orchestrator: the single entry point for one turn

use super::driver::{DriveOutcome, Driver};
use super::{DriveError, TurnResult};
use crate::approval::{self, ApprovalInput};
use crate::config::{DriverSettings, TurnConfig};
use crate::context::ContextProvider;
use crate::registry::AssistantRegistry;
use crate::state_machine::{transition, ConversationState, Message, Snapshot, Step, StepEvent};
use crate::store::SnapshotStore;
use crate::translator::{translate, ResponseEntry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

const APPROVAL_PROMPT: &str = "Approval required: reply y to run the requested actions or n to cancel.";
const SHAPE_APOLOGY: &str = "Sorry, something went wrong while processing the conversation, so it \
                             has been reset. Please ask again.";

pub struct Orchestrator<S, C> {
    registry: Arc<AssistantRegistry>,
    store: S,
    context: C,
    settings: DriverSettings,
    /// One lock per thread id; turns on a thread run one at a time
    thread_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: SnapshotStore, C: ContextProvider> Orchestrator<S, C> {
    pub fn new(registry: Arc<AssistantRegistry>, store: S, context: C, settings: DriverSettings) -> Self {
        Self {
            registry,
            store,
            context,
            settings,
            thread_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn thread_lock(&self, thread_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .thread_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(thread_id.to_string()).or_default())
    }

    /// Drop the thread's lock once no turn holds or waits on it
    fn release_thread_lock(&self, thread_id: &str) {
        let mut locks = self
            .thread_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks.get(thread_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(thread_id);
        }
    }

    #[cfg(test)]
    pub fn active_thread_locks(&self) -> usize {
        self.thread_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drive one turn end to end. Never fails; failures come back as `TurnResult::Error`.
    pub async fn run_turn(&self, thread_id: &str, raw_input: &str, config: &TurnConfig) -> TurnResult {
        let lock = self.thread_lock(thread_id);
        let result = {
            let _guard = lock.lock().await;
            self.run_locked_turn(thread_id, raw_input, config).await
        };
        drop(lock);
        self.release_thread_lock(thread_id);
        result
    }

    async fn run_locked_turn(&self, thread_id: &str, raw_input: &str, config: &TurnConfig) -> TurnResult {
        tracing::info!(thread_id, "Turn started");

        match self.drive_turn(thread_id, raw_input, config).await {
            Ok(result) => result,
            Err(e) if e.is_shape_mismatch() => {
                tracing::warn!(thread_id, error = %e, "Conversation shape rejected, resetting thread");
                if let Err(reset_err) = self.store.put(thread_id, &Snapshot::default()).await {
                    tracing::error!(thread_id, error = %reset_err, "Failed to reset thread");
                    return TurnResult::Error {
                        message: reset_err.to_string(),
                    };
                }
                TurnResult::Message {
                    responses: vec![ResponseEntry::Message {
                        content: SHAPE_APOLOGY.to_string(),
                        origin_step: "reset".to_string(),
                    }],
                    complete: true,
                    thread_id: thread_id.to_string(),
                }
            }
            Err(e) => {
                tracing::error!(thread_id, error = %e, "Turn failed");
                TurnResult::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    async fn drive_turn(
        &self,
        thread_id: &str,
        raw_input: &str,
        config: &TurnConfig,
    ) -> Result<TurnResult, DriveError> {
        let snapshot = self.store.get(thread_id).await?.unwrap_or_default();
        let driver = Driver {
            registry: self.registry.as_ref(),
            store: &self.store,
            context: &self.context,
            settings: &self.settings,
            thread_id,
            config,
        };

        let outcome: DriveOutcome = match ApprovalInput::parse(raw_input) {
            Some(ApprovalInput::Approve) => {
                let step = approval::approve(&snapshot)?;
                tracing::info!(thread_id, step = %step, "Approved");
                driver.run(snapshot.state, step, vec![], true).await?
            }
            Some(ApprovalInput::Reject) => {
                let rejection = approval::reject(&snapshot)?;
                tracing::info!(thread_id, assistant = %rejection.assistant_id, rejected = rejection.results.len(), "Rejected");
                let start = transition(
                    &Step::assistant(rejection.assistant_id.clone()),
                    &rejection.state,
                    &self.registry,
                )?;
                let events = vec![StepEvent::new(snapshot.pending_step.name(), rejection.results)];
                driver.run(rejection.state, start, events, false).await?
            }
            None => {
                approval::check_ordinary_input(&snapshot)?;
                let mut state = snapshot.state;
                answer_interrupted(&mut state, thread_id);
                state.messages.push(Message::user(raw_input));
                driver.run(state, Step::ContextFetch, vec![], false).await?
            }
        };

        let responses = translate(&outcome.events);
        tracing::info!(
            thread_id,
            suspended = outcome.suspended,
            responses = responses.len(),
            "Turn finished"
        );
        let latest = self.store.get(thread_id).await?.unwrap_or_default();

        if latest.is_suspended() {
            return Ok(TurnResult::ToolApproval {
                action_requests: latest.pending_action_requests().to_vec(),
                message: APPROVAL_PROMPT.to_string(),
                responses,
                thread_id: thread_id.to_string(),
            });
        }

        Ok(TurnResult::Message {
            responses,
            complete: latest.pending_step.is_done(),
            thread_id: thread_id.to_string(),
        })
    }
}

/// Close out requests left unanswered by a drive that stopped early, so the
/// next request to the language service stays well-formed
fn answer_interrupted(state: &mut ConversationState, thread_id: &str) {
    let results: Vec<Message> = state
        .trailing_requests()
        .iter()
        .map(|req| {
            Message::action_error(
                req.id.clone(),
                format!("Action {} was interrupted before it ran.", req.name),
            )
        })
        .collect();
    if results.is_empty() {
        return;
    }
    tracing::warn!(thread_id, interrupted = results.len(), "Answering interrupted action requests");
    state.messages.extend(results);
}
