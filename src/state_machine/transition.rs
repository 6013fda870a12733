//! Pure routing function
//!
//! Given the same step, state and registry it always picks the same next
//! step. Side effects of a step (stack push/pop, appended messages) are
//! applied by the driver before `transition` is consulted.

use super::{ConversationState, Step};
use crate::registry::{ActionClass, AssistantRegistry};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("assistant {0} is not registered")]
    UnknownAssistant(String),
    #[error("assistant {0} has not produced a message to route")]
    NoAssistantMessage(String),
    #[error("nothing follows the terminal step")]
    AfterDone,
}

/// Next step after `step` has run against `state`
pub fn transition(
    step: &Step,
    state: &ConversationState,
    registry: &AssistantRegistry,
) -> Result<Step, TransitionError> {
    match step {
        Step::ContextFetch | Step::Leave => active_assistant(state, registry),

        Step::Assistant { id } => route_assistant(id, state, registry),

        Step::Enter { id } | Step::SafeExec { id } | Step::SensitiveExec { id } => {
            if registry.is_registered(id) {
                Ok(Step::assistant(id.clone()))
            } else {
                Err(TransitionError::UnknownAssistant(id.clone()))
            }
        }

        Step::Done => Err(TransitionError::AfterDone),
    }
}

fn active_assistant(
    state: &ConversationState,
    registry: &AssistantRegistry,
) -> Result<Step, TransitionError> {
    let current = state.dialog_stack.current();
    if registry.is_registered(current) {
        Ok(Step::assistant(current))
    } else {
        Err(TransitionError::UnknownAssistant(current.to_string()))
    }
}

/// Routing decision for an assistant's latest message.
///
/// Escalation wins over delegation, delegation over execution. Any request
/// that is not safe (unknown names included) sends the whole batch down the
/// sensitive path.
pub fn route_assistant(
    id: &str,
    state: &ConversationState,
    registry: &AssistantRegistry,
) -> Result<Step, TransitionError> {
    let message = state
        .last_assistant_message()
        .ok_or_else(|| TransitionError::NoAssistantMessage(id.to_string()))?;

    if message.action_requests.is_empty() {
        return Ok(Step::Done);
    }

    let classes: Vec<ActionClass> = message
        .action_requests
        .iter()
        .map(|req| registry.classify(id, &req.name))
        .collect();

    if classes.contains(&ActionClass::Escalate) {
        return Ok(Step::Leave);
    }
    if let Some(target) = classes.iter().find_map(|c| match c {
        ActionClass::Delegate { target } => Some(target),
        _ => None,
    }) {
        return Ok(Step::enter(target.clone()));
    }
    if classes.iter().all(|c| *c == ActionClass::Safe) {
        return Ok(Step::safe_exec(id));
    }
    Ok(Step::sensitive_exec(id))
}
