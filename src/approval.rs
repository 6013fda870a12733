//! Approval gate for sensitive actions
//!
//! Suspension itself is a persisted checkpoint (`pending_step` at a
//! sensitive executor). This module decides what a resuming input means and
//! synthesizes the messages a rejection produces.

use crate::registry::ESCALATE_ACTION;
use crate::state_machine::{ActionRequest, ConversationState, Message, Snapshot, Step};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval required")]
    ApprovalRequired,
    #[error("no action is waiting for approval")]
    NotPending,
    #[error("the suspended message has no pending action requests")]
    NoPendingRequests,
}

/// Decision carried by a resuming input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalInput {
    Approve,
    Reject,
}

impl ApprovalInput {
    /// `y` or `n`, ignoring surrounding whitespace and case
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "y" => Some(Self::Approve),
            "n" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Ordinary input is refused while a thread is suspended
pub fn check_ordinary_input(snapshot: &Snapshot) -> Result<(), ApprovalError> {
    if snapshot.is_suspended() {
        Err(ApprovalError::ApprovalRequired)
    } else {
        Ok(())
    }
}

/// Sensitive step to re-enter with approval
pub fn approve(snapshot: &Snapshot) -> Result<Step, ApprovalError> {
    if !snapshot.is_suspended() {
        return Err(ApprovalError::NotPending);
    }
    if snapshot.pending_action_requests().is_empty() {
        return Err(ApprovalError::NoPendingRequests);
    }
    Ok(snapshot.pending_step.clone())
}

/// Outcome of refusing a suspended batch
#[derive(Debug)]
pub struct Rejection {
    /// State with rejection results and the synthetic escalation appended
    pub state: ConversationState,
    /// One rejection result per pending request
    pub results: Vec<Message>,
    /// Assistant that owned the refused batch
    pub assistant_id: String,
}

/// Refuse every pending request and escalate on behalf of the active assistant
pub fn reject(snapshot: &Snapshot) -> Result<Rejection, ApprovalError> {
    let Step::SensitiveExec { id } = &snapshot.pending_step else {
        return Err(ApprovalError::NotPending);
    };
    let pending = snapshot.pending_action_requests();
    if pending.is_empty() {
        return Err(ApprovalError::NoPendingRequests);
    }

    let results: Vec<Message> = pending
        .iter()
        .map(|req| Message::action_result(&req.id, rejection_text(&req.name)))
        .collect();

    let escalation = Message::assistant(
        id.clone(),
        "",
        vec![ActionRequest::new(
            uuid::Uuid::new_v4().to_string(),
            ESCALATE_ACTION,
            &json!({ "cancel": true, "reason": "The user declined the requested action." }),
        )],
    );

    let mut state = snapshot.state.clone();
    state.messages.extend(results.iter().cloned());
    state.messages.push(escalation);

    Ok(Rejection {
        state,
        results,
        assistant_id: id.clone(),
    })
}

fn rejection_text(action: &str) -> String {
    format!("The user declined to run {action}. Continue assisting, taking that decision into account.")
}
