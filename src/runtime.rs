//! Turn runtime
//!
//! The driver runs steps until the machine suspends or finishes; the
//! orchestrator wraps one driver invocation per turn.

mod driver;
mod orchestrator;

#[cfg(test)]
pub mod testing;

pub use orchestrator::Orchestrator;

use crate::approval::ApprovalError;
use crate::context::ContextError;
use crate::llm::{is_shape_mismatch_text, LlmError, LlmErrorKind};
use crate::state_machine::{ActionRequest, TransitionError};
use crate::store::StoreError;
use crate::translator::ResponseEntry;
use serde::Serialize;
use thiserror::Error;

/// Outcome of one turn, as handed back to the caller
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnResult {
    Message {
        responses: Vec<ResponseEntry>,
        complete: bool,
        thread_id: String,
    },
    ToolApproval {
        action_requests: Vec<ActionRequest>,
        message: String,
        responses: Vec<ResponseEntry>,
        thread_id: String,
    },
    Error {
        message: String,
    },
}

/// Anything that stops a drive before it suspends or finishes
#[derive(Debug, Error)]
pub enum DriveError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error("turn exceeded {0} steps")]
    StepLimit(usize),
}

impl DriveError {
    /// The language service rejected the conversation's action-call shape
    pub fn is_shape_mismatch(&self) -> bool {
        match self {
            DriveError::Llm(e) if e.kind == LlmErrorKind::ShapeMismatch => true,
            other => is_shape_mismatch_text(&other.to_string()),
        }
    }
}
