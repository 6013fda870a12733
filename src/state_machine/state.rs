//! Conversation state, routing steps and snapshots

use super::dialog_stack::DialogStack;
use super::event::StepEvent;
use super::message::{ActionRequest, Message, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A node of the routing graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Populate `context_info` for the turn
    ContextFetch,
    /// Ask an assistant's language binding for its next message
    Assistant { id: String },
    /// Push `id` onto the dialog stack
    Enter { id: String },
    /// Run safe actions requested by `id`
    SafeExec { id: String },
    /// Run sensitive actions requested by `id`. Only reached with approval.
    SensitiveExec { id: String },
    /// Pop the dialog stack
    Leave,
    /// Terminal: nothing left to run this turn
    #[default]
    Done,
}

impl Step {
    pub fn assistant(id: impl Into<String>) -> Self {
        Self::Assistant { id: id.into() }
    }

    pub fn enter(id: impl Into<String>) -> Self {
        Self::Enter { id: id.into() }
    }

    pub fn safe_exec(id: impl Into<String>) -> Self {
        Self::SafeExec { id: id.into() }
    }

    pub fn sensitive_exec(id: impl Into<String>) -> Self {
        Self::SensitiveExec { id: id.into() }
    }

    /// Stable node name, used as the origin of produced outputs
    pub fn name(&self) -> String {
        match self {
            Step::ContextFetch => "context_fetch".to_string(),
            Step::Assistant { id } => id.clone(),
            Step::Enter { id } => format!("enter_{id}"),
            Step::SafeExec { id } => format!("{id}_safe_exec"),
            Step::SensitiveExec { id } => format!("{id}_sensitive_exec"),
            Step::Leave => "leave".to_string(),
            Step::Done => "done".to_string(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Step::Done)
    }

    pub fn is_sensitive_exec(&self) -> bool {
        matches!(self, Step::SensitiveExec { .. })
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

/// Per-thread mutable aggregate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub dialog_stack: DialogStack,
    #[serde(default)]
    pub context_info: String,
}

impl ConversationState {
    /// Most recent assistant message, if it is the last message overall
    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.role == Role::Assistant)
    }

    /// Requests carried by the trailing assistant message
    pub fn trailing_requests(&self) -> &[ActionRequest] {
        self.last_assistant_message()
            .map(|m| m.action_requests.as_slice())
            .unwrap_or_default()
    }
}

/// Point-in-time view of a thread, as persisted by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: ConversationState,
    /// Step that runs next; `Done` when the last drive reached a terminal step
    pub pending_step: Step,
    /// Outputs of the most recent drive, in emission order
    #[serde(default)]
    pub last_step_outputs: Vec<StepEvent>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            state: ConversationState::default(),
            pending_step: Step::Done,
            last_step_outputs: vec![],
            updated_at: Utc::now(),
        }
    }
}

impl Snapshot {
    pub fn new(state: ConversationState, pending_step: Step, last_step_outputs: Vec<StepEvent>) -> Self {
        Self {
            state,
            pending_step,
            last_step_outputs,
            updated_at: Utc::now(),
        }
    }

    /// Waiting for a human to approve sensitive actions
    pub fn is_suspended(&self) -> bool {
        self.pending_step.is_sensitive_exec()
    }

    /// Requests awaiting approval. Empty unless suspended.
    pub fn pending_action_requests(&self) -> &[ActionRequest] {
        if self.is_suspended() {
            self.state.trailing_requests()
        } else {
            &[]
        }
    }
}
