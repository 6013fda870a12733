//! Outputs emitted while driving the machine

use super::message::Message;
use serde::{Deserialize, Serialize};

/// Messages one step produced, tagged with the step's name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvent {
    pub step: String,
    pub messages: Vec<Message>,
}

impl StepEvent {
    pub fn new(step: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            step: step.into(),
            messages,
        }
    }
}
