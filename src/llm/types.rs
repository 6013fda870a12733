//! Request and response types for language bindings

use crate::state_machine::message::{ActionRequest, Message};

/// One generation request: system prompt, conversation prefix, offered actions
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub actions: Vec<ActionDefinition>,
    pub max_tokens: Option<u32>,
}

/// Action offered to the language service
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Generated reply
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    pub action_requests: Vec<ActionRequest>,
    pub usage: Usage,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_request(mut self, request: ActionRequest) -> Self {
        self.action_requests.push(request);
        self
    }

    /// Neither text nor requested actions
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.action_requests.is_empty()
    }
}

/// Usage statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
