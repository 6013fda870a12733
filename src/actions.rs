//! Action executors
//!
//! Actions are stateless singletons; identity and location arrive with
//! each call through `TurnConfig`.

pub mod catalog;
mod http;

pub use http::{BackendClient, BodyShape, HttpAction, HttpMethod};

use crate::config::TurnConfig;
use crate::llm::ActionDefinition;
use crate::state_machine::message::{ActionRequest, ArgumentParseError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Failure of a single action. Recovered as an error result, never fatal to a turn.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("no executor bound for action {0}")]
    NotFound(String),
    #[error(transparent)]
    InvalidArguments(#[from] ArgumentParseError),
    #[error("missing argument {0}")]
    MissingArgument(String),
    #[error("user id is required")]
    MissingIdentity,
    #[error("backend returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(String),
}

/// Something an assistant can ask the runtime to do
#[async_trait]
pub trait Action: Send + Sync {
    /// Action name as offered to the language service
    fn name(&self) -> &str;

    /// Description for the language service
    fn description(&self) -> String;

    /// JSON schema for the argument mapping
    fn input_schema(&self) -> Value;

    async fn run(&self, args: Map<String, Value>, config: &TurnConfig) -> Result<String, ActionError>;
}

/// Executors bound by action name
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: Vec<Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an executor. A later binding with the same name replaces the earlier one.
    pub fn with(mut self, action: Arc<dyn Action>) -> Self {
        self.actions.retain(|a| a.name() != action.name());
        self.actions.push(action);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.actions.iter().find(|a| a.name() == name)
    }

    /// Definition for one bound action
    pub fn definition(&self, name: &str) -> Option<ActionDefinition> {
        self.get(name).map(|a| ActionDefinition {
            name: a.name().to_string(),
            description: a.description(),
            input_schema: a.input_schema(),
        })
    }

    /// Run the executor bound to `request.name` with its parsed arguments
    pub async fn execute(
        &self,
        request: &ActionRequest,
        config: &TurnConfig,
    ) -> Result<String, ActionError> {
        let action = self
            .get(&request.name)
            .ok_or_else(|| ActionError::NotFound(request.name.clone()))?;
        let args = request.args()?;
        action.run(args, config).await
    }
}
