//! Conversation messages and action requests

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Assistant,
    ActionResult,
    System,
}

/// A named action an assistant asks the runtime to perform.
///
/// `arguments` is kept as the raw JSON text the language service produced,
/// so a malformed payload survives until something actually needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Argument payload is not a JSON object
#[derive(Debug, Error)]
pub enum ArgumentParseError {
    #[error("arguments for {name} are not valid JSON: {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("arguments for {name} must be a JSON object")]
    NotAnObject { name: String },
}

impl ActionRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: &Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }

    /// Build a request whose payload is taken verbatim
    pub fn raw(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the payload as an argument mapping. An empty payload is an empty mapping.
    pub fn args(&self) -> Result<Map<String, Value>, ArgumentParseError> {
        if self.arguments.trim().is_empty() {
            return Ok(Map::new());
        }
        let value: Value =
            serde_json::from_str(&self.arguments).map_err(|source| ArgumentParseError::Json {
                name: self.name.clone(),
                source,
            })?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(ArgumentParseError::NotAnObject {
                name: self.name.clone(),
            }),
        }
    }
}

/// One conversational unit. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_requests: Vec<ActionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_action_id: Option<String>,
    /// Assistant that authored the message, for assistant messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            action_requests: vec![],
            source_action_id: None,
            author: None,
            is_error: false,
        }
    }

    pub fn assistant(
        author: impl Into<String>,
        content: impl Into<String>,
        action_requests: Vec<ActionRequest>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            action_requests,
            source_action_id: None,
            author: Some(author.into()),
            is_error: false,
        }
    }

    pub fn action_result(source_action_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::ActionResult,
            content: content.into(),
            action_requests: vec![],
            source_action_id: Some(source_action_id.into()),
            author: None,
            is_error: false,
        }
    }

    pub fn action_error(source_action_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::action_result(source_action_id, content)
        }
    }

    #[allow(dead_code)] // Used in tests
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            action_requests: vec![],
            source_action_id: None,
            author: None,
            is_error: false,
        }
    }

    /// No text and no requested actions
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.action_requests.is_empty()
    }
}
