//! Assistant registry
//!
//! Declarative description of the primary assistant and its specialists.
//! Built once, validated, then passed by reference into the runtime; it is
//! never mutated afterwards.

use crate::actions::ActionRegistry;
use crate::llm::{ActionDefinition, LlmClient};
use serde_json::json;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Reserved id of the implicit root assistant
pub const ROOT_ASSISTANT: &str = "primary_assistant";

/// Action a specialist emits to hand control back to its parent
pub const ESCALATE_ACTION: &str = "complete_or_escalate";

/// How an assistant's action request is routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionClass {
    Safe,
    Sensitive,
    Delegate { target: String },
    Escalate,
    Unknown,
}

/// The root assistant. Always present, never listed among specialists.
#[derive(Debug, Clone)]
pub struct PrimarySpec {
    pub display_name: String,
    pub system_prompt_template: String,
    pub safe_actions: BTreeSet<String>,
    pub sensitive_actions: BTreeSet<String>,
}

impl PrimarySpec {
    pub fn new(display_name: impl Into<String>, system_prompt_template: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            system_prompt_template: system_prompt_template.into(),
            safe_actions: BTreeSet::new(),
            sensitive_actions: BTreeSet::new(),
        }
    }

    pub fn with_safe<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.safe_actions.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_sensitive<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.sensitive_actions.extend(names.into_iter().map(Into::into));
        self
    }
}

/// A specialist assistant reachable through its delegation action
#[derive(Debug, Clone)]
pub struct AssistantSpec {
    pub id: String,
    pub display_name: String,
    pub system_prompt_template: String,
    pub safe_actions: BTreeSet<String>,
    pub sensitive_actions: BTreeSet<String>,
    /// Action another assistant emits to transfer control here
    pub delegation_action: String,
    /// Offered to the language service alongside `delegation_action`
    pub description: String,
    /// Specialists this one may delegate to in turn
    pub delegates: Vec<String>,
}

impl AssistantSpec {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        delegation_action: impl Into<String>,
        system_prompt_template: impl Into<String>,
    ) -> Self {
        let display_name = display_name.into();
        Self {
            id: id.into(),
            description: format!("Transfer the conversation to the {display_name}."),
            display_name,
            system_prompt_template: system_prompt_template.into(),
            safe_actions: BTreeSet::new(),
            sensitive_actions: BTreeSet::new(),
            delegation_action: delegation_action.into(),
            delegates: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_safe<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.safe_actions.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_sensitive<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.sensitive_actions.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_delegates<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.delegates.extend(ids.into_iter().map(Into::into));
        self
    }
}

/// Registration-time configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("assistant id {0} is reserved")]
    ReservedId(String),
    #[error("assistant {0} registered twice")]
    DuplicateAssistant(String),
    #[error("action {action} is reserved and cannot be declared by {assistant}")]
    ReservedAction { assistant: String, action: String },
    #[error("delegation action {0} is used by more than one assistant")]
    DuplicateDelegation(String),
    #[error("action {action} of {assistant} is declared both safe and sensitive")]
    AmbiguousAction { assistant: String, action: String },
    #[error("assistant {assistant} delegates to unregistered assistant {target}")]
    UnknownDelegate { assistant: String, target: String },
    #[error("action {action} of {assistant} has no bound executor")]
    MissingExecutor { assistant: String, action: String },
    #[error("assistant {0} has no language binding")]
    MissingBinding(String),
}

/// Collects specs, executors and bindings before validation
pub struct AssistantRegistryBuilder {
    primary: PrimarySpec,
    specs: Vec<AssistantSpec>,
    actions: ActionRegistry,
    bindings: HashMap<String, Arc<dyn LlmClient>>,
    default_binding: Option<Arc<dyn LlmClient>>,
}

impl AssistantRegistryBuilder {
    /// Replace all registered specialists with `specs`
    pub fn register(mut self, specs: impl IntoIterator<Item = AssistantSpec>) -> Self {
        self.specs = specs.into_iter().collect();
        self
    }

    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    /// Binding for one assistant id (root included)
    pub fn with_binding(mut self, assistant_id: impl Into<String>, client: Arc<dyn LlmClient>) -> Self {
        self.bindings.insert(assistant_id.into(), client);
        self
    }

    /// Binding for assistants without their own
    pub fn with_default_binding(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.default_binding = Some(client);
        self
    }

    pub fn build(self) -> Result<AssistantRegistry, RegistryError> {
        let mut specialists: Vec<AssistantSpec> = Vec::with_capacity(self.specs.len());
        let mut delegation_index = HashMap::new();

        for spec in self.specs {
            if spec.id == ROOT_ASSISTANT {
                return Err(RegistryError::ReservedId(spec.id));
            }
            if specialists.iter().any(|s| s.id == spec.id) {
                return Err(RegistryError::DuplicateAssistant(spec.id));
            }
            if spec.delegation_action == ESCALATE_ACTION {
                return Err(RegistryError::ReservedAction {
                    assistant: spec.id,
                    action: spec.delegation_action,
                });
            }
            if delegation_index
                .insert(spec.delegation_action.clone(), spec.id.clone())
                .is_some()
            {
                return Err(RegistryError::DuplicateDelegation(spec.delegation_action));
            }
            specialists.push(spec);
        }

        let ids: HashSet<&str> = specialists.iter().map(|s| s.id.as_str()).collect();
        let declared = std::iter::once((
            ROOT_ASSISTANT,
            &self.primary.safe_actions,
            &self.primary.sensitive_actions,
        ))
        .chain(
            specialists
                .iter()
                .map(|s| (s.id.as_str(), &s.safe_actions, &s.sensitive_actions)),
        );

        for (assistant, safe, sensitive) in declared {
            if let Some(action) = safe.intersection(sensitive).next() {
                return Err(RegistryError::AmbiguousAction {
                    assistant: assistant.to_string(),
                    action: action.clone(),
                });
            }
            for action in safe.iter().chain(sensitive) {
                if action == ESCALATE_ACTION || delegation_index.contains_key(action) {
                    return Err(RegistryError::ReservedAction {
                        assistant: assistant.to_string(),
                        action: action.clone(),
                    });
                }
                if !self.actions.contains(action) {
                    return Err(RegistryError::MissingExecutor {
                        assistant: assistant.to_string(),
                        action: action.clone(),
                    });
                }
            }
            if self.default_binding.is_none() && !self.bindings.contains_key(assistant) {
                return Err(RegistryError::MissingBinding(assistant.to_string()));
            }
        }

        for spec in &specialists {
            if let Some(target) = spec.delegates.iter().find(|t| !ids.contains(t.as_str())) {
                return Err(RegistryError::UnknownDelegate {
                    assistant: spec.id.clone(),
                    target: target.clone(),
                });
            }
        }

        Ok(AssistantRegistry {
            primary: self.primary,
            specialists,
            delegation_index,
            actions: self.actions,
            bindings: self.bindings,
            default_binding: self.default_binding,
        })
    }
}

/// Validated, immutable registry
pub struct AssistantRegistry {
    primary: PrimarySpec,
    specialists: Vec<AssistantSpec>,
    /// delegation action -> target assistant id
    delegation_index: HashMap<String, String>,
    actions: ActionRegistry,
    bindings: HashMap<String, Arc<dyn LlmClient>>,
    default_binding: Option<Arc<dyn LlmClient>>,
}

impl AssistantRegistry {
    pub fn builder(primary: PrimarySpec) -> AssistantRegistryBuilder {
        AssistantRegistryBuilder {
            primary,
            specs: Vec::new(),
            actions: ActionRegistry::new(),
            bindings: HashMap::new(),
            default_binding: None,
        }
    }

    pub fn is_registered(&self, assistant_id: &str) -> bool {
        assistant_id == ROOT_ASSISTANT || self.specialist(assistant_id).is_some()
    }

    pub fn specialist(&self, assistant_id: &str) -> Option<&AssistantSpec> {
        self.specialists.iter().find(|s| s.id == assistant_id)
    }

    pub fn display_name(&self, assistant_id: &str) -> &str {
        self.specialist(assistant_id)
            .map_or(self.primary.display_name.as_str(), |s| s.display_name.as_str())
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// Language binding serving `assistant_id`
    pub fn binding(&self, assistant_id: &str) -> Option<Arc<dyn LlmClient>> {
        if !self.is_registered(assistant_id) {
            return None;
        }
        self.bindings
            .get(assistant_id)
            .or(self.default_binding.as_ref())
            .cloned()
    }

    fn declared_sets(&self, assistant_id: &str) -> Option<(&BTreeSet<String>, &BTreeSet<String>)> {
        if assistant_id == ROOT_ASSISTANT {
            return Some((&self.primary.safe_actions, &self.primary.sensitive_actions));
        }
        self.specialist(assistant_id)
            .map(|s| (&s.safe_actions, &s.sensitive_actions))
    }

    /// Whether `assistant_id` may hand control to `target`
    fn may_delegate(&self, assistant_id: &str, target: &str) -> bool {
        if assistant_id == ROOT_ASSISTANT {
            return true;
        }
        self.specialist(assistant_id)
            .is_some_and(|s| s.delegates.iter().any(|d| d == target))
    }

    /// Route class of `action` when requested by `assistant_id`
    pub fn classify(&self, assistant_id: &str, action: &str) -> ActionClass {
        if action == ESCALATE_ACTION {
            return ActionClass::Escalate;
        }
        if let Some(target) = self.delegation_index.get(action) {
            if self.may_delegate(assistant_id, target) {
                return ActionClass::Delegate {
                    target: target.clone(),
                };
            }
            return ActionClass::Unknown;
        }
        match self.declared_sets(assistant_id) {
            Some((safe, _)) if safe.contains(action) => ActionClass::Safe,
            Some((_, sensitive)) if sensitive.contains(action) => ActionClass::Sensitive,
            _ => ActionClass::Unknown,
        }
    }

    /// Actions offered to `assistant_id`'s language binding
    pub fn available_actions(&self, assistant_id: &str) -> Vec<ActionDefinition> {
        let Some((safe, sensitive)) = self.declared_sets(assistant_id) else {
            return Vec::new();
        };
        let mut defs: Vec<ActionDefinition> = safe
            .iter()
            .chain(sensitive)
            .filter_map(|name| self.actions.definition(name))
            .collect();

        defs.extend(
            self.specialists
                .iter()
                .filter(|s| s.id != assistant_id && self.may_delegate(assistant_id, &s.id))
                .map(delegation_definition),
        );
        if assistant_id != ROOT_ASSISTANT {
            defs.push(escalate_definition());
        }
        defs
    }

    /// System prompt for `assistant_id` with placeholders filled in
    pub fn render_system_prompt(&self, assistant_id: &str, context_info: &str) -> String {
        let template = self
            .specialist(assistant_id)
            .map_or(self.primary.system_prompt_template.as_str(), |s| {
                s.system_prompt_template.as_str()
            });
        template
            .replace("{display_name}", self.display_name(assistant_id))
            .replace("{context_info}", context_info)
            .replace("{time}", &chrono::Utc::now().to_rfc3339())
    }
}

fn delegation_definition(spec: &AssistantSpec) -> ActionDefinition {
    ActionDefinition {
        name: spec.delegation_action.clone(),
        description: spec.description.clone(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "request": {
                    "type": "string",
                    "description": "What the user needs, restated for the specialist"
                }
            },
            "required": ["request"]
        }),
    }
}

fn escalate_definition() -> ActionDefinition {
    ActionDefinition {
        name: ESCALATE_ACTION.to_string(),
        description: "Mark the current task as complete, or hand control back to the \
                      main assistant when the user needs something outside your actions."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "cancel": { "type": "boolean" },
                "reason": { "type": "string" }
            },
            "required": ["reason"]
        }),
    }
}
