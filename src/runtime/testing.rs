//! Mock implementations for testing
//!
//! These mocks enable end-to-end turn tests without real I/O.

use crate::actions::catalog::{primary_spec, specialists};
use crate::actions::{Action, ActionError, ActionRegistry};
use crate::config::TurnConfig;
use crate::context::{ContextError, ContextProvider};
use crate::llm::{LlmClient, LlmError, LlmRequest, LlmResponse};
use crate::registry::AssistantRegistry;
use crate::state_machine::ActionRequest;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

// ============================================================================
// Mock Language Binding
// ============================================================================

/// Binding that replays queued replies in order
pub struct MockBinding {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

#[allow(dead_code)]
impl MockBinding {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: "mock-model".to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue a plain text reply
    pub fn queue_text(&self, text: &str) {
        self.queue_response(LlmResponse::text(text));
    }

    /// Queue a reply requesting one action
    pub fn queue_request(&self, name: &str, args: Value) {
        self.queue_requests(&[(name, args)]);
    }

    /// Queue a reply requesting several actions at once
    pub fn queue_requests(&self, requests: &[(&str, Value)]) {
        let response = requests.iter().fold(LlmResponse::default(), |resp, (name, args)| {
            resp.with_request(ActionRequest::new(
                format!("call_{}", uuid::Uuid::new_v4().simple()),
                *name,
                args,
            ))
        });
        self.queue_response(response);
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockBinding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for MockBinding {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Mock Actions
// ============================================================================

/// Action with a scripted outcome that records every call
pub struct MockAction {
    name: String,
    outcome: Result<String, String>,
    calls: Mutex<Vec<Map<String, Value>>>,
}

#[allow(dead_code)]
impl MockAction {
    pub fn new(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Ok(output.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Action whose every call fails with a backend error
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Err(message.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded_calls(&self) -> Vec<Map<String, Value>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Action for MockAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!("Mock {}", self.name)
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn run(&self, args: Map<String, Value>, _config: &TurnConfig) -> Result<String, ActionError> {
        self.calls.lock().unwrap().push(args);
        self.outcome.clone().map_err(|message| ActionError::Http {
            status: 500,
            message,
        })
    }
}

/// Mock executors for every action of the kitchen catalog
pub struct MockActions {
    actions: BTreeMap<String, Arc<MockAction>>,
}

#[allow(dead_code)]
impl MockActions {
    pub fn kitchen() -> Self {
        let primary = primary_spec();
        let names = specialists()
            .into_iter()
            .flat_map(|s| s.safe_actions.into_iter().chain(s.sensitive_actions))
            .chain(primary.safe_actions)
            .chain(primary.sensitive_actions);
        let actions = names
            .map(|name| {
                let action = Arc::new(MockAction::new(name.clone(), format!("{name} succeeded")));
                (name, action)
            })
            .collect();
        Self { actions }
    }

    /// Swap in a specific mock for its action name
    pub fn replace(mut self, action: MockAction) -> Self {
        self.actions.insert(action.name.clone(), Arc::new(action));
        self
    }

    pub fn get(&self, name: &str) -> Arc<MockAction> {
        Arc::clone(self.actions.get(name).expect("unknown mock action"))
    }

    pub fn total_calls(&self) -> usize {
        self.actions.values().map(|a| a.recorded_calls().len()).sum()
    }

    pub fn registry(&self) -> ActionRegistry {
        self.actions
            .values()
            .fold(ActionRegistry::new(), |registry, action| {
                registry.with(Arc::clone(action) as Arc<dyn Action>)
            })
    }
}

/// Kitchen registry with every assistant on `binding`
pub fn kitchen_registry(binding: Arc<MockBinding>) -> (AssistantRegistry, MockActions) {
    let actions = MockActions::kitchen();
    (registry_with(binding, &actions), actions)
}

pub fn registry_with(binding: Arc<MockBinding>, actions: &MockActions) -> AssistantRegistry {
    AssistantRegistry::builder(primary_spec())
        .register(specialists())
        .with_actions(actions.registry())
        .with_default_binding(binding)
        .build()
        .expect("kitchen registry is valid")
}

// ============================================================================
// Static Context
// ============================================================================

/// Context provider returning a fixed string
pub struct StaticContext(pub String);

impl Default for StaticContext {
    fn default() -> Self {
        Self("user ID: test-user | current page: /refrigerators".to_string())
    }
}

#[async_trait]
impl ContextProvider for StaticContext {
    async fn fetch(&self, _config: &TurnConfig) -> Result<String, ContextError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverSettings;
    use crate::context::IdentityContext;
    use crate::registry::{ESCALATE_ACTION, ROOT_ASSISTANT};
    use crate::runtime::{Orchestrator, TurnResult};
    use crate::state_machine::{Role, Snapshot};
    use crate::store::{InMemoryStore, SnapshotStore, SqliteStore};
    use crate::translator::{is_internal_notice, ResponseEntry};
    use serde_json::json;
    use std::time::Duration;

    const PANTRY_CREATED: &str = "Refrigerator 'Pantry' created (ID: 7)";

    fn settings() -> DriverSettings {
        DriverSettings {
            retry_base_delay: Duration::ZERO,
            ..DriverSettings::default()
        }
    }

    fn config() -> TurnConfig {
        TurnConfig::new().with_user("test-user").with_page("/refrigerators")
    }

    fn orchestrator_with<S: SnapshotStore>(
        binding: Arc<MockBinding>,
        actions: &MockActions,
        store: S,
    ) -> Orchestrator<S, StaticContext> {
        Orchestrator::new(
            Arc::new(registry_with(binding, actions)),
            store,
            StaticContext::default(),
            settings(),
        )
    }

    fn pantry_actions() -> MockActions {
        MockActions::kitchen().replace(MockAction::new("create_refrigerator", PANTRY_CREATED))
    }

    /// Root delegates, the specialist asks to create a refrigerator
    fn queue_create_pantry(binding: &MockBinding) {
        binding.queue_request(
            "to_refrigerator_assistant",
            json!({"request": "create a refrigerator called Pantry"}),
        );
        binding.queue_request("create_refrigerator", json!({"name": "Pantry"}));
    }

    fn messages(responses: &[ResponseEntry]) -> Vec<&str> {
        responses
            .iter()
            .filter(|r| matches!(r, ResponseEntry::Message { .. }))
            .map(ResponseEntry::content)
            .collect()
    }

    async fn snapshot<S: SnapshotStore, C: ContextProvider>(
        orch: &Orchestrator<S, C>,
        thread_id: &str,
    ) -> Snapshot {
        orch.store().get(thread_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_mock_binding_replays_in_order() {
        let binding = MockBinding::new();
        binding.queue_text("first");
        binding.queue_error(LlmError::network("down"));

        let request = LlmRequest {
            system: String::new(),
            messages: vec![],
            actions: vec![],
            max_tokens: None,
        };
        assert_eq!(binding.complete(&request).await.unwrap().content, "first");
        assert!(binding.complete(&request).await.is_err());
        // Exhausted queue reports an error instead of hanging
        assert!(binding.complete(&request).await.is_err());
        assert_eq!(binding.recorded_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_create_refrigerator_then_approve() {
        let binding = Arc::new(MockBinding::new());
        let actions = pantry_actions();
        let orch = orchestrator_with(binding.clone(), &actions, InMemoryStore::new());

        queue_create_pantry(&binding);
        let result = orch
            .run_turn("T1", "create a refrigerator called Pantry", &config())
            .await;

        let TurnResult::ToolApproval {
            action_requests,
            responses,
            thread_id,
            ..
        } = result
        else {
            panic!("expected tool approval, got {result:?}");
        };
        assert_eq!(thread_id, "T1");
        assert_eq!(action_requests.len(), 1);
        assert_eq!(action_requests[0].name, "create_refrigerator");
        assert!(responses
            .iter()
            .any(|r| matches!(r, ResponseEntry::Thinking { action_name, .. } if action_name == "create_refrigerator")));
        assert_eq!(actions.total_calls(), 0);
        assert_eq!(snapshot(&orch, "T1").await.state.dialog_stack.current(), "refrigerator");

        binding.queue_text("Your Pantry refrigerator is ready.");
        let result = orch.run_turn("T1", "y", &config()).await;

        let TurnResult::Message {
            responses, complete, ..
        } = result
        else {
            panic!("expected message, got {result:?}");
        };
        assert!(complete);
        assert_eq!(actions.get("create_refrigerator").recorded_calls().len(), 1);
        assert_eq!(actions.get("create_refrigerator").recorded_calls()[0]["name"], "Pantry");
        assert!(messages(&responses).contains(&PANTRY_CREATED));
    }

    #[tokio::test]
    async fn test_reject_returns_to_root() {
        let binding = Arc::new(MockBinding::new());
        let actions = pantry_actions();
        let orch = orchestrator_with(binding.clone(), &actions, InMemoryStore::new());

        queue_create_pantry(&binding);
        orch.run_turn("T1", "create a refrigerator called Pantry", &config())
            .await;
        let before = snapshot(&orch, "T1").await;
        let pending = before.pending_action_requests().to_vec();

        binding.queue_text("Okay, I won't create it. Anything else?");
        let result = orch.run_turn("T1", " N ", &config()).await;

        let TurnResult::Message {
            responses, complete, ..
        } = result
        else {
            panic!("expected message, got {result:?}");
        };
        assert!(complete);
        assert_eq!(actions.total_calls(), 0);
        let texts = messages(&responses);
        assert!(texts.iter().any(|t| t.contains("declined to run create_refrigerator")));
        assert!(texts.contains(&"Okay, I won't create it. Anything else?"));
        assert!(texts.iter().all(|t| !is_internal_notice(t)));

        let after = snapshot(&orch, "T1").await;
        assert!(after.state.dialog_stack.is_empty());
        let rejections: Vec<_> = after
            .state
            .messages
            .iter()
            .filter(|m| m.role == Role::ActionResult && m.content.contains("declined"))
            .collect();
        assert_eq!(rejections.len(), pending.len());
        assert_eq!(rejections[0].source_action_id.as_deref(), Some(pending[0].id.as_str()));
        // The root assistant spoke last, after the escalation was answered
        assert_eq!(
            after.state.messages.last().and_then(|m| m.author.as_deref()),
            Some(ROOT_ASSISTANT)
        );
    }

    #[tokio::test]
    async fn test_reject_many_pending_requests() {
        let binding = Arc::new(MockBinding::new());
        let actions = MockActions::kitchen();
        let orch = orchestrator_with(binding.clone(), &actions, InMemoryStore::new());

        binding.queue_request("to_refrigerator_assistant", json!({"request": "two fridges"}));
        binding.queue_requests(&[
            ("create_refrigerator", json!({"name": "A"})),
            ("create_refrigerator", json!({"name": "B"})),
            ("get_refrigerators", json!({})),
        ]);
        orch.run_turn("T1", "make fridges A and B", &config()).await;

        binding.queue_text("Cancelled.");
        orch.run_turn("T1", "n", &config()).await;

        let after = snapshot(&orch, "T1").await;
        let rejections = after
            .state
            .messages
            .iter()
            .filter(|m| m.role == Role::ActionResult && m.content.contains("declined"))
            .count();
        assert_eq!(rejections, 3);
        let escalations = after
            .state
            .messages
            .iter()
            .flat_map(|m| &m.action_requests)
            .filter(|r| r.name == ESCALATE_ACTION)
            .count();
        assert_eq!(escalations, 1);
        assert!(after.state.dialog_stack.is_empty());
        assert_eq!(actions.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_ordinary_input_while_suspended_is_refused() {
        let binding = Arc::new(MockBinding::new());
        let actions = pantry_actions();
        let orch = orchestrator_with(binding.clone(), &actions, InMemoryStore::new());

        queue_create_pantry(&binding);
        orch.run_turn("T1", "create a refrigerator called Pantry", &config())
            .await;
        let before = snapshot(&orch, "T1").await;
        let calls_before = binding.recorded_requests().len();

        let result = orch.run_turn("T1", "actually, what's in it?", &config()).await;
        let TurnResult::Error { message } = result else {
            panic!("expected error, got {result:?}");
        };
        assert_eq!(message, "approval required");

        let after = snapshot(&orch, "T1").await;
        assert_eq!(after, before);
        assert_eq!(after.pending_action_requests(), before.pending_action_requests());
        assert_eq!(binding.recorded_requests().len(), calls_before);
        assert_eq!(actions.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_approval_input_without_suspension() {
        let binding = Arc::new(MockBinding::new());
        let actions = MockActions::kitchen();
        let orch = orchestrator_with(binding.clone(), &actions, InMemoryStore::new());

        for input in ["y", "n"] {
            let result = orch.run_turn("fresh", input, &config()).await;
            let TurnResult::Error { message } = result else {
                panic!("expected error, got {result:?}");
            };
            assert_eq!(message, "no action is waiting for approval");
        }
        assert!(binding.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_safe_actions_run_without_approval() {
        let binding = Arc::new(MockBinding::new());
        let actions = MockActions::kitchen();
        let orch = orchestrator_with(binding.clone(), &actions, InMemoryStore::new());

        binding.queue_request("to_refrigerator_assistant", json!({"request": "list"}));
        binding.queue_request("get_refrigerators", json!({}));
        binding.queue_text("You have one refrigerator.");

        let result = orch.run_turn("T1", "what fridges do I have?", &config()).await;
        let TurnResult::Message {
            responses, complete, ..
        } = result
        else {
            panic!("expected message, got {result:?}");
        };
        assert!(complete);
        assert_eq!(actions.get("get_refrigerators").recorded_calls().len(), 1);
        assert_eq!(
            messages(&responses),
            vec!["get_refrigerators succeeded", "You have one refrigerator."]
        );
        // Specialist stays active for the next turn
        let snap = snapshot(&orch, "T1").await;
        assert_eq!(snap.state.dialog_stack.current(), "refrigerator");
        assert!(snap.pending_step.is_done());

        // Next turn starts at the specialist, not the root
        binding.queue_text("Still just the one.");
        orch.run_turn("T1", "and now?", &config()).await;
        let last_request = binding.recorded_requests().pop().unwrap();
        assert!(last_request
            .actions
            .iter()
            .any(|a| a.name == ESCALATE_ACTION));
    }

    #[tokio::test]
    async fn test_mixed_batch_runs_together_after_approval() {
        let binding = Arc::new(MockBinding::new());
        let actions = MockActions::kitchen();
        let orch = orchestrator_with(binding.clone(), &actions, InMemoryStore::new());

        binding.queue_request("to_recipe_assistant", json!({"request": "save and show"}));
        binding.queue_requests(&[
            ("get_favorite_recipes", json!({})),
            ("create_recipe", json!({"title": "Soup", "ingredients": [], "steps": []})),
        ]);
        let result = orch.run_turn("T1", "save my soup recipe", &config()).await;
        let TurnResult::ToolApproval { action_requests, .. } = result else {
            panic!("expected tool approval, got {result:?}");
        };
        assert_eq!(action_requests.len(), 2);
        assert_eq!(actions.total_calls(), 0);

        binding.queue_text("Saved.");
        orch.run_turn("T1", "Y", &config()).await;
        assert_eq!(actions.get("get_favorite_recipes").recorded_calls().len(), 1);
        assert_eq!(actions.get("create_recipe").recorded_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_executor_failure_is_recovered() {
        let binding = Arc::new(MockBinding::new());
        let actions = MockActions::kitchen()
            .replace(MockAction::failing("delete_ingredient", "ingredient not found"));
        let orch = orchestrator_with(binding.clone(), &actions, InMemoryStore::new());

        binding.queue_request("to_refrigerator_assistant", json!({"request": "clean up"}));
        binding.queue_requests(&[
            ("delete_ingredient", json!({"refrigerator_id": 1, "category_id": 2, "ingredient_id": 3})),
            ("delete_category", json!({"refrigerator_id": 1, "category_id": 2})),
        ]);
        orch.run_turn("T1", "clean my fridge", &config()).await;

        binding.queue_text("The category is gone, but the ingredient was already missing.");
        let result = orch.run_turn("T1", "y", &config()).await;
        assert!(matches!(result, TurnResult::Message { complete: true, .. }));
        assert_eq!(actions.get("delete_category").recorded_calls().len(), 1);

        let snap = snapshot(&orch, "T1").await;
        let errors: Vec<_> = snap.state.messages.iter().filter(|m| m.is_error).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].content.contains("ingredient not found"));
    }

    #[tokio::test]
    async fn test_unknown_action_needs_approval_then_errors() {
        let binding = Arc::new(MockBinding::new());
        let actions = MockActions::kitchen();
        let orch = orchestrator_with(binding.clone(), &actions, InMemoryStore::new());

        binding.queue_request("launch_rocket", json!({}));
        let result = orch.run_turn("T1", "launch!", &config()).await;
        assert!(matches!(result, TurnResult::ToolApproval { .. }));

        binding.queue_text("I can't do that.");
        orch.run_turn("T1", "y", &config()).await;
        let snap = snapshot(&orch, "T1").await;
        assert!(snap
            .state
            .messages
            .iter()
            .any(|m| m.is_error && m.content.contains("no executor bound for action launch_rocket")));
    }

    #[tokio::test]
    async fn test_shape_mismatch_resets_thread() {
        let binding = Arc::new(MockBinding::new());
        let actions = MockActions::kitchen();
        let orch = orchestrator_with(binding.clone(), &actions, InMemoryStore::new());

        binding.queue_text("Hi!");
        orch.run_turn("T1", "hello", &config()).await;

        binding.queue_error(LlmError::invalid_request(
            "An assistant message with 'tool_calls' must be followed by tool messages responding to each 'tool_call_id'.",
        ));
        let result = orch.run_turn("T1", "and again", &config()).await;

        let TurnResult::Message {
            responses, complete, ..
        } = result
        else {
            panic!("expected message, got {result:?}");
        };
        assert!(complete);
        assert_eq!(responses.len(), 1);
        let snap = snapshot(&orch, "T1").await;
        assert!(snap.state.messages.is_empty());
        assert!(snap.state.dialog_stack.is_empty());
    }

    #[tokio::test]
    async fn test_unclassified_failure_leaves_state() {
        let binding = Arc::new(MockBinding::new());
        let actions = MockActions::kitchen();
        let orch = orchestrator_with(binding.clone(), &actions, InMemoryStore::new());

        binding.queue_error(LlmError::auth("bad key"));
        let result = orch.run_turn("T1", "hello", &config()).await;
        assert!(matches!(result, TurnResult::Error { message } if message == "bad key"));

        // The context step was checkpointed before generation failed
        let snap = snapshot(&orch, "T1").await;
        assert_eq!(snap.state.messages.len(), 1);
        assert_eq!(snap.pending_step, crate::state_machine::Step::assistant(ROOT_ASSISTANT));
    }

    #[tokio::test]
    async fn test_missing_identity_is_a_turn_error() {
        let binding = Arc::new(MockBinding::new());
        let actions = MockActions::kitchen();
        let orch = Orchestrator::new(
            Arc::new(registry_with(binding.clone(), &actions)),
            InMemoryStore::new(),
            IdentityContext,
            settings(),
        );

        let result = orch.run_turn("T1", "hello", &TurnConfig::new()).await;
        assert!(
            matches!(&result, TurnResult::Error { message } if message.contains("user_id")),
            "got {result:?}"
        );
        assert!(binding.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_resume_is_store_transparent() {
        async fn approved_results<S: SnapshotStore>(
            first: Orchestrator<S, StaticContext>,
            reopen: impl FnOnce(Orchestrator<S, StaticContext>) -> Orchestrator<S, StaticContext>,
            binding: &MockBinding,
        ) -> Vec<String> {
            queue_create_pantry(binding);
            first
                .run_turn("T1", "create a refrigerator called Pantry", &config())
                .await;
            let second = reopen(first);
            binding.queue_text("Done.");
            second.run_turn("T1", "y", &config()).await;
            second
                .store()
                .get("T1")
                .await
                .unwrap()
                .unwrap()
                .state
                .messages
                .into_iter()
                .filter(|m| m.role == Role::ActionResult && !is_internal_notice(&m.content))
                .map(|m| m.content)
                .collect()
        }

        let binding = Arc::new(MockBinding::new());
        let actions = pantry_actions();
        let direct = approved_results(
            orchestrator_with(binding.clone(), &actions, InMemoryStore::new()),
            |orch| orch,
            &binding,
        )
        .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.db");
        let binding = Arc::new(MockBinding::new());
        let actions = pantry_actions();
        let reloaded = approved_results(
            orchestrator_with(binding.clone(), &actions, SqliteStore::open(&path).unwrap()),
            |orch| {
                drop(orch);
                orchestrator_with(binding.clone(), &actions, SqliteStore::open(&path).unwrap())
            },
            &binding,
        )
        .await;

        assert_eq!(direct, vec![PANTRY_CREATED.to_string()]);
        assert_eq!(reloaded, direct);
    }

    #[tokio::test]
    async fn test_threads_are_independent() {
        let binding = Arc::new(MockBinding::new());
        let actions = pantry_actions();
        let orch = orchestrator_with(binding.clone(), &actions, InMemoryStore::new());

        queue_create_pantry(&binding);
        orch.run_turn("T1", "create a refrigerator called Pantry", &config())
            .await;

        binding.queue_text("Hello from another thread.");
        let result = orch.run_turn("T2", "hi", &config()).await;
        assert!(matches!(result, TurnResult::Message { complete: true, .. }));
        assert!(orch.store().is_suspended("T1").await.unwrap());
        assert!(!orch.store().is_suspended("T2").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_turns_complete() {
        let binding = Arc::new(MockBinding::new());
        let actions = MockActions::kitchen();
        let orch = orchestrator_with(binding.clone(), &actions, InMemoryStore::new());

        binding.queue_text("one");
        binding.queue_text("two");
        let cfg = config();
        let (a, b) = tokio::join!(orch.run_turn("A", "hi", &cfg), orch.run_turn("B", "hi", &cfg));
        assert!(matches!(a, TurnResult::Message { complete: true, .. }));
        assert!(matches!(b, TurnResult::Message { complete: true, .. }));
        assert_eq!(orch.active_thread_locks(), 0);
    }

    #[tokio::test]
    async fn test_same_thread_turns_run_one_at_a_time() {
        let binding = Arc::new(MockBinding::new());
        let actions = MockActions::kitchen();
        let orch = orchestrator_with(binding.clone(), &actions, InMemoryStore::new());

        binding.queue_text("reply one");
        binding.queue_text("reply two");
        let cfg = config();
        let (a, b) = tokio::join!(
            orch.run_turn("T1", "first", &cfg),
            orch.run_turn("T1", "second", &cfg)
        );
        assert!(matches!(a, TurnResult::Message { complete: true, .. }));
        assert!(matches!(b, TurnResult::Message { complete: true, .. }));

        // The later drive saw the earlier one's checkpoint
        let requests = binding.recorded_requests();
        assert_eq!(requests.len(), 2);
        let seen: Vec<(Role, &str)> = requests[1]
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1], (Role::Assistant, "reply one"));

        let snap = snapshot(&orch, "T1").await;
        let roles: Vec<Role> = snap.state.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(snap.state.messages[3].content, "reply two");
        assert_eq!(orch.active_thread_locks(), 0);
    }

    #[tokio::test]
    async fn test_thread_locks_are_released_after_each_turn() {
        let binding = Arc::new(MockBinding::new());
        let actions = pantry_actions();
        let orch = orchestrator_with(binding.clone(), &actions, InMemoryStore::new());

        queue_create_pantry(&binding);
        orch.run_turn("T1", "create a refrigerator called Pantry", &config())
            .await;
        assert_eq!(orch.active_thread_locks(), 0);

        // Failed turns release too
        let result = orch.run_turn("T1", "something else", &config()).await;
        assert!(matches!(result, TurnResult::Error { .. }));
        assert_eq!(orch.active_thread_locks(), 0);
    }

    #[tokio::test]
    async fn test_interrupted_requests_are_answered_on_next_input() {
        let binding = Arc::new(MockBinding::new());
        let actions = MockActions::kitchen();
        let orch = Orchestrator::new(
            Arc::new(registry_with(binding.clone(), &actions)),
            InMemoryStore::new(),
            StaticContext::default(),
            DriverSettings {
                max_steps: 2,
                ..settings()
            },
        );

        // Context fetch and the root's delegation use up the step guard
        binding.queue_request("to_refrigerator_assistant", json!({"request": "show my fridges"}));
        let result = orch.run_turn("T1", "show my fridges", &config()).await;
        assert!(matches!(result, TurnResult::Error { .. }));
        let stale = snapshot(&orch, "T1").await;
        assert!(!stale.pending_step.is_done());
        assert_eq!(stale.state.trailing_requests().len(), 1);

        binding.queue_text("How can I help?");
        let result = orch.run_turn("T1", "hi again", &config()).await;
        assert!(matches!(result, TurnResult::Message { complete: true, .. }));

        let requests = binding.recorded_requests();
        let sent = &requests.last().unwrap().messages;
        for req in sent.iter().flat_map(|m| &m.action_requests) {
            assert!(
                sent.iter()
                    .any(|m| m.role == Role::ActionResult && m.source_action_id.as_deref() == Some(req.id.as_str())),
                "request {} left unanswered",
                req.id
            );
        }
        let answer = sent.iter().find(|m| m.role == Role::ActionResult).unwrap();
        assert!(answer.is_error);
        assert!(answer.content.contains("interrupted"));
        assert_eq!(sent.last().unwrap().content, "hi again");

        let snap = snapshot(&orch, "T1").await;
        assert!(snap.pending_step.is_done());
        assert!(snap.state.dialog_stack.is_empty());
    }
}
