//! Actions backed by the kitchen backend's HTTP API

use super::{Action, ActionError};
use crate::config::TurnConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    /// Leftover arguments travel in the query string rather than a JSON body
    fn uses_query(self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Delete)
    }
}

/// Maps leftover arguments to the JSON body an endpoint expects
pub type BodyShape = fn(Map<String, Value>) -> Value;

/// What a request carries besides its path
#[derive(Debug, PartialEq)]
enum Payload {
    Query(Map<String, Value>),
    Json(Value),
}

/// Shared connection to the backend
pub struct BackendClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl BackendClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, ActionError> {
        if api_key.is_none() {
            tracing::warn!("INTERNAL_API_KEY is not set; backend calls will be unauthenticated");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ActionError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        user_id: &str,
        payload: Payload,
    ) -> Result<String, ActionError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .client
            .request(method.as_reqwest(), &url)
            .header("Accept", "application/json")
            .header("x-api-key", self.api_key.as_deref().unwrap_or_default())
            .header("x-user-id", user_id);

        match payload {
            Payload::Query(args) if args.is_empty() => {}
            Payload::Query(args) => {
                let query: Vec<(String, String)> =
                    args.into_iter().map(|(k, v)| (k, plain_text(&v))).collect();
                request = request.query(&query);
            }
            Payload::Json(body) => request = request.json(&body),
        }

        let response = request
            .send()
            .await
            .map_err(|e| ActionError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ActionError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ActionError::Http {
                status: status.as_u16(),
                message: backend_error_message(&body),
            });
        }

        Ok(render_body(&body))
    }
}

/// One backend endpoint exposed as an action.
///
/// `{placeholders}` in the path are filled from arguments of the same name.
/// The rest become the query string or, through an optional [`BodyShape`],
/// the JSON body.
pub struct HttpAction {
    name: String,
    description: String,
    method: HttpMethod,
    path: String,
    schema: Value,
    shape: Option<BodyShape>,
    backend: Arc<BackendClient>,
}

impl HttpAction {
    pub fn new(
        backend: Arc<BackendClient>,
        name: impl Into<String>,
        description: impl Into<String>,
        method: HttpMethod,
        path: impl Into<String>,
        schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            method,
            path: path.into(),
            schema,
            shape: None,
            backend,
        }
    }

    #[must_use]
    pub fn with_body(mut self, shape: Option<BodyShape>) -> Self {
        self.shape = shape;
        self
    }

    fn payload(&self, args: Map<String, Value>) -> Payload {
        if self.method.uses_query() {
            return Payload::Query(args);
        }
        match self.shape {
            Some(shape) => Payload::Json(shape(args)),
            None => Payload::Json(Value::Object(args)),
        }
    }
}

#[async_trait]
impl Action for HttpAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn run(&self, mut args: Map<String, Value>, config: &TurnConfig) -> Result<String, ActionError> {
        let user_id = config.user_id().ok_or(ActionError::MissingIdentity)?;
        let path = fill_path(&self.path, &mut args)?;
        tracing::debug!(action = %self.name, path = %path, "Calling backend");
        let payload = self.payload(args);
        self.backend.send(self.method, &path, user_id, payload).await
    }
}

/// Substitute `{name}` segments, consuming the arguments they use
fn fill_path(template: &str, args: &mut Map<String, Value>) -> Result<String, ActionError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some((head, tail)) = rest.split_once('{') {
        let Some((key, after)) = tail.split_once('}') else {
            break;
        };
        let value = args
            .remove(key)
            .ok_or_else(|| ActionError::MissingArgument(key.to_string()))?;
        out.push_str(head);
        out.push_str(&plain_text(&value));
        rest = after;
    }
    out.push_str(rest);
    Ok(out)
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn backend_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| body.to_string())
}

fn render_body(body: &str) -> String {
    if body.trim().is_empty() {
        return "Success".to_string();
    }
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| body.to_string())
}
