//! Larder - multi-assistant kitchen conversation orchestrator
//!
//! A root assistant delegates to specialist assistants, which run backend
//! actions behind a human approval gate. This binary drives turns from an
//! interactive console.

mod actions;
mod approval;
mod config;
mod context;
mod llm;
mod registry;
mod runtime;
mod state_machine;
mod store;
mod translator;

use actions::catalog::{kitchen_actions, primary_spec, specialists};
use actions::BackendClient;
use config::{AppConfig, TurnConfig};
use context::IdentityContext;
use llm::{LoggingClient, OpenAiClient};
use registry::AssistantRegistry;
use runtime::Orchestrator;
use std::sync::Arc;
use store::{InMemoryStore, SnapshotStore, SqliteStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "larder=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let app = AppConfig::from_env();
    let Some(api_key) = app.openai_api_key.clone() else {
        return Err("OPENAI_API_KEY is not set".into());
    };

    let client = OpenAiClient::new(api_key, app.model.clone(), app.llm_base_url.as_deref())?;
    tracing::info!(model = %app.model, "Language binding initialized");

    let backend = Arc::new(BackendClient::new(
        &app.backend_url,
        app.internal_api_key.clone(),
    )?);
    let registry = AssistantRegistry::builder(primary_spec())
        .register(specialists())
        .with_actions(kitchen_actions(&backend))
        .with_default_binding(Arc::new(LoggingClient::new(Arc::new(client))))
        .build()?;

    let store: Arc<dyn SnapshotStore> = match &app.db_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(path = %path.display(), "Opening snapshot database");
            Arc::new(SqliteStore::open(path)?)
        }
        None => {
            tracing::warn!("LARDER_DB_PATH not set, conversations are kept in memory");
            Arc::new(InMemoryStore::new())
        }
    };

    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        store,
        IdentityContext,
        app.driver_settings(),
    );
    let turn_config = TurnConfig::from_env();

    let mut thread_id = new_thread_id();
    eprintln!("thread {thread_id} (type /new for a fresh thread, y/n to answer approvals)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "/new" {
            thread_id = new_thread_id();
            eprintln!("thread {thread_id}");
            continue;
        }

        let result = orchestrator.run_turn(&thread_id, input, &turn_config).await;
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}

fn new_thread_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
