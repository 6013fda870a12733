//! Per-turn context for assistant prompts

use crate::config::TurnConfig;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("missing required context field: {0}")]
    MissingField(&'static str),
}

/// Produces the free-text context string for a turn
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn fetch(&self, config: &TurnConfig) -> Result<String, ContextError>;
}

/// Renders identity and location straight from the turn configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityContext;

#[async_trait]
impl ContextProvider for IdentityContext {
    async fn fetch(&self, config: &TurnConfig) -> Result<String, ContextError> {
        let user_id = config.user_id().ok_or(ContextError::MissingField("user_id"))?;
        let page = config
            .page
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or(ContextError::MissingField("page"))?;

        let mut parts = vec![format!("user ID: {user_id}"), format!("current page: {page}")];
        parts.extend(config.focus.iter().map(|(label, value)| format!("{label}: {value}")));
        if let Some(language) = config.language.as_deref().filter(|l| !l.is_empty()) {
            parts.push(format!("user language: {language}"));
        }
        Ok(parts.join(" | "))
    }
}
