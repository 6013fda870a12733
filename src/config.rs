//! Process and per-turn configuration

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BACKEND_URL: &str = "http://localhost:3000";
const DEFAULT_MAX_STEPS: usize = 50;

/// Process-wide settings read once at startup
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openai_api_key: Option<String>,
    pub model: String,
    /// Override for `OpenAI`-compatible endpoints
    pub llm_base_url: Option<String>,
    pub backend_url: String,
    pub internal_api_key: Option<String>,
    /// SQLite file for snapshots; in-memory store when unset
    pub db_path: Option<PathBuf>,
    pub max_steps: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            model: non_empty_var("LARDER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            llm_base_url: non_empty_var("LLM_BASE_URL"),
            backend_url: non_empty_var("BACKEND_URL")
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            internal_api_key: non_empty_var("INTERNAL_API_KEY"),
            db_path: non_empty_var("LARDER_DB_PATH").map(PathBuf::from),
            max_steps: non_empty_var("LARDER_MAX_STEPS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_STEPS),
        }
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            max_steps: self.max_steps,
            ..DriverSettings::default()
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_focus(raw: &str) -> Vec<(&str, &str)> {
    raw.split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(label, value)| (label.trim(), value.trim()))
        .filter(|(label, value)| !label.is_empty() && !value.is_empty())
        .collect()
}

/// Limits applied while driving one turn
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Steps executed per drive before giving up
    pub max_steps: usize,
    /// Generations tried before an empty reply becomes a shape error
    pub max_empty_attempts: u32,
    /// Attempts for retryable language service failures
    pub max_generation_attempts: u32,
    /// First backoff delay, doubled on each retry
    pub retry_base_delay: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_empty_attempts: 3,
            max_generation_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

impl DriverSettings {
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Identity and location for one turn. Identity is opaque to the core.
#[derive(Debug, Clone, Default)]
pub struct TurnConfig {
    pub user_id: Option<String>,
    pub page: Option<String>,
    pub language: Option<String>,
    /// Ordered (label, value) pairs for the resource the user is looking at
    pub focus: Vec<(String, String)>,
}

impl TurnConfig {
    #[allow(dead_code)] // Used in tests
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)] // Used in tests
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[allow(dead_code)] // Used in tests
    pub fn with_page(mut self, page: impl Into<String>) -> Self {
        self.page = Some(page.into());
        self
    }

    #[allow(dead_code)] // Used in tests
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_focus(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.focus.push((label.into(), value.into()));
        self
    }

    /// Console identity from `LARDER_USER_ID`, `LARDER_PAGE`,
    /// `LARDER_LANGUAGE` and `LARDER_FOCUS` (`label=value` pairs separated by `;`)
    pub fn from_env() -> Self {
        let focus = non_empty_var("LARDER_FOCUS").unwrap_or_default();
        let config = Self {
            user_id: non_empty_var("LARDER_USER_ID"),
            page: non_empty_var("LARDER_PAGE"),
            language: non_empty_var("LARDER_LANGUAGE"),
            focus: Vec::new(),
        };
        parse_focus(&focus)
            .into_iter()
            .fold(config, |config, (label, value)| config.with_focus(label, value))
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|v| !v.trim().is_empty())
    }
}
