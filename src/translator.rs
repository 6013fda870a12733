//! Event translator
//!
//! Turns the ordered step outputs of one drive into user-visible response
//! entries, dropping internal transition notices and exact duplicates.

use crate::state_machine::{Message, Role, StepEvent};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Markers of messages produced only to keep the conversation well-formed
pub const ENTER_NOTICE_MARKER: &str = "The assistant is now the";
pub const LEAVE_NOTICE_MARKER: &str = "Resuming dialog with the";
pub const SKIP_NOTICE_MARKER: &str = "Skipped while transferring control";

const NOTICE_MARKERS: [&str; 3] = [ENTER_NOTICE_MARKER, LEAVE_NOTICE_MARKER, SKIP_NOTICE_MARKER];

pub fn is_internal_notice(content: &str) -> bool {
    NOTICE_MARKERS.iter().any(|m| content.contains(m))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseEntry {
    Message {
        content: String,
        origin_step: String,
    },
    Thinking {
        content: String,
        origin_step: String,
        action_name: String,
        action_args: Value,
    },
}

impl ResponseEntry {
    #[allow(dead_code)] // Used in tests
    pub fn content(&self) -> &str {
        match self {
            ResponseEntry::Message { content, .. } | ResponseEntry::Thinking { content, .. } => {
                content
            }
        }
    }
}

/// Accumulates entries for one turn. The seen-set lives as long as the translator.
#[derive(Debug, Default)]
pub struct EventTranslator {
    seen: HashSet<String>,
    entries: Vec<ResponseEntry>,
}

impl EventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consume(&mut self, events: &[StepEvent]) {
        for event in events {
            for message in &event.messages {
                self.consume_message(&event.step, message);
            }
        }
    }

    fn consume_message(&mut self, step: &str, message: &Message) {
        if message.role == Role::Assistant {
            for request in &message.action_requests {
                let args = match request.args() {
                    Ok(args) => Value::Object(args),
                    Err(e) => {
                        tracing::warn!(step, action = %request.name, error = %e, "Skipping preview for malformed arguments");
                        continue;
                    }
                };
                let content = format!(
                    "Preparing action: {}\nArguments: {}",
                    request.name,
                    serde_json::to_string_pretty(&args).unwrap_or_default()
                );
                if self.first_sighting(&content) {
                    self.entries.push(ResponseEntry::Thinking {
                        content,
                        origin_step: step.to_string(),
                        action_name: request.name.clone(),
                        action_args: args,
                    });
                }
            }
        }

        let content = message.content.trim();
        if content.is_empty() || is_internal_notice(content) {
            return;
        }
        if self.first_sighting(content) {
            self.entries.push(ResponseEntry::Message {
                content: content.to_string(),
                origin_step: step.to_string(),
            });
        }
    }

    fn first_sighting(&mut self, content: &str) -> bool {
        self.seen.insert(content.to_string())
    }

    pub fn into_entries(self) -> Vec<ResponseEntry> {
        self.entries
    }
}

/// Translate one drive's outputs
pub fn translate(events: &[StepEvent]) -> Vec<ResponseEntry> {
    let mut translator = EventTranslator::new();
    translator.consume(events);
    translator.into_entries()
}
