//! Fixed conversational context for the analysis service.
//!
//! The instructions and calibration turns sent ahead of every subject are
//! plain data: a JSON document with a list of chat messages plus the text
//! that accompanies the subject image. The analyzer never inspects them.
//!
//! ```json
//! {
//!   "model": "gpt-4o",
//!   "subject_prompt": "Rate this person.",
//!   "messages": [
//!     { "role": "system", "content": "..." },
//!     { "role": "user", "content": [{ "type": "text", "text": "..." }] }
//!   ]
//! }
//! ```

use std::path::Path;

use rater_core::error::AppError;
use serde::{Deserialize, Serialize};

const BUILTIN_CONTEXT: &str = include_str!("../context/default.json");

const ALLOWED_ROLES: [&str; 3] = ["system", "user", "assistant"];

/// One chat turn of the fixed context.
///
/// `content` is passed through verbatim, so it may be a plain string or an
/// array of content parts (text, image_url).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: String,
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Turns sent before the subject, in order.
    pub messages: Vec<ContextMessage>,
    /// Text sent alongside the subject image in the final user turn.
    pub subject_prompt: String,
    /// Model the context was written for. An explicit `--model` wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ConversationContext {
    /// The context shipped with the binary.
    pub fn builtin() -> Result<Self, AppError> {
        Self::from_json(BUILTIN_CONTEXT)
    }

    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let context: Self = serde_json::from_str(json)
            .map_err(|e| AppError::ConfigError(format!("Invalid conversation context: {e}")))?;
        context.validate()?;
        Ok(context)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!(
                "Failed to read conversation context {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&raw)
    }

    /// Load from `path` when given, otherwise fall back to the built-in context.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::builtin(),
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        for (i, message) in self.messages.iter().enumerate() {
            if !ALLOWED_ROLES.contains(&message.role.as_str()) {
                return Err(AppError::ConfigError(format!(
                    "Conversation context message {i} has unknown role '{}'",
                    message.role
                )));
            }
        }
        Ok(())
    }

    /// The full message list for one subject: the fixed turns followed by a
    /// single user turn carrying the subject prompt and the image reference.
    pub fn render(&self, resource_reference: &str) -> Vec<ContextMessage> {
        let mut messages = self.messages.clone();
        messages.push(ContextMessage {
            role: "user".to_string(),
            content: serde_json::json!([
                { "type": "text", "text": self.subject_prompt },
                { "type": "image_url", "image_url": { "url": resource_reference } },
            ]),
        });
        messages
    }
}
