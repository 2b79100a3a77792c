use std::sync::Arc;
use std::time::Duration;

use rater_core::error::AppError;
use rater_core::traits::Analyzer;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::context::{ContextMessage, ConversationContext};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible chat client that sends one image reference per call.
///
/// Every request is the fixed [`ConversationContext`] followed by a single
/// user turn for the subject. Works with any OpenAI-compatible API:
/// - OpenAI directly (`https://api.openai.com/v1`)
/// - Gemini via compatibility layer (`https://generativelanguage.googleapis.com/v1beta/openai`)
#[derive(Clone)]
pub struct OpenAiAnalyzer {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
    context: Arc<ConversationContext>,
}

impl OpenAiAnalyzer {
    /// Uses the context's own model when it names one, `gpt-4o` otherwise.
    pub fn new(api_key: &str, context: ConversationContext) -> Result<Self, AppError> {
        let model = context.model.clone();
        Self::build(
            api_key,
            model.as_deref().unwrap_or(DEFAULT_MODEL),
            DEFAULT_BASE_URL,
            DEFAULT_LLM_TIMEOUT,
            Arc::new(context),
        )
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        Self::build(
            &self.api_key,
            &self.model,
            &self.base_url,
            timeout,
            self.context,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build(
        api_key: &str,
        model: &str,
        base_url: &str,
        timeout: Duration,
        context: Arc<ConversationContext>,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::TransportError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout_secs: timeout.as_secs(),
            context,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            AppError::TransportError(format!("Connection failed: {}", e))
        } else {
            AppError::TransportError(e.to_string())
        }
    }
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ContextMessage>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Pull the reply text out of a successful chat completion body.
fn extract_reply(body: &str) -> Result<String, AppError> {
    let chat_response: ChatResponse = serde_json::from_str(body).map_err(|e| {
        AppError::ServiceError {
            message: format!("Malformed response: {}", e),
            status_code: 200,
            retryable: false,
        }
    })?;

    chat_response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or(AppError::EmptyReply)
}

/// Build the error for a non-success status, preferring the API's own message.
fn service_error(status_code: u16, body: &str) -> AppError {
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("HTTP {}: {}", status_code, body));

    AppError::ServiceError {
        message,
        status_code,
        retryable: status_code == 429 || status_code >= 500,
    }
}

impl Analyzer for OpenAiAnalyzer {
    async fn analyze(&self, resource_reference: &str) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: self.context.render(resource_reference),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;

        if !status.is_success() {
            return Err(service_error(status.as_u16(), &body));
        }

        let reply = extract_reply(&body)?;
        tracing::debug!(model = %self.model, reply_len = reply.len(), "Analysis reply received");
        Ok(reply)
    }
}
