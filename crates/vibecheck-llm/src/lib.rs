//! OpenAI-compatible chat client for VibeCheck's contextual analyzer.
//!
//! # Features
//! - Chat completions against any OpenAI-compatible endpoint
//! - Automatic retry with backoff on transient HTTP/transport failures
//! - Token-bucket rate limiting
//! - API key handled as a [`secrecy::SecretString`], never logged

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use url::Url;

/// The contextual analyzer that turns file content into supplemental findings.
pub mod contextual;
/// Rate limiting utilities for outbound provider requests.
pub mod rate_limiter;

pub use contextual::ContextualLlmAnalyzer;

/// OpenAI-compatible client with rate limiting support.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    base_url: Url,
    api_key: SecretString,
    http: reqwest::Client,
    default_model: String,
    rate_limiter: Option<rate_limiter::RateLimiter>,
    additional_headers: HashMap<String, String>,
    max_retries: u32,
}

/// Configuration for the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL for the API (e.g. "https://api.openai.com/v1").
    pub base_url: String,
    /// API key for authentication.
    pub api_key: SecretString,
    /// Default model to use for requests.
    pub default_model: String,
    /// Additional HTTP headers (excluding Authorization).
    pub headers: Option<HashMap<String, String>>,
    /// Disable use of system proxy configuration.
    pub disable_system_proxy: bool,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Maximum number of retries for failed requests.
    pub max_retries: u32,
    /// Optional rate limiter configuration.
    pub rate_limit_config: Option<rate_limiter::RateLimitConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: SecretString::new("".into()),
            default_model: "gpt-4o-mini".to_string(),
            headers: None,
            disable_system_proxy: false,
            timeout_seconds: get_default_timeout(),
            max_retries: 3,
            rate_limit_config: None,
        }
    }
}

fn get_default_timeout() -> u64 {
    std::env::var("VIBECHECK_OPENAI_TIMEOUT_SECONDS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(60)
}

/// Build a client from `OPENAI_API_KEY`/`OPENAI_MODEL`/`OPENAI_BASE_URL`
/// environment variables. Returns `None` when no API key is set, which the
/// coordinator treats as "no LLM configured" (lightweight's contextual pass
/// is skipped; robust assessments fail with `GEMINI_API_KEY_MISSING`).
pub fn client_from_env() -> Option<OpenAIClient> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())?;
    let base_url = std::env::var("OPENAI_BASE_URL")
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    let default_model =
        std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

    let config = ClientConfig {
        base_url,
        api_key: SecretString::new(api_key.into()),
        default_model,
        ..ClientConfig::default()
    };

    match OpenAIClient::new(config) {
        Ok(client) => Some(client),
        Err(err) => {
            error!(error = %err, "failed to construct OpenAI client from environment");
            None
        }
    }
}

/// Build a client from `GEMINI_API_KEY`/`GEMINI_MODEL`/`GEMINI_BASE_URL`.
/// This is the robust orchestrator's credential slot, layered onto the same
/// OpenAI-compatible-shaped client as [`client_from_env`] since the request/
/// response wire shape (chat completions with tool-calling) is identical
/// against Gemini's OpenAI-compatibility endpoint. Returns `None` when no key
/// is set, which the coordinator treats as `GEMINI_API_KEY_MISSING`.
pub fn gemini_client_from_env() -> Option<OpenAIClient> {
    let api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty())?;
    let base_url = std::env::var("GEMINI_BASE_URL")
        .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta/openai".to_string());
    let default_model =
        std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());

    let config = ClientConfig {
        base_url,
        api_key: SecretString::new(api_key.into()),
        default_model,
        ..ClientConfig::default()
    };

    match OpenAIClient::new(config) {
        Ok(client) => Some(client),
        Err(err) => {
            error!(error = %err, "failed to construct Gemini client from environment");
            None
        }
    }
}

/// Chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// ID of the model to use.
    pub model: String,
    /// List of messages in the conversation.
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 to 2.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter (0.0 to 1.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Deterministic seed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Desired format for the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    /// Function tools the model may call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
}

/// One function tool advertised to the model, OpenAI's `tools` wire shape.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The function itself.
    pub function: FunctionSpec,
}

/// Function name/description/parameters-schema triple.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionSpec {
    /// Function name the model will reference in a tool call.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    /// Build a function tool spec from a name/description/schema triple.
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionSpec {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// A single function call the model asked to make.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque id the caller must echo back in the tool-response message.
    pub id: String,
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The requested call.
    pub function: FunctionCall,
}

/// Function name plus its (string-encoded JSON) arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,
    /// JSON-encoded arguments object.
    pub arguments: String,
}

/// Format of the response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ResponseFormat {
    /// JSON object response.
    #[serde(rename = "json_object")]
    JsonObject,
    /// Plain text response.
    #[serde(rename = "text")]
    Text,
}

/// Message content can be either a plain string or an array of content parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain string message content.
    Text(String),
    /// Array of structured content parts (text/image/audio/etc).
    Parts(Vec<serde_json::Value>),
}

impl MessageContent {
    /// Best-effort text extraction for downstream parsing.
    pub fn to_text_lossy(&self) -> Option<String> {
        match self {
            MessageContent::Text(s) => Some(s.clone()),
            MessageContent::Parts(parts) => {
                let mut out = String::new();
                for part in parts {
                    if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                        if !out.is_empty() {
                            out.push('\n');
                        }
                        out.push_str(text);
                    }
                }
                if out.is_empty() {
                    None
                } else {
                    Some(out)
                }
            }
        }
    }
}

impl From<String> for MessageContent {
    fn from(value: String) -> Self {
        MessageContent::Text(value)
    }
}

impl From<&str> for MessageContent {
    fn from(value: &str) -> Self {
        MessageContent::Text(value.to_string())
    }
}

/// Chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: Role,
    /// Content of the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    /// Function calls the assistant requested (assistant-role messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// The `ToolCall::id` this message answers (tool-role messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// A plain system/user/assistant text turn.
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into().into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// A tool-response turn answering a specific `ToolCall`.
    pub fn tool_response(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into().into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Role of the message author.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
    /// Response to a tool call.
    Tool,
}

/// Chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Unique ID of the response.
    pub id: String,
    /// Model used for generation.
    pub model: String,
    /// List of generated choices.
    pub choices: Vec<Choice>,
    /// Token usage statistics.
    pub usage: Option<Usage>,
}

/// Generated choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Index of the choice.
    pub index: i32,
    /// Generated message.
    pub message: Message,
    /// Reason for finishing (e.g. "stop", "length").
    #[serde(rename = "finish_reason")]
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    #[serde(rename = "prompt_tokens")]
    pub prompt_tokens: i32,
    /// Tokens in the completion.
    #[serde(rename = "completion_tokens")]
    pub completion_tokens: i32,
    /// Total tokens used.
    #[serde(rename = "total_tokens")]
    pub total_tokens: i32,
}

/// API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Detailed error information.
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error message.
    pub message: String,
    /// Error type.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error code.
    pub code: Option<String>,
}

impl OpenAIClient {
    /// Create a new client.
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| anyhow::anyhow!("invalid base URL: {e}"))?;

        info!(
            host = base_url.domain().unwrap_or("unknown"),
            "creating OpenAI client"
        );

        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_seconds));
        if config.disable_system_proxy {
            builder = builder.no_proxy();
        }
        let http = builder.build()?;

        let rate_limiter = config.rate_limit_config.map(rate_limiter::RateLimiter::new);

        Ok(Self {
            base_url,
            api_key: config.api_key,
            http,
            default_model: config.default_model,
            rate_limiter,
            additional_headers: config.headers.unwrap_or_default(),
            max_retries: config.max_retries,
        })
    }

    /// Get the default model configured for this client.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    fn build_headers(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let api_key = self.api_key.expose_secret();
        if !api_key.is_empty() {
            let api_key_val = HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| anyhow::anyhow!("invalid API key characters: {}", e))?;
            headers.insert(header::AUTHORIZATION, api_key_val);
        }

        for (key, value) in &self.additional_headers {
            let header_name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| anyhow::anyhow!("invalid header name '{}': {}", key, e))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| anyhow::anyhow!("invalid header value for '{}': {}", key, e))?;
            headers.insert(header_name, header_value);
        }

        Ok(headers)
    }

    /// Send a chat completion request, retrying on transient failures.
    #[instrument(skip(self, request))]
    pub async fn chat(&self, request: ChatRequest) -> anyhow::Result<ChatResponse> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire(request.max_tokens).await;
        }

        let url = self.base_url.join("chat/completions")?;
        let mut last_error: Option<anyhow::Error> = None;
        let max_attempts = self.max_retries.saturating_add(1).max(1);

        for attempt in 0..max_attempts {
            let headers = self.build_headers()?;

            debug!(attempt = attempt + 1, max_attempts, %url, "sending chat request");

            let response = self
                .http
                .post(url.clone())
                .headers(headers)
                .json(&request)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let chat_response: ChatResponse = resp.json().await?;
                        info!(
                            tokens = chat_response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0),
                            "chat completion successful"
                        );
                        return Ok(chat_response);
                    }

                    let error_text = resp.text().await.unwrap_or_default();
                    error!(%status, body = %error_text, "chat API returned an error");

                    if attempt + 1 < max_attempts && is_retryable_status(status) {
                        let backoff = retry_backoff(attempt);
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    last_error = Some(match serde_json::from_str::<ApiError>(&error_text) {
                        Ok(api_error) => anyhow::anyhow!(
                            "API error: {} ({})",
                            sanitize_error_message(&api_error.error.message),
                            api_error.error.error_type
                        ),
                        Err(_) => anyhow::anyhow!(
                            "HTTP error {}: {}",
                            status,
                            status.canonical_reason().unwrap_or("unknown error")
                        ),
                    });
                }
                Err(err) => {
                    if attempt + 1 < max_attempts && is_retryable_error(&err) {
                        let backoff = retry_backoff(attempt);
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("request failed")))
    }

    /// Send a single user-turn prompt and return the first choice's text.
    pub async fn simple_chat(&self, user: &str) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: self.default_model.clone(),
            messages: vec![Message::text(Role::User, user)],
            temperature: Some(0.2),
            top_p: None,
            max_tokens: Some(4000),
            seed: None,
            response_format: None,
            tools: None,
        };

        let response = self.chat(request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content.and_then(|c| c.to_text_lossy()))
            .ok_or_else(|| anyhow::anyhow!("no response content"))
    }
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn retry_backoff(attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt.min(6));
    let ms = 200u64.saturating_mul(exp).min(2_000);
    Duration::from_millis(ms)
}

/// Sanitize error messages to prevent information disclosure.
fn sanitize_error_message(message: &str) -> String {
    let patterns = [
        (r"(?i)api[_-]?key", "api_key"),
        (r"(?i)secret", "secret"),
        (r"(?i)token", "token"),
        (r"sk-[a-zA-Z0-9]{20,}", "sk-***"),
        (r"[a-zA-Z0-9_-]{32,}", "***REDACTED***"),
    ];

    let mut sanitized = message.to_string();
    for (pattern, replacement) in patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            sanitized = re.replace_all(&sanitized, replacement).to_string();
        }
    }

    if sanitized.len() > 256 {
        format!("{}... [truncated]", &sanitized[..256])
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.default_model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn client_builds_with_local_base_url() {
        let config = ClientConfig {
            base_url: "http://localhost:1234".to_string(),
            api_key: SecretString::new("test".into()),
            default_model: "test-model".to_string(),
            headers: None,
            disable_system_proxy: true,
            timeout_seconds: 5,
            max_retries: 0,
            rate_limit_config: None,
        };
        assert!(OpenAIClient::new(config).is_ok());
    }

    #[test]
    fn client_from_env_returns_none_without_api_key() {
        std::env::remove_var("OPENAI_API_KEY");
        assert!(client_from_env().is_none());
    }

    #[test]
    fn gemini_client_from_env_returns_none_without_api_key() {
        std::env::remove_var("GEMINI_API_KEY");
        assert!(gemini_client_from_env().is_none());
    }
}
