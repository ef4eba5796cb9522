//! # LLM Provider Interface
//!
//! A trait-based abstraction for talking to the text-generation service.
//!
//! ## Design
//! - `LlmProvider` trait defines the core interface
//! - `OllamaProvider` implements it against a local Ollama chat endpoint
//! - `ProviderError` keeps the one fatal case (`ModelNotFound`) distinguishable
//!   from every recoverable one
//! - Usage tracking

pub mod ollama;

pub use ollama::OllamaProvider;

use crate::error::{self, Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Core Types
// ============================================================================

/// A chat message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Base64-encoded images attached to the message (multimodal models)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, image_b64: impl Into<String>) -> Self {
        self.images.push(image_b64.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Request parameters for a completion
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }
}

/// Response from a completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub model: String,
    pub content: String,
    pub usage: Usage,
}

/// Token usage information
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Error type for provider operations
#[derive(Debug)]
pub enum ProviderError {
    /// Network/connection error
    Network(String),
    /// API returned an error
    Api { status: u16, message: String },
    /// Failed to parse response
    Parse(String),
    /// Rate limited
    RateLimited,
    /// The service does not have the requested model
    ModelNotFound(String),
    /// Other error
    Other(String),
}

impl ProviderError {
    pub fn is_model_not_found(&self) -> bool {
        matches!(self, Self::ModelNotFound(_))
    }

    /// Convert into the crate error, tagging the operation that failed.
    pub fn into_error(self, operation: &'static str) -> Error {
        let err = match &self {
            Self::ModelNotFound(model) => error::model_not_found(model.clone()),
            Self::Network(e) => Error::network_failed(e.clone()),
            Self::Api { status, message } => error::inference_failed(message.clone())
                .with_context("status", status.to_string()),
            Self::Parse(e) => error::parse_error(e.clone()),
            Self::RateLimited => Error::new(ErrorKind::RateLimited, "rate limited"),
            Self::Other(e) => error::inference_failed(e.clone()),
        };
        err.with_operation(operation).set_source(self)
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(e) => write!(f, "Network error: {}", e),
            Self::Api { status, message } => write!(f, "API error ({}): {}", status, message),
            Self::Parse(e) => write!(f, "Parse error: {}", e),
            Self::RateLimited => write!(f, "Rate limited"),
            Self::ModelNotFound(m) => write!(f, "model '{}' not found", m),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

/// The main LLM provider trait
#[allow(async_fn_in_trait)]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "ollama")
    fn name(&self) -> &str;

    /// Get the default model
    fn default_model(&self) -> &str;

    /// Send a completion request and get a full response
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;
}

// ============================================================================
// Provider Configuration
// ============================================================================

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama2";

/// Configuration for creating providers
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub default_model: String,
    pub headers: HashMap<String, String>,
    /// No timeout when unset: a hung service hangs the caller
    pub timeout_secs: Option<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::ollama()
    }
}

impl ProviderConfig {
    /// Local Ollama on its default port
    pub fn ollama() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_HOST.into(),
            default_model: DEFAULT_MODEL.into(),
            headers: HashMap::new(),
            timeout_secs: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Sent with every request (auth proxies in front of Ollama)
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Usage Tracking
// ============================================================================

/// Tracks token usage across multiple calls
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    pub total_calls: usize,
    pub total_prompt_tokens: usize,
    pub total_completion_tokens: usize,
    pub by_model: HashMap<String, Usage>,
}

impl UsageTracker {
    pub fn track(&mut self, model: &str, usage: &Usage) {
        self.total_calls += 1;
        self.total_prompt_tokens += usage.prompt_tokens;
        self.total_completion_tokens += usage.completion_tokens;

        let entry = self.by_model.entry(model.to_string()).or_default();
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
        entry.total_tokens += usage.total_tokens;
    }

    pub fn total_tokens(&self) -> usize {
        self.total_prompt_tokens + self.total_completion_tokens
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        let user = ChatMessage::user("Hello").with_image("aGVsbG8=");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.content, "Hello");
        assert_eq!(user.images, vec!["aGVsbG8=".to_string()]);
    }

    #[test]
    fn test_images_skipped_when_empty() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "user", "content": "hi" }));
    }

    #[test]
    fn test_provider_config() {
        let config = ProviderConfig::default();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.default_model, "llama2");
        assert_eq!(config.timeout_secs, None);

        let config = ProviderConfig::ollama()
            .with_base_url("http://gpu-box:11434")
            .with_model("llava")
            .with_timeout(30)
            .with_header("x-trace", "1");
        assert_eq!(config.base_url, "http://gpu-box:11434");
        assert_eq!(config.default_model, "llava");
        assert_eq!(config.timeout_secs, Some(30));
        assert!(config.headers.contains_key("x-trace"));
    }

    #[test]
    fn test_provider_error_into_error() {
        let err = ProviderError::ModelNotFound("llama2".into()).into_error("generator::generate_code");
        assert_eq!(err.kind(), ErrorKind::ModelNotFound);
        assert!(err.is_fatal());
        assert_eq!(err.operation(), "generator::generate_code");
        assert!(err.source_ref().is_some());

        let err = ProviderError::Network("connection refused".into()).into_error("verifier::verify");
        assert_eq!(err.kind(), ErrorKind::NetworkFailed);
        assert!(!err.is_fatal());

        let err = ProviderError::Api { status: 500, message: "boom".into() }.into_error("x");
        assert_eq!(err.kind(), ErrorKind::InferenceFailed);
        assert!(err.context().contains(&("status", "500".to_string())));
    }

    #[test]
    fn test_usage_tracker() {
        let mut tracker = UsageTracker::default();

        tracker.track("llama2", &Usage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
        });

        tracker.track("llama2", &Usage {
            prompt_tokens: 200,
            completion_tokens: 100,
            total_tokens: 300,
        });

        assert_eq!(tracker.total_calls, 2);
        assert_eq!(tracker.total_prompt_tokens, 300);
        assert_eq!(tracker.total_completion_tokens, 150);
        assert_eq!(tracker.total_tokens(), 450);
        assert_eq!(tracker.by_model["llama2"].total_tokens, 450);
    }
}
