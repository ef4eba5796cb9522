//! Ollama provider implementation
//!
//! Talks to a local Ollama server over its native chat API.
//!
//! Default endpoint: http://localhost:11434/api/chat

use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Ollama provider - connects to a local Ollama server
pub struct OllamaProvider {
    client: Client,
    config: ProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> crate::Result<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(std::time::Duration::from_secs(secs));
        }
        let client = builder.build().map_err(|e| {
            Error::config_invalid("failed to create HTTP client")
                .with_operation("ollama::new")
                .set_source(e)
        })?;

        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Names of the models installed on the server
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let mut req = self.client.get(format!("{}/api/tags", self.base_url()));
        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Fail with `ModelNotFound` unless the default model is installed
    pub async fn ensure_model(&self) -> Result<(), ProviderError> {
        let installed = self.list_models().await?;
        let model = self.default_model();
        if installed.iter().any(|name| model_matches(name, model)) {
            tracing::debug!(model, "model is installed");
            Ok(())
        } else {
            Err(ProviderError::ModelNotFound(model.to_string()))
        }
    }
}

impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let model = self.default_model();

        let api_request = OllamaChatRequest {
            model: model.to_string(),
            messages: request.messages,
            stream: false,
        };

        let mut req = self.client
            .post(format!("{}/api/chat", self.base_url()))
            .json(&api_request);

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        tracing::debug!(model, url = self.base_url(), "sending chat request");

        let response = req.send().await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &text, model));
        }

        let api_response: OllamaChatResponse = response.json().await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        if let Some(error) = api_response.error {
            return Err(classify_failure(status, &error, model));
        }

        let message = api_response.message
            .ok_or_else(|| ProviderError::Other("No message in response".into()))?;

        let prompt_tokens = api_response.prompt_eval_count.unwrap_or(0);
        let completion_tokens = api_response.eval_count.unwrap_or(0);

        Ok(CompletionResponse {
            model: api_response.model.unwrap_or_else(|| model.to_string()),
            content: message.content,
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        })
    }
}

/// Map a failed reply onto a provider error.
///
/// Ollama answers a chat for an absent model with an error body such as
/// `model 'llama2' not found, try pulling it first`. Only that message makes
/// the failure `ModelNotFound`; a bare 404 (wrong path, proxy) stays `Api`.
fn classify_failure(status: u16, body: &str, model: &str) -> ProviderError {
    let message = serde_json::from_str::<OllamaErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.to_string());

    if names_missing_model(&message, model) {
        return ProviderError::ModelNotFound(model.to_string());
    }
    if status == 429 {
        return ProviderError::RateLimited;
    }
    ProviderError::Api { status, message }
}

/// True iff `message` reads `model '<name>' not found` (or with double
/// quotes) and `<name>` is the requested model.
fn names_missing_model(message: &str, model: &str) -> bool {
    ['\'', '"'].into_iter().any(|quote| {
        let opening = format!("model {quote}");
        message.match_indices(&opening).any(|(at, _)| {
            let rest = &message[at + opening.len()..];
            let Some(close) = rest.find(quote) else {
                return false;
            };
            rest[close + 1..].starts_with(" not found") && model_matches(&rest[..close], model)
        })
    })
}

/// `llama2` matches an installed `llama2:latest`; tagged names must match exactly.
fn model_matches(installed: &str, wanted: &str) -> bool {
    if installed == wanted {
        return true;
    }
    !wanted.contains(':') && installed.split(':').next() == Some(wanted)
}

// ============================================================================
// Ollama API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    model: Option<String>,
    message: Option<ChatMessage>,
    error: Option<String>,
    prompt_eval_count: Option<usize>,
    eval_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct OllamaErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagsModel>,
}

#[derive(Debug, Deserialize)]
struct TagsModel {
    name: String,
}
