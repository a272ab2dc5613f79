//! HTTP backends behind the [`Provider`] capability.
//!
//! Each wire protocol is a variant of [`LlmBackend`] over the same
//! [`Endpoint`]. Every backend returns the raw completion text with any
//! `<think>` reasoning block removed; interpreting that text is the
//! caller's job.

use std::future::Future;

use serde_json::{Value, json};

use crate::config::{BackendType, LlmBackendConfig};
use crate::error::ProviderError;
use crate::extract::strip_think_blocks;
use crate::provider::{GenerateOptions, Prompt, Provider};

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Where and as whom a backend talks.
#[derive(Clone)]
pub struct Endpoint {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    context_tokens: u32,
}

impl Endpoint {
    /// Build an endpoint from backend configuration.
    pub fn new(config: &LlmBackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.api_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            context_tokens: config.context_tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

// The API key stays out of logs.
impl core::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Endpoint")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("context_tokens", &self.context_tokens)
            .finish_non_exhaustive()
    }
}

/// A concrete LLM backend, one variant per wire protocol.
#[derive(Debug, Clone)]
pub enum LlmBackend {
    /// `OpenAI`-compatible `/chat/completions`.
    OpenAi(Endpoint),
    /// Anthropic `/messages`; the system prompt is a top-level field.
    Anthropic(Endpoint),
    /// Native Ollama `/api/chat`, which accepts a per-request `num_ctx`.
    Ollama(Endpoint),
}

impl LlmBackend {
    const fn label(&self) -> &'static str {
        match self {
            Self::OpenAi(_) => "openai-compatible",
            Self::Anthropic(_) => "anthropic",
            Self::Ollama(_) => "ollama",
        }
    }

    /// Request body for this protocol.
    fn body(&self, prompt: &Prompt, options: &GenerateOptions) -> Value {
        match self {
            Self::OpenAi(endpoint) => {
                let mut body = json!({
                    "model": endpoint.model,
                    "messages": chat_messages(prompt),
                    "temperature": options.temperature,
                    "max_tokens": options.max_tokens,
                });
                if !options.stop_sequences.is_empty() {
                    body["stop"] = json!(options.stop_sequences);
                }
                if options.json {
                    body["response_format"] = json!({ "type": "json_object" });
                }
                body
            }
            Self::Anthropic(endpoint) => {
                let mut body = json!({
                    "model": endpoint.model,
                    "system": prompt.system,
                    "messages": [{ "role": "user", "content": prompt.user }],
                    // The Messages API caps temperature at 1.0.
                    "temperature": options.temperature.min(1.0),
                    "max_tokens": options.max_tokens,
                });
                if !options.stop_sequences.is_empty() {
                    body["stop_sequences"] = json!(options.stop_sequences);
                }
                body
            }
            Self::Ollama(endpoint) => {
                let mut body = json!({
                    "model": endpoint.model,
                    "messages": chat_messages(prompt),
                    "stream": false,
                    "options": {
                        "num_ctx": endpoint.context_tokens,
                        "num_predict": options.max_tokens,
                        "temperature": options.temperature,
                        "stop": options.stop_sequences,
                    },
                });
                if options.json {
                    body["format"] = json!("json");
                }
                body
            }
        }
    }

    /// Authenticated POST request for this protocol.
    fn request(&self) -> reqwest::RequestBuilder {
        match self {
            Self::OpenAi(endpoint) => {
                let request = endpoint.client.post(endpoint.url("/chat/completions"));
                if endpoint.api_key.is_empty() {
                    request
                } else {
                    request.bearer_auth(&endpoint.api_key)
                }
            }
            Self::Anthropic(endpoint) => endpoint
                .client
                .post(endpoint.url("/messages"))
                .header("x-api-key", &endpoint.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            Self::Ollama(endpoint) => endpoint.client.post(endpoint.url("/api/chat")),
        }
    }

    /// Authenticated GET of the model listing, used to confirm reachability.
    fn listing_request(&self) -> reqwest::RequestBuilder {
        match self {
            Self::OpenAi(endpoint) => {
                let request = endpoint.client.get(endpoint.url("/models"));
                if endpoint.api_key.is_empty() {
                    request
                } else {
                    request.bearer_auth(&endpoint.api_key)
                }
            }
            Self::Anthropic(endpoint) => endpoint
                .client
                .get(endpoint.url("/models"))
                .header("x-api-key", &endpoint.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            Self::Ollama(endpoint) => endpoint.client.get(endpoint.url("/api/tags")),
        }
    }

    /// JSON pointer to the completion text in a response.
    const fn content_pointer(&self) -> &'static str {
        match self {
            Self::OpenAi(_) => "/choices/0/message/content",
            Self::Anthropic(_) => "/content/0/text",
            Self::Ollama(_) => "/message/content",
        }
    }

    /// Pull the completion text out of a decoded response.
    fn content_of(&self, response: &Value) -> Result<String, ProviderError> {
        let pointer = self.content_pointer();
        response
            .pointer(pointer)
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| {
                ProviderError::MalformedResponse(format!(
                    "{} response has no text at {pointer}",
                    self.label()
                ))
            })
    }

    async fn complete(&self, prompt: &Prompt, options: &GenerateOptions) -> Result<String, ProviderError> {
        let backend = self.label();
        let response = self
            .request()
            .json(&self.body(prompt, options))
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(backend, &e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(backend, status, &detail));
        }

        let decoded: Value = response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!("{backend} returned undecodable JSON: {e}"))
        })?;
        self.content_of(&decoded)
    }
}

impl Provider for LlmBackend {
    fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> impl Future<Output = Result<String, ProviderError>> + Send {
        async move {
            let raw = self.complete(prompt, options).await?;
            Ok(strip_think_blocks(&raw))
        }
    }

    fn name(&self) -> &str {
        self.label()
    }

    fn health_check(&self) -> impl Future<Output = Result<(), ProviderError>> + Send {
        async move {
            let backend = self.label();
            let response = self
                .listing_request()
                .send()
                .await
                .map_err(|e| ProviderError::from_transport(backend, &e))?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                let detail = response.text().await.unwrap_or_default();
                Err(ProviderError::from_status(backend, status, &detail))
            }
        }
    }
}

/// System + user messages in chat-completions shape.
fn chat_messages(prompt: &Prompt) -> Value {
    json!([
        { "role": "system", "content": prompt.system },
        { "role": "user", "content": prompt.user },
    ])
}

/// Build the backend selected by `config.backend_type`.
pub fn create_backend(config: &LlmBackendConfig) -> LlmBackend {
    let endpoint = Endpoint::new(config);
    match config.backend_type {
        BackendType::OpenAi => LlmBackend::OpenAi(endpoint),
        BackendType::Anthropic => LlmBackend::Anthropic(endpoint),
        BackendType::Ollama => LlmBackend::Ollama(endpoint),
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn backend(backend_type: BackendType) -> LlmBackend {
        create_backend(&LlmBackendConfig {
            backend_type,
            api_url: "http://localhost:11434/".to_owned(),
            api_key: String::new(),
            model: "quill-7b".to_owned(),
            context_tokens: 8192,
        })
    }

    fn prompt() -> Prompt {
        Prompt::new("You are a novelist.", "Write the storm.")
    }

    #[test]
    fn reads_chat_completion_text() {
        let response = json!({ "choices": [{ "message": { "content": "The door sealed behind her." } }] });
        let text = backend(BackendType::OpenAi).content_of(&response);
        assert_eq!(text.ok().as_deref(), Some("The door sealed behind her."));
    }

    #[test]
    fn missing_text_is_malformed() {
        let openai = backend(BackendType::OpenAi).content_of(&json!({ "error": "rate_limit" }));
        assert!(matches!(openai, Err(ProviderError::MalformedResponse(_))));
        let anthropic = backend(BackendType::Anthropic).content_of(&json!({ "content": [] }));
        assert!(anthropic.is_err());
        let ollama = backend(BackendType::Ollama).content_of(&json!({ "done": true }));
        assert!(ollama.is_err());
    }

    #[test]
    fn reads_messages_and_ollama_text() {
        let anthropic = json!({ "content": [{ "type": "text", "text": "{\"score\": 80}" }] });
        assert!(
            backend(BackendType::Anthropic)
                .content_of(&anthropic)
                .unwrap_or_default()
                .contains("80")
        );
        let ollama = json!({ "message": { "role": "assistant", "content": "Rain." }, "done": true });
        assert_eq!(
            backend(BackendType::Ollama).content_of(&ollama).ok().as_deref(),
            Some("Rain.")
        );
    }

    #[test]
    fn bodies_follow_each_protocol() {
        let options = GenerateOptions {
            temperature: 1.1,
            json: true,
            ..GenerateOptions::default()
        };

        let anthropic = backend(BackendType::Anthropic).body(&prompt(), &options);
        assert_eq!(anthropic["system"], "You are a novelist.");
        assert_eq!(anthropic["temperature"], json!(1.0_f32));
        assert!(anthropic.get("response_format").is_none());

        let openai = backend(BackendType::OpenAi).body(&prompt(), &options);
        assert_eq!(openai["messages"][1]["content"], "Write the storm.");
        assert_eq!(openai["response_format"]["type"], "json_object");

        let ollama = backend(BackendType::Ollama).body(&prompt(), &options);
        assert_eq!(ollama["options"]["num_ctx"], 8192);
        assert_eq!(ollama["format"], "json");
        assert_eq!(ollama["stream"], false);
    }

    #[test]
    fn health_check_lists_models_per_protocol() {
        let ollama = backend(BackendType::Ollama).listing_request().build().unwrap();
        assert_eq!(ollama.method(), reqwest::Method::GET);
        assert_eq!(ollama.url().as_str(), "http://localhost:11434/api/tags");

        let openai = backend(BackendType::OpenAi).listing_request().build().unwrap();
        assert_eq!(openai.url().path(), "/models");
        assert!(openai.headers().get("authorization").is_none());

        let anthropic = backend(BackendType::Anthropic).listing_request().build().unwrap();
        assert_eq!(anthropic.url().path(), "/models");
        assert_eq!(anthropic.headers()["anthropic-version"], ANTHROPIC_VERSION);
    }

    #[test]
    fn create_backend_picks_protocol() {
        assert_eq!(backend(BackendType::OpenAi).name(), "openai-compatible");
        assert_eq!(backend(BackendType::Anthropic).name(), "anthropic");
        let ollama = backend(BackendType::Ollama);
        assert_eq!(ollama.name(), "ollama");
        if let LlmBackend::Ollama(endpoint) = ollama {
            assert_eq!(endpoint.url("/api/chat"), "http://localhost:11434/api/chat");
        }
    }
}
