//! Gateway configuration loaded from environment variables.
//!
//! Two backends are configured: the writer (drafts, revisions, memory
//! extraction) and the critic (tribunal verdicts). The critic falls back
//! to the writer's settings when its variables are absent.

use std::time::Duration;

use crate::error::GatewayError;

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Backend used for drafting and revision.
    pub writer: LlmBackendConfig,
    /// Backend used for critic verdicts.
    pub critic: LlmBackendConfig,
    /// Retry and concurrency settings shared by both backends.
    pub retry: RetryPolicy,
    /// Maximum number of provider calls in flight at once.
    pub max_concurrent_calls: usize,
}

/// Configuration for a single LLM backend.
#[derive(Debug, Clone)]
pub struct LlmBackendConfig {
    /// The backend wire protocol.
    pub backend_type: BackendType,
    /// Base API URL (e.g. `http://localhost:11434`).
    pub api_url: String,
    /// API key (empty for local backends).
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Context window in tokens. Prompts are trimmed to fit.
    pub context_tokens: u32,
}

/// Supported LLM backend protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// `OpenAI`-compatible chat completions (`OpenAI`, `DeepSeek`, vLLM, LM Studio).
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
    /// Native Ollama `/api/chat`.
    Ollama,
}

impl BackendType {
    /// Parse a backend name as written in the environment.
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        match raw.trim().to_lowercase().as_str() {
            "openai" | "deepseek" | "vllm" | "lmstudio" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(GatewayError::Config(format!("unknown backend type: {other}"))),
        }
    }
}

/// Exponential backoff settings for transient provider failures.
///
/// Delay before retry `n` (1-based) is `base^n * unit`, capped at
/// `max_delay`, with jitter applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failure.
    pub max_retries: usize,
    /// Exponential base.
    pub base: u64,
    /// Multiplier applied to each delay.
    pub unit: Duration,
    /// Upper bound on a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base: 3,
            unit: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    ///
    /// Writer variables (required unless noted):
    /// - `TALEFORGE_BACKEND` -- `ollama`, `openai`, or `anthropic` (default `ollama`)
    /// - `TALEFORGE_API_URL` -- base URL (default `http://localhost:11434`)
    /// - `TALEFORGE_API_KEY` -- API key (default empty)
    /// - `TALEFORGE_WRITER_MODEL` -- model name
    ///
    /// Optional variables:
    /// - `TALEFORGE_CRITIC_BACKEND`, `TALEFORGE_CRITIC_API_URL`,
    ///   `TALEFORGE_CRITIC_API_KEY`, `TALEFORGE_CRITIC_MODEL` -- critic overrides
    /// - `TALEFORGE_CONTEXT_TOKENS` -- context window (default 16384)
    /// - `TALEFORGE_MAX_RETRIES` -- transient retries (default 5)
    /// - `TALEFORGE_RETRY_BASE` -- backoff base (default 3)
    /// - `TALEFORGE_RETRY_UNIT_MS` -- backoff unit in ms (default 1000)
    /// - `TALEFORGE_MAX_CONCURRENT_CALLS` -- in-flight call cap (default 6)
    pub fn from_env() -> Result<Self, GatewayError> {
        let context_tokens: u32 = parse_env("TALEFORGE_CONTEXT_TOKENS", "16384")?;

        let writer = LlmBackendConfig {
            backend_type: BackendType::parse(&env_or("TALEFORGE_BACKEND", "ollama"))?,
            api_url: env_or("TALEFORGE_API_URL", "http://localhost:11434"),
            api_key: env_or("TALEFORGE_API_KEY", ""),
            model: env_var("TALEFORGE_WRITER_MODEL")?,
            context_tokens,
        };

        let critic = LlmBackendConfig {
            backend_type: match std::env::var("TALEFORGE_CRITIC_BACKEND") {
                Ok(raw) => BackendType::parse(&raw)?,
                Err(_) => writer.backend_type,
            },
            api_url: env_or("TALEFORGE_CRITIC_API_URL", &writer.api_url),
            api_key: env_or("TALEFORGE_CRITIC_API_KEY", &writer.api_key),
            model: env_or("TALEFORGE_CRITIC_MODEL", &writer.model),
            context_tokens,
        };

        let retry_unit_ms: u64 = parse_env("TALEFORGE_RETRY_UNIT_MS", "1000")?;
        let retry = RetryPolicy {
            max_retries: parse_env("TALEFORGE_MAX_RETRIES", "5")?,
            base: parse_env("TALEFORGE_RETRY_BASE", "3")?,
            unit: Duration::from_millis(retry_unit_ms),
            ..RetryPolicy::default()
        };

        let max_concurrent_calls: usize = parse_env("TALEFORGE_MAX_CONCURRENT_CALLS", "6")?;
        if max_concurrent_calls == 0 {
            return Err(GatewayError::Config(
                "TALEFORGE_MAX_CONCURRENT_CALLS must be at least 1".to_owned(),
            ));
        }

        Ok(Self {
            writer,
            critic,
            retry,
            max_concurrent_calls,
        })
    }
}

/// Read a required environment variable.
fn env_var(name: &str) -> Result<String, GatewayError> {
    std::env::var(name)
        .map_err(|e| GatewayError::Config(format!("missing required env var {name}: {e}")))
}

/// Read an environment variable with a fallback.
fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_owned())
}

/// Read and parse an environment variable with a fallback.
fn parse_env<T>(name: &str, default: &str) -> Result<T, GatewayError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_or(name, default)
        .parse()
        .map_err(|e| GatewayError::Config(format!("invalid {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_type_parsing() {
        assert!(matches!(BackendType::parse("Ollama"), Ok(BackendType::Ollama)));
        assert!(matches!(BackendType::parse("deepseek"), Ok(BackendType::OpenAi)));
        assert!(matches!(BackendType::parse("claude"), Ok(BackendType::Anthropic)));
        assert!(BackendType::parse("gopher").is_err());
    }

    #[test]
    fn retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base, 3);
        assert_eq!(policy.unit, Duration::from_secs(1));
    }

    #[test]
    fn parse_env_falls_back_to_default() {
        let value: Result<u32, _> = parse_env("TALEFORGE_TEST_UNSET_VARIABLE", "42");
        assert_eq!(value.ok(), Some(42));
        let bad: Result<u32, _> = parse_env("TALEFORGE_TEST_UNSET_VARIABLE", "many");
        assert!(bad.is_err());
    }
}
