//! Provider gateway for the Taleforge pipeline.
//!
//! Draft and critic stages only ever call
//! [`Provider::generate`]. This crate supplies the HTTP backends behind
//! that call, the retry/timeout/concurrency wrapper around them, and the
//! helpers that recover structured output from model text.
//!
//! # Architecture
//!
//! ```text
//! caller --> RetryingGateway (semaphore, timeout, backoff) --> LlmBackend --> HTTP
//! ```
//!
//! # Modules
//!
//! - [`provider`] -- The [`Provider`] capability, prompts, options
//! - [`llm`] -- `OpenAI`-compatible, Anthropic, and Ollama backends
//! - [`retry`] -- [`RetryingGateway`]
//! - [`context`] -- Context-window trimming
//! - [`extract`] -- JSON recovery from model output
//! - [`config`] -- Environment configuration
//! - [`error`] -- [`ProviderError`]

pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod llm;
pub mod provider;
pub mod retry;

pub use config::{BackendType, GatewayConfig, LlmBackendConfig, RetryPolicy};
pub use error::{GatewayError, ProviderError};
pub use extract::{extract_json_object, read_score, read_string, strip_think_blocks};
pub use llm::{LlmBackend, create_backend};
pub use provider::{FnProvider, GenerateOptions, Prompt, Provider};
pub use retry::RetryingGateway;
