//! The provider capability consumed by the draft and critic stages.
//!
//! Callers never see a concrete backend: they hold something that
//! implements [`Provider`] and call `generate`. Implementations share no
//! mutable state between calls, so any number of calls may be in flight at
//! once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProviderError;

/// Default per-call deadline.
const DEFAULT_TIMEOUT_SECS: u64 = 180;

/// Default completion token cap.
const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Deadline for a startup health check.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(15);

/// Completion tokens requested by the default health check.
const HEALTH_CHECK_TOKENS: u32 = 1;

/// A prompt split into system and user messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompt {
    /// System message establishing the role.
    pub system: String,
    /// User message carrying the task.
    pub user: String,
}

impl Prompt {
    /// Build a prompt from its two messages.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Per-call generation options.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Sequences that end generation early.
    pub stop_sequences: Vec<String>,
    /// Deadline for this call alone.
    pub timeout: Duration,
    /// Ask the backend to constrain output to a JSON object.
    pub json: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: DEFAULT_MAX_TOKENS,
            stop_sequences: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            json: false,
        }
    }
}

impl GenerateOptions {
    /// Set the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the completion token cap.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the per-call deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Request JSON-constrained output.
    #[must_use]
    pub const fn json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Set the stop sequences.
    #[must_use]
    pub fn with_stop_sequences(mut self, stops: Vec<String>) -> Self {
        self.stop_sequences = stops;
        self
    }
}

/// Uniform async interface to a language-model backend.
pub trait Provider: Send + Sync {
    /// Generate a completion for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] describing why no text was produced.
    fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> impl Future<Output = Result<String, ProviderError>> + Send;

    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Confirm the backend answers before any real work is sent.
    ///
    /// The default asks for a one-token completion.
    ///
    /// # Errors
    ///
    /// Returns the [`ProviderError`] of the failed call.
    fn health_check(&self) -> impl Future<Output = Result<(), ProviderError>> + Send {
        async move {
            let options = GenerateOptions::default()
                .with_temperature(0.0)
                .with_max_tokens(HEALTH_CHECK_TOKENS)
                .with_timeout(HEALTH_CHECK_TIMEOUT);
            self.generate(&Prompt::new("Reply with OK.", "OK"), &options)
                .await
                .map(|_| ())
        }
    }
}

impl<P: Provider> Provider for Arc<P> {
    fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> impl Future<Output = Result<String, ProviderError>> + Send {
        (**self).generate(prompt, options)
    }

    fn health_check(&self) -> impl Future<Output = Result<(), ProviderError>> + Send {
        (**self).health_check()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// An in-process provider backed by a closure.
///
/// Used for dry runs and tests where no network backend is wanted.
pub struct FnProvider<F> {
    name: String,
    respond: F,
}

impl<F> FnProvider<F>
where
    F: Fn(&Prompt, &GenerateOptions) -> Result<String, ProviderError> + Send + Sync,
{
    /// Wrap a closure as a provider.
    pub fn new(name: impl Into<String>, respond: F) -> Self {
        Self {
            name: name.into(),
            respond,
        }
    }
}

impl<F> Provider for FnProvider<F>
where
    F: Fn(&Prompt, &GenerateOptions) -> Result<String, ProviderError> + Send + Sync,
{
    fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> impl Future<Output = Result<String, ProviderError>> + Send {
        std::future::ready((self.respond)(prompt, options))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
