//! Retry, timeout, and concurrency wrapper around any [`Provider`].
//!
//! Each attempt runs under `tokio::time::timeout` so a stuck call fails on
//! its own without touching sibling calls in the same fan-out. Transient
//! failures back off exponentially with jitter; malformed and rejected
//! responses are returned at once so the caller can repair them.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_retry2::strategy::{ExponentialBackoff, jitter};
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::context::fit_prompt;
use crate::error::ProviderError;
use crate::provider::{GenerateOptions, HEALTH_CHECK_TIMEOUT, Prompt, Provider};

/// A provider with bounded retries, per-call timeouts, and a shared
/// in-flight call limit.
pub struct RetryingGateway<P> {
    inner: P,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
    context_tokens: Option<u32>,
}

impl<P: Provider> RetryingGateway<P> {
    /// Wrap `inner` with its own concurrency limit.
    pub fn new(inner: P, policy: RetryPolicy, max_concurrent_calls: usize) -> Self {
        Self::with_permits(inner, policy, Arc::new(Semaphore::new(max_concurrent_calls)))
    }

    /// Wrap `inner`, sharing a concurrency limit with other gateways.
    pub const fn with_permits(inner: P, policy: RetryPolicy, permits: Arc<Semaphore>) -> Self {
        Self {
            inner,
            policy,
            permits,
            context_tokens: None,
        }
    }

    /// Trim prompts to fit a context window of `tokens`.
    #[must_use]
    pub const fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_tokens = Some(tokens);
        self
    }

    /// Backoff schedule for one call.
    fn strategy(&self) -> impl Iterator<Item = std::time::Duration> {
        let unit_ms = u64::try_from(self.policy.unit.as_millis()).unwrap_or(u64::MAX);
        ExponentialBackoff::from_millis(self.policy.base.max(1))
            .factor(unit_ms.max(1))
            .max_delay(self.policy.max_delay)
            .map(jitter)
            .take(self.policy.max_retries)
    }
}

impl<P: Provider> Provider for RetryingGateway<P> {
    fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> impl Future<Output = Result<String, ProviderError>> + Send {
        let fitted = match self.context_tokens {
            Some(tokens) => fit_prompt(prompt, tokens, options.max_tokens),
            None => prompt.clone(),
        };
        let strategy = self.strategy();
        let inner = &self.inner;
        let permits = &self.permits;

        async move {
            let fitted = &fitted;
            Retry::spawn(strategy, move || async move {
                let _permit = permits.acquire().await.map_err(|e| {
                    RetryError::Permanent(ProviderError::Unavailable(format!(
                        "gateway shut down: {e}"
                    )))
                })?;

                match tokio::time::timeout(options.timeout, inner.generate(fitted, options)).await
                {
                    Ok(Ok(text)) => {
                        debug!(backend = inner.name(), chars = text.len(), "provider call succeeded");
                        Ok(text)
                    }
                    Ok(Err(e)) if e.is_transient() => {
                        warn!(backend = inner.name(), error = %e, "transient provider error, will retry");
                        Err(RetryError::Transient {
                            err: e,
                            retry_after: None,
                        })
                    }
                    Ok(Err(e)) => {
                        warn!(backend = inner.name(), error = %e, "permanent provider error");
                        Err(RetryError::Permanent(e))
                    }
                    Err(_elapsed) => {
                        warn!(
                            backend = inner.name(),
                            timeout_ms = options.timeout.as_millis(),
                            "provider call timed out"
                        );
                        Err(RetryError::Transient {
                            err: ProviderError::Timeout(options.timeout),
                            retry_after: None,
                        })
                    }
                }
            })
            .await
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    /// One attempt under [`HEALTH_CHECK_TIMEOUT`], never retried.
    fn health_check(&self) -> impl Future<Output = Result<(), ProviderError>> + Send {
        let inner = &self.inner;
        async move {
            match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, inner.health_check()).await {
                Ok(result) => result,
                Err(_elapsed) => Err(ProviderError::Timeout(HEALTH_CHECK_TIMEOUT)),
            }
        }
    }
}
