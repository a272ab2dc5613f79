//! Parallel draft generation.
//!
//! One writer prompt, N concurrent calls, each on its own rung of the
//! temperature ladder. A failed producer never cancels its siblings: every
//! call runs to completion (or to its own timeout) and the survivors are
//! returned in producer order.

use std::time::Duration;

use futures::future::join_all;
use taleforge_gateway::{GenerateOptions, Prompt, Provider, ProviderError};
use taleforge_types::{Draft, DraftId, GenerationParams};
use tracing::{debug, warn};

use crate::config::DraftConfig;
use crate::error::PipelineError;
use crate::sanitize::sanitize_draft;

/// Why one producer failed.
#[derive(Debug, Clone, PartialEq)]
enum ProducerFailure {
    Provider(ProviderError),
    Empty,
}

/// Fans one writer prompt out to N concurrent generations.
#[derive(Debug)]
pub struct DraftGenerator<P> {
    provider: P,
    config: DraftConfig,
    timeout: Duration,
}

impl<P: Provider> DraftGenerator<P> {
    /// Create a generator over `provider`.
    pub const fn new(provider: P, config: DraftConfig, timeout: Duration) -> Self {
        Self {
            provider,
            config,
            timeout,
        }
    }

    /// The wrapped provider.
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Temperatures for each producer: the configured ladder, cycled.
    pub fn temperature_plan(&self) -> Vec<f32> {
        self.config
            .temperatures
            .iter()
            .copied()
            .cycle()
            .take(self.config.count)
            .collect()
    }

    /// Generate drafts for one attempt.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::ProviderRejected`] if the provider refused every
    ///   request outright (nothing a retry could fix)
    /// - [`PipelineError::InsufficientDrafts`] if fewer than `min_drafts`
    ///   producers returned usable text
    pub async fn generate(&self, prompt: &Prompt, attempt: u32) -> Result<Vec<Draft>, PipelineError> {
        let plan = self.temperature_plan();
        let calls = plan.iter().enumerate().map(|(producer_index, &temperature)| {
            let options = GenerateOptions::default()
                .with_temperature(temperature)
                .with_max_tokens(self.config.max_tokens)
                .with_timeout(self.timeout);
            async move {
                let outcome = match self.provider.generate(prompt, &options).await {
                    Ok(raw) => {
                        let text = sanitize_draft(&raw);
                        if text.is_empty() {
                            Err(ProducerFailure::Empty)
                        } else {
                            Ok(text)
                        }
                    }
                    Err(e) => Err(ProducerFailure::Provider(e)),
                };
                (producer_index, temperature, outcome)
            }
        });

        let mut drafts = Vec::new();
        let mut failures = Vec::new();
        for (producer_index, temperature, outcome) in join_all(calls).await {
            match outcome {
                Ok(text) => {
                    let draft = Draft {
                        draft_id: DraftId::new(),
                        text,
                        generation_params: GenerationParams {
                            temperature,
                            max_tokens: self.config.max_tokens,
                            attempt,
                        },
                        producer_index,
                        revision_of: None,
                    };
                    debug!(
                        attempt,
                        producer_index,
                        draft_id = %draft.draft_id,
                        words = draft.text.split_whitespace().count(),
                        "draft produced"
                    );
                    drafts.push(draft);
                }
                Err(failure) => {
                    warn!(attempt, producer_index, ?failure, "draft producer failed");
                    failures.push(failure_with_index(producer_index, failure));
                }
            }
        }

        if drafts.len() >= self.config.min_drafts {
            return Ok(drafts);
        }
        if let Some(rejection) = all_rejected(&failures) {
            return Err(PipelineError::ProviderRejected(rejection));
        }
        Err(PipelineError::InsufficientDrafts {
            succeeded: drafts.len(),
            required: self.config.min_drafts,
            failures: failures.into_iter().map(|(_, text)| text).collect(),
        })
    }
}

fn failure_with_index(
    producer_index: usize,
    failure: ProducerFailure,
) -> (Option<ProviderError>, String) {
    match failure {
        ProducerFailure::Provider(e) => {
            let text = format!("producer {producer_index}: {e}");
            (Some(e), text)
        }
        ProducerFailure::Empty => (
            None,
            format!("producer {producer_index}: empty after sanitization"),
        ),
    }
}

/// The first rejection, if every failure was a non-retryable rejection.
fn all_rejected(failures: &[(Option<ProviderError>, String)]) -> Option<ProviderError> {
    if failures.is_empty()
        || !failures
            .iter()
            .all(|(e, _)| matches!(e, Some(ProviderError::Rejected(_))))
    {
        return None;
    }
    failures.first().and_then(|(e, _)| e.clone())
}
