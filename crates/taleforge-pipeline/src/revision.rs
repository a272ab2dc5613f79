//! Targeted rewrite of a winning draft.
//!
//! The writer sees every fix note plus the priority fix (the note from the
//! lowest-scoring rubric) and rewrites the draft once. The result keeps the
//! original's producer index, so tie-breaks stay stable, and points back at
//! the draft it replaces. Lint findings on the winner are passed along as
//! further fixes.

use std::sync::Arc;
use std::time::Duration;

use taleforge_gateway::{GenerateOptions, Provider};
use taleforge_types::{CriticVerdict, Draft, DraftId, GenerationParams};
use tracing::{info, warn};

use crate::context::SceneContext;
use crate::decision::{irreversible_change_of, priority_fix};
use crate::error::PipelineError;
use crate::lint::lint_draft;
use crate::prompt::PromptEngine;
use crate::sanitize::sanitize_draft;

/// Temperature of the rewrite call.
const REVISION_TEMPERATURE: f32 = 0.7;

/// Rewrites a winning draft against its critics' notes.
#[derive(Debug)]
pub struct Reviser<P> {
    provider: P,
    prompts: Arc<PromptEngine>,
    max_tokens: u32,
    timeout: Duration,
}

impl<P: Provider> Reviser<P> {
    /// Create a reviser over `provider`.
    pub const fn new(
        provider: P,
        prompts: Arc<PromptEngine>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            prompts,
            max_tokens,
            timeout,
        }
    }

    /// Rewrite `winner` using the verdicts passed on it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RevisionFailed`] if there is nothing to act
    /// on, the call fails, or the rewrite sanitizes to nothing; and
    /// [`PipelineError::Template`] if the prompt fails to render.
    pub async fn revise(
        &self,
        scene: &SceneContext,
        winner: &Draft,
        verdicts: &[CriticVerdict],
    ) -> Result<Draft, PipelineError> {
        let mine: Vec<&CriticVerdict> = verdicts
            .iter()
            .filter(|v| v.draft_id == winner.draft_id)
            .collect();
        let priority = priority_fix(&mine).ok_or_else(|| {
            PipelineError::RevisionFailed(format!("no verdicts for draft {}", winner.draft_id))
        })?;
        let change = irreversible_change_of(verdicts, winner).unwrap_or("not yet established");

        let lint = lint_draft(&winner.text, &scene.roster);
        let prompt = self
            .prompts
            .revision_prompt(scene, &winner.text, &mine, priority, change, &lint)?;
        let options = GenerateOptions::default()
            .with_temperature(REVISION_TEMPERATURE)
            .with_max_tokens(self.max_tokens)
            .with_timeout(self.timeout);

        let raw = self.provider.generate(&prompt, &options).await.map_err(|e| {
            warn!(draft_id = %winner.draft_id, error = %e, "revision call failed");
            PipelineError::RevisionFailed(e.to_string())
        })?;
        let text = sanitize_draft(&raw);
        if text.is_empty() {
            return Err(PipelineError::RevisionFailed(
                "rewrite was empty after sanitization".to_owned(),
            ));
        }

        let revised = Draft {
            draft_id: DraftId::new(),
            text,
            generation_params: GenerationParams {
                temperature: REVISION_TEMPERATURE,
                max_tokens: self.max_tokens,
                attempt: winner.generation_params.attempt,
            },
            producer_index: winner.producer_index,
            revision_of: Some(winner.draft_id),
        };
        info!(
            original = %winner.draft_id,
            revised = %revised.draft_id,
            priority = %priority.rubric,
            "draft revised"
        );
        Ok(revised)
    }
}
