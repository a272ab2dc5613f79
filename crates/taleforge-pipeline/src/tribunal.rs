//! Critic tribunal fan-out.
//!
//! Every (draft, rubric) pair gets its own evaluation call and all of them
//! run concurrently. A verdict that does not parse is asked for once more
//! with a stricter formatting instruction; if that also fails, or the
//! provider errors, the verdict is recorded as unscored (score 0) rather
//! than dropped, so the decision always sees three verdicts per draft.
//!
//! Each draft is linted once up front and every critic sees the findings.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use taleforge_gateway::{GenerateOptions, Provider, extract_json_object, read_score, read_string};
use taleforge_types::{CriticVerdict, Draft, DraftId, Rubric};
use tracing::{debug, warn};

use crate::config::TribunalConfig;
use crate::context::SceneContext;
use crate::error::PipelineError;
use crate::lint::{LintReport, lint_draft};
use crate::prompt::PromptEngine;

/// Runs the three critics against every draft.
#[derive(Debug)]
pub struct CriticTribunal<P> {
    provider: P,
    prompts: Arc<PromptEngine>,
    options: GenerateOptions,
}

impl<P: Provider> CriticTribunal<P> {
    /// Create a tribunal over `provider`.
    pub fn new(
        provider: P,
        prompts: Arc<PromptEngine>,
        config: &TribunalConfig,
        timeout: Duration,
    ) -> Self {
        let options = GenerateOptions::default()
            .with_temperature(config.critic_temperature)
            .with_max_tokens(config.critic_max_tokens)
            .with_timeout(timeout)
            .json();
        Self {
            provider,
            prompts,
            options,
        }
    }

    /// Evaluate every draft under every rubric.
    ///
    /// Verdicts come back grouped by draft (in input order), then by
    /// [`Rubric::ALL`] order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Template`] if a critic prompt fails to
    /// render. Provider and parse failures never error; they become
    /// unscored verdicts.
    pub async fn evaluate(
        &self,
        scene: &SceneContext,
        drafts: &[Draft],
    ) -> Result<Vec<CriticVerdict>, PipelineError> {
        let linted: Vec<(&Draft, LintReport)> = drafts
            .iter()
            .map(|draft| {
                let lint = lint_draft(&draft.text, &scene.roster);
                debug!(draft_id = %draft.draft_id, findings = lint.findings.len(), "draft linted");
                (draft, lint)
            })
            .collect();
        let calls = linted.iter().flat_map(|(draft, lint)| {
            Rubric::ALL
                .into_iter()
                .map(move |rubric| self.judge(scene, draft, lint, rubric))
        });
        join_all(calls).await.into_iter().collect()
    }

    async fn judge(
        &self,
        scene: &SceneContext,
        draft: &Draft,
        lint: &LintReport,
        rubric: Rubric,
    ) -> Result<CriticVerdict, PipelineError> {
        let prompt = self
            .prompts
            .critic_prompt(rubric, scene, &draft.text, lint, false)?;
        match self.provider.generate(&prompt, &self.options).await {
            Ok(raw) => {
                if let Some(verdict) = parse_verdict(draft.draft_id, rubric, &raw) {
                    debug!(draft_id = %draft.draft_id, %rubric, score = verdict.score, "verdict");
                    return Ok(verdict);
                }
                debug!(draft_id = %draft.draft_id, %rubric, "verdict unparseable, retrying strictly");
            }
            Err(e) => {
                warn!(draft_id = %draft.draft_id, %rubric, error = %e, "critic call failed");
                return Ok(CriticVerdict::unscored(
                    draft.draft_id,
                    rubric,
                    &format!("provider error: {e}"),
                ));
            }
        }

        let strict = self
            .prompts
            .critic_prompt(rubric, scene, &draft.text, lint, true)?;
        let verdict = match self.provider.generate(&strict, &self.options).await {
            Ok(raw) => parse_verdict(draft.draft_id, rubric, &raw).unwrap_or_else(|| {
                CriticVerdict::unscored(draft.draft_id, rubric, "verdict unparseable after retry")
            }),
            Err(e) => CriticVerdict::unscored(draft.draft_id, rubric, &format!("provider error: {e}")),
        };
        if verdict.unscored {
            warn!(draft_id = %draft.draft_id, %rubric, note = %verdict.fix_note, "verdict unscored");
        }
        Ok(verdict)
    }
}

/// Parse one critic reply.
///
/// Accepts the rubric-prefixed keys the templates ask for
/// (`prose_score`, `prose_fix`) and the bare `score`/`fix` some models
/// answer with instead. Returns `None` when no score can be found.
pub fn parse_verdict(draft_id: DraftId, rubric: Rubric, raw: &str) -> Option<CriticVerdict> {
    let object = extract_json_object(raw)?;
    let score = read_score(&object, &format!("{rubric}_score"))
        .or_else(|| read_score(&object, "score"))?;
    let fix_note = read_string(&object, &format!("{rubric}_fix"))
        .or_else(|| read_string(&object, "fix"))
        .unwrap_or_default();
    let irreversible_change_claim = match rubric {
        Rubric::Arc => read_string(&object, "irreversible_change"),
        Rubric::Prose | Rubric::Redundancy => None,
    };
    Some(CriticVerdict {
        draft_id,
        rubric,
        score,
        fix_note,
        irreversible_change_claim,
        unscored: false,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use taleforge_gateway::{FnProvider, Prompt, ProviderError};
    use taleforge_types::GenerationParams;

    use super::*;

    fn draft(index: usize, text: &str) -> Draft {
        Draft {
            draft_id: DraftId::new(),
            text: text.to_owned(),
            generation_params: GenerationParams {
                temperature: 0.7,
                max_tokens: 100,
                attempt: 1,
            },
            producer_index: index,
            revision_of: None,
        }
    }

    fn scene() -> SceneContext {
        SceneContext {
            project: "p".to_owned(),
            title: "T".to_owned(),
            sequence: 1,
            goal: "g".to_owned(),
            after_state: "a".to_owned(),
            pov_mode: "close third person".to_owned(),
            diversity_constraints: Vec::new(),
            world: taleforge_types::WorldState::default(),
            before_state: String::new(),
            roster: Vec::new(),
            open_arcs: Vec::new(),
            recent: Vec::new(),
        }
    }

    #[test]
    fn parses_prefixed_and_bare_keys() {
        let id = DraftId::new();
        let prose = parse_verdict(id, Rubric::Prose, r#"{"prose_score": 91, "prose_fix": "more smell"}"#)
            .unwrap();
        assert_eq!(prose.score, 91);
        assert_eq!(prose.fix_note, "more smell");
        assert!(prose.irreversible_change_claim.is_none());

        let arc = parse_verdict(
            id,
            Rubric::Arc,
            "```json\n{\"score\": \"77\", \"fix\": \"x\", \"irreversible_change\": \"NONE\"}\n```",
        )
        .unwrap();
        assert_eq!(arc.score, 77);
        assert!(arc.claims_no_change());
    }

    #[test]
    fn missing_score_is_unparseable() {
        assert!(parse_verdict(DraftId::new(), Rubric::Prose, r#"{"prose_fix": "x"}"#).is_none());
        assert!(parse_verdict(DraftId::new(), Rubric::Prose, "great scene!").is_none());
    }

    #[tokio::test]
    async fn three_verdicts_per_draft_in_order() {
        let provider = FnProvider::new("critic", |p: &Prompt, _: &GenerateOptions| {
            let score = if p.user.contains("second") { 60 } else { 90 };
            Ok(format!(
                r#"{{"prose_score": {score}, "redundancy_score": {score}, "arc_score": {score}, "irreversible_change": "a door closes"}}"#
            ))
        });
        let prompts = Arc::new(PromptEngine::builtin().unwrap());
        let tribunal = CriticTribunal::new(
            provider,
            prompts,
            &TribunalConfig::default(),
            Duration::from_secs(1),
        );
        let drafts = [draft(0, "first text"), draft(1, "second text")];
        let verdicts = tribunal.evaluate(&scene(), &drafts).await.unwrap();

        assert_eq!(verdicts.len(), 6);
        assert_eq!(verdicts[0].rubric, Rubric::Prose);
        assert_eq!(verdicts[2].rubric, Rubric::Arc);
        assert_eq!(verdicts[2].irreversible_change_claim.as_deref(), Some("a door closes"));
        assert!(verdicts[..3].iter().all(|v| v.draft_id == drafts[0].draft_id && v.score == 90));
        assert!(verdicts[3..].iter().all(|v| v.draft_id == drafts[1].draft_id && v.score == 60));
    }

    #[tokio::test]
    async fn critics_see_lint_findings_of_their_draft_only() {
        let provider = FnProvider::new("critic", |p: &Prompt, _: &GenerateOptions| {
            let score = if p.user.contains("LINT FINDINGS") {
                assert!(p.user.contains("\"she felt\" x2"));
                55
            } else {
                90
            };
            Ok(format!(
                r#"{{"prose_score": {score}, "redundancy_score": {score}, "arc_score": {score}}}"#
            ))
        });
        let tribunal = CriticTribunal::new(
            provider,
            Arc::new(PromptEngine::builtin().unwrap()),
            &TribunalConfig::default(),
            Duration::from_secs(1),
        );
        let drafts = [
            draft(0, "She felt the wind. She felt the drop."),
            draft(1, "Wind tore at the rope bridge."),
        ];
        let verdicts = tribunal.evaluate(&scene(), &drafts).await.unwrap();
        assert!(verdicts[..3].iter().all(|v| v.score == 55));
        assert!(verdicts[3..].iter().all(|v| v.score == 90));
    }

    #[tokio::test]
    async fn unparseable_verdict_retried_once_then_unscored() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let provider = FnProvider::new("critic", move |p: &Prompt, _: &GenerateOptions| {
            seen.fetch_add(1, Ordering::SeqCst);
            if p.system.contains("PROSE CRITIC") {
                Ok("I liked it a lot.".to_owned())
            } else {
                Ok(r#"{"redundancy_score": 80, "arc_score": 80}"#.to_owned())
            }
        });
        let prompts = Arc::new(PromptEngine::builtin().unwrap());
        let tribunal = CriticTribunal::new(
            provider,
            prompts,
            &TribunalConfig::default(),
            Duration::from_secs(1),
        );
        let verdicts = tribunal.evaluate(&scene(), &[draft(0, "t")]).await.unwrap();

        // prose: first try + strict retry; redundancy and arc: one call each
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(verdicts[0].unscored);
        assert_eq!(verdicts[0].score, 0);
        assert!(verdicts[0].fix_note.starts_with("unscored:"));
        assert!(!verdicts[1].unscored);
    }

    #[tokio::test]
    async fn strict_retry_can_recover() {
        let provider = FnProvider::new("critic", |p: &Prompt, _: &GenerateOptions| {
            if p.user.contains("could not be parsed") {
                Ok(r#"{"prose_score": 88, "redundancy_score": 88, "arc_score": 88}"#.to_owned())
            } else {
                Ok("no json here".to_owned())
            }
        });
        let prompts = Arc::new(PromptEngine::builtin().unwrap());
        let tribunal = CriticTribunal::new(
            provider,
            prompts,
            &TribunalConfig::default(),
            Duration::from_secs(1),
        );
        let verdicts = tribunal.evaluate(&scene(), &[draft(0, "t")]).await.unwrap();
        assert!(verdicts.iter().all(|v| !v.unscored && v.score == 88));
    }

    #[tokio::test]
    async fn provider_error_recorded_as_unscored() {
        let provider = FnProvider::new("critic", |_: &Prompt, _: &GenerateOptions| {
            Err(ProviderError::Unavailable("503".to_owned()))
        });
        let prompts = Arc::new(PromptEngine::builtin().unwrap());
        let tribunal = CriticTribunal::new(
            provider,
            prompts,
            &TribunalConfig::default(),
            Duration::from_secs(1),
        );
        let verdicts = tribunal.evaluate(&scene(), &[draft(0, "t")]).await.unwrap();
        assert_eq!(verdicts.len(), 3);
        assert!(verdicts.iter().all(|v| v.unscored && v.fix_note.contains("provider error")));
    }
}
