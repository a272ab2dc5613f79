//! Drafts, critic verdicts, and tribunal decisions.
//!
//! Drafts and verdicts are ephemeral: they live for one scene cycle. A
//! [`TribunalDecision`] is persisted with the scene log row so every
//! committed scene can be traced back to the scores that admitted it.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{Outcome, Rubric};
use crate::ids::DraftId;

/// Sentinel a critic returns when a draft produces no permanent change.
pub const NO_IRREVERSIBLE_CHANGE: &str = "NONE";

/// Sampling parameters a draft was produced with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GenerationParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Token cap for the draft.
    pub max_tokens: u32,
    /// Production attempt (1-based) the draft belongs to.
    pub attempt: u32,
}

/// One candidate rendering of a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Draft {
    /// Draft identifier.
    pub draft_id: DraftId,
    /// Sanitized prose.
    pub text: String,
    /// How the draft was sampled.
    pub generation_params: GenerationParams,
    /// Position in the fan-out (0..N-1). Tie-breaks use this, never arrival order.
    pub producer_index: usize,
    /// Draft this one rewrites, for revision passes.
    #[serde(default)]
    pub revision_of: Option<DraftId>,
}

/// One critic's structured judgement of one draft under one rubric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CriticVerdict {
    /// Draft being judged.
    pub draft_id: DraftId,
    /// Rubric applied.
    pub rubric: Rubric,
    /// Score in `0..=100`.
    pub score: u8,
    /// Concrete fix instruction.
    pub fix_note: String,
    /// The permanent change the critic found, or `NONE`.
    #[serde(default)]
    pub irreversible_change_claim: Option<String>,
    /// Set when the critic never produced a parseable verdict.
    #[serde(default)]
    pub unscored: bool,
}

impl CriticVerdict {
    /// Verdict recorded when a critic could not be scored at all.
    pub fn unscored(draft_id: DraftId, rubric: Rubric, reason: &str) -> Self {
        Self {
            draft_id,
            rubric,
            score: 0,
            fix_note: format!("unscored: {reason}"),
            irreversible_change_claim: None,
            unscored: true,
        }
    }

    /// Whether the critic asserts the draft changes nothing permanently.
    pub fn claims_no_change(&self) -> bool {
        self.irreversible_change_claim
            .as_deref()
            .is_some_and(|claim| claim.trim().eq_ignore_ascii_case(NO_IRREVERSIBLE_CHANGE))
    }
}

/// Aggregated standing of one draft in a tribunal round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DraftScore {
    /// Draft identifier.
    pub draft_id: DraftId,
    /// Position in the fan-out.
    pub producer_index: usize,
    /// Weighted mean of the rubric scores.
    #[ts(as = "String")]
    pub aggregate: Decimal,
    /// Per-rubric scores.
    pub per_rubric: BTreeMap<Rubric, u8>,
    /// Disqualified by a `NONE` irreversible-change claim.
    pub vetoed: bool,
    /// Number of verdicts that fell back to 0 because they never parsed.
    pub unscored: u32,
}

/// The tribunal's decision for one scoring round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TribunalDecision {
    /// Sequence number of the scene being produced.
    pub scene_sequence: u64,
    /// Production attempt (1-based).
    pub attempt: u32,
    /// Winning draft, if any draft was eligible.
    pub winning_draft_id: Option<DraftId>,
    /// Aggregate of the winner (or of the best vetoed draft when none won).
    #[ts(as = "String")]
    pub aggregate_score: Decimal,
    /// Per-rubric scores of the winner.
    pub per_rubric_scores: BTreeMap<Rubric, u8>,
    /// Accept, revise, or reject.
    pub outcome: Outcome,
    /// Standing of every draft, ordered by producer index.
    pub draft_scores: Vec<DraftScore>,
    /// Whether the winner is the product of a revision pass.
    pub revised: bool,
}

impl TribunalDecision {
    /// Total unscored verdicts across the round. Non-zero means degraded confidence.
    pub fn unscored_verdicts(&self) -> u32 {
        self.draft_scores
            .iter()
            .fold(0_u32, |acc, score| acc.saturating_add(score.unscored))
    }

    /// Whether any verdict in the round was a fallback score.
    pub fn is_degraded(&self) -> bool {
        self.unscored_verdicts() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(claim: Option<&str>) -> CriticVerdict {
        CriticVerdict {
            draft_id: DraftId::new(),
            rubric: Rubric::Arc,
            score: 90,
            fix_note: "tighten".to_owned(),
            irreversible_change_claim: claim.map(ToOwned::to_owned),
            unscored: false,
        }
    }

    #[test]
    fn none_claim_detected_case_insensitively() {
        assert!(verdict(Some("NONE")).claims_no_change());
        assert!(verdict(Some(" none ")).claims_no_change());
        assert!(!verdict(Some("The bridge is burned")).claims_no_change());
        assert!(!verdict(None).claims_no_change());
    }

    #[test]
    fn unscored_verdict_is_flagged_zero() {
        let v = CriticVerdict::unscored(DraftId::new(), Rubric::Prose, "no json");
        assert_eq!(v.score, 0);
        assert!(v.unscored);
        assert!(v.fix_note.starts_with("unscored:"));
        assert!(!v.claims_no_change());
    }
}
