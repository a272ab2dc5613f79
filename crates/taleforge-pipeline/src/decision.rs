//! Verdict aggregation and the accept/revise/reject policy.
//!
//! Everything here is a pure function of drafts, verdicts, and
//! configuration: no I/O, no clocks, no randomness. Aggregates use
//! [`Decimal`] so that ties and threshold comparisons are exact.
//!
//! # Policy
//!
//! - A draft is vetoed if any verdict on it claims no irreversible change.
//! - The winner is the best non-vetoed aggregate; aggregates within
//!   `tie_epsilon` of the best are tied and the lowest producer index wins.
//!   A tie never reaches below the threshold band the best aggregate sits
//!   in, so a near-tie cannot turn an accept into a revise.
//! - `aggregate >= accept_threshold` accepts.
//! - `revise_threshold <= aggregate < accept_threshold` revises once; once
//!   the revision is spent the same band accepts.
//! - Anything lower, or no eligible draft at all, rejects.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use taleforge_types::{
    CriticVerdict, Draft, DraftScore, Outcome, Rubric, TribunalDecision,
};

use crate::config::TribunalConfig;

/// Decimal places kept on aggregates.
const AGGREGATE_SCALE: u32 = 2;

/// Where a decision is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Round {
    /// Scene sequence number.
    pub scene_sequence: u64,
    /// Production attempt (1-based).
    pub attempt: u32,
    /// Whether this round already spent its revision.
    pub revision_spent: bool,
}

/// Weighted mean of `per_rubric` under `config`'s weights.
///
/// Rubrics without a score count as 0.
pub fn weighted_mean(per_rubric: &BTreeMap<Rubric, u8>, config: &TribunalConfig) -> Decimal {
    let mut total = Decimal::ZERO;
    let mut weight_sum = Decimal::ZERO;
    for rubric in Rubric::ALL {
        let weight = config.weights.weight(rubric);
        let score = Decimal::from(per_rubric.get(&rubric).copied().unwrap_or(0));
        total = total.saturating_add(weight.saturating_mul(score));
        weight_sum = weight_sum.saturating_add(weight);
    }
    total
        .checked_div(weight_sum)
        .unwrap_or(Decimal::ZERO)
        .round_dp(AGGREGATE_SCALE)
}

/// Score every draft from its verdicts. Output follows `drafts` order.
pub fn score_drafts(
    drafts: &[Draft],
    verdicts: &[CriticVerdict],
    config: &TribunalConfig,
) -> Vec<DraftScore> {
    drafts
        .iter()
        .map(|draft| {
            let mine = verdicts.iter().filter(|v| v.draft_id == draft.draft_id);
            let mut per_rubric = BTreeMap::new();
            let mut vetoed = false;
            let mut unscored = 0_u32;
            for verdict in mine {
                per_rubric.insert(verdict.rubric, verdict.score);
                vetoed |= verdict.claims_no_change();
                if verdict.unscored {
                    unscored = unscored.saturating_add(1);
                }
            }
            DraftScore {
                draft_id: draft.draft_id,
                producer_index: draft.producer_index,
                aggregate: weighted_mean(&per_rubric, config),
                per_rubric,
                vetoed,
                unscored,
            }
        })
        .collect()
}

/// The winning score: best non-vetoed aggregate, ties broken by producer index.
///
/// Tied drafts must share the best aggregate's band (accept, revise or
/// reject under `config`'s thresholds).
pub fn select_winner<'a>(scores: &'a [DraftScore], config: &TribunalConfig) -> Option<&'a DraftScore> {
    let eligible = || scores.iter().filter(|s| !s.vetoed);
    let best = eligible().map(|s| s.aggregate).max()?;
    let floor = best
        .saturating_sub(config.tie_epsilon)
        .max(band_floor(best, config));
    eligible()
        .filter(|s| s.aggregate >= floor)
        .min_by_key(|s| s.producer_index)
}

/// Lowest aggregate that lands in the same outcome band as `aggregate`.
fn band_floor(aggregate: Decimal, config: &TribunalConfig) -> Decimal {
    let accept = Decimal::from(config.accept_threshold);
    let revise = Decimal::from(config.revise_threshold);
    if aggregate >= accept {
        accept
    } else if aggregate >= revise {
        revise
    } else {
        Decimal::MIN
    }
}

/// Apply the decision policy to a scored round.
pub fn decide(scores: Vec<DraftScore>, config: &TribunalConfig, round: Round) -> TribunalDecision {
    let accept = Decimal::from(config.accept_threshold);
    let revise = Decimal::from(config.revise_threshold);

    let winner = select_winner(&scores, config).cloned();
    let (outcome, winning_draft_id, aggregate_score, per_rubric_scores) = match winner {
        None => {
            let best_vetoed = scores
                .iter()
                .map(|s| s.aggregate)
                .max()
                .unwrap_or(Decimal::ZERO);
            (Outcome::Reject, None, best_vetoed, BTreeMap::new())
        }
        Some(w) if w.aggregate >= accept => {
            (Outcome::Accept, Some(w.draft_id), w.aggregate, w.per_rubric)
        }
        Some(w) if w.aggregate >= revise => {
            let outcome = if config.revision_enabled && !round.revision_spent {
                Outcome::Revise
            } else {
                Outcome::Accept
            };
            (outcome, Some(w.draft_id), w.aggregate, w.per_rubric)
        }
        Some(w) => (Outcome::Reject, None, w.aggregate, w.per_rubric),
    };

    let mut draft_scores = scores;
    draft_scores.sort_by_key(|s| s.producer_index);
    TribunalDecision {
        scene_sequence: round.scene_sequence,
        attempt: round.attempt,
        winning_draft_id,
        aggregate_score,
        per_rubric_scores,
        outcome,
        draft_scores,
        revised: round.revision_spent,
    }
}

/// The verdict the rewrite must address first: the lowest score.
///
/// Ties go to the earlier rubric in [`Rubric::ALL`] order.
pub fn priority_fix<'a>(verdicts: &[&'a CriticVerdict]) -> Option<&'a CriticVerdict> {
    verdicts
        .iter()
        .copied()
        .min_by_key(|v| (v.score, v.rubric))
}

/// The permanent change the arc critic found in a draft, if it named one.
pub fn irreversible_change_of<'a>(verdicts: &'a [CriticVerdict], draft: &Draft) -> Option<&'a str> {
    verdicts
        .iter()
        .filter(|v| v.draft_id == draft.draft_id && !v.claims_no_change())
        .find_map(|v| v.irreversible_change_claim.as_deref())
}
