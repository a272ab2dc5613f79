//! Enumeration types for the scene production pipeline.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// The three disjoint quality criteria a critic scores a draft against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Rubric {
    /// Sentence-level craft: rhythm, imagery, clarity.
    Prose,
    /// Repetition of phrasing, beats, or information already delivered.
    Redundancy,
    /// Continuity with the story so far and the scene's irreversible change.
    Arc,
}

impl Rubric {
    /// Every rubric, in canonical order.
    pub const ALL: [Self; 3] = [Self::Prose, Self::Redundancy, Self::Arc];

    /// Stable lowercase name used in prompts, logs, and storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prose => "prose",
            Self::Redundancy => "redundancy",
            Self::Arc => "arc",
        }
    }
}

impl core::fmt::Display for Rubric {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Life status of a character in the bible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum CharacterStatus {
    /// Alive as of the last committed scene.
    Alive,
    /// Dead. Only an explicit transition can change this.
    Dead,
    /// Whereabouts or fate unknown.
    Unknown,
}

impl CharacterStatus {
    /// Parse a loose, model-produced status string.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "alive" | "active" | "living" => Some(Self::Alive),
            "dead" | "deceased" | "killed" => Some(Self::Dead),
            "unknown" | "missing" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Lifecycle status of an arc thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ArcStatus {
    /// Still unresolved.
    Open,
    /// Paid off by a committed scene.
    Resolved,
    /// Dropped without payoff.
    Abandoned,
}

impl ArcStatus {
    /// Stable lowercase name used in storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Outcome of one tribunal round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Outcome {
    /// The winning draft is good enough to commit.
    Accept,
    /// The winning draft gets one targeted rewrite and is re-scored.
    Revise,
    /// No draft is usable; the attempt fails.
    Reject,
}

/// States of the per-scene production state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum PipelineState {
    /// No scene in flight. Initial state for every scene.
    Idle,
    /// Memory snapshot read and scene context assembled.
    ContextBuilt,
    /// Draft fan-out in progress.
    Drafting,
    /// Critic fan-out in progress.
    Scoring,
    /// Verdicts aggregated, outcome being decided.
    Deciding,
    /// Targeted rewrite of the winning draft in progress.
    Revising,
    /// Atomic commit into story memory in progress.
    Committing,
    /// Scene committed (terminal).
    Committed,
    /// Scene production failed (terminal).
    Failed,
}

impl PipelineState {
    /// Whether the state ends a scene cycle.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }

    /// Whether external cancellation may be honoured in this state.
    pub const fn is_cancellable(self) -> bool {
        matches!(
            self,
            Self::Idle | Self::ContextBuilt | Self::Drafting | Self::Scoring
        )
    }

    /// States reachable from `self` in one step.
    pub fn allowed_transitions(self) -> Vec<Self> {
        match self {
            Self::Idle => vec![Self::ContextBuilt, Self::Failed],
            // Committing is reachable again only on the integrity retry path.
            Self::ContextBuilt => vec![Self::Drafting, Self::Committing, Self::Failed],
            Self::Drafting => vec![Self::Scoring, Self::Drafting, Self::Failed],
            Self::Scoring => vec![Self::Deciding, Self::Failed],
            Self::Deciding => vec![
                Self::Revising,
                Self::Committing,
                Self::Drafting,
                Self::Failed,
            ],
            Self::Revising => vec![Self::Scoring, Self::Failed],
            Self::Committing => vec![Self::Committed, Self::ContextBuilt, Self::Failed],
            Self::Committed | Self::Failed => vec![Self::Idle],
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

impl core::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ContextBuilt => "context_built",
            Self::Drafting => "drafting",
            Self::Scoring => "scoring",
            Self::Deciding => "deciding",
            Self::Revising => "revising",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
