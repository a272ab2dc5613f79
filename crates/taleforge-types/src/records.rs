//! Scene log rows, commit requests, and read snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::delta::MemoryDelta;
use crate::enums::{ArcStatus, CharacterStatus};
use crate::ids::{ArcId, ProjectKey};
use crate::story::{ArcThread, CharacterEntry, Scene, WorldState};
use crate::tribunal::TribunalDecision;

/// A logged change to the bible or the ledger, kept with the scene record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum TransitionRecord {
    /// A character entered the bible.
    CharacterIntroduced {
        /// Character name.
        name: String,
    },
    /// A character's life status changed.
    Status {
        /// Character name.
        character: String,
        /// Prior status.
        from: CharacterStatus,
        /// New status.
        to: CharacterStatus,
        /// In-story cause.
        cause: String,
    },
    /// A relationship type changed.
    Relationship {
        /// Character whose bible entry changed.
        character: String,
        /// The other party.
        other: String,
        /// Prior relationship.
        from: Option<String>,
        /// New relationship.
        to: Option<String>,
        /// In-story cause.
        cause: String,
    },
    /// An arc thread changed status (or was opened, when `from` is `None`).
    Arc {
        /// Thread identifier.
        arc: ArcId,
        /// Prior status.
        from: Option<ArcStatus>,
        /// New status.
        to: ArcStatus,
        /// Cause, required for reopening and abandoning.
        cause: Option<String>,
    },
}

/// Everything the orchestrator hands the store to commit one scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneCommit {
    /// The scene being committed. `sequence_number` must be head + 1.
    pub scene: Scene,
    /// Accepted draft text.
    pub text: String,
    /// Decision that admitted the draft.
    pub decision: TribunalDecision,
    /// State changes.
    pub delta: MemoryDelta,
}

/// One append-only row of the scene log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SceneRecord {
    /// Owning project.
    pub project: ProjectKey,
    /// The committed scene.
    pub scene: Scene,
    /// Accepted prose.
    pub text: String,
    /// Words in `text`.
    pub word_count: u64,
    /// Tribunal decision summary.
    pub decision: TribunalDecision,
    /// World state before the scene (kept for replay).
    pub world_before: WorldState,
    /// World state after the scene.
    pub world_after: WorldState,
    /// Every explicit transition the scene applied.
    pub transitions: Vec<TransitionRecord>,
    /// Commit timestamp.
    pub committed_at: DateTime<Utc>,
}

/// Immutable read view of a project's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MemorySnapshot {
    /// Project the snapshot belongs to.
    pub project: ProjectKey,
    /// Manuscript title.
    pub title: String,
    /// Live world state.
    pub world: WorldState,
    /// Character bible, keyed by name.
    pub characters: BTreeMap<String, CharacterEntry>,
    /// Arc ledger, keyed by thread id.
    pub arcs: BTreeMap<ArcId, ArcThread>,
    /// Sequence number of the last committed scene (0 before the first).
    pub head_sequence: u64,
    /// Words committed so far.
    pub total_words: u64,
}

impl MemorySnapshot {
    /// The only sequence number the next commit may use.
    pub const fn next_sequence(&self) -> u64 {
        self.head_sequence.saturating_add(1)
    }

    /// Threads still open, in id order.
    pub fn open_arcs(&self) -> impl Iterator<Item = &ArcThread> {
        self.arcs
            .values()
            .filter(|arc| arc.status == ArcStatus::Open)
    }
}
