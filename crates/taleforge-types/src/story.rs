//! Durable story state: world, character bible, arc ledger, scenes.
//!
//! These are the values the memory store owns. Everything here is plain
//! data; the rules for how it may change live in `taleforge-memory`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{ArcStatus, CharacterStatus};
use crate::ids::{ArcId, DraftId};

/// The single live snapshot of the narrative moment.
///
/// Overwritten wholesale by every committed scene. The previous value is
/// kept in the scene log for replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorldState {
    /// In-story time (e.g. "Day 3, dusk").
    pub current_time: String,
    /// Where the point-of-view character currently is.
    pub current_location: String,
    /// Physical and emotional posture of the protagonist.
    pub posture: String,
    /// Items currently carried.
    #[serde(default)]
    pub inventory: Vec<String>,
    /// What is currently at risk.
    #[serde(default)]
    pub active_stakes: Vec<String>,
}

impl WorldState {
    /// One-paragraph rendering used as a scene's `before_state`/`after_state`.
    pub fn summary(&self) -> String {
        let inventory = if self.inventory.is_empty() {
            "nothing".to_owned()
        } else {
            self.inventory.join(", ")
        };
        let stakes = if self.active_stakes.is_empty() {
            "none".to_owned()
        } else {
            self.active_stakes.join("; ")
        };
        format!(
            "Time: {}. Location: {}. Posture: {}. Carrying: {inventory}. Stakes: {stakes}.",
            self.current_time, self.current_location, self.posture
        )
    }
}

/// One entry in the character bible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CharacterEntry {
    /// Unique display name; the bible is keyed by it.
    pub name: String,
    /// Narrative role (protagonist, mentor, rival...).
    pub role: String,
    /// Relationship type towards other characters, keyed by their name.
    #[serde(default)]
    pub relationships: BTreeMap<String, String>,
    /// What the character wants but does not say.
    #[serde(default)]
    pub hidden_agenda: Option<String>,
    /// Alive, dead, or unknown.
    pub status: CharacterStatus,
    /// Sequence number of the last scene the character appeared in.
    #[serde(default)]
    pub last_seen_scene: Option<u64>,
}

/// One plot thread in the arc ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ArcThread {
    /// Thread identifier.
    pub id: ArcId,
    /// What the thread is about.
    pub description: String,
    /// Open, resolved, or abandoned.
    pub status: ArcStatus,
    /// Scene that introduced the thread (0 for seeded threads).
    pub introduced_scene: u64,
    /// Scene that resolved the thread, if any.
    #[serde(default)]
    pub resolved_scene: Option<u64>,
}

/// A committed unit of narrative. Immutable once in the scene log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Scene {
    /// Monotonic, gap-free position within the project (first scene is 1).
    pub sequence_number: u64,
    /// What the scene had to accomplish.
    pub goal: String,
    /// World summary before the scene.
    pub before_state: String,
    /// World summary after the scene.
    pub after_state: String,
    /// The permanent consequence the scene produced.
    pub irreversible_change: String,
    /// Narrative point-of-view mode (e.g. "close third").
    pub pov_mode: String,
    /// Draft whose text was committed.
    pub accepted_draft_id: DraftId,
}

/// What an operator asks the pipeline to produce next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SceneRequest {
    /// What must happen in the scene.
    pub goal: String,
    /// Where the scene must leave the story.
    pub after_state: String,
    /// Point-of-view mode.
    #[serde(default = "default_pov_mode")]
    pub pov_mode: String,
    /// Extra constraints pushing drafts apart (tone, forbidden beats...).
    #[serde(default)]
    pub diversity_constraints: Vec<String>,
}

fn default_pov_mode() -> String {
    "close third person".to_owned()
}

/// Initial content of a new story project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ProjectSeed {
    /// Manuscript title.
    pub title: String,
    /// Opening world state.
    #[serde(default)]
    pub world: WorldState,
    /// Characters known before scene 1.
    #[serde(default)]
    pub characters: Vec<CharacterEntry>,
    /// Plot threads open before scene 1.
    #[serde(default)]
    pub arcs: Vec<String>,
}

/// Count whitespace-separated words in scene text.
pub fn word_count(text: &str) -> u64 {
    u64::try_from(text.split_whitespace().count()).unwrap_or(u64::MAX)
}
