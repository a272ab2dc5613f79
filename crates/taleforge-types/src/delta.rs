//! Memory deltas: the only way story state changes.
//!
//! A delta states every status and relationship change as an explicit
//! `from -> to` transition with a cause. The store checks each `from`
//! against its current value, so a delta computed from a stale or
//! hallucinated view of the bible is refused instead of applied.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::CharacterStatus;
use crate::ids::ArcId;
use crate::story::{CharacterEntry, WorldState};

/// A change of life status, stated against the prior value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StatusTransition {
    /// Status the writer believes the character currently has.
    pub from: CharacterStatus,
    /// New status.
    pub to: CharacterStatus,
    /// In-story reason for the change.
    pub cause: String,
}

/// A change of relationship type towards another character.
///
/// `None` on either side means "no recorded relationship".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RelationshipTransition {
    /// Name of the other character.
    pub other: String,
    /// Relationship the writer believes is currently recorded.
    pub from: Option<String>,
    /// New relationship.
    pub to: Option<String>,
    /// In-story reason for the change.
    pub cause: String,
}

/// One change to the character bible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum CharacterChange {
    /// A character enters the bible for the first time.
    Introduce {
        /// The new entry. `last_seen_scene` is set by the store.
        entry: CharacterEntry,
    },
    /// An existing character changes or simply appears.
    Update {
        /// Bible key.
        name: String,
        /// New role, if it changed.
        #[serde(default)]
        role: Option<String>,
        /// New hidden agenda, if it changed.
        #[serde(default)]
        hidden_agenda: Option<String>,
        /// Status change, if any.
        #[serde(default)]
        status: Option<StatusTransition>,
        /// Relationship changes, if any.
        #[serde(default)]
        relationships: Vec<RelationshipTransition>,
        /// Whether the character appears in the scene (updates `last_seen_scene`).
        #[serde(default)]
        appeared: bool,
    },
}

impl CharacterChange {
    /// Name of the character the change targets.
    pub fn name(&self) -> &str {
        match self {
            Self::Introduce { entry } => &entry.name,
            Self::Update { name, .. } => name,
        }
    }
}

/// One change to the arc ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ArcChange {
    /// A new thread is introduced by this scene.
    Open {
        /// Fresh thread identifier.
        id: ArcId,
        /// What the thread is about.
        description: String,
    },
    /// An open thread is paid off by this scene.
    Resolve {
        /// Thread identifier.
        id: ArcId,
    },
    /// An open thread is dropped.
    Abandon {
        /// Thread identifier.
        id: ArcId,
        /// Why it is dropped.
        cause: String,
    },
    /// A resolved or abandoned thread comes back. Requires a cause.
    Reopen {
        /// Thread identifier.
        id: ArcId,
        /// Why it comes back.
        cause: String,
    },
}

impl ArcChange {
    /// Identifier of the thread the change targets.
    pub const fn id(&self) -> ArcId {
        match self {
            Self::Open { id, .. }
            | Self::Resolve { id }
            | Self::Abandon { id, .. }
            | Self::Reopen { id, .. } => *id,
        }
    }
}

/// Everything a committed scene changes in story memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MemoryDelta {
    /// Replacement world state.
    pub world: WorldState,
    /// Character bible changes, applied in order.
    #[serde(default)]
    pub characters: Vec<CharacterChange>,
    /// Arc ledger changes, applied in order.
    #[serde(default)]
    pub arcs: Vec<ArcChange>,
}

impl MemoryDelta {
    /// A delta that only carries the world forward unchanged.
    pub fn carry_forward(world: &WorldState) -> Self {
        Self {
            world: world.clone(),
            characters: Vec::new(),
            arcs: Vec::new(),
        }
    }
}
