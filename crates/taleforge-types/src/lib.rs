//! Shared type definitions for the Taleforge scene production pipeline.
//!
//! Every crate in the workspace speaks these types: the memory store
//! persists them, the pipeline produces them, and the observer serves them.
//! Types flow to `TypeScript` via `ts-rs` for the dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Draft/arc identifiers and the project key slug
//! - [`enums`] -- Rubrics, statuses, outcomes, pipeline states
//! - [`story`] -- World state, character bible entries, arc threads, scenes
//! - [`tribunal`] -- Drafts, critic verdicts, tribunal decisions
//! - [`delta`] -- Explicit memory deltas and transitions
//! - [`records`] -- Scene log rows, commit requests, read snapshots

pub mod delta;
pub mod enums;
pub mod ids;
pub mod records;
pub mod story;
pub mod tribunal;

// Re-export all public types at crate root for convenience.
pub use delta::{ArcChange, CharacterChange, MemoryDelta, RelationshipTransition, StatusTransition};
pub use enums::{ArcStatus, CharacterStatus, Outcome, PipelineState, Rubric};
pub use ids::{ArcId, DraftId, ProjectKey, ProjectKeyError};
pub use records::{MemorySnapshot, SceneCommit, SceneRecord, TransitionRecord};
pub use story::{
    ArcThread, CharacterEntry, ProjectSeed, Scene, SceneRequest, WorldState, word_count,
};
pub use tribunal::{
    CriticVerdict, Draft, DraftScore, GenerationParams, NO_IRREVERSIBLE_CHANGE, TribunalDecision,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation for dashboard-facing types.

    #[test]
    fn export_bindings() {
        // Files are written to `bindings/` relative to the crate root.
        use ts_rs::TS;

        let _ = crate::ids::DraftId::export_all();
        let _ = crate::ids::ArcId::export_all();
        let _ = crate::ids::ProjectKey::export_all();

        let _ = crate::enums::Rubric::export_all();
        let _ = crate::enums::PipelineState::export_all();
        let _ = crate::enums::Outcome::export_all();

        let _ = crate::story::SceneRequest::export_all();
        let _ = crate::story::ProjectSeed::export_all();

        let _ = crate::tribunal::TribunalDecision::export_all();
        let _ = crate::tribunal::Draft::export_all();
        let _ = crate::tribunal::CriticVerdict::export_all();

        let _ = crate::delta::MemoryDelta::export_all();
        let _ = crate::records::SceneRecord::export_all();
        let _ = crate::records::MemorySnapshot::export_all();
    }
}
