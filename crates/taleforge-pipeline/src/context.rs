//! Scene context assembly.
//!
//! A [`SceneContext`] is everything the writer and critics see about the
//! story: the request, the live world state, the bible, the open threads,
//! and a digest of the most recent scenes. It is built once per scene from
//! a memory snapshot and serialized straight into the prompt templates.

use std::sync::Arc;

use serde::Serialize;
use taleforge_types::{
    ArcThread, CharacterEntry, MemorySnapshot, SceneRecord, SceneRequest, WorldState,
};

/// Digest of one committed scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentScene {
    /// Sequence number.
    pub sequence: u64,
    /// What the scene had to accomplish.
    pub goal: String,
    /// The permanent change it produced.
    pub irreversible_change: String,
    /// Closing lines of the scene.
    pub excerpt: String,
}

/// Everything the pipeline stages know about the scene being produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneContext {
    /// Project key.
    pub project: String,
    /// Manuscript title.
    pub title: String,
    /// Sequence number the scene will take.
    pub sequence: u64,
    /// What must happen in the scene.
    pub goal: String,
    /// Where the scene must leave the story.
    pub after_state: String,
    /// Point-of-view mode.
    pub pov_mode: String,
    /// Extra constraints from the request.
    pub diversity_constraints: Vec<String>,
    /// Live world state.
    pub world: WorldState,
    /// One-line rendering of `world`.
    pub before_state: String,
    /// Character bible, living characters first.
    pub roster: Vec<CharacterEntry>,
    /// Open plot threads.
    pub open_arcs: Vec<ArcThread>,
    /// Most recent scenes, oldest first.
    pub recent: Vec<RecentScene>,
}

impl SceneContext {
    /// Assemble the context for the scene after `snapshot`'s head.
    pub fn build(
        snapshot: &MemorySnapshot,
        recent: &[Arc<SceneRecord>],
        request: &SceneRequest,
        excerpt_chars: usize,
    ) -> Self {
        let mut roster: Vec<CharacterEntry> = snapshot.characters.values().cloned().collect();
        roster.sort_by_key(|c| c.status != taleforge_types::CharacterStatus::Alive);

        Self {
            project: snapshot.project.as_str().to_owned(),
            title: snapshot.title.clone(),
            sequence: snapshot.next_sequence(),
            goal: request.goal.clone(),
            after_state: request.after_state.clone(),
            pov_mode: request.pov_mode.clone(),
            diversity_constraints: request.diversity_constraints.clone(),
            world: snapshot.world.clone(),
            before_state: snapshot.world.summary(),
            roster,
            open_arcs: snapshot.open_arcs().cloned().collect(),
            recent: recent
                .iter()
                .map(|record| RecentScene {
                    sequence: record.scene.sequence_number,
                    goal: record.scene.goal.clone(),
                    irreversible_change: record.scene.irreversible_change.clone(),
                    excerpt: tail_excerpt(&record.text, excerpt_chars),
                })
                .collect(),
        }
    }
}

/// The last `max_chars` characters of `text`, starting on a word boundary
/// when one is near.
pub fn tail_excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if max_chars == 0 {
        return String::new();
    }
    let start = text
        .char_indices()
        .rev()
        .nth(max_chars.saturating_sub(1))
        .map_or(0, |(idx, _)| idx);
    let tail = text.get(start..).unwrap_or(text);
    if start == 0 {
        return tail.to_owned();
    }
    match tail.find(char::is_whitespace) {
        Some(space) if space < tail.len().checked_div(4).unwrap_or(0) => tail
            .get(space..)
            .unwrap_or(tail)
            .trim_start()
            .to_owned(),
        _ => tail.to_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use taleforge_types::{ArcId, ArcStatus, CharacterStatus, ProjectKey};

    use super::*;

    fn snapshot() -> MemorySnapshot {
        let dead = CharacterEntry {
            name: "Aldo".to_owned(),
            role: "mentor".to_owned(),
            relationships: BTreeMap::new(),
            hidden_agenda: None,
            status: CharacterStatus::Dead,
            last_seen_scene: Some(1),
        };
        let alive = CharacterEntry {
            name: "Zora".to_owned(),
            status: CharacterStatus::Alive,
            ..dead.clone()
        };
        let open = ArcId::new();
        let closed = ArcId::new();
        MemorySnapshot {
            project: ProjectKey::parse("tide").unwrap(),
            title: "Tide".to_owned(),
            world: WorldState::default(),
            characters: BTreeMap::from([
                ("Aldo".to_owned(), dead),
                ("Zora".to_owned(), alive),
            ]),
            arcs: BTreeMap::from([
                (
                    open,
                    ArcThread {
                        id: open,
                        description: "the debt".to_owned(),
                        status: ArcStatus::Open,
                        introduced_scene: 0,
                        resolved_scene: None,
                    },
                ),
                (
                    closed,
                    ArcThread {
                        id: closed,
                        description: "the storm".to_owned(),
                        status: ArcStatus::Resolved,
                        introduced_scene: 0,
                        resolved_scene: Some(2),
                    },
                ),
            ]),
            head_sequence: 2,
            total_words: 100,
        }
    }

    #[test]
    fn context_targets_next_sequence_with_living_first() {
        let request = SceneRequest {
            goal: "cross the bar".to_owned(),
            after_state: "the boat is lost".to_owned(),
            pov_mode: "first person".to_owned(),
            diversity_constraints: vec!["no dialogue".to_owned()],
        };
        let context = SceneContext::build(&snapshot(), &[], &request, 100);
        assert_eq!(context.sequence, 3);
        assert_eq!(context.roster.first().unwrap().name, "Zora");
        assert_eq!(context.open_arcs.len(), 1);
        assert_eq!(context.open_arcs.first().unwrap().description, "the debt");
    }

    #[test]
    fn excerpt_keeps_short_text_whole() {
        assert_eq!(tail_excerpt("  short text  ", 50), "short text");
    }

    #[test]
    fn excerpt_cuts_on_word_boundary() {
        let text = "alpha bravo charlie delta echo foxtrot";
        let tail = tail_excerpt(text, 16);
        assert!(text.ends_with(&tail));
        assert!(tail.chars().count() <= 16);
        assert!(!tail.starts_with(' '));
        assert_eq!(tail, "echo foxtrot");
    }

    #[test]
    fn excerpt_respects_multibyte_boundaries() {
        let tail = tail_excerpt("über straße", 6);
        assert_eq!(tail, "straße");
    }
}
