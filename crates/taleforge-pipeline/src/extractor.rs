//! World-update extraction after acceptance.
//!
//! The writer model is asked what the accepted scene changed, as loose
//! JSON ([`WorldUpdate`]). Turning that into a [`MemoryDelta`] is a
//! separate, pure step ([`WorldUpdate::to_delta`]) that reads the current
//! snapshot to fill in every transition's `from` side. The orchestrator can
//! therefore rebuild the delta against a fresh snapshot after an integrity
//! error without asking the model again.
//!
//! Extraction never fails a scene: an unusable reply degrades to an empty
//! update, which carries the world forward unchanged.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use taleforge_gateway::{GenerateOptions, Provider, extract_json_object};
use taleforge_types::{
    ArcChange, ArcId, ArcStatus, CharacterChange, CharacterEntry, CharacterStatus,
    MemoryDelta, MemorySnapshot, RelationshipTransition, StatusTransition,
};
use tracing::{debug, warn};

use crate::context::{SceneContext, tail_excerpt};
use crate::prompt::PromptEngine;

/// Characters of scene text shown to the extractor.
const EXTRACT_EXCERPT_CHARS: usize = 4000;

/// Role given to characters a scene introduces without naming one.
const DEFAULT_ROLE: &str = "supporting";

/// What the model says a scene changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorldUpdate {
    /// New in-story time.
    pub current_time: Option<String>,
    /// New location.
    pub current_location: Option<String>,
    /// New posture.
    pub posture: Option<String>,
    /// Items gained.
    pub inventory_add: Vec<String>,
    /// Items lost (matched case-insensitively).
    pub inventory_remove: Vec<String>,
    /// Stakes raised.
    pub stakes_add: Vec<String>,
    /// Stakes settled (matched case-insensitively).
    pub stakes_remove: Vec<String>,
    /// Per-character changes, keyed by name.
    pub characters: BTreeMap<String, CharacterUpdate>,
    /// Descriptions of threads the scene opens.
    pub arcs_opened: Vec<String>,
    /// Ids (or exact descriptions) of threads the scene resolves.
    pub arcs_resolved: Vec<String>,
}

/// What the model says changed for one character.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CharacterUpdate {
    /// New status, loosely worded ("deceased", "missing").
    pub status: Option<String>,
    /// Role, used when the character is new.
    pub role: Option<String>,
    /// Relationship towards others, keyed by their name.
    pub relationships: BTreeMap<String, String>,
    /// What in the scene caused the change.
    pub cause: Option<String>,
}

impl WorldUpdate {
    /// Parse a model reply. Returns `None` when no usable object is found.
    pub fn parse(raw: &str) -> Option<Self> {
        let object = extract_json_object(raw)?;
        serde_json::from_value(serde_json::Value::Object(object)).ok()
    }

    /// Build the explicit delta this update implies against `snapshot`.
    ///
    /// Changes that would contradict the snapshot are dropped rather than
    /// emitted: a status or relationship that already holds is not a
    /// transition, and only open threads can be resolved.
    pub fn to_delta(&self, snapshot: &MemorySnapshot, default_cause: &str) -> MemoryDelta {
        let mut world = snapshot.world.clone();
        if let Some(time) = non_blank(self.current_time.as_deref()) {
            world.current_time = time.to_owned();
        }
        if let Some(location) = non_blank(self.current_location.as_deref()) {
            world.current_location = location.to_owned();
        }
        if let Some(posture) = non_blank(self.posture.as_deref()) {
            world.posture = posture.to_owned();
        }
        merge_list(&mut world.inventory, &self.inventory_add, &self.inventory_remove);
        merge_list(&mut world.active_stakes, &self.stakes_add, &self.stakes_remove);

        let characters = self
            .characters
            .iter()
            .filter_map(|(name, update)| {
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                let cause = non_blank(update.cause.as_deref()).unwrap_or(default_cause);
                Some(match snapshot.characters.get(name) {
                    Some(entry) => update_existing(entry, update, cause),
                    None => introduce(name, update),
                })
            })
            .collect();

        MemoryDelta {
            world,
            characters,
            arcs: self.arc_changes(snapshot),
        }
    }

    fn arc_changes(&self, snapshot: &MemorySnapshot) -> Vec<ArcChange> {
        let mut changes = Vec::new();
        let mut resolved = Vec::new();
        for reference in &self.arcs_resolved {
            let reference = reference.trim();
            let found = ArcId::from_str(reference)
                .ok()
                .and_then(|id| snapshot.arcs.get(&id))
                .or_else(|| {
                    snapshot
                        .arcs
                        .values()
                        .find(|arc| arc.description.eq_ignore_ascii_case(reference))
                });
            match found {
                Some(arc) if arc.status == ArcStatus::Open && !resolved.contains(&arc.id) => {
                    resolved.push(arc.id);
                    changes.push(ArcChange::Resolve { id: arc.id });
                }
                _ => debug!(reference, "resolved thread not open, ignored"),
            }
        }

        let mut opened: Vec<String> = Vec::new();
        for description in &self.arcs_opened {
            let description = description.trim();
            let duplicate = description.is_empty()
                || opened.iter().any(|d| d.eq_ignore_ascii_case(description))
                || snapshot
                    .open_arcs()
                    .any(|arc| arc.description.eq_ignore_ascii_case(description));
            if !duplicate {
                opened.push(description.to_owned());
                changes.push(ArcChange::Open {
                    id: ArcId::new(),
                    description: description.to_owned(),
                });
            }
        }
        changes
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn merge_list(list: &mut Vec<String>, add: &[String], remove: &[String]) {
    let remove: Vec<String> = remove.iter().map(|r| r.trim().to_lowercase()).collect();
    list.retain(|item| !remove.contains(&item.to_lowercase()));
    for item in add {
        let item = item.trim();
        if !item.is_empty() && !list.iter().any(|existing| existing.eq_ignore_ascii_case(item)) {
            list.push(item.to_owned());
        }
    }
}

fn update_existing(entry: &CharacterEntry, update: &CharacterUpdate, cause: &str) -> CharacterChange {
    let status = update
        .status
        .as_deref()
        .and_then(CharacterStatus::parse_loose)
        .filter(|to| *to != entry.status)
        .map(|to| StatusTransition {
            from: entry.status,
            to,
            cause: cause.to_owned(),
        });
    let relationships = update
        .relationships
        .iter()
        .filter_map(|(other, relation)| {
            let relation = relation.trim();
            let current = entry.relationships.get(other.as_str());
            (!relation.is_empty() && current.map(String::as_str) != Some(relation)).then(|| {
                RelationshipTransition {
                    other: other.clone(),
                    from: current.cloned(),
                    to: Some(relation.to_owned()),
                    cause: cause.to_owned(),
                }
            })
        })
        .collect();
    CharacterChange::Update {
        name: entry.name.clone(),
        role: None,
        hidden_agenda: None,
        status,
        relationships,
        appeared: true,
    }
}

fn introduce(name: &str, update: &CharacterUpdate) -> CharacterChange {
    CharacterChange::Introduce {
        entry: CharacterEntry {
            name: name.to_owned(),
            role: non_blank(update.role.as_deref())
                .unwrap_or(DEFAULT_ROLE)
                .to_owned(),
            relationships: update
                .relationships
                .iter()
                .filter(|(_, relation)| !relation.trim().is_empty())
                .map(|(other, relation)| (other.clone(), relation.trim().to_owned()))
                .collect(),
            hidden_agenda: None,
            status: update
                .status
                .as_deref()
                .and_then(CharacterStatus::parse_loose)
                .unwrap_or(CharacterStatus::Alive),
            last_seen_scene: None,
        },
    }
}

/// Asks the writer model what an accepted scene changed.
#[derive(Debug)]
pub struct DeltaExtractor<P> {
    provider: P,
    prompts: Arc<PromptEngine>,
    options: GenerateOptions,
}

impl<P: Provider> DeltaExtractor<P> {
    /// Create an extractor over `provider`.
    pub fn new(provider: P, prompts: Arc<PromptEngine>, max_tokens: u32, timeout: Duration) -> Self {
        let options = GenerateOptions::default()
            .with_temperature(0.2)
            .with_max_tokens(max_tokens)
            .with_timeout(timeout)
            .json();
        Self {
            provider,
            prompts,
            options,
        }
    }

    /// Extract the world update for `text`. Never fails; see module docs.
    pub async fn extract(&self, scene: &SceneContext, text: &str) -> WorldUpdate {
        let excerpt = tail_excerpt(text, EXTRACT_EXCERPT_CHARS);
        let prompt = match self.prompts.extract_prompt(scene, &excerpt) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(sequence = scene.sequence, error = %e, "extract prompt failed, carrying world forward");
                return WorldUpdate::default();
            }
        };
        match self.provider.generate(&prompt, &self.options).await {
            Ok(raw) => WorldUpdate::parse(&raw).unwrap_or_else(|| {
                warn!(sequence = scene.sequence, "world update unparseable, carrying world forward");
                WorldUpdate::default()
            }),
            Err(e) => {
                warn!(sequence = scene.sequence, error = %e, "world update call failed, carrying world forward");
                WorldUpdate::default()
            }
        }
    }
}
