//! Pure validation and application of scene commits.
//!
//! Nothing here touches locks or storage: [`apply_commit`] takes the
//! current [`ProjectState`] and a [`SceneCommit`] and returns either the
//! next state plus its scene log row, or the first rule the commit breaks.
//! Because the input state is never mutated, a rejected commit leaves no
//! trace.
//!
//! # Rules
//!
//! - The scene's sequence number must be exactly `head + 1`.
//! - A character status change must name the status currently recorded.
//! - A relationship change must name the relationship currently recorded.
//! - Introducing a character already in the bible is a contradiction.
//! - Only open threads can be resolved or abandoned.
//! - Only resolved or abandoned threads can be reopened, and only with a cause.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use taleforge_types::{
    ArcChange, ArcId, ArcStatus, ArcThread, CharacterChange, CharacterEntry, MemorySnapshot,
    Outcome, ProjectKey, ProjectSeed, RelationshipTransition, SceneCommit, SceneRecord,
    StatusTransition, TransitionRecord, word_count,
};

use crate::error::MemoryError;

/// Full in-memory state of one project: the read snapshot plus the scene log.
#[derive(Debug, Clone)]
pub struct ProjectState {
    /// Latest committed snapshot.
    pub snapshot: Arc<MemorySnapshot>,
    /// Scene log, ordered by sequence number.
    pub log: Vec<Arc<SceneRecord>>,
}

/// Result of a successful [`apply_commit`].
#[derive(Debug, Clone)]
pub struct Applied {
    /// State after the commit.
    pub state: ProjectState,
    /// The appended scene log row.
    pub record: Arc<SceneRecord>,
}

/// Build the initial state of a new project.
pub fn seed_state(key: &ProjectKey, seed: ProjectSeed) -> Result<ProjectState, MemoryError> {
    if seed.title.trim().is_empty() {
        return Err(MemoryError::InvalidSeed("title must not be empty".to_owned()));
    }

    let mut characters = BTreeMap::new();
    for mut entry in seed.characters {
        if entry.name.trim().is_empty() {
            return Err(MemoryError::InvalidSeed("character with empty name".to_owned()));
        }
        entry.last_seen_scene = None;
        let name = entry.name.clone();
        if characters.insert(name.clone(), entry).is_some() {
            return Err(MemoryError::InvalidSeed(format!("duplicate character {name}")));
        }
    }

    let arcs = seed
        .arcs
        .into_iter()
        .filter(|description| !description.trim().is_empty())
        .map(|description| {
            let id = ArcId::new();
            (
                id,
                ArcThread {
                    id,
                    description,
                    status: ArcStatus::Open,
                    introduced_scene: 0,
                    resolved_scene: None,
                },
            )
        })
        .collect();

    Ok(ProjectState {
        snapshot: Arc::new(MemorySnapshot {
            project: key.clone(),
            title: seed.title,
            world: seed.world,
            characters,
            arcs,
            head_sequence: 0,
            total_words: 0,
        }),
        log: Vec::new(),
    })
}

/// Validate `commit` against `state` and compute the next state.
///
/// # Errors
///
/// - [`MemoryError::StaleSnapshot`] if the sequence number is not head + 1
/// - [`MemoryError::InconsistentStateTransition`] if the delta contradicts
///   the bible or the ledger
/// - [`MemoryError::InvalidCommit`] if the commit request is malformed
pub fn apply_commit(
    state: &ProjectState,
    commit: &SceneCommit,
    now: DateTime<Utc>,
) -> Result<Applied, MemoryError> {
    let current = &state.snapshot;
    let sequence = commit.scene.sequence_number;
    let expected = current.next_sequence();
    if sequence != expected {
        return Err(MemoryError::StaleSnapshot {
            project: current.project.clone(),
            expected,
            actual: sequence,
        });
    }
    validate_request(commit)?;

    let mut transitions = Vec::new();
    let mut characters = current.characters.clone();
    for change in &commit.delta.characters {
        apply_character_change(&mut characters, change, sequence, &mut transitions)?;
    }

    let mut arcs = current.arcs.clone();
    for change in &commit.delta.arcs {
        apply_arc_change(&mut arcs, change, sequence, &mut transitions)?;
    }

    let words = word_count(&commit.text);
    let record = Arc::new(SceneRecord {
        project: current.project.clone(),
        scene: commit.scene.clone(),
        text: commit.text.clone(),
        word_count: words,
        decision: commit.decision.clone(),
        world_before: current.world.clone(),
        world_after: commit.delta.world.clone(),
        transitions,
        committed_at: now,
    });

    let snapshot = Arc::new(MemorySnapshot {
        project: current.project.clone(),
        title: current.title.clone(),
        world: commit.delta.world.clone(),
        characters,
        arcs,
        head_sequence: sequence,
        total_words: current.total_words.saturating_add(words),
    });

    let mut log = state.log.clone();
    log.push(Arc::clone(&record));

    Ok(Applied {
        state: ProjectState { snapshot, log },
        record,
    })
}

/// Reject commits that could never be valid regardless of state.
fn validate_request(commit: &SceneCommit) -> Result<(), MemoryError> {
    if commit.text.trim().is_empty() {
        return Err(MemoryError::InvalidCommit("scene text is empty".to_owned()));
    }
    if commit.decision.outcome != Outcome::Accept {
        return Err(MemoryError::InvalidCommit(format!(
            "decision outcome is {:?}, only accepted scenes are committed",
            commit.decision.outcome
        )));
    }
    if commit.decision.winning_draft_id != Some(commit.scene.accepted_draft_id) {
        return Err(MemoryError::InvalidCommit(
            "accepted draft does not match the tribunal winner".to_owned(),
        ));
    }
    if commit.decision.scene_sequence != commit.scene.sequence_number {
        return Err(MemoryError::InvalidCommit(format!(
            "decision is for scene {}, commit is for scene {}",
            commit.decision.scene_sequence, commit.scene.sequence_number
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Character bible
// ---------------------------------------------------------------------------

fn apply_character_change(
    characters: &mut BTreeMap<String, CharacterEntry>,
    change: &CharacterChange,
    sequence: u64,
    transitions: &mut Vec<TransitionRecord>,
) -> Result<(), MemoryError> {
    match change {
        CharacterChange::Introduce { entry } => {
            let name = entry.name.trim();
            if name.is_empty() {
                return Err(MemoryError::inconsistent("<unnamed>", "character name is empty"));
            }
            if characters.contains_key(name) {
                return Err(MemoryError::inconsistent(
                    name,
                    "already in the bible; changes must be explicit transitions",
                ));
            }
            let mut entry = entry.clone();
            entry.name = name.to_owned();
            entry.last_seen_scene = Some(sequence);
            transitions.push(TransitionRecord::CharacterIntroduced {
                name: entry.name.clone(),
            });
            characters.insert(entry.name.clone(), entry);
        }
        CharacterChange::Update {
            name,
            role,
            hidden_agenda,
            status,
            relationships,
            appeared,
        } => {
            let entry = characters
                .get_mut(name)
                .ok_or_else(|| MemoryError::inconsistent(name, "not in the bible"))?;
            if let Some(role) = role {
                entry.role.clone_from(role);
            }
            if let Some(agenda) = hidden_agenda {
                entry.hidden_agenda = Some(agenda.clone());
            }
            if let Some(transition) = status {
                apply_status(entry, transition, transitions)?;
            }
            for transition in relationships {
                apply_relationship(entry, transition, transitions)?;
            }
            if *appeared {
                entry.last_seen_scene = Some(sequence);
            }
        }
    }
    Ok(())
}

fn apply_status(
    entry: &mut CharacterEntry,
    transition: &StatusTransition,
    transitions: &mut Vec<TransitionRecord>,
) -> Result<(), MemoryError> {
    if transition.from != entry.status {
        return Err(MemoryError::inconsistent(
            &entry.name,
            format!(
                "status transition claims {:?} but the bible records {:?}",
                transition.from, entry.status
            ),
        ));
    }
    if transition.from == transition.to {
        return Ok(());
    }
    if transition.cause.trim().is_empty() {
        return Err(MemoryError::inconsistent(
            &entry.name,
            "status change without a cause",
        ));
    }
    entry.status = transition.to;
    transitions.push(TransitionRecord::Status {
        character: entry.name.clone(),
        from: transition.from,
        to: transition.to,
        cause: transition.cause.clone(),
    });
    Ok(())
}

fn apply_relationship(
    entry: &mut CharacterEntry,
    transition: &RelationshipTransition,
    transitions: &mut Vec<TransitionRecord>,
) -> Result<(), MemoryError> {
    let recorded = entry.relationships.get(&transition.other);
    if recorded != transition.from.as_ref() {
        return Err(MemoryError::inconsistent(
            &entry.name,
            format!(
                "relationship with {} claims {:?} but the bible records {:?}",
                transition.other, transition.from, recorded
            ),
        ));
    }
    if transition.from == transition.to {
        return Ok(());
    }
    if transition.cause.trim().is_empty() {
        return Err(MemoryError::inconsistent(
            &entry.name,
            format!("relationship with {} changed without a cause", transition.other),
        ));
    }
    match &transition.to {
        Some(relation) => {
            entry
                .relationships
                .insert(transition.other.clone(), relation.clone());
        }
        None => {
            entry.relationships.remove(&transition.other);
        }
    }
    transitions.push(TransitionRecord::Relationship {
        character: entry.name.clone(),
        other: transition.other.clone(),
        from: transition.from.clone(),
        to: transition.to.clone(),
        cause: transition.cause.clone(),
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// Arc ledger
// ---------------------------------------------------------------------------

fn apply_arc_change(
    arcs: &mut BTreeMap<ArcId, ArcThread>,
    change: &ArcChange,
    sequence: u64,
    transitions: &mut Vec<TransitionRecord>,
) -> Result<(), MemoryError> {
    if let ArcChange::Open { id, description } = change {
        if arcs.contains_key(id) {
            return Err(MemoryError::inconsistent(id.to_string(), "thread already exists"));
        }
        if description.trim().is_empty() {
            return Err(MemoryError::inconsistent(id.to_string(), "thread has no description"));
        }
        arcs.insert(
            *id,
            ArcThread {
                id: *id,
                description: description.clone(),
                status: ArcStatus::Open,
                introduced_scene: sequence,
                resolved_scene: None,
            },
        );
        transitions.push(TransitionRecord::Arc {
            arc: *id,
            from: None,
            to: ArcStatus::Open,
            cause: None,
        });
        return Ok(());
    }

    let id = change.id();
    let thread = arcs
        .get_mut(&id)
        .ok_or_else(|| MemoryError::inconsistent(id.to_string(), "unknown thread"))?;
    let from = thread.status;

    let (to, cause) = match change {
        ArcChange::Resolve { .. } => {
            require_status(thread, &[ArcStatus::Open], "resolve")?;
            thread.resolved_scene = Some(sequence);
            (ArcStatus::Resolved, None)
        }
        ArcChange::Abandon { cause, .. } => {
            require_status(thread, &[ArcStatus::Open], "abandon")?;
            require_cause(thread, cause)?;
            (ArcStatus::Abandoned, Some(cause.clone()))
        }
        ArcChange::Reopen { cause, .. } => {
            require_status(thread, &[ArcStatus::Resolved, ArcStatus::Abandoned], "reopen")?;
            require_cause(thread, cause)?;
            thread.resolved_scene = None;
            (ArcStatus::Open, Some(cause.clone()))
        }
        ArcChange::Open { .. } => (ArcStatus::Open, None),
    };

    thread.status = to;
    transitions.push(TransitionRecord::Arc {
        arc: id,
        from: Some(from),
        to,
        cause,
    });
    Ok(())
}

fn require_status(
    thread: &ArcThread,
    allowed: &[ArcStatus],
    action: &str,
) -> Result<(), MemoryError> {
    if allowed.contains(&thread.status) {
        Ok(())
    } else {
        Err(MemoryError::inconsistent(
            thread.id.to_string(),
            format!("cannot {action} a thread that is {}", thread.status.as_str()),
        ))
    }
}

fn require_cause(thread: &ArcThread, cause: &str) -> Result<(), MemoryError> {
    if cause.trim().is_empty() {
        Err(MemoryError::inconsistent(
            thread.id.to_string(),
            "status change requires a recorded cause",
        ))
    } else {
        Ok(())
    }
}
