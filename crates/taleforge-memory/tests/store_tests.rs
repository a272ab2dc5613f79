//! Integration tests for [`StoryMemoryStore`].
//!
//! `SQLite` tests run against private in-memory databases, so no external
//! services are needed.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing,
    clippy::panic
)]

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use taleforge_memory::{MemoryDb, MemoryError, StoryMemoryStore};
use taleforge_types::{
    ArcChange, ArcId, CharacterChange, CharacterEntry, CharacterStatus, DraftId, MemoryDelta,
    Outcome, ProjectKey, ProjectSeed, Rubric, Scene, SceneCommit, StatusTransition,
    TribunalDecision, WorldState,
};

// =============================================================================
// Helpers
// =============================================================================

fn key(raw: &str) -> ProjectKey {
    ProjectKey::parse(raw).unwrap()
}

fn seed() -> ProjectSeed {
    ProjectSeed {
        title: "Salt and Iron".to_owned(),
        world: WorldState {
            current_time: "Day 1, morning".to_owned(),
            current_location: "the quay".to_owned(),
            posture: "restless".to_owned(),
            inventory: vec!["letter".to_owned()],
            active_stakes: vec!["the ship sails at dusk".to_owned()],
        },
        characters: vec![CharacterEntry {
            name: "Ines".to_owned(),
            role: "protagonist".to_owned(),
            relationships: BTreeMap::from([("Bram".to_owned(), "brother".to_owned())]),
            hidden_agenda: Some("burn the letter".to_owned()),
            status: CharacterStatus::Alive,
            last_seen_scene: None,
        }],
        arcs: vec!["The unsigned letter".to_owned()],
    }
}

fn commit(sequence: u64, time: &str) -> SceneCommit {
    let draft = DraftId::new();
    SceneCommit {
        scene: Scene {
            sequence_number: sequence,
            goal: format!("scene {sequence} goal"),
            before_state: String::new(),
            after_state: String::new(),
            irreversible_change: "the letter is read aloud".to_owned(),
            pov_mode: "first person".to_owned(),
            accepted_draft_id: draft,
        },
        text: format!("Scene {sequence} happens at {time}."),
        decision: TribunalDecision {
            scene_sequence: sequence,
            attempt: 1,
            winning_draft_id: Some(draft),
            aggregate_score: Decimal::new(880, 1),
            per_rubric_scores: BTreeMap::from([
                (Rubric::Prose, 90),
                (Rubric::Redundancy, 86),
                (Rubric::Arc, 88),
            ]),
            outcome: Outcome::Accept,
            draft_scores: Vec::new(),
            revised: false,
        },
        delta: MemoryDelta::carry_forward(&WorldState {
            current_time: time.to_owned(),
            ..WorldState::default()
        }),
    }
}

async fn sqlite_store() -> (StoryMemoryStore, MemoryDb) {
    let db = MemoryDb::open("sqlite::memory:").await.unwrap();
    (StoryMemoryStore::with_database(db.clone()), db)
}

// =============================================================================
// In-memory store
// =============================================================================

#[tokio::test]
async fn create_and_read_project() {
    let store = StoryMemoryStore::in_memory();
    let project = key("salt");
    let created = store.create_project(&project, seed()).await.unwrap();

    assert_eq!(created.head_sequence, 0);
    assert_eq!(created.arcs.len(), 1);

    let read = store.read_snapshot(&project).await.unwrap();
    assert_eq!(read.title, "Salt and Iron");
    assert_eq!(store.project_keys().await.unwrap(), vec![project]);
}

#[tokio::test]
async fn duplicate_and_unknown_projects() {
    let store = StoryMemoryStore::in_memory();
    store.create_project(&key("salt"), seed()).await.unwrap();

    assert!(matches!(
        store.create_project(&key("salt"), seed()).await,
        Err(MemoryError::ProjectExists(_))
    ));
    assert!(matches!(
        store.read_snapshot(&key("iron")).await,
        Err(MemoryError::UnknownProject(_))
    ));
}

#[tokio::test]
async fn sequence_numbers_are_gap_free() {
    let store = StoryMemoryStore::in_memory();
    let project = key("salt");
    store.create_project(&project, seed()).await.unwrap();

    for sequence in 1..=3 {
        let record = store
            .commit_scene(&project, commit(sequence, &format!("Day {sequence}")))
            .await
            .unwrap();
        assert_eq!(record.scene.sequence_number, sequence);
    }

    let log = store.scene_log(&project).await.unwrap();
    let sequences: Vec<u64> = log.iter().map(|r| r.scene.sequence_number).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(log[1].world_before.current_time, "Day 1");
    assert_eq!(log[1].world_after.current_time, "Day 2");

    let recent = store.recent_scenes(&project, 2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].scene.sequence_number, 2);
}

#[tokio::test]
async fn stale_commit_leaves_memory_unchanged() {
    let store = StoryMemoryStore::in_memory();
    let project = key("salt");
    store.create_project(&project, seed()).await.unwrap();
    for sequence in 1..=5 {
        store
            .commit_scene(&project, commit(sequence, "later"))
            .await
            .unwrap();
    }
    let before = store.read_snapshot(&project).await.unwrap();

    let result = store.commit_scene(&project, commit(5, "replayed")).await;

    assert!(matches!(
        result,
        Err(MemoryError::StaleSnapshot { expected: 6, actual: 5, .. })
    ));
    let after = store.read_snapshot(&project).await.unwrap();
    assert_eq!(before, after);
    assert_eq!(store.scene_log(&project).await.unwrap().len(), 5);
}

#[tokio::test]
async fn concurrent_commits_for_same_sequence_race_safely() {
    let store = Arc::new(StoryMemoryStore::in_memory());
    let project = key("salt");
    store.create_project(&project, seed()).await.unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let store = Arc::clone(&store);
            let project = project.clone();
            tokio::spawn(async move {
                store
                    .commit_scene(&project, commit(1, &format!("writer {i}")))
                    .await
            })
        })
        .collect();

    let mut committed = 0;
    let mut stale = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(MemoryError::StaleSnapshot { .. }) => stale += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(stale, 3);
    assert_eq!(store.read_snapshot(&project).await.unwrap().head_sequence, 1);
}

#[tokio::test]
async fn inconsistent_delta_is_refused_atomically() {
    let store = StoryMemoryStore::in_memory();
    let project = key("salt");
    store.create_project(&project, seed()).await.unwrap();

    let mut request = commit(1, "Day 2");
    request.delta.characters.push(CharacterChange::Update {
        name: "Ines".to_owned(),
        role: None,
        hidden_agenda: None,
        status: Some(StatusTransition {
            from: CharacterStatus::Unknown,
            to: CharacterStatus::Dead,
            cause: "drowned".to_owned(),
        }),
        relationships: Vec::new(),
        appeared: true,
    });

    let result = store.commit_scene(&project, request).await;
    assert!(result.is_err_and(|e| e.is_integrity()));

    let snapshot = store.read_snapshot(&project).await.unwrap();
    assert_eq!(snapshot.head_sequence, 0);
    assert_eq!(snapshot.world.current_time, "Day 1, morning");
    assert_eq!(
        snapshot.characters.get("Ines").map(|c| c.status),
        Some(CharacterStatus::Alive)
    );
}

#[tokio::test]
async fn export_contains_snapshot_and_scenes() {
    let store = StoryMemoryStore::in_memory();
    let project = key("salt");
    store.create_project(&project, seed()).await.unwrap();
    store.commit_scene(&project, commit(1, "Day 2")).await.unwrap();

    let exported = store.export_project(&project).await.unwrap();
    assert_eq!(exported["snapshot"]["head_sequence"], 1);
    assert_eq!(exported["scenes"][0]["scene"]["sequence_number"], 1);
}

// =============================================================================
// SQLite-backed store
// =============================================================================

#[tokio::test]
async fn sqlite_round_trip_survives_store_restart() {
    let (store, db) = sqlite_store().await;
    let project = key("salt");
    store.create_project(&project, seed()).await.unwrap();

    let arc = ArcId::new();
    let mut first = commit(1, "Day 2");
    first.delta.arcs.push(ArcChange::Open {
        id: arc,
        description: "Bram's debt".to_owned(),
    });
    first.delta.characters.push(CharacterChange::Update {
        name: "Ines".to_owned(),
        role: None,
        hidden_agenda: None,
        status: None,
        relationships: Vec::new(),
        appeared: true,
    });
    store.commit_scene(&project, first).await.unwrap();
    store.commit_scene(&project, commit(2, "Day 3")).await.unwrap();
    drop(store);

    let reopened = StoryMemoryStore::with_database(db);
    let snapshot = reopened.read_snapshot(&project).await.unwrap();
    assert_eq!(snapshot.head_sequence, 2);
    assert_eq!(snapshot.world.current_time, "Day 3");
    assert_eq!(snapshot.arcs.len(), 2);
    assert!(snapshot.arcs.contains_key(&arc));
    assert_eq!(
        snapshot.characters.get("Ines").and_then(|c| c.last_seen_scene),
        Some(1)
    );
    assert_eq!(
        snapshot.characters.get("Ines").and_then(|c| c.relationships.get("Bram").cloned()),
        Some("brother".to_owned())
    );

    let log = reopened.scene_log(&project).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].decision.per_rubric_scores.get(&Rubric::Prose), Some(&90));
    assert_eq!(reopened.project_keys().await.unwrap(), vec![project]);
}

#[tokio::test]
async fn sqlite_detects_duplicate_project_across_restarts() {
    let (store, db) = sqlite_store().await;
    store.create_project(&key("salt"), seed()).await.unwrap();
    drop(store);

    let reopened = StoryMemoryStore::with_database(db);
    assert!(matches!(
        reopened.create_project(&key("salt"), seed()).await,
        Err(MemoryError::ProjectExists(_))
    ));
}

#[tokio::test]
async fn sqlite_stale_commit_is_rejected() {
    let (store, _db) = sqlite_store().await;
    let project = key("salt");
    store.create_project(&project, seed()).await.unwrap();
    store.commit_scene(&project, commit(1, "Day 2")).await.unwrap();

    let result = store.commit_scene(&project, commit(1, "again")).await;
    assert!(matches!(result, Err(MemoryError::StaleSnapshot { .. })));
    assert_eq!(store.scene_log(&project).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sqlite_stale_commit_reloads_head_written_by_another_store() {
    let (store_a, db) = sqlite_store().await;
    let store_b = StoryMemoryStore::with_database(db);
    let project = key("salt");
    store_a.create_project(&project, seed()).await.unwrap();
    assert_eq!(store_a.read_snapshot(&project).await.unwrap().head_sequence, 0);

    // Store B loads the project lazily and commits first.
    store_b.commit_scene(&project, commit(1, "Day 2")).await.unwrap();

    let stale = store_a.commit_scene(&project, commit(1, "Day 2, again")).await;
    assert!(matches!(stale, Err(MemoryError::StaleSnapshot { .. })));

    let reread = store_a.read_snapshot(&project).await.unwrap();
    assert_eq!(reread.head_sequence, 1);
    assert_eq!(reread.world.current_time, "Day 2");

    let next = reread.next_sequence();
    store_a.commit_scene(&project, commit(next, "Day 3")).await.unwrap();
    let log = store_a.scene_log(&project).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].decision.scene_sequence, 2);
}
