//! Row-level persistence of projects, bible, ledger, and scene log.
//!
//! All JSON-shaped values (relationships, decisions, transitions) are
//! stored as `TEXT` columns holding `serde_json` output. Writes for one
//! commit happen inside a single transaction guarded by an optimistic
//! `head_sequence` check, so a concurrent writer on another process is
//! detected as [`MemoryError::StaleSnapshot`] and the store reloads the
//! project from the database.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{Sqlite, SqlitePool, Transaction};
use taleforge_types::{
    ArcChange, ArcId, ArcThread, CharacterEntry, MemoryDelta, MemorySnapshot, ProjectKey,
    SceneRecord,
};

use crate::apply::ProjectState;
use crate::error::MemoryError;

/// A row of the `projects` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRow {
    /// Project key.
    pub key: String,
    /// Manuscript title.
    pub title: String,
    /// Last committed sequence number.
    pub head_sequence: i64,
    /// Words committed so far.
    pub total_words: i64,
}

/// A row of the `characters` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct CharacterRow {
    name: String,
    role: String,
    relationships: String,
    hidden_agenda: Option<String>,
    status: String,
    last_seen_scene: Option<i64>,
}

/// A row of the `arc_threads` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct ArcRow {
    id: String,
    description: String,
    status: String,
    introduced_scene: i64,
    resolved_scene: Option<i64>,
}

/// A row of the `scene_log` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct SceneLogRow {
    scene: String,
    text: String,
    word_count: i64,
    decision: String,
    world_before: String,
    world_after: String,
    transitions: String,
    committed_at: String,
}

/// Operations on the story tables.
pub struct ProjectRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ProjectRepository<'a> {
    /// Create a repository bound to a connection pool.
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Projects
    // =========================================================================

    /// Insert a freshly seeded project.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ProjectExists`] if the key is taken.
    pub async fn insert_project(
        &self,
        state: &ProjectState,
        now: DateTime<Utc>,
    ) -> Result<(), MemoryError> {
        let snapshot = &state.snapshot;
        let mut tx = self.pool.begin().await?;

        let existing: Option<(String,)> = sqlx::query_as("SELECT key FROM projects WHERE key = ?")
            .bind(snapshot.project.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Err(MemoryError::ProjectExists(snapshot.project.clone()));
        }

        sqlx::query(
            r"INSERT INTO projects (key, title, head_sequence, total_words, created_at)
              VALUES (?, ?, 0, 0, ?)",
        )
        .bind(snapshot.project.as_str())
        .bind(&snapshot.title)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        upsert_world(&mut tx, snapshot).await?;
        for entry in snapshot.characters.values() {
            upsert_character(&mut tx, &snapshot.project, entry).await?;
        }
        for thread in snapshot.arcs.values() {
            upsert_arc(&mut tx, &snapshot.project, thread).await?;
        }

        tx.commit().await?;
        tracing::debug!(project = %snapshot.project, "inserted project");
        Ok(())
    }

    /// Keys of every persisted project.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Sqlite`] if the query fails.
    pub async fn project_keys(&self) -> Result<Vec<ProjectKey>, MemoryError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM projects ORDER BY key")
            .fetch_all(self.pool)
            .await?;
        rows.into_iter()
            .map(|(key,)| {
                ProjectKey::parse(&key)
                    .map_err(|e| MemoryError::Corrupt(format!("project key {key:?}: {e}")))
            })
            .collect()
    }

    /// Load a project's full state, or `None` if it was never created.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Corrupt`] if a row cannot be decoded.
    pub async fn load_project(&self, key: &ProjectKey) -> Result<Option<ProjectState>, MemoryError> {
        let Some(project) = sqlx::query_as::<_, ProjectRow>(
            "SELECT key, title, head_sequence, total_words FROM projects WHERE key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(self.pool)
        .await?
        else {
            return Ok(None);
        };

        let (world_json,): (String,) =
            sqlx::query_as("SELECT state FROM world_state WHERE project = ?")
                .bind(key.as_str())
                .fetch_one(self.pool)
                .await?;

        let characters = sqlx::query_as::<_, CharacterRow>(
            r"SELECT name, role, relationships, hidden_agenda, status, last_seen_scene
              FROM characters WHERE project = ? ORDER BY name",
        )
        .bind(key.as_str())
        .fetch_all(self.pool)
        .await?
        .into_iter()
        .map(|row| decode_character(row).map(|entry| (entry.name.clone(), entry)))
        .collect::<Result<BTreeMap<_, _>, _>>()?;

        let arcs = sqlx::query_as::<_, ArcRow>(
            r"SELECT id, description, status, introduced_scene, resolved_scene
              FROM arc_threads WHERE project = ?",
        )
        .bind(key.as_str())
        .fetch_all(self.pool)
        .await?
        .into_iter()
        .map(|row| decode_arc(row).map(|thread| (thread.id, thread)))
        .collect::<Result<BTreeMap<_, _>, _>>()?;

        let log = sqlx::query_as::<_, SceneLogRow>(
            r"SELECT scene, text, word_count, decision, world_before, world_after,
                     transitions, committed_at
              FROM scene_log WHERE project = ? ORDER BY sequence ASC",
        )
        .bind(key.as_str())
        .fetch_all(self.pool)
        .await?
        .into_iter()
        .map(|row| decode_scene(key, row).map(Arc::new))
        .collect::<Result<Vec<_>, _>>()?;

        let snapshot = MemorySnapshot {
            project: key.clone(),
            title: project.title,
            world: serde_json::from_str(&world_json)?,
            characters,
            arcs,
            head_sequence: to_u64(project.head_sequence)?,
            total_words: to_u64(project.total_words)?,
        };

        Ok(Some(ProjectState {
            snapshot: Arc::new(snapshot),
            log,
        }))
    }

    // =========================================================================
    // Commits
    // =========================================================================

    /// Persist one applied commit atomically.
    ///
    /// Only characters and threads touched by `delta` are rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::StaleSnapshot`] if the persisted head moved
    /// since the commit was validated. Nothing is written in that case.
    pub async fn persist_commit(
        &self,
        record: &SceneRecord,
        snapshot: &MemorySnapshot,
        delta: &MemoryDelta,
    ) -> Result<(), MemoryError> {
        let sequence = record.scene.sequence_number;
        let previous = to_i64(sequence.saturating_sub(1))?;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r"UPDATE projects SET head_sequence = ?, total_words = ?
              WHERE key = ? AND head_sequence = ?",
        )
        .bind(to_i64(sequence)?)
        .bind(to_i64(snapshot.total_words)?)
        .bind(snapshot.project.as_str())
        .bind(previous)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let (actual_head,): (i64,) =
                sqlx::query_as("SELECT head_sequence FROM projects WHERE key = ?")
                    .bind(snapshot.project.as_str())
                    .fetch_one(&mut *tx)
                    .await?;
            return Err(MemoryError::StaleSnapshot {
                project: snapshot.project.clone(),
                expected: to_u64(actual_head)?.saturating_add(1),
                actual: sequence,
            });
        }

        upsert_world(&mut tx, snapshot).await?;

        let touched: BTreeSet<&str> = delta.characters.iter().map(|c| c.name().trim()).collect();
        for name in touched {
            if let Some(entry) = snapshot.characters.get(name) {
                upsert_character(&mut tx, &snapshot.project, entry).await?;
            }
        }

        let threads: BTreeSet<ArcId> = delta.arcs.iter().map(ArcChange::id).collect();
        for id in threads {
            if let Some(thread) = snapshot.arcs.get(&id) {
                upsert_arc(&mut tx, &snapshot.project, thread).await?;
            }
        }

        sqlx::query(
            r"INSERT INTO scene_log
              (project, sequence, scene, text, word_count, decision, world_before,
               world_after, transitions, committed_at)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(snapshot.project.as_str())
        .bind(to_i64(sequence)?)
        .bind(serde_json::to_string(&record.scene)?)
        .bind(&record.text)
        .bind(to_i64(record.word_count)?)
        .bind(serde_json::to_string(&record.decision)?)
        .bind(serde_json::to_string(&record.world_before)?)
        .bind(serde_json::to_string(&record.world_after)?)
        .bind(serde_json::to_string(&record.transitions)?)
        .bind(record.committed_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(project = %snapshot.project, sequence, "persisted scene commit");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Upserts
// ---------------------------------------------------------------------------

async fn upsert_world(
    tx: &mut Transaction<'_, Sqlite>,
    snapshot: &MemorySnapshot,
) -> Result<(), MemoryError> {
    sqlx::query(
        r"INSERT INTO world_state (project, state, updated_scene) VALUES (?, ?, ?)
          ON CONFLICT (project) DO UPDATE SET
            state = excluded.state,
            updated_scene = excluded.updated_scene",
    )
    .bind(snapshot.project.as_str())
    .bind(serde_json::to_string(&snapshot.world)?)
    .bind(to_i64(snapshot.head_sequence)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_character(
    tx: &mut Transaction<'_, Sqlite>,
    project: &ProjectKey,
    entry: &CharacterEntry,
) -> Result<(), MemoryError> {
    sqlx::query(
        r"INSERT INTO characters
          (project, name, role, relationships, hidden_agenda, status, last_seen_scene)
          VALUES (?, ?, ?, ?, ?, ?, ?)
          ON CONFLICT (project, name) DO UPDATE SET
            role = excluded.role,
            relationships = excluded.relationships,
            hidden_agenda = excluded.hidden_agenda,
            status = excluded.status,
            last_seen_scene = excluded.last_seen_scene",
    )
    .bind(project.as_str())
    .bind(&entry.name)
    .bind(&entry.role)
    .bind(serde_json::to_string(&entry.relationships)?)
    .bind(entry.hidden_agenda.as_deref())
    .bind(enum_to_text(&entry.status)?)
    .bind(entry.last_seen_scene.map(to_i64).transpose()?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_arc(
    tx: &mut Transaction<'_, Sqlite>,
    project: &ProjectKey,
    thread: &ArcThread,
) -> Result<(), MemoryError> {
    sqlx::query(
        r"INSERT INTO arc_threads
          (project, id, description, status, introduced_scene, resolved_scene)
          VALUES (?, ?, ?, ?, ?, ?)
          ON CONFLICT (project, id) DO UPDATE SET
            description = excluded.description,
            status = excluded.status,
            resolved_scene = excluded.resolved_scene",
    )
    .bind(project.as_str())
    .bind(thread.id.to_string())
    .bind(&thread.description)
    .bind(thread.status.as_str())
    .bind(to_i64(thread.introduced_scene)?)
    .bind(thread.resolved_scene.map(to_i64).transpose()?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn decode_character(row: CharacterRow) -> Result<CharacterEntry, MemoryError> {
    Ok(CharacterEntry {
        relationships: serde_json::from_str(&row.relationships)?,
        status: text_to_enum(&row.status)?,
        last_seen_scene: row.last_seen_scene.map(to_u64).transpose()?,
        name: row.name,
        role: row.role,
        hidden_agenda: row.hidden_agenda,
    })
}

fn decode_arc(row: ArcRow) -> Result<ArcThread, MemoryError> {
    Ok(ArcThread {
        id: row
            .id
            .parse()
            .map_err(|e| MemoryError::Corrupt(format!("arc id {:?}: {e}", row.id)))?,
        status: text_to_enum(&row.status)?,
        introduced_scene: to_u64(row.introduced_scene)?,
        resolved_scene: row.resolved_scene.map(to_u64).transpose()?,
        description: row.description,
    })
}

fn decode_scene(project: &ProjectKey, row: SceneLogRow) -> Result<SceneRecord, MemoryError> {
    let committed_at = DateTime::parse_from_rfc3339(&row.committed_at)
        .map_err(|e| MemoryError::Corrupt(format!("committed_at {:?}: {e}", row.committed_at)))?
        .with_timezone(&Utc);
    Ok(SceneRecord {
        project: project.clone(),
        scene: serde_json::from_str(&row.scene)?,
        text: row.text,
        word_count: to_u64(row.word_count)?,
        decision: serde_json::from_str(&row.decision)?,
        world_before: serde_json::from_str(&row.world_before)?,
        world_after: serde_json::from_str(&row.world_after)?,
        transitions: serde_json::from_str(&row.transitions)?,
        committed_at,
    })
}

/// Store a unit-variant enum by its serde name.
fn enum_to_text<T: Serialize>(value: &T) -> Result<String, MemoryError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(MemoryError::Corrupt(format!("expected string enum, got {other}"))),
    }
}

/// Read a unit-variant enum back from its serde name.
fn text_to_enum<T: DeserializeOwned>(text: &str) -> Result<T, MemoryError> {
    Ok(serde_json::from_value(serde_json::Value::String(text.to_owned()))?)
}

fn to_i64(value: u64) -> Result<i64, MemoryError> {
    i64::try_from(value).map_err(|e| MemoryError::Corrupt(format!("{value} exceeds i64: {e}")))
}

fn to_u64(value: i64) -> Result<u64, MemoryError> {
    u64::try_from(value).map_err(|e| MemoryError::Corrupt(format!("negative counter {value}: {e}")))
}
