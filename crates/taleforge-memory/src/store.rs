//! The story memory store: exclusive owner of every project's state.
//!
//! # Concurrency
//!
//! Each project has a slot holding an `Arc` of its last committed state
//! behind a read/write lock, plus a writer mutex. Readers clone the `Arc`
//! and never wait on a commit in progress. Commits take the writer mutex,
//! validate against the current state, persist, and only then swap the
//! `Arc`, so readers see either the old state or the new one, never a mix.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use taleforge_types::{MemorySnapshot, ProjectKey, ProjectSeed, SceneCommit, SceneRecord};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::apply::{ProjectState, apply_commit, seed_state};
use crate::db::MemoryDb;
use crate::error::MemoryError;
use crate::repository::ProjectRepository;

/// Per-project state slot.
#[derive(Debug)]
struct ProjectSlot {
    /// Serializes commits for this project.
    writer: Mutex<()>,
    /// Last committed state.
    current: RwLock<Arc<ProjectState>>,
}

impl ProjectSlot {
    fn new(state: ProjectState) -> Self {
        Self {
            writer: Mutex::new(()),
            current: RwLock::new(Arc::new(state)),
        }
    }

    async fn state(&self) -> Arc<ProjectState> {
        Arc::clone(&*self.current.read().await)
    }
}

/// Durable, queryable story memory for any number of projects.
#[derive(Debug)]
pub struct StoryMemoryStore {
    projects: RwLock<BTreeMap<ProjectKey, Arc<ProjectSlot>>>,
    db: Option<MemoryDb>,
}

impl StoryMemoryStore {
    /// A store that keeps everything in process memory.
    pub fn in_memory() -> Self {
        Self {
            projects: RwLock::new(BTreeMap::new()),
            db: None,
        }
    }

    /// A store backed by `SQLite`. Projects load lazily on first access.
    pub fn with_database(db: MemoryDb) -> Self {
        Self {
            projects: RwLock::new(BTreeMap::new()),
            db: Some(db),
        }
    }

    /// Create a project from its seed.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ProjectExists`] if the key is taken, or
    /// [`MemoryError::InvalidSeed`] if the seed is unusable.
    pub async fn create_project(
        &self,
        key: &ProjectKey,
        seed: ProjectSeed,
    ) -> Result<Arc<MemorySnapshot>, MemoryError> {
        let state = seed_state(key, seed)?;
        let mut projects = self.projects.write().await;
        if projects.contains_key(key) {
            return Err(MemoryError::ProjectExists(key.clone()));
        }
        if let Some(db) = &self.db {
            ProjectRepository::new(db.pool())
                .insert_project(&state, Utc::now())
                .await?;
        }
        let snapshot = Arc::clone(&state.snapshot);
        projects.insert(key.clone(), Arc::new(ProjectSlot::new(state)));
        info!(
            project = %key,
            characters = snapshot.characters.len(),
            arcs = snapshot.arcs.len(),
            "project created"
        );
        Ok(snapshot)
    }

    /// Current snapshot of a project. Never blocks on a commit in progress.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::UnknownProject`] if no such project exists.
    pub async fn read_snapshot(&self, key: &ProjectKey) -> Result<Arc<MemorySnapshot>, MemoryError> {
        let slot = self.slot(key).await?;
        Ok(Arc::clone(&slot.state().await.snapshot))
    }

    /// Atomically commit one accepted scene.
    ///
    /// World overwrite, bible updates, ledger updates, and the scene log
    /// append all land together or not at all.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::StaleSnapshot`] if the sequence number is not head + 1
    /// - [`MemoryError::InconsistentStateTransition`] if the delta contradicts
    ///   recorded state
    /// - [`MemoryError::Sqlite`] if persistence fails (memory is unchanged)
    ///
    /// When `SQLite` shows that another writer committed first, the project
    /// is reloaded from the database before the `StaleSnapshot` is returned,
    /// so a re-read snapshot reflects the persisted head.
    pub async fn commit_scene(
        &self,
        key: &ProjectKey,
        commit: SceneCommit,
    ) -> Result<Arc<SceneRecord>, MemoryError> {
        let slot = self.slot(key).await?;
        let _writer = slot.writer.lock().await;

        let current = slot.state().await;
        let applied = match apply_commit(&current, &commit, Utc::now()) {
            Ok(applied) => applied,
            Err(e) => {
                warn!(
                    project = %key,
                    sequence = commit.scene.sequence_number,
                    error = %e,
                    "scene commit refused"
                );
                return Err(e);
            }
        };

        if let Some(db) = &self.db {
            let repository = ProjectRepository::new(db.pool());
            if let Err(e) = repository
                .persist_commit(&applied.record, &applied.state.snapshot, &commit.delta)
                .await
            {
                if matches!(e, MemoryError::StaleSnapshot { .. }) {
                    // Another writer moved the persisted head; adopt its state
                    // so the next snapshot read sees the real head.
                    if let Some(fresh) = repository.load_project(key).await? {
                        info!(
                            project = %key,
                            head = fresh.snapshot.head_sequence,
                            "project reloaded from SQLite after stale commit"
                        );
                        *slot.current.write().await = Arc::new(fresh);
                    }
                }
                return Err(e);
            }
        }

        *slot.current.write().await = Arc::new(applied.state);

        info!(
            project = %key,
            sequence = applied.record.scene.sequence_number,
            words = applied.record.word_count,
            transitions = applied.record.transitions.len(),
            "scene committed"
        );
        Ok(applied.record)
    }

    /// The last `count` committed scenes, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::UnknownProject`] if no such project exists.
    pub async fn recent_scenes(
        &self,
        key: &ProjectKey,
        count: usize,
    ) -> Result<Vec<Arc<SceneRecord>>, MemoryError> {
        let state = self.slot(key).await?.state().await;
        let skip = state.log.len().saturating_sub(count);
        Ok(state.log.iter().skip(skip).cloned().collect())
    }

    /// The full scene log, ordered by sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::UnknownProject`] if no such project exists.
    pub async fn scene_log(&self, key: &ProjectKey) -> Result<Vec<Arc<SceneRecord>>, MemoryError> {
        Ok(self.slot(key).await?.state().await.log.clone())
    }

    /// Keys of every known project, in order.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Sqlite`] if the persisted key list cannot be read.
    pub async fn project_keys(&self) -> Result<Vec<ProjectKey>, MemoryError> {
        let mut keys: Vec<ProjectKey> = self.projects.read().await.keys().cloned().collect();
        if let Some(db) = &self.db {
            keys.extend(ProjectRepository::new(db.pool()).project_keys().await?);
            keys.sort();
            keys.dedup();
        }
        Ok(keys)
    }

    /// The whole project (snapshot and log) as one JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::UnknownProject`] or a serialization error.
    pub async fn export_project(&self, key: &ProjectKey) -> Result<serde_json::Value, MemoryError> {
        let state = self.slot(key).await?.state().await;
        let scenes: Vec<&SceneRecord> = state.log.iter().map(AsRef::as_ref).collect();
        Ok(serde_json::json!({
            "snapshot": serde_json::to_value(state.snapshot.as_ref())?,
            "scenes": serde_json::to_value(scenes)?,
        }))
    }

    /// Find a project's slot, loading it from `SQLite` on first access.
    async fn slot(&self, key: &ProjectKey) -> Result<Arc<ProjectSlot>, MemoryError> {
        if let Some(slot) = self.projects.read().await.get(key) {
            return Ok(Arc::clone(slot));
        }

        let Some(db) = &self.db else {
            return Err(MemoryError::UnknownProject(key.clone()));
        };
        let state = ProjectRepository::new(db.pool())
            .load_project(key)
            .await?
            .ok_or_else(|| MemoryError::UnknownProject(key.clone()))?;

        let head = state.snapshot.head_sequence;
        let mut projects = self.projects.write().await;
        let slot = projects
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ProjectSlot::new(state)));
        info!(project = %key, head, "project loaded from SQLite");
        Ok(Arc::clone(slot))
    }
}
