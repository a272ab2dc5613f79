//! Shared application state for the observer API.
//!
//! The observer owns nothing: it reads the memory store the orchestrator
//! commits into and the control registry the orchestrator reports to.

use std::sync::Arc;

use taleforge_memory::StoryMemoryStore;
use taleforge_pipeline::ControlRegistry;
use taleforge_types::ProjectKey;

use crate::error::ObserverError;

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Story memory, read-only from here.
    pub store: Arc<StoryMemoryStore>,
    /// Per-project pipeline control.
    pub controls: Arc<ControlRegistry>,
}

impl AppState {
    /// Wrap the orchestrator's store and control registry.
    pub const fn new(store: Arc<StoryMemoryStore>, controls: Arc<ControlRegistry>) -> Self {
        Self { store, controls }
    }

    /// Parse a path segment and check that the project exists.
    ///
    /// # Errors
    ///
    /// - [`ObserverError::InvalidKey`] if the segment is not a valid key
    /// - [`ObserverError::NotFound`] if no such project exists
    pub async fn project(&self, raw: &str) -> Result<ProjectKey, ObserverError> {
        let key = ProjectKey::parse(raw).map_err(|e| ObserverError::InvalidKey(e.to_string()))?;
        self.store.read_snapshot(&key).await?;
        Ok(key)
    }
}
