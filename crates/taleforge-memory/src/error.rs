//! Error types for the story memory store.
//!
//! [`MemoryError::is_integrity`] separates the two failures a caller may
//! recover from by re-reading the snapshot and recomputing the delta
//! (`StaleSnapshot`, `InconsistentStateTransition`) from everything else.

use taleforge_types::ProjectKey;

/// Errors that can occur in the memory store.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// No project with this key exists.
    #[error("unknown project: {0}")]
    UnknownProject(ProjectKey),

    /// A project with this key already exists.
    #[error("project already exists: {0}")]
    ProjectExists(ProjectKey),

    /// The commit's sequence number is not head + 1.
    #[error("stale snapshot for {project}: expected sequence {expected}, got {actual}")]
    StaleSnapshot {
        /// Project being committed to.
        project: ProjectKey,
        /// The only sequence number the store would accept.
        expected: u64,
        /// The sequence number the commit carried.
        actual: u64,
    },

    /// A delta contradicts the current bible or ledger.
    #[error("inconsistent state transition for {subject}: {detail}")]
    InconsistentStateTransition {
        /// Character name or arc id the delta targeted.
        subject: String,
        /// What contradicted.
        detail: String,
    },

    /// The commit request itself is malformed (empty text, non-accept decision).
    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    /// A seed could not be turned into a project.
    #[error("invalid project seed: {0}")]
    InvalidSeed(String),

    /// A `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// A `SQLite` migration failed.
    #[error("SQLite migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted row could not be interpreted.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MemoryError {
    /// Whether the caller may recover by re-reading the snapshot and retrying.
    pub const fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::StaleSnapshot { .. } | Self::InconsistentStateTransition { .. }
        )
    }

    /// Shorthand for an [`MemoryError::InconsistentStateTransition`].
    pub fn inconsistent(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InconsistentStateTransition {
            subject: subject.into(),
            detail: detail.into(),
        }
    }
}
