//! Story memory for the Taleforge pipeline.
//!
//! The store is the only owner of world state, the character bible, the
//! arc ledger, and the scene log. It changes state only through
//! [`StoryMemoryStore::commit_scene`], which is atomic and serialized per
//! project, while reads proceed concurrently against the last committed
//! snapshot.
//!
//! # Modules
//!
//! - [`apply`] -- Pure commit validation and application
//! - [`store`] -- [`StoryMemoryStore`], locking and lazy loading
//! - [`db`] -- `SQLite` pool and migrations
//! - [`repository`] -- Row-level persistence
//! - [`error`] -- [`MemoryError`]

pub mod apply;
pub mod db;
pub mod error;
pub mod repository;
pub mod store;

pub use apply::{Applied, ProjectState, apply_commit, seed_state};
pub use db::{DbConfig, MemoryDb};
pub use error::MemoryError;
pub use repository::ProjectRepository;
pub use store::StoryMemoryStore;
