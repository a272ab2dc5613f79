//! Observer API for the Taleforge scene pipeline.
//!
//! An Axum HTTP server that exposes, per project:
//!
//! - the current state-machine state and progress
//! - the current world state, character bible, and arc ledger
//! - the last tribunal decision and the recent scene log
//! - a cancel signal for the scene in flight
//!
//! None of this is part of the pipeline's correctness: the observer reads
//! the same [`StoryMemoryStore`](taleforge_memory::StoryMemoryStore) and
//! [`ControlRegistry`](taleforge_pipeline::ControlRegistry) the
//! orchestrator uses, and its only write is the cancel flag.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;

pub use error::ObserverError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use state::AppState;
