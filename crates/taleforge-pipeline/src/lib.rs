//! Scene production pipeline for Taleforge.
//!
//! One scene request goes through draft fan-out, a critic tribunal, an
//! accept/revise/reject decision, and an atomic commit into story memory.
//! [`SceneOrchestrator`] runs that state machine; everything it calls is a
//! separate, independently testable stage.
//!
//! # Architecture
//!
//! ```text
//! SceneRequest --> context --> DraftGenerator (N) --> CriticTribunal (N x 3)
//!                                                          |
//!            StoryMemoryStore <-- DeltaExtractor <-- decide (accept/revise/reject)
//! ```
//!
//! # Modules
//!
//! - [`orchestrator`] -- [`SceneOrchestrator`], the per-scene state machine
//! - [`control`] -- Per-project state, cancel, and lease
//! - [`draft`] -- Parallel draft generation
//! - [`tribunal`] -- Parallel critic evaluation
//! - [`decision`] -- Aggregation and the decision policy
//! - [`revision`] -- Single targeted rewrite
//! - [`lint`] -- Deterministic style and character-drift lint
//! - [`extractor`] -- World-update extraction and delta building
//! - [`context`] -- Scene context assembly
//! - [`prompt`] -- Prompt templates
//! - [`sanitize`] -- Draft text cleanup
//! - [`manuscript`] -- Manuscript emission
//! - [`config`] -- [`PipelineConfig`]
//! - [`error`] -- [`PipelineError`], [`SceneProductionFailed`]

pub mod config;
pub mod context;
pub mod control;
pub mod decision;
pub mod draft;
pub mod error;
pub mod extractor;
pub mod lint;
pub mod manuscript;
pub mod orchestrator;
pub mod prompt;
pub mod revision;
pub mod sanitize;
pub mod tribunal;

pub use config::{DraftConfig, OrchestrationConfig, PipelineConfig, RubricWeights, TribunalConfig};
pub use context::SceneContext;
pub use control::{ControlHandle, ControlRegistry, ControlStatus};
pub use decision::{Round, decide, score_drafts, select_winner};
pub use draft::DraftGenerator;
pub use error::{CancelRefused, ConfigError, FailureReason, PipelineError, SceneProductionFailed};
pub use extractor::{DeltaExtractor, WorldUpdate};
pub use lint::{LintFinding, LintKind, LintReport, lint_draft};
pub use manuscript::{ManuscriptSink, MarkdownManuscript};
pub use orchestrator::SceneOrchestrator;
pub use prompt::PromptEngine;
pub use revision::Reviser;
pub use tribunal::CriticTribunal;
