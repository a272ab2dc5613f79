//! Error types for the scene production pipeline.
//!
//! Stage failures are [`PipelineError`]s; the orchestrator decides which of
//! them are retried. Whatever ends a scene for good surfaces to the caller as
//! one [`SceneProductionFailed`] carrying the reason, the last tribunal
//! decision, and the chain of errors seen along the way.

use taleforge_gateway::ProviderError;
use taleforge_memory::MemoryError;
use taleforge_types::{PipelineState, ProjectKey, TribunalDecision};

/// Errors raised by individual pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Fewer drafts survived than the configured minimum.
    #[error("insufficient drafts: {succeeded} of {required} required succeeded")]
    InsufficientDrafts {
        /// Drafts that produced usable text.
        succeeded: usize,
        /// Configured minimum.
        required: usize,
        /// One entry per failed producer.
        failures: Vec<String>,
    },

    /// The provider refused every draft request outright.
    #[error("provider rejected every draft request: {0}")]
    ProviderRejected(ProviderError),

    /// The targeted rewrite of the winning draft produced nothing usable.
    #[error("revision failed: {0}")]
    RevisionFailed(String),

    /// A prompt template failed to load or render.
    #[error("template error: {0}")]
    Template(String),

    /// A memory store operation failed.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// The state machine was asked to make an illegal move.
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Current state.
        from: PipelineState,
        /// Requested state.
        to: PipelineState,
    },

    /// An operator cancelled the scene.
    #[error("cancelled by operator in state {0}")]
    Cancelled(PipelineState),
}

/// Why a scene could not be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Every attempt was rejected or short of drafts.
    AttemptsExhausted,
    /// The commit hit a second integrity error after re-reading the snapshot.
    IntegrityConflict,
    /// The memory store could not be read or written.
    StoreUnavailable,
    /// The provider refused every request.
    ProviderFailure,
    /// A prompt template is broken.
    Template,
    /// An operator cancelled the scene.
    Cancelled,
    /// The orchestrator attempted an illegal state transition.
    IllegalTransition,
}

impl FailureReason {
    /// Classify a stage error that ended a scene.
    pub const fn of(error: &PipelineError) -> Self {
        match error {
            PipelineError::InsufficientDrafts { .. } | PipelineError::RevisionFailed(_) => {
                Self::AttemptsExhausted
            }
            PipelineError::ProviderRejected(_) => Self::ProviderFailure,
            PipelineError::Template(_) => Self::Template,
            PipelineError::Memory(memory) => {
                if memory.is_integrity() {
                    Self::IntegrityConflict
                } else {
                    Self::StoreUnavailable
                }
            }
            PipelineError::IllegalTransition { .. } => Self::IllegalTransition,
            PipelineError::Cancelled(_) => Self::Cancelled,
        }
    }
}

impl core::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            Self::AttemptsExhausted => "attempts exhausted",
            Self::IntegrityConflict => "integrity conflict",
            Self::StoreUnavailable => "store unavailable",
            Self::ProviderFailure => "provider failure",
            Self::Template => "template error",
            Self::Cancelled => "cancelled",
            Self::IllegalTransition => "illegal transition",
        };
        f.write_str(text)
    }
}

/// Fatal outcome of one scene production request.
///
/// Story memory is untouched when this is returned: the only mutation the
/// pipeline performs is the atomic commit, and a failed scene never
/// reached it (or the commit itself was refused).
#[derive(Debug, thiserror::Error)]
#[error("scene {sequence} of {project} failed after {attempts} attempt(s): {reason}")]
pub struct SceneProductionFailed {
    /// Project the scene belonged to.
    pub project: ProjectKey,
    /// Sequence number the scene would have taken.
    pub sequence: u64,
    /// Classification of the final error.
    pub reason: FailureReason,
    /// Production attempts started.
    pub attempts: u32,
    /// Most recent tribunal decision, if scoring ever completed.
    pub last_decision: Option<TribunalDecision>,
    /// Every stage error seen, oldest first.
    pub error_chain: Vec<String>,
}

/// A cancel request arrived while the scene was committing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot cancel {project} while {state}")]
pub struct CancelRefused {
    /// Project whose scene is in flight.
    pub project: ProjectKey,
    /// State the scene was in.
    pub state: PipelineState,
}

/// Errors that can occur when loading pipeline configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is out of range or contradicts another.
    #[error("invalid pipeline config: {source}")]
    Invalid {
        /// Field-level validation failures.
        #[from]
        source: validator::ValidationErrors,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}
