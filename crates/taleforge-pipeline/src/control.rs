//! Per-project control state shared with the dashboard.
//!
//! Each project gets one [`ControlHandle`]: the orchestrator writes the
//! current state, decision, and failure into it, and the observer API reads
//! them back and forwards cancel requests. The handle also owns the
//! project's production lease, a FIFO [`Mutex`] that serializes scene
//! requests for the same project.
//!
//! # Cancellation
//!
//! [`ControlHandle::cancel`] only raises a flag. The orchestrator checks it
//! under the status lock whenever it leaves `Idle`, `ContextBuilt`,
//! `Drafting` or `Scoring`. A cancel raised while deciding or revising is
//! seen at the next such checkpoint; one raised while committing is
//! refused.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use taleforge_types::{PipelineState, ProjectKey, TribunalDecision};
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::error::{CancelRefused, PipelineError};

/// Point-in-time view of one project's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlStatus {
    /// Project key.
    pub project: ProjectKey,
    /// Current state-machine state.
    pub state: PipelineState,
    /// Sequence number of the scene in flight (or last produced).
    pub sequence: Option<u64>,
    /// Current production attempt (0 when idle).
    pub attempt: u32,
    /// Whether a cancel is pending.
    pub cancel_requested: bool,
    /// Most recent tribunal decision.
    pub last_decision: Option<TribunalDecision>,
    /// Most recent fatal failure, rendered.
    pub last_failure: Option<String>,
    /// Sequence number of the last scene this process committed.
    pub last_committed: Option<u64>,
    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
}

/// Shared control state for one project.
#[derive(Debug)]
pub struct ControlHandle {
    project: ProjectKey,
    cancel_requested: AtomicBool,
    status: Mutex<ControlStatus>,
    lease: Mutex<()>,
}

impl ControlHandle {
    /// Create an idle handle.
    pub fn new(project: ProjectKey) -> Self {
        let status = ControlStatus {
            project: project.clone(),
            state: PipelineState::Idle,
            sequence: None,
            attempt: 0,
            cancel_requested: false,
            last_decision: None,
            last_failure: None,
            last_committed: None,
            updated_at: Utc::now(),
        };
        Self {
            project,
            cancel_requested: AtomicBool::new(false),
            status: Mutex::new(status),
            lease: Mutex::new(()),
        }
    }

    /// Project this handle controls.
    pub const fn project(&self) -> &ProjectKey {
        &self.project
    }

    /// Snapshot of the current status.
    pub async fn status(&self) -> ControlStatus {
        let mut status = self.status.lock().await.clone();
        status.cancel_requested = self.is_cancel_requested();
        status
    }

    /// Current state-machine state.
    pub async fn state(&self) -> PipelineState {
        self.status.lock().await.state
    }

    /// Most recent tribunal decision.
    pub async fn last_decision(&self) -> Option<TribunalDecision> {
        self.status.lock().await.last_decision.clone()
    }

    /// Most recent fatal failure.
    pub async fn last_failure(&self) -> Option<String> {
        self.status.lock().await.last_failure.clone()
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Request cancellation of the scene in flight (or the next one).
    ///
    /// # Errors
    ///
    /// Returns [`CancelRefused`] while the scene is committing.
    pub async fn cancel(&self) -> Result<(), CancelRefused> {
        let status = self.status.lock().await;
        if status.state == PipelineState::Committing {
            return Err(CancelRefused {
                project: self.project.clone(),
                state: status.state,
            });
        }
        self.cancel_requested.store(true, Ordering::Release);
        drop(status);
        tracing::info!(project = %self.project, "cancel requested");
        Ok(())
    }

    /// Whether a cancel is pending.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Orchestrator side
    // -----------------------------------------------------------------------

    /// Wait for this project's production lease. Waiters are served FIFO.
    pub async fn acquire_lease(&self) -> MutexGuard<'_, ()> {
        self.lease.lock().await
    }

    /// Move to `next`, honouring a pending cancel.
    ///
    /// The cancel flag is only checked when leaving a cancellable state,
    /// and moves into terminal states always go through.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Cancelled`] if a cancel is pending
    /// - [`PipelineError::IllegalTransition`] if `next` is not reachable
    pub async fn advance(&self, next: PipelineState) -> Result<PipelineState, PipelineError> {
        let mut status = self.status.lock().await;
        let from = status.state;
        let checkpoint = from.is_cancellable() && !next.is_terminal();
        if checkpoint && self.is_cancel_requested() {
            return Err(PipelineError::Cancelled(from));
        }
        if !from.can_transition_to(next) {
            return Err(PipelineError::IllegalTransition { from, to: next });
        }
        status.state = next;
        status.updated_at = Utc::now();
        drop(status);
        tracing::debug!(project = %self.project, %from, to = %next, "state transition");
        Ok(from)
    }

    /// Record the scene and attempt now in flight.
    pub async fn set_progress(&self, sequence: u64, attempt: u32) {
        let mut status = self.status.lock().await;
        status.sequence = Some(sequence);
        status.attempt = attempt;
        status.updated_at = Utc::now();
    }

    /// Record a tribunal decision.
    pub async fn record_decision(&self, decision: &TribunalDecision) {
        let mut status = self.status.lock().await;
        status.last_decision = Some(decision.clone());
        status.updated_at = Utc::now();
    }

    /// Record a committed scene.
    pub async fn record_commit(&self, sequence: u64) {
        let mut status = self.status.lock().await;
        status.last_committed = Some(sequence);
        status.last_failure = None;
        status.updated_at = Utc::now();
    }

    /// Record a fatal failure.
    pub async fn record_failure(&self, failure: String) {
        let mut status = self.status.lock().await;
        status.last_failure = Some(failure);
        status.updated_at = Utc::now();
    }

    /// End the scene: return to `Idle` and clear any pending cancel.
    ///
    /// A scene left in a non-terminal state counts as failed and is
    /// recorded as such.
    pub async fn finish(&self) {
        let mut status = self.status.lock().await;
        if !status.state.is_terminal() {
            tracing::warn!(project = %self.project, state = %status.state, "scene abandoned");
            status.last_failure = Some(format!("abandoned while {}", status.state));
        }
        status.state = PipelineState::Idle;
        status.attempt = 0;
        status.updated_at = Utc::now();
        self.cancel_requested.store(false, Ordering::Release);
    }
}

/// Every project's control handle, created on first use.
#[derive(Debug, Default)]
pub struct ControlRegistry {
    handles: RwLock<BTreeMap<ProjectKey, Arc<ControlHandle>>>,
}

impl ControlRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The handle for `project`, created if missing.
    pub async fn handle(&self, project: &ProjectKey) -> Arc<ControlHandle> {
        if let Some(handle) = self.handles.read().await.get(project) {
            return Arc::clone(handle);
        }
        let mut handles = self.handles.write().await;
        Arc::clone(
            handles
                .entry(project.clone())
                .or_insert_with(|| Arc::new(ControlHandle::new(project.clone()))),
        )
    }

    /// The handle for `project`, if one exists.
    pub async fn get(&self, project: &ProjectKey) -> Option<Arc<ControlHandle>> {
        self.handles.read().await.get(project).cloned()
    }

    /// Status of every known project, in key order.
    pub async fn statuses(&self) -> Vec<ControlStatus> {
        let handles: Vec<Arc<ControlHandle>> =
            self.handles.read().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            statuses.push(handle.status().await);
        }
        statuses
    }
}
