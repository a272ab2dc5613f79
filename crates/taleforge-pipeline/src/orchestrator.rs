//! The per-scene state machine.
//!
//! [`SceneOrchestrator::produce_scene`] drives one scene from `Idle` to
//! `Committed` or `Failed`:
//!
//! - **Context**: read the memory snapshot and the last few scenes
//! - **Drafting**: fan out N drafts; too few survivors retries the attempt
//! - **Scoring**: fan out one critic call per (draft, rubric)
//! - **Deciding**: accept, revise once, or reject and redraft
//! - **Committing**: extract the world update, commit atomically, retrying
//!   once against a fresh snapshot on an integrity error
//!
//! Every transition goes through the project's [`ControlHandle`], which
//! validates it and applies any pending cancel. Requests for the same
//! project queue on the handle's lease; different projects run
//! concurrently.

use std::sync::Arc;

use taleforge_gateway::Provider;
use taleforge_memory::StoryMemoryStore;
use taleforge_types::{
    CriticVerdict, Draft, MemorySnapshot, Outcome, PipelineState, ProjectKey, Scene,
    SceneCommit, SceneRecord, SceneRequest, TribunalDecision,
};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::context::SceneContext;
use crate::control::{ControlHandle, ControlRegistry};
use crate::decision::{Round, decide, irreversible_change_of, score_drafts};
use crate::draft::DraftGenerator;
use crate::error::{FailureReason, PipelineError, SceneProductionFailed};
use crate::extractor::{DeltaExtractor, WorldUpdate};
use crate::manuscript::ManuscriptSink;
use crate::prompt::PromptEngine;
use crate::revision::Reviser;
use crate::tribunal::CriticTribunal;

/// Recorded as the scene's irreversible change when no critic named one.
const UNNAMED_CHANGE: &str = "unspecified";

/// Drives scenes through the production pipeline.
///
/// `W` writes drafts, rewrites, and world updates; `C` runs the critics.
/// They may be the same backend.
pub struct SceneOrchestrator<W, C> {
    store: Arc<StoryMemoryStore>,
    prompts: Arc<PromptEngine>,
    drafts: DraftGenerator<Arc<W>>,
    tribunal: CriticTribunal<C>,
    reviser: Reviser<Arc<W>>,
    extractor: DeltaExtractor<Arc<W>>,
    config: PipelineConfig,
    controls: Arc<ControlRegistry>,
    sink: Option<Arc<dyn ManuscriptSink>>,
}

impl<W, C> core::fmt::Debug for SceneOrchestrator<W, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SceneOrchestrator")
            .field("config", &self.config)
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

/// Book-keeping for one `produce_scene` call.
#[derive(Debug)]
struct SceneRun {
    project: ProjectKey,
    sequence: u64,
    attempts: u32,
    last_decision: Option<TribunalDecision>,
    error_chain: Vec<String>,
}

impl SceneRun {
    const fn new(project: ProjectKey) -> Self {
        Self {
            project,
            sequence: 0,
            attempts: 0,
            last_decision: None,
            error_chain: Vec::new(),
        }
    }

    /// Note a recoverable error.
    fn note(&mut self, error: &PipelineError) {
        warn!(
            project = %self.project,
            sequence = self.sequence,
            attempt = self.attempts,
            error = %error,
            "scene stage failed"
        );
        self.error_chain.push(error.to_string());
    }

    /// Note an error that ends the scene.
    fn fatal(&mut self, error: &PipelineError) -> FailureReason {
        self.error_chain.push(error.to_string());
        FailureReason::of(error)
    }

    fn into_failure(self, reason: FailureReason) -> SceneProductionFailed {
        SceneProductionFailed {
            project: self.project,
            sequence: self.sequence,
            reason,
            attempts: self.attempts,
            last_decision: self.last_decision,
            error_chain: self.error_chain,
        }
    }
}

/// The draft the tribunal accepted, with what it was judged on.
struct Accepted {
    winner: Draft,
    decision: TribunalDecision,
    verdicts: Vec<CriticVerdict>,
}

impl<W: Provider, C: Provider> SceneOrchestrator<W, C> {
    /// Wire an orchestrator over `store`.
    pub fn new(
        store: Arc<StoryMemoryStore>,
        writer: W,
        critic: C,
        prompts: Arc<PromptEngine>,
        config: PipelineConfig,
    ) -> Self {
        let writer = Arc::new(writer);
        let timeout = config.orchestration.call_timeout();
        Self {
            drafts: DraftGenerator::new(Arc::clone(&writer), config.drafts.clone(), timeout),
            tribunal: CriticTribunal::new(critic, Arc::clone(&prompts), &config.tribunal, timeout),
            reviser: Reviser::new(
                Arc::clone(&writer),
                Arc::clone(&prompts),
                config.drafts.max_tokens,
                timeout,
            ),
            extractor: DeltaExtractor::new(
                writer,
                Arc::clone(&prompts),
                config.orchestration.extract_max_tokens,
                timeout,
            ),
            store,
            prompts,
            config,
            controls: Arc::new(ControlRegistry::new()),
            sink: None,
        }
    }

    /// Share `controls` with other components (the observer API).
    #[must_use]
    pub fn with_controls(mut self, controls: Arc<ControlRegistry>) -> Self {
        self.controls = controls;
        self
    }

    /// Emit every committed scene to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ManuscriptSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The control registry.
    pub const fn controls(&self) -> &Arc<ControlRegistry> {
        &self.controls
    }

    /// The memory store.
    pub const fn store(&self) -> &Arc<StoryMemoryStore> {
        &self.store
    }

    /// Produce and commit the next scene of `project`.
    ///
    /// Waits for any scene already in flight for the same project.
    ///
    /// # Errors
    ///
    /// Returns [`SceneProductionFailed`] when the scene cannot be produced.
    /// Story memory is unchanged in that case.
    pub async fn produce_scene(
        &self,
        project: &ProjectKey,
        request: &SceneRequest,
    ) -> Result<Arc<SceneRecord>, SceneProductionFailed> {
        let handle = self.controls.handle(project).await;
        let _lease = handle.acquire_lease().await;

        info!(project = %project, goal = %request.goal, "scene production started");
        let mut run = SceneRun::new(project.clone());
        let outcome = self.run_scene(&handle, request, &mut run).await;

        let result = match outcome {
            Ok(record) => {
                handle.record_commit(record.scene.sequence_number).await;
                info!(
                    project = %project,
                    sequence = record.scene.sequence_number,
                    attempt = run.attempts,
                    words = record.word_count,
                    "scene produced"
                );
                self.emit(&handle, &record).await;
                Ok(record)
            }
            Err(reason) => {
                if let Err(e) = handle.advance(PipelineState::Failed).await {
                    debug!(project = %project, error = %e, "already terminal");
                }
                let failure = run.into_failure(reason);
                warn!(
                    project = %project,
                    sequence = failure.sequence,
                    attempts = failure.attempts,
                    reason = %failure.reason,
                    "scene production failed"
                );
                handle.record_failure(failure.to_string()).await;
                Err(failure)
            }
        };
        handle.finish().await;
        result
    }

    async fn run_scene(
        &self,
        handle: &ControlHandle,
        request: &SceneRequest,
        run: &mut SceneRun,
    ) -> Result<Arc<SceneRecord>, FailureReason> {
        Self::step(handle, run, PipelineState::ContextBuilt).await?;
        let (snapshot, context) = self
            .build_context(&run.project, request)
            .await
            .map_err(|e| run.fatal(&e))?;
        run.sequence = context.sequence;

        let accepted = self.select_draft(handle, &context, run).await?;

        // Extraction runs once; an integrity retry only rebuilds the delta.
        let update = self.extractor.extract(&context, &accepted.winner.text).await;
        self.commit(handle, snapshot, &context, accepted, &update, run)
            .await
    }

    /// Draft, score, and decide until a draft is accepted or attempts run out.
    async fn select_draft(
        &self,
        handle: &ControlHandle,
        context: &SceneContext,
        run: &mut SceneRun,
    ) -> Result<Accepted, FailureReason> {
        let prompt = self
            .prompts
            .draft_prompt(context)
            .map_err(|e| run.fatal(&e))?;
        let max_attempts = self.config.orchestration.max_attempts;
        let tribunal = &self.config.tribunal;

        loop {
            run.attempts = run.attempts.saturating_add(1);
            let attempt = run.attempts;
            handle.set_progress(run.sequence, attempt).await;
            Self::step(handle, run, PipelineState::Drafting).await?;

            let mut drafts = match self.drafts.generate(&prompt, attempt).await {
                Ok(drafts) => drafts,
                Err(e @ PipelineError::InsufficientDrafts { .. }) => {
                    run.note(&e);
                    if attempt >= max_attempts {
                        return Err(FailureReason::AttemptsExhausted);
                    }
                    continue;
                }
                Err(e) => return Err(run.fatal(&e)),
            };

            Self::step(handle, run, PipelineState::Scoring).await?;
            let mut verdicts = self
                .tribunal
                .evaluate(context, &drafts)
                .await
                .map_err(|e| run.fatal(&e))?;

            Self::step(handle, run, PipelineState::Deciding).await?;
            let round = Round {
                scene_sequence: run.sequence,
                attempt,
                revision_spent: false,
            };
            let mut decision = decide(score_drafts(&drafts, &verdicts, tribunal), tribunal, round);
            Self::record(handle, run, &decision).await;

            if decision.outcome == Outcome::Revise {
                self.revise_winner(handle, context, &decision, &mut drafts, &mut verdicts, run)
                    .await?;
                Self::step(handle, run, PipelineState::Deciding).await?;
                let round = Round {
                    revision_spent: true,
                    ..round
                };
                decision = decide(score_drafts(&drafts, &verdicts, tribunal), tribunal, round);
                Self::record(handle, run, &decision).await;
            }

            match decision.outcome {
                Outcome::Accept => {
                    let winner = decision
                        .winning_draft_id
                        .and_then(|id| drafts.iter().find(|d| d.draft_id == id))
                        .cloned();
                    if let Some(winner) = winner {
                        return Ok(Accepted {
                            winner,
                            decision,
                            verdicts,
                        });
                    }
                    return Err(run.fatal(&PipelineError::IllegalTransition {
                        from: PipelineState::Deciding,
                        to: PipelineState::Committing,
                    }));
                }
                Outcome::Revise | Outcome::Reject => {
                    run.error_chain.push(format!(
                        "attempt {attempt} rejected: best aggregate {}",
                        decision.aggregate_score
                    ));
                    info!(
                        project = %run.project,
                        sequence = run.sequence,
                        attempt,
                        aggregate = %decision.aggregate_score,
                        "attempt rejected"
                    );
                    if attempt >= max_attempts {
                        return Err(FailureReason::AttemptsExhausted);
                    }
                }
            }
        }
    }

    /// Rewrite the winner once and re-score only the rewrite.
    ///
    /// The rewrite replaces the winner in `drafts` and its verdicts replace
    /// the winner's. A failed rewrite leaves both untouched.
    async fn revise_winner(
        &self,
        handle: &ControlHandle,
        context: &SceneContext,
        decision: &TribunalDecision,
        drafts: &mut [Draft],
        verdicts: &mut Vec<CriticVerdict>,
        run: &mut SceneRun,
    ) -> Result<(), FailureReason> {
        Self::step(handle, run, PipelineState::Revising).await?;
        let slot = decision
            .winning_draft_id
            .and_then(|id| drafts.iter().position(|d| d.draft_id == id));
        let revised = match slot.and_then(|i| drafts.get(i)) {
            Some(winner) => self.reviser.revise(context, winner, verdicts.as_slice()).await,
            None => Err(PipelineError::RevisionFailed("winner not among drafts".to_owned())),
        };

        Self::step(handle, run, PipelineState::Scoring).await?;
        let (revised, original) = match (revised, slot.and_then(|i| drafts.get_mut(i))) {
            (Ok(revised), Some(original)) => (revised, original),
            (Err(e), _) => {
                run.note(&e);
                return Ok(());
            }
            (Ok(_), None) => return Ok(()),
        };

        let fresh = self
            .tribunal
            .evaluate(context, std::slice::from_ref(&revised))
            .await
            .map_err(|e| run.fatal(&e))?;
        let replaced = original.draft_id;
        verdicts.retain(|v| v.draft_id != replaced);
        verdicts.extend(fresh);
        *original = revised;
        Ok(())
    }

    /// Commit the accepted draft, retrying once against a fresh snapshot.
    async fn commit(
        &self,
        handle: &ControlHandle,
        mut snapshot: Arc<MemorySnapshot>,
        context: &SceneContext,
        accepted: Accepted,
        update: &WorldUpdate,
        run: &mut SceneRun,
    ) -> Result<Arc<SceneRecord>, FailureReason> {
        let Accepted {
            winner,
            mut decision,
            verdicts,
        } = accepted;
        let change = irreversible_change_of(&verdicts, &winner)
            .unwrap_or(UNNAMED_CHANGE)
            .to_owned();
        let mut retried = false;

        loop {
            Self::step(handle, run, PipelineState::Committing).await?;
            let sequence = snapshot.next_sequence();
            decision.scene_sequence = sequence;
            run.sequence = sequence;

            let cause = format!("scene {sequence}: {}", context.goal);
            let commit = SceneCommit {
                scene: Scene {
                    sequence_number: sequence,
                    goal: context.goal.clone(),
                    before_state: snapshot.world.summary(),
                    after_state: context.after_state.clone(),
                    irreversible_change: change.clone(),
                    pov_mode: context.pov_mode.clone(),
                    accepted_draft_id: winner.draft_id,
                },
                text: winner.text.clone(),
                decision: decision.clone(),
                delta: update.to_delta(&snapshot, &cause),
            };

            match self.store.commit_scene(&run.project, commit).await {
                Ok(record) => {
                    Self::step(handle, run, PipelineState::Committed).await?;
                    return Ok(record);
                }
                Err(e) if e.is_integrity() && !retried => {
                    retried = true;
                    run.note(&PipelineError::Memory(e));
                    Self::step(handle, run, PipelineState::ContextBuilt).await?;
                    snapshot = self
                        .store
                        .read_snapshot(&run.project)
                        .await
                        .map_err(|e| run.fatal(&PipelineError::Memory(e)))?;
                    info!(
                        project = %run.project,
                        head = snapshot.head_sequence,
                        "snapshot re-read, retrying commit"
                    );
                }
                Err(e) => return Err(run.fatal(&PipelineError::Memory(e))),
            }
        }
    }

    async fn build_context(
        &self,
        project: &ProjectKey,
        request: &SceneRequest,
    ) -> Result<(Arc<MemorySnapshot>, SceneContext), PipelineError> {
        let snapshot = self.store.read_snapshot(project).await?;
        let recent = self
            .store
            .recent_scenes(project, self.config.orchestration.recent_scenes)
            .await?;
        let context = SceneContext::build(
            &snapshot,
            &recent,
            request,
            self.config.orchestration.excerpt_chars,
        );
        debug!(
            project = %project,
            sequence = context.sequence,
            characters = context.roster.len(),
            open_arcs = context.open_arcs.len(),
            "scene context built"
        );
        Ok((snapshot, context))
    }

    async fn record(handle: &ControlHandle, run: &mut SceneRun, decision: &TribunalDecision) {
        info!(
            project = %run.project,
            sequence = run.sequence,
            attempt = decision.attempt,
            outcome = ?decision.outcome,
            aggregate = %decision.aggregate_score,
            revised = decision.revised,
            degraded = decision.is_degraded(),
            "tribunal decision"
        );
        handle.record_decision(decision).await;
        run.last_decision = Some(decision.clone());
    }

    async fn emit(&self, handle: &ControlHandle, record: &SceneRecord) {
        let Some(sink) = &self.sink else {
            return;
        };
        let title = match self.store.read_snapshot(handle.project()).await {
            Ok(snapshot) => snapshot.title.clone(),
            Err(e) => {
                warn!(project = %handle.project(), error = %e, "manuscript title unavailable");
                return;
            }
        };
        if let Err(e) = sink.append(record, &title) {
            warn!(
                project = %handle.project(),
                sequence = record.scene.sequence_number,
                error = %e,
                "manuscript emission failed"
            );
        }
    }

    async fn step(
        handle: &ControlHandle,
        run: &mut SceneRun,
        next: PipelineState,
    ) -> Result<(), FailureReason> {
        match handle.advance(next).await {
            Ok(from) => {
                debug!(
                    project = %run.project,
                    sequence = run.sequence,
                    attempt = run.attempts,
                    state = %next,
                    %from,
                    "state"
                );
                Ok(())
            }
            Err(e) => {
                if matches!(e, PipelineError::Cancelled(_)) {
                    info!(project = %run.project, sequence = run.sequence, "scene cancelled");
                }
                Err(run.fatal(&e))
            }
        }
    }
}
