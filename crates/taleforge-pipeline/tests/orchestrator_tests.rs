//! Integration tests for [`SceneOrchestrator`].
//!
//! A scripted provider stands in for every model role. It routes on the
//! role line of each system prompt, so one instance can serve as writer,
//! critic, and continuity clerk at once.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing,
    clippy::panic
)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use rust_decimal::Decimal;
use taleforge_gateway::{GenerateOptions, Prompt, Provider, ProviderError};
use taleforge_memory::{MemoryDb, StoryMemoryStore};
use taleforge_pipeline::{
    ControlRegistry, FailureReason, ManuscriptSink, MarkdownManuscript, PipelineConfig,
    PromptEngine, SceneOrchestrator,
};
use taleforge_types::{
    CharacterEntry, CharacterStatus, DraftId, MemoryDelta, Outcome, PipelineState, ProjectKey,
    ProjectSeed, Rubric, Scene, SceneCommit, SceneRecord, SceneRequest, TribunalDecision,
    WorldState,
};

// =============================================================================
// Scripted provider
// =============================================================================

type Hook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;
type Writer = Box<dyn Fn(usize) -> Result<String, ProviderError> + Send + Sync>;
type Critic = Box<dyn Fn(Rubric, &str) -> (u8, &'static str) + Send + Sync>;
type Rewriter = Box<dyn Fn() -> Result<String, ProviderError> + Send + Sync>;

struct Scripted {
    writer: Writer,
    critic: Critic,
    rewrite: Rewriter,
    extract: String,
    on_draft: Option<Hook>,
    before_extract: Option<Hook>,
    writer_calls: AtomicUsize,
    revisions: AtomicUsize,
}

impl Scripted {
    /// Three drafts per attempt: alpha, beta, gamma.
    fn new() -> Self {
        Self {
            writer: Box::new(|i| {
                Ok(match i % 3 {
                    0 => "Alpha. The rope parted and the bridge fell into the gorge.",
                    1 => "Beta. She watched the bridge and felt afraid of it.",
                    _ => "Gamma. Nothing much happened on the bridge that day.",
                }
                .to_owned())
            }),
            critic: Box::new(|rubric, draft| {
                let scores = if draft.starts_with("Alpha") {
                    [90, 92, 88]
                } else if draft.starts_with("Beta") {
                    [70, 65, 95]
                } else {
                    [50, 55, 40]
                };
                (score_for(rubric, scores), "the bridge falls")
            }),
            rewrite: Box::new(|| Ok("Polished. The bridge fell, and took the letter with it.".to_owned())),
            extract: r#"{"current_location": "the far bank", "arcs_opened": ["who cut the rope"]}"#
                .to_owned(),
            on_draft: None,
            before_extract: None,
            writer_calls: AtomicUsize::new(0),
            revisions: AtomicUsize::new(0),
        }
    }

    fn writer_calls(&self) -> usize {
        self.writer_calls.load(Ordering::SeqCst)
    }

    fn revisions(&self) -> usize {
        self.revisions.load(Ordering::SeqCst)
    }
}

fn score_for(rubric: Rubric, scores: [u8; 3]) -> u8 {
    match rubric {
        Rubric::Prose => scores[0],
        Rubric::Redundancy => scores[1],
        Rubric::Arc => scores[2],
    }
}

impl Provider for Scripted {
    fn generate(
        &self,
        prompt: &Prompt,
        _options: &GenerateOptions,
    ) -> impl Future<Output = Result<String, ProviderError>> + Send {
        async move {
            if prompt.system.contains("CONTINUITY CLERK") {
                if let Some(hook) = &self.before_extract {
                    hook().await;
                }
                return Ok(self.extract.clone());
            }
            if prompt.user.contains("PRIORITY FIX") {
                self.revisions.fetch_add(1, Ordering::SeqCst);
                return (self.rewrite)();
            }
            if prompt.system.contains("WRITER") {
                let index = self.writer_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(hook) = &self.on_draft {
                    hook().await;
                }
                return (self.writer)(index);
            }

            let rubric = if prompt.system.contains("PROSE CRITIC") {
                Rubric::Prose
            } else if prompt.system.contains("REDUNDANCY CRITIC") {
                Rubric::Redundancy
            } else {
                Rubric::Arc
            };
            let draft = prompt
                .user
                .rsplit_once("SCENE:\n")
                .map_or(prompt.user.as_str(), |(_, d)| d);
            let (score, claim) = (self.critic)(rubric, draft);
            Ok(format!(
                r#"{{"{rubric}_score": {score}, "{rubric}_fix": "tighten the {rubric}", "irreversible_change": "{claim}"}}"#
            ))
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// =============================================================================
// Helpers
// =============================================================================

type Orchestrator = SceneOrchestrator<Arc<Scripted>, Arc<Scripted>>;

fn key() -> ProjectKey {
    ProjectKey::parse("drowned-bell").unwrap()
}

fn seed() -> ProjectSeed {
    ProjectSeed {
        title: "The Drowned Bell".to_owned(),
        world: WorldState {
            current_time: "Day 1, dusk".to_owned(),
            current_location: "the gorge bridge".to_owned(),
            posture: "wary".to_owned(),
            inventory: vec!["letter".to_owned()],
            active_stakes: vec!["reach the abbey by nightfall".to_owned()],
        },
        characters: vec![CharacterEntry {
            name: "Ines".to_owned(),
            role: "protagonist".to_owned(),
            relationships: BTreeMap::new(),
            hidden_agenda: None,
            status: CharacterStatus::Alive,
            last_seen_scene: None,
        }],
        arcs: vec!["The unsigned letter".to_owned()],
    }
}

fn request() -> SceneRequest {
    SceneRequest {
        goal: "Ines crosses the gorge".to_owned(),
        after_state: "Ines is on the far bank with no way back".to_owned(),
        pov_mode: "close third person".to_owned(),
        diversity_constraints: Vec::new(),
    }
}

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.orchestration.call_timeout_secs = 5;
    config
}

async fn setup(script: Scripted, config: PipelineConfig) -> (Orchestrator, Arc<Scripted>) {
    let store = Arc::new(StoryMemoryStore::in_memory());
    store.create_project(&key(), seed()).await.unwrap();
    let script = Arc::new(script);
    let orchestrator = SceneOrchestrator::new(
        store,
        Arc::clone(&script),
        Arc::clone(&script),
        Arc::new(PromptEngine::builtin().unwrap()),
        config,
    );
    (orchestrator, script)
}

/// An accepted commit for `sequence` made behind the orchestrator's back.
async fn foreign_commit(store: &StoryMemoryStore, sequence: u64) -> SceneCommit {
    let snapshot = store.read_snapshot(&key()).await.unwrap();
    let draft = DraftId::new();
    SceneCommit {
        scene: Scene {
            sequence_number: sequence,
            goal: "someone else's scene".to_owned(),
            before_state: snapshot.world.summary(),
            after_state: "unchanged".to_owned(),
            irreversible_change: "a bell rings".to_owned(),
            pov_mode: "close third person".to_owned(),
            accepted_draft_id: draft,
        },
        text: "A bell rang somewhere below the water.".to_owned(),
        decision: TribunalDecision {
            scene_sequence: sequence,
            attempt: 1,
            winning_draft_id: Some(draft),
            aggregate_score: Decimal::from(90),
            per_rubric_scores: BTreeMap::new(),
            outcome: Outcome::Accept,
            draft_scores: Vec::new(),
            revised: false,
        },
        delta: MemoryDelta::carry_forward(&snapshot.world),
    }
}

// =============================================================================
// Accept / revise / reject
// =============================================================================

#[tokio::test]
async fn accepts_best_draft_and_commits_world_update() {
    let (orchestrator, script) = setup(Scripted::new(), fast_config()).await;

    let record = orchestrator.produce_scene(&key(), &request()).await.unwrap();

    assert_eq!(record.scene.sequence_number, 1);
    assert!(record.text.starts_with("Alpha"));
    assert_eq!(record.scene.irreversible_change, "the bridge falls");
    assert_eq!(record.decision.outcome, Outcome::Accept);
    assert_eq!(record.decision.aggregate_score, Decimal::from(90));
    assert_eq!(record.decision.draft_scores.len(), 3);
    assert_eq!(script.writer_calls(), 3);
    assert_eq!(script.revisions(), 0);

    let snapshot = orchestrator.store().read_snapshot(&key()).await.unwrap();
    assert_eq!(snapshot.head_sequence, 1);
    assert_eq!(snapshot.world.current_location, "the far bank");
    assert!(snapshot.open_arcs().any(|a| a.description == "who cut the rope"));

    let status = orchestrator.controls().handle(&key()).await.status().await;
    assert_eq!(status.state, PipelineState::Idle);
    assert_eq!(status.last_committed, Some(1));
    assert_eq!(
        status.last_decision.map(|d| d.outcome),
        Some(Outcome::Accept)
    );
}

#[tokio::test]
async fn consecutive_scenes_take_consecutive_sequence_numbers() {
    let (orchestrator, _) = setup(Scripted::new(), fast_config()).await;

    let first = orchestrator.produce_scene(&key(), &request()).await.unwrap();
    let second = orchestrator.produce_scene(&key(), &request()).await.unwrap();

    assert_eq!(first.scene.sequence_number, 1);
    assert_eq!(second.scene.sequence_number, 2);
    assert_eq!(second.world_before.current_location, "the far bank");
    let log = orchestrator.store().scene_log(&key()).await.unwrap();
    assert_eq!(log.len(), 2);
}

#[tokio::test]
async fn revise_band_rewrites_winner_once_then_accepts() {
    let mut script = Scripted::new();
    script.critic = Box::new(|rubric, draft| {
        let scores = if draft.starts_with("Polished") {
            [91, 90, 92]
        } else {
            [75, 78, 74]
        };
        (score_for(rubric, scores), "the bridge falls")
    });
    let (orchestrator, script) = setup(script, fast_config()).await;

    let record = orchestrator.produce_scene(&key(), &request()).await.unwrap();

    assert_eq!(script.revisions(), 1);
    assert!(record.text.starts_with("Polished"));
    assert!(record.decision.revised);
    assert_eq!(record.decision.outcome, Outcome::Accept);
    // The rewrite replaced the winner; the other two drafts keep their scores.
    assert_eq!(record.decision.draft_scores.len(), 3);
    assert_eq!(record.decision.draft_scores[0].draft_id, record.scene.accepted_draft_id);
}

#[tokio::test]
async fn failed_rewrite_keeps_original_winner() {
    let mut script = Scripted::new();
    script.critic = Box::new(|rubric, _| (score_for(rubric, [75, 78, 74]), "the bridge falls"));
    script.rewrite = Box::new(|| Err(ProviderError::Timeout(Duration::from_secs(5))));
    let (orchestrator, script) = setup(script, fast_config()).await;

    let record = orchestrator.produce_scene(&key(), &request()).await.unwrap();

    assert_eq!(script.revisions(), 1);
    assert!(record.text.starts_with("Alpha"));
    assert_eq!(record.decision.outcome, Outcome::Accept);
}

#[tokio::test]
async fn exhausted_attempts_fail_without_touching_memory() {
    let mut script = Scripted::new();
    script.critic = Box::new(|rubric, _| (score_for(rubric, [40, 50, 45]), "the bridge falls"));
    let mut config = fast_config();
    config.orchestration.max_attempts = 2;
    let (orchestrator, script) = setup(script, config).await;
    let before = orchestrator.store().read_snapshot(&key()).await.unwrap();

    let failure = orchestrator.produce_scene(&key(), &request()).await.unwrap_err();

    assert_eq!(failure.reason, FailureReason::AttemptsExhausted);
    assert_eq!(failure.attempts, 2);
    assert_eq!(failure.sequence, 1);
    assert_eq!(failure.error_chain.len(), 2);
    assert_eq!(
        failure.last_decision.as_ref().map(|d| d.outcome),
        Some(Outcome::Reject)
    );
    assert_eq!(script.writer_calls(), 6);

    let after = orchestrator.store().read_snapshot(&key()).await.unwrap();
    assert_eq!(before, after);
    assert!(orchestrator.store().scene_log(&key()).await.unwrap().is_empty());

    let status = orchestrator.controls().handle(&key()).await.status().await;
    assert_eq!(status.state, PipelineState::Idle);
    assert!(status.last_failure.unwrap().contains("attempts exhausted"));
}

#[tokio::test]
async fn vetoed_attempt_is_redrafted() {
    let mut script = Scripted::new();
    script.writer = Box::new(|i| {
        Ok(if i < 3 {
            format!("First pass {i}. Everyone talks and nothing changes.")
        } else {
            format!("Second pass {i}. The bridge burns behind her.")
        })
    });
    script.critic = Box::new(|rubric, draft| {
        if draft.starts_with("First") {
            (96, "NONE")
        } else {
            (score_for(rubric, [88, 90, 89]), "the bridge burns")
        }
    });
    let (orchestrator, _) = setup(script, fast_config()).await;

    let record = orchestrator.produce_scene(&key(), &request()).await.unwrap();

    assert_eq!(record.decision.attempt, 2);
    assert!(record.text.starts_with("Second pass"));
}

#[tokio::test]
async fn insufficient_drafts_start_a_new_attempt() {
    let mut script = Scripted::new();
    script.writer = Box::new(|i| {
        if i < 3 {
            Err(ProviderError::Unavailable("overloaded".to_owned()))
        } else {
            Ok("Alpha. The rope parted and the bridge fell.".to_owned())
        }
    });
    let (orchestrator, _) = setup(script, fast_config()).await;

    let record = orchestrator.produce_scene(&key(), &request()).await.unwrap();

    assert_eq!(record.decision.attempt, 2);
}

#[tokio::test]
async fn rejected_provider_is_fatal() {
    let mut script = Scripted::new();
    script.writer = Box::new(|_| Err(ProviderError::Rejected("bad api key".to_owned())));
    let (orchestrator, script) = setup(script, fast_config()).await;

    let failure = orchestrator.produce_scene(&key(), &request()).await.unwrap_err();

    assert_eq!(failure.reason, FailureReason::ProviderFailure);
    assert_eq!(failure.attempts, 1);
    assert_eq!(script.writer_calls(), 3);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn cancel_while_idle_applies_to_next_scene_only() {
    let (orchestrator, script) = setup(Scripted::new(), fast_config()).await;
    orchestrator
        .controls()
        .handle(&key())
        .await
        .cancel()
        .await
        .unwrap();

    let failure = orchestrator.produce_scene(&key(), &request()).await.unwrap_err();
    assert_eq!(failure.reason, FailureReason::Cancelled);
    assert_eq!(failure.attempts, 0);
    assert_eq!(script.writer_calls(), 0);

    let record = orchestrator.produce_scene(&key(), &request()).await.unwrap();
    assert_eq!(record.scene.sequence_number, 1);
}

#[tokio::test]
async fn cancel_during_drafting_stops_before_scoring() {
    let controls = Arc::new(ControlRegistry::new());
    let mut script = Scripted::new();
    let hook_controls = Arc::clone(&controls);
    script.on_draft = Some(Arc::new(move || {
        let controls = Arc::clone(&hook_controls);
        Box::pin(async move {
            controls.handle(&key()).await.cancel().await.unwrap();
        })
    }));
    let (orchestrator, _) = setup(script, fast_config()).await;
    let orchestrator = orchestrator.with_controls(controls);

    let failure = orchestrator.produce_scene(&key(), &request()).await.unwrap_err();

    assert_eq!(failure.reason, FailureReason::Cancelled);
    assert!(failure.last_decision.is_none());
    assert!(failure.error_chain.iter().any(|e| e.contains("drafting")));
    assert!(orchestrator.store().scene_log(&key()).await.unwrap().is_empty());
    let status = orchestrator.controls().handle(&key()).await.status().await;
    assert!(!status.cancel_requested);
}

// =============================================================================
// Commit integrity
// =============================================================================

#[tokio::test]
async fn integrity_error_retries_against_fresh_snapshot() {
    let store = Arc::new(StoryMemoryStore::in_memory());
    store.create_project(&key(), seed()).await.unwrap();

    let mut script = Scripted::new();
    let interloper = Arc::clone(&store);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    script.before_extract = Some(Arc::new(move || {
        let store = Arc::clone(&interloper);
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                let commit = foreign_commit(&store, 1).await;
                store.commit_scene(&key(), commit).await.unwrap();
            }
        })
    }));
    let script = Arc::new(script);
    let orchestrator = SceneOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&script),
        Arc::clone(&script),
        Arc::new(PromptEngine::builtin().unwrap()),
        fast_config(),
    );

    let record = orchestrator.produce_scene(&key(), &request()).await.unwrap();

    // Extraction ran once; the retry rebuilt the delta without asking again.
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(record.scene.sequence_number, 2);
    assert_eq!(record.decision.scene_sequence, 2);
    assert!(record.text.starts_with("Alpha"));

    let log = store.scene_log(&key()).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].scene.goal, "someone else's scene");
    let snapshot = store.read_snapshot(&key()).await.unwrap();
    assert_eq!(snapshot.head_sequence, 2);
    assert_eq!(snapshot.world.current_location, "the far bank");
}

#[tokio::test]
async fn second_integrity_error_fails_scene_and_leaves_memory_untouched() {
    // Two stores over one database: `other` plays a second process.
    let db = MemoryDb::open("sqlite::memory:").await.unwrap();
    let store = Arc::new(StoryMemoryStore::with_database(db.clone()));
    let other = Arc::new(StoryMemoryStore::with_database(db));
    store.create_project(&key(), seed()).await.unwrap();

    let mut script = Scripted::new();
    let (local, remote) = (Arc::clone(&store), Arc::clone(&other));
    script.before_extract = Some(Arc::new(move || {
        let (local, remote) = (Arc::clone(&local), Arc::clone(&remote));
        Box::pin(async move {
            // Scene 1 lands in this process, scene 2 only in the database.
            let first = foreign_commit(&local, 1).await;
            local.commit_scene(&key(), first).await.unwrap();
            let second = foreign_commit(&remote, 2).await;
            remote.commit_scene(&key(), second).await.unwrap();
        })
    }));
    let script = Arc::new(script);
    let orchestrator = SceneOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&script),
        Arc::clone(&script),
        Arc::new(PromptEngine::builtin().unwrap()),
        fast_config(),
    );

    let failure = orchestrator.produce_scene(&key(), &request()).await.unwrap_err();

    assert_eq!(failure.reason, FailureReason::IntegrityConflict);
    assert_eq!(failure.sequence, 2);
    assert!(failure.last_decision.is_some());
    assert!(failure.error_chain.len() >= 2);

    let log = store.scene_log(&key()).await.unwrap();
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|r| r.scene.goal == "someone else's scene"));
    let snapshot = store.read_snapshot(&key()).await.unwrap();
    assert_eq!(snapshot.head_sequence, 2);
    assert_eq!(snapshot.world.current_location, "the gorge bridge");
    let status = orchestrator.controls().handle(&key()).await.status().await;
    assert_eq!(status.state, PipelineState::Idle);
    assert!(status.last_failure.is_some());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn same_project_requests_queue_instead_of_racing() {
    let (orchestrator, _) = setup(Scripted::new(), fast_config()).await;

    let (key_a, request_a) = (key(), request());
    let (key_b, request_b) = (key(), request());
    let (a, b) = tokio::join!(
        orchestrator.produce_scene(&key_a, &request_a),
        orchestrator.produce_scene(&key_b, &request_b),
    );

    let mut sequences = vec![
        a.unwrap().scene.sequence_number,
        b.unwrap().scene.sequence_number,
    ];
    sequences.sort_unstable();
    assert_eq!(sequences, vec![1, 2]);
}

#[tokio::test]
async fn different_projects_are_independent() {
    let (orchestrator, _) = setup(Scripted::new(), fast_config()).await;
    let other = ProjectKey::parse("salt-road").unwrap();
    orchestrator
        .store()
        .create_project(&other, seed())
        .await
        .unwrap();

    let (key_a, request_a) = (key(), request());
    let request_b = request();
    let (a, b) = tokio::join!(
        orchestrator.produce_scene(&key_a, &request_a),
        orchestrator.produce_scene(&other, &request_b),
    );

    assert_eq!(a.unwrap().scene.sequence_number, 1);
    assert_eq!(b.unwrap().scene.sequence_number, 1);
    assert_eq!(orchestrator.controls().statuses().await.len(), 2);
}

// =============================================================================
// Manuscript
// =============================================================================

struct BrokenSink;

impl ManuscriptSink for BrokenSink {
    fn append(&self, _record: &SceneRecord, _title: &str) -> std::io::Result<()> {
        Err(std::io::Error::other("disk full"))
    }
}

#[tokio::test]
async fn committed_scene_is_appended_to_manuscript() {
    let dir = std::env::temp_dir().join(format!("taleforge-orchestrator-{}", DraftId::new()));
    let path = dir.join("manuscript.md");
    let (orchestrator, _) = setup(Scripted::new(), fast_config()).await;
    let orchestrator = orchestrator.with_sink(Arc::new(MarkdownManuscript::new(&path)));

    orchestrator.produce_scene(&key(), &request()).await.unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("# The Drowned Bell\n"));
    assert!(text.contains("## Scene 1: Ines crosses the gorge"));
    assert!(text.contains("Alpha. The rope parted"));
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn manuscript_failure_does_not_undo_commit() {
    let (orchestrator, _) = setup(Scripted::new(), fast_config()).await;
    let orchestrator = orchestrator.with_sink(Arc::new(BrokenSink));

    let record = orchestrator.produce_scene(&key(), &request()).await.unwrap();

    assert_eq!(record.scene.sequence_number, 1);
    let snapshot = orchestrator.store().read_snapshot(&key()).await.unwrap();
    assert_eq!(snapshot.head_sequence, 1);
}
