#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end runs of the six-stage workflow with scripted workers and
//! scripted operators.

use async_trait::async_trait;
use biggles_checkpoint::{CheckpointConfig, CheckpointController, ScriptedChannel};
use biggles_core::{
    BigglesError, BigglesResult, CheckpointKind, CheckpointRecord, Disposition, OperatorDecision,
    ResolutionCause,
};
use biggles_knowledge::{DocumentFilter, DocumentKind, KnowledgeStore, NewDocument};
use biggles_orchestrator::{
    Orchestrator, OrchestratorConfig, RetryScope, RunStatus, Stage, StageStatus, StageWorkers,
    Worker, WorkerContext, WorkerOutput, OPERATOR_CONTRIBUTOR,
};
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Scripted workers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Step {
    Reply(String),
    Fail(String),
    Panic,
}

fn reply(text: &str) -> Step {
    Step::Reply(text.to_string())
}

fn fail(error: &str) -> Step {
    Step::Fail(error.to_string())
}

/// Plays a queue of steps, then repeats `fallback`. Records every context it sees
/// and, when watching a controller, the checkpoint history at invocation time.
struct MockWorker {
    name: String,
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicU32,
    seen: Mutex<Vec<WorkerContext>>,
    watched: Option<Arc<CheckpointController>>,
    history_at_call: Mutex<Vec<Vec<CheckpointRecord>>>,
}

impl MockWorker {
    fn scripted(name: &str, steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            name: name.to_string(),
            steps: Mutex::new(steps.into()),
            fallback,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
            watched: None,
            history_at_call: Mutex::new(Vec::new()),
        }
    }

    fn replying(name: &str, text: &str) -> Self {
        Self::scripted(name, vec![], reply(text))
    }

    fn failing(name: &str, error: &str) -> Self {
        Self::scripted(name, vec![], fail(error))
    }

    fn watching(mut self, controller: &Arc<CheckpointController>) -> Self {
        self.watched = Some(Arc::clone(controller));
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for MockWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _task: &str, ctx: &WorkerContext) -> BigglesResult<WorkerOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().await.push(ctx.clone());
        if let Some(controller) = &self.watched {
            let history = controller.history().await;
            self.history_at_call.lock().await.push(history);
        }
        let step = {
            let mut steps = self.steps.lock().await;
            steps.pop_front().unwrap_or_else(|| self.fallback.clone())
        };
        match step {
            Step::Reply(text) => Ok(WorkerOutput::new(text)),
            Step::Fail(error) => Err(BigglesError::Provider(error)),
            Step::Panic => panic!("{} fell over", self.name),
        }
    }
}

/// Panics while building its task, before any invocation starts.
struct BrokenTaskWorker;

#[async_trait]
impl Worker for BrokenTaskWorker {
    fn name(&self) -> &str {
        "broken-task"
    }

    fn task(&self, _ctx: &WorkerContext) -> String {
        panic!("task template is malformed")
    }

    async fn invoke(&self, _task: &str, _ctx: &WorkerContext) -> BigglesResult<WorkerOutput> {
        Ok(WorkerOutput::new("unreachable"))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

type Mocks = BTreeMap<Stage, Arc<MockWorker>>;

/// A replying worker for every stage.
fn healthy() -> Mocks {
    Stage::ALL
        .into_iter()
        .map(|stage| {
            let worker = MockWorker::replying(stage.as_str(), &format!("{stage} findings"));
            (stage, Arc::new(worker))
        })
        .collect()
}

fn orchestrator(
    mocks: &Mocks,
    store: Arc<KnowledgeStore>,
    checkpoints: Arc<CheckpointController>,
    config: OrchestratorConfig,
) -> Orchestrator {
    let workers = mocks.iter().fold(StageWorkers::new(), |workers, (stage, mock)| {
        let worker: Arc<dyn Worker> = Arc::clone(mock) as Arc<dyn Worker>;
        workers.with(*stage, worker)
    });
    Orchestrator::new(workers, store, checkpoints, config).unwrap()
}

fn interactive(decisions: Vec<OperatorDecision>) -> (Arc<ScriptedChannel>, Arc<CheckpointController>) {
    let channel = Arc::new(ScriptedChannel::new(decisions));
    let controller = Arc::new(CheckpointController::new(
        CheckpointConfig::default(),
        Arc::clone(&channel) as Arc<dyn biggles_core::OperatorChannel>,
    ));
    (channel, controller)
}

fn continue_all() -> Vec<OperatorDecision> {
    vec![OperatorDecision::Continue; 3]
}

fn dispositions(records: &[CheckpointRecord]) -> Vec<(CheckpointKind, Option<Disposition>)> {
    records
        .iter()
        .map(|r| (r.checkpoint_kind().clone(), r.disposition()))
        .collect()
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_hil_disabled_scout_review_precedes_fan_out() {
    let controller = Arc::new(CheckpointController::disabled());
    let mut mocks = healthy();
    mocks.insert(Stage::Scout, Arc::new(MockWorker::replying("trend_scout", "A")));
    for stage in Stage::RESEARCH {
        let worker = MockWorker::replying(stage.as_str(), "found").watching(&controller);
        mocks.insert(stage, Arc::new(worker));
    }
    let orch = orchestrator(
        &mocks,
        Arc::new(KnowledgeStore::new()),
        Arc::clone(&controller),
        OrchestratorConfig::default(),
    );

    let outcome = orch.run("T").await.unwrap();
    assert!(outcome.is_completed());

    for stage in Stage::RESEARCH {
        let seen = mocks[&stage].history_at_call.lock().await;
        assert_eq!(seen.len(), 1);
        let history = &seen[0];
        assert_eq!(history.len(), 1, "{stage} saw {history:?}");
        assert_eq!(history[0].checkpoint_kind(), &CheckpointKind::ScoutingReview);
        assert_eq!(history[0].disposition(), Some(Disposition::ContinueUnchanged));
        assert_eq!(history[0].resolved_by(), Some(ResolutionCause::HilDisabled));

        let contexts = mocks[&stage].seen.lock().await;
        assert_eq!(contexts[0].prior[&Stage::Scout].text, "A");
        assert_eq!(contexts[0].focus, "A");
    }

    assert_eq!(
        dispositions(&outcome.run.checkpoint_history),
        vec![
            (CheckpointKind::ScoutingReview, Some(Disposition::ContinueUnchanged)),
            (CheckpointKind::ResearchReview, Some(Disposition::ContinueUnchanged)),
            (CheckpointKind::ReportReview, Some(Disposition::ContinueUnchanged)),
        ]
    );
}

#[tokio::test]
async fn test_research_workers_see_only_scout_output() {
    let mocks = healthy();
    let orch = orchestrator(
        &mocks,
        Arc::new(KnowledgeStore::new()),
        Arc::new(CheckpointController::disabled()),
        OrchestratorConfig::default(),
    );
    orch.run("T").await.unwrap();

    for stage in Stage::RESEARCH {
        let contexts = mocks[&stage].seen.lock().await;
        let prior: Vec<Stage> = contexts[0].prior.keys().copied().collect();
        assert_eq!(prior, vec![Stage::Scout]);
        assert_eq!(contexts[0].attempt, 1);
    }
    let synthesis = mocks[&Stage::Synthesis].seen.lock().await;
    assert_eq!(synthesis[0].prior.len(), 5);
}

#[tokio::test]
async fn test_synthesis_reads_whole_store() {
    let store = Arc::new(KnowledgeStore::new());
    store
        .add(NewDocument::new(
            "side note nobody forwarded",
            "archivist",
            DocumentKind::WorkerRawOutput,
        ))
        .await
        .unwrap();
    let mocks = healthy();
    let orch = orchestrator(
        &mocks,
        Arc::clone(&store),
        Arc::new(CheckpointController::disabled()),
        OrchestratorConfig::default(),
    );

    let outcome = orch.run("T").await.unwrap();

    let synthesis = mocks[&Stage::Synthesis].seen.lock().await;
    let visible = synthesis[0].store.all().await;
    assert!(visible.iter().any(|d| d.content == "side note nobody forwarded"));
    // Pre-existing note, scout and four research documents.
    assert_eq!(outcome.report.documents_consulted, 6);
    assert_eq!(outcome.report.body, "synthesis findings");
    assert_eq!(outcome.snapshot.documents.len(), 7);
}

#[tokio::test]
async fn test_research_documents_link_to_scout_document() {
    let store = Arc::new(KnowledgeStore::new());
    let orch = orchestrator(
        &healthy(),
        Arc::clone(&store),
        Arc::new(CheckpointController::disabled()),
        OrchestratorConfig::default(),
    );
    let outcome = orch.run("T").await.unwrap();

    let scout_doc = outcome.run.stage_documents[&Stage::Scout];
    let children = store.children(scout_doc).await.unwrap();
    assert_eq!(children.len(), 4);

    for stage in Stage::RESEARCH {
        let doc = store.get(outcome.run.stage_documents[&stage]).await.unwrap();
        assert_eq!(doc.parent_id, Some(scout_doc));
        assert_eq!(doc.kind, stage.document_kind());
        assert!(doc.has_tag(stage.as_str()));
        assert_eq!(doc.attribute("attempt").and_then(|a| a.as_int()), Some(1));
    }

    let report = store
        .filter(&DocumentFilter::new().kind(DocumentKind::FinalReport))
        .await;
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].parent_id, None);
    assert_eq!(report[0].contributor, "synthesis");
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_one_failing_stage_does_not_stop_the_others() {
    let mut mocks = healthy();
    mocks.insert(Stage::News, Arc::new(MockWorker::failing("journalist", "feed down")));
    let (channel, controller) = interactive(continue_all());
    let orch = orchestrator(
        &mocks,
        Arc::new(KnowledgeStore::new()),
        controller,
        OrchestratorConfig::default(),
    );

    let outcome = orch.run("T").await.unwrap();
    assert!(outcome.is_completed());

    let prompts = channel.prompts().await;
    assert_eq!(prompts.len(), 3);
    let research = &prompts[1];
    assert_eq!(research.checkpoint_kind, CheckpointKind::ResearchReview);
    assert_eq!(research.payload["news"]["status"], "failed");
    assert!(research.payload["news"]["error"]
        .as_str()
        .unwrap()
        .contains("feed down"));
    for name in ["history", "academic", "books"] {
        assert_eq!(research.payload[name]["status"], "completed");
    }

    assert_eq!(outcome.report.failed_stages, vec![Stage::News]);
    assert!(!outcome.report.sections.contains_key(&Stage::News));
    assert!(!outcome.run.stage_documents.contains_key(&Stage::News));
    // Scout, three research documents and the report.
    assert_eq!(outcome.snapshot.documents.len(), 5);

    let news = orch.monitor().get_state(Stage::News).await.unwrap();
    assert_eq!(news.status, StageStatus::Failed);
    assert_eq!(news.metrics.errors, 1);
}

#[tokio::test]
async fn test_panicking_worker_becomes_failure_marker() {
    let mut mocks = healthy();
    mocks.insert(
        Stage::Books,
        Arc::new(MockWorker::scripted("bibliophile", vec![], Step::Panic)),
    );
    let orch = orchestrator(
        &mocks,
        Arc::new(KnowledgeStore::new()),
        Arc::new(CheckpointController::disabled()),
        OrchestratorConfig::default(),
    );

    let outcome = orch.run("T").await.unwrap();
    assert!(outcome.is_completed());
    assert!(outcome.run.stage_results[&Stage::Books].is_failed());
    for stage in [Stage::History, Stage::Academic, Stage::News] {
        assert!(!outcome.run.stage_results[&stage].is_failed());
    }
}

#[tokio::test]
async fn test_worker_panicking_while_building_task_is_isolated() {
    let mocks = healthy();
    let workers = mocks
        .iter()
        .fold(StageWorkers::new(), |workers, (stage, mock)| {
            workers.with(*stage, Arc::clone(mock) as Arc<dyn Worker>)
        })
        .with(Stage::Books, Arc::new(BrokenTaskWorker));
    let orch = Orchestrator::new(
        workers,
        Arc::new(KnowledgeStore::new()),
        Arc::new(CheckpointController::disabled()),
        OrchestratorConfig::default(),
    )
    .unwrap();

    let outcome = orch.run("T").await.unwrap();
    assert!(outcome.is_completed());
    assert_eq!(outcome.run.research_results().len(), 4);
    let books = &outcome.run.stage_results[&Stage::Books];
    assert!(books.is_failed());
    for stage in [Stage::History, Stage::Academic, Stage::News] {
        assert!(!outcome.run.stage_results[&stage].is_failed());
    }
    assert!(outcome.report.failed_stages.contains(&Stage::Books));
    assert_eq!(
        orch.monitor().get_state(Stage::Books).await.unwrap().status,
        StageStatus::Failed
    );
}

#[tokio::test]
async fn test_all_research_failing_fails_the_run() {
    let mut mocks = healthy();
    for stage in Stage::RESEARCH {
        mocks.insert(stage, Arc::new(MockWorker::failing(stage.as_str(), "offline")));
    }
    let orch = orchestrator(
        &mocks,
        Arc::new(KnowledgeStore::new()),
        Arc::new(CheckpointController::disabled()),
        OrchestratorConfig::default(),
    );

    let outcome = orch.run("T").await.unwrap();
    assert!(matches!(outcome.status, RunStatus::Failed { .. }));
    assert_eq!(mocks[&Stage::Synthesis].calls(), 0);
    assert_eq!(outcome.run.checkpoint_history.len(), 2);
    assert_eq!(outcome.report.body, "");
    assert!(outcome.report.sections.contains_key(&Stage::Scout));
}

#[tokio::test]
async fn test_scout_failure_fails_the_run_after_review() {
    let mut mocks = healthy();
    mocks.insert(Stage::Scout, Arc::new(MockWorker::failing("trend_scout", "no signal")));
    let orch = orchestrator(
        &mocks,
        Arc::new(KnowledgeStore::new()),
        Arc::new(CheckpointController::disabled()),
        OrchestratorConfig::default(),
    );

    let outcome = orch.run("T").await.unwrap();
    match &outcome.status {
        RunStatus::Failed { reason } => assert!(reason.contains("no signal")),
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(outcome.run.checkpoint_history.len(), 1);
    for stage in Stage::RESEARCH {
        assert_eq!(mocks[&stage].calls(), 0);
    }
    assert!(outcome.snapshot.documents.is_empty());
}

#[tokio::test]
async fn test_operator_channel_failure_is_recorded_and_fails_run() {
    let (_channel, controller) = interactive(vec![]);
    let orch = orchestrator(
        &healthy(),
        Arc::new(KnowledgeStore::new()),
        controller,
        OrchestratorConfig::default(),
    );

    let outcome = orch.run("T").await.unwrap();
    assert!(matches!(outcome.status, RunStatus::Failed { .. }));
    let history = &outcome.run.checkpoint_history;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].disposition(), Some(Disposition::Abort));
    assert_eq!(history[0].resolved_by(), Some(ResolutionCause::ChannelError));
}

// ---------------------------------------------------------------------------
// Operator decisions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_selected_retry_reruns_only_named_stage() {
    let mut mocks = healthy();
    mocks.insert(
        Stage::News,
        Arc::new(MockWorker::scripted(
            "journalist",
            vec![fail("rate limited")],
            reply("news second try"),
        )),
    );
    let (_channel, controller) = interactive(vec![
        OperatorDecision::Continue,
        OperatorDecision::Retry {
            stages: vec!["news".into()],
        },
        OperatorDecision::Continue,
        OperatorDecision::Continue,
    ]);
    let orch = orchestrator(
        &mocks,
        Arc::new(KnowledgeStore::new()),
        controller,
        OrchestratorConfig {
            retry_scope: RetryScope::Selected,
            ..OrchestratorConfig::default()
        },
    );

    let outcome = orch.run("T").await.unwrap();
    assert!(outcome.is_completed());
    assert_eq!(mocks[&Stage::News].calls(), 2);
    for stage in [Stage::History, Stage::Academic, Stage::Books] {
        assert_eq!(mocks[&stage].calls(), 1);
    }
    assert_eq!(outcome.run.attempts[&Stage::News], 2);
    assert_eq!(outcome.run.output(Stage::News).unwrap().text, "news second try");
    assert!(outcome.report.failed_stages.is_empty());
    assert_eq!(outcome.run.checkpoint_history.len(), 4);
    assert_eq!(outcome.run.checkpoint_history[1].retry_targets(), ["news"]);
}

#[tokio::test]
async fn test_failed_retry_keeps_earlier_success() {
    let mut mocks = healthy();
    mocks.insert(
        Stage::News,
        Arc::new(MockWorker::scripted(
            "journalist",
            vec![reply("news first try")],
            fail("rate limited"),
        )),
    );
    let (_channel, controller) = interactive(vec![
        OperatorDecision::Continue,
        OperatorDecision::Retry { stages: vec![] },
        OperatorDecision::Continue,
        OperatorDecision::Continue,
    ]);
    let orch = orchestrator(
        &mocks,
        Arc::new(KnowledgeStore::new()),
        controller,
        OrchestratorConfig::default(),
    );

    let outcome = orch.run("T").await.unwrap();
    assert!(outcome.is_completed());
    for stage in Stage::RESEARCH {
        assert_eq!(mocks[&stage].calls(), 2);
    }
    assert_eq!(outcome.run.output(Stage::News).unwrap().text, "news first try");
    let news_docs = outcome
        .snapshot
        .documents
        .iter()
        .filter(|d| d.has_tag("news"))
        .count();
    assert_eq!(news_docs, 1);
}

#[tokio::test]
async fn test_scout_edit_is_stored_and_shared() {
    let (_channel, controller) = interactive(vec![
        OperatorDecision::Edit {
            payload: json!({"status": "completed", "output": {"text": "B", "links": []}}),
        },
        OperatorDecision::Continue,
        OperatorDecision::Continue,
    ]);
    let mut mocks = healthy();
    mocks.insert(Stage::Scout, Arc::new(MockWorker::replying("trend_scout", "A")));
    let store = Arc::new(KnowledgeStore::new());
    let orch = orchestrator(&mocks, Arc::clone(&store), controller, OrchestratorConfig::default());

    let outcome = orch.run("T").await.unwrap();
    assert!(outcome.is_completed());
    assert_eq!(outcome.run.output(Stage::Scout).unwrap().text, "B");
    assert_eq!(
        outcome.run.checkpoint_history[0].disposition(),
        Some(Disposition::ContinueWithEdits)
    );

    let edited = store
        .filter(&DocumentFilter::new().contributor(OPERATOR_CONTRIBUTOR))
        .await;
    assert_eq!(edited.len(), 1);
    assert_eq!(edited[0].content, "B");
    assert!(edited[0].has_tag("edited"));
    let original = store
        .filter(&DocumentFilter::new().contributor("trend_scout"))
        .await;
    assert_eq!(original[0].content, "A");
    assert_eq!(edited[0].parent_id, Some(original[0].id));
    assert_eq!(outcome.run.stage_documents[&Stage::Scout], edited[0].id);

    for stage in Stage::RESEARCH {
        let contexts = mocks[&stage].seen.lock().await;
        assert_eq!(contexts[0].prior[&Stage::Scout].text, "B");
        let doc = store.get(outcome.run.stage_documents[&stage]).await.unwrap();
        assert_eq!(doc.parent_id, Some(edited[0].id));
    }
}

#[tokio::test]
async fn test_research_edit_replaces_failed_stage() {
    let mut mocks = healthy();
    mocks.insert(Stage::Books, Arc::new(MockWorker::failing("bibliophile", "no catalog")));
    let (_channel, controller) = interactive(vec![
        OperatorDecision::Continue,
        OperatorDecision::Edit {
            payload: json!({
                "history": {"status": "completed", "output": {"text": "history findings", "links": []}},
                "academic": {"status": "completed", "output": {"text": "academic findings", "links": []}},
                "news": {"status": "completed", "output": {"text": "news findings", "links": []}},
                "books": {"status": "completed", "output": {"text": "operator reading list", "links": ["https://books.example/1"]}}
            }),
        },
        OperatorDecision::Continue,
    ]);
    let orch = orchestrator(
        &mocks,
        Arc::new(KnowledgeStore::new()),
        controller,
        OrchestratorConfig::default(),
    );

    let outcome = orch.run("T").await.unwrap();
    assert!(outcome.is_completed());
    assert_eq!(
        outcome.run.output(Stage::Books).unwrap().text,
        "operator reading list"
    );
    assert!(outcome.report.failed_stages.is_empty());
    assert_eq!(outcome.report.references, vec!["https://books.example/1"]);

    let edited: Vec<_> = outcome
        .snapshot
        .documents
        .iter()
        .filter(|d| d.has_tag("edited"))
        .collect();
    assert_eq!(edited.len(), 1);
    assert!(edited[0].has_tag("books"));
    assert_eq!(edited[0].parent_id, Some(outcome.run.stage_documents[&Stage::Scout]));
}

#[tokio::test]
async fn test_report_edit_becomes_final_body() {
    let (_channel, controller) = interactive(vec![
        OperatorDecision::Continue,
        OperatorDecision::Continue,
        OperatorDecision::Edit {
            payload: json!({
                "topic": "T",
                "body": "Operator rewrite",
                "sections": {},
                "references": [],
                "failed_stages": [],
                "documents_consulted": 5
            }),
        },
    ]);
    let store = Arc::new(KnowledgeStore::new());
    let orch = orchestrator(&healthy(), Arc::clone(&store), controller, OrchestratorConfig::default());

    let outcome = orch.run("T").await.unwrap();
    assert!(outcome.is_completed());
    assert_eq!(outcome.report.body, "Operator rewrite");
    assert_eq!(outcome.run.output(Stage::Synthesis).unwrap().text, "Operator rewrite");

    let reports = store
        .filter(&DocumentFilter::new().kind(DocumentKind::FinalReport))
        .await;
    assert_eq!(reports.len(), 2);
    assert!(reports[1].has_tag("edited"));
    assert_eq!(reports[1].parent_id, Some(reports[0].id));
}

#[tokio::test]
async fn test_skip_continues_like_unchanged() {
    let (_channel, controller) = interactive(vec![OperatorDecision::Skip; 3]);
    let orch = orchestrator(
        &healthy(),
        Arc::new(KnowledgeStore::new()),
        controller,
        OrchestratorConfig::default(),
    );
    let outcome = orch.run("T").await.unwrap();
    assert!(outcome.is_completed());
    assert!(outcome
        .run
        .checkpoint_history
        .iter()
        .all(|r| r.disposition() == Some(Disposition::Skip)));
}

#[tokio::test]
async fn test_abort_at_research_review_cancels() {
    let mocks = healthy();
    let (_channel, controller) =
        interactive(vec![OperatorDecision::Continue, OperatorDecision::Abort]);
    let orch = orchestrator(
        &mocks,
        Arc::new(KnowledgeStore::new()),
        controller,
        OrchestratorConfig::default(),
    );

    let outcome = orch.run("T").await.unwrap();
    assert_eq!(
        outcome.status,
        RunStatus::Cancelled {
            at: CheckpointKind::ResearchReview
        }
    );
    assert_eq!(mocks[&Stage::Synthesis].calls(), 0);
    assert_eq!(outcome.run.checkpoint_history.len(), 2);
    assert_eq!(outcome.report.body, "");
    assert_eq!(outcome.report.sections.len(), 5);
    // Work done before the abort stays in the store.
    assert_eq!(outcome.snapshot.documents.len(), 5);
}

#[tokio::test]
async fn test_retry_ceiling_cancels() {
    let mocks = healthy();
    let (channel, controller) = interactive(vec![
        OperatorDecision::Retry { stages: vec![] },
        OperatorDecision::Retry { stages: vec![] },
    ]);
    let orch = orchestrator(
        &mocks,
        Arc::new(KnowledgeStore::new()),
        controller,
        OrchestratorConfig {
            max_retries: 1,
            ..OrchestratorConfig::default()
        },
    );

    let outcome = orch.run("T").await.unwrap();
    assert_eq!(
        outcome.status,
        RunStatus::Cancelled {
            at: CheckpointKind::ScoutingReview
        }
    );
    assert_eq!(mocks[&Stage::Scout].calls(), 2);
    assert_eq!(outcome.run.attempts[&Stage::Scout], 2);
    assert_eq!(channel.remaining().await, 0);
    assert_eq!(mocks[&Stage::History].calls(), 0);
}

#[tokio::test]
async fn test_synthesis_retry_reruns_only_synthesis() {
    let mut mocks = healthy();
    mocks.insert(
        Stage::Synthesis,
        Arc::new(MockWorker::scripted(
            "reporter",
            vec![reply("draft")],
            reply("final"),
        )),
    );
    let (_channel, controller) = interactive(vec![
        OperatorDecision::Continue,
        OperatorDecision::Continue,
        OperatorDecision::Retry { stages: vec![] },
        OperatorDecision::Continue,
    ]);
    let orch = orchestrator(
        &mocks,
        Arc::new(KnowledgeStore::new()),
        controller,
        OrchestratorConfig::default(),
    );

    let outcome = orch.run("T").await.unwrap();
    assert!(outcome.is_completed());
    assert_eq!(outcome.report.body, "final");
    assert_eq!(mocks[&Stage::Synthesis].calls(), 2);
    for stage in Stage::RESEARCH {
        assert_eq!(mocks[&stage].calls(), 1);
    }
    // The second synthesis pass sees the first draft in the store.
    assert_eq!(outcome.report.documents_consulted, 6);
}
