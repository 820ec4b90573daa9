use crate::config::{OrchestratorConfig, RetryScope};
use crate::monitor::StageMonitor;
use crate::profiles::{default_profiles, StageProfile};
use crate::types::{Report, RunStatus, Stage, StageResult, WorkerOutput, WorkflowOutcome, WorkflowRun};
use crate::worker::{research_focus, CompletionWorker, TextCompletion, Worker, WorkerContext};
use biggles_checkpoint::{CheckpointController, CheckpointOutcome};
use biggles_core::{BigglesError, BigglesResult, CheckpointKind, Disposition};
use biggles_knowledge::{DocumentId, KnowledgeStore, NewDocument};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Contributor id for documents created from operator edits.
pub const OPERATOR_CONTRIBUTOR: &str = "operator";

/// Outcome of a phase. `Err` carries the status that ends the run early.
type Phase = Result<(), RunStatus>;

/// The worker assigned to each stage.
#[derive(Clone, Default)]
pub struct StageWorkers {
    workers: HashMap<Stage, Arc<dyn Worker>>,
}

impl StageWorkers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `worker` to `stage`, replacing any earlier assignment.
    pub fn with(mut self, stage: Stage, worker: Arc<dyn Worker>) -> Self {
        self.workers.insert(stage, worker);
        self
    }

    /// A [`CompletionWorker`] per profile, all sharing one backend.
    pub fn from_profiles(profiles: Vec<StageProfile>, backend: Arc<dyn TextCompletion>) -> Self {
        profiles.into_iter().fold(Self::new(), |workers, profile| {
            let stage = profile.stage;
            workers.with(
                stage,
                Arc::new(CompletionWorker::new(profile, Arc::clone(&backend))),
            )
        })
    }

    /// The built-in profiles on a single backend.
    pub fn from_backend(backend: Arc<dyn TextCompletion>) -> Self {
        Self::from_profiles(default_profiles(), backend)
    }

    pub fn get(&self, stage: Stage) -> Option<Arc<dyn Worker>> {
        self.workers.get(&stage).cloned()
    }

    pub fn missing(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| !self.workers.contains_key(stage))
            .collect()
    }
}

/// A stage invocation's result, ready to fold into the run.
struct StageRun {
    stage: Stage,
    result: StageResult,
    document: Option<DocumentId>,
}

/// Drives the six-stage research workflow.
///
/// Scout runs alone, the four research stages fan out concurrently behind a
/// barrier, and synthesis runs last with the whole store. A checkpoint sits
/// after each group. Runs on one orchestrator should not overlap, since the
/// checkpoint controller's history is shared.
pub struct Orchestrator {
    workers: StageWorkers,
    store: Arc<KnowledgeStore>,
    checkpoints: Arc<CheckpointController>,
    monitor: Arc<StageMonitor>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Fails with a config error unless every stage has a worker.
    pub fn new(
        workers: StageWorkers,
        store: Arc<KnowledgeStore>,
        checkpoints: Arc<CheckpointController>,
        config: OrchestratorConfig,
    ) -> BigglesResult<Self> {
        let missing = workers.missing();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(Stage::as_str).collect();
            return Err(BigglesError::Config(format!(
                "no worker configured for stages: {}",
                names.join(", ")
            )));
        }
        Ok(Self {
            workers,
            store,
            checkpoints,
            monitor: Arc::new(StageMonitor::new()),
            config,
        })
    }

    pub fn monitor(&self) -> &Arc<StageMonitor> {
        &self.monitor
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointController> {
        &self.checkpoints
    }

    /// Run the full workflow for `topic`.
    ///
    /// Only an empty topic is an error. Stage failures, aborts and operator
    /// channel failures all come back as an outcome carrying the accumulated
    /// run state, a report assembled from it, and a store snapshot.
    pub async fn run(&self, topic: &str) -> BigglesResult<WorkflowOutcome> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(BigglesError::Validation(
                "workflow topic must not be empty".to_string(),
            ));
        }

        let start = Instant::now();
        let mut run = WorkflowRun::new(topic);
        info!(run_id = %run.id, topic = %topic, "Workflow: starting");

        let mut report = None;
        let status = match self.drive(&mut run, &mut report).await {
            Ok(()) => RunStatus::Completed,
            Err(status) => status,
        };
        let report = report.unwrap_or_else(|| Report::assemble(&run, 0));
        let snapshot = self.store.export().await;

        match &status {
            RunStatus::Completed => info!(
                run_id = %run.id,
                duration_ms = start.elapsed().as_millis() as u64,
                documents = snapshot.documents.len(),
                checkpoints = run.checkpoint_history.len(),
                "Workflow: completed"
            ),
            RunStatus::Cancelled { at } => {
                warn!(run_id = %run.id, checkpoint = %at, "Workflow: cancelled")
            }
            RunStatus::Failed { reason } => {
                error!(run_id = %run.id, reason = %reason, "Workflow: failed")
            }
        }

        Ok(WorkflowOutcome {
            status,
            run,
            report,
            snapshot,
        })
    }

    async fn drive(&self, run: &mut WorkflowRun, report: &mut Option<Report>) -> Phase {
        self.scouting_phase(run).await?;

        let focus = research_focus(&run.topic, run.output(Stage::Scout));
        info!(focus = %focus, "Workflow: research focus selected");

        self.research_phase(run, &focus).await?;
        self.synthesis_phase(run, &focus, report).await
    }

    /// Phase 1: scout alone, then scouting review.
    async fn scouting_phase(&self, run: &mut WorkflowRun) -> Phase {
        let kind = CheckpointKind::ScoutingReview;
        let mut retries = 0;
        loop {
            let topic = run.topic.clone();
            self.invoke_single(run, Stage::Scout, &topic).await;
            let payload = current_result(run, Stage::Scout);

            let outcome = self
                .review(run, kind.clone(), "Trend scouting", &[Stage::Scout], payload)
                .await?;
            match outcome.disposition {
                Disposition::Abort => return Err(RunStatus::Cancelled { at: kind }),
                Disposition::Retry => {
                    self.allow_retry(&kind, &mut retries)?;
                    continue;
                }
                Disposition::ContinueWithEdits => {
                    self.apply_stage_edit(run, Stage::Scout, outcome.payload).await;
                }
                Disposition::ContinueUnchanged | Disposition::Skip => {}
            }
            break;
        }

        if let Some(StageResult::Failed { error }) = run.stage_results.get(&Stage::Scout) {
            return Err(RunStatus::Failed {
                reason: format!("scout stage failed: {error}"),
            });
        }
        Ok(())
    }

    /// Phase 2: the four research stages concurrently, then research review.
    async fn research_phase(&self, run: &mut WorkflowRun, focus: &str) -> Phase {
        let kind = CheckpointKind::ResearchReview;
        let mut targets = Stage::RESEARCH.to_vec();
        let mut retries = 0;
        loop {
            self.fan_out(run, &targets, focus).await;
            let payload = run.research_results();

            let outcome = self
                .review(run, kind.clone(), "Research", &Stage::RESEARCH, payload)
                .await?;
            match outcome.disposition {
                Disposition::Abort => return Err(RunStatus::Cancelled { at: kind }),
                Disposition::Retry => {
                    self.allow_retry(&kind, &mut retries)?;
                    targets = self.retry_targets(&outcome.retry_targets);
                    info!(stages = ?targets, "Retrying research stages");
                    continue;
                }
                Disposition::ContinueWithEdits => {
                    for (stage, result) in outcome.payload {
                        if stage.is_research() {
                            self.apply_stage_edit(run, stage, result).await;
                        } else {
                            warn!(stage = %stage, "Ignoring research-review edit for non-research stage");
                        }
                    }
                }
                Disposition::ContinueUnchanged | Disposition::Skip => {}
            }
            break;
        }

        let all_failed = Stage::RESEARCH.iter().all(|stage| {
            run.stage_results
                .get(stage)
                .map_or(true, StageResult::is_failed)
        });
        if all_failed {
            return Err(RunStatus::Failed {
                reason: "all research stages failed".to_string(),
            });
        }
        Ok(())
    }

    /// Phase 3: synthesis over the whole store, then report review.
    async fn synthesis_phase(
        &self,
        run: &mut WorkflowRun,
        focus: &str,
        report: &mut Option<Report>,
    ) -> Phase {
        let kind = CheckpointKind::ReportReview;
        let mut retries = 0;
        loop {
            let consulted = self.store.len().await;
            self.invoke_single(run, Stage::Synthesis, focus).await;
            let assembled = Report::assemble(run, consulted);

            let outcome = self
                .review(run, kind.clone(), "Report", &[Stage::Synthesis], assembled)
                .await?;
            match outcome.disposition {
                Disposition::Abort => return Err(RunStatus::Cancelled { at: kind }),
                Disposition::Retry => {
                    self.allow_retry(&kind, &mut retries)?;
                    continue;
                }
                Disposition::ContinueWithEdits => {
                    let mut edited = outcome.payload;
                    self.apply_report_edit(run, &edited).await;
                    edited.failed_stages = run.failed_stages();
                    *report = Some(edited);
                }
                Disposition::ContinueUnchanged | Disposition::Skip => {
                    *report = Some(outcome.payload);
                }
            }
            break;
        }

        if let Some(StageResult::Failed { error }) = run.stage_results.get(&Stage::Synthesis) {
            return Err(RunStatus::Failed {
                reason: format!("synthesis stage failed: {error}"),
            });
        }
        Ok(())
    }

    /// Invoke one stage on the control task and fold the result into the run.
    async fn invoke_single(&self, run: &mut WorkflowRun, stage: Stage, focus: &str) {
        let Some(worker) = self.workers.get(stage) else {
            run.record_result(stage, missing_worker(stage));
            return;
        };
        let attempt = run.next_attempt(stage);
        let ctx = self.context(run, stage, attempt, focus);
        let parent = parent_for(run, stage);
        let stage_run = execute_stage(worker, ctx, parent, Arc::clone(&self.monitor)).await;
        fold(run, stage_run);
    }

    /// Launch `stages` concurrently and wait for all of them.
    ///
    /// A failing or panicking worker only produces its own failure marker.
    async fn fan_out(&self, run: &mut WorkflowRun, stages: &[Stage], focus: &str) {
        info!(stages = stages.len(), "Workflow: fanning out research stages");
        let mut set = JoinSet::new();
        let mut pending = BTreeSet::new();
        for &stage in stages {
            let Some(worker) = self.workers.get(stage) else {
                run.record_result(stage, missing_worker(stage));
                continue;
            };
            let attempt = run.next_attempt(stage);
            let ctx = self.context(run, stage, attempt, focus);
            let parent = parent_for(run, stage);
            pending.insert(stage);
            set.spawn(execute_stage(worker, ctx, parent, Arc::clone(&self.monitor)));
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(stage_run) => {
                    pending.remove(&stage_run.stage);
                    fold(run, stage_run);
                }
                Err(e) => error!(error = %e, "Research task did not complete"),
            }
        }
        // A task that died outside the worker still leaves a failure marker.
        for stage in pending {
            let error = format!("{stage} task did not complete");
            self.monitor.record_error(stage, error.clone(), 0).await;
            run.record_result(stage, StageResult::Failed { error });
        }
        info!("Workflow: research barrier passed");
    }

    fn context(&self, run: &WorkflowRun, stage: Stage, attempt: u32, focus: &str) -> WorkerContext {
        let prior = run
            .completed_outputs()
            .into_iter()
            .filter(|(earlier, _)| precedes(*earlier, stage))
            .collect();
        WorkerContext {
            run_id: run.id,
            topic: run.topic.clone(),
            focus: focus.to_string(),
            stage,
            attempt,
            prior,
            store: Arc::clone(&self.store),
        }
    }

    async fn review<T>(
        &self,
        run: &mut WorkflowRun,
        kind: CheckpointKind,
        label: &str,
        stages: &[Stage],
        payload: T,
    ) -> Result<CheckpointOutcome<T>, RunStatus>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        self.monitor.awaiting_review(stages).await;
        let result = self.checkpoints.checkpoint(kind.clone(), label, payload).await;
        self.monitor.review_done(stages).await;

        match result {
            Ok(outcome) => {
                run.checkpoint_history.push(outcome.record.clone());
                Ok(outcome)
            }
            Err(e) => {
                // The controller records the failed checkpoint before returning.
                if let Some(record) = self.checkpoints.history().await.last() {
                    run.checkpoint_history.push(record.clone());
                }
                Err(RunStatus::Failed {
                    reason: format!("checkpoint {kind} failed: {e}"),
                })
            }
        }
    }

    fn allow_retry(&self, kind: &CheckpointKind, retries: &mut u32) -> Phase {
        if *retries >= self.config.max_retries {
            warn!(
                checkpoint = %kind,
                max_retries = self.config.max_retries,
                "Retry limit reached, treating as abort"
            );
            return Err(RunStatus::Cancelled { at: kind.clone() });
        }
        *retries += 1;
        Ok(())
    }

    fn retry_targets(&self, requested: &[String]) -> Vec<Stage> {
        if self.config.retry_scope == RetryScope::All {
            return Stage::RESEARCH.to_vec();
        }
        let mut targets = Vec::new();
        for name in requested {
            match name.parse::<Stage>() {
                Ok(stage) if stage.is_research() => {
                    if !targets.contains(&stage) {
                        targets.push(stage);
                    }
                }
                _ => warn!(stage = %name, "Ignoring retry target that is not a research stage"),
            }
        }
        if targets.is_empty() {
            Stage::RESEARCH.to_vec()
        } else {
            targets
        }
    }

    /// Make an operator's replacement authoritative and store it as a new document.
    async fn apply_stage_edit(&self, run: &mut WorkflowRun, stage: Stage, edited: StageResult) {
        if run.stage_results.get(&stage) == Some(&edited) {
            return;
        }
        run.stage_results.insert(stage, edited.clone());
        info!(stage = %stage, "Operator edit applied");

        let StageResult::Completed { output } = edited else {
            run.stage_documents.remove(&stage);
            return;
        };
        let attempt = run.attempts.get(&stage).copied().unwrap_or(0);
        let parent = run
            .stage_documents
            .get(&stage)
            .copied()
            .or_else(|| parent_for(run, stage));
        match store_output(
            &self.store,
            OPERATOR_CONTRIBUTOR,
            stage,
            attempt,
            parent,
            &output,
            true,
        )
        .await
        {
            Ok(id) => {
                run.stage_documents.insert(stage, id);
            }
            Err(e) => warn!(stage = %stage, error = %e, "Could not store edited output"),
        }
    }

    async fn apply_report_edit(&self, run: &mut WorkflowRun, edited: &Report) {
        let links = run
            .output(Stage::Synthesis)
            .map(|o| o.links.clone())
            .unwrap_or_default();
        let replacement = StageResult::Completed {
            output: WorkerOutput {
                text: edited.body.clone(),
                links,
            },
        };
        self.apply_stage_edit(run, Stage::Synthesis, replacement).await;
    }
}

/// Invoke a worker and store its output. Runs on the control task or inside the fan-out.
async fn execute_stage(
    worker: Arc<dyn Worker>,
    ctx: WorkerContext,
    parent: Option<DocumentId>,
    monitor: Arc<StageMonitor>,
) -> StageRun {
    let stage = ctx.stage;
    let attempt = ctx.attempt;
    monitor.start_stage(stage).await;
    let started = Instant::now();

    // Every call into the worker happens inside the spawned task, so a panic
    // anywhere in it becomes this stage's failure.
    let invocation = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let name = worker.name().to_string();
            info!(stage = %ctx.stage, attempt = ctx.attempt, worker = %name, "Invoking worker");
            let task = worker.task(&ctx);
            worker.invoke(&task, &ctx).await.map(|output| (name, output))
        })
    };
    let invoked = match invocation.await {
        Ok(result) => result,
        Err(e) => Err(BigglesError::Provider(format!("{stage} worker crashed: {e}"))),
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    match invoked {
        Ok((contributor, output)) => {
            let document = match store_output(
                &ctx.store,
                &contributor,
                stage,
                attempt,
                parent,
                &output,
                false,
            )
            .await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(stage = %stage, error = %e, "Could not store stage output");
                    None
                }
            };
            monitor.finish_stage(stage, duration_ms).await;
            info!(stage = %stage, links = output.links.len(), duration_ms, "Stage completed");
            StageRun {
                stage,
                result: StageResult::Completed { output },
                document,
            }
        }
        Err(e) => {
            warn!(stage = %stage, attempt, error = %e, "Stage failed");
            monitor.record_error(stage, e.to_string(), duration_ms).await;
            StageRun {
                stage,
                result: StageResult::Failed {
                    error: e.to_string(),
                },
                document: None,
            }
        }
    }
}

async fn store_output(
    store: &KnowledgeStore,
    contributor: &str,
    stage: Stage,
    attempt: u32,
    parent: Option<DocumentId>,
    output: &WorkerOutput,
    edited: bool,
) -> BigglesResult<DocumentId> {
    let mut doc = NewDocument::new(output.text.clone(), contributor, stage.document_kind())
        .with_tag(stage.as_str())
        .with_attribute("stage", stage.as_str())
        .with_attribute("attempt", attempt)
        .with_attribute("links", output.links.clone());
    if edited {
        doc = doc.with_tag("edited");
    }
    if let Some(parent) = parent {
        doc = doc.with_parent(parent);
    }
    store.add(doc).await
}

fn fold(run: &mut WorkflowRun, stage_run: StageRun) {
    let StageRun {
        stage,
        result,
        document,
    } = stage_run;
    if run.record_result(stage, result) {
        if let Some(id) = document {
            run.stage_documents.insert(stage, id);
        }
    } else {
        warn!(stage = %stage, "Retry failed, keeping the earlier result");
    }
}

/// Research documents hang off the authoritative scout document.
fn parent_for(run: &WorkflowRun, stage: Stage) -> Option<DocumentId> {
    if stage.is_research() {
        run.stage_documents.get(&Stage::Scout).copied()
    } else {
        None
    }
}

/// Whether `earlier`'s output is visible to `stage`.
fn precedes(earlier: Stage, stage: Stage) -> bool {
    match stage {
        Stage::Scout => false,
        Stage::Synthesis => earlier != Stage::Synthesis,
        _ => earlier == Stage::Scout,
    }
}

fn current_result(run: &WorkflowRun, stage: Stage) -> StageResult {
    run.stage_results
        .get(&stage)
        .cloned()
        .unwrap_or_else(|| missing_worker(stage))
}

fn missing_worker(stage: Stage) -> StageResult {
    StageResult::Failed {
        error: format!("no worker configured for {stage}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Worker for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, task: &str, _ctx: &WorkerContext) -> BigglesResult<WorkerOutput> {
            Ok(WorkerOutput::new(task))
        }
    }

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn orchestrator(config: OrchestratorConfig) -> Orchestrator {
        let workers = Stage::ALL
            .into_iter()
            .fold(StageWorkers::new(), |w, stage| w.with(stage, Arc::new(Echo)));
        Orchestrator::new(
            workers,
            Arc::new(KnowledgeStore::new()),
            Arc::new(CheckpointController::disabled()),
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_missing_workers_rejected() {
        let workers = StageWorkers::new().with(Stage::Scout, Arc::new(Echo));
        let err = Orchestrator::new(
            workers,
            Arc::new(KnowledgeStore::new()),
            Arc::new(CheckpointController::disabled()),
            OrchestratorConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, BigglesError::Config(_)));
        assert!(err.to_string().contains("history"));
    }

    #[test]
    fn test_precedence() {
        assert!(!precedes(Stage::Scout, Stage::Scout));
        assert!(precedes(Stage::Scout, Stage::News));
        assert!(!precedes(Stage::History, Stage::News));
        assert!(precedes(Stage::History, Stage::Synthesis));
        assert!(!precedes(Stage::Synthesis, Stage::Synthesis));
    }

    #[test]
    fn test_retry_targets_by_scope() {
        let all = orchestrator(OrchestratorConfig::default());
        assert_eq!(all.retry_targets(&["news".to_string()]), Stage::RESEARCH.to_vec());

        let selected = orchestrator(OrchestratorConfig {
            retry_scope: RetryScope::Selected,
            ..OrchestratorConfig::default()
        });
        assert_eq!(
            selected.retry_targets(&names(&["news", "NEWS", "books"])),
            vec![Stage::News, Stage::Books]
        );
        assert_eq!(
            selected.retry_targets(&names(&["scout", "poetry"])),
            Stage::RESEARCH.to_vec()
        );
        assert_eq!(selected.retry_targets(&[]), Stage::RESEARCH.to_vec());
    }

    #[test]
    fn test_allow_retry_ceiling() {
        let orch = orchestrator(OrchestratorConfig {
            max_retries: 2,
            ..OrchestratorConfig::default()
        });
        let kind = CheckpointKind::ScoutingReview;
        let mut retries = 0;
        assert!(orch.allow_retry(&kind, &mut retries).is_ok());
        assert!(orch.allow_retry(&kind, &mut retries).is_ok());
        assert_eq!(
            orch.allow_retry(&kind, &mut retries),
            Err(RunStatus::Cancelled { at: kind })
        );
    }

    #[tokio::test]
    async fn test_empty_topic_rejected() {
        let orch = orchestrator(OrchestratorConfig::default());
        assert!(orch.run("   ").await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_echo_run_completes() {
        let orch = orchestrator(OrchestratorConfig::default());
        let outcome = orch.run("grid storage").await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(outcome.run.stage_results.len(), 6);
        assert_eq!(outcome.run.checkpoint_history.len(), 3);
        assert_eq!(outcome.snapshot.documents.len(), 6);
        assert!(outcome.report.body.contains("synthesis research"));
    }
}
