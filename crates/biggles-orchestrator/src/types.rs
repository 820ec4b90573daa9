use biggles_core::{CheckpointKind, CheckpointRecord};
use biggles_knowledge::{DocumentId, DocumentKind, KnowledgeSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One named step of the fixed research plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Identifies trends. Runs first, alone.
    Scout,
    /// Historical context.
    History,
    /// Papers and academic research.
    Academic,
    /// Recent news coverage.
    News,
    /// Books and long-form resources.
    Books,
    /// Final report. Runs last, alone, with the whole store.
    Synthesis,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Scout,
        Stage::History,
        Stage::Academic,
        Stage::News,
        Stage::Books,
        Stage::Synthesis,
    ];

    /// The four stages that fan out after scouting.
    pub const RESEARCH: [Stage; 4] = [Stage::History, Stage::Academic, Stage::News, Stage::Books];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scout => "scout",
            Stage::History => "history",
            Stage::Academic => "academic",
            Stage::News => "news",
            Stage::Books => "books",
            Stage::Synthesis => "synthesis",
        }
    }

    /// Kind under which this stage's output is stored.
    pub fn document_kind(&self) -> DocumentKind {
        match self {
            Stage::Scout | Stage::History => DocumentKind::ResearchFinding,
            Stage::Academic => DocumentKind::PaperSummary,
            Stage::News => DocumentKind::NewsSummary,
            Stage::Books => DocumentKind::BookSummary,
            Stage::Synthesis => DocumentKind::FinalReport,
        }
    }

    pub fn is_research(&self) -> bool {
        Stage::RESEARCH.contains(self)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

/// What a worker hands back: free text plus the links it cited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub text: String,
    #[serde(default)]
    pub links: Vec<String>,
}

impl WorkerOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            links: Vec::new(),
        }
    }

    pub fn with_links(mut self, links: Vec<String>) -> Self {
        self.links = links;
        self
    }
}

/// A stage's raw output or its failure marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResult {
    Completed { output: WorkerOutput },
    Failed { error: String },
}

impl StageResult {
    pub fn output(&self) -> Option<&WorkerOutput> {
        match self {
            StageResult::Completed { output } => Some(output),
            StageResult::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageResult::Failed { .. })
    }
}

/// Aggregate state of one workflow execution.
///
/// Passed by `&mut` through every stage; there is no global "current run".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub topic: String,
    pub started_at: DateTime<Utc>,
    /// Latest authoritative result per stage.
    pub stage_results: BTreeMap<Stage, StageResult>,
    /// Store document holding each stage's current output.
    pub stage_documents: BTreeMap<Stage, DocumentId>,
    /// Invocations so far per stage, starting at 1.
    pub attempts: BTreeMap<Stage, u32>,
    /// Every checkpoint resolved during this run, in order.
    pub checkpoint_history: Vec<CheckpointRecord>,
}

impl WorkflowRun {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            started_at: Utc::now(),
            stage_results: BTreeMap::new(),
            stage_documents: BTreeMap::new(),
            attempts: BTreeMap::new(),
            checkpoint_history: Vec::new(),
        }
    }

    /// Store a fresh result for `stage`.
    ///
    /// A failure never replaces an earlier success, so the run always keeps
    /// its last known-good state. Returns whether the entry changed.
    pub fn record_result(&mut self, stage: Stage, result: StageResult) -> bool {
        let keeps_success = result.is_failed()
            && self
                .stage_results
                .get(&stage)
                .is_some_and(|existing| !existing.is_failed());
        if keeps_success {
            return false;
        }
        self.stage_results.insert(stage, result);
        true
    }

    pub fn next_attempt(&mut self, stage: Stage) -> u32 {
        let attempt = self.attempts.entry(stage).or_insert(0);
        *attempt += 1;
        *attempt
    }

    pub fn output(&self, stage: Stage) -> Option<&WorkerOutput> {
        self.stage_results.get(&stage).and_then(StageResult::output)
    }

    /// Authoritative outputs of every completed stage, in stage order.
    pub fn completed_outputs(&self) -> BTreeMap<Stage, WorkerOutput> {
        self.stage_results
            .iter()
            .filter_map(|(stage, result)| result.output().map(|o| (*stage, o.clone())))
            .collect()
    }

    /// Results of the four research stages that have run.
    pub fn research_results(&self) -> BTreeMap<Stage, StageResult> {
        self.stage_results
            .iter()
            .filter(|(stage, _)| stage.is_research())
            .map(|(stage, result)| (*stage, result.clone()))
            .collect()
    }

    pub fn failed_stages(&self) -> Vec<Stage> {
        self.stage_results
            .iter()
            .filter(|(_, result)| result.is_failed())
            .map(|(stage, _)| *stage)
            .collect()
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// The operator aborted, or a checkpoint ran out of retries.
    Cancelled { at: CheckpointKind },
    Failed { reason: String },
}

/// The final artifact. Rendering to a markup dialect is left to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub topic: String,
    /// Synthesis text; empty if synthesis never completed.
    pub body: String,
    /// Authoritative output of every completed non-synthesis stage.
    pub sections: BTreeMap<Stage, WorkerOutput>,
    /// Every cited link across all stages, first occurrence wins.
    pub references: Vec<String>,
    pub failed_stages: Vec<Stage>,
    /// Store size when synthesis was invoked.
    pub documents_consulted: usize,
}

impl Report {
    pub fn assemble(run: &WorkflowRun, documents_consulted: usize) -> Self {
        let outputs = run.completed_outputs();
        let body = outputs
            .get(&Stage::Synthesis)
            .map(|o| o.text.clone())
            .unwrap_or_default();
        let references = dedup_links(outputs.values().flat_map(|o| o.links.iter().cloned()));
        let sections = outputs
            .into_iter()
            .filter(|(stage, _)| *stage != Stage::Synthesis)
            .collect();
        Self {
            topic: run.topic.clone(),
            body,
            sections,
            references,
            failed_stages: run.failed_stages(),
            documents_consulted,
        }
    }
}

/// Everything a finished run hands back, whatever its status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub status: RunStatus,
    pub run: WorkflowRun,
    /// Empty body unless synthesis produced one.
    pub report: Report,
    /// The knowledge store as it stood when the run ended.
    pub snapshot: KnowledgeSnapshot,
}

impl WorkflowOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Order-preserving de-duplication.
pub fn dedup_links<I>(links: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = std::collections::HashSet::new();
    links
        .into_iter()
        .filter(|link| seen.insert(link.clone()))
        .collect()
}
