//! Checkpoint vocabulary for human-in-the-loop (HIL) review.
//!
//! These types live in `biggles-core` so that `biggles-checkpoint` (which
//! implements the controller) and `biggles-cli` (which implements the stdin
//! operator) can share them without depending on each other.

use crate::{BigglesError, BigglesResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named suspension point in the workflow.
///
/// The three built-in points cover the fixed research plan; `Custom` keeps the
/// set open for other workflows. Serialized as its kebab-case name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CheckpointKind {
    ScoutingReview,
    ResearchReview,
    ReportReview,
    Custom(String),
}

impl CheckpointKind {
    pub fn as_str(&self) -> &str {
        match self {
            CheckpointKind::ScoutingReview => "scouting-review",
            CheckpointKind::ResearchReview => "research-review",
            CheckpointKind::ReportReview => "report-review",
            CheckpointKind::Custom(name) => name,
        }
    }
}

impl From<String> for CheckpointKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "scouting-review" => CheckpointKind::ScoutingReview,
            "research-review" => CheckpointKind::ResearchReview,
            "report-review" => CheckpointKind::ReportReview,
            _ => CheckpointKind::Custom(value),
        }
    }
}

impl From<CheckpointKind> for String {
    fn from(kind: CheckpointKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved outcome of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    ContinueUnchanged,
    ContinueWithEdits,
    Retry,
    Skip,
    Abort,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::ContinueUnchanged => "continue-unchanged",
            Disposition::ContinueWithEdits => "continue-with-edits",
            Disposition::Retry => "retry",
            Disposition::Skip => "skip",
            Disposition::Abort => "abort",
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a checkpoint reached its disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionCause {
    /// Human-in-the-loop is off for the run.
    HilDisabled,
    /// Auto-approve mode resolved without interaction.
    AutoApproved,
    /// An operator chose the disposition.
    Operator,
    /// The per-kind timeout elapsed.
    TimedOut,
    /// The operator channel failed; recorded as an abort.
    ChannelError,
}

/// Audit record of one checkpoint invocation.
///
/// Created pending at checkpoint entry; [`CheckpointRecord::resolve`] sets the
/// disposition exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    id: Uuid,
    checkpoint_kind: CheckpointKind,
    phase_label: String,
    opened_at: DateTime<Utc>,
    #[serde(default)]
    disposition: Option<Disposition>,
    #[serde(default)]
    resolved_by: Option<ResolutionCause>,
    #[serde(default)]
    resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    rejected_edits: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    retry_targets: Vec<String>,
}

impl CheckpointRecord {
    /// Open a new pending record.
    pub fn open(checkpoint_kind: CheckpointKind, phase_label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            checkpoint_kind,
            phase_label: phase_label.into(),
            opened_at: Utc::now(),
            disposition: None,
            resolved_by: None,
            resolved_at: None,
            rejected_edits: 0,
            retry_targets: Vec::new(),
        }
    }

    /// Set the terminal disposition. Fails if the record is already resolved.
    pub fn resolve(
        &mut self,
        disposition: Disposition,
        cause: ResolutionCause,
    ) -> BigglesResult<()> {
        if let Some(existing) = self.disposition {
            return Err(BigglesError::Validation(format!(
                "checkpoint {} already resolved as {existing}",
                self.id
            )));
        }
        self.disposition = Some(disposition);
        self.resolved_by = Some(cause);
        self.resolved_at = Some(Utc::now());
        Ok(())
    }

    /// Count a refused replacement payload.
    pub fn note_rejected_edit(&mut self) {
        self.rejected_edits += 1;
    }

    /// Remember the stage subset named by a `retry` decision.
    pub fn set_retry_targets(&mut self, targets: Vec<String>) {
        self.retry_targets = targets;
    }

    /// Unique per checkpoint invocation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Which review point this record belongs to.
    pub fn checkpoint_kind(&self) -> &CheckpointKind {
        &self.checkpoint_kind
    }

    /// Human-readable name of the phase under review.
    pub fn phase_label(&self) -> &str {
        &self.phase_label
    }

    /// When the checkpoint was opened.
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// `None` while the checkpoint is still pending.
    pub fn disposition(&self) -> Option<Disposition> {
        self.disposition
    }

    /// What produced the disposition: the operator, a timeout, a policy or a channel error.
    pub fn resolved_by(&self) -> Option<ResolutionCause> {
        self.resolved_by
    }

    /// Set together with the disposition.
    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Replacement payloads refused before the final decision.
    pub fn rejected_edits(&self) -> u32 {
        self.rejected_edits
    }

    /// Stage names from a `retry` decision, as the operator gave them.
    pub fn retry_targets(&self) -> &[String] {
        &self.retry_targets
    }

    /// True once a disposition is set.
    pub fn is_resolved(&self) -> bool {
        self.disposition.is_some()
    }
}

/// What the operator is shown at a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointPrompt {
    /// Which review point is asking.
    pub checkpoint_kind: CheckpointKind,
    /// Human-readable name of the phase under review.
    pub phase_label: String,
    /// Bounded, human-readable preview of the payload.
    pub summary: String,
    /// The full payload as JSON, used as the starting point for edits.
    pub payload: serde_json::Value,
}

/// A decision returned by an [`OperatorChannel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OperatorDecision {
    Continue,
    /// Replace the payload. Validated by the controller before acceptance.
    Edit { payload: serde_json::Value },
    /// Re-run the producer. An empty list means "whatever the workflow's default is".
    Retry {
        #[serde(default)]
        stages: Vec<String>,
    },
    Skip,
    Abort,
}

impl OperatorDecision {
    /// The disposition this decision resolves to once accepted.
    pub fn disposition(&self) -> Disposition {
        match self {
            OperatorDecision::Continue => Disposition::ContinueUnchanged,
            OperatorDecision::Edit { .. } => Disposition::ContinueWithEdits,
            OperatorDecision::Retry { .. } => Disposition::Retry,
            OperatorDecision::Skip => Disposition::Skip,
            OperatorDecision::Abort => Disposition::Abort,
        }
    }
}

/// Channel through which checkpoint prompts reach an operator.
/// Implementations can be CLI prompts, scripted queues, callbacks, etc.
#[async_trait]
pub trait OperatorChannel: Send + Sync {
    /// Present the prompt and wait for a decision.
    async fn decide(&self, prompt: &CheckpointPrompt) -> BigglesResult<OperatorDecision>;

    /// Tell the operator a replacement payload was refused. The checkpoint stays open.
    async fn notify_rejected(&self, _prompt: &CheckpointPrompt, _error: &BigglesError) {}
}
