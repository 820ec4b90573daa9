use crate::channel::AutoContinueChannel;
use crate::config::{CheckpointConfig, HilMode};
use crate::journal::CheckpointJournal;
use crate::pending::PendingCheckpoint;
use biggles_core::{
    BigglesResult, CheckpointKind, CheckpointRecord, Disposition, OperatorChannel,
    OperatorDecision, ResolutionCause,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

/// Result of one resolved checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointOutcome<T> {
    pub disposition: Disposition,
    /// The authoritative payload: the edited one after `continue-with-edits`,
    /// the original otherwise.
    pub payload: T,
    /// Stages named by a `retry` decision. Empty means no preference.
    pub retry_targets: Vec<String>,
    pub record: CheckpointRecord,
}

/// Counts over a controller's history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub total: usize,
    /// Keyed by the disposition's wire name.
    pub by_disposition: BTreeMap<String, usize>,
    /// Checkpoints resolved by their deadline.
    pub timed_out: usize,
    /// Summed over every checkpoint.
    pub rejected_edits: u32,
}

/// Suspends the workflow at named points and asks an operator what to do.
pub struct CheckpointController {
    config: CheckpointConfig,
    channel: Arc<dyn OperatorChannel>,
    history: RwLock<Vec<CheckpointRecord>>,
    journal: Option<CheckpointJournal>,
}

impl CheckpointController {
    pub fn new(config: CheckpointConfig, channel: Arc<dyn OperatorChannel>) -> Self {
        let journal = config.journal_path.clone().map(CheckpointJournal::new);
        Self {
            config,
            channel,
            history: RwLock::new(Vec::new()),
            journal,
        }
    }

    /// A controller with HIL off: every checkpoint continues unchanged at once.
    pub fn disabled() -> Self {
        Self::new(CheckpointConfig::disabled(), Arc::new(AutoContinueChannel))
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Run one checkpoint to resolution.
    ///
    /// Exactly one record is appended to the history per call, including when
    /// the operator channel fails. In that case the record is resolved as an
    /// abort and the channel error is returned.
    pub async fn checkpoint<T>(
        &self,
        kind: CheckpointKind,
        phase_label: &str,
        payload: T,
    ) -> BigglesResult<CheckpointOutcome<T>>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        let mut pending = PendingCheckpoint::open(kind.clone(), phase_label, payload);

        let result = match self.config.mode() {
            HilMode::Disabled => {
                pending.resolve(Disposition::ContinueUnchanged, ResolutionCause::HilDisabled)
            }
            HilMode::AutoApprove => {
                info!(checkpoint = %kind, phase = %phase_label, "Auto-approving checkpoint");
                pending.resolve(Disposition::ContinueUnchanged, ResolutionCause::AutoApproved)
            }
            HilMode::Interactive => self.ask_operator(&mut pending).await,
        };

        if let Err(e) = result {
            warn!(checkpoint = %kind, error = %e, "Checkpoint failed, recording abort");
            // Never resolved on the error path.
            let _ = pending.resolve(Disposition::Abort, ResolutionCause::ChannelError);
            self.append(pending.record().clone()).await;
            return Err(e);
        }

        let (record, payload) = pending.into_parts();
        self.append(record.clone()).await;

        let disposition = record.disposition().unwrap_or(Disposition::ContinueUnchanged);
        info!(
            checkpoint = %kind,
            phase = %phase_label,
            disposition = %disposition,
            resolved_by = ?record.resolved_by(),
            "Checkpoint resolved"
        );

        Ok(CheckpointOutcome {
            disposition,
            payload,
            retry_targets: record.retry_targets().to_vec(),
            record,
        })
    }

    /// Loop until the operator gives an acceptable decision or the timeout fires.
    async fn ask_operator<T>(&self, pending: &mut PendingCheckpoint<T>) -> BigglesResult<()>
    where
        T: Serialize + DeserializeOwned,
    {
        let kind = pending.record().checkpoint_kind().clone();
        let deadline = self
            .config
            .timeout_for(&kind)
            .map(|limit| Instant::now() + limit);
        let prompt = pending.prompt()?;

        loop {
            let decision = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.channel.decide(&prompt)).await {
                        Ok(decision) => decision?,
                        Err(_) => {
                            warn!(checkpoint = %kind, "Checkpoint timed out, continuing unchanged");
                            return pending
                                .resolve(Disposition::ContinueUnchanged, ResolutionCause::TimedOut);
                        }
                    }
                }
                None => self.channel.decide(&prompt).await?,
            };

            match decision {
                OperatorDecision::Edit { payload } => match pending.submit_edit(payload) {
                    Ok(()) => {
                        return pending
                            .resolve(Disposition::ContinueWithEdits, ResolutionCause::Operator)
                    }
                    Err(e) => {
                        warn!(checkpoint = %kind, error = %e, "Edited payload rejected");
                        self.channel.notify_rejected(&prompt, &e).await;
                    }
                },
                OperatorDecision::Retry { stages } => {
                    pending.set_retry_targets(stages);
                    return pending.resolve(Disposition::Retry, ResolutionCause::Operator);
                }
                other => return pending.resolve(other.disposition(), ResolutionCause::Operator),
            }
        }
    }

    async fn append(&self, record: CheckpointRecord) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&record).await {
                warn!(path = %journal.path().display(), error = %e, "Checkpoint journal write failed");
            }
        }
        self.history.write().await.push(record);
    }

    /// Every record so far, in resolution order.
    pub async fn history(&self) -> Vec<CheckpointRecord> {
        self.history.read().await.clone()
    }

    pub async fn summary(&self) -> CheckpointSummary {
        let history = self.history.read().await;
        let mut summary = CheckpointSummary {
            total: history.len(),
            ..CheckpointSummary::default()
        };
        for record in history.iter() {
            if let Some(d) = record.disposition() {
                *summary.by_disposition.entry(d.to_string()).or_insert(0) += 1;
            }
            if record.resolved_by() == Some(ResolutionCause::TimedOut) {
                summary.timed_out += 1;
            }
            summary.rejected_edits += record.rejected_edits();
        }
        summary
    }
}
