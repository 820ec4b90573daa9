use crate::types::Stage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Current activity of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Idle,
    Working,
    AwaitingReview,
    Failed,
}

/// Counters accumulated across every attempt of a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetrics {
    /// Worker invocations started, retries included.
    pub invocations: u32,
    /// Invocations that ended in a failure marker.
    pub errors: u32,
    /// Wall time spent in the worker, summed over attempts.
    pub duration_ms: u64,
}

/// Live view of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    pub stage: Stage,
    pub status: StageStatus,
    /// Most recent failure message. Cleared by the next success.
    pub last_error: Option<String>,
    pub metrics: StageMetrics,
}

/// Tracks state and metrics for every stage of a workflow.
pub struct StageMonitor {
    states: Arc<RwLock<HashMap<Stage, StageState>>>,
}

impl StageMonitor {
    pub fn new() -> Self {
        let states = Stage::ALL
            .into_iter()
            .map(|stage| {
                (
                    stage,
                    StageState {
                        stage,
                        status: StageStatus::Idle,
                        last_error: None,
                        metrics: StageMetrics::default(),
                    },
                )
            })
            .collect();
        Self {
            states: Arc::new(RwLock::new(states)),
        }
    }

    /// Mark a stage as invoked.
    pub async fn start_stage(&self, stage: Stage) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&stage) {
            state.status = StageStatus::Working;
            state.metrics.invocations += 1;
        }
    }

    /// Mark a stage as finished successfully.
    pub async fn finish_stage(&self, stage: Stage, duration_ms: u64) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&stage) {
            state.status = StageStatus::Idle;
            state.last_error = None;
            state.metrics.duration_ms += duration_ms;
        }
    }

    /// Mark a stage as failed with `error`.
    pub async fn record_error(&self, stage: Stage, error: impl Into<String>, duration_ms: u64) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&stage) {
            state.status = StageStatus::Failed;
            state.last_error = Some(error.into());
            state.metrics.errors += 1;
            state.metrics.duration_ms += duration_ms;
        }
    }

    /// Mark stages as waiting on a checkpoint. Failed stages keep their status.
    pub async fn awaiting_review(&self, stages: &[Stage]) {
        let mut states = self.states.write().await;
        for stage in stages {
            if let Some(state) = states.get_mut(stage) {
                if state.status != StageStatus::Failed {
                    state.status = StageStatus::AwaitingReview;
                }
            }
        }
    }

    /// Clear the review flag once a checkpoint resolves.
    pub async fn review_done(&self, stages: &[Stage]) {
        let mut states = self.states.write().await;
        for stage in stages {
            if let Some(state) = states.get_mut(stage) {
                if state.status == StageStatus::AwaitingReview {
                    state.status = StageStatus::Idle;
                }
            }
        }
    }

    /// All stage states, in stage order.
    pub async fn snapshot(&self) -> Vec<StageState> {
        let states = self.states.read().await;
        Stage::ALL
            .iter()
            .filter_map(|stage| states.get(stage).cloned())
            .collect()
    }

    pub async fn get_state(&self, stage: Stage) -> Option<StageState> {
        self.states.read().await.get(&stage).cloned()
    }

    pub async fn to_json(&self) -> serde_json::Value {
        let stages = self.snapshot().await;
        let total_errors: u32 = stages.iter().map(|s| s.metrics.errors).sum();
        serde_json::json!({
            "stages": stages,
            "total_errors": total_errors,
        })
    }
}

impl Default for StageMonitor {
    fn default() -> Self {
        Self::new()
    }
}
