use async_trait::async_trait;
use biggles_core::{BigglesError, BigglesResult, CheckpointPrompt, OperatorChannel, OperatorDecision};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::Mutex;
use tracing::info;

/// Always continues unchanged. For non-interactive runs.
pub struct AutoContinueChannel;

#[async_trait]
impl OperatorChannel for AutoContinueChannel {
    async fn decide(&self, prompt: &CheckpointPrompt) -> BigglesResult<OperatorDecision> {
        info!(
            checkpoint = %prompt.checkpoint_kind,
            phase = %prompt.phase_label,
            "Auto-continuing (no operator attached)"
        );
        Ok(OperatorDecision::Continue)
    }
}

/// Replays a fixed queue of decisions, recording every prompt and rejection.
///
/// Running out of decisions is a channel error.
pub struct ScriptedChannel {
    decisions: Mutex<VecDeque<OperatorDecision>>,
    prompts: Mutex<Vec<CheckpointPrompt>>,
    rejections: Mutex<Vec<String>>,
}

impl ScriptedChannel {
    pub fn new(decisions: impl IntoIterator<Item = OperatorDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
            rejections: Mutex::new(Vec::new()),
        }
    }

    /// Every prompt presented so far, in order.
    pub async fn prompts(&self) -> Vec<CheckpointPrompt> {
        self.prompts.lock().await.clone()
    }

    /// Messages of every refused edit, in order.
    pub async fn rejections(&self) -> Vec<String> {
        self.rejections.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.decisions.lock().await.len()
    }
}

#[async_trait]
impl OperatorChannel for ScriptedChannel {
    async fn decide(&self, prompt: &CheckpointPrompt) -> BigglesResult<OperatorDecision> {
        self.prompts.lock().await.push(prompt.clone());
        self.decisions.lock().await.pop_front().ok_or_else(|| {
            BigglesError::Channel(format!(
                "no scripted decision left for {}",
                prompt.checkpoint_kind
            ))
        })
    }

    async fn notify_rejected(&self, _prompt: &CheckpointPrompt, error: &BigglesError) {
        self.rejections.lock().await.push(error.to_string());
    }
}

/// Boxed future returned by a [`CallbackChannel`] callback.
pub type DecisionFuture = Pin<Box<dyn Future<Output = BigglesResult<OperatorDecision>> + Send>>;

/// Delegates every decision to a user-provided async function.
pub struct CallbackChannel<F>
where
    F: Fn(CheckpointPrompt) -> DecisionFuture + Send + Sync,
{
    callback: F,
}

impl<F> CallbackChannel<F>
where
    F: Fn(CheckpointPrompt) -> DecisionFuture + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> OperatorChannel for CallbackChannel<F>
where
    F: Fn(CheckpointPrompt) -> DecisionFuture + Send + Sync,
{
    async fn decide(&self, prompt: &CheckpointPrompt) -> BigglesResult<OperatorDecision> {
        (self.callback)(prompt.clone()).await
    }
}
