use serde::{Deserialize, Serialize};

/// Which research stages a `retry` at research review re-runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryScope {
    /// All four research stages.
    #[default]
    All,
    /// Only the stages the operator named; all four if none were named.
    Selected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Retries allowed per checkpoint. One more `retry` is treated as abort.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_scope: RetryScope,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_scope: RetryScope::default(),
        }
    }
}
