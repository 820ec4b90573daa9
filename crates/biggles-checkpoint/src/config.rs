use biggles_core::CheckpointKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// How checkpoints behave for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HilMode {
    /// Resolve immediately, no interaction.
    Disabled,
    /// Resolve immediately but log it as an approval.
    AutoApprove,
    /// Ask the operator channel.
    Interactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub auto_approve: bool,
    /// Seconds before an unanswered checkpoint continues unchanged. 0 disables.
    #[serde(default)]
    pub default_timeout_secs: u64,
    /// Per-kind overrides keyed by checkpoint name, e.g. `research-review = 600`.
    #[serde(default)]
    pub timeouts: HashMap<String, u64>,
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            auto_approve: false,
            default_timeout_secs: 0,
            timeouts: HashMap::new(),
            journal_path: None,
        }
    }
}

impl CheckpointConfig {
    /// Checkpoints that resolve at once without an operator.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn auto_approve() -> Self {
        Self {
            auto_approve: true,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, kind: &CheckpointKind, secs: u64) -> Self {
        self.timeouts.insert(kind.as_str().to_string(), secs);
        self
    }

    pub fn with_journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal_path = Some(path.into());
        self
    }

    pub fn mode(&self) -> HilMode {
        if !self.enabled {
            HilMode::Disabled
        } else if self.auto_approve {
            HilMode::AutoApprove
        } else {
            HilMode::Interactive
        }
    }

    /// Effective timeout for a checkpoint kind, `None` when unbounded.
    pub fn timeout_for(&self, kind: &CheckpointKind) -> Option<Duration> {
        let secs = self
            .timeouts
            .get(kind.as_str())
            .copied()
            .unwrap_or(self.default_timeout_secs);
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}
