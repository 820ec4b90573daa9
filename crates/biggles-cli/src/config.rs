use biggles_checkpoint::CheckpointConfig;
use biggles_orchestrator::OrchestratorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Contents of `biggles.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BigglesConfig {
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Snapshot file loaded at start and rewritten after every add.
    #[serde(default)]
    pub persist_path: Option<PathBuf>,
    /// Switch search to vector mode with the local hashing embedding.
    #[serde(default)]
    pub embeddings: bool,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persist_path: None,
            embeddings: false,
            dimension: default_dimension(),
        }
    }
}

/// External program used as the text-completion backend.
///
/// The prompt is written to its stdin, the system prompt is passed in the
/// `BIGGLES_SYSTEM_PROMPT` environment variable, and stdout is the answer.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds before a completion is abandoned. 0 waits forever.
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            timeout_secs: default_completion_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub json: bool,
}

fn default_dimension() -> usize {
    256
}
fn default_completion_timeout() -> u64 {
    300
}

impl BigglesConfig {
    pub fn from_toml(data: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(data)?)
    }

    /// Read the config file. A missing file at the default location means defaults.
    pub async fn load(path: &Path, required: bool) -> anyhow::Result<Self> {
        if !required && !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Self::default());
        }
        let data = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        Self::from_toml(&data)
            .map_err(|e| anyhow::anyhow!("Invalid config file '{}': {}", path.display(), e))
    }
}
