use crate::config::CompletionConfig;
use async_trait::async_trait;
use biggles_core::{BigglesError, BigglesResult};
use biggles_orchestrator::TextCompletion;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Environment variable carrying the system prompt to the backend program.
pub const SYSTEM_PROMPT_ENV: &str = "BIGGLES_SYSTEM_PROMPT";

/// Text completion through an external program.
///
/// The prompt goes to the program's stdin; its stdout is the completion.
/// A non-zero exit status is a provider error.
pub struct CommandCompletion {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandCompletion {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn from_config(config: &CompletionConfig) -> BigglesResult<Self> {
        if config.program.trim().is_empty() {
            return Err(BigglesError::Config(
                "no completion program configured; set [completion] program in the config file"
                    .to_string(),
            ));
        }
        let completion = Self::new(config.program.clone(), config.args.clone());
        Ok(match config.timeout_secs {
            0 => completion,
            secs => completion.with_timeout(Duration::from_secs(secs)),
        })
    }

    async fn execute(&self, system: &str, prompt: &str) -> BigglesResult<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(SYSTEM_PROMPT_ENV, system)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BigglesError::Provider(format!("failed to start '{}': {e}", self.program))
            })?;

        // The exit status decides the outcome, even if the program stopped reading early.
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                debug!(program = %self.program, error = %e, "Backend closed stdin early");
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BigglesError::Provider(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl TextCompletion for CommandCompletion {
    async fn complete(&self, system: &str, prompt: &str) -> BigglesResult<String> {
        debug!(program = %self.program, prompt_chars = prompt.len(), "Running completion command");
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.execute(system, prompt))
                .await
                .map_err(|_| {
                    BigglesError::Provider(format!(
                        "'{}' did not finish within {}s",
                        self.program,
                        limit.as_secs()
                    ))
                })?,
            None => self.execute(system, prompt).await,
        }
    }
}
