use async_trait::async_trait;
use biggles_core::{BigglesError, BigglesResult, CheckpointPrompt, OperatorChannel, OperatorDecision};
use std::io::{BufRead, Write};
use tokio::sync::{mpsc, Mutex};

/// One parsed line of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Continue,
    Edit,
    Retry(Vec<String>),
    Skip,
    Abort,
}

/// Parse a disposition token: `a`/`continue`, `e`/`edit`, `r`/`retry [stages...]`,
/// `s`/`skip`, `q`/`abort`.
pub fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let token = words.next()?.to_lowercase();
    let command = match token.as_str() {
        "a" | "continue" => Command::Continue,
        "e" | "edit" => Command::Edit,
        "r" | "retry" => Command::Retry(
            words
                .flat_map(|w| w.split(','))
                .filter(|w| !w.is_empty())
                .map(str::to_lowercase)
                .collect(),
        ),
        "s" | "skip" => Command::Skip,
        "q" | "abort" => Command::Abort,
        _ => return None,
    };
    Some(command)
}

/// Operator channel on the terminal: prompts on stdout, answers on stdin.
///
/// A reader thread forwards stdin lines, so input typed while a checkpoint
/// times out is kept for the next prompt. Closing stdin is a channel error.
pub struct StdinOperatorChannel {
    lines: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl StdinOperatorChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self {
            lines: Mutex::new(rx),
        }
    }

    async fn next_line(&self) -> BigglesResult<String> {
        self.lines
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| BigglesError::Channel("operator input closed".to_string()))
    }

    /// Read JSON lines until an empty line.
    async fn read_json_block(&self) -> BigglesResult<String> {
        let mut block = String::new();
        loop {
            let line = self.next_line().await?;
            if line.trim().is_empty() {
                return Ok(block);
            }
            block.push_str(&line);
            block.push('\n');
        }
    }
}

impl Default for StdinOperatorChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn show(prompt: &CheckpointPrompt) {
    println!();
    println!("=== Checkpoint: {} ({}) ===", prompt.checkpoint_kind, prompt.phase_label);
    println!("{}", prompt.summary);
    println!();
    println!("[a] continue  [e] edit  [r] retry [stages]  [s] skip  [q] abort");
}

#[async_trait]
impl OperatorChannel for StdinOperatorChannel {
    async fn decide(&self, prompt: &CheckpointPrompt) -> BigglesResult<OperatorDecision> {
        show(prompt);
        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let line = self.next_line().await?;
            let Some(command) = parse_command(&line) else {
                println!("Unrecognised choice '{}'.", line.trim());
                continue;
            };
            let decision = match command {
                Command::Continue => OperatorDecision::Continue,
                Command::Skip => OperatorDecision::Skip,
                Command::Abort => OperatorDecision::Abort,
                Command::Retry(stages) => OperatorDecision::Retry { stages },
                Command::Edit => {
                    println!("Current payload:");
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&prompt.payload)
                            .unwrap_or_else(|_| prompt.payload.to_string())
                    );
                    println!("Enter the replacement JSON, then an empty line:");
                    let block = self.read_json_block().await?;
                    match serde_json::from_str(&block) {
                        Ok(payload) => OperatorDecision::Edit { payload },
                        Err(e) => {
                            println!("Not valid JSON ({e}). Choose again.");
                            continue;
                        }
                    }
                }
            };
            return Ok(decision);
        }
    }

    async fn notify_rejected(&self, prompt: &CheckpointPrompt, error: &BigglesError) {
        println!("Edit rejected: {error}");
        show(prompt);
    }
}
