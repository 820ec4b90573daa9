use biggles_core::{BigglesError, BigglesResult, CheckpointRecord};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only JSON Lines file of resolved checkpoint records.
///
/// Audit only: nothing reads it back to resume a run.
pub struct CheckpointJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CheckpointJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line.
    pub async fn append(&self, record: &CheckpointRecord) -> BigglesResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read every record in file order, for inspection.
    pub async fn read_all(path: &Path) -> BigglesResult<Vec<CheckpointRecord>> {
        let data = tokio::fs::read_to_string(path).await?;
        data.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    BigglesError::Validation(format!("journal line {}: {e}", n + 1))
                })
            })
            .collect()
    }
}
