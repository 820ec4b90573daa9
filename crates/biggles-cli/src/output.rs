use biggles_core::BigglesResult;
use biggles_orchestrator::{RunStatus, StageResult, WorkflowOutcome};
use std::path::{Path, PathBuf};
use tracing::info;

/// Write a run's results under `dir`: one text file per stage, plus the
/// report, the checkpoint history and the store snapshot as JSON.
pub async fn save_outcome(dir: &Path, outcome: &WorkflowOutcome) -> BigglesResult<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;
    let mut written = Vec::new();

    for (stage, result) in &outcome.run.stage_results {
        let path = dir.join(format!("{stage}.txt"));
        let body = match result {
            StageResult::Completed { output } => {
                let mut body = output.text.clone();
                if !output.links.is_empty() {
                    body.push_str("\n\nLinks:\n");
                    for link in &output.links {
                        body.push_str(&format!("- {link}\n"));
                    }
                }
                body
            }
            StageResult::Failed { error } => format!("FAILED: {error}\n"),
        };
        tokio::fs::write(&path, body).await?;
        written.push(path);
    }

    let report = dir.join("report.json");
    tokio::fs::write(&report, serde_json::to_string_pretty(&outcome.report)?).await?;
    written.push(report);

    let run = dir.join("run.json");
    tokio::fs::write(&run, serde_json::to_string_pretty(&outcome.run)?).await?;
    written.push(run);

    let snapshot = dir.join("knowledge.json");
    outcome.snapshot.write_to(&snapshot).await?;
    written.push(snapshot);

    info!(dir = %dir.display(), files = written.len(), "Results saved");
    Ok(written)
}

/// One-line description of how a run ended.
pub fn status_line(outcome: &WorkflowOutcome) -> String {
    match &outcome.status {
        RunStatus::Completed => format!(
            "Completed: {} stages, {} documents, {} checkpoints",
            outcome.run.stage_results.len(),
            outcome.snapshot.documents.len(),
            outcome.run.checkpoint_history.len()
        ),
        RunStatus::Cancelled { at } => format!("Cancelled at {at}"),
        RunStatus::Failed { reason } => format!("Failed: {reason}"),
    }
}
