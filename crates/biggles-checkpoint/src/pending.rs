use biggles_core::{
    BigglesError, BigglesResult, CheckpointKind, CheckpointPrompt, CheckpointRecord, Disposition,
    ResolutionCause,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Maximum number of characters of payload shown in a prompt summary.
pub const SUMMARY_LIMIT: usize = 1000;

/// One checkpoint between entry and resolution.
///
/// Holds the authoritative payload. An edit only replaces it after the
/// replacement deserializes into `T`; a refused edit leaves both the payload
/// and the pending state untouched.
#[derive(Debug)]
pub struct PendingCheckpoint<T> {
    record: CheckpointRecord,
    payload: T,
}

impl<T> PendingCheckpoint<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn open(kind: CheckpointKind, phase_label: impl Into<String>, payload: T) -> Self {
        Self {
            record: CheckpointRecord::open(kind, phase_label),
            payload,
        }
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn record(&self) -> &CheckpointRecord {
        &self.record
    }

    pub fn is_pending(&self) -> bool {
        !self.record.is_resolved()
    }

    /// Build the operator-facing view of the current payload.
    pub fn prompt(&self) -> BigglesResult<CheckpointPrompt> {
        let payload = serde_json::to_value(&self.payload)?;
        Ok(CheckpointPrompt {
            checkpoint_kind: self.record.checkpoint_kind().clone(),
            phase_label: self.record.phase_label().to_string(),
            summary: summarize(&payload)?,
            payload,
        })
    }

    /// Offer a replacement payload.
    pub fn submit_edit(&mut self, replacement: serde_json::Value) -> BigglesResult<()> {
        if !self.is_pending() {
            return Err(BigglesError::Validation(format!(
                "checkpoint {} is already resolved",
                self.record.id()
            )));
        }
        match serde_json::from_value::<T>(replacement) {
            Ok(payload) => {
                self.payload = payload;
                Ok(())
            }
            Err(e) => {
                self.record.note_rejected_edit();
                Err(BigglesError::Validation(format!(
                    "edited payload for {} does not match the expected shape: {e}",
                    self.record.checkpoint_kind()
                )))
            }
        }
    }

    pub fn set_retry_targets(&mut self, targets: Vec<String>) {
        self.record.set_retry_targets(targets);
    }

    /// Terminal transition. A second call fails with a validation error.
    pub fn resolve(&mut self, disposition: Disposition, cause: ResolutionCause) -> BigglesResult<()> {
        self.record.resolve(disposition, cause)
    }

    pub fn into_parts(self) -> (CheckpointRecord, T) {
        (self.record, self.payload)
    }
}

/// Plain strings are shown as-is, anything else as pretty JSON.
fn summarize(payload: &serde_json::Value) -> BigglesResult<String> {
    let full = match payload {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other)?,
    };
    let total = full.chars().count();
    if total <= SUMMARY_LIMIT {
        return Ok(full);
    }
    let mut preview: String = full.chars().take(SUMMARY_LIMIT).collect();
    preview.push_str(&format!("\n... ({} more characters)", total - SUMMARY_LIMIT));
    Ok(preview)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Finding {
        text: String,
        links: Vec<String>,
    }

    fn finding(text: &str) -> Finding {
        Finding {
            text: text.into(),
            links: vec![],
        }
    }

    #[test]
    fn test_valid_edit_replaces_payload() {
        let mut cp = PendingCheckpoint::open(CheckpointKind::ScoutingReview, "Scouting", finding("A"));
        cp.submit_edit(json!({"text": "B", "links": ["https://b.io"]}))
            .unwrap();
        assert_eq!(cp.payload().text, "B");
        assert!(cp.is_pending());
    }

    #[test]
    fn test_invalid_edit_keeps_original_and_stays_pending() {
        let mut cp = PendingCheckpoint::open(CheckpointKind::ScoutingReview, "Scouting", finding("A"));
        let err = cp.submit_edit(json!({"text": 42})).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(cp.payload(), &finding("A"));
        assert!(cp.is_pending());
        assert_eq!(cp.record().rejected_edits(), 1);
    }

    #[test]
    fn test_edit_after_resolution_rejected() {
        let mut cp = PendingCheckpoint::open(CheckpointKind::ReportReview, "Report", finding("A"));
        cp.resolve(Disposition::ContinueUnchanged, ResolutionCause::Operator)
            .unwrap();
        assert!(cp.submit_edit(json!({"text": "B", "links": []})).is_err());
        assert!(cp
            .resolve(Disposition::Abort, ResolutionCause::Operator)
            .is_err());
        assert_eq!(cp.payload().text, "A");
    }

    #[test]
    fn test_prompt_summary_is_bounded() {
        let long = "x".repeat(SUMMARY_LIMIT + 250);
        let cp = PendingCheckpoint::open(CheckpointKind::ReportReview, "Report", long.clone());
        let prompt = cp.prompt().unwrap();
        assert!(prompt.summary.starts_with(&"x".repeat(SUMMARY_LIMIT)));
        assert!(prompt.summary.ends_with("(250 more characters)"));
        assert_eq!(prompt.payload, json!(long));
        assert_eq!(prompt.phase_label, "Report");
    }

    #[test]
    fn test_short_summary_untouched() {
        let cp = PendingCheckpoint::open(CheckpointKind::ScoutingReview, "Scouting", finding("A"));
        let prompt = cp.prompt().unwrap();
        assert!(prompt.summary.contains("\"text\": \"A\""));
    }
}
