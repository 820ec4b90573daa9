use crate::document::Document;
use biggles_core::{BigglesError, BigglesResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable export of a knowledge store, documents in insertion order.
///
/// Index membership is not stored; it is derived from the documents on import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnapshot {
    /// Format version; import refuses anything but [`SNAPSHOT_VERSION`].
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub documents: Vec<Document>,
}

impl KnowledgeSnapshot {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            exported_at: Utc::now(),
            documents,
        }
    }

    /// Drop cached embeddings to keep the snapshot compact.
    pub fn without_embeddings(mut self) -> Self {
        for doc in &mut self.documents {
            doc.embedding = None;
        }
        self
    }

    pub fn to_json(&self) -> BigglesResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a snapshot. Malformed input is a validation failure, not a JSON one.
    pub fn from_json(data: &str) -> BigglesResult<Self> {
        serde_json::from_str(data)
            .map_err(|e| BigglesError::Validation(format!("malformed snapshot: {e}")))
    }

    pub async fn read_from(path: &Path) -> BigglesResult<Self> {
        let data = tokio::fs::read_to_string(path).await?;
        Self::from_json(&data)
    }

    /// Write via a sibling temp file and rename, so readers never see half a snapshot.
    pub async fn write_to(&self, path: &Path) -> BigglesResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, self.to_json()?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
