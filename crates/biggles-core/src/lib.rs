//! Core types and error definitions for the Biggles research workflow.
//!
//! This crate provides the foundational types shared across all Biggles crates:
//! the error taxonomy and the checkpoint vocabulary used by the human-in-the-loop
//! controller and the workflow orchestrator.
//!
//! # Main types
//!
//! - [`BigglesError`] — Unified error enum for all Biggles subsystems.
//! - [`BigglesResult`] — Convenience alias for `Result<T, BigglesError>`.
//! - [`checkpoint::CheckpointKind`] — Named suspension points in a workflow.
//! - [`checkpoint::Disposition`] — Resolved outcome of a checkpoint.
//! - [`checkpoint::CheckpointRecord`] — Audit record of one checkpoint invocation.
//! - [`checkpoint::OperatorChannel`] — Surface through which an operator decides.

/// Checkpoint vocabulary for human-in-the-loop review.
pub mod checkpoint;

pub use checkpoint::{
    CheckpointKind, CheckpointPrompt, CheckpointRecord, Disposition, OperatorChannel,
    OperatorDecision, ResolutionCause,
};

// --- Error types ---

/// Top-level error type for the Biggles workspace.
///
/// The first four variants form the domain taxonomy; the rest cover the
/// ambient plumbing (configuration, operator I/O, serialization).
#[derive(Debug, thiserror::Error)]
pub enum BigglesError {
    /// Lookup of an unknown document id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A `parent_id` that points at no existing document.
    #[error("Reference error: {0}")]
    Reference(String),

    /// A malformed edited payload, import snapshot, or illegal state transition.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A worker or text-completion provider failed.
    #[error("Provider error: {0}")]
    Provider(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error talking to the operator (stdin closed, callback failed, ...).
    #[error("Channel error: {0}")]
    Channel(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BigglesError {
    /// Whether this error belongs to the validation class.
    pub fn is_validation(&self) -> bool {
        matches!(self, BigglesError::Validation(_))
    }
}

/// A convenience `Result` alias using [`BigglesError`].
pub type BigglesResult<T> = Result<T, BigglesError>;
