//! Human-in-the-loop checkpoints for the Biggles workflow.
//!
//! A checkpoint suspends the workflow, shows the pending payload to an
//! operator through an [`OperatorChannel`](biggles_core::OperatorChannel) and
//! resolves to exactly one [`Disposition`](biggles_core::Disposition). Every
//! invocation appends exactly one [`CheckpointRecord`](biggles_core::CheckpointRecord)
//! to the controller's history, whether the operator acted, auto-approval
//! kicked in, or the timeout elapsed.
//!
//! # Main types
//!
//! - [`CheckpointController`] — Drives a checkpoint end to end.
//! - [`PendingCheckpoint`] — The per-checkpoint state machine.
//! - [`CheckpointConfig`] — HIL switches, timeouts and journal path.
//! - [`AutoContinueChannel`], [`ScriptedChannel`], [`CallbackChannel`] — Operator channels.
//! - [`CheckpointJournal`] — Append-only JSON Lines audit file.

/// Built-in operator channels.
pub mod channel;
/// Checkpoint configuration.
pub mod config;
/// The checkpoint controller.
pub mod controller;
/// JSON Lines journal of resolved records.
pub mod journal;
/// Single-checkpoint state machine.
pub mod pending;

pub use channel::{AutoContinueChannel, CallbackChannel, ScriptedChannel};
pub use config::{CheckpointConfig, HilMode};
pub use controller::{CheckpointController, CheckpointOutcome, CheckpointSummary};
pub use journal::CheckpointJournal;
pub use pending::{PendingCheckpoint, SUMMARY_LIMIT};
