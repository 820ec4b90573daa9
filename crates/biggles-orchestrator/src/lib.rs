//! Six-stage research workflow for Biggles.
//!
//! A run starts with a trend scout. Its output fans out to four research
//! stages (history, academic, news, books) that run concurrently and are
//! joined at a barrier. A synthesis stage then writes the final report from
//! the entire knowledge store. A human checkpoint follows each of the three
//! groups, where the operator can continue, edit, retry, skip or abort.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Drives a run from topic to [`WorkflowOutcome`].
//! - [`StageWorkers`] — The worker assigned to each [`Stage`].
//! - [`Worker`] — Trait implemented by stage workers.
//! - [`CompletionWorker`] — A [`Worker`] backed by a [`TextCompletion`] and a [`StageProfile`].
//! - [`StageMonitor`] — Per-stage status and metrics.
//! - [`WorkflowRun`], [`Report`], [`RunStatus`] — Run state and results.

/// Orchestrator configuration.
pub mod config;
/// The workflow engine.
pub mod engine;
/// Stage status tracking.
pub mod monitor;
/// Built-in stage profiles.
pub mod profiles;
/// Stages, run state and reports.
pub mod types;
/// Worker traits and the completion-backed worker.
pub mod worker;

pub use config::{OrchestratorConfig, RetryScope};
pub use engine::{Orchestrator, StageWorkers, OPERATOR_CONTRIBUTOR};
pub use monitor::{StageMetrics, StageMonitor, StageState, StageStatus};
pub use profiles::{default_profile, default_profiles, StageProfile};
pub use types::{
    dedup_links, Report, RunStatus, Stage, StageResult, WorkerOutput, WorkflowOutcome,
    WorkflowRun,
};
pub use worker::{
    extract_links, research_focus, CompletionWorker, TextCompletion, Worker, WorkerContext,
};
