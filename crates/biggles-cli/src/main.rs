mod completion;
mod config;
mod operator;
mod output;

use biggles_checkpoint::{
    AutoContinueChannel, CheckpointConfig, CheckpointController, CheckpointJournal, HilMode,
};
use biggles_core::{BigglesResult, OperatorChannel};
use biggles_knowledge::{DocumentFilter, DocumentKind, KnowledgeStore, LocalEmbedding};
use biggles_orchestrator::{Orchestrator, RunStatus, StageWorkers};
use clap::{Parser, Subcommand};
use completion::CommandCompletion;
use config::{BigglesConfig, StoreConfig};
use operator::StdinOperatorChannel;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "biggles.toml";

#[derive(Parser)]
#[command(name = "biggles", about = "Biggles — multi-stage research with human checkpoints")]
struct Cli {
    /// Path to config file (defaults to ./biggles.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Research a topic
    Run {
        /// Topic to research
        #[arg(short, long)]
        topic: String,
        /// Directory for per-stage results, the report and the store snapshot
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Approve every checkpoint without asking
        #[arg(long)]
        auto_approve: bool,
        /// Disable checkpoints entirely
        #[arg(long, conflicts_with = "auto_approve")]
        no_checkpoints: bool,
        /// Seconds before an unanswered checkpoint continues (overrides config)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print a checkpoint journal
    Journal {
        /// Journal file (defaults to checkpoint.journal_path from config)
        path: Option<PathBuf>,
    },
    /// Inspect the persisted knowledge store
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// Document counts by kind and contributor
    Stats,
    /// Rank stored documents against a query
    Search {
        query: String,
        #[arg(short, long, default_value_t = 5)]
        k: usize,
        /// Only documents of this kind (e.g. paper-summary)
        #[arg(long, value_parser = parse_kind)]
        kind: Option<DocumentKind>,
        /// Only documents from this contributor
        #[arg(long)]
        contributor: Option<String>,
        /// Only documents carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },
}

fn parse_kind(raw: &str) -> Result<DocumentKind, String> {
    DocumentKind::ALL
        .into_iter()
        .find(|kind| kind.as_str() == raw)
        .ok_or_else(|| {
            let known: Vec<_> = DocumentKind::ALL.iter().map(|k| k.as_str()).collect();
            format!("unknown kind '{raw}' (expected one of: {})", known.join(", "))
        })
}

fn search_filter(
    kind: Option<DocumentKind>,
    contributor: Option<String>,
    tag: Option<String>,
) -> DocumentFilter {
    let mut filter = DocumentFilter::new();
    if let Some(kind) = kind {
        filter = filter.kind(kind);
    }
    if let Some(contributor) = contributor {
        filter = filter.contributor(contributor);
    }
    if let Some(tag) = tag {
        filter = filter.tag(tag);
    }
    filter
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_store(config: &StoreConfig) -> BigglesResult<KnowledgeStore> {
    let store = match &config.persist_path {
        Some(path) => KnowledgeStore::open(path.clone()).await?,
        None => KnowledgeStore::new(),
    };
    Ok(if config.embeddings {
        store.with_embedder(Arc::new(LocalEmbedding::new(config.dimension)))
    } else {
        store
    })
}

fn checkpoint_config(
    mut config: CheckpointConfig,
    auto_approve: bool,
    no_checkpoints: bool,
    timeout: Option<u64>,
) -> CheckpointConfig {
    if auto_approve {
        config.auto_approve = true;
    }
    if no_checkpoints {
        config.enabled = false;
    }
    if let Some(secs) = timeout {
        config.default_timeout_secs = secs;
        config.timeouts.clear();
    }
    config
}

fn preview(text: &str, limit: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    match line.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BigglesConfig::load(path, true).await?,
        None => BigglesConfig::load(Path::new(DEFAULT_CONFIG), false).await?,
    };
    init_tracing(cli.json_logs || config.logging.json);

    match cli.command {
        Commands::Run {
            topic,
            output,
            auto_approve,
            no_checkpoints,
            timeout,
        } => {
            let checkpoint_config =
                checkpoint_config(config.checkpoint, auto_approve, no_checkpoints, timeout);
            let channel: Arc<dyn OperatorChannel> = match checkpoint_config.mode() {
                HilMode::Interactive => Arc::new(StdinOperatorChannel::new()),
                HilMode::Disabled | HilMode::AutoApprove => Arc::new(AutoContinueChannel),
            };
            let checkpoints = Arc::new(CheckpointController::new(checkpoint_config, channel));

            let store = Arc::new(build_store(&config.store).await?);
            info!(
                documents = store.len().await,
                search_mode = ?store.search_mode(),
                "Knowledge store ready"
            );

            let backend = Arc::new(CommandCompletion::from_config(&config.completion)?);
            let orchestrator = Orchestrator::new(
                StageWorkers::from_backend(backend),
                store,
                Arc::clone(&checkpoints),
                config.orchestrator,
            )?;

            let outcome = orchestrator.run(&topic).await?;

            if let Some(dir) = output {
                output::save_outcome(&dir, &outcome).await?;
                println!("Results written to {}", dir.display());
            }
            if !outcome.report.body.is_empty() {
                println!("\n{}\n", outcome.report.body);
            }
            if !outcome.report.references.is_empty() {
                println!("References:");
                for link in &outcome.report.references {
                    println!("  - {link}");
                }
            }

            let summary = checkpoints.summary().await;
            info!(
                checkpoints = summary.total,
                timed_out = summary.timed_out,
                rejected_edits = summary.rejected_edits,
                "Checkpoint summary"
            );
            println!("{}", output::status_line(&outcome));

            if let RunStatus::Failed { reason } = &outcome.status {
                anyhow::bail!("workflow failed: {reason}");
            }
        }
        Commands::Journal { path } => {
            let path = path
                .or(config.checkpoint.journal_path)
                .ok_or_else(|| anyhow::anyhow!("no journal path given or configured"))?;
            let records = CheckpointJournal::read_all(&path).await?;
            if records.is_empty() {
                println!("Journal {} is empty.", path.display());
            }
            for record in &records {
                println!(
                    "{}  {:<16} {:<20} {:<20} by {:<14} rejected edits: {}",
                    record.opened_at().format("%Y-%m-%d %H:%M:%S"),
                    record.checkpoint_kind().as_str(),
                    record.phase_label(),
                    record
                        .disposition()
                        .map(|d| d.as_str())
                        .unwrap_or("pending"),
                    record
                        .resolved_by()
                        .map(|c| format!("{c:?}"))
                        .unwrap_or_default(),
                    record.rejected_edits()
                );
            }
        }
        Commands::Store { action } => {
            if config.store.persist_path.is_none() {
                anyhow::bail!("no store configured; set [store] persist_path in the config file");
            }
            let store = build_store(&config.store).await?;
            match action {
                StoreAction::Stats => {
                    println!("{}", serde_json::to_string_pretty(&store.stats().await)?);
                }
                StoreAction::Search {
                    query,
                    k,
                    kind,
                    contributor,
                    tag,
                } => {
                    let filter = search_filter(kind, contributor, tag);
                    let outcome = store.search_filtered(&query, k, &filter).await;
                    println!("Search mode: {:?}", outcome.mode);
                    if outcome.results.is_empty() {
                        println!("No matches.");
                    }
                    for hit in &outcome.results {
                        println!(
                            "  {:.3}  [{}] {}: {}",
                            hit.score,
                            hit.document.kind,
                            hit.document.contributor,
                            preview(&hit.document.content, 80)
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
