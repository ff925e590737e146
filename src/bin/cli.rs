//! Harvester CLI
//!
//! Local entry point: run a checkpointed acquisition phase, merge the
//! results, and inspect or clear checkpoints.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use harvester::{
    error::{AppError, Result},
    models::{Config, ExtractionMode, ItemRecord, WorkItem},
    pipeline::{AcquisitionContext, BatchScheduler, DedupEngine, ExtractionOrchestrator},
    services::{HttpReasoningService, SelectorExtractor},
    storage::{CheckpointStore, LocalCheckpointStore, load_records},
    utils::log::{header, summary},
};

/// Harvester - resilient, resumable record acquisition
#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    version,
    about = "Resilient, resumable acquisition of structured records"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "harvester.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Acquire work items from a JSON-lines file, resuming if interrupted
    Run {
        /// One work item per line: {"id", "locator", "required_fields"?, "metadata"?}
        #[arg(long)]
        input: PathBuf,

        /// Checkpoint phase (default: scheduler.phase)
        #[arg(long)]
        phase: Option<String>,

        /// Items per batch (default: scheduler.batch_size)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Concurrent items per batch (default: scheduler.max_concurrency)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Deduplicate and merge checkpointed records into a JSON file
    Merge {
        /// Phases to merge, in order (default: scheduler.phase)
        #[arg(long = "phase")]
        phases: Vec<String>,

        /// Output file
        #[arg(long, default_value = "merged.json")]
        output: PathBuf,

        /// Skip the reasoning-assisted near-duplicate stage
        #[arg(long)]
        exact_only: bool,
    },

    /// Show checkpoint progress for a phase
    Status {
        #[arg(long)]
        phase: Option<String>,
    },

    /// Delete a phase's checkpoints
    Clean {
        #[arg(long)]
        phase: Option<String>,
    },

    /// Validate the configuration file
    Validate,
}

/// Initialize logging based on verbosity flag; `RUST_LOG` wins when set.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Read one work item per non-blank line.
fn read_work_items(path: &Path, config: &Config) -> Result<Vec<WorkItem>> {
    let content = std::fs::read_to_string(path)?;
    let defaults = config.schema.required_set();
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let item: WorkItem = serde_json::from_str(line).map_err(|e| {
            AppError::validation(format!("{}:{}: {}", path.display(), number + 1, e))
        })?;
        if !seen.insert(item.id().to_string()) {
            log::warn!("Duplicate work item id '{}' at line {}", item.id(), number + 1);
        }
        items.push(item.or_required(&defaults));
    }
    Ok(items)
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = Config::load_or_default(&cli.config);
    log::debug!("Configuration source: {}", cli.config.display());

    let store = Arc::new(LocalCheckpointStore::new(&config.storage.checkpoint_dir));
    let phase_or_default =
        |phase: Option<String>| phase.unwrap_or_else(|| config.scheduler.phase.clone());

    match cli.command {
        Command::Run {
            input,
            phase,
            batch_size,
            concurrency,
        } => {
            config.validate()?;
            let phase = phase_or_default(phase);
            let items = read_work_items(&input, &config)?;
            log::info!("Loaded {} work items from {}", items.len(), input.display());

            let ctx = AcquisitionContext::from_config(&config).await?;
            let orchestrator = ExtractionOrchestrator::new(Arc::new(ctx));
            let scheduler = BatchScheduler::new(Arc::new(orchestrator), store, phase);

            scheduler
                .run(
                    items,
                    batch_size.unwrap_or(config.scheduler.batch_size),
                    concurrency.unwrap_or(config.scheduler.max_concurrency),
                )
                .await?;
        }

        Command::Merge {
            phases,
            output,
            exact_only,
        } => {
            let phases = if phases.is_empty() {
                vec![config.scheduler.phase.clone()]
            } else {
                phases
            };

            let mut records: Vec<ItemRecord> = Vec::new();
            for phase in &phases {
                if !store.is_phase_complete(phase).await? {
                    log::warn!("Phase '{}' has not finished; merging what is persisted", phase);
                }
                let loaded: Vec<ItemRecord> = load_records(store.as_ref(), phase).await?;
                log::info!("Phase '{}': {} records", phase, loaded.len());
                records.extend(loaded);
            }

            let engine = if exact_only || !config.dedup.fuzzy_enabled {
                DedupEngine::exact_only(config.dedup.clone())
            } else {
                DedupEngine::new(
                    config.dedup.clone(),
                    Arc::new(HttpReasoningService::new(&config.reasoning)?),
                    Duration::from_secs(config.reasoning.timeout_secs),
                )
            };

            let input_count = records.len();
            let merged = engine.dedup_and_merge(records).await;
            std::fs::write(&output, serde_json::to_string_pretty(&merged)?)?;

            summary(
                "Merge",
                &[
                    ("Phases", phases.join(", ")),
                    ("Records in", input_count.to_string()),
                    ("Records out", merged.len().to_string()),
                    (
                        "Flagged",
                        merged
                            .iter()
                            .filter(|m| !m.quality_flags.is_empty())
                            .count()
                            .to_string(),
                    ),
                    ("Output", output.display().to_string()),
                ],
            );
        }

        Command::Status { phase } => {
            let phase = phase_or_default(phase);
            let completed = store.completed_batches(&phase).await?;
            let resume_point = store.get_resume_point(&phase).await?;
            let records: usize = store
                .load_batches(&phase)
                .await?
                .iter()
                .map(|b| b.records.len())
                .sum();

            header(&format!("Phase '{}'", phase));
            summary(
                "Checkpoint status",
                &[
                    ("Directory", store.root_dir().display().to_string()),
                    ("Persisted batches", completed.len().to_string()),
                    ("Persisted records", records.to_string()),
                    ("Resume point", resume_point.to_string()),
                    (
                        "Complete",
                        store.is_phase_complete(&phase).await?.to_string(),
                    ),
                ],
            );
        }

        Command::Clean { phase } => {
            let phase = phase_or_default(phase);
            store.cleanup(&phase).await?;
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            if config.orchestrator.extraction == ExtractionMode::Selectors {
                SelectorExtractor::new(&config.schema)?;
                log::info!("✓ {} selectors compile", config.schema.selectors.len());
            }
            log::info!(
                "✓ Config OK (schema '{}', {} required fields)",
                config.schema.kind,
                config.schema.required.len()
            );
        }
    }

    log::info!("Done!");

    Ok(())
}
