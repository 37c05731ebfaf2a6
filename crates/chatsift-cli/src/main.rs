mod commands;
mod display;
mod gateway;

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chatsift_ai::{AuxiliaryError, AuxiliaryExtractor, HeuristicExtractor, LlmConfig, LlmExtractor};
use chatsift_core::{ConfigStore, SourceConfig, SourceId, TagValueLog, messages};
use chatsift_pipeline::{
    Coordinator, DedupStrategy, DuplicateDetector, OverflowPolicy, Pipeline, PipelineConfig,
    Processor,
};
use chatsift_store::{ConfigBacking, DuckStore, MemoryStore, RecordStore};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::CommandHandler;
use crate::gateway::Gateway;

#[derive(Parser)]
#[command(
    name = "chatsift",
    version,
    about = "Extract structured fields from chat messages and store them without duplicates"
)]
struct Cli {
    /// DuckDB database file. Without it, records live in memory for this run only.
    #[arg(long, env = "CHATSIFT_DB", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read JSON-lines messages and run them through the pipeline.
    Run(RunArgs),
    /// Show recently stored records.
    Data {
        /// Only records of this source.
        #[arg(long, allow_hyphen_values = true)]
        source: Option<SourceId>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Render as a table instead of cards.
        #[arg(long)]
        table: bool,
    },
    /// Show a source's stored configuration.
    Status {
        #[arg(long, allow_hyphen_values = true)]
        source: SourceId,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Input file of JSON lines; stdin when absent.
    #[arg(long)]
    input: Option<PathBuf>,

    #[arg(long, env = "CHATSIFT_WORKERS", default_value_t = 3)]
    workers: usize,

    /// Capacity of each worker's queue shard.
    #[arg(long, env = "CHATSIFT_QUEUE_CAPACITY", default_value_t = 1024)]
    queue_capacity: usize,

    #[arg(long, env = "CHATSIFT_OVERFLOW", value_enum, default_value_t = OverflowArg::DropNewest)]
    overflow: OverflowArg,

    /// How long `--overflow block` waits for room.
    #[arg(long, default_value_t = 250)]
    block_timeout_ms: u64,

    #[arg(long, env = "CHATSIFT_DEDUP", value_enum, default_value_t = DedupArg::Similarity)]
    dedup: DedupArg,

    /// Number of recent records compared by the similarity strategy.
    #[arg(long, default_value_t = 10)]
    dedup_window: usize,

    #[arg(long, env = "CHATSIFT_AUXILIARY", value_enum, default_value_t = AuxiliaryArg::Heuristic)]
    auxiliary: AuxiliaryArg,

    #[arg(long, default_value = chatsift_ai::llm::DEFAULT_BASE_URL)]
    llm_base_url: String,

    #[arg(long, default_value = chatsift_ai::llm::DEFAULT_MODEL)]
    llm_model: String,

    #[arg(long, env = "CHATSIFT_LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    #[arg(long, default_value_t = 30)]
    llm_timeout_secs: u64,

    /// Seconds to let workers drain queued messages at shutdown.
    #[arg(long, default_value_t = 10)]
    grace_secs: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum OverflowArg {
    DropNewest,
    DropOldest,
    Block,
}

#[derive(Clone, Copy, ValueEnum)]
enum DedupArg {
    Similarity,
    Fields,
}

#[derive(Clone, Copy, PartialEq, ValueEnum)]
enum AuxiliaryArg {
    None,
    Heuristic,
    Llm,
}

impl RunArgs {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            overflow: match self.overflow {
                OverflowArg::DropNewest => OverflowPolicy::DropNewest,
                OverflowArg::DropOldest => OverflowPolicy::DropOldest,
                OverflowArg::Block => OverflowPolicy::Block {
                    timeout: Duration::from_millis(self.block_timeout_ms),
                },
            },
        }
    }

    fn dedup_strategy(&self) -> DedupStrategy {
        match self.dedup {
            DedupArg::Similarity => DedupStrategy::Similarity {
                window: self.dedup_window,
            },
            DedupArg::Fields => DedupStrategy::FieldEquality,
        }
    }
}

/// Record and config stores; one object behind both for every backend.
struct Backend {
    records: Arc<dyn RecordStore>,
    configs: Arc<dyn ConfigBacking>,
}

fn open_backend(db: Option<&Path>) -> anyhow::Result<Backend> {
    match db {
        Some(path) => {
            let store = Arc::new(
                DuckStore::open_persistent(path)
                    .with_context(|| format!("opening {}", path.display()))?,
            );
            info!(path = %path.display(), "using DuckDB store");
            Ok(Backend {
                records: store.clone(),
                configs: store,
            })
        }
        None => {
            warn!("no --db given, records are kept in memory for this run only");
            let store = Arc::new(MemoryStore::new());
            Ok(Backend {
                records: store.clone(),
                configs: store,
            })
        }
    }
}

fn build_auxiliary(
    args: &RunArgs,
    runtime: Option<&tokio::runtime::Runtime>,
) -> anyhow::Result<Option<Arc<dyn AuxiliaryExtractor>>> {
    match (args.auxiliary, runtime) {
        (AuxiliaryArg::None, _) => Ok(None),
        (AuxiliaryArg::Heuristic, _) => Ok(Some(Arc::new(
            HeuristicExtractor::new().context("compiling extraction patterns")?,
        ))),
        (AuxiliaryArg::Llm, Some(runtime)) => {
            let config = LlmConfig {
                base_url: args.llm_base_url.clone(),
                model: args.llm_model.clone(),
                api_key: args.llm_api_key.clone().unwrap_or_default(),
                timeout: Duration::from_secs(args.llm_timeout_secs),
                ..LlmConfig::new("")
            };
            match LlmExtractor::new(config, runtime.handle().clone()) {
                Ok(llm) => {
                    info!(model = %args.llm_model, "using LLM auxiliary extractor");
                    Ok(Some(Arc::new(llm)))
                }
                Err(AuxiliaryError::Unavailable(reason)) => {
                    warn!(%reason, "LLM extractor unavailable, continuing with tag rules only");
                    Ok(None)
                }
                Err(e) => Err(e).context("building LLM client"),
            }
        }
        (AuxiliaryArg::Llm, None) => bail!("LLM extractor needs an async runtime"),
    }
}

fn run(db: Option<&Path>, args: RunArgs) -> anyhow::Result<()> {
    let backend = open_backend(db)?;
    let configs = Arc::new(ConfigStore::hydrate(
        backend
            .configs
            .load_configs()
            .context("loading source configs")?,
    ));
    info!(sources = configs.len(), "source configs loaded");
    let tag_values = Arc::new(TagValueLog::new());

    // HTTP for the LLM client runs here; workers block on it.
    let runtime = if args.auxiliary == AuxiliaryArg::Llm {
        Some(
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .context("starting async runtime")?,
        )
    } else {
        None
    };
    let auxiliary = build_auxiliary(&args, runtime.as_ref())?;

    let processor = Processor::new(
        Arc::clone(&configs),
        Coordinator::new(auxiliary),
        DuplicateDetector::new(Arc::clone(&backend.records), args.dedup_strategy()),
        Arc::clone(&backend.records),
        Arc::clone(&tag_values),
    );
    let pipeline = Pipeline::start(args.pipeline_config(), processor)?;
    let commands = CommandHandler::new(
        Arc::clone(&configs),
        Arc::clone(&backend.configs),
        Arc::clone(&backend.records),
        tag_values,
    );

    let gateway = Gateway::new(configs, Arc::clone(&backend.configs), &commands, &pipeline);
    let stdout = io::stdout();
    let summary = match &args.input {
        Some(path) => File::open(path)
            .with_context(|| format!("opening {}", path.display()))
            .and_then(|file| gateway.run(BufReader::new(file), stdout.lock())),
        None => gateway.run(io::stdin().lock(), stdout.lock()),
    };

    // Drain before reporting an ingestion error so queued items still commit.
    let stats = pipeline.shutdown(Duration::from_secs(args.grace_secs));
    let summary = summary?;
    println!(
        "lines: {}  commands: {}  queued: {}  skipped (inactive): {}  malformed: {}",
        summary.lines, summary.commands, summary.queued, summary.skipped_inactive, summary.malformed
    );
    println!(
        "persisted: {}  duplicates: {}  rejected: {}  evicted: {}  failed: {}  abandoned: {}",
        stats.persisted,
        stats.duplicates,
        stats.rejected,
        stats.evicted,
        stats.failed,
        stats.abandoned
    );
    Ok(())
}

fn show_data(
    db: Option<&Path>,
    source: Option<SourceId>,
    limit: usize,
    table: bool,
) -> anyhow::Result<()> {
    let Some(db) = db else {
        bail!("`data` reads a DuckDB file; pass --db or set CHATSIFT_DB");
    };
    let backend = open_backend(Some(db))?;
    let records = match source {
        Some(source) => backend.records.recent(source, limit)?,
        None => backend.records.recent_all(limit)?,
    };
    if records.is_empty() {
        println!("No records stored.");
        return Ok(());
    }
    let batch = messages::records_to_batch(&records)?;
    if table {
        println!("{}", display::render_table(&batch)?);
    } else {
        print!("{}", display::render_cards(&batch));
    }
    Ok(())
}

fn show_status(db: Option<&Path>, source: SourceId) -> anyhow::Result<()> {
    let Some(db) = db else {
        bail!("`status` reads a DuckDB file; pass --db or set CHATSIFT_DB");
    };
    let backend = open_backend(Some(db))?;
    let stored = backend
        .configs
        .load_configs()?
        .into_iter()
        .find(|c| c.source_id == source);
    let config = match stored {
        Some(config) => config,
        None => {
            println!("Source {source} has no stored config; defaults apply.");
            SourceConfig::with_defaults(source)
        }
    };
    print!("{}", commands::render_status(&config));
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let db = cli.db.as_deref();
    match cli.command {
        Command::Run(args) => run(db, args),
        Command::Data {
            source,
            limit,
            table,
        } => show_data(db, source, limit, table),
        Command::Status { source } => show_status(db, source),
    }
}
