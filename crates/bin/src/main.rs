//! accrete CLI binary.
//!
//! Imports bars into the store, runs registered factors once or in a realtime loop and
//! inspects persisted results.

mod store;

use accrete_data::frame::{frame_to_records, tail_per_entity};
use accrete_data::model::parse_timestamp;
use accrete_data::{TimeSeriesStore, import};
use accrete_factors::{ComputeReport, Factor, FactorConfig, FactorRegistry};
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use polars::prelude::DataFrame;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process;
use std::rc::Rc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "accrete")]
#[command(about = "accrete: incremental factor computation", long_about = None)]
#[command(version)]
struct Cli {
    /// Database path (default: platform cache directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load bars from CSV files into the store
    Import {
        /// CSV files with entity_id,timestamp,open,high,low,close[,volume,turnover]
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List registered factors
    Factors,

    /// Run one factor over the bars currently stored
    Compute {
        /// Factor name
        factor: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Keep a factor moving on as new bars arrive
    Watch {
        /// Factor name
        factor: String,

        #[command(flatten)]
        run: RunArgs,

        /// Seconds to wait for new bars before computing on stale data
        #[arg(long, default_value = "60")]
        timeout: u64,

        /// Seconds between polls of the store
        #[arg(long, default_value = "5")]
        poll: u64,

        /// Number of rounds (default: run until interrupted)
        #[arg(long)]
        rounds: Option<usize>,
    },

    /// Inspect or clear the persisted state of one entity
    State {
        /// Factor name
        factor: String,

        /// Entity id
        entity: String,

        /// Delete the state and the persisted rows
        #[arg(long)]
        clear: bool,
    },

    /// Show store statistics
    Stats,
}

#[derive(Args)]
struct RunArgs {
    /// Entity ids (default: every entity in the store)
    #[arg(long = "entity")]
    entities: Vec<String>,

    /// First timestamp, e.g. 2024-01-31
    #[arg(long)]
    start: Option<String>,

    /// Last timestamp
    #[arg(long)]
    end: Option<String>,

    /// Load and persist results and state
    #[arg(long)]
    persist: bool,

    /// Wipe persisted results and state first
    #[arg(long)]
    clear_state: bool,

    /// JSON factor configuration; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rows printed per entity
    #[arg(long, default_value = "5")]
    tail: usize,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: Format,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("accrete=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let db = cli.db.as_deref();

    match cli.command {
        Commands::Import { files } => import_bars(db, &files),
        Commands::Factors => {
            list_factors();
            Ok(())
        }
        Commands::Compute { factor, run } => compute(db, &factor, &run),
        Commands::Watch {
            factor,
            run,
            timeout,
            poll,
            rounds,
        } => watch(
            db,
            &factor,
            &run,
            Duration::from_secs(timeout),
            Duration::from_secs(poll),
            rounds,
        ),
        Commands::State {
            factor,
            entity,
            clear,
        } => show_state(db, &factor, &entity, clear),
        Commands::Stats => show_stats(db),
    }
}

fn open(db: Option<&Path>) -> CliResult<Rc<dyn TimeSeriesStore>> {
    Ok(Rc::new(store::open_store(db)?))
}

fn import_bars(db: Option<&Path>, files: &[PathBuf]) -> CliResult<()> {
    let store = open(db)?;

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("█▓░"),
    );

    let mut written = 0;
    for file in files {
        pb.set_message(file.display().to_string());
        let bars = match import::read_bars_from_path(file) {
            Ok(bars) => bars,
            Err(e) => {
                pb.finish_with_message("Failed!");
                return Err(format!("{}: {}", file.display(), e).into());
            }
        };
        written += store.upsert_bars(&bars)?;
        pb.inc(1);
    }
    pb.finish_with_message(format!("Imported {} bars", written));
    info!(files = files.len(), bars = written, "import finished");
    Ok(())
}

fn list_factors() {
    let registry = FactorRegistry::with_defaults();

    println!("{:16} {:10} {:9} Description", "Name", "Kind", "Stateful");
    println!("{}", "-".repeat(72));
    for info in registry.infos() {
        println!(
            "{:16} {:10} {:9} {}",
            info.name,
            info.kind.to_string(),
            if info.stateful { "yes" } else { "no" },
            info.description
        );
    }
}

fn parse_bound(raw: Option<&str>) -> CliResult<Option<NaiveDateTime>> {
    Ok(raw.map(parse_timestamp).transpose()?)
}

fn factor_config(run: &RunArgs) -> CliResult<FactorConfig> {
    let mut config = match &run.config {
        Some(path) => FactorConfig::from_path(path)?,
        None => FactorConfig::default(),
    };
    if !run.entities.is_empty() {
        config.selection.entity_ids = run.entities.clone();
    }
    if let Some(start) = parse_bound(run.start.as_deref())? {
        config.start_timestamp = Some(start);
    }
    if let Some(end) = parse_bound(run.end.as_deref())? {
        config.end_timestamp = Some(end);
    }
    config.need_persist |= run.persist;
    config.clear_state |= run.clear_state;
    Ok(config)
}

fn create_factor(db: Option<&Path>, name: &str, run: &RunArgs) -> CliResult<Factor> {
    let registry = FactorRegistry::with_defaults();
    Ok(registry.create(name, open(db)?, factor_config(run)?)?)
}

fn compute(db: Option<&Path>, name: &str, run: &RunArgs) -> CliResult<()> {
    let mut factor = create_factor(db, name, run)?;
    let report = factor.compute()?;
    print_outcome(&factor, &report, run)
}

fn watch(
    db: Option<&Path>,
    name: &str,
    run: &RunArgs,
    timeout: Duration,
    poll: Duration,
    rounds: Option<usize>,
) -> CliResult<()> {
    let mut factor = create_factor(db, name, run)?;

    let mut round = 0;
    while rounds.is_none_or(|rounds| round < rounds) {
        let report = factor.move_on(None, timeout, poll)?;
        round += 1;
        info!(
            factor = name,
            round,
            computed = report.computed.len(),
            stale = report.stale.len(),
            "round finished"
        );
        print_outcome(&factor, &report, run)?;
    }
    Ok(())
}

fn print_outcome(factor: &Factor, report: &ComputeReport, run: &RunArgs) -> CliResult<()> {
    let rows: DataFrame = tail_per_entity(factor.result_df(), run.tail)?;

    match run.format {
        Format::Text => {
            println!("{} ({})", factor.name(), factor.phase());
            println!("{}", rows);
            println!("{}", report);
        }
        Format::Json => {
            let output = json!({
                "factor": factor.name(),
                "phase": factor.phase(),
                "report": report,
                "rows": frame_to_records(&rows)?,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn show_state(db: Option<&Path>, factor: &str, entity: &str, clear: bool) -> CliResult<()> {
    let store = open(db)?;
    let entity_ids = [entity.to_string()];

    match store.query_factor_state(factor, &entity_ids)?.get(entity) {
        Some(raw) => {
            let state: serde_json::Value = serde_json::from_str(raw)?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        None => println!("No state for {} of {}", entity, factor),
    }

    let rows = store.query_factor_result(factor, &entity_ids, None, None)?;
    println!("Persisted rows: {}", rows.height());

    if clear {
        store.delete_state(factor, entity)?;
        store.delete_result(factor, entity)?;
        info!(factor, entity_id = entity, "state cleared");
        println!("Cleared state and rows of {} for {}", entity, factor);
    }
    Ok(())
}

fn show_stats(db: Option<&Path>) -> CliResult<()> {
    let store = open(db)?;
    let stats = store.stats()?;

    println!("accrete {}", accrete::VERSION);
    println!("=============\n");
    println!("  Bars:          {}", stats.bars);
    println!("  Entities:      {}", stats.entities);
    println!("  Factor rows:   {}", stats.factor_rows);
    println!("  Factor states: {}", stats.factor_states);
    Ok(())
}
