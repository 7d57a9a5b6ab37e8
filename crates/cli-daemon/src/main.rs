//! CLI entry point for vidshrink
//!
//! Parses command line arguments, opens the store and either serves the HTTP
//! API or runs one library operation and exits.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vidshrink::{run_server, run_startup_checks, Config, Library, Store};

/// vidshrink - re-encode a video library and keep only the smaller files
#[derive(Parser, Debug)]
#[command(name = "vidshrink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Library root directory (overrides config)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Database path, or :memory: (overrides config)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Skip the encoder availability check
    #[arg(long, global = true)]
    skip_checks: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Track new video files under DIR (defaults to the library root)
    Scan { dir: Option<PathBuf> },
    /// Mark deleted and resized files
    Check,
    /// Convert every pending file, or only --file
    Process {
        #[arg(long)]
        file: Option<String>,
    },
    /// Print savings statistics
    Stats,
    /// Reclaim free space in the database
    Compact,
    /// Print every tracked file
    List,
}

impl Command {
    fn needs_encoder(&self) -> bool {
        matches!(self, Command::Serve | Command::Process { .. })
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = Config::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(root) = args.root {
        config.library.root_dir = root;
    }
    if let Some(db) = args.db {
        config.database.path = db;
    }

    let command = args.command.unwrap_or(Command::Serve);

    if command.needs_encoder() {
        if args.skip_checks {
            warn!("Skipping startup checks (--skip-checks enabled)");
        } else {
            run_startup_checks(&config)?;
        }
    }

    let store = Store::open(&config.database)
        .await
        .with_context(|| format!("opening database {}", config.database.path))?;
    let library = Library::from_config(store.clone(), &config);

    let result = run(command, &library, &config).await;
    store.close().await;
    result
}

async fn run(command: Command, library: &Library, config: &Config) -> Result<()> {
    match command {
        Command::Serve => {
            info!("Library root: {}", library.root_dir().display());
            run_server(library.clone(), &config.server.bind).await?;
        }
        Command::Scan { dir } => {
            let summary = library.scan(dir.as_deref()).await?;
            println!(
                "Discovered {} video files, {} new",
                summary.discovered, summary.inserted
            );
        }
        Command::Check => {
            let changed = library.check().await?;
            for record in &changed {
                println!("{}", record);
            }
            println!("{} records changed", changed.len());
        }
        Command::Process { file: Some(path) } => {
            let record = library.process_single(&path).await?;
            println!("{}", record);
        }
        Command::Process { file: None } => {
            let summary = library.process_all().await?;
            println!(
                "Attempted {}: {} converted, {} retained, {} failed",
                summary.attempted, summary.converted, summary.retained, summary.failed
            );
        }
        Command::Stats => {
            let stats = library.stats().await?;
            println!("Files tracked: {}", stats.count);
            println!("Bytes saved:   {}", stats.total_bytes_saved);
            println!("Percent saved: {:.2}%", stats.percent_saved);
        }
        Command::Compact => {
            library.compact().await?;
            println!("Database compacted");
        }
        Command::List => {
            for record in library.list_files().await? {
                println!("{}", record);
            }
        }
    }

    Ok(())
}
