//! Tagvault CLI - maintenance commands for a tagvault media library.
//!
//! Every command opens the library, does its work and commits any staged
//! edits before exiting.

mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use commands::Command;
use std::path::PathBuf;
use tagvault_core::{MediaLibrary, StoreConfig};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tagvault")]
#[command(about = "Maintain a tagged media library")]
struct Args {
    /// Library root directory
    #[arg(short, long)]
    library: PathBuf,

    /// JSON configuration file (defaults apply when absent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    debug!("Using config {:?}", config);

    let mut library = MediaLibrary::open_with_config(&args.library, config)
        .with_context(|| format!("Failed to open library {}", args.library.display()))?;

    let mut stdout = std::io::stdout().lock();
    commands::run(&mut library, args.command, &mut stdout)
}
