//! stepflow - workflow state machine engine
//!
//! Provides both a REPL and one-shot command execution against a local store.

mod commands;
mod config;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::{Backend, Config};
use std::path::PathBuf;
use std::sync::Arc;
use stepflow_core::{MemoryStore, Store, WorkflowEngine};
use stepflow_storage::FileStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stepflow")]
#[command(about = "Validate, store and run workflow state machines")]
#[command(version)]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, env = "STEPFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the file backend (overrides config)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Keep everything in memory; nothing is persisted
    #[arg(long)]
    memory: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub(crate) enum Commands {
    /// Start interactive REPL
    Repl,

    /// Validate a definition file without storing it
    Validate {
        /// Definition file (.json, .yaml or .yml)
        file: PathBuf,
    },

    /// Validate and store a definition
    Define {
        /// Definition file (.json, .yaml or .yml)
        file: PathBuf,
    },

    /// List stored definitions
    Definitions,

    /// Show a stored definition
    Definition {
        /// Definition ID
        id: String,
    },

    /// Start a new instance of a definition
    Start {
        /// Definition ID
        definition: String,
    },

    /// Fire a transition on an instance
    Fire {
        /// Instance ID
        instance: String,

        /// Transition ID
        transition: String,
    },

    /// Show an instance with its history and available transitions
    Status {
        /// Instance ID
        instance: String,
    },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    if cli.memory {
        config.storage.backend = Backend::Memory;
    }

    let store: Arc<dyn Store> = match config.storage.backend {
        Backend::Memory => Arc::new(MemoryStore::new()),
        Backend::File => Arc::new(FileStore::open(&config.storage.data_dir)?),
    };
    tracing::debug!(
        backend = ?config.storage.backend,
        data_dir = %config.storage.data_dir.display(),
        "store ready"
    );

    let engine = WorkflowEngine::new(store, config.engine());

    match cli.command {
        Some(Commands::Repl) | None => repl::run(&engine)?,
        Some(cmd) => {
            let output = commands::execute(&engine, cmd)?;
            println!("{}", output);
        }
    }

    Ok(())
}
