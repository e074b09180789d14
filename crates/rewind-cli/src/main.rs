//! Rewind command-line tool
//!
//! Inspects, converts and verifies persisted time-travel logs, and records
//! a small demo program to try them on.

mod commands;

use clap::{Parser, Subcommand};
use rewind_core::{Format, TtdConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rewind")]
#[command(about = "Time-travel log toolkit", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (rewind.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a log's header, entry counts and snapshots
    Info {
        /// Log directory
        dir: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List log entries
    Dump {
        /// Log directory
        dir: PathBuf,
        /// Only entries of this kind (e.g. "ExternalCall")
        #[arg(short, long)]
        kind: Option<String>,
        /// First event time to show
        #[arg(long)]
        from: Option<i64>,
        /// Last event time to show
        #[arg(long)]
        to: Option<i64>,
        /// Print JSON lines instead of text
        #[arg(long)]
        json: bool,
    },

    /// Rewrite a log and its snapshots in another format
    Convert {
        /// Source log directory
        input: PathBuf,
        /// Destination directory
        output: PathBuf,
        /// Target format: text or binary
        #[arg(long, default_value = "binary")]
        to: Format,
    },

    /// Replay a demo log and check every snapshot against the replayed heap
    Verify {
        /// Log directory
        dir: PathBuf,
    },

    /// Record the built-in demo program
    Demo {
        /// Output directory
        #[arg(short, long, default_value = "rewind-demo")]
        out: PathBuf,
        /// Top-level calls to record
        #[arg(short, long, default_value_t = 10)]
        ticks: usize,
        /// Encoding, overriding the configuration
        #[arg(long)]
        format: Option<Format>,
    },
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env("REWIND_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TtdConfig> {
    Ok(match path {
        Some(path) => TtdConfig::from_file(path)?,
        None if Path::new("rewind.toml").exists() => TtdConfig::from_file(Path::new("rewind.toml"))?,
        None => TtdConfig::default(),
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info { dir, json } => commands::info::execute(&config, &dir, json),
        Commands::Dump {
            dir,
            kind,
            from,
            to,
            json,
        } => commands::dump::execute(
            &config,
            &dir,
            &commands::dump::Filter {
                kind,
                from,
                to,
            },
            json,
        ),
        Commands::Convert { input, output, to } => commands::convert::execute(&config, &input, &output, to),
        Commands::Verify { dir } => commands::verify::execute(&config, &dir),
        Commands::Demo { out, ticks, format } => {
            let mut config = config;
            if let Some(format) = format {
                config.format = format;
            }
            commands::demo::execute(config, &out, ticks)
        }
    }
}
