//! GRT command-line tool
//!
//! Inspects structure descriptions and documents:
//! class listings, document dumps and serializer round trips.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "grt")]
#[command(about = "GRT structure and document inspector", long_about = None)]
#[command(version)]
struct Cli {
    /// Options file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory with structs.*.xml files; may be repeated
    #[arg(short, long = "structs", global = true)]
    structs: Vec<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List loaded classes
    Classes {
        /// Glob pattern on class names
        pattern: Option<String>,
        /// Print members with their types
        #[arg(short, long)]
        members: bool,
    },

    /// Print the value tree of a document
    Dump {
        /// Document file
        file: PathBuf,
        /// Print JSON instead of the text dump
        #[arg(long)]
        json: bool,
    },

    /// Load a document and write it back
    Roundtrip {
        /// Document file
        file: PathBuf,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let setup = commands::Setup {
        config: cli.config,
        structs: cli.structs,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Classes { pattern, members } => {
            commands::classes::execute(&setup, pattern.as_deref(), members)
        }
        Commands::Dump { file, json } => commands::dump::execute(&setup, &file, json),
        Commands::Roundtrip { file, output } => {
            commands::roundtrip::execute(&setup, &file, output.as_deref())
        }
    }
}
