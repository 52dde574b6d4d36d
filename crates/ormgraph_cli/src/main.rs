//! ormgraph CLI
//!
//! Command-line demos of the ormgraph commit pipeline over the gallery
//! fixture and an in-memory node.
//!
//! # Commands
//!
//! - `demo` - Run a commit scenario and print the executed statements
//! - `sort` - Print the dependency order of the fixture tables

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// ormgraph command-line tools.
#[derive(Parser)]
#[command(name = "ormgraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a commit scenario and print the executed statements
    Demo {
        /// Maximum rows per batch (0 for unbounded)
        #[arg(short, long, default_value = "0")]
        batch_size: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the dependency order of the fixture tables
    Sort {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Demo { batch_size, format } => commands::demo::run(batch_size, &format)?,
        Commands::Sort { format } => commands::sort::run(&format)?,
        Commands::Version => println!("ormgraph CLI v{}", env!("CARGO_PKG_VERSION")),
    }

    Ok(())
}
