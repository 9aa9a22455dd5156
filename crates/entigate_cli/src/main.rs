//! EntiGate CLI
//!
//! Command-line tools for EntiGate configuration and suspended state.
//!
//! # Commands
//!
//! - `validate` - Check every connection declared in a configuration file
//! - `show` - Print the effective settings of one connection
//! - `state` - Describe a suspended manager state file

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// EntiGate command-line tools.
#[derive(Parser)]
#[command(name = "entigate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the connection configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every declared connection
    Validate,

    /// Print the effective settings of a connection
    Show {
        /// Connection name (first declared if omitted)
        #[arg(short = 'n', long)]
        connection: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Describe a suspended manager state
    State {
        /// Path to the encoded state
        file: PathBuf,

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
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate => {
            let path = cli.config.ok_or("Configuration file required for validate")?;
            commands::validate::run(&path)?;
        }
        Commands::Show { connection, format } => {
            let path = cli.config.ok_or("Configuration file required for show")?;
            commands::show::run(&path, connection.as_deref(), &format)?;
        }
        Commands::State { file, format } => {
            commands::state::run(&file, &format)?;
        }
        Commands::Version => {
            println!("EntiGate CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("EntiGate Core v{}", entigate_core::VERSION);
        }
    }

    Ok(())
}
