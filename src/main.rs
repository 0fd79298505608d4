use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use schema_slice::commands::{build_index, load_config, retrieve, run_repl, show_status};
use schema_slice::config::{get_config_dir, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "schema-slice")]
#[command(about = "Answers questions about a Neo4j graph with the relevant part of its schema")]
#[command(version)]
struct Cli {
    /// Schema document to use, overriding the config file and NEO4J_SCHEMA_PATH
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the schema location, Ollama connection and retrieval tuning
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Build the schema index if it is missing or stale
    Build {
        /// Rebuild even when the index is up to date
        #[arg(long)]
        force: bool,
    },
    /// Print the schema slice relevant to a question
    Retrieve {
        question: String,
        /// Print candidate row scores to stderr
        #[arg(long)]
        scores: bool,
    },
    /// Ask questions interactively
    Repl,
    /// Show the state of the schema index
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Config { show: false } = cli.command {
        return run_interactive_config(&get_config_dir()?);
    }

    let config = load_config(cli.schema)?;

    match cli.command {
        Commands::Config { .. } => {
            show_config(&config)?;
        }
        Commands::Build { force } => {
            build_index(&config, force).await?;
        }
        Commands::Retrieve { question, scores } => {
            retrieve(&config, &question, scores).await?;
        }
        Commands::Repl => {
            run_repl(&config).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
    }

    Ok(())
}
