use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use dialoguer::Input;
use tracing::{debug, info};

use crate::config::{Config, get_config_dir};
use crate::embeddings::{Embedder, OllamaClient};
use crate::index::{BuildOutcome, IndexBuilder};
use crate::retriever::{SchemaRetriever, SchemaSlice};

/// Load the configuration, letting `--schema` take precedence over the
/// config file and the environment
#[inline]
pub fn load_config(schema_override: Option<PathBuf>) -> Result<Config> {
    let config_dir = get_config_dir()?;
    let mut config = Config::load(&config_dir)?;
    if let Some(schema_path) = schema_override {
        debug!("Using schema path from command line");
        config.schema.schema_path = Some(schema_path);
    }
    Ok(config)
}

fn index_builder(config: &Config) -> Result<IndexBuilder> {
    let paths = config
        .index_paths()
        .context("No schema document configured")?;
    let client = OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;
    let embedder: Arc<dyn Embedder> = Arc::new(client);

    Ok(IndexBuilder::new(paths, embedder).with_batching(
        config.ollama.batch_size as usize,
        config.ollama.max_concurrent_requests as usize,
    ))
}

fn schema_retriever(config: &Config) -> Result<SchemaRetriever> {
    Ok(SchemaRetriever::with_builder(
        index_builder(config)?,
        config.retrieval.clone(),
    ))
}

/// Build the index when it is stale, or unconditionally with `force`
#[inline]
pub async fn build_index(config: &Config, force: bool) -> Result<()> {
    let builder = index_builder(config)?.with_progress(true);
    info!("Ensuring index for {}", builder.paths().schema.display());

    match builder.ensure_index(force).await? {
        BuildOutcome::UpToDate { generation } => {
            println!(
                "{} Index is up to date (generation {})",
                style("✓").green(),
                style(generation).cyan()
            );
        }
        BuildOutcome::Built {
            generation,
            rows,
            reason,
        } => {
            println!(
                "{} Indexed {} rows (generation {})",
                style("✓").green(),
                style(rows).cyan(),
                style(generation).cyan()
            );
            println!("   Reason: {}", reason);
        }
    }

    Ok(())
}

/// Print the slice for one question as JSON on stdout
#[inline]
pub async fn retrieve(config: &Config, question: &str, show_scores: bool) -> Result<()> {
    let retriever = schema_retriever(config)?;
    let slice = retriever.retrieve_or_full(question).await?;

    if show_scores {
        print_candidates(&slice);
    }
    print_slice(&slice)
}

/// Answer questions until the input is empty or closed
#[inline]
pub async fn run_repl(config: &Config) -> Result<()> {
    let retriever = schema_retriever(config)?;
    retriever
        .reload(false)
        .await
        .context("Failed to prepare the schema index")?;

    eprintln!(
        "{}",
        style("Ask a question about the graph. An empty line exits.").dim()
    );

    loop {
        let question: String = match Input::new()
            .with_prompt("Question>")
            .allow_empty(true)
            .interact_text()
        {
            Ok(question) => question,
            Err(e) => {
                debug!("Input closed: {}", e);
                break;
            }
        };

        let question = question.trim();
        if question.is_empty() {
            break;
        }

        match retriever.retrieve_or_full(question).await {
            Ok(slice) => print_slice(&slice)?,
            Err(e) => eprintln!("{} {:#}", style("✗").red(), e),
        }
    }

    Ok(())
}

/// Show the index consistency report and the embedding service status
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 Schema Slice Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => match tokio::task::spawn_blocking(move || client.health_check()).await {
            Ok(Ok(())) => {
                println!(
                    "   ✅ Ollama: Connected ({}:{})",
                    config.ollama.host, config.ollama.port
                );
                println!("   📋 Model: {}", config.ollama.model);
                println!("   🔢 Batch Size: {}", config.ollama.batch_size);
            }
            Ok(Err(e)) => println!("   ⚠️  Ollama: Unavailable - {}", e),
            Err(e) => println!("   ❌ Ollama: Health check did not finish - {}", e),
        },
        Err(e) => println!("   ❌ Ollama: Failed to create client - {}", e),
    }

    println!();
    println!("🔍 Index Status:");
    let builder = index_builder(config)?;
    let paths = builder.paths();
    println!("   Schema: {}", paths.schema.display());
    println!("   Vector index: {}", paths.index.display());
    println!("   Row list: {}", paths.rows.display());

    let report = match builder.inspect().await {
        Ok(report) => report,
        Err(e) => {
            println!("   ❌ {:#}", e);
            return Ok(());
        }
    };

    if let Some(generation) = &report.generation {
        println!("   🏷️  Generation: {}", generation);
    }
    if let Some(model) = &report.model {
        println!("   📋 Built with: {}", model);
    }
    if let Some(built_at) = report.built_at {
        println!("   🕒 Built at: {}", built_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!(
        "   Rows: {} in schema, {} indexed, {} vectors stored",
        report.schema_rows, report.manifest_rows, report.stored_vectors
    );

    println!();
    if report.is_consistent {
        println!("   ✅ {}", report.summary());
    } else {
        println!("   ⚠️  {}", report.summary());
        for row in report.missing_in_index.iter().take(10) {
            println!("      missing: {}", row);
        }
        for row in report.orphaned_in_index.iter().take(10) {
            println!("      orphaned: {}", row);
        }
    }
    match &report.rebuild_reason {
        Some(reason) => println!("   🔄 Next build will rebuild: {}", reason),
        None => println!("   💤 No rebuild needed"),
    }

    Ok(())
}

fn print_candidates(slice: &SchemaSlice) {
    if slice.candidates.is_empty() {
        eprintln!("{}", style("No confident candidates").dim());
        return;
    }
    for candidate in &slice.candidates {
        eprintln!("{:>8.3}  {}", candidate.score, candidate.row);
    }
}

fn print_slice(slice: &SchemaSlice) -> Result<()> {
    if slice.full_schema {
        eprintln!(
            "{}",
            style("No relevant schema rows found, returning the full schema").yellow()
        );
    }
    println!("{}", slice.to_json_pretty()?);
    Ok(())
}
