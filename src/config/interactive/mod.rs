
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, ConfigError, OllamaConfig};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Schema Slice Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    eprintln!("{}", style("Schema").bold().yellow());
    configure_schema(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Configure the Ollama instance used to embed schema rows and questions.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;

    eprintln!();
    if Confirm::new()
        .with_prompt("Adjust retrieval tuning?")
        .default(false)
        .interact()?
    {
        configure_retrieval(&mut config)?;
    }

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before building the index.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Schema:").bold().yellow());
    match config.index_paths() {
        Ok(paths) => {
            eprintln!("  Schema: {}", style(paths.schema.display()).cyan());
            eprintln!("  Vector index: {}", style(paths.index.display()).cyan());
            eprintln!("  Row list: {}", style(paths.rows.display()).cyan());
        }
        Err(e) => eprintln!("  {} ({})", style("Not configured").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!("  Model: {}", style(&config.ollama.model).cyan());
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    eprintln!(
        "  Concurrent Requests: {}",
        style(config.ollama.max_concurrent_requests).cyan()
    );
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    let retrieval = &config.retrieval;
    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!("  Question neighbors: {}", style(retrieval.k_question).cyan());
    eprintln!("  Token neighbors: {}", style(retrieval.k_token).cyan());
    eprintln!("  Max candidates: {}", style(retrieval.top_k).cyan());
    eprintln!("  Relative threshold: {}", style(retrieval.tau).cyan());
    eprintln!(
        "  Exact match weight: {}",
        style(retrieval.exact_match_weight).cyan()
    );
    eprintln!("  Token weight: {}", style(retrieval.token_weight).cyan());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            Ok(Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_schema(config: &mut Config) -> Result<()> {
    let current = config
        .schema
        .schema_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    let schema_path: String = Input::new()
        .with_prompt("Schema document (JSON export)")
        .with_initial_text(current)
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Schema path cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let schema_path = PathBuf::from(schema_path.trim());
    if !schema_path.exists() {
        eprintln!(
            "{}",
            style("⚠ Schema file does not exist yet; the index is built on first use.").yellow()
        );
    }
    config.schema.schema_path = Some(schema_path);
    Ok(())
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(ollama.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let max_concurrent_requests: u32 = Input::new()
        .with_prompt("Concurrent embedding requests")
        .default(ollama.max_concurrent_requests)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (1..=64).contains(input) {
                Ok(())
            } else {
                Err("Must be between 1 and 64")
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_batch_size(batch_size)?;
    ollama.set_max_concurrent_requests(max_concurrent_requests)?;

    Ok(())
}

fn configure_retrieval(config: &mut Config) -> Result<()> {
    let retrieval = &mut config.retrieval;

    retrieval.k_question = Input::new()
        .with_prompt("Neighbors per question embedding")
        .default(retrieval.k_question)
        .interact_text()?;
    retrieval.k_token = Input::new()
        .with_prompt("Neighbors per token embedding")
        .default(retrieval.k_token)
        .interact_text()?;
    retrieval.top_k = Input::new()
        .with_prompt("Maximum candidate rows")
        .default(retrieval.top_k)
        .interact_text()?;
    retrieval.tau = Input::new()
        .with_prompt("Relative score threshold (0-1]")
        .default(retrieval.tau)
        .interact_text()?;

    config
        .validate()
        .context("Retrieval settings are out of range")?;
    Ok(())
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let Ok(base_url) = ollama.ollama_url() else {
        return false;
    };
    let Ok(url) = base_url.join("/api/version") else {
        return false;
    };

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(url.as_str()).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}
