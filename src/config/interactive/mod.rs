
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::Path;

use super::settings::{ENV_OPENAI_KEY, ENV_STORE_PASSWORD};
use super::{Config, ConfigError, Credentials, OpenAiConfig, StoreBackend, StoreConfig};

const BACKENDS: [StoreBackend; 3] = [
    StoreBackend::Lancedb,
    StoreBackend::CosmosMongo,
    StoreBackend::Memory,
];

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Grounded RAG Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir);

    eprintln!("{}", style("Azure OpenAI").bold().yellow());
    eprintln!(
        "The API key is read from {} and is never stored in the config file.",
        style(ENV_OPENAI_KEY).cyan()
    );
    eprintln!();

    configure_openai(&mut config.openai)?;

    eprintln!();
    eprintln!("{}", style("Vector Store").bold().yellow());
    configure_store(&mut config.store)?;

    if !config.openai.endpoint.is_empty() {
        eprintln!();
        eprintln!("{}", style("Testing configuration...").yellow());

        if test_endpoint_connection(&config.openai) {
            eprintln!("{}", style("✓ Azure OpenAI endpoint reachable!").green());
        } else {
            eprintln!(
                "{}",
                style("⚠ Warning: Could not reach the Azure OpenAI endpoint").yellow()
            );
            eprintln!("You can continue, but check the endpoint before ingesting.");
        }
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
pub fn show_config(config: &Config, credentials: &Credentials) {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Azure OpenAI:").bold().yellow());
    eprintln!("  Endpoint: {}", display_or_unset(&config.openai.endpoint));
    eprintln!(
        "  Embedding deployment: {}",
        display_or_unset(&config.openai.embedding_deployment)
    );
    eprintln!(
        "  Chat deployment: {}",
        display_or_unset(&config.openai.chat_deployment)
    );
    eprintln!("  API version: {}", style(&config.openai.api_version).cyan());
    eprintln!(
        "  API key ({}): {}",
        ENV_OPENAI_KEY,
        secret_status(credentials.openai_api_key.is_some())
    );

    eprintln!();
    eprintln!("{}", style("Chat:").bold().yellow());
    eprintln!("  Max tokens: {}", style(config.chat.max_tokens).cyan());
    eprintln!("  Temperature: {}", style(config.chat.temperature).cyan());
    eprintln!("  Top p: {}", style(config.chat.top_p).cyan());
    eprintln!("  Pause: {}ms", style(config.chat.pause_ms).cyan());

    eprintln!();
    eprintln!("{}", style("Vector Store:").bold().yellow());
    eprintln!("  Backend: {}", style(config.store.backend).cyan());
    eprintln!("  Collection: {}", style(&config.store.collection).cyan());
    eprintln!(
        "  Dimension: {}",
        style(config.store.vector_dimension).cyan()
    );
    if config.store.backend == StoreBackend::CosmosMongo {
        eprintln!("  Database: {}", display_or_unset(&config.store.database_name));
        eprintln!("  Resource: {}", display_or_unset(&config.store.resource_name));
        eprintln!("  Username: {}", display_or_unset(&config.store.username));
        eprintln!(
            "  Password ({}): {}",
            ENV_STORE_PASSWORD,
            secret_status(credentials.store_password.is_some())
        );
    } else if config.store.backend == StoreBackend::Lancedb {
        eprintln!(
            "  Path: {}",
            style(config.vector_database_path().display()).cyan()
        );
    }

    eprintln!();
    eprintln!("Data file: {}", style(config.data_file_path().display()).cyan());
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
}

fn display_or_unset(value: &str) -> console::StyledObject<&str> {
    if value.is_empty() {
        style("(not set)").red()
    } else {
        style(value).cyan()
    }
}

fn secret_status(present: bool) -> console::StyledObject<&'static str> {
    if present {
        style("set").green()
    } else {
        style("not set").red()
    }
}

fn load_existing_config(config_dir: &Path) -> Config {
    Config::load_file(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            }
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        },
    )
}

fn configure_openai(openai: &mut OpenAiConfig) -> Result<()> {
    let endpoint: String = Input::new()
        .with_prompt("Azure OpenAI endpoint")
        .default(openai.endpoint.clone())
        .allow_empty(true)
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            if input.trim().is_empty() {
                return Ok(());
            }
            let temp_config = OpenAiConfig {
                endpoint: input.clone(),
                ..openai.clone()
            };
            temp_config.endpoint_url().map(|_| ())
        })
        .interact_text()?;

    let embedding_deployment: String = Input::new()
        .with_prompt("Embedding deployment")
        .default(openai.embedding_deployment.clone())
        .allow_empty(true)
        .interact_text()?;

    let chat_deployment: String = Input::new()
        .with_prompt("Chat deployment")
        .default(openai.chat_deployment.clone())
        .allow_empty(true)
        .interact_text()?;

    let api_version: String = Input::new()
        .with_prompt("API version")
        .default(openai.api_version.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("API version cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    openai.endpoint = endpoint.trim().to_string();
    openai.embedding_deployment = embedding_deployment.trim().to_string();
    openai.chat_deployment = chat_deployment.trim().to_string();
    openai.api_version = api_version.trim().to_string();

    Ok(())
}

fn configure_store(store: &mut StoreConfig) -> Result<()> {
    let labels: Vec<String> = BACKENDS.iter().map(ToString::to_string).collect();
    let default_index = BACKENDS
        .iter()
        .position(|&b| b == store.backend)
        .unwrap_or(0);

    let backend_index = Select::new()
        .with_prompt("Store backend")
        .default(default_index)
        .items(&labels)
        .interact()?;
    store.backend = BACKENDS[backend_index];

    let collection: String = Input::new()
        .with_prompt("Collection name")
        .default(store.collection.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = StoreConfig {
                collection: input.clone(),
                ..store.clone()
            };
            temp_config.validate()
        })
        .interact_text()?;
    store.collection = collection;

    let dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(store.vector_dimension)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (2..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 2 and 4096")
            }
        })
        .interact_text()?;
    store.vector_dimension = dimension;

    if store.backend == StoreBackend::CosmosMongo {
        store.database_name = Input::new()
            .with_prompt("Database name")
            .default(store.database_name.clone())
            .interact_text()?;
        store.resource_name = Input::new()
            .with_prompt("Cluster resource name")
            .default(store.resource_name.clone())
            .allow_empty(true)
            .interact_text()?;
        store.username = Input::new()
            .with_prompt("Username")
            .default(store.username.clone())
            .allow_empty(true)
            .interact_text()?;
        eprintln!(
            "The password is read from {}.",
            style(ENV_STORE_PASSWORD).cyan()
        );
    }

    Ok(())
}

fn test_endpoint_connection(openai: &OpenAiConfig) -> bool {
    let Ok(url) = openai.endpoint_url() else {
        return false;
    };

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    // Any HTTP status means the host answered; auth is checked on first use
    match agent.get(url.as_str()).call() {
        Ok(_) | Err(ureq::Error::StatusCode(_)) => true,
        Err(_) => false,
    }
}
