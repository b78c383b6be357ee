use clap::{Parser, Subcommand};
use grounded_rag::Result;
use grounded_rag::commands::{ask, chat, ingest_data, search, show_status};
use grounded_rag::config::{Config, Credentials, get_config_dir, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "grounded-rag")]
#[command(about = "Grounded question answering over a JSON record set with Azure OpenAI")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the local vector database
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Azure OpenAI and the vector store
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Embed and store every record of the data file not stored yet
    Ingest {
        /// Data file to read instead of the configured one
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Ask questions interactively until "exit"
    Chat {
        /// Run ingestion before the first question
        #[arg(long)]
        ingest: bool,
        /// Data file to ingest instead of the configured one
        #[arg(long, requires = "ingest")]
        file: Option<PathBuf>,
    },
    /// Show the best stored match for a query
    Search {
        query: String,
    },
    /// Answer a single question
    Ask {
        query: String,
    },
    /// Show the store and data file status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir().map_err(anyhow::Error::from)?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                let config = Config::load_file(&config_dir)?;
                show_config(&config, &Credentials::from_env());
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Ingest { file } => {
            ingest_data(&config_dir, file).await?;
        }
        Commands::Chat { ingest, file } => {
            chat(&config_dir, ingest, file).await?;
        }
        Commands::Search { query } => {
            search(&config_dir, &query).await?;
        }
        Commands::Ask { query } => {
            ask(&config_dir, &query).await?;
        }
        Commands::Status => {
            show_status(&config_dir).await?;
        }
    }

    Ok(())
}
