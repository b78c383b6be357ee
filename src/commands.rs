use anyhow::{Context, Result};
use console::style;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::RagError;
use crate::chat::{AzureOpenAiChat, ChatCompleter};
use crate::config::{Config, Credentials, StoreBackend};
use crate::database::open_store;
use crate::embeddings::AzureOpenAiEmbedder;
use crate::ingest::{IngestionPipeline, IngestionReport, load_records};
use crate::memory::SemanticMemory;
use crate::prompt::PromptTemplate;
use crate::query::{ConsoleSource, LineSource, RetrievalQueryLoop, format_search_result};

/// Everything a command needs, built once from the configuration
struct Services {
    config: Config,
    credentials: Credentials,
    memory: SemanticMemory,
}

impl Services {
    async fn start(config_dir: &Path) -> Result<Self> {
        let config = Config::load(config_dir)?;
        let credentials = Credentials::from_env();
        config
            .require_services(&credentials)
            .context("Missing required configuration")?;

        let api_key = credentials
            .openai_api_key
            .clone()
            .ok_or_else(|| RagError::MissingCredential("Azure OpenAI API key".to_string()))?;

        let embedder = Arc::new(AzureOpenAiEmbedder::new(&config, api_key)?);
        let store = open_store(&config, &credentials)
            .await
            .context("Failed to open the vector store")?;

        Ok(Self {
            memory: SemanticMemory::new(embedder, store),
            config,
            credentials,
        })
    }

    fn chat(&self) -> Result<Arc<dyn ChatCompleter>> {
        let api_key = self
            .credentials
            .openai_api_key
            .clone()
            .ok_or_else(|| RagError::MissingCredential("Azure OpenAI API key".to_string()))?;
        Ok(Arc::new(AzureOpenAiChat::new(&self.config, api_key)?))
    }

    fn prompt_template(&self) -> Result<PromptTemplate> {
        let Some(path) = &self.config.chat.prompt_template_file else {
            return Ok(PromptTemplate::default());
        };

        let path = if path.is_relative() {
            self.config.get_base_dir().join(path)
        } else {
            path.clone()
        };
        PromptTemplate::from_file(&path)
            .with_context(|| format!("Failed to read prompt template: {}", path.display()))
    }

    fn query_loop(&self) -> Result<RetrievalQueryLoop> {
        Ok(RetrievalQueryLoop::new(
            self.memory.clone(),
            self.chat()?,
            self.prompt_template()?,
            &self.config,
        ))
    }

    /// The in-memory store starts empty, so it is always filled first
    fn must_ingest(&self, requested: bool) -> bool {
        requested
            || self.config.ingest.on_start
            || self.config.store.backend == StoreBackend::Memory
    }

    async fn ingest(&self, file: Option<PathBuf>) -> Result<IngestionReport> {
        let path = file.unwrap_or_else(|| self.config.data_file_path());
        let records = load_records(&path)?;

        eprintln!(
            "{}",
            style(format!(
                "Ingesting {} records from {}",
                records.len(),
                path.display()
            ))
            .cyan()
        );

        let report = IngestionPipeline::new(self.memory.clone(), &self.config)
            .ingest(&records)
            .await?;
        print_report(&report);
        Ok(report)
    }
}

fn print_report(report: &IngestionReport) {
    eprintln!(
        "{} {} embedded, {} skipped, {} failed ({} total)",
        style("✓").green(),
        report.embedded,
        report.skipped,
        report.failed.len(),
        report.total
    );
    if report.check_failures > 0 {
        eprintln!(
            "  {} existence checks failed and were stored again",
            style(report.check_failures).yellow()
        );
    }
    for (id, reason) in &report.failed {
        eprintln!("  {} {}: {}", style("✗").red(), id, reason);
    }
}

/// Embed and store every record of the data file not yet in the store
#[inline]
pub async fn ingest_data(config_dir: &Path, file: Option<PathBuf>) -> Result<()> {
    let services = Services::start(config_dir).await?;
    let report = services.ingest(file).await?;

    if !report.is_complete() {
        warn!("{} records could not be stored", report.failed.len());
    }
    Ok(())
}

/// Interactive grounded question answering until `exit`
#[inline]
pub async fn chat(config_dir: &Path, ingest: bool, file: Option<PathBuf>) -> Result<()> {
    let services = Services::start(config_dir).await?;
    if services.must_ingest(ingest) {
        services.ingest(file).await?;
    }

    let query_loop = services.query_loop()?;
    let mut stdout = std::io::stdout().lock();

    info!("Starting query loop");
    let answered = if console::user_attended() {
        query_loop.run(&mut ConsoleSource, &mut stdout).await?
    } else {
        let stdin = std::io::stdin().lock();
        query_loop.run(&mut LineSource::new(stdin), &mut stdout).await?
    };

    info!("Query loop finished after {} answers", answered);
    Ok(())
}

/// Print the best stored match for `query` without calling the chat model
#[inline]
pub async fn search(config_dir: &Path, query: &str) -> Result<()> {
    let services = Services::start(config_dir).await?;
    if services.must_ingest(false) {
        services.ingest(None).await?;
    }

    let results = services
        .memory
        .search(&services.config.store.collection, query, 1)
        .await?;

    match results.first() {
        Some(top) => println!("{}", format_search_result(top)?),
        None => println!("{}", style("No stored record matches that query.").yellow()),
    }
    Ok(())
}

/// Answer a single question and exit
#[inline]
pub async fn ask(config_dir: &Path, query: &str) -> Result<()> {
    let services = Services::start(config_dir).await?;
    if services.must_ingest(false) {
        services.ingest(None).await?;
    }

    let query_loop = services.query_loop()?;
    let mut stdout = std::io::stdout().lock();

    match query_loop.answer(query, &mut stdout).await {
        Err(RagError::NoMatchFound(_)) => {
            writeln!(stdout, "{}", style("No stored record matches that query.").yellow())?;
            Ok(())
        }
        other => Ok(other?),
    }
}

/// Show the configured store and how much of the data file it holds
#[inline]
pub async fn show_status(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir)?;
    let credentials = Credentials::from_env();

    println!("{}", style("📊 Grounded RAG Status").bold().cyan());
    println!();
    println!("Backend: {}", style(config.store.backend).cyan());
    println!("Collection: {}", style(&config.store.collection).cyan());

    match open_store(&config, &credentials).await {
        Ok(store) => match store.count(&config.store.collection).await {
            Ok(count) => println!("Stored records: {}", style(count).green()),
            Err(e) => println!("Stored records: {} ({})", style("unknown").red(), e),
        },
        Err(e) => println!("Store: {} ({})", style("unavailable").red(), e),
    }

    let data_file = config.data_file_path();
    match load_records(&data_file) {
        Ok(records) => println!(
            "Data file: {} ({} records)",
            style(data_file.display()).cyan(),
            records.len()
        ),
        Err(e) => println!("Data file: {} ({})", style(data_file.display()).red(), e),
    }

    match config.require_services(&credentials) {
        Ok(()) => println!("Services: {}", style("configured").green()),
        Err(e) => println!("Services: {} ({})", style("incomplete").yellow(), e),
    }

    Ok(())
}
