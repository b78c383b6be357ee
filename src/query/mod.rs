// Retrieval query loop
// Query in, best matching record out, grounded answer streamed back


use console::style;
use dialoguer::Input;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chat::{ChatCompleter, ModelParams};
use crate::config::Config;
use crate::database::QueryResult;
use crate::memory::SemanticMemory;
use crate::prompt::{PromptContext, PromptTemplate};
use crate::{RagError, Result};

/// Typing this (surrounding whitespace ignored) ends the loop
pub const EXIT_SENTINEL: &str = "exit";

const FRAGMENT_BUFFER: usize = 64;

#[inline]
pub fn is_exit(query: &str) -> bool {
    query.trim() == EXIT_SENTINEL
}

/// Where queries come from. `None` means the input is exhausted.
pub trait QuerySource {
    fn next_query(&mut self) -> Result<Option<String>>;
}

/// Interactive prompt on the terminal
#[derive(Debug, Default)]
pub struct ConsoleSource;

impl QuerySource for ConsoleSource {
    fn next_query(&mut self) -> Result<Option<String>> {
        let input = Input::<String>::new()
            .with_prompt(format!("Ask a question ('{}' to quit)", EXIT_SENTINEL))
            .allow_empty(true)
            .interact_text();

        prompt_outcome(input)
    }
}

/// End of input and Ctrl-C at the prompt end the session; other errors propagate
fn prompt_outcome(input: dialoguer::Result<String>) -> Result<Option<String>> {
    match input.map_err(|dialoguer::Error::IO(e)| e) {
        Ok(query) => Ok(Some(query)),
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::Interrupted
            ) =>
        {
            Ok(None)
        }
        Err(e) => Err(RagError::Io(e)),
    }
}

/// One query per line, for piped input
#[derive(Debug)]
pub struct LineSource<R> {
    reader: R,
}

impl<R: BufRead> LineSource<R> {
    #[inline]
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> QuerySource for LineSource<R> {
    fn next_query(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Text printed by the `search` command for the best match
#[inline]
pub fn format_search_result(result: &QueryResult) -> Result<String> {
    Ok(format!(
        "Result is: {}\nRelevance Score: {}\nFull Record: {}",
        result.text,
        result.relevance,
        result.record_json()?
    ))
}

pub struct RetrievalQueryLoop {
    memory: SemanticMemory,
    chat: Arc<dyn ChatCompleter>,
    template: PromptTemplate,
    params: ModelParams,
    collection: String,
    search_limit: usize,
    pause: Duration,
}

impl RetrievalQueryLoop {
    #[inline]
    pub fn new(
        memory: SemanticMemory,
        chat: Arc<dyn ChatCompleter>,
        template: PromptTemplate,
        config: &Config,
    ) -> Self {
        Self {
            memory,
            chat,
            template,
            params: ModelParams::from(&config.chat),
            collection: config.store.collection.clone(),
            search_limit: config.chat.search_limit.max(1),
            pause: Duration::from_millis(config.chat.pause_ms),
        }
    }

    /// Delay after each answer before the next query is read
    #[inline]
    #[must_use]
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// The best stored match for `query`
    #[inline]
    pub async fn retrieve(&self, query: &str) -> Result<QueryResult> {
        self.memory
            .top_match_within(&self.collection, query, self.search_limit)
            .await
    }

    /// Answer one query, writing fragments to `out` as they arrive
    #[inline]
    pub async fn answer<W: Write>(&self, query: &str, out: &mut W) -> Result<()> {
        let top = self.retrieve(query).await?;
        debug!(
            "Grounding on {} (relevance {:.4})",
            top.id, top.relevance
        );

        let context = PromptContext {
            db_record: top.record_json()?,
            query_term: query.to_string(),
        };
        let prompt = self.template.render_context(&context)?;

        let (tx, mut rx) = mpsc::channel::<Result<String>>(FRAGMENT_BUFFER);
        let chat = Arc::clone(&self.chat);
        let params = self.params;

        // The completion stream blocks on the network, so it is drained off
        // the async workers and handed over fragment by fragment
        let producer = tokio::task::spawn_blocking(move || {
            match chat.complete_stream(&prompt, &params) {
                Ok(fragments) => {
                    for fragment in fragments {
                        if tx.blocking_send(fragment).is_err() {
                            debug!("Answer writer stopped, dropping the rest of the stream");
                            break;
                        }
                    }
                }
                Err(e) => {
                    if tx.blocking_send(Err(e)).is_err() {
                        debug!("Answer writer stopped before the error was delivered");
                    }
                }
            }
        });

        while let Some(fragment) = rx.recv().await {
            out.write_all(fragment?.as_bytes())?;
            out.flush()?;
        }
        producer.await.map_err(|e| RagError::Other(e.into()))?;

        writeln!(out)?;
        out.flush()?;

        Ok(())
    }

    /// Read queries until the exit sentinel or end of input. Returns the
    /// number of queries answered.
    #[inline]
    pub async fn run<S, W>(&self, source: &mut S, out: &mut W) -> Result<usize>
    where
        S: QuerySource,
        W: Write,
    {
        let mut answered = 0;

        while let Some(query) = source.next_query()? {
            if is_exit(&query) {
                info!("Exit requested");
                break;
            }

            let query = query.trim();
            if query.is_empty() {
                continue;
            }

            match self.answer(query, out).await {
                Ok(()) => answered += 1,
                Err(RagError::NoMatchFound(_)) => {
                    warn!("No stored record matches the query");
                    writeln!(
                        out,
                        "{}",
                        style("No stored record matches that question. Try rephrasing it.")
                            .yellow()
                    )?;
                    continue;
                }
                Err(e) => return Err(e),
            }

            if !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
        }

        Ok(answered)
    }
}
