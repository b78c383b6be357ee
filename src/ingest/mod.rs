//! Idempotent ingestion of a JSON record set.
//!
//! Every record whose id is not yet in the collection is embedded and
//! upserted; records already present are skipped without an embedding call,
//! so re-running over the same file only pays for what is new.

#[cfg(test)]
mod tests;

use futures::{StreamExt, stream};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::Existence;
use crate::memory::SemanticMemory;
use crate::{RagError, Result};

/// One entry of the input file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Record {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    pub content: String,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

/// Read a UTF-8 JSON array of records. Duplicate ids are rejected.
#[inline]
pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RagError::Config(format!("Failed to read data file {}: {}", path.display(), e))
    })?;

    let records: Vec<Record> = serde_json::from_str(&content).map_err(|e| {
        RagError::Config(format!("Failed to parse data file {}: {}", path.display(), e))
    })?;

    let mut seen = HashSet::with_capacity(records.len());
    for record in &records {
        if !seen.insert(record.id.as_str()) {
            return Err(RagError::Config(format!(
                "Duplicate record id {} in {}",
                record.id,
                path.display()
            )));
        }
    }

    info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Counters for one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    pub total: usize,
    pub embedded: usize,
    pub skipped: usize,
    /// Existence checks that failed and were treated as absent
    pub check_failures: usize,
    /// Records that could not be stored, with the reason
    pub failed: Vec<(String, String)>,
}

impl IngestionReport {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Whether a record with this lookup outcome must be embedded and stored.
/// A failed check counts as absent.
#[inline]
pub fn needs_ingestion(existence: &Existence) -> bool {
    !matches!(existence, Existence::Found)
}

enum Outcome {
    Embedded,
    Skipped,
    Failed(String),
}

struct ItemResult {
    outcome: Outcome,
    check_failed: bool,
}

pub struct IngestionPipeline {
    memory: SemanticMemory,
    collection: String,
    workers: usize,
    continue_on_error: bool,
    progress: bool,
}

impl IngestionPipeline {
    #[inline]
    pub fn new(memory: SemanticMemory, config: &Config) -> Self {
        Self {
            memory,
            collection: config.store.collection.clone(),
            workers: config.ingest.workers.max(1),
            continue_on_error: config.ingest.continue_on_error,
            progress: console::user_attended_stderr(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    #[inline]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Store every record that is not present yet.
    ///
    /// Up to `workers` records are in flight at once. An embed or upsert
    /// failure ends the run unless `continue_on_error` is set, in which case
    /// it is recorded in the report.
    #[inline]
    pub async fn ingest(&self, records: &[Record]) -> Result<IngestionReport> {
        let started = Instant::now();
        let total = records.len();
        let mut report = IngestionReport {
            total,
            ..IngestionReport::default()
        };

        info!(
            "Ingesting {} records into {} with {} worker(s)",
            total, self.collection, self.workers
        );
        self.memory.store().prepare(&self.collection).await?;

        let bar = self.progress_bar(total);
        let mut results = stream::iter(records)
            .map(|record| self.ingest_one(record))
            .buffer_unordered(self.workers);

        while let Some(result) = results.next().await {
            let (id, item) = match result {
                Ok(item) => item,
                Err(e) => {
                    bar.abandon_with_message("failed");
                    error!("Ingestion stopped: {}", e);
                    return Err(e);
                }
            };

            if item.check_failed {
                report.check_failures += 1;
            }
            match item.outcome {
                Outcome::Embedded => {
                    report.embedded += 1;
                    bar.set_message(format!("stored {}", id));
                }
                Outcome::Skipped => {
                    report.skipped += 1;
                    bar.set_message(format!("skipped {}", id));
                }
                Outcome::Failed(reason) => report.failed.push((id, reason)),
            }
            bar.inc(1);
        }

        bar.finish_and_clear();
        info!(
            "Ingestion finished in {:.2?}: {} embedded, {} skipped, {} failed",
            started.elapsed(),
            report.embedded,
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }

    async fn ingest_one(&self, record: &Record) -> Result<(String, ItemResult)> {
        let existence = self.memory.exists(&self.collection, &record.id).await;
        let check_failed = matches!(existence, Existence::CheckFailed(_));

        if let Existence::CheckFailed(reason) = &existence {
            warn!(
                "Existence check for {} failed, storing it again: {}",
                record.id, reason
            );
        }

        if !needs_ingestion(&existence) {
            debug!("Skipping {}, already stored", record.id);
            return Ok((
                record.id.clone(),
                ItemResult {
                    outcome: Outcome::Skipped,
                    check_failed,
                },
            ));
        }

        debug!("Embedding and storing {}", record.id);
        let saved = self
            .memory
            .save_information(&self.collection, &record.id, &record.content, &record.title)
            .await;

        let outcome = match saved {
            Ok(()) => Outcome::Embedded,
            Err(e) if self.continue_on_error => {
                warn!("Failed to store {}: {}", record.id, e);
                Outcome::Failed(e.to_string())
            }
            Err(e) => return Err(e),
        };

        Ok((
            record.id.clone(),
            ItemResult {
                outcome,
                check_failed,
            },
        ))
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }

        let style = ProgressStyle::with_template("{spinner} [{pos}/{len}] Ingesting {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        ProgressBar::new(total as u64).with_style(style)
    }
}
