// LanceDB vector store
// One table per collection in a local directory, cosine distance


use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::index::Index;
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::{Existence, QueryResult, StoredItem, VectorStore, check_dimension};
use crate::config::Config;
use crate::{RagError, Result};

/// An IVF index needs enough rows to train its partitions
pub const MIN_ROWS_FOR_INDEX: usize = 256;

const VECTOR_COLUMN: &str = "vector";

/// Vector store backed by a LanceDB directory
pub struct LanceStore {
    connection: Connection,
    vector_dimension: usize,
    num_partitions: u32,
    indexed: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for LanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceStore")
            .field("vector_dimension", &self.vector_dimension)
            .field("num_partitions", &self.num_partitions)
            .finish_non_exhaustive()
    }
}

impl LanceStore {
    /// Open (or create) the database directory at `db_path`
    #[inline]
    pub async fn new(db_path: &Path, vector_dimension: usize) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path).map_err(|e| {
            RagError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to connect to LanceDB: {}", e)))?;

        info!("LanceDB vector store opened");
        Ok(Self {
            connection,
            vector_dimension,
            num_partitions: 1,
            indexed: Mutex::new(HashSet::new()),
        })
    }

    /// Store at the configured vector directory, indexed with `store.num_lists` partitions
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = Self::new(
            &config.vector_database_path(),
            config.store.vector_dimension as usize,
        )
        .await?;
        Ok(store.with_num_partitions(config.store.num_lists))
    }

    /// Number of IVF partitions used when the vector index is built
    #[inline]
    #[must_use]
    pub fn with_num_partitions(mut self, num_partitions: u32) -> Self {
        self.num_partitions = num_partitions.max(1);
        self
    }

    #[inline]
    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    fn create_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                VECTOR_COLUMN,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.vector_dimension as i32,
                ),
                false,
            ),
            Field::new("text", DataType::Utf8, false),
            Field::new("description", DataType::Utf8, false),
            Field::new("additional_metadata", DataType::Utf8, false),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    async fn table_exists(&self, collection: &str) -> Result<bool> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list tables: {}", e)))?;
        Ok(table_names.iter().any(|name| name == collection))
    }

    async fn open_table(&self, collection: &str) -> Result<Option<Table>> {
        if !self.table_exists(collection).await? {
            return Ok(None);
        }

        let table = self
            .connection
            .open_table(collection)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open table: {}", e)))?;
        Ok(Some(table))
    }

    async fn open_or_create_table(&self, collection: &str) -> Result<Table> {
        if let Some(table) = self.open_table(collection).await? {
            self.check_table_dimension(&table).await?;
            return Ok(table);
        }

        info!(
            "Creating table {} with {} dimensions",
            collection, self.vector_dimension
        );
        self.connection
            .create_empty_table(collection, self.create_schema())
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to create table: {}", e)))
    }

    /// Existing tables keep their dimension; a mismatch means the embedding
    /// model changed and the collection has to be rebuilt by hand.
    async fn check_table_dimension(&self, table: &Table) -> Result<()> {
        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::Database(format!("Failed to get table schema: {}", e)))?;

        let stored = schema.fields().iter().find_map(|field| {
            if field.name() != VECTOR_COLUMN {
                return None;
            }
            match field.data_type() {
                DataType::FixedSizeList(_, size) => Some(*size as usize),
                _ => None,
            }
        });

        match stored {
            Some(dimension) => check_dimension(self.vector_dimension, dimension),
            None => Err(RagError::Database(
                "Could not find vector column or determine dimension".to_string(),
            )),
        }
    }

    fn create_record_batch(&self, item: &StoredItem) -> Result<RecordBatch> {
        let created_at = chrono::Utc::now().to_rfc3339();

        let values_array = Float32Array::from(item.embedding.clone());
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            self.vector_dimension as i32,
            Arc::new(values_array),
            None,
        )
        .map_err(|e| RagError::Database(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(vec![item.id.as_str()])),
            Arc::new(vector_array),
            Arc::new(StringArray::from(vec![item.text.as_str()])),
            Arc::new(StringArray::from(vec![item.description.as_str()])),
            Arc::new(StringArray::from(vec![item.additional_metadata.as_str()])),
            Arc::new(StringArray::from(vec![created_at.as_str()])),
        ];

        RecordBatch::try_new(self.create_schema(), arrays)
            .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Build the IVF index once the table is large enough, at most once per
    /// collection and process
    async fn ensure_vector_index(&self, collection: &str, table: &Table) -> Result<()> {
        if self
            .indexed
            .lock()
            .is_ok_and(|indexed| indexed.contains(collection))
        {
            return Ok(());
        }

        let rows = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))?;
        if rows < MIN_ROWS_FOR_INDEX {
            return Ok(());
        }

        let indices = table
            .list_indices()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list indices: {}", e)))?;
        let has_index = indices
            .iter()
            .any(|index| index.columns.iter().any(|column| column == VECTOR_COLUMN));

        if !has_index {
            info!("Creating vector index on {} ({} rows)", collection, rows);
            let builder = IvfPqIndexBuilder::default()
                .distance_type(DistanceType::Cosine)
                .num_partitions(self.num_partitions);
            table
                .create_index(&[VECTOR_COLUMN], Index::IvfPq(builder))
                .execute()
                .await
                .map_err(|e| {
                    RagError::Database(format!("Failed to create vector index: {}", e))
                })?;
        }

        if let Ok(mut indexed) = self.indexed.lock() {
            indexed.insert(collection.to_string());
        }
        Ok(())
    }
}

/// Escape a value for use inside a single-quoted SQL string literal
fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<QueryResult>> {
    let ids = string_column(batch, "id")?;
    let texts = string_column(batch, "text")?;
    let descriptions = string_column(batch, "description")?;
    let additional = string_column(batch, "additional_metadata")?;

    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    let results = (0..batch.num_rows())
        .map(|row| {
            let distance =
                distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            // cosine distance is 1 - similarity
            QueryResult::new(
                ids.value(row).to_string(),
                texts.value(row).to_string(),
                descriptions.value(row).to_string(),
                additional.value(row).to_string(),
                1.0 - distance,
            )
        })
        .collect();

    Ok(results)
}

#[async_trait]
impl VectorStore for LanceStore {
    async fn prepare(&self, collection: &str) -> Result<()> {
        let table = self.open_or_create_table(collection).await?;
        self.ensure_vector_index(collection, &table).await
    }

    async fn lookup(&self, collection: &str, id: &str) -> Existence {
        let table = match self.open_table(collection).await {
            Ok(Some(table)) => table,
            Ok(None) => return Existence::NotFound,
            Err(e) => return Existence::CheckFailed(e.to_string()),
        };

        let stream = table
            .query()
            .only_if(format!("id = {}", sql_string(id)))
            .select(Select::columns(&["id"]))
            .limit(1)
            .execute()
            .await;

        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => return Existence::CheckFailed(format!("Failed to query id: {}", e)),
        };

        loop {
            match stream.try_next().await {
                Ok(Some(batch)) if batch.num_rows() > 0 => return Existence::Found,
                Ok(Some(_)) => {}
                Ok(None) => return Existence::NotFound,
                Err(e) => {
                    return Existence::CheckFailed(format!("Failed to read query results: {}", e));
                }
            }
        }
    }

    async fn upsert(&self, collection: &str, item: StoredItem) -> Result<()> {
        check_dimension(self.vector_dimension, item.embedding.len())?;

        let table = self.open_or_create_table(collection).await?;
        let batch = self.create_record_batch(&item)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);

        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| RagError::Database(format!("Failed to upsert {}: {}", item.id, e)))?;

        debug!("Upserted {} into {}", item.id, collection);

        if let Err(e) = self.ensure_vector_index(collection, &table).await {
            // search still works without the index, only slower
            warn!("Skipping vector index for {}: {}", collection, e);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<QueryResult>> {
        check_dimension(self.vector_dimension, embedding.len())?;
        debug!("Searching {} with limit: {}", collection, limit);

        let Some(table) = self.open_table(collection).await? else {
            return Ok(Vec::new());
        };

        let mut results = table
            .vector_search(embedding)
            .map_err(|e| RagError::Database(format!("Failed to create vector search: {}", e)))?
            .column(VECTOR_COLUMN)
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to execute search: {}", e)))?;

        let mut search_results = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))?
        {
            search_results.extend(parse_search_batch(&batch)?);
        }

        search_results.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        debug!("Parsed {} search results", search_results.len());
        Ok(search_results)
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let Some(table) = self.open_table(collection).await? else {
            return Ok(0);
        };

        let count = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))?;
        Ok(count as u64)
    }
}
