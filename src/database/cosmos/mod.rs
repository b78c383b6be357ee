//! Azure Cosmos DB for MongoDB (vCore) vector store.
//!
//! Items are stored as documents keyed by `_id` with the embedding in the
//! `embedding` field. Similarity search goes through the `cosmosSearch`
//! aggregation stage against an IVF index created by [`VectorStore::prepare`].


use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::{debug, info};

use super::{Existence, QueryResult, StoredItem, VectorStore, check_dimension};
use crate::config::{Credentials, StoreConfig};
use crate::connection::ConnectionStringBuilder;
use crate::{RagError, Result};

const EMBEDDING_FIELD: &str = "embedding";
const SCORE_FIELD: &str = "similarityScore";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Vector store on a Cosmos DB vCore cluster
#[derive(Debug, Clone)]
pub struct CosmosMongoStore {
    database: Database,
    index_name: String,
    num_lists: u32,
    similarity: String,
    vector_dimension: usize,
}

impl CosmosMongoStore {
    /// Connect to the cluster named in `config`.
    ///
    /// The connection string carries the password; it is parsed here and
    /// dropped, never logged.
    #[inline]
    pub async fn connect(config: &StoreConfig, credentials: &Credentials) -> Result<Self> {
        let password = credentials
            .store_password
            .as_ref()
            .ok_or_else(|| RagError::MissingCredential("password".to_string()))?;

        let connection_string = ConnectionStringBuilder::new()
            .username(&config.username)
            .password(password)
            .resource_name(&config.resource_name)
            .build()?;

        let mut options = ClientOptions::parse(connection_string.expose_secret().as_str())
            .await
            .map_err(|_| {
                RagError::Config(format!(
                    "Invalid connection settings for Cosmos resource {}",
                    config.resource_name
                ))
            })?;
        options.app_name = Some("grounded-rag".to_string());
        options.connect_timeout = Some(CONNECT_TIMEOUT);
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);

        let client = Client::with_options(options)
            .map_err(|e| RagError::Database(format!("Failed to create MongoDB client: {}", e)))?;

        info!(
            "Connected to Cosmos resource {} database {}",
            config.resource_name, config.database_name
        );

        Ok(Self::with_database(
            client.database(&config.database_name),
            config,
        ))
    }

    /// Wrap an already connected database handle
    #[inline]
    pub fn with_database(database: Database, config: &StoreConfig) -> Self {
        Self {
            database,
            index_name: config.index_name.clone(),
            num_lists: config.num_lists,
            similarity: config.similarity.clone(),
            vector_dimension: config.vector_dimension as usize,
        }
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

/// `createIndexes` command for the IVF vector index
#[inline]
pub fn create_index_command(
    collection: &str,
    index_name: &str,
    num_lists: u32,
    similarity: &str,
    dimensions: usize,
) -> Document {
    doc! {
        "createIndexes": collection,
        "indexes": [{
            "name": index_name,
            "key": { EMBEDDING_FIELD: "cosmosSearch" },
            "cosmosSearchOptions": {
                "kind": "vector-ivf",
                "numLists": i64::from(num_lists),
                "similarity": similarity,
                "dimensions": dimensions as i64,
            },
        }],
    }
}

/// Aggregation returning the `limit` nearest documents with their score
#[inline]
pub fn search_pipeline(embedding: &[f32], limit: usize) -> Vec<Document> {
    let vector: Vec<Bson> = embedding
        .iter()
        .map(|value| Bson::Double(f64::from(*value)))
        .collect();

    vec![
        doc! {
            "$search": {
                "cosmosSearch": {
                    "vector": vector,
                    "path": EMBEDDING_FIELD,
                    "k": limit as i64,
                },
                "returnStoredSource": true,
            }
        },
        doc! {
            "$project": {
                SCORE_FIELD: { "$meta": "searchScore" },
                "document": "$$ROOT",
            }
        },
    ]
}

#[inline]
pub fn item_document(item: &StoredItem, timestamp: &str) -> Document {
    let embedding: Vec<Bson> = item
        .embedding
        .iter()
        .map(|value| Bson::Double(f64::from(*value)))
        .collect();

    doc! {
        "_id": item.id.as_str(),
        EMBEDDING_FIELD: embedding,
        "text": item.text.as_str(),
        "description": item.description.as_str(),
        "additional_metadata": item.additional_metadata.as_str(),
        "timestamp": timestamp,
    }
}

/// Convert one aggregation result into a [`QueryResult`]
#[inline]
pub fn parse_search_hit(hit: &Document) -> Result<QueryResult> {
    let score = match hit.get(SCORE_FIELD) {
        Some(Bson::Double(value)) => *value as f32,
        Some(Bson::Int32(value)) => *value as f32,
        Some(Bson::Int64(value)) => *value as f32,
        _ => {
            return Err(RagError::Database(format!(
                "Search result without {}",
                SCORE_FIELD
            )));
        }
    };

    let document = hit
        .get_document("document")
        .map_err(|e| RagError::Database(format!("Search result without document: {}", e)))?;

    let id = match document.get("_id") {
        Some(Bson::String(id)) => id.clone(),
        Some(other) => other.to_string(),
        None => return Err(RagError::Database("Search result without _id".to_string())),
    };
    let field = |name: &str| document.get_str(name).unwrap_or_default().to_string();

    Ok(QueryResult::new(
        id,
        field("text"),
        field("description"),
        field("additional_metadata"),
        score,
    ))
}

#[async_trait]
impl VectorStore for CosmosMongoStore {
    async fn prepare(&self, collection: &str) -> Result<()> {
        let command = create_index_command(
            collection,
            &self.index_name,
            self.num_lists,
            &self.similarity,
            self.vector_dimension,
        );

        self.database.run_command(command).await.map_err(|e| {
            RagError::Database(format!("Failed to create vector index on {}: {}", collection, e))
        })?;

        info!("Vector index {} ready on {}", self.index_name, collection);
        Ok(())
    }

    async fn lookup(&self, collection: &str, id: &str) -> Existence {
        match self.collection(collection).find_one(doc! { "_id": id }).await {
            Ok(Some(_)) => Existence::Found,
            Ok(None) => Existence::NotFound,
            Err(e) => Existence::CheckFailed(e.to_string()),
        }
    }

    async fn upsert(&self, collection: &str, item: StoredItem) -> Result<()> {
        check_dimension(self.vector_dimension, item.embedding.len())?;

        let timestamp = chrono::Utc::now().to_rfc3339();
        let document = item_document(&item, &timestamp);

        self.collection(collection)
            .replace_one(doc! { "_id": item.id.as_str() }, document)
            .upsert(true)
            .await
            .map_err(|e| RagError::Database(format!("Failed to upsert {}: {}", item.id, e)))?;

        debug!("Upserted {} into {}", item.id, collection);
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

        let mut cursor = self
            .collection(collection)
            .aggregate(search_pipeline(embedding, limit))
            .await
            .map_err(|e| RagError::Database(format!("Failed to execute search: {}", e)))?;

        let mut results = Vec::new();
        while let Some(hit) = cursor
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read search results: {}", e)))?
        {
            results.push(parse_search_hit(&hit)?);
        }

        results.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        Ok(results)
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        self.collection(collection)
            .count_documents(doc! {})
            .await
            .map_err(|e| RagError::Database(format!("Failed to count documents: {}", e)))
    }
}
