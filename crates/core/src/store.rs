//! Vector store abstraction
//!
//! One trait seam over vector index backends: existence check, cosine
//! index creation, vector upsert, and similarity search. The production
//! client targets Pinecone serverless (control plane for index
//! management, per-index data plane for vectors); the in-memory mock
//! scores by cosine similarity and counts calls for tests.

use crate::config::StoreConfig;
use crate::errors::{PipelineError, ProviderError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// A passage returned by a similarity search. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// One vector to upload.
#[derive(Debug, Clone)]
pub struct UpsertItem {
    pub id: String,
    pub embedding: Vec<f32>,
    pub content: String,
    pub metadata: BTreeMap<String, Value>,
}

/// Result of an index-creation attempt. A creation rejected because the
/// name is taken is reported as `AlreadyExists`, not an error; the
/// caller treats it the same as finding the index up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Trait for vector index backends.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Whether an index with this identifier exists.
    async fn exists(&self, index_id: &str) -> std::result::Result<bool, ProviderError>;

    /// Create a cosine-metric index with the given dimension.
    async fn create(
        &self,
        index_id: &str,
        dimension: usize,
    ) -> std::result::Result<CreateOutcome, ProviderError>;

    /// Upload vectors. Re-upserting an existing id overwrites it.
    async fn upsert(
        &self,
        index_id: &str,
        items: Vec<UpsertItem>,
    ) -> std::result::Result<(), ProviderError>;

    /// Top-k similarity search by query vector.
    async fn search(
        &self,
        index_id: &str,
        vector: &[f32],
        k: usize,
    ) -> std::result::Result<Vec<RetrievedDocument>, ProviderError>;
}

/// Metadata key the document text is stored under in the backend.
const CONTENT_KEY: &str = "text";

/// Pinecone serverless client
pub struct PineconeStore {
    client: reqwest::Client,
    api_key: String,
    control_plane_url: String,
    cloud: String,
    region: String,
    // index id -> data plane host
    hosts: Mutex<HashMap<String, String>>,
}

#[derive(Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: &'a str,
    spec: IndexSpec<'a>,
}

#[derive(Serialize)]
struct IndexSpec<'a> {
    serverless: ServerlessSpec<'a>,
}

#[derive(Serialize)]
struct ServerlessSpec<'a> {
    cloud: &'a str,
    region: &'a str,
}

#[derive(Deserialize)]
struct IndexDescription {
    host: String,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Deserialize, Default)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Serialize)]
struct UpsertRequest {
    vectors: Vec<VectorRecord>,
}

#[derive(Serialize)]
struct VectorRecord {
    id: String,
    values: Vec<f32>,
    metadata: serde_json::Map<String, Value>,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    vector: &'a [f32],
    #[serde(rename = "topK")]
    top_k: usize,
    #[serde(rename = "includeMetadata")]
    include_metadata: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    #[serde(default)]
    metadata: serde_json::Map<String, Value>,
}

impl PineconeStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PipelineError::configuration("PINECONE_API_KEY not set"))?
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                PipelineError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            api_key,
            control_plane_url: config.control_plane_url.trim_end_matches('/').to_string(),
            cloud: config.cloud.clone(),
            region: config.region.clone(),
            hosts: Mutex::new(HashMap::new()),
        })
    }

    async fn describe(
        &self,
        index_id: &str,
    ) -> std::result::Result<Option<IndexDescription>, ProviderError> {
        let url = format!("{}/indexes/{}", self.control_plane_url, index_id);
        let response = self
            .client
            .get(&url)
            .header("Api-Key", &self.api_key)
            .send()
            .await?;

        match response.status().as_u16() {
            404 => Ok(None),
            s if (200..300).contains(&s) => {
                let description: IndexDescription = response.json().await.map_err(|e| {
                    ProviderError::InvalidResponse(format!("malformed index description: {e}"))
                })?;
                Ok(Some(description))
            }
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Api { status: s, body })
            }
        }
    }

    /// Resolve and cache the data plane host for an index.
    async fn host(&self, index_id: &str) -> std::result::Result<String, ProviderError> {
        if let Ok(hosts) = self.hosts.lock() {
            if let Some(host) = hosts.get(index_id) {
                return Ok(host.clone());
            }
        }

        let description = self.describe(index_id).await?.ok_or_else(|| {
            ProviderError::InvalidResponse(format!("index {index_id} does not exist"))
        })?;

        if let Ok(mut hosts) = self.hosts.lock() {
            hosts.insert(index_id.to_string(), description.host.clone());
        }
        Ok(description.host)
    }

    /// Wait until a freshly created index reports ready.
    async fn wait_ready(&self, index_id: &str) -> std::result::Result<(), ProviderError> {
        const MAX_POLLS: u32 = 30;
        for _ in 0..MAX_POLLS {
            if let Some(description) = self.describe(index_id).await? {
                if description.status.ready {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        Err(ProviderError::InvalidResponse(format!(
            "index {index_id} not ready after creation"
        )))
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn exists(&self, index_id: &str) -> std::result::Result<bool, ProviderError> {
        Ok(self.describe(index_id).await?.is_some())
    }

    async fn create(
        &self,
        index_id: &str,
        dimension: usize,
    ) -> std::result::Result<CreateOutcome, ProviderError> {
        let url = format!("{}/indexes", self.control_plane_url);
        let request = CreateIndexRequest {
            name: index_id,
            dimension,
            metric: "cosine",
            spec: IndexSpec {
                serverless: ServerlessSpec {
                    cloud: &self.cloud,
                    region: &self.region,
                },
            },
        };

        let response = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        match response.status().as_u16() {
            409 => {
                debug!(index_id, "index name taken, treating as existing");
                Ok(CreateOutcome::AlreadyExists)
            }
            s if (200..300).contains(&s) => {
                self.wait_ready(index_id).await?;
                info!(index_id, dimension, "index created");
                Ok(CreateOutcome::Created)
            }
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Api { status: s, body })
            }
        }
    }

    async fn upsert(
        &self,
        index_id: &str,
        items: Vec<UpsertItem>,
    ) -> std::result::Result<(), ProviderError> {
        let host = self.host(index_id).await?;
        let url = format!("https://{host}/vectors/upsert");

        let vectors = items
            .into_iter()
            .map(|item| {
                let mut metadata = serde_json::Map::new();
                metadata.insert(CONTENT_KEY.to_string(), Value::String(item.content));
                metadata.extend(item.metadata);
                VectorRecord {
                    id: item.id,
                    values: item.embedding,
                    metadata,
                }
            })
            .collect();

        let response = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .json(&UpsertRequest { vectors })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }
        Ok(())
    }

    async fn search(
        &self,
        index_id: &str,
        vector: &[f32],
        k: usize,
    ) -> std::result::Result<Vec<RetrievedDocument>, ProviderError> {
        let host = self.host(index_id).await?;
        let url = format!("https://{host}/query");
        let request = QueryRequest {
            vector,
            top_k: k,
            include_metadata: true,
        };

        let response = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let result: QueryResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("malformed query response: {e}")))?;

        Ok(result
            .matches
            .into_iter()
            .map(|m| {
                let mut metadata: BTreeMap<String, Value> = m.metadata.into_iter().collect();
                let content = match metadata.remove(CONTENT_KEY) {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                RetrievedDocument { content, metadata }
            })
            .collect())
    }
}

/// In-memory cosine-scoring store for tests.
#[derive(Default)]
pub struct MemoryStore {
    indexes: Mutex<HashMap<String, MemoryIndex>>,
    upsert_calls: AtomicUsize,
    search_calls: AtomicUsize,
}

struct MemoryIndex {
    dimension: usize,
    vectors: BTreeMap<String, StoredVector>,
}

struct StoredVector {
    embedding: Vec<f32>,
    content: String,
    metadata: BTreeMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vectors currently held by an index (0 if absent).
    pub fn vector_count(&self, index_id: &str) -> usize {
        self.indexes
            .lock()
            .ok()
            .and_then(|indexes| indexes.get(index_id).map(|i| i.vectors.len()))
            .unwrap_or(0)
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn exists(&self, index_id: &str) -> std::result::Result<bool, ProviderError> {
        Ok(self
            .indexes
            .lock()
            .map(|indexes| indexes.contains_key(index_id))
            .unwrap_or(false))
    }

    async fn create(
        &self,
        index_id: &str,
        dimension: usize,
    ) -> std::result::Result<CreateOutcome, ProviderError> {
        let mut indexes = self
            .indexes
            .lock()
            .map_err(|_| ProviderError::InvalidResponse("store lock poisoned".to_string()))?;
        if indexes.contains_key(index_id) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        indexes.insert(
            index_id.to_string(),
            MemoryIndex {
                dimension,
                vectors: BTreeMap::new(),
            },
        );
        Ok(CreateOutcome::Created)
    }

    async fn upsert(
        &self,
        index_id: &str,
        items: Vec<UpsertItem>,
    ) -> std::result::Result<(), ProviderError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut indexes = self
            .indexes
            .lock()
            .map_err(|_| ProviderError::InvalidResponse("store lock poisoned".to_string()))?;
        let index = indexes.get_mut(index_id).ok_or_else(|| ProviderError::Api {
            status: 404,
            body: format!("index {index_id} not found"),
        })?;
        for item in items {
            if item.embedding.len() != index.dimension {
                return Err(ProviderError::Api {
                    status: 400,
                    body: format!(
                        "dimension mismatch: index is {}, vector is {}",
                        index.dimension,
                        item.embedding.len()
                    ),
                });
            }
            index.vectors.insert(
                item.id,
                StoredVector {
                    embedding: item.embedding,
                    content: item.content,
                    metadata: item.metadata,
                },
            );
        }
        Ok(())
    }

    async fn search(
        &self,
        index_id: &str,
        vector: &[f32],
        k: usize,
    ) -> std::result::Result<Vec<RetrievedDocument>, ProviderError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let indexes = self
            .indexes
            .lock()
            .map_err(|_| ProviderError::InvalidResponse("store lock poisoned".to_string()))?;
        let index = indexes.get(index_id).ok_or_else(|| ProviderError::Api {
            status: 404,
            body: format!("index {index_id} not found"),
        })?;

        let mut scored: Vec<(f32, RetrievedDocument)> = index
            .vectors
            .values()
            .map(|v| {
                (
                    cosine(vector, &v.embedding),
                    RetrievedDocument {
                        content: v.content.clone(),
                        metadata: v.metadata.clone(),
                    },
                )
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(k).map(|(_, doc)| doc).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, embedding: Vec<f32>, content: &str) -> UpsertItem {
        UpsertItem {
            id: id.to_string(),
            embedding,
            content: content.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryStore::new();
        assert!(!store.exists("idx").await.unwrap());

        assert_eq!(store.create("idx", 2).await.unwrap(), CreateOutcome::Created);
        assert_eq!(
            store.create("idx", 2).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
        assert!(store.exists("idx").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_search_orders_by_similarity() {
        let store = MemoryStore::new();
        store.create("idx", 2).await.unwrap();
        store
            .upsert(
                "idx",
                vec![
                    item("a", vec![1.0, 0.0], "east"),
                    item("b", vec![0.0, 1.0], "north"),
                    item("c", vec![0.7, 0.7], "northeast"),
                ],
            )
            .await
            .unwrap();

        let results = store.search("idx", &[1.0, 0.1], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "east");
        assert_eq!(results[1].content, "northeast");
    }

    #[tokio::test]
    async fn test_memory_store_upsert_overwrites_same_id() {
        let store = MemoryStore::new();
        store.create("idx", 2).await.unwrap();
        store
            .upsert("idx", vec![item("a", vec![1.0, 0.0], "v1")])
            .await
            .unwrap();
        store
            .upsert("idx", vec![item("a", vec![1.0, 0.0], "v2")])
            .await
            .unwrap();
        assert_eq!(store.vector_count("idx"), 1);
    }

    #[tokio::test]
    async fn test_memory_store_rejects_dimension_mismatch() {
        let store = MemoryStore::new();
        store.create("idx", 3).await.unwrap();
        let err = store
            .upsert("idx", vec![item("a", vec![1.0, 0.0], "bad")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[test]
    fn test_create_index_request_shape() {
        let request = CreateIndexRequest {
            name: "askdoc-attention-is-all-you-need",
            dimension: 1024,
            metric: "cosine",
            spec: IndexSpec {
                serverless: ServerlessSpec {
                    cloud: "aws",
                    region: "us-east-1",
                },
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["metric"], "cosine");
        assert_eq!(json["spec"]["serverless"]["cloud"], "aws");
    }

    #[test]
    fn test_query_request_uses_camel_case() {
        let request = QueryRequest {
            vector: &[0.1, 0.2],
            top_k: 5,
            include_metadata: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("topK").is_some());
        assert!(json.get("includeMetadata").is_some());
    }
}
