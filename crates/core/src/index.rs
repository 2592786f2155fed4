//! Index identity and provisioning
//!
//! The index identifier is derived deterministically from a name prefix
//! and the document's filename, so repeated runs against the same
//! document reuse the index instead of re-embedding it.

use crate::chunker::Chunk;
use crate::embeddings::Embedder;
use crate::errors::{PipelineError, ProviderError, ProvisioningStage, Result};
use crate::retrieval::RetrievalHandle;
use crate::store::{CreateOutcome, UpsertItem, VectorStore};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Maximum identifier length the backing store accepts.
const MAX_INDEX_ID_LEN: usize = 45;

/// Derive a normalized index identifier from a prefix and a document
/// path. Pure and deterministic: the same (prefix, filename) pair
/// always yields the same identifier.
///
/// The last five whitespace-separated words of the file stem are kept,
/// lowercased, joined to the prefix, and every run of characters
/// outside `[a-z0-9]` collapses to a single hyphen. The result never
/// starts or ends with a hyphen and never exceeds 45 characters.
pub fn derive_index_id(prefix: &str, document_path: &Path) -> String {
    let stem = document_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let words: Vec<&str> = stem.split_whitespace().collect();
    let tail = words[words.len().saturating_sub(5)..].join(" ");

    let raw = format!("{prefix} {tail}").to_lowercase();
    let separators = regex_lite::Regex::new(r"[^a-z0-9]+").unwrap();
    let dashed = separators.replace_all(&raw, "-");

    let mut id: String = dashed
        .trim_matches('-')
        .chars()
        .take(MAX_INDEX_ID_LEN)
        .collect();
    // truncation may have landed on a separator
    while id.ends_with('-') {
        id.pop();
    }

    if id.is_empty() {
        "doc".to_string()
    } else {
        id
    }
}

/// Ensures a vector index exists and is populated exactly once, then
/// hands back a retrieval handle over it.
pub struct IndexProvisioner {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl IndexProvisioner {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    /// Provision the index: reuse it when present, otherwise create it
    /// and upload every chunk. Idempotent — a second call with the same
    /// identifier uploads nothing, and vector ids are derived from
    /// chunk offsets so even a racing double-create converges on one
    /// copy of each vector.
    #[instrument(skip(self, chunks), fields(chunk_count = chunks.len()))]
    pub async fn provision(&self, index_id: &str, chunks: &[Chunk]) -> Result<RetrievalHandle> {
        let exists = self
            .store
            .exists(index_id)
            .await
            .map_err(store_failure)?;

        if exists {
            info!(index_id, "index already populated, reusing");
            return Ok(self.handle(index_id));
        }

        let dimension = self.embedder.dimension();
        match self
            .store
            .create(index_id, dimension)
            .await
            .map_err(store_failure)?
        {
            CreateOutcome::AlreadyExists => {
                // lost a creation race; the winner owns population
                info!(index_id, "index created concurrently, reusing");
                return Ok(self.handle(index_id));
            }
            CreateOutcome::Created => {}
        }

        let mut uploaded = 0;
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = self
                .embedder
                .embed_batch(&texts)
                .await
                .map_err(embedding_failure)?;

            let items: Vec<UpsertItem> = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| UpsertItem {
                    id: format!("{index_id}-{}", chunk.source_offset),
                    embedding,
                    content: chunk.text.clone(),
                    metadata: BTreeMap::from([
                        ("source_offset".to_string(), json!(chunk.source_offset)),
                        ("token_count".to_string(), json!(chunk.token_count)),
                    ]),
                })
                .collect();

            self.store
                .upsert(index_id, items)
                .await
                .map_err(store_failure)?;

            uploaded += batch.len();
            debug!(uploaded, total = chunks.len(), "chunk batch uploaded");
        }

        info!(index_id, uploaded, "index populated");
        Ok(self.handle(index_id))
    }

    fn handle(&self, index_id: &str) -> RetrievalHandle {
        RetrievalHandle::new(index_id, self.store.clone(), self.embedder.clone())
    }
}

fn store_failure(source: ProviderError) -> PipelineError {
    PipelineError::IndexProvisioning {
        stage: ProvisioningStage::Store,
        source,
    }
}

fn embedding_failure(source: ProviderError) -> PipelineError {
    PipelineError::IndexProvisioning {
        stage: ProvisioningStage::Embedding,
        source,
    }
}
