//! Fused retrieval under the original and step-back questions
//!
//! Two independent top-k searches run against the same index, one per
//! question. Each result list deduplicates on a canonical (content,
//! metadata) key, and the two context blocks stay separate so the
//! synthesis prompt can present direct and generalized evidence
//! distinctly.

use crate::embeddings::Embedder;
use crate::errors::{PipelineError, ProviderError, Result};
use crate::store::{RetrievedDocument, VectorStore};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Reference to a populated vector index. Cheap to clone; never mutated
/// after provisioning.
#[derive(Clone)]
pub struct RetrievalHandle {
    index_id: String,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl RetrievalHandle {
    pub fn new(index_id: &str, store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index_id: index_id.to_string(),
            store,
            embedder,
        }
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    /// Embed the query text and run a top-k similarity search.
    pub async fn top_k(
        &self,
        query: &str,
        k: usize,
    ) -> std::result::Result<Vec<RetrievedDocument>, ProviderError> {
        let vector = self.embedder.embed(query).await?;
        self.store.search(&self.index_id, &vector, k).await
    }
}

/// Deduplicated passage texts for one query. Order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextBlock {
    passages: Vec<String>,
}

impl ContextBlock {
    pub fn passages(&self) -> &[String] {
        &self.passages
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

/// Collapse exact duplicates, keyed on content plus metadata. Metadata
/// lives in a BTreeMap, so serializing it yields a canonical key
/// without any round-trip through a full document serialization.
pub(crate) fn dedup(documents: Vec<RetrievedDocument>) -> ContextBlock {
    let mut seen = HashSet::new();
    let mut passages = Vec::new();

    for doc in documents {
        let key = serde_json::to_string(&(&doc.content, &doc.metadata))
            .unwrap_or_else(|_| doc.content.clone());
        if seen.insert(key) {
            passages.push(doc.content);
        }
    }

    ContextBlock { passages }
}

/// Runs the two-question retrieval and fuses each result list into a
/// context block.
pub struct FusionRetriever {
    handle: RetrievalHandle,
    k: usize,
}

impl FusionRetriever {
    pub fn new(handle: RetrievalHandle, k: usize) -> Self {
        Self { handle, k }
    }

    /// Retrieve under both questions. The searches are independent and
    /// run concurrently; both must succeed. Empty result sets are valid
    /// and yield empty blocks.
    pub async fn retrieve(
        &self,
        question: &str,
        stepback_question: &str,
    ) -> Result<(ContextBlock, ContextBlock)> {
        let (direct, generalized) = futures::try_join!(
            self.handle.top_k(question, self.k),
            self.handle.top_k(stepback_question, self.k),
        )
        .map_err(|source| PipelineError::Retrieval { source })?;

        let direct = dedup(direct);
        let generalized = dedup(generalized);
        debug!(
            direct_passages = direct.len(),
            generalized_passages = generalized.len(),
            "retrieval complete"
        );

        Ok((direct, generalized))
    }
}
