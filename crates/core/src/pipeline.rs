//! End-to-end question-answering pipeline
//!
//! Explicit sequential wiring of the stages: load document → chunk →
//! provision index → reformulate question → fused retrieval →
//! synthesize answer. Stateless across invocations; the vector index is
//! the only persisted resource. Each stage either completes or aborts
//! the run with a stage-tagged error — there is no partial answer.

use crate::chunker::{self, TokenCounter};
use crate::config::AppConfig;
use crate::embeddings::Embedder;
use crate::errors::Result;
use crate::index::{derive_index_id, IndexProvisioner};
use crate::llm::ChatModel;
use crate::pdf::DocumentLoader;
use crate::retrieval::FusionRetriever;
use crate::stepback::{load_exemplars, QueryReformulator};
use crate::store::VectorStore;
use crate::synthesis::AnswerSynthesizer;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

/// The pipeline's structured result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineAnswer {
    pub question: String,
    pub answer: String,
}

/// One-document question-answering pipeline with injected
/// collaborators.
pub struct Pipeline {
    config: AppConfig,
    loader: Arc<dyn DocumentLoader>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn ChatModel>,
    token_counter: Arc<dyn TokenCounter>,
}

impl Pipeline {
    /// Build with production collaborators resolved from config.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let loader = Arc::new(crate::pdf::PdfLoader::new());
        let embedder = Arc::new(crate::embeddings::OllamaEmbedder::new(&config.embedding)?);
        let store = Arc::new(crate::store::PineconeStore::new(&config.store)?);
        let llm = Arc::new(crate::llm::GroqChat::new(&config.llm)?);
        let token_counter = Arc::new(crate::chunker::TiktokenCounter::cl100k()?);
        Ok(Self::new(config, loader, store, embedder, llm, token_counter))
    }

    /// Build with explicit collaborators.
    pub fn new(
        config: AppConfig,
        loader: Arc<dyn DocumentLoader>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
        token_counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            config,
            loader,
            store,
            embedder,
            llm,
            token_counter,
        }
    }

    /// Answer `question` against the document at `document_path`.
    #[instrument(skip(self), fields(document = %document_path.display()))]
    pub async fn run(&self, document_path: &Path, question: &str) -> Result<PipelineAnswer> {
        let text = self.loader.load(document_path)?;
        info!(text_len = text.len(), "document loaded");

        let chunks = chunker::split(&text, &self.config.chunking, self.token_counter.as_ref())?;
        info!(chunk_count = chunks.len(), "document chunked");

        let index_id = derive_index_id(&self.config.index.prefix, document_path);
        let provisioner = IndexProvisioner::new(
            self.store.clone(),
            self.embedder.clone(),
            self.config.embedding.batch_size,
        );
        let handle = provisioner.provision(&index_id, &chunks).await?;

        let exemplars = load_exemplars(self.config.index.examples_path.as_deref())?;
        let reformulator = QueryReformulator::new(
            self.llm.clone(),
            exemplars,
            self.config.llm.temperature,
        );
        let stepback_question = reformulator.reformulate(question).await?;
        info!(stepback = %stepback_question, "question reformulated");

        let retriever = FusionRetriever::new(handle, self.config.retrieval.k);
        let (direct, generalized) = retriever.retrieve(question, &stepback_question).await?;

        let synthesizer = AnswerSynthesizer::new(self.llm.clone(), self.config.llm.temperature);
        let answer = synthesizer.synthesize(question, &direct, &generalized).await?;

        Ok(PipelineAnswer {
            question: question.to_string(),
            answer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbedder;
    use crate::errors::PipelineError;
    use crate::llm::MockChat;
    use crate::store::MemoryStore;

    struct StaticLoader(String);

    impl DocumentLoader for StaticLoader {
        fn load(&self, _path: &Path) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingLoader;

    impl DocumentLoader for FailingLoader {
        fn load(&self, path: &Path) -> Result<String> {
            Err(PipelineError::DocumentLoad {
                path: path.display().to_string(),
                message: "no text content extracted".to_string(),
            })
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.chunking.chunk_size = 16;
        config.chunking.chunk_overlap = 4;
        config.retrieval.k = 3;
        config
    }

    fn pipeline_over(
        loader: Arc<dyn DocumentLoader>,
        store: Arc<MemoryStore>,
        llm: Arc<MockChat>,
    ) -> Pipeline {
        Pipeline::new(
            test_config(),
            loader,
            store,
            Arc::new(MockEmbedder::new(32)),
            llm,
            Arc::new(crate::chunker::WordCounter),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_answer() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(MockChat::scripted([
            "What determines the color of the sky?",
            "The sky is blue because shorter wavelengths scatter more.",
        ]));
        let loader = Arc::new(StaticLoader(
            "The sky is blue. Grass is green. Light scatters in the atmosphere. \
             Rayleigh scattering favors short wavelengths. The sun emits white light."
                .to_string(),
        ));
        let pipeline = pipeline_over(loader, store.clone(), llm.clone());

        let result = pipeline
            .run(Path::new("atmosphere notes.pdf"), "Why is the sky blue?")
            .await
            .unwrap();

        assert_eq!(result.question, "Why is the sky blue?");
        assert_eq!(
            result.answer,
            "The sky is blue because shorter wavelengths scatter more."
        );
        // reformulation plus final synthesis
        assert_eq!(llm.calls().len(), 2);
        // the index was created and populated under the derived id
        assert!(store.vector_count("askdoc-atmosphere-notes") > 0);
    }

    #[tokio::test]
    async fn test_second_run_reuses_index() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(MockChat::scripted([
            "generic one",
            "answer one",
            "generic two",
            "answer two",
        ]));
        let loader = Arc::new(StaticLoader("The sky is blue. Grass is green.".to_string()));
        let pipeline = pipeline_over(loader, store.clone(), llm);

        pipeline
            .run(Path::new("doc.pdf"), "first question")
            .await
            .unwrap();
        let count = store.vector_count("askdoc-doc");
        let upserts = store.upsert_calls();

        pipeline
            .run(Path::new("doc.pdf"), "second question")
            .await
            .unwrap();
        assert_eq!(store.vector_count("askdoc-doc"), count);
        assert_eq!(store.upsert_calls(), upserts);
    }

    #[tokio::test]
    async fn test_loader_failure_aborts_with_stage() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(MockChat::scripted(["unused"]));
        let pipeline = pipeline_over(Arc::new(FailingLoader), store, llm.clone());

        let err = pipeline
            .run(Path::new("broken.pdf"), "Why?")
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "document-load");
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_result_serializes_as_question_answer() {
        let result = PipelineAnswer {
            question: "Why?".to_string(),
            answer: "Because.".to_string(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["question"], "Why?");
        assert_eq!(json["answer"], "Because.");
    }
}
