//! askdoc core library
//!
//! Answers a natural-language question against a single PDF document:
//! - Token-aware chunking and idempotent vector-index provisioning
//! - Step-back query reformulation via few-shot prompting
//! - Fused retrieval under the original and reformulated questions
//! - Answer synthesis conditioned on both context blocks
//!
//! Collaborators (embedding service, vector store, chat model, document
//! loader, token counter) sit behind trait seams with production HTTP
//! clients and in-process mocks.

pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod index;
pub mod llm;
pub mod pdf;
pub mod pipeline;
pub mod retrieval;
pub mod stepback;
pub mod store;
pub mod synthesis;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{PipelineError, Result};
pub use index::derive_index_id;
pub use pipeline::{Pipeline, PipelineAnswer};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
