//! Error types for the askdoc pipeline
//!
//! Every failure aborts the pipeline and surfaces the originating stage
//! and underlying cause to the caller. No stage recovers locally and no
//! retries happen at this layer; a collaborator client may retry
//! internally before reporting a `ProviderError`.

use std::fmt;
use thiserror::Error;

/// Result type alias using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure of an external collaborator call (embedding service, vector
/// store, or chat model).
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

/// Which provisioning step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStage {
    /// Chunk embedding via the embedding service
    Embedding,
    /// Index existence check, creation, or vector upload
    Store,
}

impl fmt::Display for ProvisioningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningStage::Embedding => write!(f, "embedding"),
            ProvisioningStage::Store => write!(f, "store"),
        }
    }
}

/// Which LLM completion step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisStep {
    /// Step-back reformulation of the question
    Reformulation,
    /// Final answer generation
    Answer,
}

impl fmt::Display for SynthesisStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthesisStep::Reformulation => write!(f, "query reformulation"),
            SynthesisStep::Answer => write!(f, "answer synthesis"),
        }
    }
}

/// Pipeline error taxonomy
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("document load failed for {path}: {message}")]
    DocumentLoad { path: String, message: String },

    #[error("index provisioning failed during {stage}: {source}")]
    IndexProvisioning {
        stage: ProvisioningStage,
        source: ProviderError,
    },

    #[error("retrieval failed: {source}")]
    Retrieval {
        #[source]
        source: ProviderError,
    },

    #[error("{step} failed: {source}")]
    Synthesis {
        step: SynthesisStep,
        source: ProviderError,
    },
}

impl PipelineError {
    /// Short stage tag for logs and exit messages.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Configuration { .. } => "configuration",
            PipelineError::DocumentLoad { .. } => "document-load",
            PipelineError::IndexProvisioning { .. } => "index-provisioning",
            PipelineError::Retrieval { .. } => "retrieval",
            PipelineError::Synthesis { .. } => "synthesis",
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        PipelineError::Configuration {
            message: message.into(),
        }
    }
}
