//! Step-back query reformulation
//!
//! Rewrites a specific question into a more generic one via a few-shot
//! chat prompt. The exemplars ship with the crate and can be overridden
//! from a file; the model's raw completion is the reformulated question
//! — any string is a valid question, so there is no output validation
//! and no retry. Callers must not assume the rewrite is deterministic.

use crate::errors::{PipelineError, Result, SynthesisStep};
use crate::llm::{ChatMessage, ChatModel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Bundled step-back exemplars.
const DEFAULT_EXAMPLES: &str = include_str!("../data/stepback_examples.json");

const SYSTEM_PROMPT: &str = "You are an expert at world knowledge. Your task is to step back \
and paraphrase a question to a more generic step-back question, which is easier to answer. \
Here are a few examples:";

/// One (specific question, generic question) demonstration pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exemplar {
    pub input: String,
    pub output: String,
}

/// Load exemplars from `path`, or the bundled set when `path` is None.
pub fn load_exemplars(path: Option<&str>) -> Result<Vec<Exemplar>> {
    let raw = match path {
        Some(p) => std::fs::read_to_string(p).map_err(|e| {
            PipelineError::configuration(format!("failed to read step-back examples from {p}: {e}"))
        })?,
        None => DEFAULT_EXAMPLES.to_string(),
    };

    let exemplars: Vec<Exemplar> = serde_json::from_str(&raw).map_err(|e| {
        PipelineError::configuration(format!("invalid step-back examples file: {e}"))
    })?;

    if exemplars.is_empty() {
        return Err(PipelineError::configuration(
            "step-back examples file contains no exemplars",
        ));
    }
    Ok(exemplars)
}

/// Prompt-driven question reformulator.
pub struct QueryReformulator {
    llm: Arc<dyn ChatModel>,
    exemplars: Vec<Exemplar>,
    temperature: f32,
}

impl QueryReformulator {
    pub fn new(llm: Arc<dyn ChatModel>, exemplars: Vec<Exemplar>, temperature: f32) -> Self {
        Self {
            llm,
            exemplars,
            temperature,
        }
    }

    /// Rewrite `question` into its step-back form.
    pub async fn reformulate(&self, question: &str) -> Result<String> {
        let messages = self.build_messages(question);
        let rewritten = self
            .llm
            .complete(&messages, self.temperature)
            .await
            .map_err(|source| PipelineError::Synthesis {
                step: SynthesisStep::Reformulation,
                source,
            })?;

        debug!(question, stepback = %rewritten, "question reformulated");
        Ok(rewritten)
    }

    /// System instruction, then exemplar pairs in order, then the live
    /// question.
    fn build_messages(&self, question: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2 + self.exemplars.len() * 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        for exemplar in &self.exemplars {
            messages.push(ChatMessage::user(exemplar.input.clone()));
            messages.push(ChatMessage::assistant(exemplar.output.clone()));
        }
        messages.push(ChatMessage::user(question));
        messages
    }
}
