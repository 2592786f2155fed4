//! Final answer synthesis
//!
//! Composes one prompt from both context blocks and the original
//! question, then runs a single completion. The model is told to prefer
//! consistency with relevant context and to ignore irrelevant context
//! rather than force-fitting an answer. Empty context blocks are valid
//! input.

use crate::errors::{PipelineError, Result, SynthesisStep};
use crate::llm::{ChatMessage, ChatModel};
use crate::retrieval::ContextBlock;
use std::sync::Arc;
use tracing::debug;

const PASSAGE_DELIMITER: &str = "\n\n";

/// Generates the final answer from the fused contexts.
pub struct AnswerSynthesizer {
    llm: Arc<dyn ChatModel>,
    temperature: f32,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn ChatModel>, temperature: f32) -> Self {
        Self { llm, temperature }
    }

    /// Answer `question` conditioned on the direct and generalized
    /// context blocks.
    pub async fn synthesize(
        &self,
        question: &str,
        direct: &ContextBlock,
        generalized: &ContextBlock,
    ) -> Result<String> {
        let prompt = render_prompt(question, direct, generalized);
        debug!(
            prompt_len = prompt.len(),
            direct_passages = direct.len(),
            generalized_passages = generalized.len(),
            "synthesizing answer"
        );

        self.llm
            .complete(&[ChatMessage::user(prompt)], self.temperature)
            .await
            .map_err(|source| PipelineError::Synthesis {
                step: SynthesisStep::Answer,
                source,
            })
    }
}

fn render_prompt(question: &str, direct: &ContextBlock, generalized: &ContextBlock) -> String {
    format!(
        "You are an expert of world knowledge. I am going to ask you a question. \
Your response should be comprehensive and not contradicted with the following context \
if they are relevant. Otherwise, ignore them if they are not relevant.\n\n\
# Direct context:\n```\n{}\n```\n\n\
# More abstract context:\n```\n{}\n```\n\n\
# Original Question: {}\n# Answer:",
        direct.passages().join(PASSAGE_DELIMITER),
        generalized.passages().join(PASSAGE_DELIMITER),
        question
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockChat;
    use crate::store::RetrievedDocument;

    fn block(passages: &[&str]) -> ContextBlock {
        crate::retrieval::dedup(
            passages
                .iter()
                .map(|p| RetrievedDocument {
                    content: p.to_string(),
                    metadata: Default::default(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_prompt_contains_contexts_verbatim_and_question() {
        let direct = block(&["The sky is blue.", "Grass is green."]);
        let generalized = block(&["Rayleigh scattering favors short wavelengths."]);

        let prompt = render_prompt("Why is the sky blue?", &direct, &generalized);
        assert!(prompt.contains("The sky is blue."));
        assert!(prompt.contains("Grass is green."));
        assert!(prompt.contains("Rayleigh scattering favors short wavelengths."));
        assert!(prompt.contains("# Original Question: Why is the sky blue?"));
        // direct context comes before the abstract context
        let direct_at = prompt.find("# Direct context").unwrap();
        let abstract_at = prompt.find("# More abstract context").unwrap();
        assert!(direct_at < abstract_at);
    }

    #[tokio::test]
    async fn test_synthesis_with_empty_contexts_still_runs() {
        let llm = Arc::new(MockChat::scripted(["I cannot find that in the document."]));
        let synthesizer = AnswerSynthesizer::new(llm.clone(), 0.7);

        let answer = synthesizer
            .synthesize("Why?", &ContextBlock::default(), &ContextBlock::default())
            .await
            .unwrap();
        assert_eq!(answer, "I cannot find that in the document.");
        assert_eq!(llm.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_maps_to_synthesis_stage() {
        let llm = Arc::new(MockChat::scripted(Vec::<String>::new()));
        let synthesizer = AnswerSynthesizer::new(llm, 0.7);
        let err = synthesizer
            .synthesize("Why?", &ContextBlock::default(), &ContextBlock::default())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "synthesis");
        assert!(err.to_string().contains("answer synthesis"));
    }
}
