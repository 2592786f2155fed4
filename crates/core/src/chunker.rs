//! Token-aware document chunking
//!
//! Splits extracted text into overlapping chunks bounded by a token
//! budget. Splitting recurses over semantic boundaries (paragraph,
//! sentence, word, character) via text-splitter; chunk sizes are
//! measured by an injected [`TokenCounter`] so the tokenizer stays
//! swappable. Trimming is disabled so the chunk spans cover the source
//! text with no gaps.

use crate::config::ChunkingConfig;
use crate::errors::{PipelineError, Result};
use text_splitter::{ChunkConfig, ChunkSizer, TextSplitter};
use tracing::debug;

/// Maps a string to its token count. Injected into [`split`] so
/// chunking logic is independent of the tokenizer.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// cl100k_base BPE counter, the encoding the retrieval stack was tuned
/// against.
pub struct TiktokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TiktokenCounter {
    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| {
            PipelineError::configuration(format!("failed to load cl100k_base encoding: {e}"))
        })?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Whitespace-word counter. Cheap stand-in where BPE precision is not
/// needed.
#[derive(Debug, Default)]
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// A bounded contiguous span of the source document.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// The chunk content
    pub text: String,
    /// Measured token count, never above the configured chunk size
    pub token_count: usize,
    /// Byte offset of the span in the source text
    pub source_offset: usize,
}

struct CounterSizer<'a>(&'a dyn TokenCounter);

impl ChunkSizer for CounterSizer<'_> {
    fn size(&self, chunk: &str) -> usize {
        self.0.count(chunk)
    }
}

/// Split `text` into overlapping token-bounded chunks.
///
/// A document shorter than `chunk_size` yields exactly one chunk. An
/// overlap that is not smaller than the chunk size cannot make forward
/// progress and is rejected up front.
pub fn split(
    text: &str,
    config: &ChunkingConfig,
    counter: &dyn TokenCounter,
) -> Result<Vec<Chunk>> {
    if config.chunk_overlap >= config.chunk_size {
        return Err(PipelineError::configuration(format!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            config.chunk_overlap, config.chunk_size
        )));
    }

    let chunk_config = ChunkConfig::new(config.chunk_size)
        .with_sizer(CounterSizer(counter))
        .with_overlap(config.chunk_overlap)
        .map_err(|e| {
            PipelineError::configuration(format!("invalid chunking configuration: {e}"))
        })?
        .with_trim(false);

    let splitter = TextSplitter::new(chunk_config);
    let chunks: Vec<Chunk> = splitter
        .chunk_indices(text)
        .map(|(offset, piece)| Chunk {
            text: piece.to_string(),
            token_count: counter.count(piece),
            source_offset: offset,
        })
        .collect();

    debug!(
        input_len = text.len(),
        chunk_count = chunks.len(),
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        "document chunked"
    );

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, chunk_overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Every byte of the source must fall inside at least one chunk span.
    fn assert_full_coverage(text: &str, chunks: &[Chunk]) {
        assert!(!chunks.is_empty());
        let mut covered_to = 0;
        for chunk in chunks {
            assert!(
                chunk.source_offset <= covered_to,
                "gap before offset {}",
                chunk.source_offset
            );
            covered_to = covered_to.max(chunk.source_offset + chunk.text.len());
        }
        assert_eq!(covered_to, text.len(), "tail of source not covered");
    }

    #[test]
    fn test_short_document_is_single_chunk() {
        let text = "A single short paragraph.";
        let chunks = split(text, &config(512, 128), &WordCounter).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].source_offset, 0);
    }

    #[test]
    fn test_no_chunk_exceeds_token_budget() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(40);
        let chunks = split(&text, &config(16, 4), &WordCounter).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 16, "chunk of {} tokens", chunk.token_count);
            assert_eq!(chunk.token_count, WordCounter.count(&chunk.text));
        }
        assert_full_coverage(&text, &chunks);
    }

    #[test]
    fn test_sky_and_grass_scenario() {
        let text = "The sky is blue. Grass is green.";
        let chunks = split(text, &config(4, 1), &WordCounter).unwrap();
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.token_count <= 4);
        }
        // consecutive spans step back into each other, so nothing is lost
        for pair in chunks.windows(2) {
            assert!(pair[1].source_offset < pair[0].source_offset + pair[0].text.len());
        }
        assert_full_coverage(text, &chunks);
    }

    #[test]
    fn test_overlap_not_smaller_than_size_fails_fast() {
        let err = split("some text", &config(4, 4), &WordCounter).unwrap_err();
        assert_eq!(err.stage(), "configuration");

        let err = split("some text", &config(4, 9), &WordCounter).unwrap_err();
        assert_eq!(err.stage(), "configuration");
    }

    #[test]
    fn test_offsets_are_byte_positions() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = split(text, &config(3, 1), &WordCounter).unwrap();
        for chunk in &chunks {
            assert_eq!(
                &text[chunk.source_offset..chunk.source_offset + chunk.text.len()],
                chunk.text
            );
        }
    }
}
