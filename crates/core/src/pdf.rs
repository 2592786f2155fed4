//! PDF text extraction
//!
//! Pulls plain text out of a PDF by walking each page's content stream
//! and collecting the text-showing operators. Good enough for the
//! digitally-born documents this pipeline targets; scanned documents
//! need OCR upstream.

use crate::errors::{PipelineError, Result};
use std::path::Path;
use tracing::{debug, warn};

/// Source-document loader seam. The pipeline only needs plain extracted
/// text; where that text comes from is swappable.
pub trait DocumentLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<String>;
}

/// lopdf-backed PDF loader
#[derive(Debug, Default)]
pub struct PdfLoader;

impl PdfLoader {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentLoader for PdfLoader {
    fn load(&self, path: &Path) -> Result<String> {
        extract_text(path)
    }
}

/// Extract and normalize the text content of a PDF file.
pub fn extract_text(path: &Path) -> Result<String> {
    let doc = lopdf::Document::load(path).map_err(|e| PipelineError::DocumentLoad {
        path: path.display().to_string(),
        message: format!("failed to open PDF: {e}"),
    })?;

    let mut text = String::new();
    let page_count = doc.get_pages().len();
    debug!(page_count, "extracting text from PDF");

    for (index, page_id) in doc.page_iter().enumerate() {
        match doc.get_page_content(page_id) {
            Ok(content) => {
                text.push_str(&collect_text_operators(&content));
                text.push('\n');
            }
            Err(e) => {
                warn!(page = index + 1, error = %e, "skipping unreadable page");
            }
        }
    }

    if text.trim().is_empty() {
        return Err(PipelineError::DocumentLoad {
            path: path.display().to_string(),
            message: "no text content extracted".to_string(),
        });
    }

    let normalized = normalize_whitespace(&text);
    debug!(
        raw_len = text.len(),
        normalized_len = normalized.len(),
        "text extraction complete"
    );

    Ok(normalized)
}

/// Scan a content stream for Tj / TJ / ' / " text-showing operators
/// between BT and ET markers and concatenate their string operands.
fn collect_text_operators(content: &[u8]) -> String {
    let stream = String::from_utf8_lossy(content);
    let mut out = String::new();
    let mut in_text_object = false;

    for line in stream.lines() {
        let line = line.trim();
        match line {
            "BT" => in_text_object = true,
            "ET" => {
                in_text_object = false;
                if !out.ends_with(' ') && !out.is_empty() {
                    out.push(' ');
                }
            }
            _ if in_text_object && is_text_showing(line) => {
                push_string_operands(line, &mut out);
            }
            _ => {}
        }
    }

    out
}

fn is_text_showing(line: &str) -> bool {
    line.ends_with("Tj") || line.ends_with("TJ") || line.ends_with('\'') || line.ends_with('"')
}

/// Append every parenthesized string operand on the line, decoded.
fn push_string_operands(line: &str, out: &mut String) {
    let mut depth = 0usize;
    let mut literal = String::new();
    let mut escaped = false;

    for ch in line.chars() {
        if depth > 0 {
            if escaped {
                literal.push(unescape(ch));
                escaped = false;
                continue;
            }
            match ch {
                '\\' => escaped = true,
                '(' => {
                    depth += 1;
                    literal.push(ch);
                }
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        out.push_str(&literal);
                        literal.clear();
                    } else {
                        literal.push(ch);
                    }
                }
                _ => literal.push(ch),
            }
        } else if ch == '(' {
            depth = 1;
        }
    }
}

fn unescape(ch: char) -> char {
    match ch {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        other => other,
    }
}

/// Collapse runs of whitespace and strip BOM artifacts.
fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{FEFF}', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
