//! Token-bounded chunking of structured documents.
//!
//! The splitter itself is external (`semchunk-rs` with `tiktoken-rs` token
//! counting); this module decides how document sections map onto chunk
//! drafts. Adjacent small sections merge up to the token budget and pool
//! their page provenance, so a draft can legitimately span pages (`[1,2]`).
//! A section that alone exceeds the budget is split, and every split piece
//! inherits the section's provenance.

use std::collections::BTreeSet;
use std::sync::Arc;

use semchunk_rs::Chunker;
use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model};

use crate::extract::{DocumentSection, StructuredDocument};
use crate::processing::types::{ChunkDraft, ChunkingError};

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Split a structured document into ordered, token-bounded chunk drafts.
///
/// A structurally empty document (no sections) is a validation failure;
/// sections that hold only whitespace are skipped, so zero drafts is a legal
/// outcome that callers must propagate faithfully.
pub fn chunk_document(
    document: &StructuredDocument,
    max_tokens: usize,
    model: &str,
) -> Result<Vec<ChunkDraft>, ChunkingError> {
    if max_tokens == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if document.sections.is_empty() {
        return Err(ChunkingError::EmptyDocument);
    }

    let counter = build_token_counter(model)?;
    Ok(chunk_sections_with_counter(
        &document.sections,
        max_tokens,
        &counter,
    ))
}

/// Build a token counter for the configured embedding model.
///
/// Falls back to the `cl100k_base` encoding when the model is unknown to the
/// tokenizer library, logging the substitution.
fn build_token_counter(model: &str) -> Result<TokenCounter, ChunkingError> {
    let encoding = resolve_encoding(model).map_err(|source| ChunkingError::Tokenizer {
        model: model.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);
    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, anyhow::Error> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(err) => {
            tracing::debug!(model, error = %err, "Tokenizer model lookup failed; using cl100k_base");
            cl100k_base()
        }
    }
}

/// Lower-level chunker that accepts an explicit token counter.
///
/// You likely want [`chunk_document`]; this helper exists for tests and for
/// callers that need to plug in a custom counter.
fn chunk_sections_with_counter(
    sections: &[DocumentSection],
    max_tokens: usize,
    counter: &TokenCounter,
) -> Vec<ChunkDraft> {
    let mut drafts = Vec::new();
    let mut group = SectionGroup::default();

    for section in sections {
        let text = section.text.trim();
        if text.is_empty() {
            continue;
        }

        let tokens = counter(text);
        if !group.is_empty() && group.tokens + tokens > max_tokens {
            group.flush(&mut drafts, max_tokens, counter);
        }
        group.push(section, text, tokens);
    }
    group.flush(&mut drafts, max_tokens, counter);

    drafts
}

/// Adjacent sections merged under one token budget.
#[derive(Default)]
struct SectionGroup {
    texts: Vec<String>,
    pages: BTreeSet<u32>,
    heading: Option<String>,
    tokens: usize,
}

impl SectionGroup {
    fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    fn push(&mut self, section: &DocumentSection, text: &str, tokens: usize) {
        self.texts.push(text.to_string());
        if let Some(page) = section.page {
            self.pages.insert(page);
        }
        if self.heading.is_none() {
            self.heading = section.heading.clone();
        }
        self.tokens += tokens;
    }

    fn flush(&mut self, drafts: &mut Vec<ChunkDraft>, max_tokens: usize, counter: &TokenCounter) {
        if self.is_empty() {
            return;
        }

        let group = std::mem::take(self);
        let text = group.texts.join("\n\n");
        let page_numbers = if group.pages.is_empty() {
            None
        } else {
            Some(group.pages.into_iter().collect::<Vec<u32>>())
        };

        if group.tokens <= max_tokens {
            drafts.push(ChunkDraft {
                text,
                page_numbers,
                heading: group.heading,
            });
            return;
        }

        // Single oversized span: hand it to the semantic splitter. Every
        // piece keeps the span's provenance.
        let counter_for_chunker = counter.clone();
        let chunker = Chunker::new(
            max_tokens,
            Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
        );
        for piece in chunker.chunk(&text) {
            if piece.trim().is_empty() {
                continue;
            }
            drafts.push(ChunkDraft {
                text: piece,
                page_numbers: page_numbers.clone(),
                heading: group.heading.clone(),
            });
        }
    }
}
