//! Citation-numbered context assembly.
//!
//! Hits are deduplicated by `(document_id, chunk_index)`, keeping the first
//! (best-ranked) occurrence, then numbered `1..=N`. The same number labels
//! the prompt block and the [`Reference`], so a `[n]` marker in the model's
//! answer always names an entry of the reference list.

use std::collections::HashSet;
use tracing::warn;

use crate::links::{basename, LinkResolver};
use crate::models::{Reference, RetrievalHit};

const BLOCK_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    /// Prompt-ready text: numbered blocks joined by `---` lines.
    pub text: String,
    pub references: Vec<Reference>,
    /// Deduplicated hits, in citation order.
    pub hits: Vec<RetrievalHit>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Build the context block and the matching reference list.
pub fn assemble(hits: &[RetrievalHit], resolver: &LinkResolver) -> AssembledContext {
    let mut seen: HashSet<(&str, i64)> = HashSet::new();
    let mut blocks = Vec::new();
    let mut references = Vec::new();
    let mut kept = Vec::new();

    for hit in hits {
        if !seen.insert((hit.document_id.as_str(), hit.chunk_index)) {
            continue;
        }
        let index = kept.len() + 1;

        blocks.push(format_block(index, hit));
        references.push(Reference {
            index,
            id: hit.composite_id(),
            source: format!("{}#{}", link_for(hit, resolver), hit.chunk_index),
            snippet: hit.cur_text.clone(),
        });
        kept.push(hit.clone());
    }

    AssembledContext {
        text: blocks.join(BLOCK_SEPARATOR),
        references,
        hits: kept,
    }
}

/// `[n] (basename)\n{prev} {cur} {next}`, body trimmed. An absent neighbor
/// contributes an empty string, so inner spacing is kept as-is.
fn format_block(index: usize, hit: &RetrievalHit) -> String {
    let body = format!("{} {} {}", hit.prev_text, hit.cur_text, hit.next_text);
    format!("[{}] ({})\n{}", index, basename(&hit.filename), body.trim())
}

fn link_for(hit: &RetrievalHit, resolver: &LinkResolver) -> String {
    if let Some(url) = resolver.resolve(&hit.bucket, &hit.object_path) {
        return url;
    }
    if !hit.bucket.is_empty() && !hit.object_path.is_empty() {
        warn!(
            bucket = %hit.bucket,
            object_path = %hit.object_path,
            "object storage unavailable, using local link"
        );
    }
    resolver.local_link(&hit.filename)
}
