//! Core data models.
//!
//! Documents and chunks are written by the ingestion pipeline; this crate
//! only reads them (and fills in chunk embeddings). Hits, references and
//! answers exist for the lifetime of one question.

use serde::Serialize;

/// A stored source document.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub bucket: String,
    pub object_path: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    /// Unix seconds.
    pub created_at: i64,
}

/// A bounded span of a document's text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    /// Character offsets of `text` within the document.
    pub start_char: i64,
    pub end_char: i64,
    pub text: String,
    pub tokens: i64,
    pub embedding: Option<Vec<f32>>,
}

/// One ranked row from the storage boundary: a chunk joined with its
/// document and its immediate neighbors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalHit {
    pub bucket: String,
    pub object_path: String,
    pub filename: String,
    /// Text of the chunk at `chunk_index - 1`, or empty.
    pub prev_text: String,
    pub cur_text: String,
    /// Text of the chunk at `chunk_index + 1`, or empty.
    pub next_text: String,
    /// Cosine distance to the question vector. `None` for lexical hits.
    pub distance: Option<f64>,
    /// Lexical relevance, higher is better.
    pub rank: f64,
    pub document_id: String,
    pub chunk_index: i64,
}

impl RetrievalHit {
    /// Composite citation id, `doc-{document_id}-chunk-{chunk_index}`.
    pub fn composite_id(&self) -> String {
        format!("doc-{}-chunk-{}", self.document_id, self.chunk_index)
    }
}

/// A chunk that still needs an embedding.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub chunk_id: String,
    pub text: String,
}

/// A citation entry returned alongside an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reference {
    /// Matches the `[n]` marker used in the prompt context.
    pub index: usize,
    pub id: String,
    /// `{link}#{chunk_index}`.
    pub source: String,
    pub snippet: String,
}

/// The consumer-facing result of one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub references: Vec<Reference>,
}
