//! Storage boundary for retrieval and backfill.
//!
//! The [`Store`] trait covers the read-only search queries the question
//! pipeline needs plus the two writes the backfill job needs. Every search
//! row is turned into a [`RetrievalHit`] here, at the boundary, so nothing
//! downstream looks fields up by string key.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`vector_search`](Store::vector_search) | Rank embedded chunks by distance, lexical rank as tie-break |
//! | [`text_search`](Store::text_search) | Rank chunks by lexical relevance |
//! | [`chunks_missing_embedding`](Store::chunks_missing_embedding) | Select chunks with no vector |
//! | [`store_embeddings`](Store::store_embeddings) | Persist one batch of vectors atomically |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::cmp::Ordering;

use crate::models::{PendingChunk, RetrievalHit};

#[async_trait]
pub trait Store: Send + Sync {
    /// Chunks with a stored embedding, ordered by cosine distance ascending
    /// then lexical rank descending, at most `limit` rows.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        question: &str,
        limit: usize,
    ) -> Result<Vec<RetrievalHit>>;

    /// Chunks matching the question lexically, ordered by rank descending.
    async fn text_search(&self, question: &str, limit: usize) -> Result<Vec<RetrievalHit>>;

    /// Up to `limit` chunks whose embedding is absent.
    async fn chunks_missing_embedding(&self, limit: usize) -> Result<Vec<PendingChunk>>;

    /// Write `(chunk_id, vector)` pairs in a single commit.
    async fn store_embeddings(&self, batch: &[(String, Vec<f32>)]) -> Result<()>;

    /// Release the underlying connection. Default is a no-op.
    async fn close(&self) {}
}

/// Lowercased alphanumeric terms of a question, deduplicated in order.
pub fn lexical_terms(question: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in question.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let word = word.to_lowercase();
        if !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}

/// FTS5 MATCH expression for a question: quoted terms joined with `OR`.
///
/// `None` when the question has no searchable terms; FTS5 rejects an empty
/// expression, so callers skip the lexical query instead.
pub fn fts_match_expression(question: &str) -> Option<String> {
    let terms = lexical_terms(question);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Sort vector hits by distance ascending, then rank descending.
pub fn sort_vector_hits(hits: &mut [RetrievalHit]) {
    hits.sort_by(|a, b| {
        let da = a.distance.unwrap_or(f64::INFINITY);
        let db = b.distance.unwrap_or(f64::INFINITY);
        da.partial_cmp(&db)
            .unwrap_or(Ordering::Equal)
            .then(b.rank.partial_cmp(&a.rank).unwrap_or(Ordering::Equal))
    });
}

/// Sort lexical hits by rank descending.
pub fn sort_text_hits(hits: &mut [RetrievalHit]) {
    hits.sort_by(|a, b| b.rank.partial_cmp(&a.rank).unwrap_or(Ordering::Equal));
}
