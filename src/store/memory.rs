//! In-memory [`Store`] implementation for testing.
//!
//! Lexical rank is the number of question-term occurrences in the chunk
//! text. Vector search is brute-force cosine distance over chunks that have
//! an embedding.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::embedding::cosine_distance;
use crate::models::{Chunk, Document, PendingChunk, RetrievalHit};

use super::{lexical_terms, sort_text_hits, sort_vector_hits, Store};

pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    chunks: RwLock<Vec<Chunk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            chunks: RwLock::new(Vec::new()),
        }
    }

    pub fn insert_document(&self, doc: Document) {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.insert(doc.id.clone(), doc);
    }

    /// Insert a chunk, replacing any chunk at the same document position.
    pub fn insert_chunk(&self, chunk: Chunk) {
        let mut chunks = self.chunks.write().unwrap_or_else(|e| e.into_inner());
        chunks.retain(|c| {
            !(c.document_id == chunk.document_id && c.chunk_index == chunk.chunk_index)
        });
        chunks.push(chunk);
    }

    /// Stored embedding for a chunk, if any.
    pub fn embedding_of(&self, chunk_id: &str) -> Option<Vec<f32>> {
        let chunks = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        chunks
            .iter()
            .find(|c| c.id == chunk_id)
            .and_then(|c| c.embedding.clone())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn build_hit(
    docs: &HashMap<String, Document>,
    chunks: &[Chunk],
    chunk: &Chunk,
    distance: Option<f64>,
    rank: f64,
) -> Option<RetrievalHit> {
    let doc = docs.get(&chunk.document_id)?;
    let neighbor = |offset: i64| {
        chunks
            .iter()
            .find(|c| {
                c.document_id == chunk.document_id && c.chunk_index == chunk.chunk_index + offset
            })
            .map(|c| c.text.clone())
            .unwrap_or_default()
    };

    Some(RetrievalHit {
        bucket: doc.bucket.clone(),
        object_path: doc.object_path.clone(),
        filename: doc.filename.clone(),
        prev_text: neighbor(-1),
        cur_text: chunk.text.clone(),
        next_text: neighbor(1),
        distance,
        rank,
        document_id: chunk.document_id.clone(),
        chunk_index: chunk.chunk_index,
    })
}

fn lexical_rank(terms: &[String], text: &str) -> f64 {
    let words: Vec<String> = lexical_terms_all(text);
    terms
        .iter()
        .map(|t| words.iter().filter(|w| *w == t).count())
        .sum::<usize>() as f64
}

// lexical_terms dedups; ranking needs every occurrence
fn lexical_terms_all(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn vector_search(
        &self,
        query_vec: &[f32],
        question: &str,
        limit: usize,
    ) -> Result<Vec<RetrievalHit>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        let chunks = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        let terms = lexical_terms(question);

        let mut hits: Vec<RetrievalHit> = chunks
            .iter()
            .filter_map(|c| {
                let embedding = c.embedding.as_ref()?;
                if embedding.len() != query_vec.len() {
                    debug!(
                        chunk_id = %c.id,
                        dims = embedding.len(),
                        expected = query_vec.len(),
                        "skipping embedding with mismatched dimensions"
                    );
                    return None;
                }
                let distance = cosine_distance(query_vec, embedding);
                let rank = lexical_rank(&terms, &c.text);
                build_hit(&docs, &chunks, c, Some(distance), rank)
            })
            .collect();

        sort_vector_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn text_search(&self, question: &str, limit: usize) -> Result<Vec<RetrievalHit>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        let chunks = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        let terms = lexical_terms(question);

        let mut hits: Vec<RetrievalHit> = chunks
            .iter()
            .filter_map(|c| {
                let rank = lexical_rank(&terms, &c.text);
                if rank <= 0.0 {
                    return None;
                }
                build_hit(&docs, &chunks, c, None, rank)
            })
            .collect();

        sort_text_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn chunks_missing_embedding(&self, limit: usize) -> Result<Vec<PendingChunk>> {
        let chunks = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        Ok(chunks
            .iter()
            .filter(|c| c.embedding.is_none())
            .take(limit)
            .map(|c| PendingChunk {
                chunk_id: c.id.clone(),
                text: c.text.clone(),
            })
            .collect())
    }

    async fn store_embeddings(&self, batch: &[(String, Vec<f32>)]) -> Result<()> {
        let mut chunks = self.chunks.write().unwrap_or_else(|e| e.into_inner());
        // validate first so a bad id leaves the batch unapplied
        for (chunk_id, _) in batch {
            if !chunks.iter().any(|c| &c.id == chunk_id) {
                return Err(anyhow!("unknown chunk id: {}", chunk_id));
            }
        }
        for (chunk_id, vector) in batch {
            if let Some(chunk) = chunks.iter_mut().find(|c| &c.id == chunk_id) {
                chunk.embedding = Some(vector.clone());
            }
        }
        Ok(())
    }
}
