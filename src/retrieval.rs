//! Hybrid retrieval: vector search first, lexical search as the fallback.
//!
//! The vector path runs only when the question was embedded. If it was
//! skipped, failed, or matched nothing, the lexical path runs. The two
//! result sets are never merged or re-scored.

use anyhow::Result;
use tracing::{debug, warn};

use crate::models::RetrievalHit;
use crate::store::Store;

/// Which search produced the hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPath {
    Vector,
    Text,
}

#[derive(Debug, Clone)]
pub struct Retrieval {
    pub hits: Vec<RetrievalHit>,
    /// `None` when neither search produced anything.
    pub path: Option<SearchPath>,
}

pub struct HybridRetriever {
    limit: usize,
}

impl HybridRetriever {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    /// Run the vector-then-text policy against `store`.
    ///
    /// A vector search error is logged and treated as zero hits. A lexical
    /// search error is returned.
    pub async fn retrieve(
        &self,
        store: &dyn Store,
        query_vec: Option<&[f32]>,
        question: &str,
    ) -> Result<Retrieval> {
        if let Some(vec) = query_vec {
            match store.vector_search(vec, question, self.limit).await {
                Ok(hits) if !hits.is_empty() => {
                    debug!(rows = hits.len(), "vector search returned rows");
                    return Ok(Retrieval {
                        hits,
                        path: Some(SearchPath::Vector),
                    });
                }
                Ok(_) => debug!("vector search returned no rows"),
                Err(e) => warn!(error = %e, "vector search failed, falling back to text search"),
            }
        } else {
            debug!("no question vector, skipping vector search");
        }

        let hits = store.text_search(question, self.limit).await?;
        debug!(rows = hits.len(), "full-text search returned rows");

        let path = if hits.is_empty() {
            None
        } else {
            Some(SearchPath::Text)
        };
        Ok(Retrieval { hits, path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PendingChunk;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted store that counts which path was queried.
    struct ScriptedStore {
        vector: Option<Vec<RetrievalHit>>,
        text: Vec<RetrievalHit>,
        vector_calls: AtomicUsize,
        text_calls: AtomicUsize,
    }

    impl ScriptedStore {
        fn new(vector: Option<Vec<RetrievalHit>>, text: Vec<RetrievalHit>) -> Self {
            Self {
                vector,
                text,
                vector_calls: AtomicUsize::new(0),
                text_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Store for ScriptedStore {
        async fn vector_search(
            &self,
            _query_vec: &[f32],
            _question: &str,
            limit: usize,
        ) -> Result<Vec<RetrievalHit>> {
            self.vector_calls.fetch_add(1, Ordering::SeqCst);
            match &self.vector {
                Some(hits) => Ok(hits.iter().take(limit).cloned().collect()),
                None => bail!("connection reset"),
            }
        }

        async fn text_search(&self, _question: &str, limit: usize) -> Result<Vec<RetrievalHit>> {
            self.text_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.iter().take(limit).cloned().collect())
        }

        async fn chunks_missing_embedding(&self, _limit: usize) -> Result<Vec<PendingChunk>> {
            Ok(Vec::new())
        }

        async fn store_embeddings(&self, _batch: &[(String, Vec<f32>)]) -> Result<()> {
            Ok(())
        }
    }

    fn hit(text: &str) -> RetrievalHit {
        RetrievalHit {
            bucket: String::new(),
            object_path: String::new(),
            filename: "policy.md".to_string(),
            prev_text: String::new(),
            cur_text: text.to_string(),
            next_text: String::new(),
            distance: None,
            rank: 1.0,
            document_id: "d1".to_string(),
            chunk_index: 0,
        }
    }

    #[tokio::test]
    async fn test_no_vector_runs_text_only() {
        let store = ScriptedStore::new(Some(vec![hit("vector")]), vec![hit("text")]);
        let r = HybridRetriever::new(20)
            .retrieve(&store, None, "q")
            .await
            .unwrap();
        assert_eq!(r.path, Some(SearchPath::Text));
        assert_eq!(store.vector_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.text_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_vector_hits_skip_text() {
        let store = ScriptedStore::new(Some(vec![hit("vector")]), vec![hit("text")]);
        let r = HybridRetriever::new(20)
            .retrieve(&store, Some(&[1.0, 0.0]), "q")
            .await
            .unwrap();
        assert_eq!(r.path, Some(SearchPath::Vector));
        assert_eq!(r.hits[0].cur_text, "vector");
        assert_eq!(store.text_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_vector_falls_back() {
        let store = ScriptedStore::new(Some(Vec::new()), vec![hit("text")]);
        let r = HybridRetriever::new(20)
            .retrieve(&store, Some(&[1.0]), "q")
            .await
            .unwrap();
        assert_eq!(r.path, Some(SearchPath::Text));
        assert_eq!(store.vector_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.text_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_vector_error_falls_back() {
        let store = ScriptedStore::new(None, vec![hit("text")]);
        let r = HybridRetriever::new(20)
            .retrieve(&store, Some(&[1.0]), "q")
            .await
            .unwrap();
        assert_eq!(r.hits[0].cur_text, "text");
    }

    #[tokio::test]
    async fn test_both_empty_is_empty() {
        let store = ScriptedStore::new(Some(Vec::new()), Vec::new());
        let r = HybridRetriever::new(20)
            .retrieve(&store, Some(&[1.0]), "q")
            .await
            .unwrap();
        assert!(r.hits.is_empty());
        assert_eq!(r.path, None);
    }

    #[tokio::test]
    async fn test_limit_is_passed_through() {
        let many: Vec<RetrievalHit> = (0..30).map(|i| hit(&format!("t{}", i))).collect();
        let store = ScriptedStore::new(None, many);
        let r = HybridRetriever::new(20)
            .retrieve(&store, None, "q")
            .await
            .unwrap();
        assert_eq!(r.hits.len(), 20);
    }
}
