//! The question-answering pipeline.
//!
//! ```text
//! question ─▶ embed ─▶ vector search ─┬─▶ assemble ─▶ synthesize ─▶ {answer, references}
//!                 └── (no vector) ──▶ text search ─┘
//! ```
//!
//! Stages run strictly in sequence. The SQLite connection is opened for
//! retrieval only and closed before synthesis starts.

use anyhow::Result;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, info_span, Instrument};

use crate::config::{Config, Secrets};
use crate::context::{assemble, AssembledContext};
use crate::db;
use crate::embedding::{self, EmbeddingClient};
use crate::generation::{Session, Synthesizer, DONT_KNOW};
use crate::links::LinkResolver;
use crate::models::Answer;
use crate::retrieval::{HybridRetriever, Retrieval};
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

#[derive(Debug, Error)]
pub enum AskError {
    /// Rejected before any remote call.
    #[error("question must not be empty")]
    EmptyQuestion,
    /// The database file does not exist yet.
    #[error("database not initialized at {}; run `qa init` first", .0.display())]
    NotInitialized(PathBuf),
    /// Storage could not be opened or the lexical query failed.
    #[error(transparent)]
    Retrieval(#[from] anyhow::Error),
}

pub struct Rag {
    config: Config,
    embedder: EmbeddingClient,
    retriever: HybridRetriever,
    synthesizer: Synthesizer,
    resolver: LinkResolver,
}

impl Rag {
    pub fn new(
        config: Config,
        embedder: EmbeddingClient,
        synthesizer: Synthesizer,
        resolver: LinkResolver,
    ) -> Self {
        let retriever = HybridRetriever::new(config.retrieval.max_chunks);
        Self {
            config,
            embedder,
            retriever,
            synthesizer,
            resolver,
        }
    }

    /// Wire every component from config plus environment secrets.
    /// Absent credentials degrade the service; they are not errors.
    pub fn from_config(config: &Config, secrets: &Secrets) -> Result<Self> {
        let provider = embedding::create_provider(&config.embedding, secrets)?;
        let synthesizer = Synthesizer::from_config(&config.generation, secrets)?;
        let resolver = LinkResolver::from_config(&config.storage, secrets);

        info!(
            embeddings = provider.is_some(),
            providers = ?synthesizer.provider_names(),
            object_store = resolver.is_configured(),
            "question service ready"
        );

        Ok(Self::new(
            config.clone(),
            EmbeddingClient::new(provider),
            synthesizer,
            resolver,
        ))
    }

    pub fn new_session(&self) -> Session {
        Session::new(self.config.generation.max_history_turns)
    }

    /// Answer one question against the configured SQLite database.
    pub async fn answer_question(&self, question: &str) -> Result<Answer, AskError> {
        self.answer_from_db(question, None).await
    }

    /// Like [`answer_question`](Self::answer_question), replaying and
    /// extending the caller's session.
    pub async fn answer_in_session(
        &self,
        session: &mut Session,
        question: &str,
    ) -> Result<Answer, AskError> {
        self.answer_from_db(question, Some(session)).await
    }

    async fn answer_from_db(
        &self,
        question: &str,
        session: Option<&mut Session>,
    ) -> Result<Answer, AskError> {
        let question = validate(question)?;
        let span = info_span!("question", session = session.as_ref().map(|s| s.id()));

        async move {
            if !self.config.db.path.exists() {
                return Err(AskError::NotInitialized(self.config.db.path.clone()));
            }

            let query_vec = self.embedder.embed_question(question).await;
            let pool = db::connect_existing(&self.config).await?;
            let store = SqliteStore::new(pool);
            self.answer_then_close(&store, question, query_vec, session)
                .await
        }
        .instrument(span)
        .await
    }

    /// Retrieve from `store`, close it, then respond. The store is closed
    /// before synthesis starts, also when retrieval fails.
    async fn answer_then_close(
        &self,
        store: &dyn Store,
        question: &str,
        query_vec: Option<Vec<f32>>,
        session: Option<&mut Session>,
    ) -> Result<Answer, AskError> {
        let retrieval = self
            .retriever
            .retrieve(store, query_vec.as_deref(), question)
            .await;
        store.close().await;

        Ok(self.respond(question, retrieval?, session).await)
    }

    /// Answer one question against an already open store.
    ///
    /// The store is left open; closing it is the caller's call.
    pub async fn answer_with_store(
        &self,
        store: &dyn Store,
        question: &str,
        session: Option<&mut Session>,
    ) -> Result<Answer, AskError> {
        let question = validate(question)?;
        let query_vec = self.embedder.embed_question(question).await;
        let retrieval = self
            .retriever
            .retrieve(store, query_vec.as_deref(), question)
            .await?;
        Ok(self.respond(question, retrieval, session).await)
    }

    async fn respond(
        &self,
        question: &str,
        retrieval: Retrieval,
        session: Option<&mut Session>,
    ) -> Answer {
        if retrieval.hits.is_empty() {
            debug!("no hits, answering without a provider call");
            return Answer {
                answer: DONT_KNOW.to_string(),
                references: Vec::new(),
            };
        }

        let AssembledContext {
            text,
            references,
            hits,
        } = assemble(&retrieval.hits, &self.resolver);
        debug!(path = ?retrieval.path, blocks = references.len(), "context assembled");

        let answer = if self.synthesizer.is_configured() {
            let history = session.as_ref().map(|s| s.turns()).unwrap_or_default();
            self.synthesizer.synthesize(question, &text, &history).await
        } else {
            debug!("no completion provider, returning the top-ranked chunk");
            hits.first()
                .map(|h| h.cur_text.clone())
                .unwrap_or_else(|| DONT_KNOW.to_string())
        };

        if let Some(session) = session {
            session.record(question, &answer);
        }

        Answer { answer, references }
    }
}

fn validate(question: &str) -> Result<&str, AskError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(AskError::EmptyQuestion);
    }
    Ok(question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{CompletionProvider, Turn};
    use crate::models::{Chunk, Document, PendingChunk, RetrievalHit};
    use crate::store::memory::InMemoryStore;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Echoes a fixed reply and captures what it was sent.
    struct Recorder {
        reply: String,
        seen: Arc<Mutex<Vec<(usize, String)>>>,
    }

    #[async_trait]
    impl CompletionProvider for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn complete(&self, _system: &str, history: &[Turn], user: &str) -> Result<String> {
            self.seen
                .lock()
                .unwrap()
                .push((history.len(), user.to_string()));
            if self.reply.is_empty() {
                bail!("down");
            }
            Ok(self.reply.clone())
        }
    }

    fn store_with_pto() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.insert_document(Document {
            id: "7".to_string(),
            bucket: "uploads".to_string(),
            object_path: "handbook.pdf".to_string(),
            filename: "handbook.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 2048,
            created_at: 1_700_000_000,
        });
        store.insert_chunk(Chunk {
            id: "c0".to_string(),
            document_id: "7".to_string(),
            chunk_index: 0,
            start_char: 0,
            end_char: 0,
            text: "Employees accrue 15 PTO days/year.".to_string(),
            tokens: 6,
            embedding: None,
        });
        store
    }

    fn rag_with(providers: Vec<Box<dyn CompletionProvider>>) -> Rag {
        Rag::new(
            Config::default(),
            EmbeddingClient::unavailable(),
            Synthesizer::new(providers),
            LinkResolver::default(),
        )
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let rag = rag_with(Vec::new());
        let store = store_with_pto();
        let err = rag.answer_with_store(&store, "   ", None).await.unwrap_err();
        assert!(matches!(err, AskError::EmptyQuestion));
    }

    #[tokio::test]
    async fn test_no_hits_is_dont_know_without_provider_call() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let rag = rag_with(vec![Box::new(Recorder {
            reply: "should not be used".to_string(),
            seen: seen.clone(),
        })]);
        let store = store_with_pto();
        let answer = rag
            .answer_with_store(&store, "quarterly revenue", None)
            .await
            .unwrap();
        assert_eq!(answer.answer, DONT_KNOW);
        assert!(answer.references.is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pto_scenario_extractive_answer() {
        let rag = rag_with(Vec::new());
        let store = store_with_pto();
        let answer = rag
            .answer_with_store(&store, "What is the PTO policy?", None)
            .await
            .unwrap();
        assert_eq!(answer.answer, "Employees accrue 15 PTO days/year.");
        assert_eq!(answer.references.len(), 1);
        assert_eq!(answer.references[0].id, "doc-7-chunk-0");
        assert_eq!(answer.references[0].source, "handbook.pdf#0");
    }

    #[tokio::test]
    async fn test_provider_receives_numbered_context() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let rag = rag_with(vec![Box::new(Recorder {
            reply: "You accrue 15 days [1].".to_string(),
            seen: seen.clone(),
        })]);
        let store = store_with_pto();
        let answer = rag
            .answer_with_store(&store, "How much PTO?", None)
            .await
            .unwrap();
        assert_eq!(answer.answer, "You accrue 15 days [1].");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].1.starts_with("Question: How much PTO?\n\nContext:\n[1] (handbook.pdf)\n"));
    }

    #[tokio::test]
    async fn test_session_history_is_replayed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let rag = rag_with(vec![Box::new(Recorder {
            reply: "15 days [1].".to_string(),
            seen: seen.clone(),
        })]);
        let store = store_with_pto();
        let mut session = rag.new_session();

        rag.answer_with_store(&store, "How much PTO?", Some(&mut session))
            .await
            .unwrap();
        rag.answer_with_store(&store, "And PTO next year?", Some(&mut session))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, 0);
        assert_eq!(seen[1].0, 1);
        assert_eq!(session.len(), 2);
    }

    /// Delegates to an [`InMemoryStore`], optionally failing lexical search,
    /// and records when it was closed.
    struct ClosingStore {
        inner: InMemoryStore,
        fail_text: bool,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Store for ClosingStore {
        async fn vector_search(
            &self,
            query_vec: &[f32],
            question: &str,
            limit: usize,
        ) -> Result<Vec<RetrievalHit>> {
            self.inner.vector_search(query_vec, question, limit).await
        }

        async fn text_search(&self, question: &str, limit: usize) -> Result<Vec<RetrievalHit>> {
            if self.fail_text {
                bail!("disk I/O error");
            }
            self.inner.text_search(question, limit).await
        }

        async fn chunks_missing_embedding(&self, limit: usize) -> Result<Vec<PendingChunk>> {
            self.inner.chunks_missing_embedding(limit).await
        }

        async fn store_embeddings(&self, batch: &[(String, Vec<f32>)]) -> Result<()> {
            self.inner.store_embeddings(batch).await
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Notes whether the store was already closed when it was called.
    struct ClosedCheck {
        closed: Arc<AtomicBool>,
        saw_closed: Arc<Mutex<Option<bool>>>,
    }

    #[async_trait]
    impl CompletionProvider for ClosedCheck {
        fn name(&self) -> &str {
            "closed-check"
        }

        async fn complete(&self, _system: &str, _history: &[Turn], _user: &str) -> Result<String> {
            *self.saw_closed.lock().unwrap() = Some(self.closed.load(Ordering::SeqCst));
            Ok("15 days [1].".to_string())
        }
    }

    #[tokio::test]
    async fn test_store_closed_before_synthesis() {
        let closed = Arc::new(AtomicBool::new(false));
        let saw_closed = Arc::new(Mutex::new(None));
        let rag = rag_with(vec![Box::new(ClosedCheck {
            closed: closed.clone(),
            saw_closed: saw_closed.clone(),
        })]);
        let store = ClosingStore {
            inner: store_with_pto(),
            fail_text: false,
            closed: closed.clone(),
        };

        let answer = rag
            .answer_then_close(&store, "How much PTO?", None, None)
            .await
            .unwrap();
        assert_eq!(answer.answer, "15 days [1].");
        assert_eq!(*saw_closed.lock().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_store_closed_when_retrieval_fails() {
        let closed = Arc::new(AtomicBool::new(false));
        let saw_closed = Arc::new(Mutex::new(None));
        let rag = rag_with(vec![Box::new(ClosedCheck {
            closed: closed.clone(),
            saw_closed: saw_closed.clone(),
        })]);
        let store = ClosingStore {
            inner: store_with_pto(),
            fail_text: true,
            closed: closed.clone(),
        };

        let err = rag
            .answer_then_close(&store, "How much PTO?", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AskError::Retrieval(_)));
        assert!(closed.load(Ordering::SeqCst));
        assert!(saw_closed.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_database_is_not_initialized() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.db.path = tmp.path().join("nested").join("none.sqlite");
        let rag = Rag::new(
            config.clone(),
            EmbeddingClient::unavailable(),
            Synthesizer::new(Vec::new()),
            LinkResolver::default(),
        );

        let err = rag.answer_question("hello").await.unwrap_err();
        assert!(matches!(err, AskError::NotInitialized(_)));
        assert!(err.to_string().contains("qa init"));
        assert!(!config.db.path.exists());
    }

    #[test]
    fn test_validate_trims() {
        assert_eq!(validate("  hi  ").unwrap(), "hi");
        assert!(validate("\n\t").is_err());
    }
}
