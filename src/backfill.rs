//! Backfill embeddings for chunks that have none.
//!
//! Select up to `batch_size` unembedded chunks, embed them in one provider
//! call, write the vectors in one commit, repeat until a selection comes
//! back empty. Any provider failure aborts the run; batches already
//! committed stay committed.
//!
//! Not reentrant. Two concurrent runs may embed the same chunks twice, but
//! both write the same kind of result.

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::config::{Config, Secrets};
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub batches: usize,
    pub embedded: usize,
}

/// Run the backfill loop against `store`.
///
/// `limit` caps the total number of chunks embedded in this run.
pub async fn embed_missing(
    store: &dyn Store,
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
    limit: Option<usize>,
) -> Result<BackfillReport> {
    if batch_size == 0 {
        bail!("batch size must be >= 1");
    }

    let mut report = BackfillReport::default();

    loop {
        let take = match limit {
            Some(max) => batch_size.min(max.saturating_sub(report.embedded)),
            None => batch_size,
        };
        if take == 0 {
            break;
        }

        let pending = store.chunks_missing_embedding(take).await?;
        if pending.is_empty() {
            break;
        }

        let texts: Vec<String> = pending.iter().map(|p| p.text.clone()).collect();
        let vectors = provider
            .embed(&texts)
            .await
            .with_context(|| format!("Failed to create embeddings for batch {}", report.batches + 1))?;

        if vectors.len() != pending.len() {
            bail!(
                "Embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                pending.len()
            );
        }
        if vectors.iter().any(|v| v.is_empty()) {
            bail!("Embedding provider returned an empty vector");
        }

        let batch: Vec<(String, Vec<f32>)> = pending
            .into_iter()
            .map(|p| p.chunk_id)
            .zip(vectors)
            .collect();
        store.store_embeddings(&batch).await?;

        report.batches += 1;
        report.embedded += batch.len();
        info!(
            batch = report.batches,
            embedded = report.embedded,
            model = provider.model_name(),
            "embedded chunks so far"
        );
    }

    Ok(report)
}

/// `qa embed missing`: backfill the configured SQLite database.
pub async fn run_embed_missing(
    config: &Config,
    secrets: &Secrets,
    batch_size_override: Option<usize>,
    limit: Option<usize>,
) -> Result<BackfillReport> {
    let Some(provider) = embedding::create_provider(&config.embedding, secrets)? else {
        bail!("Embedding provider unavailable. Set OPENAI_API_KEY or configure [embedding].");
    };
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    if !config.db.path.exists() {
        bail!(
            "Database not initialized at {}; run `qa init` first",
            config.db.path.display()
        );
    }
    let pool = db::connect_existing(config).await?;
    let store = SqliteStore::new(pool);
    let result = embed_missing(&store, provider.as_ref(), batch_size, limit).await;
    store.close().await;

    let report = result?;
    println!("embed missing");
    println!("  batches: {}", report.batches);
    println!("  embedded: {}", report.embedded);
    Ok(report)
}
