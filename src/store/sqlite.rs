//! SQLite-backed [`Store`] implementation.
//!
//! Lexical relevance comes from the `chunks_fts` FTS5 table (`-rank`, so
//! higher is better). Embeddings are little-endian f32 BLOBs on the `chunks`
//! row; cosine distance is computed in Rust over every embedded chunk.
//! Neighbor text is joined in SQL by `chunk_index ± 1` within the document.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::models::{PendingChunk, RetrievalHit};

use super::{fts_match_expression, sort_vector_hits, Store};

/// Lexical matches for the bound MATCH expression.
const LEXICAL_CTE: &str = r#"
    WITH q AS (
        SELECT chunk_id, -rank AS lexical_rank
        FROM chunks_fts
        WHERE chunks_fts MATCH ?
    )
"#;

/// Stand-in when the question has no searchable terms.
const EMPTY_LEXICAL_CTE: &str = r#"
    WITH q AS (
        SELECT NULL AS chunk_id, 0.0 AS lexical_rank WHERE 0
    )
"#;

const HIT_COLUMNS: &str = r#"
        d.bucket,
        d.object_path,
        d.filename,
        COALESCE(cp.text, '') AS prev_text,
        c.text AS cur_text,
        COALESCE(cn.text, '') AS next_text,
        c.document_id,
        c.chunk_index
"#;

const NEIGHBOR_JOINS: &str = r#"
    LEFT JOIN chunks cp ON cp.document_id = c.document_id AND cp.chunk_index = c.chunk_index - 1
    LEFT JOIN chunks cn ON cn.document_id = c.document_id AND cn.chunk_index = c.chunk_index + 1
    JOIN documents d ON d.id = c.document_id
"#;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn hit_from_row(row: &SqliteRow, distance: Option<f64>, rank: f64) -> RetrievalHit {
    RetrievalHit {
        bucket: row.get("bucket"),
        object_path: row.get("object_path"),
        filename: row.get("filename"),
        prev_text: row.get("prev_text"),
        cur_text: row.get("cur_text"),
        next_text: row.get("next_text"),
        distance,
        rank,
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn vector_search(
        &self,
        query_vec: &[f32],
        question: &str,
        limit: usize,
    ) -> Result<Vec<RetrievalHit>> {
        let match_expr = fts_match_expression(question);
        let cte = if match_expr.is_some() {
            LEXICAL_CTE
        } else {
            EMPTY_LEXICAL_CTE
        };

        let sql = format!(
            r#"
            {cte}
            SELECT {HIT_COLUMNS},
                   c.id AS chunk_id,
                   c.embedding,
                   COALESCE(q.lexical_rank, 0.0) AS lexical_rank
            FROM chunks c
            {NEIGHBOR_JOINS}
            LEFT JOIN q ON q.chunk_id = c.id
            WHERE c.embedding IS NOT NULL
            "#
        );

        let mut query = sqlx::query(&sql);
        if let Some(expr) = &match_expr {
            query = query.bind(expr);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut hits: Vec<RetrievalHit> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let embedding = blob_to_vec(&blob);
                // embedded by another model; not comparable
                if embedding.len() != query_vec.len() {
                    let chunk_id: String = row.get("chunk_id");
                    debug!(
                        chunk_id = %chunk_id,
                        dims = embedding.len(),
                        expected = query_vec.len(),
                        "skipping embedding with mismatched dimensions"
                    );
                    return None;
                }
                let distance = cosine_distance(query_vec, &embedding);
                let rank: f64 = row.get("lexical_rank");
                Some(hit_from_row(row, Some(distance), rank))
            })
            .collect();

        sort_vector_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn text_search(&self, question: &str, limit: usize) -> Result<Vec<RetrievalHit>> {
        let Some(match_expr) = fts_match_expression(question) else {
            return Ok(Vec::new());
        };

        let sql = format!(
            r#"
            {LEXICAL_CTE}
            SELECT {HIT_COLUMNS},
                   q.lexical_rank AS lexical_rank
            FROM q
            JOIN chunks c ON c.id = q.chunk_id
            {NEIGHBOR_JOINS}
            ORDER BY q.lexical_rank DESC, c.document_id, c.chunk_index
            LIMIT ?
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(&match_expr)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("lexical_rank");
                hit_from_row(row, None, rank)
            })
            .collect())
    }

    async fn chunks_missing_embedding(&self, limit: usize) -> Result<Vec<PendingChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, text
            FROM chunks
            WHERE embedding IS NULL
            ORDER BY document_id, chunk_index
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PendingChunk {
                chunk_id: row.get("id"),
                text: row.get("text"),
            })
            .collect())
    }

    async fn store_embeddings(&self, batch: &[(String, Vec<f32>)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (chunk_id, vector) in batch {
            sqlx::query("UPDATE chunks SET embedding = ? WHERE id = ?")
                .bind(vec_to_blob(vector))
                .bind(chunk_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
