//! # docs-qa
//!
//! Grounded question answering over a corpus of chunked documents.
//!
//! A question is embedded, matched against stored chunks by vector
//! distance (falling back to full-text search), stitched together with
//! neighboring chunks into a numbered context, and answered by the first
//! completion provider in a fallback chain that responds. Every `[n]` in the
//! answer matches an entry of the returned reference list.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌────────────┐
//! │ Embedding│──▶│ Retrieval │──▶│ Context  │──▶│ Synthesis  │──▶ answer + refs
//! │  client  │   │ vec → fts │   │ dedup/num│   │ groq→openai│
//! └──────────┘   └─────┬─────┘   └──────────┘   └────────────┘
//!                      ▼
//!                ┌──────────┐        ┌──────────┐
//!                │  SQLite  │◀───────│ Backfill │
//!                │ FTS5+vec │        │   job    │
//!                └──────────┘        └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment secrets |
//! | [`models`] | Documents, chunks, hits, references |
//! | [`embedding`] | Embedding providers and the question client |
//! | [`store`] | Storage trait, SQLite and in-memory backends |
//! | [`retrieval`] | Vector-then-text search policy |
//! | [`context`] | Deduplicated, numbered context assembly |
//! | [`generation`] | Provider chain and sessions |
//! | [`links`] | Object-store and local document links |
//! | [`rag`] | The end-to-end question pipeline |
//! | [`backfill`] | Embedding backfill job |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod backfill;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod links;
pub mod migrate;
pub mod models;
pub mod rag;
pub mod retrieval;
pub mod store;
