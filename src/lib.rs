//! # docqa
//!
//! Ask questions about your own documents and get answers grounded in them.
//!
//! Documents are split into chunks, embedded, and stored in SQLite. A
//! question is embedded the same way, the most similar chunks are pulled
//! back by cosine similarity, and the chunks plus the question are rendered
//! into a prompt for either a local model (run through `llama-server`) or
//! the Gemini API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │  Extract    │──▶│ Chunk+Embed │──▶│  SQLite  │
//! │ txt/md/pdf  │   │             │   │ chunks   │
//! └─────────────┘   └─────────────┘   └────┬─────┘
//!                                          │ retrieve
//!                                          ▼
//!                   ┌──────────────┐  ┌──────────────┐
//!                   │ ModelManager │◀─│ Orchestrator │
//!                   │ local/remote │  │ prompt+query │
//!                   └──────────────┘  └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa init
//! docqa ingest ./notes
//! docqa credentials set api-key <key>       # or: docqa models download "<name>"
//! docqa ask "What is the capital of France?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`sqlite_store`] | SQLite chunk and document store |
//! | [`embedding`] | Embedding providers |
//! | [`extract`] / [`ingest`] | Text extraction and ingestion |
//! | [`credentials`] | Keychain-backed secrets |
//! | [`inference`] | Local and remote inference backends |
//! | [`download`] | Model file download transport |
//! | [`lifecycle`] | Active model and download state |
//! | [`orchestrator`] | Question answering |
//! | [`progress`] | Download progress rendering |

pub mod app;
pub mod ask;
pub mod config;
pub mod credentials;
pub mod credentials_cmd;
pub mod db;
pub mod docs;
pub mod download;
pub mod embedding;
pub mod extract;
pub mod inference;
pub mod ingest;
pub mod lifecycle;
pub mod logging;
pub mod migrate;
pub mod models_cmd;
pub mod orchestrator;
pub mod progress;
pub mod sqlite_store;

use std::sync::Arc;

use anyhow::Result;

use config::Config;
use sqlite_store::SqliteStore;

/// Connect to the configured database, ensure the schema, and wrap it as a store.
pub async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}
