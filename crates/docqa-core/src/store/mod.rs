//! Storage abstraction for docqa.
//!
//! The [`Store`] trait covers both the document store (metadata, "does the
//! corpus have any content") and the chunk store (text + embedding triples
//! with similarity ranking). Backends: [`memory::InMemoryStore`] here and the
//! SQLite store in the app crate.
//!
//! Implementations must be `Send + Sync` to work with async runtimes, and
//! must make [`Store::upsert_chunks`] atomic: readers see either the full
//! prior chunk set of a document or the full new one, never a mix.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::embedding::l2_normalize;
use crate::models::{Chunk, ChunkMatch, Document, NewChunk};

/// Errors surfaced by [`Store`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An embedding does not match the store-wide dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding must not be empty")]
    EmptyEmbedding,

    #[error("embedding contains NaN or infinite components")]
    NonFiniteEmbedding,

    #[error("top_n must be >= 1")]
    InvalidTopN,

    #[error("unknown document: {0}")]
    UnknownDocument(String),

    /// The backing store is unreachable or corrupt.
    #[error("store I/O error: {0}")]
    Io(#[from] anyhow::Error),
}

impl StoreError {
    /// True for errors caused by bad input rather than the backend.
    pub fn is_validation(&self) -> bool {
        !matches!(self, StoreError::Io(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](Store::upsert_document) | Insert or update document metadata |
/// | [`delete_document`](Store::delete_document) | Remove a document and its chunks |
/// | [`upsert_chunks`](Store::upsert_chunks) | Atomically replace a document's chunks |
/// | [`similarity_search`](Store::similarity_search) | Exhaustive cosine ranking |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a document or update the metadata of an existing one (by id).
    async fn upsert_document(&self, doc: &Document) -> StoreResult<()>;

    async fn get_document(&self, id: &str) -> StoreResult<Option<Document>>;

    async fn find_document_by_name(&self, file_name: &str) -> StoreResult<Option<Document>>;

    /// All documents, oldest ingestion first.
    async fn list_documents(&self) -> StoreResult<Vec<Document>>;

    /// Delete a document and, in the same step, all of its chunks.
    ///
    /// Returns `false` if no such document existed.
    async fn delete_document(&self, id: &str) -> StoreResult<bool>;

    async fn document_count(&self) -> StoreResult<u64>;

    /// Chunks of one document in chunk-index order.
    async fn document_chunks(&self, document_id: &str) -> StoreResult<Vec<Chunk>>;

    /// Replace all chunks of `document_id` with `chunks`.
    ///
    /// Embeddings are normalized before storage. Fails without touching the
    /// prior chunk set if any embedding has the wrong dimension or the
    /// document does not exist. Returns the number of chunks written.
    async fn upsert_chunks(&self, document_id: &str, chunks: &[NewChunk]) -> StoreResult<usize>;

    /// Rank every stored chunk against `query` and return the best `top_n`.
    ///
    /// Highest score first; ties go to the most recently inserted chunk.
    /// An empty store yields an empty vector.
    async fn similarity_search(&self, query: &[f32], top_n: usize)
        -> StoreResult<Vec<ChunkMatch>>;

    /// The store-wide embedding dimension, fixed by the first chunk written.
    async fn embedding_dims(&self) -> StoreResult<Option<usize>>;
}

/// Validate a chunk batch against the store dimension and normalize it.
///
/// Returns the dimension of the batch (or the store's, for an empty batch)
/// and the unit-length embeddings in input order.
pub fn prepare_embeddings(
    store_dims: Option<usize>,
    chunks: &[NewChunk],
) -> StoreResult<(Option<usize>, Vec<Vec<f32>>)> {
    let mut dims = store_dims;
    let mut out = Vec::with_capacity(chunks.len());
    for c in chunks {
        if c.embedding.is_empty() {
            return Err(StoreError::EmptyEmbedding);
        }
        if !c.embedding.iter().all(|x| x.is_finite()) {
            return Err(StoreError::NonFiniteEmbedding);
        }
        match dims {
            Some(expected) if expected != c.embedding.len() => {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: c.embedding.len(),
                });
            }
            Some(_) => {}
            None => dims = Some(c.embedding.len()),
        }
        out.push(l2_normalize(&c.embedding));
    }
    Ok((dims, out))
}

/// Validate a query vector and normalize it.
pub fn prepare_query(store_dims: Option<usize>, query: &[f32]) -> StoreResult<Vec<f32>> {
    if query.is_empty() {
        return Err(StoreError::EmptyEmbedding);
    }
    if !query.iter().all(|x| x.is_finite()) {
        return Err(StoreError::NonFiniteEmbedding);
    }
    if let Some(expected) = store_dims {
        if expected != query.len() {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }
    }
    Ok(l2_normalize(query))
}

/// Sort matches by score (desc) then insertion sequence (desc), keep `top_n`.
pub fn rank_matches(mut matches: Vec<ChunkMatch>, top_n: usize) -> Vec<ChunkMatch> {
    matches.sort_by(|a, b| b.score.total_cmp(&a.score).then(b.seq.cmp(&a.seq)));
    matches.truncate(top_n);
    matches
}
