//! Retrieval engine: query text → top-N chunks with source attribution.
//!
//! Operates entirely through the [`Store`] and [`EmbeddingProvider`] traits.
//! The calling application chooses the store implementation and the
//! provider; this module embeds the query, asks the store for its best
//! matches and projects them into [`ScoredContext`] values.
//!
//! # Algorithm
//!
//! 1. Embed the query with the same provider used at ingestion.
//! 2. Normalize it and score every stored chunk (cosine over unit vectors).
//! 3. Sort by score (desc), insertion sequence (desc).
//! 4. Truncate to `top_n`.

use thiserror::Error;

use crate::embedding::{embed_one, EmbeddingProvider};
use crate::models::{RetrievedContext, ScoredContext};
use crate::store::{Store, StoreError};

/// Why a retrieval could not produce results.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("failed to embed query: {0}")]
    Embedding(anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Retrieve the `top_n` chunks most similar to `query`.
///
/// An empty store is not an error: the result is simply empty.
pub async fn retrieve<S: Store + ?Sized>(
    store: &S,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    top_n: usize,
) -> Result<Vec<ScoredContext>, RetrievalError> {
    if top_n == 0 {
        return Err(StoreError::InvalidTopN.into());
    }
    let query_vec = embed_one(embedder, query)
        .await
        .map_err(RetrievalError::Embedding)?;

    let matches = store.similarity_search(&query_vec, top_n).await?;

    Ok(matches
        .into_iter()
        .map(|m| {
            let score = m.score;
            ScoredContext {
                context: RetrievedContext::from(m),
                score,
            }
        })
        .collect())
}

/// Drop the scores, keeping rank order.
pub fn contexts(scored: &[ScoredContext]) -> Vec<RetrievedContext> {
    scored.iter().map(|s| s.context.clone()).collect()
}
