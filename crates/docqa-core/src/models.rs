//! Core data types shared by the store, the retrieval engine and the
//! orchestrator.

use serde::Serialize;

/// An ingested document. Owns its chunks; deleting it deletes them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    /// Display name, usually the file name the text was extracted from.
    pub file_name: String,
    /// Unix seconds.
    pub ingested_at: i64,
    pub content_type: String,
    /// SHA-256 (hex) of the extracted text.
    pub content_hash: String,
}

/// A chunk as handed to [`Store::upsert_chunks`](crate::store::Store::upsert_chunks).
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub text: String,
    pub embedding: Vec<f32>,
}

impl NewChunk {
    pub fn new(text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            embedding,
        }
    }
}

/// A chunk as persisted. Immutable once written.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// Unit-length embedding.
    pub embedding: Vec<f32>,
    /// Store-wide insertion sequence, strictly increasing.
    pub seq: i64,
}

/// A chunk returned by similarity search, joined with its document name.
#[derive(Debug, Clone)]
pub struct ChunkMatch {
    pub chunk_id: String,
    pub document_id: String,
    pub file_name: String,
    pub text: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
    pub seq: i64,
}

/// Read-only projection of a chunk handed back with an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievedContext {
    pub file_name: String,
    pub text: String,
}

impl From<ChunkMatch> for RetrievedContext {
    fn from(m: ChunkMatch) -> Self {
        Self {
            file_name: m.file_name,
            text: m.text,
        }
    }
}

/// A [`RetrievedContext`] with the score it was ranked by.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredContext {
    pub context: RetrievedContext,
    pub score: f32,
}
