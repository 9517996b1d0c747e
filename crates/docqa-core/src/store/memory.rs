//! In-memory [`Store`] implementation for tests and embedding in other hosts.
//!
//! The whole state sits behind one `std::sync::RwLock`, so a chunk replace
//! is a single write critical section and a search is a single read one.
//! Similarity search is an exhaustive scan.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::unit_similarity;
use crate::models::{Chunk, ChunkMatch, Document, NewChunk};

use super::{
    prepare_embeddings, prepare_query, rank_matches, Store, StoreError, StoreResult,
};

#[derive(Default)]
struct State {
    docs: HashMap<String, Document>,
    chunks: Vec<Chunk>,
    dims: Option<usize>,
    next_seq: i64,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Io(anyhow::anyhow!("in-memory store lock poisoned")))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Io(anyhow::anyhow!("in-memory store lock poisoned")))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_document(&self, doc: &Document) -> StoreResult<()> {
        self.write()?.docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> StoreResult<Option<Document>> {
        Ok(self.read()?.docs.get(id).cloned())
    }

    async fn find_document_by_name(&self, file_name: &str) -> StoreResult<Option<Document>> {
        Ok(self
            .read()?
            .docs
            .values()
            .find(|d| d.file_name == file_name)
            .cloned())
    }

    async fn list_documents(&self) -> StoreResult<Vec<Document>> {
        let mut docs: Vec<Document> = self.read()?.docs.values().cloned().collect();
        docs.sort_by(|a, b| a.ingested_at.cmp(&b.ingested_at).then(a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn delete_document(&self, id: &str) -> StoreResult<bool> {
        let mut state = self.write()?;
        if state.docs.remove(id).is_none() {
            return Ok(false);
        }
        state.chunks.retain(|c| c.document_id != id);
        Ok(true)
    }

    async fn document_count(&self) -> StoreResult<u64> {
        Ok(self.read()?.docs.len() as u64)
    }

    async fn document_chunks(&self, document_id: &str) -> StoreResult<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = self
            .read()?
            .chunks
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn upsert_chunks(&self, document_id: &str, chunks: &[NewChunk]) -> StoreResult<usize> {
        let mut state = self.write()?;
        if !state.docs.contains_key(document_id) {
            return Err(StoreError::UnknownDocument(document_id.to_string()));
        }
        let (dims, vectors) = prepare_embeddings(state.dims, chunks)?;

        state.chunks.retain(|c| c.document_id != document_id);
        for (i, (chunk, embedding)) in chunks.iter().zip(vectors).enumerate() {
            state.next_seq += 1;
            let seq = state.next_seq;
            state.chunks.push(Chunk {
                id: format!("{}#{}", document_id, seq),
                document_id: document_id.to_string(),
                chunk_index: i as i64,
                text: chunk.text.clone(),
                embedding,
                seq,
            });
        }
        state.dims = dims;
        Ok(chunks.len())
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        top_n: usize,
    ) -> StoreResult<Vec<ChunkMatch>> {
        if top_n == 0 {
            return Err(StoreError::InvalidTopN);
        }
        let state = self.read()?;
        if state.chunks.is_empty() {
            return Ok(Vec::new());
        }
        let q = prepare_query(state.dims, query)?;

        let matches = state
            .chunks
            .iter()
            .map(|c| ChunkMatch {
                chunk_id: c.id.clone(),
                document_id: c.document_id.clone(),
                file_name: state
                    .docs
                    .get(&c.document_id)
                    .map(|d| d.file_name.clone())
                    .unwrap_or_default(),
                text: c.text.clone(),
                score: unit_similarity(&q, &c.embedding),
                seq: c.seq,
            })
            .collect();
        Ok(rank_matches(matches, top_n))
    }

    async fn embedding_dims(&self) -> StoreResult<Option<usize>> {
        Ok(self.read()?.dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, name: &str, ts: i64) -> Document {
        Document {
            id: id.to_string(),
            file_name: name.to_string(),
            ingested_at: ts,
            content_type: "text/plain".to_string(),
            content_hash: String::new(),
        }
    }

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.upsert_document(&doc("d1", "a.txt", 1)).await.unwrap();
        store.upsert_document(&doc("d2", "b.txt", 2)).await.unwrap();
        store
            .upsert_chunks(
                "d1",
                &[
                    NewChunk::new("east", vec![1.0, 0.0]),
                    NewChunk::new("north", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store
            .upsert_chunks("d2", &[NewChunk::new("northeast", vec![2.0, 2.0])])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn empty_store_returns_empty() {
        let store = InMemoryStore::new();
        assert!(store.similarity_search(&[1.0, 0.0], 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_top_n_rejected() {
        let store = seeded().await;
        assert!(matches!(
            store.similarity_search(&[1.0, 0.0], 0).await,
            Err(StoreError::InvalidTopN)
        ));
    }

    #[tokio::test]
    async fn search_ranks_and_truncates() {
        let store = seeded().await;
        let results = store.similarity_search(&[10.0, 1.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "east");
        assert_eq!(results[1].text, "northeast");
        assert_eq!(results[1].file_name, "b.txt");
        for w in results.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
        for r in &results {
            assert!((-1.0..=1.0).contains(&r.score));
        }
    }

    #[tokio::test]
    async fn ties_prefer_most_recent_insert() {
        let store = InMemoryStore::new();
        store.upsert_document(&doc("d1", "a.txt", 1)).await.unwrap();
        store.upsert_document(&doc("d2", "b.txt", 2)).await.unwrap();
        store
            .upsert_chunks("d1", &[NewChunk::new("old", vec![1.0, 1.0])])
            .await
            .unwrap();
        store
            .upsert_chunks("d2", &[NewChunk::new("new", vec![3.0, 3.0])])
            .await
            .unwrap();
        let results = store.similarity_search(&[1.0, 1.0], 2).await.unwrap();
        assert_eq!(results[0].text, "new");
        assert_eq!(results[1].text, "old");
    }

    #[tokio::test]
    async fn replace_swaps_whole_set() {
        let store = seeded().await;
        store
            .upsert_chunks("d1", &[NewChunk::new("west", vec![-1.0, 0.0])])
            .await
            .unwrap();
        let chunks = store.document_chunks("d1").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "west");
    }

    #[tokio::test]
    async fn mismatched_dims_leave_prior_set() {
        let store = seeded().await;
        let err = store
            .upsert_chunks(
                "d1",
                &[
                    NewChunk::new("ok", vec![1.0, 0.0]),
                    NewChunk::new("bad", vec![1.0, 0.0, 0.0]),
                ],
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
        let texts: Vec<String> = store
            .document_chunks("d1")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, vec!["east", "north"]);
        assert_eq!(store.embedding_dims().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn unknown_document_rejected() {
        let store = InMemoryStore::new();
        let err = store
            .upsert_chunks("nope", &[NewChunk::new("x", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownDocument(_)));
    }

    #[tokio::test]
    async fn delete_cascades() {
        let store = seeded().await;
        assert!(store.delete_document("d1").await.unwrap());
        assert!(!store.delete_document("d1").await.unwrap());
        assert_eq!(store.document_count().await.unwrap(), 1);
        let results = store.similarity_search(&[1.0, 0.0], 5).await.unwrap();
        assert!(results.iter().all(|r| r.document_id == "d2"));
    }

    #[tokio::test]
    async fn list_and_find() {
        let store = seeded().await;
        let names: Vec<String> = store
            .list_documents()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.file_name)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        let found = store.find_document_by_name("b.txt").await.unwrap().unwrap();
        assert_eq!(found.id, "d2");
    }
}
