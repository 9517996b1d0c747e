//! SQLite-backed [`Store`] implementation.
//!
//! Documents and chunks live in the `documents` / `chunks` tables created by
//! [`migrate::apply_schema`](crate::migrate::apply_schema). Embeddings are
//! stored unit-length as little-endian f32 BLOBs; the store-wide dimension
//! is recorded in the `meta` table by the first chunk batch ever written.
//!
//! Chunk replacement runs in a single transaction, so a reader on another
//! pooled connection sees either the old chunk set or the new one.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use docqa_core::embedding::{blob_to_vec, unit_similarity, vec_to_blob};
use docqa_core::models::{Chunk, ChunkMatch, Document, NewChunk};
use docqa_core::store::{
    prepare_embeddings, prepare_query, rank_matches, Store, StoreError, StoreResult,
};

const DIMS_KEY: &str = "embedding_dims";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Read a value from the `meta` table.
    pub async fn meta(&self, key: &str) -> anyhow::Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read meta key '{}'", key))
    }

    /// Set (`Some`) or clear (`None`) a `meta` value.
    pub async fn set_meta(&self, key: &str, value: Option<&str>) -> anyhow::Result<()> {
        match value {
            Some(v) => {
                sqlx::query(
                    "INSERT INTO meta (key, value) VALUES (?, ?) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                )
                .bind(key)
                .bind(v)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query("DELETE FROM meta WHERE key = ?")
                    .bind(key)
                    .execute(&self.pool)
                    .await
            }
        }
        .with_context(|| format!("Failed to write meta key '{}'", key))?;
        Ok(())
    }
}

fn io<E>(context: &'static str) -> impl FnOnce(E) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |e| StoreError::Io(anyhow::Error::new(e).context(context))
}

fn row_to_document(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        file_name: row.get("file_name"),
        ingested_at: row.get("ingested_at"),
        content_type: row.get("content_type"),
        content_hash: row.get("content_hash"),
    }
}

async fn read_dims(conn: &mut SqliteConnection) -> StoreResult<Option<usize>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
        .bind(DIMS_KEY)
        .fetch_optional(&mut *conn)
        .await
        .map_err(io("failed to read embedding dims"))?;

    match value {
        None => Ok(None),
        Some(v) => v
            .parse::<usize>()
            .map(Some)
            .with_context(|| format!("corrupt {} value: {}", DIMS_KEY, v))
            .map_err(StoreError::Io),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_document(&self, doc: &Document) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, file_name, ingested_at, content_type, content_hash)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                file_name = excluded.file_name,
                ingested_at = excluded.ingested_at,
                content_type = excluded.content_type,
                content_hash = excluded.content_hash
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.file_name)
        .bind(doc.ingested_at)
        .bind(&doc.content_type)
        .bind(&doc.content_hash)
        .execute(&self.pool)
        .await
        .map_err(io("failed to upsert document"))?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> StoreResult<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, file_name, ingested_at, content_type, content_hash FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(io("failed to load document"))?;
        Ok(row.as_ref().map(row_to_document))
    }

    async fn find_document_by_name(&self, file_name: &str) -> StoreResult<Option<Document>> {
        let row = sqlx::query(
            r#"
            SELECT id, file_name, ingested_at, content_type, content_hash
            FROM documents WHERE file_name = ?
            ORDER BY ingested_at DESC
            LIMIT 1
            "#,
        )
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(io("failed to look up document"))?;
        Ok(row.as_ref().map(row_to_document))
    }

    async fn list_documents(&self) -> StoreResult<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, file_name, ingested_at, content_type, content_hash FROM documents ORDER BY ingested_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(io("failed to list documents"))?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    async fn delete_document(&self, id: &str) -> StoreResult<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(io("failed to begin transaction"))?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(io("failed to delete chunks"))?;

        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(io("failed to delete document"))?;

        tx.commit().await.map_err(io("failed to commit delete"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn document_count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(io("failed to count documents"))?;
        Ok(count as u64)
    }

    async fn document_chunks(&self, document_id: &str) -> StoreResult<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, id, document_id, chunk_index, text, embedding
            FROM chunks WHERE document_id = ?
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(io("failed to load chunks"))?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                Chunk {
                    id: row.get("id"),
                    document_id: row.get("document_id"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    embedding: blob_to_vec(&blob),
                    seq: row.get("seq"),
                }
            })
            .collect())
    }

    async fn upsert_chunks(&self, document_id: &str, chunks: &[NewChunk]) -> StoreResult<usize> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(io("failed to begin transaction"))?;

        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(io("failed to check document"))?;
        if !exists {
            return Err(StoreError::UnknownDocument(document_id.to_string()));
        }

        let store_dims = read_dims(&mut *tx).await?;
        let (dims, vectors) = prepare_embeddings(store_dims, chunks)?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(io("failed to clear chunks"))?;

        for (i, (chunk, vector)) in chunks.iter().zip(&vectors).enumerate() {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, text, dims, embedding) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(document_id)
            .bind(i as i64)
            .bind(&chunk.text)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await
            .map_err(io("failed to insert chunk"))?;
        }

        if store_dims.is_none() {
            if let Some(d) = dims {
                sqlx::query("INSERT INTO meta (key, value) VALUES (?, ?)")
                    .bind(DIMS_KEY)
                    .bind(d.to_string())
                    .execute(&mut *tx)
                    .await
                    .map_err(io("failed to record embedding dims"))?;
            }
        }

        tx.commit().await.map_err(io("failed to commit chunks"))?;
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

        // One read transaction so dims and rows come from the same snapshot.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(io("failed to begin transaction"))?;

        let rows = sqlx::query(
            r#"
            SELECT c.seq, c.id, c.document_id, c.text, c.embedding, d.file_name
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(io("failed to scan chunks"))?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let store_dims = read_dims(&mut *tx).await?;
        tx.commit().await.map_err(io("failed to end read"))?;

        let q = prepare_query(store_dims, query)?;

        let matches = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ChunkMatch {
                    chunk_id: row.get("id"),
                    document_id: row.get("document_id"),
                    file_name: row.get("file_name"),
                    text: row.get("text"),
                    score: unit_similarity(&q, &blob_to_vec(&blob)),
                    seq: row.get("seq"),
                }
            })
            .collect();

        Ok(rank_matches(matches, top_n))
    }

    async fn embedding_dims(&self) -> StoreResult<Option<usize>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(io("failed to acquire connection"))?;
        read_dims(&mut *conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn open() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("docqa.sqlite"))
            .await
            .unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn doc(id: &str, name: &str) -> Document {
        Document {
            id: id.to_string(),
            file_name: name.to_string(),
            ingested_at: 1_700_000_000,
            content_type: "text/plain".to_string(),
            content_hash: "h".to_string(),
        }
    }

    #[tokio::test]
    async fn empty_store_returns_empty() {
        let (_tmp, store) = open().await;
        assert!(store.similarity_search(&[1.0, 0.0], 5).await.unwrap().is_empty());
        assert_eq!(store.embedding_dims().await.unwrap(), None);
        assert!(matches!(
            store.similarity_search(&[1.0], 0).await,
            Err(StoreError::InvalidTopN)
        ));
    }

    #[tokio::test]
    async fn search_ranks_and_breaks_ties_by_recency() {
        let (_tmp, store) = open().await;
        store.upsert_document(&doc("d1", "a.txt")).await.unwrap();
        store.upsert_document(&doc("d2", "b.txt")).await.unwrap();
        store
            .upsert_chunks(
                "d1",
                &[
                    NewChunk::new("old east", vec![1.0, 0.0]),
                    NewChunk::new("north", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store
            .upsert_chunks("d2", &[NewChunk::new("new east", vec![3.0, 0.0])])
            .await
            .unwrap();

        let hits = store.similarity_search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "new east");
        assert_eq!(hits[0].file_name, "b.txt");
        assert_eq!(hits[1].text, "old east");
        assert!(hits.iter().all(|h| (-1.0..=1.0).contains(&h.score)));
        assert_eq!(store.embedding_dims().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn failed_replace_keeps_prior_chunks() {
        let (_tmp, store) = open().await;
        store.upsert_document(&doc("d1", "a.txt")).await.unwrap();
        store
            .upsert_chunks("d1", &[NewChunk::new("keep", vec![1.0, 0.0])])
            .await
            .unwrap();

        let err = store
            .upsert_chunks("d1", &[NewChunk::new("bad", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 2, actual: 3 }));

        let chunks = store.document_chunks("d1").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "keep");
    }

    #[tokio::test]
    async fn replace_swaps_whole_set() {
        let (_tmp, store) = open().await;
        store.upsert_document(&doc("d1", "a.txt")).await.unwrap();
        store
            .upsert_chunks(
                "d1",
                &[NewChunk::new("a", vec![1.0, 0.0]), NewChunk::new("b", vec![0.0, 1.0])],
            )
            .await
            .unwrap();
        store
            .upsert_chunks("d1", &[NewChunk::new("c", vec![1.0, 1.0])])
            .await
            .unwrap();

        let texts: Vec<String> = store
            .document_chunks("d1")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, vec!["c"]);
    }

    fn chunk_set(tag: &str) -> Vec<NewChunk> {
        (0..50)
            .map(|i| NewChunk::new(format!("{tag}-{i}"), vec![1.0, i as f32]))
            .collect()
    }

    fn single_set(texts: &[String]) -> bool {
        let tag = texts[0].split('-').next().unwrap_or_default().to_string();
        texts.len() == 50 && texts.iter().all(|t| t.starts_with(&format!("{tag}-")))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_see_half_replaced_set() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let (_tmp, store) = open().await;
        let store = Arc::new(store);
        store.upsert_document(&doc("d1", "a.txt")).await.unwrap();
        store.upsert_chunks("d1", &chunk_set("a")).await.unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let writer = {
            let store = store.clone();
            let done = done.clone();
            tokio::spawn(async move {
                for round in 0..30 {
                    let tag = if round % 2 == 0 { "b" } else { "a" };
                    store.upsert_chunks("d1", &chunk_set(tag)).await.unwrap();
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let mut readers = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            let done = done.clone();
            readers.push(tokio::spawn(async move {
                let mut reads = 0;
                while !done.load(Ordering::SeqCst) || reads == 0 {
                    let chunks = store.document_chunks("d1").await.unwrap();
                    let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();
                    assert!(single_set(&texts), "mixed chunk set: {texts:?}");

                    let hits = store.similarity_search(&[1.0, 0.0], 100).await.unwrap();
                    let texts: Vec<String> = hits.into_iter().map(|h| h.text).collect();
                    assert!(single_set(&texts), "mixed search result: {texts:?}");
                    reads += 1;
                }
                reads
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            assert!(reader.await.unwrap() > 0);
        }
    }

    #[tokio::test]
    async fn delete_cascades_to_chunks() {
        let (_tmp, store) = open().await;
        store.upsert_document(&doc("d1", "a.txt")).await.unwrap();
        store
            .upsert_chunks("d1", &[NewChunk::new("x", vec![1.0])])
            .await
            .unwrap();

        assert!(store.delete_document("d1").await.unwrap());
        assert!(!store.delete_document("d1").await.unwrap());
        assert_eq!(store.document_count().await.unwrap(), 0);
        assert!(store.similarity_search(&[1.0], 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_document_rejected() {
        let (_tmp, store) = open().await;
        let err = store
            .upsert_chunks("nope", &[NewChunk::new("x", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownDocument(_)));
    }

    #[tokio::test]
    async fn find_by_name_and_list() {
        let (_tmp, store) = open().await;
        store.upsert_document(&doc("d1", "a.txt")).await.unwrap();
        let found = store.find_document_by_name("a.txt").await.unwrap().unwrap();
        assert_eq!(found.id, "d1");
        assert!(store.find_document_by_name("z.txt").await.unwrap().is_none());
        assert_eq!(store.list_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn meta_set_and_clear() {
        let (_tmp, store) = open().await;
        assert_eq!(store.meta("active_model").await.unwrap(), None);
        store.set_meta("active_model", Some("A")).await.unwrap();
        store.set_meta("active_model", Some("B")).await.unwrap();
        assert_eq!(store.meta("active_model").await.unwrap().as_deref(), Some("B"));
        store.set_meta("active_model", None).await.unwrap();
        assert_eq!(store.meta("active_model").await.unwrap(), None);
    }
}
