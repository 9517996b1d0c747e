//! Ingestion pipeline: file → text → chunks → embeddings → store.
//!
//! Documents are keyed by display file name. Re-ingesting a name whose
//! extracted text hashes the same is a no-op; a changed text replaces the
//! document's chunks in one atomic [`Store::upsert_chunks`] call. All
//! embedding happens before the store is touched, so a provider failure
//! leaves the corpus exactly as it was.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use docqa_core::chunk::split_text;
use docqa_core::embedding::EmbeddingProvider;
use docqa_core::models::{Document, NewChunk};
use docqa_core::store::Store;

use crate::config::{ChunkingConfig, Config};
use crate::extract::{content_type_for_path, extract_text};

/// What happened to one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Added { doc_id: String, chunks: usize },
    Replaced { doc_id: String, chunks: usize },
    Unchanged { doc_id: String },
    Skipped { reason: String },
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub added: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub chunks_written: usize,
    pub skipped: Vec<(PathBuf, String)>,
    pub failed: Vec<(PathBuf, String)>,
}

impl IngestReport {
    fn record(&mut self, path: &Path, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Added { chunks, .. } => {
                self.added += 1;
                self.chunks_written += chunks;
            }
            IngestOutcome::Replaced { chunks, .. } => {
                self.replaced += 1;
                self.chunks_written += chunks;
            }
            IngestOutcome::Unchanged { .. } => self.unchanged += 1,
            IngestOutcome::Skipped { reason } => self.skipped.push((path.to_path_buf(), reason)),
        }
    }
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Ingest already-extracted text under `file_name`.
pub async fn ingest_text(
    store: &dyn Store,
    embedder: &dyn EmbeddingProvider,
    chunking: &ChunkingConfig,
    file_name: &str,
    content_type: &str,
    text: &str,
) -> Result<IngestOutcome> {
    if text.trim().is_empty() {
        return Ok(IngestOutcome::Skipped {
            reason: "no extractable text".to_string(),
        });
    }

    let hash = content_hash(text);
    let existing = store.find_document_by_name(file_name).await?;
    if let Some(doc) = &existing {
        if doc.content_hash == hash {
            debug!(file_name, doc_id = %doc.id, "content unchanged, skipping");
            return Ok(IngestOutcome::Unchanged {
                doc_id: doc.id.clone(),
            });
        }
    }

    let pieces = split_text(text, chunking.chunk_size, chunking.overlap);
    let vectors = embedder
        .embed(&pieces)
        .await
        .with_context(|| format!("Failed to embed {}", file_name))?;
    if vectors.len() != pieces.len() {
        bail!(
            "Embedding provider returned {} vectors for {} chunks",
            vectors.len(),
            pieces.len()
        );
    }
    let chunks: Vec<NewChunk> = pieces
        .into_iter()
        .zip(vectors)
        .map(|(text, embedding)| NewChunk::new(text, embedding))
        .collect();

    let is_new = existing.is_none();
    let doc = Document {
        id: existing
            .map(|d| d.id)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        file_name: file_name.to_string(),
        ingested_at: chrono::Utc::now().timestamp(),
        content_type: content_type.to_string(),
        content_hash: hash,
    };

    if is_new {
        store.upsert_document(&doc).await?;
        match store.upsert_chunks(&doc.id, &chunks).await {
            Ok(n) => Ok(IngestOutcome::Added {
                doc_id: doc.id,
                chunks: n,
            }),
            Err(e) => {
                // A document with no chunks would count as corpus content.
                if let Err(cleanup) = store.delete_document(&doc.id).await {
                    warn!(doc_id = %doc.id, error = %cleanup, "failed to roll back document");
                }
                Err(e).with_context(|| format!("Failed to store chunks for {}", file_name))
            }
        }
    } else {
        let n = store
            .upsert_chunks(&doc.id, &chunks)
            .await
            .with_context(|| format!("Failed to replace chunks for {}", file_name))?;
        store.upsert_document(&doc).await?;
        Ok(IngestOutcome::Replaced {
            doc_id: doc.id,
            chunks: n,
        })
    }
}

/// Extract and ingest one file.
pub async fn ingest_file(
    store: &dyn Store,
    embedder: &dyn EmbeddingProvider,
    chunking: &ChunkingConfig,
    path: &Path,
) -> Result<IngestOutcome> {
    let Some(content_type) = content_type_for_path(path) else {
        return Ok(IngestOutcome::Skipped {
            reason: "unsupported file type".to_string(),
        });
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| anyhow::anyhow!("Not a file path: {}", path.display()))?;

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let owned_type = content_type.to_string();
    let text = tokio::task::spawn_blocking(move || extract_text(&bytes, &owned_type)).await?;
    let text = match text {
        Ok(t) => t,
        Err(e) => {
            return Ok(IngestOutcome::Skipped {
                reason: e.to_string(),
            })
        }
    };

    ingest_text(store, embedder, chunking, &file_name, content_type, &text).await
}

/// Expand directories into the supported files beneath them.
///
/// Explicit file arguments are kept even when their extension is
/// unsupported, so the report can say why they were skipped.
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            bail!("Path does not exist: {}", path.display());
        }
        for entry in WalkDir::new(path) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let hidden = entry
                .path()
                .strip_prefix(path)
                .map(|rel| {
                    rel.components()
                        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
                })
                .unwrap_or(false);
            if hidden || content_type_for_path(entry.path()).is_none() {
                continue;
            }
            files.push(entry.into_path());
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Ingest every path, continuing past per-file failures.
pub async fn ingest_paths(
    store: &dyn Store,
    embedder: &dyn EmbeddingProvider,
    chunking: &ChunkingConfig,
    paths: &[PathBuf],
) -> Result<IngestReport> {
    let files = collect_files(paths)?;
    let mut report = IngestReport::default();

    for path in &files {
        match ingest_file(store, embedder, chunking, path).await {
            Ok(outcome) => {
                info!(path = %path.display(), ?outcome, "ingested");
                report.record(path, outcome);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{:#}", e), "ingest failed");
                report.failed.push((path.clone(), format!("{:#}", e)));
            }
        }
    }
    Ok(report)
}

/// `docqa ingest` entry point.
pub async fn run_ingest(config: &Config, paths: &[PathBuf]) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embeddings are disabled. Set [embedding] provider in the config before ingesting.");
    }
    let store = crate::open_store(config).await?;
    let embedder = crate::embedding::create_provider(&config.embedding)?;

    let report = ingest_paths(store.as_ref(), embedder.as_ref(), &config.chunking, paths).await?;

    println!("ingest");
    println!("  added: {}", report.added);
    println!("  replaced: {}", report.replaced);
    println!("  unchanged: {}", report.unchanged);
    println!("  chunks written: {}", report.chunks_written);
    for (path, reason) in &report.skipped {
        println!("  skipped {}: {}", path.display(), reason);
    }
    for (path, reason) in &report.failed {
        println!("  failed {}: {}", path.display(), reason);
    }

    if !report.failed.is_empty() && report.added + report.replaced + report.unchanged == 0 {
        bail!("No files were ingested");
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docqa_core::store::memory::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts words per letter bucket; deterministic and 4-dimensional.
    struct Letters {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for Letters {
        fn model_name(&self) -> &str {
            "letters"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; 4];
                    for w in t.split_whitespace() {
                        let b = w.bytes().next().unwrap_or(0) as usize % 4;
                        v[b] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl EmbeddingProvider for Broken {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("provider offline")
        }
    }

    fn chunking() -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: 4,
            overlap: 1,
        }
    }

    fn letters() -> Letters {
        Letters {
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn add_then_unchanged_then_replace() {
        let store = InMemoryStore::new();
        let emb = letters();
        let text = "alpha beta gamma delta epsilon zeta";

        let first = ingest_text(&store, &emb, &chunking(), "a.txt", "text/plain", text)
            .await
            .unwrap();
        let IngestOutcome::Added { doc_id, chunks } = first else {
            panic!("first ingest should add the document");
        };
        assert_eq!(chunks, 2);

        let again = ingest_text(&store, &emb, &chunking(), "a.txt", "text/plain", text)
            .await
            .unwrap();
        assert_eq!(again, IngestOutcome::Unchanged { doc_id: doc_id.clone() });
        assert_eq!(emb.calls.load(Ordering::SeqCst), 1);

        let changed = ingest_text(&store, &emb, &chunking(), "a.txt", "text/plain", "one two")
            .await
            .unwrap();
        assert_eq!(changed, IngestOutcome::Replaced { doc_id: doc_id.clone(), chunks: 1 });
        assert_eq!(store.document_count().await.unwrap(), 1);
        assert_eq!(store.document_chunks(&doc_id).await.unwrap()[0].text, "one two");
    }

    #[tokio::test]
    async fn blank_text_is_skipped() {
        let store = InMemoryStore::new();
        let out = ingest_text(&store, &letters(), &chunking(), "e.txt", "text/plain", "  \n ")
            .await
            .unwrap();
        assert!(matches!(out, IngestOutcome::Skipped { .. }));
        assert_eq!(store.document_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn embedding_failure_leaves_store_untouched() {
        let store = InMemoryStore::new();
        let err = ingest_text(&store, &Broken, &chunking(), "a.txt", "text/plain", "some words")
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("provider offline"));
        assert_eq!(store.document_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_chunk_write_rolls_back_new_document() {
        let store = InMemoryStore::new();
        ingest_text(&store, &letters(), &chunking(), "a.txt", "text/plain", "a b c")
            .await
            .unwrap();

        // Store dims are now 4; a 3-dim provider must not leave an empty doc behind.
        struct Three;
        #[async_trait]
        impl EmbeddingProvider for Three {
            fn model_name(&self) -> &str {
                "three"
            }
            fn dims(&self) -> usize {
                3
            }
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
            }
        }
        assert!(ingest_text(&store, &Three, &chunking(), "b.txt", "text/plain", "x y")
            .await
            .is_err());
        assert_eq!(store.document_count().await.unwrap(), 1);
        assert!(store.find_document_by_name("b.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn paths_walked_and_reported() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("paris.txt"), "Paris is the capital of France.").unwrap();
        std::fs::write(tmp.path().join("notes.md"), "# Notes\nBerlin is in Germany.").unwrap();
        std::fs::write(tmp.path().join("image.png"), [0u8, 1, 2]).unwrap();
        std::fs::create_dir(tmp.path().join(".hidden")).unwrap();
        std::fs::write(tmp.path().join(".hidden/secret.txt"), "hidden").unwrap();

        let files = collect_files(&[tmp.path().to_path_buf()]).unwrap();
        assert_eq!(files.len(), 2);

        let store = InMemoryStore::new();
        let report = ingest_paths(&store, &letters(), &chunking(), &[tmp.path().to_path_buf()])
            .await
            .unwrap();
        assert_eq!(report.added, 2);
        assert!(report.failed.is_empty());
        assert_eq!(store.document_count().await.unwrap(), 2);
    }

    #[test]
    fn missing_path_is_error() {
        assert!(collect_files(&[PathBuf::from("/definitely/not/here")]).is_err());
    }
}
