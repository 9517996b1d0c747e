//! Local on-device backend.
//!
//! A [`LocalRuntime`] owns the actual model. Generation runs on the
//! runtime's own task and is delivered as a channel of text increments;
//! [`LocalBackend`] concatenates them so callers only ever see the final
//! string.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use docqa_core::backend::{GenerationError, InferenceBackend};

/// Partial results of one generation, in order. A closed channel means done.
pub type Increments = mpsc::Receiver<Result<String, GenerationError>>;

#[async_trait]
pub trait LocalRuntime: Send + Sync {
    /// Load the model file. Called only while nothing is loaded.
    async fn load(&self, path: &Path) -> Result<(), GenerationError>;

    async fn generate_stream(&self, prompt: &str) -> Result<Increments, GenerationError>;

    /// Release the model. Idempotent.
    async fn unload(&self);
}

/// Process-wide local model slot. Holds at most one loaded model.
pub struct LocalBackend {
    runtime: Arc<dyn LocalRuntime>,
    loaded: Mutex<Option<PathBuf>>,
}

impl LocalBackend {
    pub fn new(runtime: Arc<dyn LocalRuntime>) -> Self {
        Self {
            runtime,
            loaded: Mutex::new(None),
        }
    }

    /// Load `path`, unloading whatever was loaded first.
    ///
    /// On failure nothing is loaded.
    pub async fn load(&self, path: &Path) -> Result<(), GenerationError> {
        let mut loaded = self.loaded.lock().await;
        if let Some(prev) = loaded.take() {
            self.runtime.unload().await;
            info!(model = %prev.display(), "unloaded local model");
        }
        self.runtime.load(path).await?;
        info!(model = %path.display(), "loaded local model");
        *loaded = Some(path.to_path_buf());
        Ok(())
    }

    pub async fn unload(&self) {
        let mut loaded = self.loaded.lock().await;
        if let Some(prev) = loaded.take() {
            self.runtime.unload().await;
            info!(model = %prev.display(), "unloaded local model");
        }
    }

    pub async fn loaded_path(&self) -> Option<PathBuf> {
        self.loaded.lock().await.clone()
    }
}

#[async_trait]
impl InferenceBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        if self.loaded.lock().await.is_none() {
            return Err(GenerationError::NotLoaded);
        }

        let mut increments = self.runtime.generate_stream(prompt).await?;
        let mut out = String::new();
        let mut parts = 0usize;
        while let Some(piece) = increments.recv().await {
            out.push_str(&piece?);
            parts += 1;
        }
        debug!(parts, chars = out.len(), "local generation finished");
        Ok(out)
    }
}
