//! Model lifecycle manager.
//!
//! Owns the single [`ActiveBackend`] value for the process and every
//! operation that changes it: loading a catalog model, unloading, switching
//! to the remote API, and the download-then-activate flow.
//!
//! The active backend sits behind a `tokio::sync::RwLock`. [`ModelManager::generate`]
//! holds a read guard for the whole call; a swap takes the write guard, so
//! it waits for in-flight generations before the old model is unloaded.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use docqa_core::backend::{ActiveBackend, Credential, GenerationError, InferenceBackend};
use docqa_core::catalog::{self, CatalogEntry, CatalogError, LocalModelDescriptor};
use docqa_core::download::{DialogState, DownloadSession, Effect};

use crate::download::{DownloadRequest, DownloadTransport};
use crate::inference::LocalBackend;

/// Builds a remote backend for a credential.
pub type RemoteFactory =
    Arc<dyn Fn(Credential) -> Result<Arc<dyn InferenceBackend>, GenerationError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("model '{0}' is not downloaded")]
    NotDownloaded(String),

    #[error("a download of '{0}' is already running")]
    DownloadInProgress(String),

    #[error("failed to load model: {0}")]
    Load(#[from] GenerationError),
}

/// Result of [`ModelManager::download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// File was already installed; nothing was fetched.
    AlreadyPresent(PathBuf),
    /// Downloaded and loaded.
    Activated(PathBuf),
    /// Downloaded, but the runtime refused to load it.
    LoadFailed { path: PathBuf, reason: String },
    /// Transport reported a failure; reason is verbatim.
    Failed(String),
}

/// What the presentation layer renders for the models screen.
#[derive(Debug, Clone, Serialize)]
pub struct ModelsSnapshot {
    pub catalog: Vec<CatalogEntry>,
    pub dialog: DialogState,
    pub active: &'static str,
}

struct ActiveState {
    variant: ActiveBackend,
    remote: Option<Arc<dyn InferenceBackend>>,
}

/// Removes a model name from the in-flight set when dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.name);
        }
    }
}

pub struct ModelManager {
    catalog: Vec<LocalModelDescriptor>,
    models_dir: PathBuf,
    local: LocalBackend,
    remote_factory: RemoteFactory,
    transport: Arc<dyn DownloadTransport>,
    active: RwLock<ActiveState>,
    dialog: watch::Sender<DialogState>,
    downloads: Mutex<HashSet<String>>,
}

impl ModelManager {
    pub fn new(
        catalog: Vec<LocalModelDescriptor>,
        models_dir: PathBuf,
        local: LocalBackend,
        transport: Arc<dyn DownloadTransport>,
        remote_factory: RemoteFactory,
    ) -> Self {
        let (dialog, _) = watch::channel(DialogState::default());
        Self {
            catalog,
            models_dir,
            local,
            remote_factory,
            transport,
            active: RwLock::new(ActiveState {
                variant: ActiveBackend::None,
                remote: None,
            }),
            dialog,
            downloads: Mutex::new(HashSet::new()),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Catalog with derived flags recomputed against the active model.
    pub async fn catalog(&self) -> Vec<CatalogEntry> {
        let active = self.active.read().await;
        catalog::refresh(&self.catalog, &self.models_dir, active.variant.local_path())
    }

    pub async fn active(&self) -> ActiveBackend {
        self.active.read().await.variant.clone()
    }

    pub fn subscribe_dialog(&self) -> watch::Receiver<DialogState> {
        self.dialog.subscribe()
    }

    pub async fn snapshot(&self) -> ModelsSnapshot {
        let active = self.active.read().await;
        ModelsSnapshot {
            catalog: catalog::refresh(&self.catalog, &self.models_dir, active.variant.local_path()),
            dialog: self.dialog.borrow().clone(),
            active: active.variant.label(),
        }
    }

    fn descriptor(&self, name: &str) -> Result<&LocalModelDescriptor, ModelError> {
        Ok(catalog::find(&self.catalog, name)?)
    }

    /// Load a downloaded catalog model, replacing whatever is active.
    pub async fn activate(&self, name: &str) -> Result<PathBuf, ModelError> {
        let descriptor = self.descriptor(name)?;
        let path = descriptor.install_path(&self.models_dir)?;
        if !path.is_file() {
            return Err(ModelError::NotDownloaded(descriptor.name.clone()));
        }
        self.activate_path(&path).await?;
        Ok(path)
    }

    async fn activate_path(&self, path: &Path) -> Result<(), GenerationError> {
        let mut active = self.active.write().await;
        if active.variant.local_path() == Some(path) {
            debug!(model = %path.display(), "model already loaded");
            return Ok(());
        }

        match self.local.load(path).await {
            Ok(()) => {
                active.variant = ActiveBackend::Local(path.to_path_buf());
                active.remote = None;
                Ok(())
            }
            Err(e) => {
                // The previous model, if any, was unloaded before the attempt.
                if active.variant.is_local() {
                    active.variant = ActiveBackend::None;
                }
                Err(e)
            }
        }
    }

    pub async fn unload(&self) {
        let mut active = self.active.write().await;
        self.local.unload().await;
        if active.variant.is_local() {
            info!("local model unloaded");
        }
        active.variant = ActiveBackend::None;
        active.remote = None;
    }

    /// Make sure something can answer a query.
    ///
    /// A loaded local model wins. Otherwise `credential` selects the remote
    /// backend; without one this is [`GenerationError::MissingCredential`].
    pub async fn prepare_backend(
        &self,
        credential: Option<Credential>,
    ) -> Result<(), GenerationError> {
        {
            let active = self.active.read().await;
            match (&active.variant, &credential) {
                (ActiveBackend::Local(_), _) => return Ok(()),
                (ActiveBackend::Remote(current), Some(c)) if current == c => return Ok(()),
                _ => {}
            }
        }

        let credential = credential.ok_or(GenerationError::MissingCredential)?;
        let mut active = self.active.write().await;
        // A local model may have been loaded while we waited.
        if active.variant.is_local() {
            return Ok(());
        }
        let backend = (self.remote_factory)(credential.clone())?;
        info!(backend = backend.name(), "using remote backend");
        active.variant = ActiveBackend::Remote(credential);
        active.remote = Some(backend);
        Ok(())
    }

    /// Generate with the active backend, holding it stable for the call.
    pub async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let active = self.active.read().await;
        match (&active.variant, &active.remote) {
            (ActiveBackend::Local(_), _) => self.local.generate(prompt).await,
            (ActiveBackend::Remote(_), Some(remote)) => remote.generate(prompt).await,
            _ => Err(GenerationError::MissingCredential),
        }
    }

    /// Download a catalog model and activate it on success.
    ///
    /// Dialog state is published on [`subscribe_dialog`](Self::subscribe_dialog)
    /// after every status event.
    pub async fn download(
        &self,
        name: &str,
        hf_token: Option<&str>,
    ) -> Result<DownloadOutcome, ModelError> {
        let descriptor = self.descriptor(name)?;
        let path = descriptor.install_path(&self.models_dir)?;
        if path.is_file() {
            return Ok(DownloadOutcome::AlreadyPresent(path));
        }

        let _in_flight = {
            let mut set = self
                .downloads
                .lock()
                .map_err(|_| ModelError::DownloadInProgress(descriptor.name.clone()))?;
            if !set.insert(descriptor.name.clone()) {
                return Err(ModelError::DownloadInProgress(descriptor.name.clone()));
            }
            InFlight {
                set: &self.downloads,
                name: descriptor.name.clone(),
            }
        };

        let mut headers = Vec::new();
        if let Some(token) = hf_token.map(str::trim).filter(|t| !t.is_empty()) {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        } else if descriptor.gated {
            warn!(model = %descriptor.name, "gated model and no Hugging Face token is set");
        }

        let request = DownloadRequest {
            url: descriptor.download_url.clone(),
            dest_dir: self.models_dir.clone(),
            file_name: descriptor.file_name()?,
            headers,
        };
        let (session_id, mut statuses) = self.transport.start(request);
        info!(model = %descriptor.name, session = %session_id, "download started");

        let mut session = DownloadSession::new(descriptor.name.clone());
        while let Some(status) = statuses.next().await {
            let effect = session.apply(status);
            if effect != Effect::Ignored {
                self.dialog.send_replace(session.dialog());
            }
            match effect {
                Effect::Activate => {
                    return Ok(match self.activate_path(&path).await {
                        Ok(()) => DownloadOutcome::Activated(path),
                        Err(e) => DownloadOutcome::LoadFailed {
                            path,
                            reason: e.to_string(),
                        },
                    });
                }
                Effect::Fail(reason) => return Ok(DownloadOutcome::Failed(reason)),
                Effect::Updated | Effect::Ignored => {}
            }
        }

        self.dialog.send_replace(DialogState::default());
        Ok(DownloadOutcome::Failed(
            "download ended without a result".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::StatusStream;
    use crate::inference::{Increments, LocalRuntime};
    use async_trait::async_trait;
    use docqa_core::download::DownloadStatus;
    use tokio::sync::mpsc;

    struct Quiet;

    #[async_trait]
    impl LocalRuntime for Quiet {
        async fn load(&self, _: &Path) -> Result<(), GenerationError> {
            Ok(())
        }
        async fn generate_stream(&self, _: &str) -> Result<Increments, GenerationError> {
            let (tx, rx) = mpsc::channel(1);
            tx.send(Ok("local answer".to_string())).await.ok();
            Ok(rx)
        }
        async fn unload(&self) {}
    }

    /// Replays a fixed status list, writing the file when it ends in success.
    struct Scripted(Vec<DownloadStatus>);

    impl DownloadTransport for Scripted {
        fn start(&self, request: DownloadRequest) -> (String, StatusStream) {
            if self.0.last() == Some(&DownloadStatus::Succeeded) {
                std::fs::create_dir_all(&request.dest_dir).unwrap();
                std::fs::write(request.dest_path(), b"weights").unwrap();
            }
            (
                "s1".to_string(),
                Box::pin(futures_util::stream::iter(self.0.clone())),
            )
        }
    }

    struct Canned;

    #[async_trait]
    impl InferenceBackend for Canned {
        fn name(&self) -> &str {
            "canned"
        }
        async fn generate(&self, _: &str) -> Result<String, GenerationError> {
            Ok("remote answer".to_string())
        }
    }

    fn manager(dir: &Path, script: Vec<DownloadStatus>) -> ModelManager {
        ModelManager::new(
            vec![
                LocalModelDescriptor::new("A", "", "https://h/r/a.gguf", false),
                LocalModelDescriptor::new("B", "", "https://h/r/b.gguf", true),
            ],
            dir.to_path_buf(),
            LocalBackend::new(Arc::new(Quiet)),
            Arc::new(Scripted(script)),
            Arc::new(|_c: Credential| -> Result<Arc<dyn InferenceBackend>, GenerationError> {
                Ok(Arc::new(Canned))
            }),
        )
    }

    #[tokio::test]
    async fn activate_requires_download() {
        let tmp = tempfile::TempDir::new().unwrap();
        let m = manager(tmp.path(), vec![]);
        assert!(matches!(m.activate("A").await, Err(ModelError::NotDownloaded(_))));
        assert!(matches!(m.activate("Z").await, Err(ModelError::Catalog(_))));
    }

    #[tokio::test]
    async fn only_one_entry_loaded_after_swap() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.gguf"), b"x").unwrap();
        std::fs::write(tmp.path().join("b.gguf"), b"x").unwrap();
        let m = manager(tmp.path(), vec![]);

        m.activate("A").await.unwrap();
        m.activate("b").await.unwrap();
        let loaded: Vec<String> = m
            .catalog()
            .await
            .into_iter()
            .filter(|e| e.is_loaded)
            .map(|e| e.descriptor.name)
            .collect();
        assert_eq!(loaded, vec!["B"]);

        m.unload().await;
        assert_eq!(m.active().await, ActiveBackend::None);
        assert!(m.catalog().await.iter().all(|e| !e.is_loaded));
    }

    #[tokio::test]
    async fn download_success_activates_and_hides_dialog() {
        let tmp = tempfile::TempDir::new().unwrap();
        let m = manager(
            tmp.path(),
            vec![
                DownloadStatus::Queued,
                DownloadStatus::Started,
                DownloadStatus::InProgress(10),
                DownloadStatus::InProgress(55),
                DownloadStatus::Succeeded,
            ],
        );
        let dialog = m.subscribe_dialog();

        let outcome = m.download("A", None).await.unwrap();
        assert_eq!(outcome, DownloadOutcome::Activated(tmp.path().join("a.gguf")));
        assert!(!dialog.borrow().visible);
        assert!(m.active().await.is_local());

        // Second request is a no-op.
        assert!(matches!(
            m.download("A", None).await.unwrap(),
            DownloadOutcome::AlreadyPresent(_)
        ));
    }

    #[tokio::test]
    async fn download_failure_activates_nothing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let m = manager(
            tmp.path(),
            vec![
                DownloadStatus::Queued,
                DownloadStatus::Started,
                DownloadStatus::Failed("network timeout".to_string()),
            ],
        );
        let outcome = m.download("B", Some("hf_x")).await.unwrap();
        assert_eq!(outcome, DownloadOutcome::Failed("network timeout".to_string()));
        assert!(!m.subscribe_dialog().borrow().visible);
        assert_eq!(m.active().await, ActiveBackend::None);
    }

    #[tokio::test]
    async fn stream_without_terminal_event_is_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let m = manager(tmp.path(), vec![DownloadStatus::Queued, DownloadStatus::Started]);
        assert!(matches!(
            m.download("A", None).await.unwrap(),
            DownloadOutcome::Failed(_)
        ));
        assert!(!m.subscribe_dialog().borrow().visible);
    }

    #[tokio::test]
    async fn backend_selection() {
        let tmp = tempfile::TempDir::new().unwrap();
        let m = manager(tmp.path(), vec![]);

        assert_eq!(
            m.prepare_backend(None).await,
            Err(GenerationError::MissingCredential)
        );
        assert_eq!(m.generate("q").await, Err(GenerationError::MissingCredential));

        m.prepare_backend(Credential::new("key")).await.unwrap();
        assert_eq!(m.generate("q").await.unwrap(), "remote answer");

        std::fs::write(tmp.path().join("a.gguf"), b"x").unwrap();
        m.activate("A").await.unwrap();
        m.prepare_backend(Credential::new("key")).await.unwrap();
        assert_eq!(m.generate("q").await.unwrap(), "local answer");
    }
}
