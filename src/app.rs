//! Wiring: build the store, credential store, model manager and orchestrator
//! from a [`Config`].
//!
//! The CLI is one process per command, so the chosen local model is
//! remembered in the `meta` table under [`ACTIVE_MODEL_KEY`] and reloaded by
//! [`App::restore_active_model`] before a question is answered.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use docqa_core::backend::{Credential, GenerationError, InferenceBackend};
use docqa_core::embedding::EmbeddingProvider;

use crate::config::Config;
use crate::credentials::{CredentialKind, CredentialStore, KeyringStore};
use crate::download::HttpTransport;
use crate::inference::{LlamaServerRuntime, LocalBackend, RemoteBackend};
use crate::lifecycle::{ModelError, ModelManager, RemoteFactory};
use crate::orchestrator::Orchestrator;
use crate::sqlite_store::SqliteStore;

pub const ACTIVE_MODEL_KEY: &str = "active_model";

pub struct App {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub models: Arc<ModelManager>,
}

/// Model manager backed by `llama-server`, HTTP downloads and the remote API.
pub fn build_model_manager(config: &Config) -> ModelManager {
    let remote = config.remote.clone();
    let factory: RemoteFactory = Arc::new(
        move |credential: Credential| -> Result<Arc<dyn InferenceBackend>, GenerationError> {
            Ok(Arc::new(RemoteBackend::new(&remote, credential)?))
        },
    );
    ModelManager::new(
        config.models.catalog(),
        config.models.dir.clone(),
        LocalBackend::new(Arc::new(LlamaServerRuntime::new(&config.models))),
        Arc::new(HttpTransport::new()),
        factory,
    )
}

impl App {
    pub async fn open(config: &Config) -> Result<Self> {
        let store = crate::open_store(config).await?;
        let credentials: Arc<dyn CredentialStore> =
            Arc::new(KeyringStore::new(config.credentials.service.clone()));
        Ok(Self::from_parts(
            config.clone(),
            store,
            credentials,
            Arc::new(build_model_manager(config)),
        ))
    }

    pub fn from_parts(
        config: Config,
        store: Arc<SqliteStore>,
        credentials: Arc<dyn CredentialStore>,
        models: Arc<ModelManager>,
    ) -> Self {
        Self {
            config,
            store,
            credentials,
            models,
        }
    }

    /// Load the model recorded by a previous `models use` or download.
    ///
    /// A remembered model whose file has since disappeared is forgotten.
    pub async fn restore_active_model(&self) -> Result<Option<String>> {
        let Some(name) = self.store.meta(ACTIVE_MODEL_KEY).await? else {
            return Ok(None);
        };
        match self.models.activate(&name).await {
            Ok(path) => {
                info!(model = %name, path = %path.display(), "restored local model");
                Ok(Some(name))
            }
            Err(e @ (ModelError::NotDownloaded(_) | ModelError::Catalog(_))) => {
                warn!(model = %name, error = %e, "forgetting unavailable local model");
                self.remember_active_model(None).await?;
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to load model '{}'", name)),
        }
    }

    pub async fn remember_active_model(&self, name: Option<&str>) -> Result<()> {
        self.store.set_meta(ACTIVE_MODEL_KEY, name).await
    }

    pub async fn hf_token(&self) -> Option<String> {
        match self.credentials.get(CredentialKind::HfAccessToken).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "could not read Hugging Face token");
                None
            }
        }
    }

    pub fn orchestrator(&self, embedder: Arc<dyn EmbeddingProvider>) -> Result<Orchestrator> {
        Ok(Orchestrator::new(
            self.store.clone(),
            embedder,
            self.credentials.clone(),
            self.models.clone(),
            self.config.retrieval.template()?,
            self.config.retrieval.top_n,
        ))
    }
}
