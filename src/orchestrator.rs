//! Query orchestration: validate, retrieve, render, generate.
//!
//! [`Orchestrator::submit`] runs one question end to end and publishes the
//! result as a [`ChatSnapshot`] on a `watch` channel. Only the orchestrator
//! writes the snapshot. Every submission gets a request id from a monotonic
//! counter; a completion whose id is no longer the latest is dropped and
//! reported to its caller as [`QueryError::Superseded`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use docqa_core::backend::{Credential, GenerationError};
use docqa_core::embedding::EmbeddingProvider;
use docqa_core::models::{RetrievedContext, ScoredContext};
use docqa_core::prompt::PromptTemplate;
use docqa_core::search::{self, retrieve};
use docqa_core::store::Store;

use crate::credentials::{CredentialKind, CredentialStore};
use crate::lifecycle::ModelManager;

/// Read-only view of the chat state for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatSnapshot {
    pub question: String,
    pub answer: String,
    pub contexts: Vec<RetrievedContext>,
    pub generating: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("question is empty")]
    EmptyQuery,

    #[error("no documents have been ingested yet")]
    NoDocuments,

    #[error("no local model is loaded and no remote API key is set")]
    MissingCredential,

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("a newer question replaced this one")]
    Superseded,
}

impl QueryError {
    /// Rejected before any retrieval or generation ran.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            QueryError::EmptyQuery | QueryError::NoDocuments | QueryError::MissingCredential
        )
    }
}

/// A published answer and the chunks it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub contexts: Vec<ScoredContext>,
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    credentials: Arc<dyn CredentialStore>,
    models: Arc<ModelManager>,
    template: PromptTemplate,
    top_n: usize,
    snapshot: watch::Sender<ChatSnapshot>,
    latest: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        credentials: Arc<dyn CredentialStore>,
        models: Arc<ModelManager>,
        template: PromptTemplate,
        top_n: usize,
    ) -> Self {
        let (snapshot, _) = watch::channel(ChatSnapshot::default());
        Self {
            store,
            embedder,
            credentials,
            models,
            template,
            top_n: top_n.max(1),
            snapshot,
            latest: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    /// Publish `next` only if `id` is still the latest submission.
    fn publish(&self, id: u64, next: ChatSnapshot) -> bool {
        self.snapshot.send_if_modified(|current| {
            if self.latest.load(Ordering::SeqCst) != id {
                return false;
            }
            *current = next;
            true
        })
    }

    /// Publish a failure. A stale request still reports its own validation
    /// error; only a stale retrieval or generation failure becomes
    /// [`QueryError::Superseded`].
    fn fail(&self, id: u64, err: QueryError) -> QueryError {
        let published = self.publish(
            id,
            ChatSnapshot {
                error: Some(err.to_string()),
                ..ChatSnapshot::default()
            },
        );
        if published {
            warn!(request = id, error = %err, "query failed");
            err
        } else if err.is_validation() {
            debug!(request = id, error = %err, "stale request rejected");
            err
        } else {
            QueryError::Superseded
        }
    }

    async fn remote_credential(&self) -> Option<Credential> {
        match self.credentials.get(CredentialKind::RemoteApiKey).await {
            Ok(value) => value.and_then(Credential::new),
            Err(e) => {
                warn!(error = %e, "could not read remote API key");
                None
            }
        }
    }

    /// Answer `query` with `top_n` retrieved chunks (default from config).
    pub async fn submit(&self, query: &str, top_n: Option<usize>) -> Result<Answer, QueryError> {
        let id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;

        match self.store.document_count().await {
            Ok(0) => return Err(self.fail(id, QueryError::NoDocuments)),
            Ok(_) => {}
            Err(e) => return Err(self.fail(id, QueryError::Retrieval(e.to_string()))),
        }

        let credential = if self.models.active().await.is_local() {
            None
        } else {
            match self.remote_credential().await {
                Some(c) => Some(c),
                None => return Err(self.fail(id, QueryError::MissingCredential)),
            }
        };

        let query = query.trim();
        if query.is_empty() {
            return Err(self.fail(id, QueryError::EmptyQuery));
        }

        self.publish(
            id,
            ChatSnapshot {
                question: query.to_string(),
                generating: true,
                ..ChatSnapshot::default()
            },
        );

        if let Err(e) = self.models.prepare_backend(credential).await {
            let err = match e {
                GenerationError::MissingCredential => QueryError::MissingCredential,
                other => QueryError::Generation(other.to_string()),
            };
            return Err(self.fail(id, err));
        }

        let top_n = top_n.unwrap_or(self.top_n);
        let scored = match retrieve(self.store.as_ref(), self.embedder.as_ref(), query, top_n).await
        {
            Ok(s) => s,
            Err(e) => return Err(self.fail(id, QueryError::Retrieval(e.to_string()))),
        };
        let contexts = search::contexts(&scored);
        debug!(request = id, retrieved = contexts.len(), "retrieval finished");

        let prompt = self.template.render(&contexts, query);
        let text = match self.models.generate(&prompt).await {
            Ok(t) => t,
            Err(GenerationError::MissingCredential) => {
                return Err(self.fail(id, QueryError::MissingCredential))
            }
            Err(e) => return Err(self.fail(id, QueryError::Generation(e.to_string()))),
        };

        let published = self.publish(
            id,
            ChatSnapshot {
                question: query.to_string(),
                answer: text.clone(),
                contexts,
                generating: false,
                error: None,
            },
        );
        if !published {
            debug!(request = id, "dropping stale answer");
            return Err(QueryError::Superseded);
        }

        info!(request = id, chars = text.len(), "answer published");
        Ok(Answer {
            text,
            contexts: scored,
        })
    }
}
