//! Inference backend capability and the active-backend variant.
//!
//! Two implementations of [`InferenceBackend`] live in the app crate: a
//! local on-device model and a remote API. Which one answers a query is
//! decided by the single [`ActiveBackend`] value held by the model manager.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// `generate` was called on a local backend with no model loaded.
    #[error("no local model is loaded")]
    NotLoaded,
    #[error("no API credential is configured")]
    MissingCredential,
    /// Any runtime, network, authentication or quota failure.
    #[error("generation failed: {0}")]
    Failed(String),
}

/// Produce one completion string for a prompt.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short label for logs, e.g. `"local"` or `"gemini"`.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// A non-empty secret. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Returns `None` for an empty or whitespace-only value.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Process-wide inference selection. Exactly one variant at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ActiveBackend {
    #[default]
    None,
    /// A local model file is loaded.
    Local(PathBuf),
    Remote(Credential),
}

impl ActiveBackend {
    pub fn local_path(&self) -> Option<&std::path::Path> {
        match self {
            ActiveBackend::Local(p) => Some(p.as_path()),
            _ => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ActiveBackend::Local(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActiveBackend::None => "none",
            ActiveBackend::Local(_) => "local",
            ActiveBackend::Remote(_) => "remote",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_rejects_blank() {
        assert!(Credential::new("").is_none());
        assert!(Credential::new("  \n").is_none());
        assert_eq!(Credential::new(" key ").unwrap().expose(), "key");
    }

    #[test]
    fn credential_debug_is_redacted() {
        let c = Credential::new("sk-secret").unwrap();
        assert!(!format!("{:?}", ActiveBackend::Remote(c)).contains("sk-secret"));
    }

    #[test]
    fn local_path_only_for_local() {
        let local = ActiveBackend::Local(PathBuf::from("/m/a.task"));
        assert_eq!(local.local_path(), Some(std::path::Path::new("/m/a.task")));
        assert!(ActiveBackend::None.local_path().is_none());
        assert_eq!(ActiveBackend::default(), ActiveBackend::None);
    }
}
