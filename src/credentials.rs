//! Credential storage.
//!
//! Secrets are opaque strings addressed by [`CredentialKind`]. The
//! [`KeyringStore`] keeps them in the OS keychain; [`MemoryCredentialStore`]
//! is used in tests and when no keychain is wanted.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Failed to spawn blocking task: {0}")]
    TaskFailed(String),

    #[error("Unknown credential kind '{0}'. Must be api-key or hf-token.")]
    UnknownKind(String),

    #[error("credential value must not be empty")]
    Empty,
}

pub type Result<T> = std::result::Result<T, CredentialError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    /// API key for the remote generation service.
    RemoteApiKey,
    /// Hugging Face access token for gated model downloads.
    HfAccessToken,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 2] = [CredentialKind::RemoteApiKey, CredentialKind::HfAccessToken];

    /// Keychain account name.
    pub fn key(&self) -> &'static str {
        match self {
            CredentialKind::RemoteApiKey => "remote.api_key",
            CredentialKind::HfAccessToken => "huggingface.access_token",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialKind::RemoteApiKey => "api-key",
            CredentialKind::HfAccessToken => "hf-token",
        })
    }
}

impl FromStr for CredentialKind {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api-key" | "api_key" | "remote" => Ok(CredentialKind::RemoteApiKey),
            "hf-token" | "hf_token" | "huggingface" => Ok(CredentialKind::HfAccessToken),
            other => Err(CredentialError::UnknownKind(other.to_string())),
        }
    }
}

/// Opaque get/set of secret strings.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `None` when nothing (or only whitespace) is stored.
    async fn get(&self, kind: CredentialKind) -> Result<Option<String>>;
    async fn set(&self, kind: CredentialKind, value: &str) -> Result<()>;
}

/// Credentials in the OS keychain under one service name.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn get(&self, kind: CredentialKind) -> Result<Option<String>> {
        let service = self.service_name.clone();
        let key = kind.key();

        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, key)?;
            match entry.get_password() {
                Ok(password) if password.trim().is_empty() => Ok(None),
                Ok(password) => Ok(Some(password)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(CredentialError::Keyring(e)),
            }
        })
        .await
        .map_err(|e| CredentialError::TaskFailed(e.to_string()))?
    }

    async fn set(&self, kind: CredentialKind, value: &str) -> Result<()> {
        let value = value.trim().to_string();
        if value.is_empty() {
            return Err(CredentialError::Empty);
        }
        let service = self.service_name.clone();
        let key = kind.key();

        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, key)?;
            entry.set_password(&value)?;
            Ok(())
        })
        .await
        .map_err(|e| CredentialError::TaskFailed(e.to_string()))?
    }
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<CredentialKind, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(kind: CredentialKind, value: &str) -> Self {
        let store = Self::new();
        if let Ok(mut values) = store.values.lock() {
            values.insert(kind, value.to_string());
        }
        store
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, kind: CredentialKind) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| CredentialError::TaskFailed("credential lock poisoned".to_string()))?;
        Ok(values
            .get(&kind)
            .filter(|v| !v.trim().is_empty())
            .cloned())
    }

    async fn set(&self, kind: CredentialKind, value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            return Err(CredentialError::Empty);
        }
        self.values
            .lock()
            .map_err(|_| CredentialError::TaskFailed("credential lock poisoned".to_string()))?
            .insert(kind, value.to_string());
        Ok(())
    }
}

/// Show only the first and last few characters of a secret.
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse() {
        assert_eq!("api-key".parse::<CredentialKind>().unwrap(), CredentialKind::RemoteApiKey);
        assert_eq!("HF-TOKEN".parse::<CredentialKind>().unwrap(), CredentialKind::HfAccessToken);
        assert!("password".parse::<CredentialKind>().is_err());
        for kind in CredentialKind::ALL {
            assert_eq!(kind.to_string().parse::<CredentialKind>().unwrap(), kind);
        }
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.get(CredentialKind::RemoteApiKey).await.unwrap(), None);
        store.set(CredentialKind::RemoteApiKey, " key-123 ").await.unwrap();
        assert_eq!(
            store.get(CredentialKind::RemoteApiKey).await.unwrap().as_deref(),
            Some("key-123")
        );
        assert_eq!(store.get(CredentialKind::HfAccessToken).await.unwrap(), None);
    }

    #[tokio::test]
    async fn blank_values_rejected_and_hidden() {
        let store = MemoryCredentialStore::with(CredentialKind::HfAccessToken, "   ");
        assert_eq!(store.get(CredentialKind::HfAccessToken).await.unwrap(), None);
        assert!(matches!(
            store.set(CredentialKind::HfAccessToken, "").await,
            Err(CredentialError::Empty)
        ));
    }

    #[test]
    fn mask_hides_middle() {
        assert_eq!(mask("abc"), "***");
        assert_eq!(mask("hf_abcdefghijkl"), "hf_a…ijkl");
    }
}
