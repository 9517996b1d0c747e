//! `docqa credentials set|show`.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::credentials::{mask, CredentialKind, CredentialStore, KeyringStore};

pub async fn run_credentials_set(config: &Config, kind: &str, value: &str) -> Result<()> {
    let kind: CredentialKind = kind.parse()?;
    let store = KeyringStore::new(config.credentials.service.clone());
    store
        .set(kind, value)
        .await
        .with_context(|| format!("Failed to store {}", kind))?;
    println!("Stored {} in keychain service '{}'", kind, store.service_name());
    Ok(())
}

pub async fn run_credentials_show(config: &Config) -> Result<()> {
    let store = KeyringStore::new(config.credentials.service.clone());
    show(&store).await
}

async fn show(store: &dyn CredentialStore) -> Result<()> {
    for kind in CredentialKind::ALL {
        let line = match store.get(kind).await {
            Ok(Some(secret)) => mask(&secret),
            Ok(None) => "(not set)".to_string(),
            Err(e) => format!("(unavailable: {})", e),
        };
        println!("  {:<9} {}", kind, line);
    }
    Ok(())
}
