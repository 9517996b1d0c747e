//! Local model catalog.
//!
//! The catalog is a fixed, ordered list of downloadable models known at
//! process start. Everything else about an entry (its file name, where it is
//! installed, whether it is downloaded, whether it is the loaded model) is
//! derived on demand and never persisted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("invalid download URL: {0}")]
    InvalidUrl(String),
    #[error("unknown model: {0}")]
    UnknownModel(String),
}

/// Static catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalModelDescriptor {
    pub name: String,
    pub description: String,
    pub download_url: String,
    /// Model repository requires an access token to download.
    #[serde(default)]
    pub gated: bool,
}

impl LocalModelDescriptor {
    pub fn new(name: &str, description: &str, download_url: &str, gated: bool) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            download_url: download_url.to_string(),
            gated,
        }
    }

    /// Last path segment of the download URL, without query or fragment.
    pub fn file_name(&self) -> Result<String, CatalogError> {
        let invalid = || CatalogError::InvalidUrl(self.download_url.clone());
        let (_, rest) = self.download_url.split_once("://").ok_or_else(invalid)?;
        let path = rest.split(['?', '#']).next().unwrap_or_default();
        let (_, path) = path.split_once('/').ok_or_else(invalid)?;
        match path.rsplit('/').next() {
            Some(name) if !name.is_empty() && name != "." && name != ".." => Ok(name.to_string()),
            _ => Err(invalid()),
        }
    }

    /// The artifact is a GGUF file, the only format `llama-server` loads.
    pub fn is_gguf(&self) -> bool {
        self.file_name()
            .map(|f| f.to_ascii_lowercase().ends_with(".gguf"))
            .unwrap_or(false)
    }

    /// Deterministic install location under `models_dir`.
    pub fn install_path(&self, models_dir: &Path) -> Result<PathBuf, CatalogError> {
        Ok(models_dir.join(self.file_name()?))
    }

    /// The expected file is present at the install path.
    pub fn is_downloaded(&self, models_dir: &Path) -> bool {
        self.install_path(models_dir)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }
}

/// A catalog entry with its derived flags, as shown to the user.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub descriptor: LocalModelDescriptor,
    pub install_path: Option<PathBuf>,
    pub is_downloaded: bool,
    pub is_loaded: bool,
}

/// Recompute derived flags for every entry.
///
/// `is_loaded` is true for at most one entry: the first whose install path
/// equals `active_local`.
pub fn refresh(
    catalog: &[LocalModelDescriptor],
    models_dir: &Path,
    active_local: Option<&Path>,
) -> Vec<CatalogEntry> {
    let mut loaded_seen = false;
    catalog
        .iter()
        .map(|d| {
            let install_path = d.install_path(models_dir).ok();
            let matches_active = match (&install_path, active_local) {
                (Some(p), Some(active)) => p == active,
                _ => false,
            };
            let is_loaded = matches_active && !loaded_seen;
            loaded_seen |= is_loaded;
            CatalogEntry {
                is_downloaded: d.is_downloaded(models_dir),
                descriptor: d.clone(),
                install_path,
                is_loaded,
            }
        })
        .collect()
}

/// Look up an entry by name, case-insensitively.
pub fn find<'a>(
    catalog: &'a [LocalModelDescriptor],
    name: &str,
) -> Result<&'a LocalModelDescriptor, CatalogError> {
    catalog
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| CatalogError::UnknownModel(name.to_string()))
}

const HF: &str = "https://huggingface.co";

/// Built-in catalog of GGUF models hosted on Hugging Face.
pub fn default_catalog() -> Vec<LocalModelDescriptor> {
    vec![
        LocalModelDescriptor::new(
            "Qwen2.5 0.5B Instruct Q8",
            "A Qwen family model series",
            &format!("{HF}/Qwen/Qwen2.5-0.5B-Instruct-GGUF/resolve/main/qwen2.5-0.5b-instruct-q8_0.gguf"),
            false,
        ),
        LocalModelDescriptor::new(
            "Qwen2.5 1.5B Instruct Q8",
            "A Qwen family model series",
            &format!("{HF}/Qwen/Qwen2.5-1.5B-Instruct-GGUF/resolve/main/qwen2.5-1.5b-instruct-q8_0.gguf"),
            false,
        ),
        LocalModelDescriptor::new(
            "Qwen2.5 3B Instruct Q8",
            "A Qwen family model series",
            &format!("{HF}/Qwen/Qwen2.5-3B-Instruct-GGUF/resolve/main/qwen2.5-3b-instruct-q8_0.gguf"),
            false,
        ),
        LocalModelDescriptor::new(
            "Phi 4 Mini Instruct Q8",
            "A Microsoft Phi 4 model series",
            &format!("{HF}/bartowski/microsoft_Phi-4-mini-instruct-GGUF/resolve/main/microsoft_Phi-4-mini-instruct-Q8_0.gguf"),
            false,
        ),
        LocalModelDescriptor::new(
            "DeepSeek R1 Distill Qwen 1.5B Q8",
            "DeepSeek R1",
            &format!("{HF}/bartowski/DeepSeek-R1-Distill-Qwen-1.5B-GGUF/resolve/main/DeepSeek-R1-Distill-Qwen-1.5B-Q8_0.gguf"),
            false,
        ),
        LocalModelDescriptor::new(
            "Gemma3 1B IT",
            "Gemma 3 1B Instruction-Tuned",
            &format!("{HF}/google/gemma-3-1b-it-qat-q4_0-gguf/resolve/main/gemma-3-1b-it-q4_0.gguf"),
            true,
        ),
        LocalModelDescriptor::new(
            "Gemma3 4B IT",
            "Gemma 3 4B Instruction-Tuned",
            &format!("{HF}/google/gemma-3-4b-it-qat-q4_0-gguf/resolve/main/gemma-3-4b-it-q4_0.gguf"),
            true,
        ),
        LocalModelDescriptor::new(
            "Llama 3.2 1B Q8",
            "Llama 3.2 1B",
            &format!("{HF}/bartowski/Llama-3.2-1B-Instruct-GGUF/resolve/main/Llama-3.2-1B-Instruct-Q8_0.gguf"),
            false,
        ),
        LocalModelDescriptor::new(
            "Llama 3.2 3B Q8",
            "Llama 3.2 3B",
            &format!("{HF}/bartowski/Llama-3.2-3B-Instruct-GGUF/resolve/main/Llama-3.2-3B-Instruct-Q8_0.gguf"),
            false,
        ),
    ]
}
