use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docqa_core::catalog::{default_catalog, LocalModelDescriptor};
use docqa_core::prompt::{PromptTemplate, DEFAULT_TEMPLATE};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Word-window splitter settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    200
}
fn default_overlap() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            prompt_template: default_prompt_template(),
        }
    }
}

impl RetrievalConfig {
    pub fn template(&self) -> Result<PromptTemplate> {
        PromptTemplate::new(self.prompt_template.clone())
            .with_context(|| "Invalid retrieval.prompt_template")
    }
}

fn default_top_n() -> usize {
    5
}
fn default_prompt_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Local model storage and runtime.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    #[serde(default = "default_models_dir")]
    pub dir: PathBuf,
    /// Path or name of the `llama-server` executable.
    #[serde(default = "default_llama_server")]
    pub llama_server: String,
    #[serde(default = "default_n_ctx")]
    pub n_ctx: u32,
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    /// Replaces the built-in catalog when present.
    #[serde(default)]
    pub catalog: Option<Vec<LocalModelDescriptor>>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: default_models_dir(),
            llama_server: default_llama_server(),
            n_ctx: default_n_ctx(),
            startup_timeout_secs: default_startup_timeout_secs(),
            catalog: None,
        }
    }
}

impl ModelsConfig {
    pub fn catalog(&self) -> Vec<LocalModelDescriptor> {
        self.catalog.clone().unwrap_or_else(default_catalog)
    }
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("./data/models")
}
fn default_llama_server() -> String {
    "llama-server".to_string()
}
fn default_n_ctx() -> u32 {
    4096
}
fn default_startup_timeout_secs() -> u64 {
    120
}

/// Remote generation API (Gemini `generateContent`).
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_model")]
    pub model: String,
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            model: default_remote_model(),
            base_url: default_remote_base_url(),
            timeout_secs: default_remote_timeout_secs(),
        }
    }
}

fn default_remote_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_remote_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_remote_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsConfig {
    /// Keyring service name secrets are stored under.
    #[serde(default = "default_service")]
    pub service: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
        }
    }
}

fn default_service() -> String {
    "docqa".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be < chunking.chunk_size");
    }

    // Validate retrieval
    if config.retrieval.top_n < 1 {
        anyhow::bail!("retrieval.top_n must be >= 1");
    }
    config.retrieval.template()?;

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    for model in config.models.catalog() {
        model
            .file_name()
            .with_context(|| format!("Invalid catalog entry '{}'", model.name))?;
        if !model.is_gguf() {
            anyhow::bail!(
                "Catalog entry '{}' is not a GGUF file; llama-server cannot load it",
                model.name
            );
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/docqa.sqlite"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.retrieval.top_n, 5);
        assert_eq!(config.chunking.chunk_size, 200);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.models.catalog().len(), 9);
        assert_eq!(config.credentials.service, "docqa");
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let text = format!("{MINIMAL}\n[chunking]\nchunk_size = 10\noverlap = 10\n");
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn top_n_zero_rejected() {
        let text = format!("{MINIMAL}\n[retrieval]\ntop_n = 0\n");
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn template_needs_placeholders() {
        let text = format!("{MINIMAL}\n[retrieval]\nprompt_template = \"just $QUERY\"\n");
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn enabled_provider_needs_dims_and_model() {
        let text = format!("{MINIMAL}\n[embedding]\nprovider = \"openai\"\n");
        assert!(parse_config(&text).is_err());
        let text = format!(
            "{MINIMAL}\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n"
        );
        assert!(parse_config(&text).is_ok());
    }

    #[test]
    fn unknown_provider_rejected() {
        let text = format!("{MINIMAL}\n[embedding]\nprovider = \"magic\"\nmodel = \"m\"\ndims = 3\n");
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn non_gguf_catalog_entry_rejected() {
        let text = format!(
            "{MINIMAL}\n[[models.catalog]]\nname = \"Bundle\"\ndescription = \"test\"\ndownload_url = \"https://h/x/bundle.task\"\n"
        );
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("not a GGUF file"));
    }

    #[test]
    fn catalog_override_replaces_builtin() {
        let text = format!(
            "{MINIMAL}\n[[models.catalog]]\nname = \"Tiny\"\ndescription = \"test\"\ndownload_url = \"https://h/x/tiny.gguf\"\n"
        );
        let config = parse_config(&text).unwrap();
        let catalog = config.models.catalog();
        assert_eq!(catalog.len(), 1);
        assert!(!catalog[0].gated);
    }
}
