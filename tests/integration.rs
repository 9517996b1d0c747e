use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docqa_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docqa");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("models")).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("france.md"), "Paris is the capital of France.").unwrap();

    // A downloaded catalog entry: the file is already in place.
    fs::write(root.join("models").join("tiny.gguf"), b"GGUF").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/docqa.sqlite"

[chunking]
chunk_size = 50
overlap = 5

[retrieval]
top_n = 3

[models]
dir = "{root}/models"
llama_server = "{root}/no-such-llama-server"
startup_timeout_secs = 2

[[models.catalog]]
name = "Tiny"
description = "Already downloaded"
download_url = "https://example.invalid/org/tiny/resolve/main/tiny.gguf"

[[models.catalog]]
name = "Big"
description = "Not downloaded"
download_url = "https://example.invalid/org/big/resolve/main/big.gguf"
gated = true

[credentials]
service = "docqa-test"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docqa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docqa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docqa_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docqa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docqa(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/docqa.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_docqa(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_docqa(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_docs_list_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_docqa(&config_path, &["init"]);

    let (stdout, stderr, success) = run_docqa(&config_path, &["docs", "list"]);
    assert!(success, "docs list failed: {}", stderr);
    assert!(stdout.contains("No documents"));
}

#[test]
fn test_docs_remove_unknown_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_docqa(&config_path, &["init"]);

    let (_, stderr, success) = run_docqa(&config_path, &["docs", "remove", "nope"]);
    assert!(!success);
    assert!(stderr.contains("No document"));
}

#[test]
fn test_ingest_requires_embeddings() {
    let (tmp, config_path) = setup_test_env();
    let files = tmp.path().join("files");

    let (_, stderr, success) = run_docqa(&config_path, &["ingest", files.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Embeddings are disabled"), "stderr={}", stderr);
}

#[test]
fn test_ask_requires_embeddings() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_docqa(&config_path, &["ask", "What is the capital of France?"]);
    assert!(!success);
    assert!(stderr.contains("Embeddings are disabled"));
}

#[test]
fn test_ask_rejects_zero_top_n() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_docqa(&config_path, &["ask", "q", "--top-n", "0"]);
    assert!(!success);
    assert!(stderr.contains("--top-n"));
}

#[test]
fn test_models_list_shows_download_state() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docqa(&config_path, &["models", "list", "--json"]);
    assert!(success, "models list failed: {}", stderr);

    let entries: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["descriptor"]["name"], "Tiny");
    assert_eq!(entries[0]["is_downloaded"], true);
    assert_eq!(entries[1]["is_downloaded"], false);
    assert_eq!(entries[1]["descriptor"]["gated"], true);
    assert!(entries.iter().all(|e| e["is_loaded"] == false));
    assert!(entries.iter().all(|e| e["selected"] == false));
}

#[test]
fn test_models_list_human() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_docqa(&config_path, &["models", "list"]);
    assert!(success);
    assert!(stdout.contains("Tiny"));
    assert!(stdout.contains("downloaded"));
    assert!(stdout.contains("(token required)"));
}

#[test]
fn test_models_use_not_downloaded_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_docqa(&config_path, &["models", "use", "Big"]);
    assert!(!success);
    assert!(stderr.contains("not downloaded"), "stderr={}", stderr);
}

#[test]
fn test_models_use_unknown_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_docqa(&config_path, &["models", "use", "Nope"]);
    assert!(!success);
    assert!(stderr.contains("unknown model"));
}

#[test]
fn test_models_use_reports_load_failure() {
    let (_tmp, config_path) = setup_test_env();

    // The configured llama-server binary does not exist.
    let (_, stderr, success) = run_docqa(&config_path, &["models", "use", "tiny"]);
    assert!(!success);
    assert!(stderr.contains("failed to load model"), "stderr={}", stderr);
}

#[test]
fn test_models_download_present_is_noop() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docqa(
        &config_path,
        &["models", "download", "Tiny", "--progress", "off"],
    );
    assert!(success, "download failed: {}", stderr);
    assert!(stdout.contains("Already downloaded"));
}

#[test]
fn test_models_unload_succeeds_without_model() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_docqa(&config_path, &["models", "unload"]);
    assert!(success);
    assert!(stdout.contains("remote API"));
}

#[test]
fn test_credentials_unknown_kind_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_docqa(&config_path, &["credentials", "set", "password", "x"]);
    assert!(!success);
    assert!(stderr.contains("Unknown credential kind"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, _, success) = run_docqa(&tmp.path().join("absent.toml"), &["init"]);
    assert!(!success);
}
