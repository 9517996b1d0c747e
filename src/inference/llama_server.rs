//! [`LocalRuntime`] backed by a `llama-server` child process.
//!
//! Loading a model spawns `llama-server -m <file>` on a free loopback port
//! and polls `/health` until it answers. Generation posts to `/completion`
//! with `stream: true` and forwards each SSE `content` field as one
//! increment. Unloading kills the child.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use docqa_core::backend::GenerationError;

use super::local::{Increments, LocalRuntime};
use crate::config::ModelsConfig;

const HEALTH_POLL: Duration = Duration::from_millis(500);
const N_PREDICT: u32 = 1024;

struct Running {
    child: Child,
    port: u16,
}

pub struct LlamaServerRuntime {
    server_path: PathBuf,
    n_ctx: u32,
    startup_timeout: Duration,
    client: reqwest::Client,
    running: Mutex<Option<Running>>,
}

impl LlamaServerRuntime {
    pub fn new(config: &ModelsConfig) -> Self {
        Self {
            server_path: PathBuf::from(&config.llama_server),
            n_ctx: config.n_ctx,
            startup_timeout: Duration::from_secs(config.startup_timeout_secs),
            client: reqwest::Client::new(),
            running: Mutex::new(None),
        }
    }

    async fn wait_for_health(&self, child: &mut Child, port: u16) -> Result<(), GenerationError> {
        let url = format!("http://127.0.0.1:{}/health", port);
        let deadline = Instant::now() + self.startup_timeout;
        while Instant::now() < deadline {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(GenerationError::Failed(format!(
                    "llama-server exited during startup ({})",
                    status
                )));
            }
            if let Ok(resp) = self.client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(HEALTH_POLL).await;
        }
        Err(GenerationError::Failed(
            "Timed out waiting for llama-server".to_string(),
        ))
    }
}

fn free_port() -> Result<u16, GenerationError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|e| GenerationError::Failed(format!("no free port: {}", e)))?;
    listener
        .local_addr()
        .map(|a| a.port())
        .map_err(|e| GenerationError::Failed(format!("no free port: {}", e)))
}

/// Pull complete `data:` lines out of `buf`, leaving any partial line.
///
/// Lines are decoded only once complete, so a multi-byte character split
/// across network chunks stays intact. Returns the `content` fields found and
/// whether a `stop: true` event was seen.
fn drain_sse(buf: &mut Vec<u8>) -> (Vec<String>, bool) {
    let mut contents = Vec::new();
    let mut stop = false;
    while let Some(nl) = buf.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buf.drain(..=nl).collect();
        let line = match String::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "skipping non UTF-8 line from llama-server");
                continue;
            }
        };
        let Some(payload) = line.trim_end().strip_prefix("data:") else {
            continue;
        };
        let Ok(val) = serde_json::from_str::<Value>(payload.trim()) else {
            continue;
        };
        if let Some(content) = val["content"].as_str() {
            if !content.is_empty() {
                contents.push(content.to_string());
            }
        }
        if val["stop"].as_bool() == Some(true) {
            stop = true;
        }
    }
    (contents, stop)
}

/// Forward the `content` of every SSE event in `stream` to `tx` until the
/// stream ends, a `stop` event arrives or the receiver goes away.
async fn forward_sse<S, B, E>(stream: S, tx: mpsc::Sender<Result<String, GenerationError>>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(Err(GenerationError::Failed(format!("stream error: {}", e))))
                    .await;
                return;
            }
        };
        buf.extend_from_slice(bytes.as_ref());
        let (contents, stop) = drain_sse(&mut buf);
        for content in contents {
            if tx.send(Ok(content)).await.is_err() {
                return;
            }
        }
        if stop {
            return;
        }
    }
}

#[async_trait]
impl LocalRuntime for LlamaServerRuntime {
    async fn load(&self, path: &Path) -> Result<(), GenerationError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(GenerationError::Failed(
                "llama-server already running; unload first".to_string(),
            ));
        }

        let port = free_port()?;
        let mut cmd = Command::new(&self.server_path);
        cmd.arg("-m").arg(path);
        cmd.arg("--host").arg("127.0.0.1");
        cmd.arg("--port").arg(port.to_string());
        cmd.arg("-c").arg(self.n_ctx.to_string());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            GenerationError::Failed(format!(
                "Failed to spawn {}: {}",
                self.server_path.display(),
                e
            ))
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!("[llama-server] {}", line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!("[llama-server-err] {}", line);
                }
            });
        }

        if let Err(e) = self.wait_for_health(&mut child, port).await {
            let _ = child.kill().await;
            return Err(e);
        }

        *running = Some(Running { child, port });
        Ok(())
    }

    async fn generate_stream(&self, prompt: &str) -> Result<Increments, GenerationError> {
        let port = match self.running.lock().await.as_ref() {
            Some(r) => r.port,
            None => return Err(GenerationError::NotLoaded),
        };
        let url = format!("http://127.0.0.1:{}/completion", port);
        let body = json!({
            "prompt": prompt,
            "stream": true,
            "n_predict": N_PREDICT,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Failed(format!("llama-server unreachable: {}", e)))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Failed(format!(
                "llama-server error {}: {}",
                status, text
            )));
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(forward_sse(resp.bytes_stream(), tx));

        Ok(rx)
    }

    async fn unload(&self) {
        if let Some(mut running) = self.running.lock().await.take() {
            if let Err(e) = running.child.kill().await {
                warn!(error = %e, "failed to stop llama-server");
            }
        }
    }
}
