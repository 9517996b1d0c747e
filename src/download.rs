//! Model file download transport.
//!
//! A [`DownloadTransport`] turns a [`DownloadRequest`] into a stream of
//! [`DownloadStatus`] events. The model manager folds that stream through a
//! [`DownloadSession`](docqa_core::download::DownloadSession); it never
//! polls. [`HttpTransport`] streams the body with reqwest into
//! `<file>.part` and renames it into place on success, so a failed download
//! never leaves a file that looks installed.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use docqa_core::download::DownloadStatus;

pub type StatusStream = Pin<Box<dyn Stream<Item = DownloadStatus> + Send>>;

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub dest_dir: PathBuf,
    pub file_name: String,
    /// Extra request headers, e.g. `Authorization: Bearer <token>`.
    pub headers: Vec<(String, String)>,
}

impl DownloadRequest {
    pub fn dest_path(&self) -> PathBuf {
        self.dest_dir.join(&self.file_name)
    }

    fn part_path(&self) -> PathBuf {
        self.dest_dir.join(format!("{}.part", self.file_name))
    }
}

pub trait DownloadTransport: Send + Sync {
    /// Begin a download. Returns a session id and the status stream.
    ///
    /// The stream ends after a terminal `Succeeded` or `Failed` event.
    fn start(&self, request: DownloadRequest) -> (String, StatusStream);
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadTransport for HttpTransport {
    fn start(&self, request: DownloadRequest) -> (String, StatusStream) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(32);
        let client = self.client.clone();
        let session = id.clone();

        tokio::spawn(async move {
            let _ = tx.send(DownloadStatus::Queued).await;
            let part = request.part_path();
            let last = match fetch(&client, &request, &part, &tx).await {
                Ok(()) => {
                    info!(session = %session, file = %request.file_name, "download finished");
                    DownloadStatus::Succeeded
                }
                Err(reason) => {
                    warn!(session = %session, file = %request.file_name, %reason, "download failed");
                    if let Err(e) = tokio::fs::remove_file(&part).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!(path = %part.display(), error = %e, "could not remove partial file");
                        }
                    }
                    DownloadStatus::Failed(reason)
                }
            };
            let _ = tx.send(last).await;
        });

        (id, Box::pin(ReceiverStream::new(rx)))
    }
}

async fn fetch(
    client: &reqwest::Client,
    request: &DownloadRequest,
    part: &Path,
    tx: &mpsc::Sender<DownloadStatus>,
) -> Result<(), String> {
    let mut req = client.get(&request.url);
    for (name, value) in &request.headers {
        req = req.header(name.as_str(), value.as_str());
    }
    let response = req.send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(match status.as_u16() {
            401 | 403 => format!("HTTP {}: access denied (is a Hugging Face token set?)", status),
            _ => format!("HTTP {}", status),
        });
    }

    let _ = tx.send(DownloadStatus::Started).await;

    tokio::fs::create_dir_all(&request.dest_dir)
        .await
        .map_err(|e| format!("cannot create {}: {}", request.dest_dir.display(), e))?;
    let mut file = tokio::fs::File::create(part)
        .await
        .map_err(|e| format!("cannot create {}: {}", part.display(), e))?;

    let total = response.content_length().filter(|&n| n > 0);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    let mut last_pct: i64 = -1;

    while let Some(chunk) = stream.next().await {
        let bytes = chunk.map_err(|e| e.to_string())?;
        file.write_all(&bytes).await.map_err(|e| e.to_string())?;
        written += bytes.len() as u64;

        if let Some(total) = total {
            let pct = (written.saturating_mul(100) / total) as i64;
            if pct != last_pct {
                last_pct = pct;
                let _ = tx.send(DownloadStatus::InProgress(pct)).await;
            }
        }
    }
    file.flush().await.map_err(|e| e.to_string())?;
    drop(file);

    if let Some(total) = total {
        if written != total {
            return Err(format!("truncated download: {} of {} bytes", written, total));
        }
    }

    tokio::fs::rename(part, request.dest_path())
        .await
        .map_err(|e| format!("cannot move download into place: {}", e))?;
    debug!(bytes = written, path = %request.dest_path().display(), "download written");
    Ok(())
}
