//! Download progress reporting.
//!
//! Renders [`DialogState`] snapshots from the model manager while
//! `docqa models download` runs. Progress is emitted on **stderr** so stdout
//! remains parseable for scripts.

use std::io::Write;

use docqa_core::download::DialogState;

/// Renders dialog snapshots. Implementations write to stderr (human or JSON).
pub trait DownloadProgressReporter: Send + Sync {
    fn report(&self, model: &str, dialog: &DialogState);

    /// Called once after the last snapshot.
    fn finish(&self) {}
}

/// Human-friendly progress bar on stderr: `qwen  [#######.............]  35%`.
pub struct StderrProgress;

const BAR_WIDTH: usize = 20;

fn render_bar(model: &str, dialog: &DialogState) -> String {
    if !dialog.show_progress {
        return format!("\r{}  waiting for download to start...", model);
    }
    let filled = usize::from(dialog.progress) * BAR_WIDTH / 100;
    format!(
        "\r{}  [{}{}] {:>3}%",
        model,
        "#".repeat(filled),
        ".".repeat(BAR_WIDTH - filled),
        dialog.progress
    )
}

impl DownloadProgressReporter for StderrProgress {
    fn report(&self, model: &str, dialog: &DialogState) {
        if !dialog.visible {
            return;
        }
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(render_bar(model, dialog).as_bytes());
        let _ = err.flush();
    }

    fn finish(&self) {
        let _ = writeln!(std::io::stderr().lock());
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl DownloadProgressReporter for JsonProgress {
    fn report(&self, model: &str, dialog: &DialogState) {
        let obj = serde_json::json!({
            "event": "download",
            "model": model,
            "visible": dialog.visible,
            "show_progress": dialog.show_progress,
            "progress": dialog.progress,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl DownloadProgressReporter for NoProgress {
    fn report(&self, _model: &str, _dialog: &DialogState) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn DownloadProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
