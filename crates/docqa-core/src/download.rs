//! Download session state machine.
//!
//! A download transport reports a stream of [`DownloadStatus`] events for one
//! request. [`DownloadSession::apply`] folds each event into the session's
//! [`DownloadState`] and tells the caller what to do about it.
//!
//! ```text
//! Idle ─▶ Queued ─▶ Started ─▶ InProgress(p) ─▶ Succeeded
//!   │        │          │            │     ╲
//!   └────────┴──────────┴────────────┴──────▶ Failed(reason)
//! ```
//!
//! Progress percentages are clamped to `[0, 100]` and never displayed lower
//! than the highest value already seen in the session, whatever order the
//! transport delivers them in. Once a session is terminal every further
//! event is ignored.

use serde::Serialize;

/// Raw status event emitted by a download transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Queued,
    Started,
    /// Percent as reported on the wire; not trusted to be in range.
    InProgress(i64),
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DownloadState {
    Idle,
    Queued,
    Started,
    InProgress(u8),
    Succeeded,
    Failed(String),
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadState::Succeeded | DownloadState::Failed(_))
    }
}

/// What the presentation layer shows for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DialogState {
    pub visible: bool,
    /// False means "indeterminate activity".
    pub show_progress: bool,
    pub progress: u8,
}

/// Action the manager must take after folding an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Event changed nothing (out of order, or session already terminal).
    Ignored,
    /// Dialog state changed; republish it.
    Updated,
    /// Download finished; activate the model.
    Activate,
    /// Download failed; surface the reason verbatim.
    Fail(String),
}

/// One download of one model.
#[derive(Debug, Clone)]
pub struct DownloadSession {
    model: String,
    state: DownloadState,
    floor: u8,
}

impl DownloadSession {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            state: DownloadState::Idle,
            floor: 0,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn state(&self) -> &DownloadState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn apply(&mut self, status: DownloadStatus) -> Effect {
        use DownloadState as S;

        if self.state.is_terminal() {
            return Effect::Ignored;
        }

        let next = match (&self.state, status) {
            (S::Idle, DownloadStatus::Queued) => S::Queued,
            (S::Idle | S::Queued, DownloadStatus::Started) => S::Started,
            (_, DownloadStatus::InProgress(raw)) => {
                let pct = raw.clamp(0, 100) as u8;
                self.floor = self.floor.max(pct);
                S::InProgress(self.floor)
            }
            (_, DownloadStatus::Succeeded) => {
                self.floor = 100;
                self.state = S::Succeeded;
                return Effect::Activate;
            }
            (_, DownloadStatus::Failed(reason)) => {
                self.state = S::Failed(reason.clone());
                return Effect::Fail(reason);
            }
            _ => return Effect::Ignored,
        };

        if next == self.state {
            return Effect::Ignored;
        }
        self.state = next;
        Effect::Updated
    }

    pub fn dialog(&self) -> DialogState {
        match &self.state {
            DownloadState::Idle | DownloadState::Succeeded | DownloadState::Failed(_) => {
                DialogState::default()
            }
            DownloadState::Queued => DialogState {
                visible: true,
                show_progress: false,
                progress: 0,
            },
            DownloadState::Started => DialogState {
                visible: true,
                show_progress: true,
                progress: self.floor,
            },
            DownloadState::InProgress(p) => DialogState {
                visible: true,
                show_progress: true,
                progress: *p,
            },
        }
    }
}
