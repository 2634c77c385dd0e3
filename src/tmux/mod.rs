mod client;
mod detector;
mod heuristics;

pub use client::TmuxClient;
pub use detector::{ActivityTracker, StatusDetector};
pub use heuristics::{Classifier, Status};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Name prefix of sessions created by agent-deck
pub const SESSION_PREFIX: &str = "agentdeck_";

/// Reference to a tmux session owned by an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// tmux session name
    pub name: String,
    /// Directory the session was started in
    pub work_dir: PathBuf,
}

impl SessionHandle {
    pub fn new(name: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            work_dir: work_dir.into(),
        }
    }
}

/// A tmux session as reported by `list-sessions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmuxSession {
    /// Session ID (e.g., "$0")
    pub id: String,
    /// Session name
    pub name: String,
    /// Unix timestamp when session was created
    pub created_at: u64,
    /// Number of attached clients
    pub attached_clients: usize,
    /// Current path of the active pane
    pub work_dir: PathBuf,
}

impl TmuxSession {
    /// Whether agent-deck created this session
    pub fn is_managed(&self) -> bool {
        self.name.starts_with(SESSION_PREFIX)
    }
}

/// Result of binding to a session that already exists
#[derive(Debug, Clone)]
pub struct Reconnected {
    pub handle: SessionHandle,
    pub tracker: ActivityTracker,
}

/// Everything the session core needs from the terminal multiplexer
#[allow(async_fn_in_trait)]
pub trait Multiplexer {
    /// Start a detached session running `command` in `work_dir`
    async fn create(&self, name: &str, work_dir: &Path, command: &str) -> Result<SessionHandle>;

    /// Bind to an existing session without touching tmux
    fn reconnect(
        &self,
        name: &str,
        title: &str,
        work_dir: &Path,
        command: &str,
        prior_status: Status,
    ) -> Reconnected;

    async fn exists(&self, handle: &SessionHandle) -> Result<bool>;

    /// Last `max_lines` lines of pane text; empty when the session is gone
    async fn capture(&self, handle: &SessionHandle, max_lines: usize) -> Result<String>;

    /// Kill the session; already-dead sessions are fine
    async fn kill(&self, handle: &SessionHandle) -> Result<()>;

    async fn enable_mouse_mode(&self, handle: &SessionHandle) -> Result<()>;

    /// Every session on the server, including ones agent-deck did not create
    async fn list_sessions(&self) -> Result<Vec<TmuxSession>>;

    /// argv that hands the terminal over to the session
    fn attach_command(&self, handle: &SessionHandle) -> Vec<String>;
}

#[cfg(test)]
pub use fake::FakeMultiplexer;
