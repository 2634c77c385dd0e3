use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the session core
#[derive(Error, Debug)]
pub enum DeckError {
    #[error(
        "tmux not available: {0}\n\nAgent Deck requires tmux. Install with:\n  brew install tmux\n  sudo apt install tmux"
    )]
    ToolUnavailable(String),

    #[error("tmux session not found: {0}")]
    SessionNotFound(String),

    #[error("tmux session already exists: {0}")]
    SessionExists(String),

    #[error("failed to create tmux session '{name}': {reason}")]
    Creation { name: String, reason: String },

    #[error("tmux command timed out after {timeout:?}: {command}")]
    Timeout { timeout: Duration, command: String },

    #[error("tmux command failed: {0}")]
    Command(String),

    #[error("storage I/O error at {}: {source}", path.display())]
    StorageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize sessions: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("group '{0}' still contains sessions")]
    NotEmpty(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("group already exists: {0}")]
    GroupExists(String),

    #[error("invalid group path: {0}")]
    InvalidGroupPath(String),

    #[error("session not found: {0}")]
    InstanceNotFound(String),

    #[error("session already exists for {}: {title} ({id})", path.display())]
    DuplicatePath {
        path: PathBuf,
        title: String,
        id: String,
    },

    #[error("invalid profile name: {0:?}")]
    InvalidProfile(String),

    #[error("failed to get home directory")]
    NoHomeDir,
}

impl DeckError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageIo {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = DeckError> = std::result::Result<T, E>;
