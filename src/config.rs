use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DeckError, Result};

/// Environment variable selecting an isolated storage profile
pub const PROFILE_ENV: &str = "AGENTDECK_PROFILE";

const ROOT_DIR: &str = ".agent-deck";
const SESSIONS_FILE: &str = "sessions.json";
const CONFIG_FILE: &str = "config.json";
const LOG_FILE: &str = "debug.log";

/// Filesystem layout for one profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub dir: PathBuf,
    pub profile: Option<String>,
}

impl Paths {
    /// Resolve the profile directory under `~/.agent-deck`.
    ///
    /// An explicit `profile` wins over the environment.
    pub fn locate(profile: Option<&str>) -> Result<Self> {
        let home = dirs::home_dir().ok_or(DeckError::NoHomeDir)?;
        let profile = profile
            .map(str::to_string)
            .or_else(|| std::env::var(PROFILE_ENV).ok())
            .filter(|p| !p.trim().is_empty());
        Self::resolve(&home.join(ROOT_DIR), profile.as_deref())
    }

    /// Resolve the profile directory under an explicit root.
    ///
    /// Test builds always land in a `_test` profile, whatever the caller asks for.
    pub fn resolve(root: &Path, profile: Option<&str>) -> Result<Self> {
        if let Some(name) = profile {
            validate_profile(name)?;
        }
        let profile = effective_profile(profile);

        let dir = match &profile {
            Some(name) => root.join("profiles").join(name),
            None => root.to_path_buf(),
        };
        Ok(Self { dir, profile })
    }

    pub fn sessions_file(&self) -> PathBuf {
        self.dir.join(SESSIONS_FILE)
    }

    pub fn config_file(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }
}

fn validate_profile(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DeckError::InvalidProfile(name.to_string()))
    }
}

#[cfg(not(test))]
fn effective_profile(profile: Option<&str>) -> Option<String> {
    profile.map(str::to_string)
}

#[cfg(test)]
fn effective_profile(profile: Option<&str>) -> Option<String> {
    match profile {
        Some(name) if name.starts_with("_test") => Some(name.to_string()),
        Some(name) => Some(format!("_test-{}", name)),
        None => Some("_test".to_string()),
    }
}

/// Tunables read from `config.json` in the profile directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Interval between status polls
    pub poll_interval_ms: u64,
    /// How long pane content must stay unchanged before a session turns idle
    pub idle_cooldown_ms: u64,
    /// Lines of pane text fed to the status detector each poll
    pub capture_lines: usize,
    /// tmux `history-limit` applied to sessions we create
    pub scrollback_lines: usize,
    /// Upper bound for any single tmux invocation
    pub command_timeout_ms: u64,
    /// How long a `list-sessions` result is reused
    pub list_cache_ttl_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            idle_cooldown_ms: 2000,
            capture_lines: 50,
            scrollback_lines: 50_000,
            command_timeout_ms: 5000,
            list_cache_ttl_ms: 2000,
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file is absent
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(DeckError::io(path, e)),
        };
        serde_json::from_str(&raw).map_err(|source| DeckError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_cooldown(&self) -> Duration {
        Duration::from_millis(self.idle_cooldown_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn list_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.list_cache_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_never_use_the_default_profile() {
        let paths = Paths::resolve(Path::new("/home/u/.agent-deck"), None).unwrap();
        assert_eq!(paths.dir, Path::new("/home/u/.agent-deck/profiles/_test"));

        let paths = Paths::resolve(Path::new("/root"), Some("work")).unwrap();
        assert_eq!(paths.dir, Path::new("/root/profiles/_test-work"));
        assert_eq!(paths.sessions_file(), Path::new("/root/profiles/_test-work/sessions.json"));
    }

    #[test]
    fn test_profile_names_are_validated() {
        assert!(matches!(
            Paths::resolve(Path::new("/root"), Some("../prod")),
            Err(DeckError::InvalidProfile(_))
        ));
        assert!(Paths::resolve(Path::new("/root"), Some("ci_1-a")).is_ok());
    }

    #[test]
    fn test_settings_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.idle_cooldown(), Duration::from_secs(2));
    }

    #[test]
    fn test_settings_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"poll_interval_ms": 500}"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.poll_interval(), Duration::from_millis(500));
        assert_eq!(settings.capture_lines, 50);
    }

    #[test]
    fn test_settings_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(Settings::load(&path), Err(DeckError::Parse { .. })));
    }
}
