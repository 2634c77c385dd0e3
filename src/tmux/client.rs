use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, info, warn};

use super::detector::ActivityTracker;
use super::heuristics::Status;
use super::{Multiplexer, Reconnected, SessionHandle, TmuxSession};
use crate::config::Settings;
use crate::error::{DeckError, Result};

/// Client for interacting with tmux via CLI
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: PathBuf,
    timeout: Duration,
    scrollback_lines: usize,
    cache_ttl: Duration,
    /// Last `list-sessions` result and when it was taken
    cache: Mutex<Option<(Instant, Vec<TmuxSession>)>>,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self::from_settings(&Settings::default())
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            tmux_path: PathBuf::from("tmux"),
            timeout: settings.command_timeout(),
            scrollback_lines: settings.scrollback_lines,
            cache_ttl: settings.list_cache_ttl(),
            cache: Mutex::new(None),
        }
    }

    /// Use a different tmux executable
    #[cfg(test)]
    pub fn with_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.tmux_path = path.into();
        self
    }

    /// Fail with install guidance when tmux cannot be run
    pub async fn ensure_available(&self) -> Result<String> {
        let output = self.run(["-V"]).await?;
        if !output.status.success() {
            return Err(DeckError::ToolUnavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args
            .into_iter()
            .map(|a| a.as_ref().to_os_string())
            .collect();
        let describe = || {
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        };

        let mut cmd = Command::new(&self.tmux_path);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(
                DeckError::ToolUnavailable(format!("{}: {}", self.tmux_path.display(), e)),
            ),
            Ok(Err(e)) => Err(DeckError::Command(format!("tmux {}: {}", describe(), e))),
            Err(_) => Err(DeckError::Timeout {
                timeout: self.timeout,
                command: format!("tmux {}", describe()),
            }),
        }
    }

    fn invalidate_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    fn cached_sessions(&self) -> Option<Vec<TmuxSession>> {
        let cache = self.cache.lock().ok()?;
        match cache.as_ref() {
            Some((at, sessions)) if at.elapsed() < self.cache_ttl => Some(sessions.clone()),
            _ => None,
        }
    }

    async fn set_option(&self, handle: &SessionHandle, option: &str, value: &str) -> Result<()> {
        let output = self
            .run(["set-option", "-t", exact(&handle.name).as_str(), option, value])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_session(&stderr) {
                return Err(DeckError::SessionNotFound(handle.name.clone()));
            }
            return Err(DeckError::Command(format!(
                "set-option {} failed: {}",
                option,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer for TmuxClient {
    async fn create(&self, name: &str, work_dir: &Path, command: &str) -> Result<SessionHandle> {
        let mut args: Vec<OsString> = vec![
            "new-session".into(),
            "-d".into(),
            "-s".into(),
            name.into(),
            "-c".into(),
            work_dir.as_os_str().to_os_string(),
        ];
        if !command.trim().is_empty() {
            args.push(command.into());
        }

        let output = self.run(args).await.map_err(|e| match e {
            DeckError::ToolUnavailable(_) | DeckError::Timeout { .. } | DeckError::Command(_) => {
                DeckError::Creation {
                    name: name.to_string(),
                    reason: e.to_string(),
                }
            }
            other => other,
        })?;
        self.invalidate_cache();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("duplicate session") {
                return Err(DeckError::SessionExists(name.to_string()));
            }
            return Err(DeckError::Creation {
                name: name.to_string(),
                reason: stderr.trim().to_string(),
            });
        }

        let handle = SessionHandle::new(name, work_dir);
        let limit = self.scrollback_lines.to_string();
        if let Err(e) = self.set_option(&handle, "history-limit", &limit).await {
            warn!("Failed to set history-limit on {}: {}", name, e);
        }

        info!("Created tmux session {} in {}", name, work_dir.display());
        Ok(handle)
    }

    fn reconnect(
        &self,
        name: &str,
        title: &str,
        work_dir: &Path,
        command: &str,
        prior_status: Status,
    ) -> Reconnected {
        debug!(
            "Reconnecting '{}' to tmux session {} ({}, prior status {})",
            title,
            name,
            if command.is_empty() { "shell" } else { command },
            prior_status.label()
        );
        Reconnected {
            handle: SessionHandle::new(name, work_dir),
            tracker: ActivityTracker::resume(prior_status),
        }
    }

    async fn exists(&self, handle: &SessionHandle) -> Result<bool> {
        let sessions = self.list_sessions().await?;
        Ok(sessions.iter().any(|s| s.name == handle.name))
    }

    async fn capture(&self, handle: &SessionHandle, max_lines: usize) -> Result<String> {
        let start = format!("-{}", max_lines);
        let target = format!("{}:", exact(&handle.name));
        let output = self
            .run(["capture-pane", "-p", "-J", "-t", target.as_str(), "-S", start.as_str()])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_session(&stderr) {
                return Ok(String::new());
            }
            return Err(DeckError::Command(format!(
                "capture-pane failed: {}",
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn kill(&self, handle: &SessionHandle) -> Result<()> {
        let output = self
            .run(["kill-session", "-t", exact(&handle.name).as_str()])
            .await?;
        self.invalidate_cache();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_session(&stderr) {
                debug!("tmux session {} already gone", handle.name);
                return Ok(());
            }
            return Err(DeckError::Command(format!(
                "Failed to kill session: {}",
                stderr.trim()
            )));
        }

        info!("Killed tmux session {}", handle.name);
        Ok(())
    }

    async fn enable_mouse_mode(&self, handle: &SessionHandle) -> Result<()> {
        self.set_option(handle, "mouse", "on").await
    }

    async fn list_sessions(&self) -> Result<Vec<TmuxSession>> {
        if let Some(sessions) = self.cached_sessions() {
            return Ok(sessions);
        }

        // Format: session_id|session_name|session_created|session_attached|pane_current_path
        let output = self
            .run([
                "list-sessions",
                "-F",
                "#{session_id}|#{session_name}|#{session_created}|#{session_attached}|#{pane_current_path}",
            ])
            .await?;

        let sessions = if output.status.success() {
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter_map(parse_session_line)
                .collect()
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !is_missing_server(&stderr) {
                return Err(DeckError::Command(format!(
                    "tmux list-sessions failed: {}",
                    stderr.trim()
                )));
            }
            Vec::new()
        };

        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some((Instant::now(), sessions.clone()));
        }
        Ok(sessions)
    }

    fn attach_command(&self, handle: &SessionHandle) -> Vec<String> {
        vec![
            self.tmux_path.to_string_lossy().into_owned(),
            "attach-session".to_string(),
            "-t".to_string(),
            exact(&handle.name),
        ]
    }
}

/// Target a session by exact name rather than prefix
fn exact(name: &str) -> String {
    format!("={}", name)
}

fn is_missing_server(stderr: &str) -> bool {
    stderr.contains("no server running")
        || stderr.contains("no sessions")
        || stderr.contains("error connecting to")
}

fn is_missing_session(stderr: &str) -> bool {
    is_missing_server(stderr)
        || stderr.contains("can't find session")
        || stderr.contains("session not found")
        || stderr.contains("can't find pane")
}

fn parse_session_line(line: &str) -> Option<TmuxSession> {
    let parts: Vec<&str> = line.splitn(5, '|').collect();
    if parts.len() < 4 {
        return None;
    }

    Some(TmuxSession {
        id: parts[0].to_string(),
        name: parts[1].to_string(),
        created_at: parts[2].parse().unwrap_or(0),
        attached_clients: parts[3].parse().unwrap_or(0),
        work_dir: parts.get(4).map(PathBuf::from).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_line() {
        let session =
            parse_session_line("$3|agentdeck_api_1234abcd|1700000000|2|/home/u/a|b").unwrap();
        assert_eq!(session.id, "$3");
        assert_eq!(session.name, "agentdeck_api_1234abcd");
        assert_eq!(session.created_at, 1_700_000_000);
        assert_eq!(session.attached_clients, 2);
        assert_eq!(session.work_dir, PathBuf::from("/home/u/a|b"));
        assert!(session.is_managed());

        assert!(parse_session_line("garbage").is_none());
    }

    #[test]
    fn test_attach_command_targets_exact_name() {
        let client = TmuxClient::new();
        let handle = SessionHandle::new("agentdeck_x_1", "/tmp");
        assert_eq!(
            client.attach_command(&handle),
            vec!["tmux", "attach-session", "-t", "=agentdeck_x_1"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_unavailable() {
        let client = TmuxClient::new().with_binary("/nonexistent/bin/tmux");
        assert!(matches!(
            client.ensure_available().await,
            Err(DeckError::ToolUnavailable(_))
        ));
    }

    #[test]
    fn test_reconnect_keeps_prior_status() {
        let client = TmuxClient::new();
        let reconnected = client.reconnect("s", "t", Path::new("/tmp"), "", Status::Waiting);
        assert_eq!(reconnected.handle, SessionHandle::new("s", "/tmp"));
        assert_eq!(reconnected.tracker.status(), Status::Waiting);
    }

    /// Fake tmux that appends every invocation to `calls`
    #[cfg(unix)]
    fn scripted_tmux(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let calls = dir.join("calls");
        let script = dir.join("tmux");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$*\" >> '{}'\ncase \"$1\" in\n  list-sessions) printf '$0|agentdeck_api_1234abcd|1700000000|1|/home/u/api\\n$1|scratch|1700000001|0|/tmp\\n' ;;\n  kill-session) echo \"can't find session: $3\" >&2; exit 1 ;;\n  *) exit 0 ;;\nesac\n",
                calls.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    fn recorded_calls(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[cfg(unix)]
    fn count_lists(dir: &Path) -> usize {
        recorded_calls(dir)
            .iter()
            .filter(|c| c.starts_with("list-sessions"))
            .count()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scripted_tmux_cache_and_idempotent_kill() {
        let dir = tempfile::tempdir().unwrap();
        let client = TmuxClient::new().with_binary(scripted_tmux(dir.path()));
        let count = || recorded_calls(dir.path()).len();

        let sessions = client.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions[0].is_managed());
        assert!(!sessions[1].is_managed());

        let handle = SessionHandle::new("agentdeck_api_1234abcd", "/home/u/api");
        assert!(client.exists(&handle).await.unwrap());
        assert_eq!(count(), 1);

        // Already gone on the tmux side
        client.kill(&handle).await.unwrap();
        client.kill(&handle).await.unwrap();
        assert_eq!(count(), 3);

        client.list_sessions().await.unwrap();
        assert_eq!(count(), 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_create_invalidates_list_cache() {
        let dir = tempfile::tempdir().unwrap();
        let client = TmuxClient::new().with_binary(scripted_tmux(dir.path()));

        client.list_sessions().await.unwrap();
        client.list_sessions().await.unwrap();
        assert_eq!(count_lists(dir.path()), 1);

        client
            .create("agentdeck_web_5678abcd", Path::new("/tmp"), "")
            .await
            .unwrap();
        client.list_sessions().await.unwrap();
        assert_eq!(count_lists(dir.path()), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_cache_expires() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            list_cache_ttl_ms: 50,
            ..Settings::default()
        };
        let client = TmuxClient::from_settings(&settings).with_binary(scripted_tmux(dir.path()));

        client.list_sessions().await.unwrap();
        client.list_sessions().await.unwrap();
        assert_eq!(count_lists(dir.path()), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        client.list_sessions().await.unwrap();
        assert_eq!(count_lists(dir.path()), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture_targets_exact_session() {
        let dir = tempfile::tempdir().unwrap();
        let client = TmuxClient::new().with_binary(scripted_tmux(dir.path()));
        let handle = SessionHandle::new("agentdeck_api_1234abcd", "/home/u/api");

        client.capture(&handle, 40).await.unwrap();
        assert_eq!(
            recorded_calls(dir.path()),
            vec!["capture-pane -p -J -t =agentdeck_api_1234abcd: -S -40"]
        );
    }
}
