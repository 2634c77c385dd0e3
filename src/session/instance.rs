use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tmux::{SessionHandle, Status, SESSION_PREFIX};

/// Group assigned when nothing better can be derived
pub const DEFAULT_GROUP: &str = "default";

/// Program running inside a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Tool {
    #[default]
    Shell,
    Claude,
    Aider,
    Gemini,
    Codex,
    Cursor,
    Other(String),
}

impl Tool {
    /// Guess the tool from a launch command
    pub fn from_command(command: &str) -> Self {
        let command = command.to_lowercase();
        [
            ("claude", Tool::Claude),
            ("aider", Tool::Aider),
            ("gemini", Tool::Gemini),
            ("codex", Tool::Codex),
            ("cursor", Tool::Cursor),
        ]
        .into_iter()
        .find(|(needle, _)| command.contains(needle))
        .map(|(_, tool)| tool)
        .unwrap_or(Tool::Shell)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Tool::Shell => "shell",
            Tool::Claude => "claude",
            Tool::Aider => "aider",
            Tool::Gemini => "gemini",
            Tool::Codex => "codex",
            Tool::Cursor => "cursor",
            Tool::Other(name) => name,
        }
    }
}

impl From<String> for Tool {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "shell" => Tool::Shell,
            "claude" => Tool::Claude,
            "aider" => Tool::Aider,
            "gemini" => Tool::Gemini,
            "codex" => Tool::Codex,
            "cursor" => Tool::Cursor,
            _ => Tool::Other(value),
        }
    }
}

impl From<Tool> for String {
    fn from(tool: Tool) -> Self {
        tool.as_str().to_string()
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link between an instance and its tmux session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Binding {
    /// No session was ever created or imported
    #[default]
    Unbound,
    Bound(SessionHandle),
    /// The session vanished; the handle is kept in case it comes back
    Lost(SessionHandle),
}

impl Binding {
    pub fn handle(&self) -> Option<&SessionHandle> {
        match self {
            Binding::Unbound => None,
            Binding::Bound(handle) | Binding::Lost(handle) => Some(handle),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, Binding::Bound(_))
    }

    /// Session name as persisted, empty when unbound
    pub fn session_name(&self) -> &str {
        self.handle().map(|h| h.name.as_str()).unwrap_or("")
    }
}

/// One managed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub title: String,
    pub project_path: PathBuf,
    pub group_path: String,
    pub command: String,
    pub tool: Tool,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub binding: Binding,
}

impl Instance {
    /// New, unbound instance; the group defaults to the project's parent folder
    pub fn new(title: impl Into<String>, project_path: impl Into<PathBuf>) -> Self {
        let project_path = project_path.into();
        let group_path = group_path_for_project(&project_path);
        Self {
            id: Uuid::new_v4().simple().to_string(),
            title: title.into(),
            project_path,
            group_path,
            command: String::new(),
            tool: Tool::Shell,
            status: Status::Idle,
            created_at: Utc::now(),
            binding: Binding::Unbound,
        }
    }

    pub fn with_group(mut self, group_path: &str) -> Self {
        let group_path = normalize_group_path(group_path);
        if !group_path.is_empty() {
            self.group_path = group_path;
        }
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self.tool = Tool::from_command(&self.command);
        self
    }

    /// Short id shown in listings
    pub fn short_id(&self) -> &str {
        id_prefix(&self.id, 12)
    }

    /// tmux session name used when this instance starts a session
    pub fn session_name(&self) -> String {
        let title: String = self
            .title
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        format!("{}{}_{}", SESSION_PREFIX, title, id_prefix(&self.id, 8))
    }

    /// Whether the instance sits in `group` or one of its descendants
    pub fn in_group(&self, group: &str) -> bool {
        is_same_or_descendant(&self.group_path, group)
    }
}

/// First `chars` characters of an id; ids read from disk need not be ASCII
fn id_prefix(id: &str, chars: usize) -> &str {
    id.char_indices().nth(chars).map_or(id, |(end, _)| &id[..end])
}

/// Group path derived from the parent folder of a project
pub fn group_path_for_project(project_path: &Path) -> String {
    project_path
        .parent()
        .and_then(Path::file_name)
        .map(|name| normalize_group_path(&name.to_string_lossy()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_GROUP.to_string())
}

/// Trim whitespace and slashes, dropping empty segments
pub fn normalize_group_path(path: &str) -> String {
    path.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    path == ancestor
        || (path.len() > ancestor.len()
            && path.starts_with(ancestor)
            && path.as_bytes()[ancestor.len()] == b'/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_tool_from_command() {
        assert_eq!(Tool::from_command("claude --resume"), Tool::Claude);
        assert_eq!(Tool::from_command("AIDER --model x"), Tool::Aider);
        assert_eq!(Tool::from_command("npx @google/gemini-cli"), Tool::Gemini);
        assert_eq!(Tool::from_command("codex"), Tool::Codex);
        assert_eq!(Tool::from_command("cursor-agent"), Tool::Cursor);
        assert_eq!(Tool::from_command("htop"), Tool::Shell);
    }

    #[test]
    fn test_unknown_tool_survives_serialization() {
        let tool: Tool = serde_json::from_str("\"goose\"").unwrap();
        assert_eq!(tool, Tool::Other("goose".into()));
        assert_eq!(serde_json::to_string(&tool).unwrap(), "\"goose\"");
    }

    #[test]
    fn test_default_group_from_parent_folder() {
        assert_eq!(group_path_for_project(Path::new("/home/u/work/api")), "work");
        assert_eq!(group_path_for_project(Path::new("/api")), DEFAULT_GROUP);
        assert_eq!(group_path_for_project(Path::new("/")), DEFAULT_GROUP);
    }

    #[test]
    fn test_new_instance() {
        let inst = Instance::new("api", "/home/u/work/api")
            .with_group(" clients/acme/ ")
            .with_command("claude");

        assert_eq!(inst.id.len(), 32);
        assert_eq!(inst.group_path, "clients/acme");
        assert_eq!(inst.tool, Tool::Claude);
        assert_eq!(inst.status, Status::Idle);
        assert_eq!(inst.binding, Binding::Unbound);
    }

    #[test]
    fn test_session_name_is_sanitized_and_prefixed() {
        let mut inst = Instance::new("My App: v2", "/tmp/app");
        inst.id = "0123456789abcdef0123456789abcdef".into();
        assert_eq!(inst.session_name(), "agentdeck_My-App--v2_01234567");
    }

    #[test]
    fn test_non_ascii_id_is_cut_on_char_boundary() {
        let mut inst = Instance::new("api", "/tmp/api");
        inst.id = "aéééééééééééééé".into();
        assert_eq!(inst.short_id(), "aééééééééééé");
        assert_eq!(inst.session_name(), "agentdeck_api_aééééééé");

        inst.id = "abc".into();
        assert_eq!(inst.short_id(), "abc");
    }

    #[test]
    fn test_group_membership() {
        let inst = Instance::new("x", "/tmp/x").with_group("work/api");
        assert!(inst.in_group("work"));
        assert!(inst.in_group("work/api"));
        assert!(!inst.in_group("wor"));
        assert!(!inst.in_group("work/ap"));
    }
}
