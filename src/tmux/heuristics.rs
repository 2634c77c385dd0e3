use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::session::Tool;

/// Activity state of a managed session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Output is changing or the tool shows a busy indicator
    #[serde(alias = "active")]
    Running,
    /// The tool is asking the operator something
    Waiting,
    /// Output has settled
    #[default]
    Idle,
    /// The tool printed an error, or the tmux session is gone
    Error,
}

impl Status {
    pub fn label(self) -> &'static str {
        match self {
            Status::Running => "running",
            Status::Waiting => "waiting",
            Status::Idle => "idle",
            Status::Error => "error",
        }
    }
}

/// Number of trailing non-blank lines inspected for prompts and errors
pub const TRAILING_WINDOW: usize = 5;

static RE_ANSI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b\][^\x07]*\x07").unwrap());

/// Busy, waiting and error patterns for one tool
struct RuleSet {
    busy: Regex,
    waiting: Regex,
    error: Regex,
}

impl RuleSet {
    fn new(busy: &str, waiting: &str, error: &str) -> Self {
        Self {
            busy: Regex::new(busy).unwrap(),
            waiting: Regex::new(waiting).unwrap(),
            error: Regex::new(error).unwrap(),
        }
    }
}

static CLAUDE: Lazy<RuleSet> = Lazy::new(|| {
    RuleSet::new(
        r"(?i)(esc to interrupt|ctrl\+c to interrupt|[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏✻✽✶✳✢]\s*\w+…)",
        r"(?mi)(Do you want to|Would you like to|\(y/n\)|\[y/n\]|❯\s*1\.\s*Yes|Yes, and don't ask again|No, and tell Claude|Press Enter to continue)",
        r"(?m)(API Error|^\s*⎿\s*Error:|Credit balance is too low|Request timed out|Invalid API key)",
    )
});

static AIDER: Lazy<RuleSet> = Lazy::new(|| {
    RuleSet::new(
        r"(?i)(Waiting for|[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]|Tokens: .*sent)",
        r"(?mi)(\(Y\)es/\(N\)o|\[Yes\]:\s*$|\(y/n\)|\[y/n\])",
        r"(?m)(litellm\.\w+Error|APIConnectionError|^Error:|^Traceback \(most recent call last\))",
    )
});

static GEMINI: Lazy<RuleSet> = Lazy::new(|| {
    RuleSet::new(
        r"(?i)(esc to cancel|[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏])",
        r"(?mi)(Allow execution|Apply this change\?|Yes, allow once|Do you want to proceed|\(y/n\)|\[y/n\])",
        r"(?m)(\[API Error|^\s*✕ |^Error:)",
    )
});

static CODEX: Lazy<RuleSet> = Lazy::new(|| {
    RuleSet::new(
        r"(?i)(esc to interrupt|Working \(|[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏])",
        r"(?mi)(Allow command\?|Would you like to run|Approve|›\s*1\.\s*Yes|\(y/n\)|\[y/n\])",
        r"(?m)(stream error|^\s*■ |^Error:)",
    )
});

static SHELL: Lazy<RuleSet> = Lazy::new(|| {
    RuleSet::new(
        r"(?i)([⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]|Downloading|Compiling)",
        r"(?mi)(\(y/n\)|\[y/n\]|Press Enter|password( for [^:]+)?:\s*$|Continue\?\s*$|Are you sure)",
        r"(?mi)(^(error|fatal)(\[\w+\])?:|command not found|No such file or directory|panicked at|^Traceback \(most recent call last\)|Segmentation fault)",
    )
});

/// Pattern set used to classify captured pane text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classifier {
    Claude,
    Aider,
    Gemini,
    Codex,
    /// Fallback for plain shells and unrecognized tools
    Shell,
}

impl Classifier {
    pub fn for_tool(tool: &Tool) -> Self {
        match tool {
            Tool::Claude => Classifier::Claude,
            Tool::Aider => Classifier::Aider,
            Tool::Gemini => Classifier::Gemini,
            Tool::Codex => Classifier::Codex,
            Tool::Shell | Tool::Cursor | Tool::Other(_) => Classifier::Shell,
        }
    }

    fn rules(self) -> &'static RuleSet {
        match self {
            Classifier::Claude => &CLAUDE,
            Classifier::Aider => &AIDER,
            Classifier::Gemini => &GEMINI,
            Classifier::Codex => &CODEX,
            Classifier::Shell => &SHELL,
        }
    }

    /// Content-only verdict over the trailing window: prompt beats error beats busy
    pub fn classify(self, tail: &str) -> Option<Status> {
        let rules = self.rules();
        if rules.waiting.is_match(tail) {
            Some(Status::Waiting)
        } else if rules.error.is_match(tail) {
            Some(Status::Error)
        } else if rules.busy.is_match(tail) {
            Some(Status::Running)
        } else {
            None
        }
    }
}

/// Remove terminal escape sequences
pub fn strip_ansi(content: &str) -> String {
    RE_ANSI.replace_all(content, "").into_owned()
}

/// Last `n` non-blank lines, oldest first
pub fn trailing_lines(content: &str, n: usize) -> String {
    let lines: Vec<&str> = content
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .take(n)
        .collect();
    lines.into_iter().rev().collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tail(content: &str) -> String {
        trailing_lines(content, TRAILING_WINDOW)
    }

    #[test]
    fn test_detect_waiting_for_input() {
        let content = "Some output\n\nProceed with changes? (Y/n)\n\n";
        assert_eq!(Classifier::Shell.classify(&tail(content)), Some(Status::Waiting));

        let content = "Edit src/main.rs\n Do you want to make this edit?\n❯ 1. Yes\n  2. No";
        assert_eq!(Classifier::Claude.classify(&tail(content)), Some(Status::Waiting));

        let content = "Add file to the chat? (Y)es/(N)o [Yes]:";
        assert_eq!(Classifier::Aider.classify(&tail(content)), Some(Status::Waiting));
    }

    #[test]
    fn test_detect_busy() {
        let content = "✻ Pondering… (12s · esc to interrupt)";
        assert_eq!(Classifier::Claude.classify(&tail(content)), Some(Status::Running));

        let content = "   Compiling serde v1.0.200";
        assert_eq!(Classifier::Shell.classify(&tail(content)), Some(Status::Running));
    }

    #[test]
    fn test_detect_error() {
        let content = "$ cargo bulid\nerror: no such command: `bulid`\n$ ";
        assert_eq!(Classifier::Shell.classify(&tail(content)), Some(Status::Error));

        let content = "  ⎿  API Error: 529 overloaded";
        assert_eq!(Classifier::Claude.classify(&tail(content)), Some(Status::Error));
    }

    #[test]
    fn test_prompt_beats_error() {
        let content = "error: tests failed\nRetry the build? (y/n)";
        assert_eq!(Classifier::Shell.classify(&tail(content)), Some(Status::Waiting));
    }

    #[test]
    fn test_plain_prompt_has_no_verdict() {
        assert_eq!(Classifier::Shell.classify(&tail("Previous output\n$ ")), None);
        assert_eq!(Classifier::Claude.classify(&tail("╭────╮\n│ >  │\n╰────╯")), None);
    }

    #[test]
    fn test_old_errors_fall_out_of_the_window() {
        let content = "error: first attempt failed\nok 1\nok 2\nok 3\nok 4\nok 5\n$";
        assert_eq!(Classifier::Shell.classify(&tail(content)), None);
    }

    #[test]
    fn test_unknown_tools_use_shell_rules() {
        assert_eq!(Classifier::for_tool(&Tool::Other("goose".into())), Classifier::Shell);
        assert_eq!(Classifier::for_tool(&Tool::Cursor), Classifier::Shell);
        assert_eq!(Classifier::for_tool(&Tool::Codex), Classifier::Codex);
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[38;5;123mHello\x1b[0m"), "Hello");
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&Status::Waiting).unwrap(), "\"waiting\"");
        let legacy: Status = serde_json::from_str("\"active\"").unwrap();
        assert_eq!(legacy, Status::Running);
    }
}
