use crossterm::event::KeyEvent;

/// Actions that can be dispatched through the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A key was pressed
    KeyPress(KeyEvent),
    /// Time to refresh session statuses
    Tick,
    /// An error occurred
    Error(String),
    /// Attach to an instance, starting its session if needed
    Attach(String),
    /// Register a project directory
    AddSession { path: String, group: Option<String> },
    /// Remove an instance and kill its session
    DeleteSession(String),
    RenameSession { id: String, title: String },
    MoveSession { id: String, group: String },
    CreateGroup(String),
    RenameGroup { old: String, new: String },
    /// Delete a group; `cascade` also removes its sessions
    DeleteGroup { path: String, cascade: bool },
    ToggleGroup(String),
    ReorderGroup { path: String, delta: i32 },
    /// Adopt tmux sessions started outside agent-deck
    Import,
}
