use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
    Frame,
};

use crate::actions::Action;
use crate::session::{Binding, GroupTree, Instance};
use crate::tmux::Status;

/// Theme colors
pub struct Theme {
    pub fg: Color,
    pub accent: Color,
    pub dim: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            fg: Color::Rgb(220, 220, 220),
            accent: Color::Rgb(217, 119, 87),
            dim: Color::Rgb(100, 100, 100),
            success: Color::Rgb(80, 200, 120),
            warning: Color::Rgb(255, 193, 7),
            error: Color::Rgb(220, 53, 69),
        }
    }
}

/// One line of the session tree
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Group {
        path: String,
        name: String,
        depth: usize,
        expanded: bool,
        count: usize,
    },
    Session {
        depth: usize,
        instance: Instance,
    },
}

impl Row {
    /// Stable identity used to keep the selection across refreshes
    fn key(&self) -> &str {
        match self {
            Row::Group { path, .. } => path,
            Row::Session { instance, .. } => &instance.id,
        }
    }

    /// Group the row lives in, or is
    fn group_path(&self) -> &str {
        match self {
            Row::Group { path, .. } => path,
            Row::Session { instance, .. } => &instance.group_path,
        }
    }
}

/// Flatten the group tree into display rows, skipping collapsed subtrees
pub fn build_rows(instances: &[Instance], groups: &GroupTree) -> Vec<Row> {
    let mut rows = Vec::new();
    for root in groups.roots() {
        push_group(&mut rows, instances, groups, &root.path, 0);
    }
    rows
}

fn push_group(rows: &mut Vec<Row>, instances: &[Instance], groups: &GroupTree, path: &str, depth: usize) {
    let Some(group) = groups.get(path) else {
        return;
    };
    rows.push(Row::Group {
        path: group.path.clone(),
        name: group.name.clone(),
        depth,
        expanded: group.expanded,
        count: groups.instance_count(instances, &group.path),
    });
    if !group.expanded {
        return;
    }
    for inst in instances.iter().filter(|i| i.group_path == group.path) {
        rows.push(Row::Session {
            depth: depth + 1,
            instance: inst.clone(),
        });
    }
    for child in groups.children(Some(&group.path)) {
        push_group(rows, instances, groups, &child.path, depth + 1);
    }
}

/// What a text prompt is collecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    NewSession { group: Option<String> },
    NewGroup { parent: Option<String> },
    RenameSession { id: String },
    RenameGroup { path: String },
    MoveSession { id: String },
}

impl Prompt {
    fn title(&self) -> &'static str {
        match self {
            Prompt::NewSession { .. } => " New Session ",
            Prompt::NewGroup { .. } => " New Group ",
            Prompt::RenameSession { .. } => " Rename Session ",
            Prompt::RenameGroup { .. } => " Rename Group ",
            Prompt::MoveSession { .. } => " Move Session ",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Prompt::NewSession { .. } => "Project directory:",
            Prompt::NewGroup { .. } => "Group name:",
            Prompt::RenameSession { .. } => "New title:",
            Prompt::RenameGroup { .. } => "New group path:",
            Prompt::MoveSession { .. } => "Target group path:",
        }
    }

    fn accepts(&self, c: char) -> bool {
        match self {
            Prompt::NewGroup { .. } | Prompt::RenameGroup { .. } | Prompt::MoveSession { .. } => {
                c.is_alphanumeric() || matches!(c, '-' | '_' | '/' | '.' | ' ')
            }
            _ => !c.is_control(),
        }
    }

    fn into_action(self, input: String) -> Option<Action> {
        let input = input.trim().to_string();
        if input.is_empty() {
            return None;
        }
        Some(match self {
            Prompt::NewSession { group } => Action::AddSession { path: input, group },
            Prompt::NewGroup { parent } => Action::CreateGroup(match parent {
                Some(parent) => format!("{}/{}", parent, input),
                None => input,
            }),
            Prompt::RenameSession { id } => Action::RenameSession { id, title: input },
            Prompt::RenameGroup { path } => Action::RenameGroup { old: path, new: input },
            Prompt::MoveSession { id } => Action::MoveSession { id, group: input },
        })
    }
}

/// What a yes/no dialog would delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirm {
    DeleteSession { id: String, title: String },
    DeleteGroup { path: String, count: usize },
}

/// Input mode for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Prompting(Prompt),
    Confirming(Confirm),
}

/// Footer message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub is_error: bool,
}

/// Main application state
pub struct App {
    /// Flattened session tree
    pub rows: Vec<Row>,
    /// Currently selected row index
    pub list_state: ListState,
    /// Current message to display (info or error)
    pub message: Option<Message>,
    /// Theme
    pub theme: Theme,
    /// Current input mode
    pub input_mode: InputMode,
    /// Text input buffer
    pub input_buffer: String,
    /// Pending action queue
    pub pending_actions: Vec<Action>,
    /// Pre-filled directory for new sessions
    default_dir: String,
}

impl App {
    pub fn new(default_dir: impl Into<String>) -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            rows: Vec::new(),
            list_state,
            message: None,
            theme: Theme::default(),
            input_mode: InputMode::Normal,
            input_buffer: String::new(),
            pending_actions: Vec::new(),
            default_dir: default_dir.into(),
        }
    }

    /// Rebuild rows from the deck, keeping the same row selected when it still exists
    pub fn sync(&mut self, instances: &[Instance], groups: &GroupTree) {
        let selected_key = self.selected_row().map(|r| r.key().to_string());
        let selected_idx = self.list_state.selected().unwrap_or(0);

        self.rows = build_rows(instances, groups);

        let idx = selected_key
            .and_then(|key| self.rows.iter().position(|r| r.key() == key))
            .unwrap_or_else(|| selected_idx.min(self.rows.len().saturating_sub(1)));
        self.list_state.select(Some(idx));
    }

    /// Get the currently selected row
    pub fn selected_row(&self) -> Option<&Row> {
        self.list_state.selected().and_then(|i| self.rows.get(i))
    }

    pub fn selected_instance(&self) -> Option<&Instance> {
        match self.selected_row() {
            Some(Row::Session { instance, .. }) => Some(instance),
            _ => None,
        }
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.message = Some(Message {
            text: text.into(),
            is_error: false,
        });
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.message = Some(Message {
            text: text.into(),
            is_error: true,
        });
    }

    /// Take pending actions (drains the queue)
    pub fn take_pending_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.pending_actions)
    }

    /// Handle an action and return whether to quit
    pub fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::KeyPress(key) => self.handle_key(key),
            Action::Error(msg) => {
                self.error(msg);
                Ok(false)
            }
            // Ticks queued behind a slow poll collapse into one
            Action::Tick if self.pending_actions.contains(&Action::Tick) => Ok(false),
            other => {
                self.pending_actions.push(other);
                Ok(false)
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        // Clear message on any key press
        if self.message.is_some() && self.input_mode == InputMode::Normal {
            self.message = None;
        }

        match self.input_mode {
            InputMode::Normal => self.handle_normal_key(key),
            InputMode::Prompting(_) => self.handle_prompt_key(key),
            InputMode::Confirming(_) => self.handle_confirming_key(key),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(true);
            }
            KeyCode::Char('j') | KeyCode::Down => self.next_row(),
            KeyCode::Char('k') | KeyCode::Up => self.previous_row(),
            KeyCode::Enter => match self.selected_row() {
                Some(Row::Session { instance, .. }) => {
                    let id = instance.id.clone();
                    self.pending_actions.push(Action::Attach(id));
                }
                Some(Row::Group { path, .. }) => {
                    let path = path.clone();
                    self.pending_actions.push(Action::ToggleGroup(path));
                }
                None => {}
            },
            KeyCode::Char(' ') | KeyCode::Left | KeyCode::Right | KeyCode::Char('h') | KeyCode::Char('l') => {
                if let Some(Row::Group { path, expanded, .. }) = self.selected_row() {
                    let wants_expanded = matches!(key.code, KeyCode::Right | KeyCode::Char('l'));
                    let wants_collapsed = matches!(key.code, KeyCode::Left | KeyCode::Char('h'));
                    if !(wants_expanded && *expanded) && !(wants_collapsed && !*expanded) {
                        let path = path.clone();
                        self.pending_actions.push(Action::ToggleGroup(path));
                    }
                }
            }
            KeyCode::Char('n') => {
                let group = self.selected_row().map(|r| r.group_path().to_string());
                self.input_buffer = self.default_dir.clone();
                self.input_mode = InputMode::Prompting(Prompt::NewSession { group });
            }
            KeyCode::Char('g') => {
                let parent = match self.selected_row() {
                    Some(Row::Group { path, .. }) => Some(path.clone()),
                    _ => None,
                };
                self.input_buffer.clear();
                self.input_mode = InputMode::Prompting(Prompt::NewGroup { parent });
            }
            KeyCode::Char('r') => {
                let prompt = match self.selected_row() {
                    Some(Row::Session { instance, .. }) => Some((
                        instance.title.clone(),
                        Prompt::RenameSession {
                            id: instance.id.clone(),
                        },
                    )),
                    Some(Row::Group { path, .. }) => {
                        Some((path.clone(), Prompt::RenameGroup { path: path.clone() }))
                    }
                    None => None,
                };
                if let Some((current, prompt)) = prompt {
                    self.input_buffer = current;
                    self.input_mode = InputMode::Prompting(prompt);
                }
            }
            KeyCode::Char('m') => {
                let selected = self
                    .selected_instance()
                    .map(|inst| (inst.id.clone(), inst.group_path.clone()));
                if let Some((id, group)) = selected {
                    self.input_buffer = group;
                    self.input_mode = InputMode::Prompting(Prompt::MoveSession { id });
                }
            }
            KeyCode::Char('d') => {
                let confirm = match self.selected_row() {
                    Some(Row::Session { instance, .. }) => Some(Confirm::DeleteSession {
                        id: instance.id.clone(),
                        title: instance.title.clone(),
                    }),
                    Some(Row::Group { path, count, .. }) => Some(Confirm::DeleteGroup {
                        path: path.clone(),
                        count: *count,
                    }),
                    None => None,
                };
                if let Some(confirm) = confirm {
                    self.input_mode = InputMode::Confirming(confirm);
                }
            }
            KeyCode::Char('K') | KeyCode::Char('J') => {
                if let Some(Row::Group { path, .. }) = self.selected_row() {
                    let delta = if key.code == KeyCode::Char('K') { -1 } else { 1 };
                    let path = path.clone();
                    self.pending_actions.push(Action::ReorderGroup { path, delta });
                }
            }
            KeyCode::Char('i') => self.pending_actions.push(Action::Import),
            _ => {}
        }
        Ok(false)
    }

    fn handle_prompt_key(&mut self, key: KeyEvent) -> Result<bool> {
        let InputMode::Prompting(prompt) = &self.input_mode else {
            return Ok(false);
        };
        match key.code {
            KeyCode::Enter => {
                let prompt = prompt.clone();
                let input = std::mem::take(&mut self.input_buffer);
                if let Some(action) = prompt.into_action(input) {
                    self.pending_actions.push(action);
                }
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Esc => {
                self.input_buffer.clear();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char(c) => {
                if prompt.accepts(c) {
                    self.input_buffer.push(c);
                }
            }
            KeyCode::Backspace => {
                self.input_buffer.pop();
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_confirming_key(&mut self, key: KeyEvent) -> Result<bool> {
        let InputMode::Confirming(confirm) = &self.input_mode else {
            return Ok(false);
        };
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                let action = match confirm {
                    Confirm::DeleteSession { id, .. } => Action::DeleteSession(id.clone()),
                    Confirm::DeleteGroup { path, count } => Action::DeleteGroup {
                        path: path.clone(),
                        cascade: *count > 0,
                    },
                };
                self.pending_actions.push(action);
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
            }
            _ => {}
        }
        Ok(false)
    }

    fn next_row(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let i = match self.list_state.selected() {
            Some(i) if i + 1 < self.rows.len() => i + 1,
            _ => 0,
        };
        self.list_state.select(Some(i));
    }

    fn previous_row(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let i = match self.list_state.selected() {
            Some(0) | None => self.rows.len() - 1,
            Some(i) => i - 1,
        };
        self.list_state.select(Some(i));
    }

    fn status_style(&self, status: Status) -> (&'static str, Color) {
        match status {
            Status::Running => ("● ", self.theme.success),
            Status::Waiting => ("◐ ", self.theme.warning),
            Status::Idle => ("○ ", self.theme.dim),
            Status::Error => ("✕ ", self.theme.error),
        }
    }

    pub fn render(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Main content
                Constraint::Length(3), // Footer/status
            ])
            .split(frame.area());

        self.render_header(frame, chunks[0]);
        self.render_main(frame, chunks[1]);
        self.render_footer(frame, chunks[2]);

        match &self.input_mode {
            InputMode::Prompting(prompt) => self.render_prompt_dialog(frame, prompt),
            InputMode::Confirming(confirm) => self.render_confirm_dialog(frame, confirm),
            InputMode::Normal => {}
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let mut counts = [0usize; 4];
        for row in &self.rows {
            if let Row::Session { instance, .. } = row {
                counts[instance.status as usize] += 1;
            }
        }
        let mut spans = vec![
            Span::styled(
                " Agent Deck ",
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled("│ ", Style::default().fg(self.theme.dim)),
        ];
        for status in [Status::Running, Status::Waiting, Status::Idle, Status::Error] {
            let (icon, color) = self.status_style(status);
            spans.push(Span::styled(
                format!("{}{} {}  ", icon, counts[status as usize], status.label()),
                Style::default().fg(color),
            ));
        }

        let title = Paragraph::new(Line::from(spans)).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(title, area);
    }

    fn render_main(&mut self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(45), // Session tree
                Constraint::Percentage(55), // Detail pane
            ])
            .split(area);

        self.render_session_list(frame, chunks[0]);
        self.render_detail_pane(frame, chunks[1]);
    }

    fn render_session_list(&mut self, frame: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = if self.rows.is_empty() {
            vec![ListItem::new(Line::from(Span::styled(
                "  No sessions yet. Press 'n' to add one or 'i' to import tmux sessions.",
                Style::default().fg(self.theme.dim),
            )))]
        } else {
            self.rows
                .iter()
                .map(|row| match row {
                    Row::Group {
                        name,
                        depth,
                        expanded,
                        count,
                        ..
                    } => {
                        let arrow = if *expanded { "▾ " } else { "▸ " };
                        ListItem::new(Line::from(vec![
                            Span::raw("  ".repeat(*depth)),
                            Span::styled(arrow, Style::default().fg(self.theme.dim)),
                            Span::styled(
                                name.clone(),
                                Style::default()
                                    .fg(self.theme.accent)
                                    .add_modifier(Modifier::BOLD),
                            ),
                            Span::styled(format!(" ({})", count), Style::default().fg(self.theme.dim)),
                        ]))
                    }
                    Row::Session { depth, instance } => {
                        let (icon, color) = self.status_style(instance.status);
                        ListItem::new(Line::from(vec![
                            Span::raw("  ".repeat(*depth)),
                            Span::styled(icon, Style::default().fg(color)),
                            Span::styled(instance.title.clone(), Style::default().fg(self.theme.fg)),
                            Span::styled(
                                format!("  {}", instance.tool),
                                Style::default().fg(self.theme.dim),
                            ),
                        ]))
                    }
                })
                .collect()
        };

        let list = List::new(items)
            .block(
                Block::default()
                    .title(" Sessions ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.dim)),
            )
            .highlight_style(
                Style::default()
                    .bg(Color::Rgb(50, 50, 50))
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");

        frame.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn detail_line<'a>(&self, label: &'a str, value: String, color: Color) -> Line<'a> {
        Line::from(vec![
            Span::styled(label, Style::default().fg(self.theme.dim)),
            Span::styled(value, Style::default().fg(color)),
        ])
    }

    fn render_detail_pane(&self, frame: &mut Frame, area: Rect) {
        let content = match self.selected_row() {
            Some(Row::Session { instance, .. }) => {
                let (_, status_color) = self.status_style(instance.status);
                let session = match &instance.binding {
                    Binding::Bound(handle) => handle.name.clone(),
                    Binding::Lost(handle) => format!("{} (gone)", handle.name),
                    Binding::Unbound => "not started".to_string(),
                };
                vec![
                    self.detail_line("Title:   ", instance.title.clone(), self.theme.fg),
                    self.detail_line("ID:      ", instance.short_id().to_string(), self.theme.fg),
                    self.detail_line("Status:  ", instance.status.label().to_string(), status_color),
                    self.detail_line("Tool:    ", instance.tool.to_string(), self.theme.fg),
                    self.detail_line(
                        "Path:    ",
                        instance.project_path.display().to_string(),
                        self.theme.fg,
                    ),
                    self.detail_line("Group:   ", instance.group_path.clone(), self.theme.fg),
                    self.detail_line("Session: ", session, self.theme.fg),
                    self.detail_line(
                        "Created: ",
                        instance.created_at.format("%Y-%m-%d %H:%M").to_string(),
                        self.theme.fg,
                    ),
                    Line::from(""),
                    Line::from(Span::styled(
                        "Enter: attach │ r: rename │ m: move │ d: delete",
                        Style::default().fg(self.theme.dim),
                    )),
                ]
            }
            Some(Row::Group { path, count, .. }) => vec![
                self.detail_line("Group:    ", path.clone(), self.theme.accent),
                self.detail_line("Sessions: ", count.to_string(), self.theme.fg),
                Line::from(""),
                Line::from(Span::styled(
                    "Enter: fold │ g: subgroup │ r: rename │ J/K: reorder │ d: delete",
                    Style::default().fg(self.theme.dim),
                )),
            ],
            None => vec![
                Line::from(Span::styled(
                    "Nothing selected",
                    Style::default().fg(self.theme.dim),
                )),
                Line::from(""),
                Line::from(Span::styled(
                    "Press 'n' to add a session",
                    Style::default().fg(self.theme.dim),
                )),
            ],
        };

        let detail = Paragraph::new(content).block(
            Block::default()
                .title(" Details ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(detail, area);
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let help_text =
            " q: Quit │ j/k: Navigate │ Enter: Attach/Fold │ n: New │ g: Group │ i: Import │ d: Delete ";

        let content = match &self.message {
            Some(msg) => {
                let color = if msg.is_error {
                    self.theme.error
                } else {
                    self.theme.success
                };
                Line::from(Span::styled(format!(" {} ", msg.text), Style::default().fg(color)))
            }
            None => Line::from(Span::styled(help_text, Style::default().fg(self.theme.dim))),
        };

        let footer = Paragraph::new(content).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(footer, area);
    }

    fn render_prompt_dialog(&self, frame: &mut Frame, prompt: &Prompt) {
        let area = centered_rect(60, 25, frame.area());

        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(prompt.title())
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.accent));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let mut text = vec![
            Line::from(""),
            Line::from(Span::styled(prompt.label(), Style::default().fg(self.theme.fg))),
            Line::from(""),
            Line::from(Span::styled(
                format!("▶ {}_", self.input_buffer),
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
        ];
        if let Prompt::NewSession { group: Some(group) } = prompt {
            text.push(Line::from(Span::styled(
                format!("Group: {}", group),
                Style::default().fg(self.theme.dim),
            )));
        }
        text.push(Line::from(Span::styled(
            "Press Enter to confirm, Esc to cancel",
            Style::default().fg(self.theme.dim),
        )));

        frame.render_widget(Paragraph::new(text), inner);
    }

    fn render_confirm_dialog(&self, frame: &mut Frame, confirm: &Confirm) {
        let area = centered_rect(50, 20, frame.area());

        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(" Confirm Delete ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.error));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let (question, warning) = match confirm {
            Confirm::DeleteSession { title, .. } => (
                format!("Delete session '{}'?", title),
                "Its tmux session will be killed.".to_string(),
            ),
            Confirm::DeleteGroup { path, count: 0 } => {
                (format!("Delete group '{}'?", path), String::new())
            }
            Confirm::DeleteGroup { path, count } => (
                format!("Delete group '{}'?", path),
                format!("This also deletes its {} sessions.", count),
            ),
        };

        let text = vec![
            Line::from(""),
            Line::from(Span::styled(question, Style::default().fg(self.theme.fg))),
            Line::from(""),
            Line::from(Span::styled(warning, Style::default().fg(self.theme.warning))),
            Line::from(""),
            Line::from(Span::styled(
                "Press 'y' to confirm, 'n' or Esc to cancel",
                Style::default().fg(self.theme.dim),
            )),
        ];

        frame.render_widget(Paragraph::new(text), inner);
    }
}

/// Helper function to create a centered rectangle
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> Action {
        Action::KeyPress(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn fixture() -> (Vec<Instance>, GroupTree) {
        let instances = vec![
            Instance::new("api", "/w/api").with_group("work"),
            Instance::new("web", "/w/web").with_group("work/front"),
            Instance::new("blog", "/p/blog").with_group("personal"),
        ];
        let groups = GroupTree::build(&instances, Vec::new());
        (instances, groups)
    }

    fn row_keys(app: &App) -> Vec<String> {
        app.rows.iter().map(|r| r.key().to_string()).collect()
    }

    #[test]
    fn test_rows_follow_tree_and_collapse() {
        let (instances, mut groups) = fixture();
        let rows = build_rows(&instances, &groups);
        assert_eq!(rows.len(), 6);
        assert!(matches!(&rows[0], Row::Group { path, count: 2, depth: 0, .. } if path == "work"));
        assert!(matches!(&rows[1], Row::Session { depth: 1, instance } if instance.title == "api"));
        assert!(matches!(&rows[2], Row::Group { path, depth: 1, .. } if path == "work/front"));

        groups.set_expanded("work", false);
        let rows = build_rows(&instances, &groups);
        assert_eq!(rows.len(), 3);
        assert!(matches!(&rows[0], Row::Group { expanded: false, .. }));
    }

    #[test]
    fn test_queued_ticks_collapse() {
        let mut app = App::new("/tmp");
        app.handle_action(Action::Tick).unwrap();
        app.handle_action(Action::Import).unwrap();
        app.handle_action(Action::Tick).unwrap();
        assert_eq!(app.take_pending_actions(), vec![Action::Tick, Action::Import]);

        app.handle_action(Action::Tick).unwrap();
        assert_eq!(app.take_pending_actions(), vec![Action::Tick]);
    }

    #[test]
    fn test_navigation_wraps() {
        let (instances, groups) = fixture();
        let mut app = App::new("/tmp");
        app.sync(&instances, &groups);

        app.handle_action(key(KeyCode::Char('k'))).unwrap();
        assert_eq!(app.list_state.selected(), Some(app.rows.len() - 1));
        app.handle_action(key(KeyCode::Char('j'))).unwrap();
        assert_eq!(app.list_state.selected(), Some(0));
    }

    #[test]
    fn test_sync_keeps_selection() {
        let (mut instances, groups) = fixture();
        let mut app = App::new("/tmp");
        app.sync(&instances, &groups);
        app.list_state.select(Some(4));
        let selected = row_keys(&app)[4].clone();

        instances.insert(0, Instance::new("new", "/w/new").with_group("work"));
        app.sync(&instances, &groups);
        assert_eq!(app.selected_row().unwrap().key(), selected);
    }

    #[test]
    fn test_enter_attaches_or_folds() {
        let (instances, groups) = fixture();
        let mut app = App::new("/tmp");
        app.sync(&instances, &groups);

        app.handle_action(key(KeyCode::Enter)).unwrap();
        app.handle_action(key(KeyCode::Char('j'))).unwrap();
        app.handle_action(key(KeyCode::Enter)).unwrap();
        assert_eq!(
            app.take_pending_actions(),
            vec![
                Action::ToggleGroup("work".into()),
                Action::Attach(instances[0].id.clone())
            ]
        );
    }

    #[test]
    fn test_new_session_prompt_uses_selected_group() {
        let (instances, groups) = fixture();
        let mut app = App::new("/home/u");
        app.sync(&instances, &groups);
        app.list_state.select(Some(1));

        app.handle_action(key(KeyCode::Char('n'))).unwrap();
        assert_eq!(app.input_buffer, "/home/u");
        app.handle_action(key(KeyCode::Char('/'))).unwrap();
        app.handle_action(key(KeyCode::Char('x'))).unwrap();
        app.handle_action(key(KeyCode::Enter)).unwrap();

        assert_eq!(app.input_mode, InputMode::Normal);
        assert_eq!(
            app.take_pending_actions(),
            vec![Action::AddSession {
                path: "/home/u/x".into(),
                group: Some("work".into())
            }]
        );
    }

    #[test]
    fn test_new_group_nests_under_selected_group() {
        let (instances, groups) = fixture();
        let mut app = App::new("/tmp");
        app.sync(&instances, &groups);

        app.handle_action(key(KeyCode::Char('g'))).unwrap();
        for c in "api!".chars() {
            app.handle_action(key(KeyCode::Char(c))).unwrap();
        }
        app.handle_action(key(KeyCode::Enter)).unwrap();
        assert_eq!(
            app.take_pending_actions(),
            vec![Action::CreateGroup("work/api".into())]
        );
    }

    #[test]
    fn test_empty_prompt_is_dropped() {
        let mut app = App::new("/tmp");
        app.handle_action(key(KeyCode::Char('g'))).unwrap();
        app.handle_action(key(KeyCode::Enter)).unwrap();
        assert!(app.take_pending_actions().is_empty());
    }

    #[test]
    fn test_delete_group_with_sessions_cascades() {
        let (instances, groups) = fixture();
        let mut app = App::new("/tmp");
        app.sync(&instances, &groups);

        app.handle_action(key(KeyCode::Char('d'))).unwrap();
        assert!(matches!(app.input_mode, InputMode::Confirming(_)));
        app.handle_action(key(KeyCode::Char('y'))).unwrap();
        assert_eq!(
            app.take_pending_actions(),
            vec![Action::DeleteGroup {
                path: "work".into(),
                cascade: true
            }]
        );
    }

    #[test]
    fn test_cancel_delete() {
        let (instances, groups) = fixture();
        let mut app = App::new("/tmp");
        app.sync(&instances, &groups);
        app.list_state.select(Some(1));

        app.handle_action(key(KeyCode::Char('d'))).unwrap();
        app.handle_action(key(KeyCode::Esc)).unwrap();
        assert_eq!(app.input_mode, InputMode::Normal);
        assert!(app.take_pending_actions().is_empty());
    }

    #[test]
    fn test_quit_keys() {
        let mut app = App::new("/tmp");
        assert!(app.handle_action(key(KeyCode::Char('q'))).unwrap());
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(app.handle_action(Action::KeyPress(ctrl_c)).unwrap());
    }
}
