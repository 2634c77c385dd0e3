use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyEventKind};
use ratatui::DefaultTerminal;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

mod actions;
mod app;
mod config;
mod error;
mod session;
mod tmux;

use actions::Action;
use app::App;
use config::{Paths, Settings};
use session::{expand_tilde, Deck, Instance, NewInstance, Storage};
use tmux::{Multiplexer, Status, TmuxClient};

/// Terminal session manager for AI coding agents
#[derive(Parser)]
#[command(name = "agent-deck", version, about)]
struct Cli {
    /// Storage profile (overrides AGENTDECK_PROFILE)
    #[arg(short, long, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Register a project directory as a session
    Add {
        /// Project directory
        #[arg(default_value = ".")]
        path: String,
        /// Session title (defaults to the folder name)
        #[arg(short, long)]
        title: Option<String>,
        /// Group path, e.g. "work/backend"
        #[arg(short, long)]
        group: Option<String>,
        /// Command to launch in the session, e.g. "claude"
        #[arg(short = 'c', long = "cmd")]
        command: Option<String>,
    },
    /// List sessions
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Remove a session by id, id prefix or title
    Remove { identifier: String },
    /// Adopt tmux sessions started outside agent-deck
    Import,
    /// Replace the session file with its last backup
    RestoreBackup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = Paths::locate(cli.profile.as_deref()).context("Failed to resolve profile")?;
    let settings = Settings::load(&paths.config_file()).context("Failed to read config.json")?;

    match cli.command {
        None => {
            std::fs::create_dir_all(&paths.dir)
                .with_context(|| format!("Failed to create {}", paths.dir.display()))?;
            init_logging(Some(&paths.log_file()))?;
            run_dashboard(paths, settings).await
        }
        Some(command) => {
            init_logging(None)?;
            run_command(command, paths, settings).await
        }
    }
}

/// Dashboard logs go to a file; the terminal belongs to ratatui
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter.add_directive(tracing::Level::INFO.into()))
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter.add_directive(tracing::Level::WARN.into()))
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

async fn open_deck(paths: &Paths, settings: &Settings) -> Result<Deck<TmuxClient>> {
    let storage = Storage::open(paths.sessions_file()).await?;
    let client = TmuxClient::from_settings(settings);
    let deck = Deck::open(client, storage, settings)
        .await
        .with_context(|| format!("Failed to load {}", paths.sessions_file().display()))?;
    Ok(deck)
}

fn resolve_project_path(raw: &str) -> Result<PathBuf> {
    let path = expand_tilde(raw);
    let path = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()?.join(path)
    };
    let path = path
        .canonicalize()
        .with_context(|| format!("Path does not exist: {}", path.display()))?;
    if !path.is_dir() {
        bail!("Not a directory: {}", path.display());
    }
    Ok(path)
}

/// One row of `list --json`
#[derive(Serialize)]
struct ListEntry<'a> {
    id: &'a str,
    title: &'a str,
    path: &'a Path,
    group: &'a str,
    tool: String,
    command: &'a str,
    status: Status,
    session: &'a str,
    created_at: String,
}

impl<'a> From<&'a Instance> for ListEntry<'a> {
    fn from(inst: &'a Instance) -> Self {
        Self {
            id: &inst.id,
            title: &inst.title,
            path: &inst.project_path,
            group: &inst.group_path,
            tool: inst.tool.to_string(),
            command: &inst.command,
            status: inst.status,
            session: inst.binding.session_name(),
            created_at: inst.created_at.to_rfc3339(),
        }
    }
}

async fn run_command(command: Command, paths: Paths, settings: Settings) -> Result<()> {
    match command {
        Command::Add {
            path,
            title,
            group,
            command,
        } => {
            let path = resolve_project_path(&path)?;
            let mut deck = open_deck(&paths, &settings).await?;
            let inst = deck
                .add(NewInstance {
                    path,
                    title,
                    group,
                    command,
                })
                .await?;
            println!("Added session: {}", inst.title);
            println!("  ID:    {}", inst.short_id());
            println!("  Path:  {}", inst.project_path.display());
            println!("  Group: {}", inst.group_path);
            println!("  Tool:  {}", inst.tool);
        }
        Command::List { json } => {
            let deck = open_deck(&paths, &settings).await?;
            if json {
                let entries: Vec<ListEntry> = deck.instances().iter().map(ListEntry::from).collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if deck.instances().is_empty() {
                println!("No sessions. Add one with: agent-deck add <path>");
            } else {
                println!("{:<20} {:<15} {:<8} {:<12} {}", "TITLE", "GROUP", "STATUS", "ID", "PATH");
                for inst in deck.instances() {
                    println!(
                        "{:<20} {:<15} {:<8} {:<12} {}",
                        truncate(&inst.title, 20),
                        truncate(&inst.group_path, 15),
                        inst.status.label(),
                        inst.short_id(),
                        inst.project_path.display()
                    );
                }
                println!("\nTotal: {} sessions", deck.instances().len());
            }
        }
        Command::Remove { identifier } => {
            let mut deck = open_deck(&paths, &settings).await?;
            if !deck.remove(&identifier).await? {
                bail!("No session matches '{}'", identifier);
            }
            println!("Removed session: {}", identifier);
        }
        Command::Import => {
            let client = TmuxClient::from_settings(&settings);
            client.ensure_available().await?;
            let mut deck = open_deck(&paths, &settings).await?;
            let imported = deck.import().await?;
            for inst in &imported {
                println!("Imported {} ({})", inst.title, inst.project_path.display());
            }
            println!("Imported {} tmux sessions", imported.len());
        }
        Command::RestoreBackup => {
            let storage = Storage::open(paths.sessions_file()).await?;
            storage.restore_backup().await.with_context(|| {
                format!("Failed to restore {}", storage.backup_path().display())
            })?;
            println!("Restored {}", storage.path().display());
        }
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

async fn run_dashboard(paths: Paths, settings: Settings) -> Result<()> {
    let client = TmuxClient::from_settings(&settings);
    let version = client.ensure_available().await?;
    info!("Using {}", version);

    let mut deck = open_deck(&paths, &settings).await?;

    // Create event channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();

    // Set while tmux owns the terminal so keystrokes reach the attached session
    let input_paused = Arc::new(AtomicBool::new(false));

    // Initialize terminal
    let mut terminal = ratatui::init();

    // Spawn input handler
    let input_tx = tx.clone();
    let paused = input_paused.clone();
    tokio::task::spawn_blocking(move || {
        while !input_tx.is_closed() {
            if paused.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            if !event::poll(Duration::from_millis(100)).unwrap_or(false) {
                continue;
            }
            match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                    let _ = input_tx.send(Action::KeyPress(key));
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = input_tx.send(Action::Error(format!("Input: {}", e)));
                }
            }
        }
    });

    // Spawn status ticker
    let tick_tx = tx.clone();
    let poll_interval = settings.poll_interval().max(Duration::from_millis(100));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        // A slow poll must not be followed by a burst of catch-up ticks
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if tick_tx.send(Action::Tick).is_err() {
                break;
            }
        }
    });
    drop(tx);

    let default_dir = std::env::current_dir()
        .map(|d| d.display().to_string())
        .unwrap_or_default();
    let mut app = App::new(default_dir);
    app.sync(deck.instances(), deck.groups());

    // Main event loop
    let result = loop {
        // Render
        terminal.draw(|f| app.render(f))?;

        // Process any pending actions from the app
        let pending = app.take_pending_actions();
        if !pending.is_empty() {
            for action in pending {
                if let Err(e) =
                    dispatch(&mut deck, &mut app, &mut terminal, &input_paused, action).await
                {
                    error!("{:#}", e);
                    app.error(format!("{:#}", e));
                }
            }
            app.sync(deck.instances(), deck.groups());
            continue;
        }

        // Handle events from channel
        tokio::select! {
            Some(action) = rx.recv() => {
                match app.handle_action(action) {
                    Ok(should_quit) => {
                        if should_quit {
                            break Ok(());
                        }
                    }
                    Err(e) => {
                        break Err(e);
                    }
                }
            }
            else => break Ok(()),
        }
    };

    // Restore terminal
    ratatui::restore();

    // Sessions keep running; only the snapshot is written
    deck.persist().await.context("Failed to save sessions")?;
    result
}

async fn dispatch<M: Multiplexer>(
    deck: &mut Deck<M>,
    app: &mut App,
    terminal: &mut DefaultTerminal,
    input_paused: &AtomicBool,
    action: Action,
) -> Result<()> {
    match action {
        Action::Tick => {
            deck.poll().await;
        }
        Action::Attach(id) => {
            let argv = deck.prepare_attach(&id).await?;
            let Some((program, args)) = argv.split_first() else {
                return Ok(());
            };

            // Let the input thread finish its current poll before tmux takes over
            input_paused.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(150)).await;

            // Suspend TUI and attach to session
            ratatui::restore();
            let status = std::process::Command::new(program)
                .args(args)
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status();

            // Resume TUI
            *terminal = ratatui::init();
            input_paused.store(false, Ordering::SeqCst);

            status.context("Failed to attach")?;
            deck.poll().await;
        }
        Action::AddSession { path, group } => {
            let path = resolve_project_path(&path)?;
            let inst = deck
                .add(NewInstance {
                    path,
                    group,
                    ..NewInstance::default()
                })
                .await?;
            app.info(format!("Added '{}'", inst.title));
        }
        Action::DeleteSession(id) => {
            if deck.remove(&id).await? {
                app.info("Session deleted");
            }
        }
        Action::RenameSession { id, title } => deck.rename_instance(&id, &title).await?,
        Action::MoveSession { id, group } => deck.move_instance(&id, &group).await?,
        Action::CreateGroup(path) => {
            deck.create_group(&path).await?;
            app.info(format!("Created group '{}'", path));
        }
        Action::RenameGroup { old, new } => deck.rename_group(&old, &new).await?,
        Action::DeleteGroup { path, cascade } => {
            if cascade {
                let removed = deck.delete_group_cascade(&path).await?;
                app.info(format!("Deleted group '{}' and {} sessions", path, removed));
            } else {
                deck.delete_group(&path).await?;
                app.info(format!("Deleted group '{}'", path));
            }
        }
        Action::ToggleGroup(path) => deck.toggle_group(&path).await?,
        Action::ReorderGroup { path, delta } => deck.reorder_group(&path, delta).await?,
        Action::Import => {
            let imported = deck.import().await?;
            app.info(format!("Imported {} tmux sessions", imported.len()));
        }
        Action::KeyPress(_) | Action::Error(_) => {}
    }
    Ok(())
}
