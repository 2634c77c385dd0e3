use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use super::groups::GroupTree;
use super::instance::{normalize_group_path, Binding, Instance};
use super::storage::{Snapshot, Storage};
use crate::config::Settings;
use crate::error::{DeckError, Result};
use crate::tmux::{
    ActivityTracker, Classifier, Multiplexer, SessionHandle, Status, StatusDetector,
};

/// Parameters for [`Deck::add`]
#[derive(Debug, Clone, Default)]
pub struct NewInstance {
    pub path: PathBuf,
    pub title: Option<String>,
    pub group: Option<String>,
    pub command: Option<String>,
}

/// A status transition observed by [`Deck::poll`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub id: String,
    pub from: Status,
    pub to: Status,
}

/// Sole owner of the in-memory sessions and groups.
///
/// Every mutation runs to completion and persists before returning; polling only
/// touches statuses and is persisted with the next mutation.
pub struct Deck<M: Multiplexer> {
    gateway: M,
    storage: Storage,
    detector: StatusDetector,
    capture_lines: usize,
    instances: Vec<Instance>,
    groups: GroupTree,
    trackers: HashMap<String, ActivityTracker>,
}

impl<M: Multiplexer> Deck<M> {
    /// Load the snapshot, re-bind stored sessions and run one status pass
    pub async fn open(gateway: M, storage: Storage, settings: &Settings) -> Result<Self> {
        let snapshot = storage.load().await?;
        let groups = GroupTree::build(&snapshot.instances, snapshot.groups);

        let mut deck = Self {
            gateway,
            storage,
            detector: StatusDetector::new(settings.idle_cooldown()),
            capture_lines: settings.capture_lines,
            instances: snapshot.instances,
            groups,
            trackers: HashMap::new(),
        };
        deck.reconnect_all().await;
        deck.poll().await;

        info!(
            "Loaded {} sessions from {}",
            deck.instances.len(),
            deck.storage.path().display()
        );
        Ok(deck)
    }

    async fn reconnect_all(&mut self) {
        for inst in &mut self.instances {
            let Some(handle) = inst.binding.handle() else {
                continue;
            };
            let reconnected = self.gateway.reconnect(
                &handle.name,
                &inst.title,
                &inst.project_path,
                &inst.command,
                inst.status,
            );
            if let Err(e) = self.gateway.enable_mouse_mode(&reconnected.handle).await {
                debug!("Mouse mode not enabled for {}: {}", reconnected.handle.name, e);
            }
            // A lost session stays lost until a poll sees it again
            inst.binding = match inst.binding {
                Binding::Lost(_) => Binding::Lost(reconnected.handle),
                _ => Binding::Bound(reconnected.handle),
            };
            self.trackers.insert(inst.id.clone(), reconnected.tracker);
        }
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn groups(&self) -> &GroupTree {
        &self.groups
    }

    #[cfg(test)]
    pub fn gateway(&self) -> &M {
        &self.gateway
    }

    #[cfg(test)]
    pub fn instance(&self, id: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.id == id)
    }

    /// Match by exact id, unambiguous id prefix or exact title; first match wins
    pub fn find(&self, identifier: &str) -> Option<usize> {
        if identifier.is_empty() {
            return None;
        }
        let prefix_matches = self
            .instances
            .iter()
            .filter(|i| i.id.starts_with(identifier))
            .count();
        self.instances.iter().position(|i| {
            i.id == identifier
                || i.title == identifier
                || (prefix_matches == 1 && i.id.starts_with(identifier))
        })
    }

    fn index_of(&self, id: &str) -> Result<usize> {
        self.instances
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| DeckError::InstanceNotFound(id.to_string()))
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            instances: self.instances.clone(),
            groups: self.groups.groups().to_vec(),
            updated_at: Utc::now(),
        }
    }

    pub async fn persist(&self) -> Result<()> {
        self.storage.save(&self.snapshot()).await
    }

    fn rebuild_groups(&mut self) {
        self.groups = GroupTree::build(&self.instances, self.groups.groups().to_vec());
    }

    /// Register a project without starting a session
    pub async fn add(&mut self, request: NewInstance) -> Result<Instance> {
        if let Some(existing) = self.instances.iter().find(|i| i.project_path == request.path) {
            return Err(DeckError::DuplicatePath {
                path: request.path,
                title: existing.title.clone(),
                id: existing.id.clone(),
            });
        }

        let title = request
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| {
                request
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| request.path.to_string_lossy().into_owned())
            });

        let mut inst = Instance::new(title, request.path);
        if let Some(group) = request.group {
            inst = inst.with_group(&group);
        }
        if let Some(command) = request.command.filter(|c| !c.trim().is_empty()) {
            inst = inst.with_command(command);
        }

        self.groups.create_group(&inst.group_path);
        self.instances.push(inst.clone());
        self.persist().await?;

        info!("Added session {} ({})", inst.title, inst.id);
        Ok(inst)
    }

    /// Create and bind a tmux session unless a live one is already bound
    pub async fn start(&mut self, id: &str) -> Result<()> {
        let idx = self.index_of(id)?;
        if let Binding::Bound(handle) = &self.instances[idx].binding {
            if self.gateway.exists(handle).await? {
                return Ok(());
            }
        }

        let inst = &self.instances[idx];
        let handle = self
            .gateway
            .create(&inst.session_name(), &inst.project_path, &inst.command)
            .await?;
        if let Err(e) = self.gateway.enable_mouse_mode(&handle).await {
            warn!("Failed to enable mouse mode for {}: {}", handle.name, e);
        }

        let inst = &mut self.instances[idx];
        inst.binding = Binding::Bound(handle);
        inst.status = Status::Idle;
        self.trackers.insert(inst.id.clone(), ActivityTracker::new());
        self.persist().await
    }

    /// argv for attaching, starting the session first when needed
    pub async fn prepare_attach(&mut self, id: &str) -> Result<Vec<String>> {
        self.start(id).await?;
        let inst = &self.instances[self.index_of(id)?];
        let handle = inst
            .binding
            .handle()
            .ok_or_else(|| DeckError::SessionNotFound(inst.title.clone()))?;
        Ok(self.gateway.attach_command(handle))
    }

    /// Remove the first matching instance and kill its session
    pub async fn remove(&mut self, identifier: &str) -> Result<bool> {
        let Some(idx) = self.find(identifier) else {
            return Ok(false);
        };

        let inst = self.instances.remove(idx);
        self.trackers.remove(&inst.id);
        self.kill_session(&inst).await;
        self.rebuild_groups();
        self.persist().await?;

        info!("Removed session {} ({})", inst.title, inst.id);
        Ok(true)
    }

    async fn kill_session(&self, inst: &Instance) {
        if let Some(handle) = inst.binding.handle() {
            if let Err(e) = self.gateway.kill(handle).await {
                warn!("Failed to kill tmux session {}: {}", handle.name, e);
            }
        }
    }

    pub async fn rename_instance(&mut self, id: &str, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(());
        }
        let idx = self.index_of(id)?;
        self.instances[idx].title = title.to_string();
        self.persist().await
    }

    pub async fn move_instance(&mut self, id: &str, group_path: &str) -> Result<()> {
        self.groups
            .move_instance(&mut self.instances, id, group_path)?;
        self.persist().await
    }

    pub async fn create_group(&mut self, path: &str) -> Result<()> {
        if self.groups.create_group(path).is_none() {
            return Err(DeckError::InvalidGroupPath(path.to_string()));
        }
        self.persist().await
    }

    pub async fn rename_group(&mut self, old: &str, new: &str) -> Result<()> {
        self.groups.rename_group(&mut self.instances, old, new)?;
        self.rebuild_groups();
        self.persist().await
    }

    /// Delete an empty group; fails with `NotEmpty` otherwise
    pub async fn delete_group(&mut self, path: &str) -> Result<()> {
        self.groups.delete_group(&self.instances, path)?;
        self.persist().await
    }

    /// Delete a group, its sessions and their tmux sessions
    pub async fn delete_group_cascade(&mut self, path: &str) -> Result<usize> {
        let removed = self
            .groups
            .delete_group_cascade(&mut self.instances, path)?;
        for inst in &removed {
            self.trackers.remove(&inst.id);
            self.kill_session(inst).await;
        }
        self.rebuild_groups();
        self.persist().await?;

        info!(
            "Deleted group {} with {} sessions",
            normalize_group_path(path),
            removed.len()
        );
        Ok(removed.len())
    }

    pub async fn reorder_group(&mut self, path: &str, delta: i32) -> Result<()> {
        self.groups.reorder(path, delta)?;
        self.persist().await
    }

    pub async fn toggle_group(&mut self, path: &str) -> Result<()> {
        self.groups.toggle_expanded(path);
        self.persist().await
    }

    /// Bind every foreign tmux session that no instance tracks yet
    pub async fn import(&mut self) -> Result<Vec<Instance>> {
        let sessions = self.gateway.list_sessions().await?;
        let known: HashSet<String> = self
            .instances
            .iter()
            .map(|i| i.binding.session_name().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        let mut imported = Vec::new();
        for session in sessions {
            if session.is_managed() || known.contains(&session.name) {
                continue;
            }
            let mut inst = Instance::new(session.name.clone(), session.work_dir.clone());
            let reconnected = self.gateway.reconnect(
                &session.name,
                &inst.title,
                &session.work_dir,
                "",
                inst.status,
            );
            inst.binding = Binding::Bound(reconnected.handle);
            self.trackers.insert(inst.id.clone(), reconnected.tracker);
            self.groups.create_group(&inst.group_path);
            self.instances.push(inst.clone());
            imported.push(inst);
        }

        if !imported.is_empty() {
            self.persist().await?;
            info!("Imported {} tmux sessions", imported.len());
        }
        Ok(imported)
    }

    /// Capture and classify every instance that has a session handle.
    ///
    /// tmux is queried for all instances at once, so one hung session costs a
    /// single timeout per tick instead of one per session.
    pub async fn poll(&mut self) -> Vec<StatusChange> {
        let targets: Vec<(usize, SessionHandle)> = self
            .instances
            .iter()
            .enumerate()
            .filter_map(|(idx, inst)| inst.binding.handle().map(|h| (idx, h.clone())))
            .collect();
        if targets.is_empty() {
            return Vec::new();
        }

        // One list-sessions call warms the cache every existence check reads
        let checks = match self.gateway.list_sessions().await {
            Ok(_) => {
                let gateway = &self.gateway;
                let lines = self.capture_lines;
                join_all(
                    targets
                        .iter()
                        .map(|(_, handle)| check_session(gateway, handle, lines)),
                )
                .await
            }
            Err(e) => {
                let reason = e.to_string();
                targets.iter().map(|_| SessionCheck::Failed(reason.clone())).collect()
            }
        };

        let now = Instant::now();
        let mut changes = Vec::new();
        for ((idx, handle), outcome) in targets.into_iter().zip(checks) {
            let inst = &mut self.instances[idx];
            let tracker = self
                .trackers
                .entry(inst.id.clone())
                .or_insert_with(|| ActivityTracker::resume(inst.status));

            let status = match outcome {
                SessionCheck::Present(content) => {
                    if !inst.binding.is_bound() {
                        info!("tmux session {} is back", handle.name);
                        inst.binding = Binding::Bound(handle);
                    }
                    self.detector.observe(
                        tracker,
                        Classifier::for_tool(&inst.tool),
                        &content,
                        now,
                    )
                }
                SessionCheck::Absent => {
                    if inst.binding.is_bound() {
                        warn!("tmux session {} for '{}' is gone", handle.name, inst.title);
                        inst.binding = Binding::Lost(handle);
                    }
                    tracker.mark_absent()
                }
                SessionCheck::Failed(e) => {
                    warn!("Status check failed for '{}': {}", inst.title, e);
                    tracker.mark_absent()
                }
            };

            if status != inst.status {
                debug!(
                    "{} {} -> {}",
                    inst.title,
                    inst.status.label(),
                    status.label()
                );
                changes.push(StatusChange {
                    id: inst.id.clone(),
                    from: inst.status,
                    to: status,
                });
                inst.status = status;
            }
        }
        changes
    }
}

/// What one poll learned about a session
enum SessionCheck {
    Present(String),
    Absent,
    Failed(String),
}

async fn check_session<M: Multiplexer>(
    gateway: &M,
    handle: &SessionHandle,
    lines: usize,
) -> SessionCheck {
    match gateway.exists(handle).await {
        Ok(true) => match gateway.capture(handle, lines).await {
            Ok(content) => SessionCheck::Present(content),
            Err(e) => SessionCheck::Failed(e.to_string()),
        },
        Ok(false) => SessionCheck::Absent,
        Err(e) => SessionCheck::Failed(e.to_string()),
    }
}
