use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::groups::Group;
use super::instance::{group_path_for_project, normalize_group_path, Binding, Instance, Tool};
use crate::error::{DeckError, Result};
use crate::tmux::{SessionHandle, Status};

/// Everything that is persisted, written as one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub instances: Vec<Instance>,
    pub groups: Vec<Group>,
    pub updated_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            instances: Vec::new(),
            groups: Vec::new(),
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// On-disk layout of `sessions.json`
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    instances: Vec<InstanceRecord>,
    #[serde(default)]
    groups: Vec<Group>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InstanceRecord {
    id: String,
    title: String,
    project_path: String,
    #[serde(default)]
    group_path: String,
    #[serde(default)]
    command: String,
    #[serde(default)]
    tool: Tool,
    #[serde(default)]
    status: Status,
    created_at: DateTime<Utc>,
    #[serde(default)]
    tmux_session: String,
    /// Set when `tmux_session` vanished and has not come back yet
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    session_lost: bool,
}

impl From<&Instance> for InstanceRecord {
    fn from(inst: &Instance) -> Self {
        Self {
            id: inst.id.clone(),
            title: inst.title.clone(),
            project_path: inst.project_path.to_string_lossy().into_owned(),
            group_path: inst.group_path.clone(),
            command: inst.command.clone(),
            tool: inst.tool.clone(),
            status: inst.status,
            created_at: inst.created_at,
            tmux_session: inst.binding.session_name().to_string(),
            session_lost: matches!(inst.binding, Binding::Lost(_)),
        }
    }
}

impl InstanceRecord {
    /// Apply legacy migrations while converting back
    fn into_instance(self) -> Instance {
        let group_path = match normalize_group_path(&self.group_path) {
            path if path.is_empty() => group_path_for_project(Path::new(&self.project_path)),
            path => path,
        };
        let project_path = expand_tilde(&self.project_path);
        let binding = if self.tmux_session.is_empty() {
            Binding::Unbound
        } else {
            let handle = SessionHandle::new(self.tmux_session, project_path.clone());
            if self.session_lost {
                Binding::Lost(handle)
            } else {
                Binding::Bound(handle)
            }
        };

        Instance {
            id: self.id,
            title: self.title,
            project_path,
            group_path,
            command: self.command,
            tool: self.tool,
            status: self.status,
            created_at: self.created_at,
            binding,
        }
    }
}

/// Expand a leading `~/` against the home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Crash-safe JSON persistence of a [`Snapshot`]
#[derive(Debug, Clone)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    /// Storage at `path`, creating its directory owner-only
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            create_private_dir(dir).await?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.path, ".bak")
    }

    fn temp_path(&self) -> PathBuf {
        with_suffix(&self.path, ".tmp")
    }

    /// Write `snapshot` so the canonical file is always either the old or the new version
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let file = SnapshotFile {
            instances: snapshot.instances.iter().map(InstanceRecord::from).collect(),
            groups: snapshot.groups.clone(),
            updated_at: snapshot.updated_at,
        };
        let json = serde_json::to_vec_pretty(&file).map_err(DeckError::Serialize)?;

        let tmp = self.temp_path();
        write_synced(&tmp, &json)
            .await
            .map_err(|e| DeckError::io(&tmp, e))?;

        if fs::try_exists(&self.path).await.unwrap_or(false) {
            let bak = self.backup_path();
            if let Err(e) = fs::copy(&self.path, &bak).await {
                warn!("Failed to back up {}: {}", self.path.display(), e);
            }
        }

        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| DeckError::io(&self.path, e))?;
        sync_parent(&self.path).await;

        debug!(
            "Saved {} sessions and {} groups to {}",
            snapshot.instances.len(),
            snapshot.groups.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Read the snapshot; a missing file is an empty snapshot
    pub async fn load(&self) -> Result<Snapshot> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::empty()),
            Err(e) => return Err(DeckError::io(&self.path, e)),
        };

        let file: SnapshotFile = serde_json::from_slice(&raw).map_err(|source| DeckError::Parse {
            path: self.path.clone(),
            source,
        })?;

        Ok(Snapshot {
            instances: file
                .instances
                .into_iter()
                .map(InstanceRecord::into_instance)
                .collect(),
            groups: file.groups,
            updated_at: file.updated_at,
        })
    }

    /// Replace the canonical file with the backup written by the previous save
    pub async fn restore_backup(&self) -> Result<()> {
        let bak = self.backup_path();
        let raw = fs::read(&bak).await.map_err(|e| DeckError::io(&bak, e))?;
        serde_json::from_slice::<SnapshotFile>(&raw).map_err(|source| DeckError::Parse {
            path: bak.clone(),
            source,
        })?;

        let tmp = self.temp_path();
        write_synced(&tmp, &raw)
            .await
            .map_err(|e| DeckError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| DeckError::io(&self.path, e))?;
        sync_parent(&self.path).await;
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

/// Flush the rename itself; not every platform can open a directory
async fn sync_parent(path: &Path) {
    let Some(dir) = path.parent() else {
        return;
    };
    if let Ok(dir) = fs::File::open(dir).await {
        let _ = dir.sync_all().await;
    }
}

async fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| DeckError::io(dir, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .await
            .map_err(|e| DeckError::io(dir, e))?;
    }
    Ok(())
}
