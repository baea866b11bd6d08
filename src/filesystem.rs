//! The filesystem a volume backs, as seen by the volume lifecycle.
//!
//! A filesystem is owned by the cluster service layer; volumes hold a shared
//! handle and drive its state while mounting, populating and unmounting.

use std::ffi::OsString;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::command::{CommandRunner, run_checked};
use crate::hostfs;

/// Lifecycle state of a cluster service.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceState {
    /// Not started yet.
    Unstarted,
    /// Starting.
    Starting,
    /// Started but still being populated.
    Configuring,
    /// Serving.
    Running,
    /// Stopping.
    ShuttingDown,
    /// Stopped.
    Shutdown,
    /// Failed; needs operator attention.
    Error,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unstarted => "unstarted",
            Self::Starting => "starting",
            Self::Configuring => "configuring",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Shutdown => "shut-down",
            Self::Error => "error",
        };
        formatter.write_str(label)
    }
}

/// Role a filesystem plays in the cluster.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceRole {
    /// The primary application data filesystem.
    PrimaryData,
    /// Installed tools.
    ToolData,
    /// Reference indices.
    IndexData,
    /// Scratch space that does not outlive the cluster.
    Transient,
    /// Any other filesystem.
    Generic,
}

impl ServiceRole {
    /// Tag value used when labelling provider resources.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::PrimaryData => "primary-data",
            Self::ToolData => "tool-data",
            Self::IndexData => "index-data",
            Self::Transient => "transient",
            Self::Generic => "generic",
        }
    }

    /// Parses a tag produced by [`ServiceRole::tag`].
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        [
            Self::PrimaryData,
            Self::ToolData,
            Self::IndexData,
            Self::Transient,
            Self::Generic,
        ]
        .into_iter()
        .find(|role| role.tag() == tag.trim())
    }

    /// Joins role tags with commas.
    #[must_use]
    pub fn join(roles: &[Self]) -> String {
        roles
            .iter()
            .map(|role| role.tag())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// How a filesystem was provisioned.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemKind {
    /// An ordinary (blank or archive-populated) volume.
    Volume,
    /// A volume restored from a shared snapshot.
    Snapshot,
}

/// Operations the volume lifecycle needs from its filesystem.
pub trait Filesystem: Send + Sync {
    /// Short filesystem name.
    fn name(&self) -> &str;

    /// Where the filesystem is mounted.
    fn mount_point(&self) -> &Utf8Path;

    /// Roles the filesystem serves.
    fn svc_roles(&self) -> &[ServiceRole];

    /// Current service state.
    fn state(&self) -> ServiceState;

    /// Replaces the service state.
    fn set_state(&self, state: ServiceState);

    /// Records how the filesystem was provisioned.
    fn set_kind(&self, kind: FilesystemKind);

    /// Exports the mount point to the cluster and marks the service running.
    fn nfs_share_and_set_state(&self);

    /// Withdraws the cluster export.
    fn remove_nfs_share(&self);

    /// Returns `true` when something is mounted at `mount_point`.
    fn is_mounted(&self, mount_point: &Utf8Path) -> bool;

    /// Returns `true` when the filesystem serves the primary data role.
    fn is_primary(&self) -> bool {
        self.svc_roles().contains(&ServiceRole::PrimaryData)
    }
}

/// Host filesystem exported over NFS with `exportfs`.
#[derive(Debug)]
pub struct LocalFilesystem<R> {
    name: String,
    mount_point: Utf8PathBuf,
    roles: Vec<ServiceRole>,
    state: Mutex<ServiceState>,
    kind: Mutex<Option<FilesystemKind>>,
    runner: R,
    exportfs: String,
    export_options: String,
    mounts_table: Utf8PathBuf,
}

impl<R: CommandRunner + Send + Sync> LocalFilesystem<R> {
    /// Creates an unstarted filesystem.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        mount_point: impl Into<Utf8PathBuf>,
        roles: Vec<ServiceRole>,
        runner: R,
    ) -> Self {
        Self {
            name: name.into(),
            mount_point: mount_point.into(),
            roles,
            state: Mutex::new(ServiceState::Unstarted),
            kind: Mutex::new(None),
            runner,
            exportfs: String::from("/usr/sbin/exportfs"),
            export_options: String::from("rw,sync,no_root_squash,no_subtree_check"),
            mounts_table: Utf8PathBuf::from("/proc/mounts"),
        }
    }

    /// Overrides the `exportfs` binary.
    #[must_use]
    pub fn with_exportfs(mut self, exportfs: impl Into<String>) -> Self {
        self.exportfs = exportfs.into();
        self
    }

    /// Overrides the mount table consulted by [`Filesystem::is_mounted`].
    #[must_use]
    pub fn with_mounts_table(mut self, mounts_table: impl Into<Utf8PathBuf>) -> Self {
        self.mounts_table = mounts_table.into();
        self
    }

    /// Provisioning kind recorded so far.
    #[must_use]
    pub fn kind(&self) -> Option<FilesystemKind> {
        *self.kind.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn export_target(&self) -> OsString {
        OsString::from(format!("*:{}", self.mount_point))
    }
}

impl<R: CommandRunner + Send + Sync> Filesystem for LocalFilesystem<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn mount_point(&self) -> &Utf8Path {
        &self.mount_point
    }

    fn svc_roles(&self) -> &[ServiceRole] {
        &self.roles
    }

    fn state(&self) -> ServiceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ServiceState) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = *guard;
        if previous != state {
            debug!(filesystem = %self.name, from = %previous, to = %state, "filesystem state change");
        }
        *guard = state;
    }

    fn set_kind(&self, kind: FilesystemKind) {
        *self.kind.lock().unwrap_or_else(PoisonError::into_inner) = Some(kind);
    }

    fn nfs_share_and_set_state(&self) {
        let args = [
            OsString::from("-o"),
            OsString::from(&self.export_options),
            self.export_target(),
        ];
        match run_checked(&self.runner, &self.exportfs, &args) {
            Ok(()) => {
                info!(filesystem = %self.name, mount_point = %self.mount_point, "shared over NFS");
                self.set_state(ServiceState::Running);
            }
            Err(message) => {
                error!(filesystem = %self.name, error = %message, "cannot share over NFS");
                self.set_state(ServiceState::Error);
            }
        }
    }

    fn remove_nfs_share(&self) {
        let args = [OsString::from("-u"), self.export_target()];
        if let Err(message) = run_checked(&self.runner, &self.exportfs, &args) {
            warn!(filesystem = %self.name, error = %message, "cannot remove NFS share");
        }
    }

    fn is_mounted(&self, mount_point: &Utf8Path) -> bool {
        match hostfs::read_to_string(&self.mounts_table) {
            Ok(table) => mount_table_contains(&table, mount_point),
            Err(err) => {
                warn!(table = %self.mounts_table, error = %err, "cannot read mount table");
                false
            }
        }
    }
}

fn mount_table_contains(table: &str, mount_point: &Utf8Path) -> bool {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|target| Utf8Path::new(target) == mount_point)
}
