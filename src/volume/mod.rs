//! Lifecycle of one cloud block-storage volume backing one filesystem.
//!
//! [`VolumeResource`] reconciles "this volume should exist and be mounted"
//! against an eventually consistent provider and the local OS. Operations
//! are split across submodules:
//!
//! - `create`: create, delete and rebind the remote volume.
//! - `wait`: status polling with bounded or unbounded budgets.
//! - `attach` and `detach`: attachment and device resolution.
//! - `mount`: format, mount, grow, ownership, archive population, unmount.
//! - `snapshot`: derived snapshots and snapshot creation.
//!
//! A resource assumes it is the only actor attaching devices on the
//! instance while [`VolumeResource::attach`] runs. Configure a
//! [`DeviceAllocationLock`] shared by every resource on the node when that
//! does not hold.

mod attach;
mod create;
mod detach;
mod error;
mod mount;
mod settings;
mod snapshot;
mod status;
mod wait;

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::archive::{ArchiveDescriptor, ArchiveExtractor};
use crate::backend::{CloudVolumeClient, SnapshotRecord};
use crate::command::CommandRunner;
use crate::device::DeviceDiscovery;
use crate::filesystem::{Filesystem, FilesystemKind};
use crate::hostfs;

pub use error::VolumeError;
pub use mount::{MountOutcome, UnmountOutcome};
pub use settings::{LifecycleTimings, ToolPaths, VolumeSettings};
pub use snapshot::SnapshotSummary;
pub use status::{StatusTracker, VolumeStatus};
pub use wait::Wait;

/// Where a new volume's contents come from.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeOrigin {
    /// An empty volume of an explicit size.
    Blank,
    /// Restored from the snapshot with this identifier.
    Snapshot(String),
    /// Blank volume populated from an archive after mounting.
    Archive(ArchiveDescriptor),
}

impl VolumeOrigin {
    /// Source snapshot identifier, if any.
    #[must_use]
    pub fn snapshot_id(&self) -> Option<&str> {
        match self {
            Self::Snapshot(id) => Some(id),
            Self::Blank | Self::Archive(_) => None,
        }
    }
}

/// Description of the volume a resource should manage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeSpec {
    /// Existing provider volume to bind to on open.
    pub volume_id: Option<String>,
    /// Requested size in GiB.
    pub size_gib: Option<u64>,
    /// Content source for new volumes.
    pub origin: VolumeOrigin,
}

impl VolumeSpec {
    /// A blank volume of `size_gib`.
    #[must_use]
    pub const fn blank(size_gib: u64) -> Self {
        Self {
            volume_id: None,
            size_gib: Some(size_gib),
            origin: VolumeOrigin::Blank,
        }
    }

    /// A volume restored from `snapshot_id`, sized like the snapshot unless
    /// [`VolumeSpec::with_size`] overrides it.
    #[must_use]
    pub fn from_snapshot(snapshot_id: impl Into<String>) -> Self {
        Self {
            volume_id: None,
            size_gib: None,
            origin: VolumeOrigin::Snapshot(snapshot_id.into()),
        }
    }

    /// A blank volume of `size_gib` populated from `archive`.
    #[must_use]
    pub const fn from_archive(archive: ArchiveDescriptor, size_gib: u64) -> Self {
        Self {
            volume_id: None,
            size_gib: Some(size_gib),
            origin: VolumeOrigin::Archive(archive),
        }
    }

    /// An existing provider volume.
    #[must_use]
    pub fn existing(volume_id: impl Into<String>) -> Self {
        Self {
            volume_id: Some(volume_id.into()),
            size_gib: None,
            origin: VolumeOrigin::Blank,
        }
    }

    /// Overrides the requested size.
    #[must_use]
    pub const fn with_size(mut self, size_gib: u64) -> Self {
        self.size_gib = Some(size_gib);
        self
    }
}

/// Collaborators a volume resource works with.
pub struct VolumeContext<C, R> {
    /// Provider client.
    pub client: Arc<C>,
    /// Runner for host commands.
    pub runner: R,
    /// Filesystem the volume backs.
    pub filesystem: Arc<dyn Filesystem>,
    /// Local device discovery.
    pub discovery: DeviceDiscovery,
    /// Archive extractor for archive-sourced volumes.
    pub extractor: Arc<dyn ArchiveExtractor>,
    /// Cluster-wide settings.
    pub settings: VolumeSettings,
}

/// Serialises attach device allocation across the resources of one
/// instance.
#[derive(Clone, Debug, Default)]
pub struct DeviceAllocationLock(Arc<Mutex<()>>);

impl DeviceAllocationLock {
    /// Creates a new, unheld lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock().await
    }
}

/// Options for [`VolumeResource::remove`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RemoveOptions {
    /// Delete the volume after detaching, whatever its `static` flag.
    pub delete_vols: bool,
    /// Detach the volume after unmounting.
    pub detach: bool,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        Self {
            delete_vols: false,
            detach: true,
        }
    }
}

/// What [`VolumeResource::remove`] did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RemoveOutcome {
    /// Result of the unmount step.
    pub unmount: UnmountOutcome,
    /// Whether the volume was detached.
    pub detached: bool,
    /// Whether the volume was deleted.
    pub deleted: bool,
}

/// Serialisable summary of a volume for operator surfaces.
#[derive(Clone, Debug, Serialize)]
pub struct VolumeDetails {
    /// Provider volume identifier.
    pub volume_id: Option<String>,
    /// Filesystem the volume backs.
    pub filesystem: String,
    /// Local device path.
    pub device: Option<Utf8PathBuf>,
    /// Whether the volume is deleted when the cluster terminates.
    pub delete_on_termination: bool,
    /// Content source.
    pub origin: VolumeOrigin,
    /// Size in GiB, when known.
    pub size_gib: Option<u64>,
    /// Current status.
    pub status: VolumeStatus,
    /// Snapshots taken from this volume.
    pub snapshots: Vec<SnapshotSummary>,
}

/// One block-storage volume and the filesystem it backs.
pub struct VolumeResource<C, R> {
    client: Arc<C>,
    runner: R,
    filesystem: Arc<dyn Filesystem>,
    discovery: DeviceDiscovery,
    extractor: Arc<dyn ArchiveExtractor>,
    settings: VolumeSettings,
    timings: LifecycleTimings,
    allocation_lock: Option<DeviceAllocationLock>,
    tracker: StatusTracker,
    size_gib: Option<u64>,
    origin: VolumeOrigin,
    device: Option<Utf8PathBuf>,
    is_static: bool,
    source_snapshot_size_gib: Option<u64>,
    snapshots: Vec<SnapshotRecord>,
}

impl<C, R> std::fmt::Debug for VolumeResource<C, R> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("VolumeResource")
            .field("volume_id", &self.tracker.volume_id())
            .field("filesystem", &self.filesystem.name())
            .field("origin", &self.origin)
            .field("device", &self.device)
            .field("is_static", &self.is_static)
            .finish_non_exhaustive()
    }
}

impl<C: CloudVolumeClient, R: CommandRunner> VolumeResource<C, R> {
    /// Creates an unbound resource without contacting the provider.
    #[must_use]
    pub fn new(context: VolumeContext<C, R>, spec: VolumeSpec) -> Self {
        let timings = LifecycleTimings::default();
        Self {
            client: context.client,
            runner: context.runner,
            filesystem: context.filesystem,
            discovery: context.discovery,
            extractor: context.extractor,
            settings: context.settings,
            timings,
            allocation_lock: None,
            tracker: StatusTracker::new(timings.status_ttl),
            size_gib: spec.size_gib.filter(|size| *size > 0),
            origin: spec.origin,
            device: None,
            is_static: false,
            source_snapshot_size_gib: None,
            snapshots: Vec::new(),
        }
    }

    /// Creates a resource, binding to `spec.volume_id` when given and
    /// loading snapshots previously taken from it.
    ///
    /// Rebind failures are logged and leave the resource unbound.
    pub async fn open(context: VolumeContext<C, R>, spec: VolumeSpec) -> Self {
        let volume_id = spec.volume_id.clone();
        let mut resource = Self::new(context, spec);
        if let Some(volume_id) = volume_id.as_deref()
            && let Err(err) = resource.rebind(volume_id).await
        {
            warn!(volume_id, error = %err, "cannot bind existing volume");
        }
        resource.snapshots = resource.derived_snapshots().await;
        resource
    }

    /// Replaces the lifecycle timings.
    #[must_use]
    pub fn with_timings(mut self, timings: LifecycleTimings) -> Self {
        self.tracker.set_min_interval(timings.status_ttl);
        self.timings = timings;
        self
    }

    /// Serialises attach candidate allocation through `lock`.
    #[must_use]
    pub fn with_allocation_lock(mut self, lock: DeviceAllocationLock) -> Self {
        self.allocation_lock = Some(lock);
        self
    }

    /// Provider volume identifier, once created or bound.
    #[must_use]
    pub fn volume_id(&self) -> Option<&str> {
        self.tracker.volume_id()
    }

    /// Local device path while attached.
    #[must_use]
    pub fn device(&self) -> Option<&Utf8Path> {
        self.device.as_deref()
    }

    /// Whether the volume is deleted when the filesystem is removed.
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.is_static
    }

    /// Size in GiB, when known.
    #[must_use]
    pub const fn size_gib(&self) -> Option<u64> {
        self.size_gib
    }

    /// Content source.
    #[must_use]
    pub const fn origin(&self) -> &VolumeOrigin {
        &self.origin
    }

    /// Filesystem the volume backs.
    #[must_use]
    pub fn filesystem(&self) -> &Arc<dyn Filesystem> {
        &self.filesystem
    }

    /// Snapshots currently cached for this volume.
    #[must_use]
    pub fn snapshots(&self) -> &[SnapshotRecord] {
        &self.snapshots
    }

    /// Volume identifier and filesystem name for log lines.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!(
            "{} ({})",
            self.volume_id().unwrap_or("-"),
            self.filesystem.name()
        )
    }

    /// Current status, refreshed from the provider at most once per
    /// [`LifecycleTimings::status_ttl`].
    pub async fn status(&mut self) -> VolumeStatus {
        let status = self.tracker.status(self.client.as_ref()).await;
        if self.tracker.volume_id().is_none() {
            self.device = None;
        }
        status
    }

    /// Creates (if needed), attaches and mounts the volume.
    ///
    /// Volumes restored from a snapshot for a filesystem other than the
    /// primary data one are marked static, so removing them deletes them.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by create, attach or mount. An already
    /// provisioned volume is not an error.
    pub async fn add(&mut self) -> Result<MountOutcome, VolumeError> {
        match self.create().await {
            Ok(()) | Err(VolumeError::AlreadyProvisioned { .. }) => {}
            Err(err) => return Err(err),
        }

        // Every snapshot-sourced volume on a non-primary filesystem is
        // treated as disposable, including ones a user added by hand.
        if !self.filesystem.is_primary() && matches!(self.origin, VolumeOrigin::Snapshot(_)) {
            debug!(volume = %self.full_name(), "marking volume static");
            self.is_static = true;
            self.filesystem.set_kind(FilesystemKind::Snapshot);
        } else {
            self.filesystem.set_kind(FilesystemKind::Volume);
        }

        self.attach().await?;

        let upload_store = self.settings.upload_store();
        if let Err(err) = hostfs::remove_tree(&upload_store) {
            warn!(path = %upload_store, error = %err, "cannot clear stale upload store");
        }
        let mount_point = self.filesystem.mount_point().to_path_buf();
        info!(volume = %self.full_name(), %mount_point, "volume attached; mounting");
        self.mount(&mount_point).await
    }

    /// Unmounts the filesystem and optionally detaches and deletes the
    /// volume.
    ///
    /// Deletion happens only after a successful detach, and only for static
    /// volumes of non-primary filesystems or when `delete_vols` is set.
    pub async fn remove(
        &mut self,
        mount_point: &Utf8Path,
        options: RemoveOptions,
    ) -> RemoveOutcome {
        debug!(
            volume = %self.full_name(),
            %mount_point,
            delete_vols = options.delete_vols,
            detach = options.detach,
            "removing volume-backed filesystem"
        );
        let unmount = self.unmount(mount_point).await;
        let mut outcome = RemoveOutcome {
            unmount,
            detached: false,
            deleted: false,
        };
        if !options.detach {
            debug!(volume = %self.full_name(), "unmounted without detaching");
            return outcome;
        }

        outcome.detached = self.detach().await;
        if outcome.detached
            && ((self.is_static && !self.filesystem.is_primary()) || options.delete_vols)
        {
            info!(volume = %self.full_name(), "deleting volume");
            outcome.deleted = self.delete().await;
        }
        outcome
    }

    /// Serialisable summary, refreshing status and snapshot progress.
    pub async fn details(&mut self) -> VolumeDetails {
        let status = self.status().await;
        let snapshots = self.snapshots_created().await;
        VolumeDetails {
            volume_id: self.volume_id().map(str::to_owned),
            filesystem: self.filesystem.name().to_owned(),
            device: self.device.clone(),
            delete_on_termination: self.is_static,
            origin: self.origin.clone(),
            size_gib: self.size_gib,
            status,
            snapshots,
        }
    }
}
