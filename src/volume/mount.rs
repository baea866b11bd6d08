//! Formatting, mounting and unmounting the attached volume.

use std::ffi::OsString;
use std::sync::Arc;

use camino::Utf8Path;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveDescriptor, ExtractionTask};
use crate::backend::CloudVolumeClient;
use crate::command::{CommandRunner, run_checked};
use crate::filesystem::ServiceState;
use crate::hostfs;

use super::settings::UPLOAD_STORE;
use super::{VolumeError, VolumeOrigin, VolumeResource, VolumeStatus};

/// Directories the primary data filesystem needs under the data root.
const PRIMARY_SUBDIRS: [&str; 4] = ["files", "tmp", UPLOAD_STORE, "export"];
/// Subdirectory shared with the rest of the cluster.
const EXPORT_SUBDIR: &str = "export";

/// What [`VolumeResource::mount`] did.
#[derive(Debug)]
pub struct MountOutcome {
    /// A new filesystem was created on the device.
    pub formatted: bool,
    /// The filesystem was grown to the volume size.
    pub grown: bool,
    /// Background archive extraction, when the volume is being populated.
    pub extraction: Option<ExtractionTask>,
}

/// What [`VolumeResource::unmount`] did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnmountOutcome {
    /// The filesystem was unmounted.
    Unmounted,
    /// Nothing was mounted at the mount point.
    NotMounted,
    /// The filesystem was not running or shutting down, so it was left
    /// alone.
    Skipped(ServiceState),
    /// Every unmount attempt failed.
    Failed,
}

impl<C: CloudVolumeClient, R: CommandRunner> VolumeResource<C, R> {
    /// Mounts the attached volume at `mount_point` and shares it.
    ///
    /// Waits for the volume to be attached with a known device, formats the
    /// device if it cannot be mounted as is, and grows filesystems restored
    /// from a smaller snapshot. Archive-sourced volumes are populated in the
    /// background unless already populated.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::MountNotReady`] when the volume never becomes
    /// attached, [`VolumeError::FormatFailed`] or
    /// [`VolumeError::MountFailed`] when the device cannot be mounted.
    pub async fn mount(&mut self, mount_point: &Utf8Path) -> Result<MountOutcome, VolumeError> {
        debug!(%mount_point, volume = %self.full_name(), "mounting");
        let attempts = self.timings.mount_attempts;
        let mut status = VolumeStatus::None;
        for attempt in 1..=attempts {
            status = self.status().await;
            if status.is_attached()
                && let Some(device) = self.device.clone()
            {
                return self.mount_device(&device, mount_point).await;
            }
            warn!(
                volume = %self.full_name(),
                %status,
                attempt,
                attempts,
                "cannot mount volume yet; waiting"
            );
            sleep(self.timings.mount_interval).await;
        }
        Err(VolumeError::MountNotReady {
            volume_id: self.volume_id().unwrap_or("-").to_owned(),
            attempts,
            status,
        })
    }

    async fn mount_device(
        &self,
        device: &Utf8Path,
        mount_point: &Utf8Path,
    ) -> Result<MountOutcome, VolumeError> {
        prepare_mount_point(mount_point, self.filesystem.name());
        self.wait_for_device_node(device).await;

        let mount_args = [OsString::from(device.as_str()), OsString::from(mount_point.as_str())];
        let mut formatted = false;
        if let Err(message) = self.run_tool(&self.settings.tools.mount, &mount_args) {
            info!(%device, error = %message, "mount failed; creating a filesystem");
            self.run_tool(&self.settings.tools.mkfs, &[OsString::from(device.as_str())])
                .map_err(|message| VolumeError::FormatFailed {
                    device: device.to_path_buf(),
                    message,
                })?;
            formatted = true;
            self.run_tool(&self.settings.tools.mount, &mount_args)
                .map_err(|message| VolumeError::MountFailed {
                    device: device.to_path_buf(),
                    mount_point: mount_point.to_path_buf(),
                    message,
                })?;
        }
        info!(%device, %mount_point, formatted, "mounted volume");

        let grown = !formatted && self.grow_if_needed(mount_point);
        let populated = match &self.origin {
            VolumeOrigin::Archive(archive) => archive_populated(archive, mount_point),
            VolumeOrigin::Blank | VolumeOrigin::Snapshot(_) => false,
        };
        self.apply_ownership(mount_point);

        let extraction = match &self.origin {
            VolumeOrigin::Archive(archive) if !populated => {
                self.filesystem.set_state(ServiceState::Configuring);
                Some(ExtractionTask::spawn(
                    Arc::clone(&self.extractor),
                    archive.clone(),
                    mount_point.to_path_buf(),
                    Arc::clone(&self.filesystem),
                ))
            }
            VolumeOrigin::Archive(archive) => {
                debug!(url = %archive.url, %mount_point, "volume already populated; not extracting");
                self.filesystem.nfs_share_and_set_state();
                None
            }
            VolumeOrigin::Blank | VolumeOrigin::Snapshot(_) => {
                self.filesystem.nfs_share_and_set_state();
                None
            }
        };

        Ok(MountOutcome {
            formatted,
            grown,
            extraction,
        })
    }

    async fn wait_for_device_node(&self, device: &Utf8Path) {
        for _ in 0..self.timings.device_node_attempts {
            if self.discovery.device_present(device) {
                debug!(%device, "device node present");
                return;
            }
            debug!(%device, "device node not present yet; waiting");
            sleep(self.timings.device_node_interval).await;
        }
        warn!(%device, "device node did not appear; mounting anyway");
    }

    fn grow_if_needed(&self, mount_point: &Utf8Path) -> bool {
        let (Some(size), Some(snapshot_size)) = (self.size_gib, self.source_snapshot_size_gib)
        else {
            return false;
        };
        if size <= snapshot_size {
            return false;
        }
        match self.run_tool(&self.settings.tools.grow, &[OsString::from(mount_point.as_str())]) {
            Ok(()) => {
                info!(filesystem = self.filesystem.name(), size, snapshot_size, "grew filesystem");
                true
            }
            Err(message) => {
                warn!(filesystem = self.filesystem.name(), error = %message, "cannot grow filesystem");
                false
            }
        }
    }

    fn apply_ownership(&self, mount_point: &Utf8Path) {
        let service = &self.settings.service_user;
        self.chown(service, mount_point);
        if !self.filesystem.is_primary() {
            return;
        }
        for name in PRIMARY_SUBDIRS {
            let path = self.settings.data_root.join(name);
            if let Err(err) = hostfs::ensure_dir(&path) {
                debug!(%path, error = %err, "cannot create data subdirectory");
                continue;
            }
            let owner = if name == EXPORT_SUBDIR {
                &self.settings.export_user
            } else {
                service
            };
            self.chown(owner, &path);
        }
    }

    fn chown(&self, user: &str, path: &Utf8Path) {
        let args = [
            OsString::from(format!("{user}:{user}")),
            OsString::from(path.as_str()),
        ];
        if let Err(message) = self.run_tool(&self.settings.tools.chown, &args) {
            debug!(%path, user, error = %message, "cannot change ownership");
        }
    }

    fn run_tool(&self, program: &str, args: &[OsString]) -> Result<(), String> {
        run_checked(&self.runner, program, args)
    }

    /// Withdraws the NFS share and unmounts `mount_point`.
    ///
    /// Only running or shutting-down filesystems are unmounted. After a
    /// successful unmount the leftover upload store and the empty mount point
    /// directory are removed.
    pub async fn unmount(&mut self, mount_point: &Utf8Path) -> UnmountOutcome {
        self.filesystem.remove_nfs_share();
        let state = self.filesystem.state();
        if !matches!(state, ServiceState::Running | ServiceState::ShuttingDown) {
            debug!(
                filesystem = self.filesystem.name(),
                %state,
                "not unmounting a filesystem that is not running"
            );
            return UnmountOutcome::Skipped(state);
        }
        if !self.filesystem.is_mounted(mount_point) {
            debug!(filesystem = self.filesystem.name(), %mount_point, "already unmounted");
            return UnmountOutcome::NotMounted;
        }

        let attempts = self.timings.unmount_attempts;
        let args = [OsString::from(mount_point.as_str())];
        for attempt in 1..=attempts {
            match self.run_tool(&self.settings.tools.umount, &args) {
                Ok(()) => {
                    info!(%mount_point, "unmounted filesystem");
                    clean_mount_point(mount_point);
                    return UnmountOutcome::Unmounted;
                }
                Err(message) => {
                    warn!(%mount_point, attempt, attempts, error = %message, "unmount failed");
                }
            }
            if attempt < attempts {
                sleep(self.timings.unmount_interval).await;
            }
        }
        warn!(%mount_point, "could not unmount filesystem");
        UnmountOutcome::Failed
    }
}

fn prepare_mount_point(mount_point: &Utf8Path, filesystem: &str) {
    match hostfs::ensure_dir(mount_point) {
        Ok(true) => debug!(%mount_point, filesystem, "created mount point"),
        Ok(false) => {
            if matches!(hostfs::is_empty_dir(mount_point), Ok(false)) {
                warn!(%mount_point, filesystem, "mount point is not empty; mounting anyway");
            }
        }
        Err(err) => warn!(%mount_point, filesystem, error = %err, "cannot create mount point"),
    }
}

fn archive_populated(archive: &ArchiveDescriptor, mount_point: &Utf8Path) -> bool {
    archive.marker.as_ref().map_or_else(
        || matches!(hostfs::is_empty_dir(mount_point), Ok(false)),
        |marker| marker.exists(),
    )
}

fn clean_mount_point(mount_point: &Utf8Path) {
    let upload_store = mount_point.join(UPLOAD_STORE);
    if let Err(err) = hostfs::remove_tree(&upload_store) {
        error!(path = %upload_store, error = %err, "cannot remove upload store");
    }
    if let Err(err) = hostfs::remove_empty_dir(mount_point) {
        error!(%mount_point, error = %err, "cannot remove unmounted mount point");
    }
}
