//! Creating, deleting and rebinding the remote volume.

use camino::Utf8PathBuf;
use tracing::{debug, error, info, warn};

use crate::backend::{CloudVolumeClient, TagTarget};
use crate::command::CommandRunner;
use crate::filesystem::ServiceRole;

use super::{VolumeError, VolumeOrigin, VolumeResource, VolumeStatus};

impl<C: CloudVolumeClient, R: CommandRunner> VolumeResource<C, R> {
    /// Creates the remote volume and tags it with the cluster identity.
    ///
    /// Does not wait for the volume to become available.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::MissingOrigin`] before any provider call when
    /// no size, snapshot or archive is known;
    /// [`VolumeError::SnapshotNotFound`] when the source snapshot is missing;
    /// [`VolumeError::AlreadyProvisioned`] when a volume is already bound
    /// and reports a status; and [`VolumeError::Provider`] for provider
    /// failures.
    pub async fn create(&mut self) -> Result<(), VolumeError> {
        let filesystem = self.filesystem.name().to_owned();
        if self.size_gib.is_none() && matches!(self.origin, VolumeOrigin::Blank) {
            error!(%filesystem, "cannot add a volume without a size, snapshot ID or archive");
            return Err(VolumeError::MissingOrigin { filesystem });
        }

        if let VolumeOrigin::Snapshot(snapshot_id) = &self.origin
            && self.volume_id().is_none()
        {
            let described = self
                .client
                .get_snapshot(snapshot_id)
                .await
                .map_err(|err| VolumeError::provider("describe snapshot", &err))?;
            let Some(snapshot) = described else {
                error!(snapshot_id, "source snapshot not found");
                return Err(VolumeError::SnapshotNotFound {
                    snapshot_id: snapshot_id.clone(),
                });
            };
            self.source_snapshot_size_gib = Some(snapshot.volume_size_gib);
            if self.size_gib.is_none() {
                let info = self
                    .client
                    .get_snapshot_info(snapshot_id)
                    .await
                    .map_err(|err| VolumeError::provider("describe snapshot", &err))?;
                self.size_gib = Some(info.volume_size_gib).filter(|size| *size > 0);
            }
        }

        let status = self.status().await;
        if status != VolumeStatus::None {
            debug!(volume = %self.full_name(), %status, "volume already provisioned");
            return Err(VolumeError::AlreadyProvisioned {
                volume_id: self.volume_id().unwrap_or("-").to_owned(),
                status,
            });
        }

        let Some(size_gib) = self.size_gib else {
            error!(%filesystem, "no size known for the new volume");
            return Err(VolumeError::MissingSize { filesystem });
        };
        let zone = self.client.zone().to_owned();
        let snapshot_id = self.origin.snapshot_id();
        debug!(size_gib, %zone, ?snapshot_id, %filesystem, "creating volume");
        let created = self
            .client
            .create_volume(size_gib, &zone, snapshot_id)
            .await
            .map_err(|err| VolumeError::provider("create volume", &err))?;
        let Some(record) = created else {
            warn!(%filesystem, "provider did not return a volume");
            return Err(VolumeError::NotCreated { filesystem });
        };
        if record.size_gib > 0 {
            self.size_gib = Some(record.size_gib);
        }
        info!(
            volume_id = %record.id,
            size_gib = record.size_gib,
            ?snapshot_id,
            %zone,
            %filesystem,
            "created volume"
        );
        self.tracker.bind(record);
        self.tag_volume().await;
        Ok(())
    }

    async fn tag_volume(&self) {
        let Some(volume_id) = self.volume_id() else {
            return;
        };
        let roles = ServiceRole::join(self.filesystem.svc_roles());
        let tags = [
            ("Name", self.settings.cluster_name.as_str()),
            ("bucketName", self.settings.bucket_name.as_str()),
            ("filesystem", self.filesystem.name()),
            ("roles", roles.as_str()),
        ];
        for (key, value) in tags {
            if let Err(err) = self
                .client
                .add_tag(TagTarget::Volume(volume_id), key, value)
                .await
            {
                warn!(volume_id, key, error = %err, "cannot tag volume");
            }
        }
    }

    /// Deletes the remote volume and forgets its identity.
    ///
    /// Returns `false` when no volume is bound or the provider refuses.
    pub async fn delete(&mut self) -> bool {
        let Some(volume_id) = self.volume_id().map(str::to_owned) else {
            debug!(filesystem = self.filesystem.name(), "no volume to delete");
            return false;
        };
        match self.client.delete_volume(&volume_id).await {
            Ok(true) => {
                info!(%volume_id, "deleted volume");
                self.tracker.clear();
                self.device = None;
                true
            }
            Ok(false) => {
                warn!(%volume_id, "provider refused to delete volume");
                false
            }
            Err(err) => {
                error!(%volume_id, error = %err, "cannot delete volume");
                false
            }
        }
    }

    /// Binds the resource to an existing provider volume.
    ///
    /// Adopts the volume's size and source snapshot and works out the local
    /// device it is attached as, if any.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::VolumeNotFound`] or
    /// [`VolumeError::AttachedElsewhere`], leaving the resource unbound, and
    /// [`VolumeError::Provider`] when the describe call fails.
    pub async fn rebind(&mut self, volume_id: &str) -> Result<(), VolumeError> {
        debug!(volume_id, "binding to existing volume");
        let ids = [volume_id.to_owned()];
        let described = self
            .client
            .get_all_volumes(&ids)
            .await
            .map_err(|err| VolumeError::provider("describe volume", &err))?
            .into_iter()
            .next();
        let Some(record) = described else {
            error!(volume_id, "cannot bind to a nonexistent volume");
            self.unbind();
            return Err(VolumeError::VolumeNotFound {
                volume_id: volume_id.to_owned(),
            });
        };

        if let Some(attachment) = &record.attachment
            && attachment.state == "attached"
            && attachment.instance_id != self.client.instance_id()
        {
            error!(
                volume_id,
                instance_id = %attachment.instance_id,
                "volume is attached to a different instance"
            );
            let instance_id = attachment.instance_id.clone();
            self.unbind();
            return Err(VolumeError::AttachedElsewhere {
                volume_id: volume_id.to_owned(),
                instance_id,
            });
        }

        if record.size_gib > 0 {
            self.size_gib = Some(record.size_gib);
        }
        if let Some(snapshot_id) = record.snapshot_id.as_deref().filter(|id| !id.is_empty()) {
            self.origin = VolumeOrigin::Snapshot(snapshot_id.to_owned());
        }
        let reported = record
            .attachment
            .as_ref()
            .and_then(|attachment| attachment.device.clone());
        self.tracker.bind(record);
        self.device = reported.and_then(|device| self.resolve_reported_device(&device));
        debug!(volume = %self.full_name(), device = ?self.device, "bound volume");
        Ok(())
    }

    fn unbind(&mut self) {
        self.tracker.clear();
        self.device = None;
    }

    /// Maps the device name the provider reports to a local path, trying the
    /// Xen spelling when the reported one does not exist.
    fn resolve_reported_device(&self, reported: &str) -> Option<Utf8PathBuf> {
        let path = Utf8PathBuf::from(reported);
        if self.discovery.device_present(&path) {
            return Some(path);
        }
        let Some(suffix) = device_suffix(reported) else {
            debug!(%reported, "reported device has no suffix to map to a Xen name");
            return None;
        };
        let xen = self.discovery.path_for(&format!("xvd{suffix}"));
        debug!(%reported, candidate = %xen, "reported device missing; trying Xen name");
        if self.discovery.device_present(&xen) {
            return Some(xen);
        }
        error!(%reported, candidate = %xen, "cannot find local device for attached volume");
        None
    }
}

/// Trailing device identifier: the last letter, or the last two characters
/// when the name ends in a digit (`/dev/sdg1` yields `g1`).
fn device_suffix(device: &str) -> Option<&str> {
    let last = device.chars().next_back()?;
    let width = if last.is_ascii_digit() { 2 } else { 1 };
    let start = device.char_indices().rev().nth(width - 1)?.0;
    device.get(start..)
}

#[cfg(test)]
mod tests {
    use super::device_suffix;
    use rstest::rstest;

    #[rstest]
    #[case("/dev/sdf", Some("f"))]
    #[case("/dev/sdg1", Some("g1"))]
    #[case("1", None)]
    #[case("", None)]
    fn suffix_of_reported_device(#[case] device: &str, #[case] expected: Option<&str>) {
        assert_eq!(device_suffix(device), expected);
    }
}
