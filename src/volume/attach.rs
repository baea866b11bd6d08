//! Attaching the volume and resolving the device it appears as.

use camino::Utf8PathBuf;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::backend::{CloudVolumeClient, ProviderFailure};
use crate::command::CommandRunner;
use crate::device::{AttachCandidate, DeviceDiscovery, DeviceScheme, NewDevice};
use crate::filesystem::ServiceState;

use super::{VolumeError, VolumeOrigin, VolumeResource, VolumeStatus, Wait};

impl<C: CloudVolumeClient, R: CommandRunner> VolumeResource<C, R> {
    /// Attaches the volume to the local instance and returns its device.
    ///
    /// Already attached volumes return the known device. Otherwise each
    /// candidate name is requested in turn; the device set is compared before
    /// and after, and a single new device is accepted even if its name
    /// differs from the request.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotAttachable`] for missing or deleting
    /// volumes, [`VolumeError::NeverAvailable`] when the volume does not
    /// become available, [`VolumeError::ZoneMismatch`] (after marking the
    /// filesystem as failed), [`VolumeError::AmbiguousDevices`] when several
    /// devices appear at once, and [`VolumeError::NoCandidateDevices`] or
    /// [`VolumeError::AttachExhausted`] when nothing could be attached.
    pub async fn attach(&mut self) -> Result<Utf8PathBuf, VolumeError> {
        info!(volume = %self.full_name(), "adding volume");
        let status = self.status().await;
        let volume_id = self.volume_id().unwrap_or("-").to_owned();
        match status {
            VolumeStatus::None | VolumeStatus::Deleting => {
                error!(%volume_id, %status, "cannot attach a missing volume");
                return Err(VolumeError::NotAttachable { volume_id, status });
            }
            VolumeStatus::Attached | VolumeStatus::InUse => {
                debug!(%volume_id, device = ?self.device, "volume already attached");
                return self
                    .device
                    .clone()
                    .ok_or(VolumeError::DeviceUnresolved { volume_id });
            }
            VolumeStatus::Creating | VolumeStatus::Available | VolumeStatus::Attaching => {}
        }

        let restoring =
            matches!(self.origin, VolumeOrigin::Snapshot(_)) && status == VolumeStatus::Creating;
        if restoring {
            debug!(%volume_id, "waiting for volume to be restored from its snapshot");
            if !self
                .wait_for_status(VolumeStatus::Available, Wait::Unbounded)
                .await
            {
                return Err(self.never_available(volume_id).await);
            }
        } else if status != VolumeStatus::Available
            && !self
                .wait_for_status(
                    VolumeStatus::Available,
                    Wait::Bounded(self.timings.available_timeout),
                )
                .await
        {
            return Err(self.never_available(volume_id).await);
        }

        let shared_lock = self.allocation_lock.clone();
        let _allocation = match shared_lock.as_ref() {
            Some(lock) => Some(lock.acquire().await),
            None => None,
        };

        let candidates = self.discovery.next_candidate_devices();
        if candidates.is_empty() {
            return Err(VolumeError::NoCandidateDevices { volume_id });
        }
        let mut attempted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            attempted.push(candidate.request.clone());
            if let Some(device) = self.try_candidate(&candidate).await? {
                self.device = Some(device.clone());
                return Ok(device);
            }
        }
        error!(%volume_id, ?attempted, "volume did not attach under any candidate device");
        Err(VolumeError::AttachExhausted {
            volume_id,
            attempted,
        })
    }

    async fn never_available(&mut self, volume_id: String) -> VolumeError {
        let status = self.status().await;
        error!(%volume_id, %status, "volume never became available to attach");
        VolumeError::NeverAvailable { volume_id, status }
    }

    /// Requests one candidate name. `Ok(None)` means try the next one.
    async fn try_candidate(
        &mut self,
        candidate: &AttachCandidate,
    ) -> Result<Option<Utf8PathBuf>, VolumeError> {
        let Some(volume) = self.tracker.volume().cloned() else {
            return Err(VolumeError::NotProvisioned {
                filesystem: self.filesystem.name().to_owned(),
            });
        };
        let instance_id = self.client.instance_id().to_owned();
        let before = self.discovery.list_devices();
        debug!(volume_id = %volume.id, devices = ?before, "devices before attach");
        info!(
            volume_id = %volume.id,
            %instance_id,
            device = %candidate.request,
            "attaching volume"
        );

        match self
            .client
            .attach(&volume, &instance_id, &candidate.request)
            .await
        {
            Ok(()) => {
                self.tracker.invalidate();
                if self
                    .wait_for_status(
                        VolumeStatus::Attached,
                        Wait::Bounded(self.timings.attach_timeout),
                    )
                    .await
                {
                    sleep(self.timings.device_settle).await;
                    let after = self.discovery.list_devices();
                    debug!(volume_id = %volume.id, devices = ?after, "devices after attach");
                    match DeviceDiscovery::resolve_new_device(&before, &after) {
                        NewDevice::Single(device) => {
                            if device.as_str() != candidate.request {
                                info!(
                                    volume_id = %volume.id,
                                    requested = %candidate.request,
                                    %device,
                                    "volume appeared under a different device name"
                                );
                            }
                            return Ok(Some(device));
                        }
                        NewDevice::Ambiguous(devices) => {
                            error!(
                                volume_id = %volume.id,
                                ?devices,
                                "several devices appeared during attach; aborting"
                            );
                            return Err(VolumeError::AmbiguousDevices {
                                volume_id: volume.id,
                                devices,
                            });
                        }
                        NewDevice::Missing => {
                            debug!(
                                volume_id = %volume.id,
                                requested = %candidate.request,
                                "no new device appeared"
                            );
                        }
                    }
                }
            }
            Err(err) if err.is_zone_mismatch() => {
                let instance_zone = self.client.zone().to_owned();
                error!(
                    volume_id = %volume.id,
                    volume_zone = %volume.zone,
                    %instance_zone,
                    "volume is in the wrong availability zone; start an instance in its zone to use it"
                );
                self.filesystem.set_state(ServiceState::Error);
                return Err(VolumeError::ZoneMismatch {
                    volume_id: volume.id,
                    volume_zone: volume.zone,
                    instance_zone,
                });
            }
            Err(err) => {
                error!(
                    volume_id = %volume.id,
                    device = %candidate.request,
                    error = %err,
                    "attach request failed"
                );
            }
        }

        // The request may have attached without the device becoming visible.
        if self.status().await != VolumeStatus::Available
            && candidate.visible_as != DeviceScheme::Virtio
        {
            self.detach().await;
        }
        if !self
            .wait_for_status(
                VolumeStatus::Available,
                Wait::Bounded(self.timings.speculative_detach_timeout),
            )
            .await
        {
            warn!(volume_id = %volume.id, "volume not available after failed attach");
        }
        Ok(None)
    }
}
