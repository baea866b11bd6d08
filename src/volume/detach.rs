//! Detaching the volume from the local instance.

use tracing::{debug, error, info, warn};

use crate::backend::CloudVolumeClient;
use crate::command::CommandRunner;

use super::{VolumeResource, VolumeStatus, Wait};

impl<C: CloudVolumeClient, R: CommandRunner> VolumeResource<C, R> {
    /// Detaches the volume, retrying once if it does not become available.
    ///
    /// Returns `false` when the volume was not attached or did not detach;
    /// failures are logged and leave the volume as the provider reports it.
    pub async fn detach(&mut self) -> bool {
        let status = self.status().await;
        let Some(volume) = self.tracker.volume().cloned() else {
            debug!(filesystem = self.filesystem.name(), "no volume to detach");
            return false;
        };
        if !status.is_attached() {
            debug!(volume_id = %volume.id, %status, "volume already not attached");
            return false;
        }

        info!(volume_id = %volume.id, device = ?self.device, "detaching volume");
        if let Err(err) = self.client.detach(&volume).await {
            error!(volume_id = %volume.id, error = %err, "detach request failed");
            return false;
        }
        self.tracker.invalidate();

        if !self
            .wait_for_status(
                VolumeStatus::Available,
                Wait::Bounded(self.timings.detach_timeout),
            )
            .await
        {
            debug!(volume_id = %volume.id, "volume still attached; detaching again");
            if let Err(err) = self.client.detach(&volume).await {
                error!(volume_id = %volume.id, error = %err, "detach request failed");
                return false;
            }
            self.tracker.invalidate();
            if !self
                .wait_for_status(
                    VolumeStatus::Available,
                    Wait::Bounded(self.timings.detach_retry_timeout),
                )
                .await
            {
                let left_in = self.status().await;
                warn!(volume_id = %volume.id, status = %left_in, "volume did not detach properly");
                return false;
            }
        }

        self.device = None;
        true
    }
}
