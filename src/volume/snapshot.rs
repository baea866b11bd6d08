//! Snapshots taken from the managed volume.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{CloudVolumeClient, SnapshotRecord, TagTarget};
use crate::command::CommandRunner;

use super::{VolumeError, VolumeResource};

/// Operator-facing view of one snapshot.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SnapshotSummary {
    /// Provider snapshot identifier.
    pub id: String,
    /// Completion percentage.
    pub progress: u8,
    /// Raw provider status.
    pub status: String,
    /// Free-form description.
    pub description: String,
}

impl From<&SnapshotRecord> for SnapshotSummary {
    fn from(record: &SnapshotRecord) -> Self {
        Self {
            id: record.id.clone(),
            progress: record.progress,
            status: record.status.clone(),
            description: record.description.clone(),
        }
    }
}

impl<C: CloudVolumeClient, R: CommandRunner> VolumeResource<C, R> {
    /// Snapshots the provider reports as taken from the bound volume.
    ///
    /// Returns an empty list when unbound or when the listing fails.
    pub async fn derived_snapshots(&self) -> Vec<SnapshotRecord> {
        let Some(volume_id) = self.volume_id() else {
            return Vec::new();
        };
        match self.client.get_all_snapshots().await {
            Ok(snapshots) => snapshots
                .into_iter()
                .filter(|snapshot| snapshot.volume_id.as_deref() == Some(volume_id))
                .collect(),
            Err(err) => {
                warn!(volume_id, error = %err, "cannot list snapshots");
                Vec::new()
            }
        }
    }

    /// Refreshes progress for every cached snapshot and summarises them.
    ///
    /// Snapshots the provider no longer reports are dropped from the cache.
    /// Snapshots that cannot be described stay cached but are left out of
    /// this summary.
    pub async fn snapshots_created(&mut self) -> Vec<SnapshotSummary> {
        let mut kept = Vec::with_capacity(self.snapshots.len());
        let mut summaries = Vec::with_capacity(self.snapshots.len());
        for cached in &self.snapshots {
            match self.client.get_snapshot(&cached.id).await {
                Ok(Some(current)) => {
                    summaries.push(SnapshotSummary::from(&current));
                    kept.push(current);
                }
                Ok(None) => {
                    debug!(snapshot_id = %cached.id, "snapshot no longer reported");
                }
                Err(err) => {
                    warn!(snapshot_id = %cached.id, error = %err, "cannot refresh snapshot");
                    kept.push(cached.clone());
                }
            }
        }
        self.snapshots = kept;
        summaries
    }

    /// Takes a snapshot of the bound volume and tags it with the cluster
    /// identity.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotProvisioned`] when no volume is bound and
    /// [`VolumeError::Provider`] when the provider rejects the request.
    pub async fn create_snapshot(
        &mut self,
        description: Option<&str>,
    ) -> Result<String, VolumeError> {
        let Some(volume) = self.tracker.volume().cloned() else {
            return Err(VolumeError::NotProvisioned {
                filesystem: self.filesystem.name().to_owned(),
            });
        };
        let text = description.map_or_else(
            || format!("Snapshot of {} for {}", self.filesystem.name(), self.settings.cluster_name),
            str::to_owned,
        );
        let snapshot = self
            .client
            .create_snapshot(&volume, &text)
            .await
            .map_err(|err| VolumeError::provider("create snapshot", &err))?;
        info!(volume_id = %volume.id, snapshot_id = %snapshot.id, "created snapshot");

        let tags = [
            ("Name", self.settings.cluster_name.as_str()),
            ("bucketName", self.settings.bucket_name.as_str()),
            ("filesystem", self.filesystem.name()),
        ];
        for (key, value) in tags {
            if let Err(err) = self
                .client
                .add_tag(TagTarget::Snapshot(&snapshot.id), key, value)
                .await
            {
                warn!(snapshot_id = %snapshot.id, key, error = %err, "cannot tag snapshot");
            }
        }
        let snapshot_id = snapshot.id.clone();
        self.snapshots.push(snapshot);
        Ok(snapshot_id)
    }
}
