//! Normalised volume status and the throttled status tracker.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::backend::{CloudVolumeClient, VolumeRecord};

/// Provider status strings and the normalised status they map to. The first
/// whitespace-delimited token of the provider status is looked up here.
static STATUS_TABLE: &[(&str, VolumeStatus)] = &[
    ("creating", VolumeStatus::Creating),
    ("available", VolumeStatus::Available),
    ("in-use", VolumeStatus::InUse),
    ("in_use", VolumeStatus::InUse),
    ("attaching", VolumeStatus::Attaching),
    ("attached", VolumeStatus::Attached),
    ("deleting", VolumeStatus::Deleting),
];

/// Lifecycle status of a volume, normalised across providers.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeStatus {
    /// No remote volume is bound, or its status could not be determined.
    None,
    /// The provider is still creating the volume.
    Creating,
    /// Created and detached.
    Available,
    /// An attach request is in flight.
    Attaching,
    /// Attached to the local instance.
    Attached,
    /// In use; reported by providers that do not distinguish attachment.
    InUse,
    /// Deletion is in progress.
    Deleting,
}

impl VolumeStatus {
    /// Maps a raw provider status, returning `None` for unknown strings.
    #[must_use]
    pub fn from_provider(raw: &str) -> Option<Self> {
        let token = raw.split_whitespace().next()?;
        STATUS_TABLE
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(token))
            .map(|(_, status)| *status)
    }

    /// Returns `true` for ATTACHED and IN_USE.
    #[must_use]
    pub const fn is_attached(self) -> bool {
        matches!(self, Self::Attached | Self::InUse)
    }
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "none",
            Self::Creating => "creating",
            Self::Available => "available",
            Self::Attaching => "attaching",
            Self::Attached => "attached",
            Self::InUse => "in-use",
            Self::Deleting => "deleting",
        };
        formatter.write_str(label)
    }
}

/// Caches the provider view of one volume and throttles status refreshes.
#[derive(Clone, Debug)]
pub struct StatusTracker {
    volume: Option<VolumeRecord>,
    cached: Option<(VolumeStatus, Instant)>,
    min_interval: Duration,
}

impl StatusTracker {
    /// Creates an unbound tracker that re-polls at most once per
    /// `min_interval`.
    #[must_use]
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            volume: None,
            cached: None,
            min_interval,
        }
    }

    /// Last known provider record for the bound volume.
    #[must_use]
    pub const fn volume(&self) -> Option<&VolumeRecord> {
        self.volume.as_ref()
    }

    /// Identifier of the bound volume.
    #[must_use]
    pub fn volume_id(&self) -> Option<&str> {
        self.volume.as_ref().map(|volume| volume.id.as_str())
    }

    /// Binds the tracker to `volume`, discarding any cached status.
    pub fn bind(&mut self, volume: VolumeRecord) {
        self.volume = Some(volume);
        self.cached = None;
    }

    /// Unbinds the tracker.
    pub fn clear(&mut self) {
        self.volume = None;
        self.cached = None;
    }

    /// Drops the cached status so the next call to [`StatusTracker::status`]
    /// hits the provider.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    pub(crate) const fn set_min_interval(&mut self, min_interval: Duration) {
        self.min_interval = min_interval;
    }

    /// Current status of the bound volume.
    ///
    /// Unbound trackers report [`VolumeStatus::None`] without contacting the
    /// provider. Provider failures are logged and reported as
    /// [`VolumeStatus::None`].
    pub async fn status<C: CloudVolumeClient>(&mut self, client: &C) -> VolumeStatus {
        let Some(volume_id) = self.volume.as_ref().map(|volume| volume.id.clone()) else {
            return VolumeStatus::None;
        };
        if let Some((status, checked_at)) = self.cached
            && checked_at.elapsed() < self.min_interval
        {
            return status;
        }

        let ids = [volume_id];
        let described = match client.get_all_volumes(&ids).await {
            Ok(mut volumes) => volumes.pop(),
            Err(err) => {
                error!(volume_id = %ids.join(","), error = %err, "cannot retrieve volume status");
                return VolumeStatus::None;
            }
        };
        let Some(record) = described else {
            error!(volume_id = %ids.join(","), "volume no longer reported by the provider; unbinding");
            self.clear();
            return VolumeStatus::None;
        };

        let status = match VolumeStatus::from_provider(&record.status) {
            Some(VolumeStatus::InUse) if record.attachment_state() == Some("attached") => {
                VolumeStatus::Attached
            }
            Some(mapped) => mapped,
            None => {
                error!(
                    volume_id = %record.id,
                    raw_status = %record.status,
                    "unknown volume status; treating as none"
                );
                VolumeStatus::None
            }
        };
        debug!(volume_id = %record.id, %status, "refreshed volume status");
        self.volume = Some(record);
        self.cached = Some((status, Instant::now()));
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("creating", Some(VolumeStatus::Creating))]
    #[case("available", Some(VolumeStatus::Available))]
    #[case("in-use", Some(VolumeStatus::InUse))]
    #[case("in-use (attached to i-1)", Some(VolumeStatus::InUse))]
    #[case("Available", Some(VolumeStatus::Available))]
    #[case("deleting", Some(VolumeStatus::Deleting))]
    #[case("error", None)]
    #[case("", None)]
    fn maps_first_token(#[case] raw: &str, #[case] expected: Option<VolumeStatus>) {
        assert_eq!(VolumeStatus::from_provider(raw), expected);
    }

    #[test]
    fn attached_statuses() {
        assert!(VolumeStatus::Attached.is_attached());
        assert!(VolumeStatus::InUse.is_attached());
        assert!(!VolumeStatus::Available.is_attached());
    }
}
