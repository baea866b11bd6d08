//! Cloud provider abstraction consumed by the volume lifecycle manager.
//!
//! The trait mirrors the small set of block-storage calls the lifecycle
//! needs: volume CRUD, attachment, snapshots, and tagging. Providers return
//! plain records so the core never depends on a provider SDK.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Cloud family the local instance runs on; selects device naming rules.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudKind {
    /// Amazon EC2 and compatible APIs.
    Ec2,
    /// OpenStack clouds.
    OpenStack,
    /// Scaleway Instances.
    Scaleway,
    /// Any other provider; only the generic naming rules apply.
    Generic,
}

impl CloudKind {
    /// Parses a configuration value, falling back to [`CloudKind::Generic`].
    #[must_use]
    pub fn from_config(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "ec2" | "aws" => Self::Ec2,
            "openstack" => Self::OpenStack,
            "scaleway" | "scw" => Self::Scaleway,
            _ => Self::Generic,
        }
    }
}

impl fmt::Display for CloudKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ec2 => "ec2",
            Self::OpenStack => "openstack",
            Self::Scaleway => "scaleway",
            Self::Generic => "generic",
        };
        formatter.write_str(label)
    }
}

/// Attachment data reported alongside a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachmentRecord {
    /// Instance the volume is attached to.
    pub instance_id: String,
    /// Device name the provider reports for the attachment, if any.
    pub device: Option<String>,
    /// Provider attachment state (for example `attached` or `attaching`).
    pub state: String,
}

/// Provider view of a volume at the time of the last describe call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeRecord {
    /// Provider volume identifier.
    pub id: String,
    /// Size in GiB; zero when the provider has not reported it yet.
    pub size_gib: u64,
    /// Zone the volume lives in.
    pub zone: String,
    /// Raw provider status string.
    pub status: String,
    /// Snapshot the volume was restored from, if any.
    pub snapshot_id: Option<String>,
    /// Current attachment, if any.
    pub attachment: Option<AttachmentRecord>,
}

impl VolumeRecord {
    /// Returns the provider attachment state, when attached or attaching.
    #[must_use]
    pub fn attachment_state(&self) -> Option<&str> {
        self.attachment.as_ref().map(|att| att.state.as_str())
    }
}

/// Provider view of a snapshot.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SnapshotRecord {
    /// Provider snapshot identifier.
    pub id: String,
    /// Volume the snapshot was taken from, when known.
    pub volume_id: Option<String>,
    /// Completion percentage in the range `0..=100`.
    pub progress: u8,
    /// Raw provider status string.
    pub status: String,
    /// Free-form description.
    pub description: String,
    /// Size of the source volume in GiB.
    pub volume_size_gib: u64,
}

/// Metadata used when restoring a volume from a snapshot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SnapshotInfo {
    /// Size of the volume the snapshot was taken from, in GiB.
    pub volume_size_gib: u64,
}

/// Resource that can carry provider tags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TagTarget<'a> {
    /// A block volume.
    Volume(&'a str),
    /// A snapshot.
    Snapshot(&'a str),
}

impl TagTarget<'_> {
    /// Returns the identifier of the tagged resource.
    #[must_use]
    pub const fn id(&self) -> &str {
        match self {
            Self::Volume(id) | Self::Snapshot(id) => id,
        }
    }
}

/// Classification hooks for provider errors.
pub trait ProviderFailure: std::error::Error + Send + Sync + 'static {
    /// Returns `true` when the error means the volume lives in a different
    /// availability zone than the instance, so it can never be attached here.
    fn is_zone_mismatch(&self) -> bool;
}

/// Block-storage operations required by the volume lifecycle.
pub trait CloudVolumeClient: Send + Sync {
    /// Provider specific error type returned by the client.
    type Error: ProviderFailure;

    /// Creates a volume of `size_gib` in `zone`, optionally from a snapshot.
    fn create_volume<'a>(
        &'a self,
        size_gib: u64,
        zone: &'a str,
        snapshot_id: Option<&'a str>,
    ) -> BackendFuture<'a, Option<VolumeRecord>, Self::Error>;

    /// Describes the volumes with the given identifiers. Missing volumes are
    /// omitted from the result.
    fn get_all_volumes<'a>(
        &'a self,
        ids: &'a [String],
    ) -> BackendFuture<'a, Vec<VolumeRecord>, Self::Error>;

    /// Describes one snapshot, returning `None` when it does not exist.
    fn get_snapshot<'a>(
        &'a self,
        id: &'a str,
    ) -> BackendFuture<'a, Option<SnapshotRecord>, Self::Error>;

    /// Returns restore metadata for a snapshot.
    fn get_snapshot_info<'a>(&'a self, id: &'a str)
    -> BackendFuture<'a, SnapshotInfo, Self::Error>;

    /// Lists every snapshot visible to the account.
    fn get_all_snapshots(&self) -> BackendFuture<'_, Vec<SnapshotRecord>, Self::Error>;

    /// Deletes a volume, returning whether the provider accepted the request.
    fn delete_volume<'a>(&'a self, id: &'a str) -> BackendFuture<'a, bool, Self::Error>;

    /// Adds a `key=value` tag to a resource.
    fn add_tag<'a>(
        &'a self,
        target: TagTarget<'a>,
        key: &'a str,
        value: &'a str,
    ) -> BackendFuture<'a, (), Self::Error>;

    /// Attaches `volume` to `instance_id`, requesting `device` as its name.
    fn attach<'a>(
        &'a self,
        volume: &'a VolumeRecord,
        instance_id: &'a str,
        device: &'a str,
    ) -> BackendFuture<'a, (), Self::Error>;

    /// Detaches `volume` from whichever instance it is attached to.
    fn detach<'a>(&'a self, volume: &'a VolumeRecord) -> BackendFuture<'a, (), Self::Error>;

    /// Creates a point-in-time snapshot of `volume`.
    fn create_snapshot<'a>(
        &'a self,
        volume: &'a VolumeRecord,
        description: &'a str,
    ) -> BackendFuture<'a, SnapshotRecord, Self::Error>;

    /// Identifier of the local compute instance.
    fn instance_id(&self) -> &str;

    /// Availability zone of the local compute instance.
    fn zone(&self) -> &str;

    /// Instance type (commercial type or flavour) of the local instance.
    fn instance_type(&self) -> &str;

    /// Cloud family of the local instance.
    fn cloud_kind(&self) -> CloudKind;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ec2", CloudKind::Ec2)]
    #[case(" AWS ", CloudKind::Ec2)]
    #[case("openstack", CloudKind::OpenStack)]
    #[case("Scaleway", CloudKind::Scaleway)]
    #[case("gce", CloudKind::Generic)]
    fn cloud_kind_parses_config_values(#[case] input: &str, #[case] expected: CloudKind) {
        assert_eq!(CloudKind::from_config(input), expected);
    }

    #[test]
    fn attachment_state_reads_through_record() {
        let record = VolumeRecord {
            id: String::from("vol-1"),
            size_gib: 10,
            zone: String::from("fr-par-1"),
            status: String::from("in-use"),
            snapshot_id: None,
            attachment: Some(AttachmentRecord {
                instance_id: String::from("i-1"),
                device: Some(String::from("/dev/sdf")),
                state: String::from("attached"),
            }),
        };
        assert_eq!(record.attachment_state(), Some("attached"));
    }
}
