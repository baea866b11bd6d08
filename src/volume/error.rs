//! Errors raised by the volume lifecycle.

use camino::Utf8PathBuf;
use thiserror::Error;

use super::status::VolumeStatus;

/// Errors raised by [`VolumeResource`](super::VolumeResource) operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VolumeError {
    /// Raised when neither a size, a snapshot nor an archive was supplied.
    #[error("volume for {filesystem} needs a size, snapshot ID or archive")]
    MissingOrigin {
        /// Filesystem the volume belongs to.
        filesystem: String,
    },
    /// Raised when `create` is called for a volume that already exists.
    #[error("volume {volume_id} already provisioned (status {status})")]
    AlreadyProvisioned {
        /// Bound volume identifier.
        volume_id: String,
        /// Status observed when the request was rejected.
        status: VolumeStatus,
    },
    /// Raised when no size is known for a volume populated from an archive.
    #[error("volume for {filesystem} needs an explicit size")]
    MissingSize {
        /// Filesystem the volume belongs to.
        filesystem: String,
    },
    /// Raised when rebinding to a volume the provider does not report.
    #[error("volume {volume_id} not found")]
    VolumeNotFound {
        /// Requested volume identifier.
        volume_id: String,
    },
    /// Raised when rebinding to a volume attached to another instance.
    #[error("volume {volume_id} is attached to instance {instance_id}")]
    AttachedElsewhere {
        /// Requested volume identifier.
        volume_id: String,
        /// Instance currently holding the volume.
        instance_id: String,
    },
    /// Raised when the volume is attached but its local device is unknown.
    #[error("volume {volume_id} is attached but its device is unknown")]
    DeviceUnresolved {
        /// Volume identifier.
        volume_id: String,
    },
    /// Raised when the source snapshot cannot be found.
    #[error("snapshot {snapshot_id} not found")]
    SnapshotNotFound {
        /// Requested snapshot identifier.
        snapshot_id: String,
    },
    /// Wrapper for provider failures.
    #[error("provider error during {action}: {message}")]
    Provider {
        /// Operation that failed.
        action: &'static str,
        /// Message returned by the provider client.
        message: String,
    },
    /// Raised when the provider accepted a create call without returning a
    /// volume.
    #[error("provider returned no volume for {filesystem}")]
    NotCreated {
        /// Filesystem the volume was created for.
        filesystem: String,
    },
    /// Raised when an operation needs a bound volume.
    #[error("no volume bound for {filesystem}")]
    NotProvisioned {
        /// Filesystem the volume belongs to.
        filesystem: String,
    },
    /// Raised when the volume is missing or being deleted at attach time.
    #[error("volume {volume_id} cannot be attached in status {status}")]
    NotAttachable {
        /// Volume identifier, when bound.
        volume_id: String,
        /// Status observed.
        status: VolumeStatus,
    },
    /// Raised when the volume never became available before attaching.
    #[error("volume {volume_id} never became available (status {status})")]
    NeverAvailable {
        /// Volume identifier.
        volume_id: String,
        /// Last observed status.
        status: VolumeStatus,
    },
    /// Raised when the volume lives in another availability zone.
    #[error("volume {volume_id} is in zone {volume_zone}, instance is in {instance_zone}")]
    ZoneMismatch {
        /// Volume identifier.
        volume_id: String,
        /// Zone of the volume.
        volume_zone: String,
        /// Zone of the local instance.
        instance_zone: String,
    },
    /// Raised when several devices appeared during one attach.
    #[error("cannot tell which of {devices:?} belongs to volume {volume_id}")]
    AmbiguousDevices {
        /// Volume identifier.
        volume_id: String,
        /// Devices that appeared.
        devices: Vec<Utf8PathBuf>,
    },
    /// Raised when no attach name could be predicted.
    #[error("no candidate device names for volume {volume_id}")]
    NoCandidateDevices {
        /// Volume identifier.
        volume_id: String,
    },
    /// Raised when every candidate was tried without a device appearing.
    #[error("volume {volume_id} did not appear under any of {attempted:?}")]
    AttachExhausted {
        /// Volume identifier.
        volume_id: String,
        /// Device names requested, in order.
        attempted: Vec<String>,
    },
    /// Raised when a mount is requested before the volume is attached.
    #[error("volume {volume_id} not attached after {attempts} checks (status {status})")]
    MountNotReady {
        /// Volume identifier, or `-` when unbound.
        volume_id: String,
        /// Checks performed.
        attempts: u32,
        /// Last observed status.
        status: VolumeStatus,
    },
    /// Raised when `mkfs` fails.
    #[error("failed to format {device}: {message}")]
    FormatFailed {
        /// Device that could not be formatted.
        device: Utf8PathBuf,
        /// Command failure description.
        message: String,
    },
    /// Raised when mounting fails after formatting.
    #[error("failed to mount {device} at {mount_point}: {message}")]
    MountFailed {
        /// Device being mounted.
        device: Utf8PathBuf,
        /// Target mount point.
        mount_point: Utf8PathBuf,
        /// Command failure description.
        message: String,
    },
    /// Raised when a directory under the mount point cannot be prepared.
    #[error("cannot prepare {path}: {message}")]
    Prepare {
        /// Path being created or removed.
        path: Utf8PathBuf,
        /// I/O error text.
        message: String,
    },
}

impl VolumeError {
    pub(crate) fn provider(action: &'static str, err: &impl std::error::Error) -> Self {
        Self::Provider {
            action,
            message: err.to_string(),
        }
    }
}
