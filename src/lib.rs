//! Core library for the Ballast volume manager.
//!
//! The crate manages the lifecycle of cloud block-storage volumes that back
//! cluster filesystems: create (blank, from a snapshot or from an archive),
//! attach and discover the local device, format and mount, grow, share over
//! NFS, snapshot, unmount, detach and delete. Provider access sits behind
//! [`backend::CloudVolumeClient`], with a Scaleway implementation in
//! [`scaleway`].

pub mod archive;
pub mod backend;
pub mod command;
pub mod config;
pub mod device;
pub mod filesystem;
pub(crate) mod hostfs;
pub mod logging;
pub mod scaleway;
pub mod test_support;
pub mod volume;

pub use archive::{ArchiveDescriptor, ArchiveError, ArchiveExtractor, HttpArchiveExtractor};
pub use backend::{CloudKind, CloudVolumeClient, SnapshotRecord, VolumeRecord};
pub use command::{CommandRunner, ProcessCommandRunner};
pub use config::{ClusterConfig, ConfigError, ScalewayConfig};
pub use device::{DevDirectory, DeviceDiscovery, DeviceNaming};
pub use filesystem::{Filesystem, LocalFilesystem, ServiceRole, ServiceState};
pub use scaleway::{ScalewayBackendError, ScalewayVolumeClient};
pub use volume::{
    RemoveOptions, VolumeContext, VolumeError, VolumeResource, VolumeSpec, VolumeStatus,
};
