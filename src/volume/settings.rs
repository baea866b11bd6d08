//! Cluster identity, host tools and timing knobs used by the lifecycle.

use std::time::Duration;

use camino::Utf8PathBuf;

/// Host programs invoked while mounting and unmounting.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ToolPaths {
    /// Filesystem creation program (`mkfs.xfs`).
    pub mkfs: String,
    /// Mount program.
    pub mount: String,
    /// Unmount program.
    pub umount: String,
    /// Online grow program (`xfs_growfs`).
    pub grow: String,
    /// Ownership change program.
    pub chown: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            mkfs: String::from("/sbin/mkfs.xfs"),
            mount: String::from("/bin/mount"),
            umount: String::from("/bin/umount"),
            grow: String::from("/usr/sbin/xfs_growfs"),
            chown: String::from("/bin/chown"),
        }
    }
}

/// Static settings shared by every volume of a cluster node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeSettings {
    /// Cluster name, used for the `Name` tag.
    pub cluster_name: String,
    /// Bucket holding the cluster's persistent state, used for the
    /// `bucketName` tag.
    pub bucket_name: String,
    /// Account owning mounted filesystems.
    pub service_user: String,
    /// Account owning the shared `export` directory.
    pub export_user: String,
    /// Root of the primary data filesystem; holds the service
    /// subdirectories.
    pub data_root: Utf8PathBuf,
    /// Host programs.
    pub tools: ToolPaths,
}

impl VolumeSettings {
    /// Path of the upload staging directory under the data root.
    #[must_use]
    pub fn upload_store(&self) -> Utf8PathBuf {
        self.data_root.join(UPLOAD_STORE)
    }
}

/// Name of the upload staging directory.
pub(crate) const UPLOAD_STORE: &str = "upload_store";

/// Poll intervals, budgets and settle delays.
///
/// Defaults match provider behaviour seen in production; tests shrink them
/// or run under a paused clock.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LifecycleTimings {
    /// Minimum age of a cached status before the provider is asked again.
    pub status_ttl: Duration,
    /// Poll interval for unbounded waits.
    pub unbounded_poll: Duration,
    /// Bounded wait for AVAILABLE before attaching a volume that is not
    /// being restored from a snapshot.
    pub available_timeout: Duration,
    /// Bounded wait for ATTACHED after each attach request.
    pub attach_timeout: Duration,
    /// Delay after ATTACHED before the device set is compared.
    pub device_settle: Duration,
    /// Wait for AVAILABLE after a speculative detach.
    pub speculative_detach_timeout: Duration,
    /// Wait for AVAILABLE after the first detach request.
    pub detach_timeout: Duration,
    /// Wait for AVAILABLE after the retried detach request.
    pub detach_retry_timeout: Duration,
    /// Number of readiness checks before a mount gives up.
    pub mount_attempts: u32,
    /// Delay between mount readiness checks.
    pub mount_interval: Duration,
    /// Number of checks for the device node to appear.
    pub device_node_attempts: u32,
    /// Delay between device node checks.
    pub device_node_interval: Duration,
    /// Number of unmount attempts.
    pub unmount_attempts: u32,
    /// Delay between unmount attempts.
    pub unmount_interval: Duration,
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        Self {
            status_ttl: Duration::from_secs(2),
            unbounded_poll: Duration::from_secs(5),
            available_timeout: Duration::from_secs(300),
            attach_timeout: Duration::from_secs(300),
            device_settle: Duration::from_secs(10),
            speculative_detach_timeout: Duration::from_secs(60),
            detach_timeout: Duration::from_secs(240),
            detach_retry_timeout: Duration::from_secs(60),
            mount_attempts: 30,
            mount_interval: Duration::from_secs(2),
            device_node_attempts: 10,
            device_node_interval: Duration::from_secs(4),
            unmount_attempts: 10,
            unmount_interval: Duration::from_secs(3),
        }
    }
}
