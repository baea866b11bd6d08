//! Command-line interface definitions for the `ballast` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `ballast` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ballast",
    about = "Provision, mount and retire cloud block volumes for cluster filesystems",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create or reuse a volume, attach it and mount it.
    #[command(name = "add", about = "Create or reuse a volume, attach it and mount it")]
    Add(AddCommand),
    /// Unmount a filesystem and detach (optionally delete) its volume.
    #[command(
        name = "remove",
        about = "Unmount a filesystem and detach (optionally delete) its volume"
    )]
    Remove(RemoveCommand),
    /// Snapshot an existing volume.
    #[command(name = "snapshot", about = "Snapshot an existing volume")]
    Snapshot(SnapshotCommand),
    /// Print the status of an existing volume as JSON.
    #[command(name = "status", about = "Print the status of an existing volume as JSON")]
    Status(StatusCommand),
}

/// The filesystem a volume backs.
#[derive(Debug, Args)]
pub(crate) struct FilesystemArgs {
    /// Filesystem name, used in tags and log lines.
    #[arg(long, value_name = "NAME")]
    pub(crate) filesystem: String,
    /// Where the filesystem is mounted.
    #[arg(long, value_name = "PATH")]
    pub(crate) mount_point: String,
    /// Service role served by the filesystem; repeat for several roles.
    ///
    /// One of `primary-data`, `tool-data`, `index-data`, `transient` or
    /// `generic`.
    #[arg(long = "role", value_name = "ROLE", default_value = "generic")]
    pub(crate) roles: Vec<String>,
}

/// Arguments for `ballast add`.
#[derive(Debug, Args)]
pub(crate) struct AddCommand {
    #[command(flatten)]
    pub(crate) target: FilesystemArgs,
    /// Reuse an existing volume instead of creating one.
    #[arg(long, value_name = "ID", conflicts_with_all = ["snapshot", "archive_url"])]
    pub(crate) volume_id: Option<String>,
    /// Size of a new volume in GiB.
    #[arg(long, value_name = "GIB")]
    pub(crate) size: Option<u64>,
    /// Restore the new volume from this snapshot.
    #[arg(long, value_name = "ID", conflicts_with = "archive_url")]
    pub(crate) snapshot: Option<String>,
    /// Populate the new volume from this gzipped tarball after mounting.
    #[arg(long, value_name = "URL", requires = "archive_md5")]
    pub(crate) archive_url: Option<String>,
    /// Expected MD5 digest of the archive.
    #[arg(long, value_name = "HEX", requires = "archive_url")]
    pub(crate) archive_md5: Option<String>,
    /// Path whose presence means the archive was already extracted.
    #[arg(long, value_name = "PATH", requires = "archive_url")]
    pub(crate) archive_marker: Option<String>,
}

/// Arguments for `ballast remove`.
#[derive(Debug, Args)]
pub(crate) struct RemoveCommand {
    #[command(flatten)]
    pub(crate) target: FilesystemArgs,
    /// Volume backing the filesystem.
    #[arg(long, value_name = "ID")]
    pub(crate) volume_id: String,
    /// Delete the volume after detaching it.
    #[arg(long)]
    pub(crate) delete: bool,
    /// Unmount only; leave the volume attached.
    #[arg(long, conflicts_with = "delete")]
    pub(crate) no_detach: bool,
}

/// Arguments for `ballast snapshot`.
#[derive(Debug, Args)]
pub(crate) struct SnapshotCommand {
    #[command(flatten)]
    pub(crate) target: FilesystemArgs,
    /// Volume to snapshot.
    #[arg(long, value_name = "ID")]
    pub(crate) volume_id: String,
    /// Snapshot description.
    #[arg(long, value_name = "TEXT")]
    pub(crate) description: Option<String>,
}

/// Arguments for `ballast status`.
#[derive(Debug, Args)]
pub(crate) struct StatusCommand {
    #[command(flatten)]
    pub(crate) target: FilesystemArgs,
    /// Volume to describe.
    #[arg(long, value_name = "ID")]
    pub(crate) volume_id: String,
}
