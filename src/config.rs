//! Configuration loading via `ortho-config`.
//!
//! [`ScalewayConfig`] carries provider credentials and the identity of the
//! local instance; [`ClusterConfig`] carries everything the volume lifecycle
//! needs about the cluster and the host.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::backend::CloudKind;
use crate::volume::{ToolPaths, VolumeSettings};

/// Configuration file consulted for both structs.
pub const CONFIG_FILE_NAME: &str = "ballast.toml";

/// Scaleway specific configuration derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SCW",
    discovery(
        app_name = "ballast",
        env_var = "BALLAST_CONFIG_PATH",
        config_file_name = "ballast.toml",
        dotfile_name = ".ballast.toml",
        project_file_name = "ballast.toml"
    )
)]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application. Not needed for API
    /// calls; kept so it can be logged alongside requests.
    pub access_key: Option<String>,
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project that owns created volumes and snapshots.
    pub default_project_id: String,
    /// Availability zone of the local instance. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Server identifier of the local instance.
    pub instance_id: String,
    /// Commercial type of the local instance.
    #[ortho_config(default = "DEV1-S".to_owned())]
    pub instance_type: String,
    /// Volume type for new volumes.
    #[ortho_config(default = "b_ssd".to_owned())]
    pub volume_type: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    fn require(&self, value: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [{}] in {CONFIG_FILE_NAME}",
                self.description, self.env_var, self.toml_key, self.section
            )));
        }
        Ok(())
    }
}

fn program_args() -> [OsString; 1] {
    [OsString::from("ballast")]
}

impl ScalewayConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(program_args()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new(
            "Scaleway API secret key",
            "SCW_SECRET_KEY",
            "secret_key",
            "scaleway",
        )
        .require(&self.secret_key)?;
        FieldMetadata::new(
            "Scaleway project ID",
            "SCW_DEFAULT_PROJECT_ID",
            "default_project_id",
            "scaleway",
        )
        .require(&self.default_project_id)?;
        FieldMetadata::new(
            "availability zone",
            "SCW_DEFAULT_ZONE",
            "default_zone",
            "scaleway",
        )
        .require(&self.default_zone)?;
        FieldMetadata::new(
            "local instance ID",
            "SCW_INSTANCE_ID",
            "instance_id",
            "scaleway",
        )
        .require(&self.instance_id)?;
        FieldMetadata::new(
            "volume type",
            "SCW_VOLUME_TYPE",
            "volume_type",
            "scaleway",
        )
        .require(&self.volume_type)?;
        Ok(())
    }
}

/// Cluster identity, host accounts, tool binaries and logging preferences.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BALLAST",
    discovery(
        app_name = "ballast",
        env_var = "BALLAST_CONFIG_PATH",
        config_file_name = "ballast.toml",
        dotfile_name = ".ballast.toml",
        project_file_name = "ballast.toml"
    )
)]
pub struct ClusterConfig {
    /// Cluster name, written to the `Name` tag of every volume.
    pub cluster_name: String,
    /// Bucket holding the cluster's persistent state.
    pub bucket_name: String,
    /// Cloud family; selects device naming rules.
    #[ortho_config(default = "scaleway".to_owned())]
    pub cloud: String,
    /// Account owning mounted filesystems.
    #[ortho_config(default = "ballast".to_owned())]
    pub service_user: String,
    /// Account owning the shared `export` directory.
    #[ortho_config(default = "nobody".to_owned())]
    pub export_user: String,
    /// Root of the primary data filesystem.
    #[ortho_config(default = "/mnt/data".to_owned())]
    pub data_root: String,
    /// Directory holding block device nodes.
    #[ortho_config(default = "/dev".to_owned())]
    pub device_root: String,
    /// Directory used to stage archive downloads.
    #[ortho_config(default = "/tmp".to_owned())]
    pub scratch_dir: String,
    /// Filesystem creation program.
    #[ortho_config(default = "/sbin/mkfs.xfs".to_owned())]
    pub mkfs_bin: String,
    /// Mount program.
    #[ortho_config(default = "/bin/mount".to_owned())]
    pub mount_bin: String,
    /// Unmount program.
    #[ortho_config(default = "/bin/umount".to_owned())]
    pub umount_bin: String,
    /// Online grow program.
    #[ortho_config(default = "/usr/sbin/xfs_growfs".to_owned())]
    pub grow_bin: String,
    /// Ownership change program.
    #[ortho_config(default = "/bin/chown".to_owned())]
    pub chown_bin: String,
    /// NFS export program.
    #[ortho_config(default = "/usr/sbin/exportfs".to_owned())]
    pub exportfs_bin: String,
    /// Archive unpacking program.
    #[ortho_config(default = "/bin/tar".to_owned())]
    pub tar_bin: String,
    /// Default log filter when `RUST_LOG` is unset.
    #[ortho_config(default = "info".to_owned())]
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones.
    #[ortho_config(default = false)]
    pub log_json: bool,
}

impl ClusterConfig {
    /// Loads configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(program_args()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for empty required fields and
    /// [`ConfigError::Invalid`] when the data root is relative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new("cluster name", "BALLAST_CLUSTER_NAME", "cluster_name", "ballast")
            .require(&self.cluster_name)?;
        FieldMetadata::new("bucket name", "BALLAST_BUCKET_NAME", "bucket_name", "ballast")
            .require(&self.bucket_name)?;
        FieldMetadata::new("service account", "BALLAST_SERVICE_USER", "service_user", "ballast")
            .require(&self.service_user)?;
        if !self.data_root.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "data_root must be an absolute path, got {:?}",
                self.data_root
            )));
        }
        Ok(())
    }

    /// Cloud family named by [`ClusterConfig::cloud`].
    #[must_use]
    pub fn cloud_kind(&self) -> CloudKind {
        CloudKind::from_config(&self.cloud)
    }

    /// Settings shared by every volume resource on this node.
    #[must_use]
    pub fn volume_settings(&self) -> VolumeSettings {
        VolumeSettings {
            cluster_name: self.cluster_name.clone(),
            bucket_name: self.bucket_name.clone(),
            service_user: self.service_user.clone(),
            export_user: self.export_user.clone(),
            data_root: Utf8PathBuf::from(&self.data_root),
            tools: ToolPaths {
                mkfs: self.mkfs_bin.clone(),
                mount: self.mount_bin.clone(),
                umount: self.umount_bin.clone(),
                grow: self.grow_bin.clone(),
                chown: self.chown_bin.clone(),
            },
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
