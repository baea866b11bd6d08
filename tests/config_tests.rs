//! Unit tests for configuration loading and validation.

use ballast::backend::CloudKind;
use ballast::config::{ClusterConfig, ConfigError, ScalewayConfig};
use ballast::test_support::EnvGuard;
use camino::Utf8Path;
use rstest::*;

#[fixture]
fn valid_config() -> ScalewayConfig {
    ScalewayConfig {
        access_key: Some(String::from("SCWACCESSKEYEXAMPLE")),
        secret_key: String::from("SCWSECRETKEYEXAMPLE"),
        default_organization_id: None,
        default_project_id: String::from("11111111-2222-3333-4444-555555555555"),
        default_zone: String::from("fr-par-1"),
        instance_id: String::from("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee"),
        instance_type: String::from("DEV1-S"),
        volume_type: String::from("b_ssd"),
    }
}

#[fixture]
fn cluster_config() -> ClusterConfig {
    ClusterConfig {
        cluster_name: String::from("analysis"),
        bucket_name: String::from("cm-analysis"),
        cloud: String::from("scaleway"),
        service_user: String::from("ballast"),
        export_user: String::from("nobody"),
        data_root: String::from("/mnt/data"),
        device_root: String::from("/dev"),
        scratch_dir: String::from("/tmp"),
        mkfs_bin: String::from("/sbin/mkfs.xfs"),
        mount_bin: String::from("/bin/mount"),
        umount_bin: String::from("/bin/umount"),
        grow_bin: String::from("/usr/sbin/xfs_growfs"),
        chown_bin: String::from("/bin/chown"),
        exportfs_bin: String::from("/usr/sbin/exportfs"),
        tar_bin: String::from("/bin/tar"),
        log_level: String::from("info"),
        log_json: false,
    }
}

fn assert_actionable(error: &ConfigError, env_var: &str, toml_key: &str) {
    let message = error.to_string();
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("ballast.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn scaleway_config_accepts_complete_values(valid_config: ScalewayConfig) {
    assert!(valid_config.validate().is_ok());
}

#[rstest]
fn config_validation_rejects_missing_secret_with_actionable_error(valid_config: ScalewayConfig) {
    let cfg = ScalewayConfig {
        secret_key: String::new(),
        ..valid_config
    };

    let error = cfg.validate().expect_err("secret is required");
    let ConfigError::MissingField(_) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert_actionable(&error, "SCW_SECRET_KEY", "secret_key");
}

#[rstest]
#[case::project(|cfg: &mut ScalewayConfig| cfg.default_project_id.clear(), "SCW_DEFAULT_PROJECT_ID", "default_project_id")]
#[case::zone(|cfg: &mut ScalewayConfig| cfg.default_zone.clear(), "SCW_DEFAULT_ZONE", "default_zone")]
#[case::instance(|cfg: &mut ScalewayConfig| cfg.instance_id.clear(), "SCW_INSTANCE_ID", "instance_id")]
#[case::volume_type(|cfg: &mut ScalewayConfig| cfg.volume_type = String::from("  "), "SCW_VOLUME_TYPE", "volume_type")]
fn scaleway_validation_is_actionable_for_every_field(
    valid_config: ScalewayConfig,
    #[case] mutate: fn(&mut ScalewayConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);
    let error = cfg.validate().expect_err("validation should fail");
    assert_actionable(&error, env_var, toml_key);
}

#[rstest]
fn cluster_config_accepts_complete_values(cluster_config: ClusterConfig) {
    assert!(cluster_config.validate().is_ok());
}

#[rstest]
#[case::cluster(|cfg: &mut ClusterConfig| cfg.cluster_name.clear(), "BALLAST_CLUSTER_NAME", "cluster_name")]
#[case::bucket(|cfg: &mut ClusterConfig| cfg.bucket_name.clear(), "BALLAST_BUCKET_NAME", "bucket_name")]
#[case::user(|cfg: &mut ClusterConfig| cfg.service_user.clear(), "BALLAST_SERVICE_USER", "service_user")]
fn cluster_validation_is_actionable(
    cluster_config: ClusterConfig,
    #[case] mutate: fn(&mut ClusterConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = cluster_config;
    mutate(&mut cfg);
    let error = cfg.validate().expect_err("validation should fail");
    assert_actionable(&error, env_var, toml_key);
}

#[rstest]
fn cluster_validation_rejects_relative_data_root(cluster_config: ClusterConfig) {
    let cfg = ClusterConfig {
        data_root: String::from("mnt/data"),
        ..cluster_config
    };
    let error = cfg.validate().expect_err("relative data root");
    assert!(matches!(error, ConfigError::Invalid(_)), "got {error:?}");
}

#[rstest]
#[case("scaleway", CloudKind::Scaleway)]
#[case("ec2", CloudKind::Ec2)]
#[case("openstack", CloudKind::OpenStack)]
#[case("something-else", CloudKind::Generic)]
fn cluster_cloud_selects_device_rules(
    cluster_config: ClusterConfig,
    #[case] cloud: &str,
    #[case] expected: CloudKind,
) {
    let cfg = ClusterConfig {
        cloud: cloud.to_owned(),
        ..cluster_config
    };
    assert_eq!(cfg.cloud_kind(), expected);
}

#[rstest]
fn volume_settings_carry_cluster_identity_and_tools(cluster_config: ClusterConfig) {
    let settings = cluster_config.volume_settings();
    assert_eq!(settings.cluster_name, "analysis");
    assert_eq!(settings.bucket_name, "cm-analysis");
    assert_eq!(settings.service_user, "ballast");
    assert_eq!(settings.export_user, "nobody");
    assert_eq!(settings.data_root, Utf8Path::new("/mnt/data"));
    assert_eq!(settings.tools.mkfs, "/sbin/mkfs.xfs");
    assert_eq!(settings.tools.grow, "/usr/sbin/xfs_growfs");
}

#[tokio::test]
async fn cluster_config_loads_from_environment_with_defaults() {
    let _guard = EnvGuard::set_vars(&[
        ("BALLAST_CLUSTER_NAME", "env-cluster"),
        ("BALLAST_BUCKET_NAME", "env-bucket"),
    ])
    .await;

    let cfg = ClusterConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("cluster config should load: {err}"));

    assert_eq!(cfg.cluster_name, "env-cluster");
    assert_eq!(cfg.bucket_name, "env-bucket");
    assert_eq!(cfg.data_root, "/mnt/data");
    assert_eq!(cfg.service_user, "ballast");
    assert_eq!(cfg.log_level, "info");
    assert!(!cfg.log_json);
    assert!(cfg.validate().is_ok());
}
