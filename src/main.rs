//! Binary entry point for the `ballast` CLI.

mod cli;

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use serde::Serialize;
use thiserror::Error;

use ballast::archive::{ArchiveDescriptor, HttpArchiveExtractor};
use ballast::backend::CloudVolumeClient;
use ballast::command::ProcessCommandRunner;
use ballast::config::{ClusterConfig, ScalewayConfig};
use ballast::device::{DevDirectory, DeviceDiscovery, DeviceNaming};
use ballast::filesystem::{Filesystem, LocalFilesystem, ServiceRole, ServiceState};
use ballast::scaleway::ScalewayVolumeClient;
use ballast::volume::{RemoveOptions, VolumeContext, VolumeResource, VolumeSpec};
use ballast::logging;

use cli::{AddCommand, Cli, FilesystemArgs, RemoveCommand, SnapshotCommand, StatusCommand};

type Resource = VolumeResource<ScalewayVolumeClient, ProcessCommandRunner>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("invalid argument: {0}")]
    Argument(String),
    #[error("volume error: {0}")]
    Volume(#[from] ballast::volume::VolumeError),
    #[error("archive error: {0}")]
    Archive(#[from] ballast::archive::ArchiveError),
    #[error("{0}")]
    Incomplete(String),
    #[error("cannot write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let cluster =
        ClusterConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    cluster
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    logging::init(&cluster.log_level, cluster.log_json)
        .map_err(|err| CliError::Config(err.to_string()))?;

    let scaleway =
        ScalewayConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let client = ScalewayVolumeClient::connect(scaleway)
        .await
        .map_err(|err| CliError::Backend(err.to_string()))?;
    let client = Arc::new(client);

    match cli {
        Cli::Add(command) => add(&cluster, client, &command).await,
        Cli::Remove(command) => remove(&cluster, client, command).await,
        Cli::Snapshot(command) => snapshot(&cluster, client, command).await,
        Cli::Status(command) => status(&cluster, client, command).await,
    }
}

fn parse_roles(raw: &[String]) -> Result<Vec<ServiceRole>, CliError> {
    raw.iter()
        .map(|tag| {
            ServiceRole::from_tag(tag)
                .ok_or_else(|| CliError::Argument(format!("unknown role {tag:?}")))
        })
        .collect()
}

fn add_spec(command: &AddCommand) -> Result<VolumeSpec, CliError> {
    if let Some(volume_id) = &command.volume_id {
        return Ok(resize(VolumeSpec::existing(volume_id.clone()), command.size));
    }
    if let Some(snapshot_id) = &command.snapshot {
        return Ok(resize(
            VolumeSpec::from_snapshot(snapshot_id.clone()),
            command.size,
        ));
    }
    if let (Some(url), Some(checksum)) = (&command.archive_url, &command.archive_md5) {
        let size = command
            .size
            .ok_or_else(|| CliError::Argument(String::from("--archive-url needs --size")))?;
        let archive = ArchiveDescriptor {
            url: url.clone(),
            checksum: checksum.clone(),
            marker: command.archive_marker.as_ref().map(Utf8PathBuf::from),
        };
        return Ok(VolumeSpec::from_archive(archive, size));
    }
    command.size.map(VolumeSpec::blank).ok_or_else(|| {
        CliError::Argument(String::from(
            "give --size, --snapshot, --archive-url or --volume-id",
        ))
    })
}

fn resize(spec: VolumeSpec, size: Option<u64>) -> VolumeSpec {
    VolumeSpec {
        size_gib: size.or(spec.size_gib),
        ..spec
    }
}

fn open_context(
    cluster: &ClusterConfig,
    client: Arc<ScalewayVolumeClient>,
    target: &FilesystemArgs,
    initial: ServiceState,
) -> Result<VolumeContext<ScalewayVolumeClient, ProcessCommandRunner>, CliError> {
    let roles = parse_roles(&target.roles)?;
    let filesystem = LocalFilesystem::new(
        target.filesystem.clone(),
        target.mount_point.clone(),
        roles,
        ProcessCommandRunner,
    )
    .with_exportfs(cluster.exportfs_bin.clone());
    filesystem.set_state(initial);
    let naming = DeviceNaming::for_instance(cluster.cloud_kind(), client.instance_type());
    let discovery = DeviceDiscovery::new(
        Arc::new(DevDirectory::new(cluster.device_root.clone())),
        naming,
    );
    let extractor = HttpArchiveExtractor::new(
        ProcessCommandRunner,
        cluster.tar_bin.clone(),
        cluster.scratch_dir.clone(),
    );
    Ok(VolumeContext {
        client,
        runner: ProcessCommandRunner,
        filesystem: Arc::new(filesystem),
        discovery,
        extractor: Arc::new(extractor),
        settings: cluster.volume_settings(),
    })
}

async fn add(
    cluster: &ClusterConfig,
    client: Arc<ScalewayVolumeClient>,
    command: &AddCommand,
) -> Result<(), CliError> {
    let spec = add_spec(command)?;
    let context = open_context(cluster, client, &command.target, ServiceState::Starting)?;
    let mut resource = Resource::open(context, spec).await;
    let outcome = resource.add().await?;
    if let Some(extraction) = outcome.extraction {
        extraction.wait().await?;
    }
    print_json(&resource.details().await)
}

async fn remove(
    cluster: &ClusterConfig,
    client: Arc<ScalewayVolumeClient>,
    command: RemoveCommand,
) -> Result<(), CliError> {
    let context = open_context(cluster, client, &command.target, ServiceState::ShuttingDown)?;
    let mut resource = Resource::open(context, VolumeSpec::existing(command.volume_id)).await;
    let options = RemoveOptions {
        delete_vols: command.delete,
        detach: !command.no_detach,
    };
    let mount_point = Utf8PathBuf::from(command.target.mount_point);
    let outcome = resource.remove(&mount_point, options).await;
    print_json(&RemoveReport {
        unmount: format!("{:?}", outcome.unmount),
        detached: outcome.detached,
        deleted: outcome.deleted,
    })?;
    if options.detach && !outcome.detached {
        return Err(CliError::Incomplete(String::from("volume was not detached")));
    }
    Ok(())
}

async fn snapshot(
    cluster: &ClusterConfig,
    client: Arc<ScalewayVolumeClient>,
    command: SnapshotCommand,
) -> Result<(), CliError> {
    let context = open_context(cluster, client, &command.target, ServiceState::Running)?;
    let mut resource = Resource::open(context, VolumeSpec::existing(command.volume_id)).await;
    let snapshot_id = resource
        .create_snapshot(command.description.as_deref())
        .await?;
    print_json(&SnapshotReport { snapshot_id })
}

async fn status(
    cluster: &ClusterConfig,
    client: Arc<ScalewayVolumeClient>,
    command: StatusCommand,
) -> Result<(), CliError> {
    let context = open_context(cluster, client, &command.target, ServiceState::Running)?;
    let mut resource = Resource::open(context, VolumeSpec::existing(command.volume_id)).await;
    print_json(&resource.details().await)
}

#[derive(Serialize)]
struct RemoveReport {
    unmount: String,
    detached: bool,
    deleted: bool,
}

#[derive(Serialize)]
struct SnapshotReport {
    snapshot_id: String,
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(io::stdout(), "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse_add(args: &[&str]) -> AddCommand {
        let mut argv = vec!["ballast", "add", "--filesystem", "data", "--mount-point", "/mnt/data"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv) {
            Ok(Cli::Add(command)) => command,
            other => panic!("expected add command, got {other:?}"),
        }
    }

    #[test]
    fn add_with_size_is_blank() {
        let spec = add_spec(&parse_add(&["--size", "20"])).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(spec, VolumeSpec::blank(20));
    }

    #[test]
    fn add_from_snapshot_keeps_size_override() {
        let spec = add_spec(&parse_add(&["--snapshot", "snap-1", "--size", "50"]))
            .unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(spec, VolumeSpec::from_snapshot("snap-1").with_size(50));
    }

    #[test]
    fn add_without_origin_is_rejected() {
        let err = add_spec(&parse_add(&[])).expect_err("no origin");
        assert!(matches!(err, CliError::Argument(_)));
    }

    #[test]
    fn archive_needs_size() {
        let err = add_spec(&parse_add(&["--archive-url", "https://x/a.tgz", "--archive-md5", "00"]))
            .expect_err("no size");
        assert!(err.to_string().contains("--size"));
    }

    #[rstest]
    #[case(&["primary-data", "tool-data"], true)]
    #[case(&["generic"], true)]
    #[case(&["galaxy"], false)]
    fn roles_parse(#[case] raw: &[&str], #[case] ok: bool) {
        let owned: Vec<String> = raw.iter().map(|tag| (*tag).to_owned()).collect();
        assert_eq!(parse_roles(&owned).is_ok(), ok);
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        write_error(&mut buf, &CliError::Incomplete(String::from("volume was not detached")));
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(rendered.contains("volume was not detached"), "rendered: {rendered}");
    }
}
