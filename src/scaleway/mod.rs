//! Scaleway implementation of [`CloudVolumeClient`].
//!
//! Volume and snapshot calls go straight to the Instances HTTP API because
//! `scaleway-rs` does not cover block volumes; the SDK is used to look up the
//! local server.

mod error;
mod types;
mod volume;

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use scaleway_rs::ScalewayApi;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{
    BackendFuture, CloudKind, CloudVolumeClient, SnapshotInfo, SnapshotRecord, TagTarget,
    VolumeRecord,
};
use crate::config::ScalewayConfig;
use types::{
    CreateSnapshotRequest, CreateVolumeRequest, ScalewaySnapshot, ServerEnvelope,
    SnapshotEnvelope, SnapshotList, UpdateTagsRequest, VolumeEnvelope, gb_to_bytes,
};
use volume::{UpdateInstanceVolumesRequest, with_volume, without_volume};

pub use error::ScalewayBackendError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";
const SNAPSHOT_PAGE_SIZE: usize = 100;

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Block-storage client for the Scaleway instance the process runs on.
#[derive(Clone)]
pub struct ScalewayVolumeClient {
    api: ScalewayApi,
    config: ScalewayConfig,
    api_base: String,
}

impl std::fmt::Debug for ScalewayVolumeClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ScalewayVolumeClient")
            .field("zone", &self.config.default_zone)
            .field("instance_id", &self.config.instance_id)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl ScalewayVolumeClient {
    /// Constructs a client from configuration without contacting the API.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError::Config`] when the provided configuration
    /// fails validation.
    pub fn new(config: ScalewayConfig) -> Result<Self, ScalewayBackendError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            config,
            api_base: String::from(SCALEWAY_INSTANCE_API_BASE),
        })
    }

    /// Constructs a client and checks that the configured instance exists.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError::Config`] for invalid configuration,
    /// [`ScalewayBackendError::InstanceNotFound`] when the instance is not
    /// visible, and [`ScalewayBackendError::Provider`] for SDK failures.
    pub async fn connect(config: ScalewayConfig) -> Result<Self, ScalewayBackendError> {
        let client = Self::new(config)?;
        let servers = client
            .api
            .list_instances(&client.config.default_zone)
            .servers(&client.config.instance_id)
            .per_page(1)
            .run_async()
            .await?;
        let Some(server) = servers.first() else {
            return Err(ScalewayBackendError::InstanceNotFound {
                instance_id: client.config.instance_id.clone(),
                zone: client.config.default_zone.clone(),
            });
        };
        debug!(instance_id = %server.id, state = %server.state, "found local instance");
        Ok(client)
    }

    /// Points the client at another API endpoint.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!(
            "{}/zones/{}/{path}",
            self.api_base, self.config.default_zone
        );
        HTTP_CLIENT
            .request(method, url)
            .header("X-Auth-Token", &self.config.secret_key)
            .timeout(HTTP_TIMEOUT)
    }

    async fn send(
        request: RequestBuilder,
    ) -> Result<(StatusCode, Vec<u8>), ScalewayBackendError> {
        let response = request
            .send()
            .await
            .map_err(|err| ScalewayBackendError::provider(&err))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ScalewayBackendError::provider(&err))?;
        Ok((status, body.to_vec()))
    }

    fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ScalewayBackendError> {
        serde_json::from_slice(body).map_err(|err| ScalewayBackendError::provider(&err))
    }

    fn http_error(action: &'static str, status: StatusCode, body: &[u8]) -> ScalewayBackendError {
        ScalewayBackendError::Http {
            action,
            status: status.as_u16(),
            message: String::from_utf8_lossy(body).into_owned(),
        }
    }

    /// Fetches one resource, mapping 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(
        &self,
        action: &'static str,
        path: &str,
    ) -> Result<Option<T>, ScalewayBackendError> {
        let (status, body) = Self::send(self.request(Method::GET, path)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::http_error(action, status, &body));
        }
        Self::decode(&body).map(Some)
    }

    async fn describe_volume(
        &self,
        volume_id: &str,
    ) -> Result<Option<types::ScalewayVolume>, ScalewayBackendError> {
        Ok(self
            .get_optional::<VolumeEnvelope>("describe volume", &format!("volumes/{volume_id}"))
            .await?
            .map(|envelope| envelope.volume))
    }

    async fn describe_snapshot(
        &self,
        snapshot_id: &str,
    ) -> Result<Option<ScalewaySnapshot>, ScalewayBackendError> {
        Ok(self
            .get_optional::<SnapshotEnvelope>(
                "describe snapshot",
                &format!("snapshots/{snapshot_id}"),
            )
            .await?
            .map(|envelope| envelope.snapshot))
    }

    async fn server_volumes(
        &self,
        server_id: &str,
    ) -> Result<BTreeMap<String, String>, ScalewayBackendError> {
        let envelope = self
            .get_optional::<ServerEnvelope>("describe server", &format!("servers/{server_id}"))
            .await?
            .ok_or_else(|| ScalewayBackendError::InstanceNotFound {
                instance_id: server_id.to_owned(),
                zone: self.config.default_zone.clone(),
            })?;
        Ok(envelope
            .server
            .volumes
            .into_iter()
            .map(|(index, entry)| (index, entry.id))
            .collect())
    }

    async fn patch_server_volumes(
        &self,
        server_id: &str,
        request: &UpdateInstanceVolumesRequest,
    ) -> Result<(), String> {
        let builder = self
            .request(Method::PATCH, &format!("servers/{server_id}"))
            .json(request);
        match Self::send(builder).await {
            Ok((status, _)) if status.is_success() => Ok(()),
            Ok((_, body)) => Err(String::from_utf8_lossy(&body).into_owned()),
            Err(err) => Err(err.to_string()),
        }
    }

    async fn replace_tags(
        &self,
        path: &str,
        tags: Vec<String>,
    ) -> Result<(), ScalewayBackendError> {
        let builder = self
            .request(Method::PATCH, path)
            .json(&UpdateTagsRequest { tags });
        let (status, body) = Self::send(builder).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::http_error("update tags", status, &body))
        }
    }
}

impl CloudVolumeClient for ScalewayVolumeClient {
    type Error = ScalewayBackendError;

    fn create_volume<'a>(
        &'a self,
        size_gib: u64,
        zone: &'a str,
        snapshot_id: Option<&'a str>,
    ) -> BackendFuture<'a, Option<VolumeRecord>, Self::Error> {
        Box::pin(async move {
            let name = format!("ballast-{}", Uuid::new_v4().simple());
            let payload = CreateVolumeRequest {
                name: name.clone(),
                size: gb_to_bytes(size_gib),
                volume_type: &self.config.volume_type,
                project: &self.config.default_project_id,
                base_snapshot: snapshot_id,
                tags: vec![String::from("ballast")],
            };
            let builder = self.request(Method::POST, "volumes").json(&payload);
            let (status, body) = Self::send(builder).await?;
            if !status.is_success() {
                return Err(ScalewayBackendError::VolumeCreateFailed {
                    name,
                    zone: zone.to_owned(),
                    message: String::from_utf8_lossy(&body).into_owned(),
                });
            }
            let envelope: VolumeEnvelope = Self::decode(&body)?;
            let mut record = VolumeRecord::from(envelope.volume);
            record.snapshot_id = snapshot_id.map(str::to_owned);
            Ok(Some(record))
        })
    }

    fn get_all_volumes<'a>(
        &'a self,
        ids: &'a [String],
    ) -> BackendFuture<'a, Vec<VolumeRecord>, Self::Error> {
        Box::pin(async move {
            let mut records = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(volume) = self.describe_volume(id).await? {
                    records.push(VolumeRecord::from(volume));
                }
            }
            Ok(records)
        })
    }

    fn get_snapshot<'a>(
        &'a self,
        id: &'a str,
    ) -> BackendFuture<'a, Option<SnapshotRecord>, Self::Error> {
        Box::pin(async move { Ok(self.describe_snapshot(id).await?.map(SnapshotRecord::from)) })
    }

    fn get_snapshot_info<'a>(
        &'a self,
        id: &'a str,
    ) -> BackendFuture<'a, SnapshotInfo, Self::Error> {
        Box::pin(async move {
            let snapshot = self.describe_snapshot(id).await?.ok_or_else(|| {
                ScalewayBackendError::Http {
                    action: "describe snapshot",
                    status: StatusCode::NOT_FOUND.as_u16(),
                    message: format!("snapshot {id} not found"),
                }
            })?;
            Ok(SnapshotInfo::from(&snapshot))
        })
    }

    fn get_all_snapshots(&self) -> BackendFuture<'_, Vec<SnapshotRecord>, Self::Error> {
        Box::pin(async move {
            let mut snapshots = Vec::new();
            let mut page: u32 = 1;
            loop {
                let path = format!(
                    "snapshots?project={}&per_page={SNAPSHOT_PAGE_SIZE}&page={page}",
                    self.config.default_project_id
                );
                let (status, body) = Self::send(self.request(Method::GET, &path)).await?;
                if !status.is_success() {
                    return Err(Self::http_error("list snapshots", status, &body));
                }
                let list: SnapshotList = Self::decode(&body)?;
                let last_page = list.snapshots.len() < SNAPSHOT_PAGE_SIZE;
                snapshots.extend(list.snapshots.into_iter().map(SnapshotRecord::from));
                if last_page {
                    debug!(pages = page, count = snapshots.len(), "listed snapshots");
                    return Ok(snapshots);
                }
                page = page.saturating_add(1);
            }
        })
    }

    fn delete_volume<'a>(&'a self, id: &'a str) -> BackendFuture<'a, bool, Self::Error> {
        Box::pin(async move {
            let (status, body) =
                Self::send(self.request(Method::DELETE, &format!("volumes/{id}"))).await?;
            if status.is_success() {
                return Ok(true);
            }
            debug!(volume_id = id, status = status.as_u16(), body = %String::from_utf8_lossy(&body), "delete refused");
            Ok(false)
        })
    }

    fn add_tag<'a>(
        &'a self,
        target: TagTarget<'a>,
        key: &'a str,
        value: &'a str,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let tag = format!("{key}={value}");
            let (path, current) = match target {
                TagTarget::Volume(id) => (
                    format!("volumes/{id}"),
                    self.describe_volume(id).await?.map(|volume| volume.tags),
                ),
                TagTarget::Snapshot(id) => (
                    format!("snapshots/{id}"),
                    self.describe_snapshot(id).await?.map(|snapshot| snapshot.tags),
                ),
            };
            let mut tags = current.unwrap_or_default();
            let prefix = format!("{key}=");
            tags.retain(|existing| !existing.starts_with(&prefix));
            tags.push(tag);
            self.replace_tags(&path, tags).await
        })
    }

    fn attach<'a>(
        &'a self,
        volume: &'a VolumeRecord,
        instance_id: &'a str,
        device: &'a str,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            if volume.zone != self.config.default_zone {
                return Err(ScalewayBackendError::ZoneMismatch {
                    volume_id: volume.id.clone(),
                    volume_zone: volume.zone.clone(),
                    instance_zone: self.config.default_zone.clone(),
                });
            }
            // The requested device name cannot be passed to Scaleway; the
            // kernel picks the next free virtio name.
            debug!(volume_id = %volume.id, instance_id, device, "attaching through server volume map");
            let current = self.server_volumes(instance_id).await?;
            let request = with_volume(&current, &volume.id);
            self.patch_server_volumes(instance_id, &request)
                .await
                .map_err(|message| ScalewayBackendError::VolumeAttachmentFailed {
                    volume_id: volume.id.clone(),
                    instance_id: instance_id.to_owned(),
                    message,
                })
        })
    }

    fn detach<'a>(&'a self, volume: &'a VolumeRecord) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let Some(attachment) = volume.attachment.as_ref() else {
                debug!(volume_id = %volume.id, "volume reports no server; nothing to detach");
                return Ok(());
            };
            let server_id = attachment.instance_id.as_str();
            let current = self.server_volumes(server_id).await?;
            let request = without_volume(&current, &volume.id);
            self.patch_server_volumes(server_id, &request)
                .await
                .map_err(|message| ScalewayBackendError::VolumeDetachFailed {
                    volume_id: volume.id.clone(),
                    instance_id: server_id.to_owned(),
                    message,
                })
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        volume: &'a VolumeRecord,
        description: &'a str,
    ) -> BackendFuture<'a, SnapshotRecord, Self::Error> {
        Box::pin(async move {
            let payload = CreateSnapshotRequest {
                name: description,
                volume_id: &volume.id,
                project: &self.config.default_project_id,
            };
            let builder = self.request(Method::POST, "snapshots").json(&payload);
            let (status, body) = Self::send(builder).await?;
            if !status.is_success() {
                return Err(Self::http_error("create snapshot", status, &body));
            }
            let envelope: SnapshotEnvelope = Self::decode(&body)?;
            let mut record = SnapshotRecord::from(envelope.snapshot);
            if record.volume_id.is_none() {
                record.volume_id = Some(volume.id.clone());
            }
            Ok(record)
        })
    }

    fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    fn zone(&self) -> &str {
        &self.config.default_zone
    }

    fn instance_type(&self) -> &str {
        &self.config.instance_type
    }

    fn cloud_kind(&self) -> CloudKind {
        CloudKind::Scaleway
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ScalewayConfig {
        ScalewayConfig {
            access_key: None,
            secret_key: String::from("secret"),
            default_organization_id: None,
            default_project_id: String::from("project"),
            default_zone: String::from("fr-par-1"),
            instance_id: String::from("srv-1"),
            instance_type: String::from("DEV1-S"),
            volume_type: String::from("b_ssd"),
        }
    }

    #[test]
    fn new_rejects_incomplete_config() {
        let mut incomplete = config();
        incomplete.secret_key.clear();
        let err = ScalewayVolumeClient::new(incomplete).expect_err("missing key must fail");
        assert!(matches!(err, ScalewayBackendError::Config(ref msg) if msg.contains("SCW_SECRET_KEY")));
    }

    /// Serves one canned JSON body per connection and records request lines.
    fn serve_pages(bodies: Vec<String>) -> (String, std::thread::JoinHandle<Vec<String>>) {
        use std::io::{BufRead, BufReader, Write};
        use std::net::TcpListener;

        let listener =
            TcpListener::bind("127.0.0.1:0").unwrap_or_else(|err| panic!("bind: {err}"));
        let addr = listener
            .local_addr()
            .unwrap_or_else(|err| panic!("local addr: {err}"));
        let handle = std::thread::spawn(move || {
            let mut requests = Vec::new();
            for body in bodies {
                let (mut stream, _) = listener
                    .accept()
                    .unwrap_or_else(|err| panic!("accept: {err}"));
                let mut reader = BufReader::new(
                    stream
                        .try_clone()
                        .unwrap_or_else(|err| panic!("clone: {err}")),
                );
                let mut line = String::new();
                reader
                    .read_line(&mut line)
                    .unwrap_or_else(|err| panic!("read: {err}"));
                requests.push(line.trim_end().to_owned());
                loop {
                    let mut header = String::new();
                    reader
                        .read_line(&mut header)
                        .unwrap_or_else(|err| panic!("read: {err}"));
                    if header == "\r\n" || header.is_empty() {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream
                    .write_all(response.as_bytes())
                    .unwrap_or_else(|err| panic!("write: {err}"));
            }
            requests
        });
        (format!("http://{addr}"), handle)
    }

    fn snapshot_page(first: usize, count: usize) -> String {
        let snapshots: Vec<serde_json::Value> = (first..first + count)
            .map(|index| {
                serde_json::json!({
                    "id": format!("snap-{index}"),
                    "state": "available",
                    "size": 10_000_000_000_u64,
                    "base_volume": { "id": "vol-a" },
                })
            })
            .collect();
        serde_json::json!({ "snapshots": snapshots }).to_string()
    }

    #[tokio::test]
    async fn snapshot_listing_follows_every_page() {
        let (base, server) = serve_pages(vec![
            snapshot_page(0, SNAPSHOT_PAGE_SIZE),
            snapshot_page(SNAPSHOT_PAGE_SIZE, 3),
        ]);
        let client = ScalewayVolumeClient::new(config())
            .unwrap_or_else(|err| panic!("client: {err}"))
            .with_api_base(base);

        let snapshots = client
            .get_all_snapshots()
            .await
            .unwrap_or_else(|err| panic!("list: {err}"));
        let requests = server.join().unwrap_or_else(|_| panic!("server thread panicked"));

        assert_eq!(snapshots.len(), SNAPSHOT_PAGE_SIZE + 3);
        assert_eq!(
            snapshots.last().map(|snapshot| snapshot.id.as_str()),
            Some("snap-102")
        );
        assert_eq!(requests.len(), 2);
        assert!(requests.first().is_some_and(|line| line.contains("&page=1 ")), "{requests:?}");
        assert!(requests.get(1).is_some_and(|line| line.contains("&page=2 ")), "{requests:?}");
    }

    #[tokio::test]
    async fn attach_rejects_volume_from_other_zone() {
        let client = ScalewayVolumeClient::new(config())
            .unwrap_or_else(|err| panic!("client: {err}"))
            .with_api_base("http://127.0.0.1:9");
        let volume = VolumeRecord {
            id: String::from("vol-1"),
            size_gib: 10,
            zone: String::from("nl-ams-1"),
            status: String::from("available"),
            snapshot_id: None,
            attachment: None,
        };
        let err = client
            .attach(&volume, "srv-1", "/dev/vdb")
            .await
            .expect_err("zone mismatch");
        assert!(crate::backend::ProviderFailure::is_zone_mismatch(&err));
    }

    #[test]
    fn reports_scaleway_identity() {
        let client = ScalewayVolumeClient::new(config()).unwrap_or_else(|err| panic!("client: {err}"));
        assert_eq!(client.cloud_kind(), CloudKind::Scaleway);
        assert_eq!(client.zone(), "fr-par-1");
        assert_eq!(client.instance_id(), "srv-1");
    }
}
