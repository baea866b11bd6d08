//! Wire types for the Scaleway Instances volume and snapshot endpoints and
//! their mapping onto provider-neutral records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backend::{AttachmentRecord, SnapshotInfo, SnapshotRecord, VolumeRecord};

/// Scaleway sizes volumes in decimal gigabytes.
pub(super) const BYTES_PER_GB: u64 = 1_000_000_000;

pub(super) const fn gb_to_bytes(size_gb: u64) -> u64 {
    size_gb.saturating_mul(BYTES_PER_GB)
}

pub(super) const fn bytes_to_gb(size_bytes: u64) -> u64 {
    size_bytes.div_euclid(BYTES_PER_GB)
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ServerRef {
    pub(super) id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ScalewayVolume {
    pub(super) id: String,
    pub(super) zone: String,
    #[serde(default)]
    pub(super) size: u64,
    pub(super) state: String,
    #[serde(default)]
    pub(super) server: Option<ServerRef>,
    #[serde(default)]
    pub(super) tags: Vec<String>,
}

#[derive(Deserialize)]
pub(super) struct VolumeEnvelope {
    pub(super) volume: ScalewayVolume,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct BaseVolume {
    pub(super) id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ScalewaySnapshot {
    pub(super) id: String,
    #[serde(default)]
    pub(super) name: String,
    pub(super) state: String,
    #[serde(default)]
    pub(super) size: u64,
    #[serde(default)]
    pub(super) base_volume: Option<BaseVolume>,
    #[serde(default)]
    pub(super) tags: Vec<String>,
}

#[derive(Deserialize)]
pub(super) struct SnapshotEnvelope {
    pub(super) snapshot: ScalewaySnapshot,
}

#[derive(Deserialize)]
pub(super) struct SnapshotList {
    pub(super) snapshots: Vec<ScalewaySnapshot>,
}

#[derive(Serialize)]
pub(super) struct CreateVolumeRequest<'a> {
    pub(super) name: String,
    pub(super) size: u64,
    pub(super) volume_type: &'a str,
    pub(super) project: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) base_snapshot: Option<&'a str>,
    pub(super) tags: Vec<String>,
}

#[derive(Serialize)]
pub(super) struct CreateSnapshotRequest<'a> {
    pub(super) name: &'a str,
    pub(super) volume_id: &'a str,
    pub(super) project: &'a str,
}

#[derive(Serialize)]
pub(super) struct UpdateTagsRequest {
    pub(super) tags: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ServerVolume {
    pub(super) id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct ScalewayServer {
    #[serde(default)]
    pub(super) volumes: BTreeMap<String, ServerVolume>,
}

#[derive(Deserialize)]
pub(super) struct ServerEnvelope {
    pub(super) server: ScalewayServer,
}

impl From<ScalewayVolume> for VolumeRecord {
    /// Scaleway keeps a volume `available` while a server holds it, so the
    /// attachment is inferred from the `server` reference.
    fn from(volume: ScalewayVolume) -> Self {
        let (status, attachment) = match (volume.state.as_str(), volume.server) {
            ("fetching", _) => (String::from("creating"), None),
            ("available", Some(server)) => (
                String::from("in-use"),
                Some(AttachmentRecord {
                    instance_id: server.id,
                    device: None,
                    state: String::from("attached"),
                }),
            ),
            (state, _) => (state.to_owned(), None),
        };
        Self {
            id: volume.id,
            size_gib: bytes_to_gb(volume.size),
            zone: volume.zone,
            status,
            snapshot_id: None,
            attachment,
        }
    }
}

impl From<ScalewaySnapshot> for SnapshotRecord {
    fn from(snapshot: ScalewaySnapshot) -> Self {
        let progress = if snapshot.state == "available" { 100 } else { 0 };
        Self {
            id: snapshot.id,
            volume_id: snapshot.base_volume.map(|base| base.id),
            progress,
            status: snapshot.state,
            description: snapshot.name,
            volume_size_gib: bytes_to_gb(snapshot.size),
        }
    }
}

impl From<&ScalewaySnapshot> for SnapshotInfo {
    fn from(snapshot: &ScalewaySnapshot) -> Self {
        Self {
            volume_size_gib: bytes_to_gb(snapshot.size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn volume(state: &str, server: Option<&str>) -> ScalewayVolume {
        ScalewayVolume {
            id: String::from("vol-1"),
            zone: String::from("fr-par-1"),
            size: 20_000_000_000,
            state: state.to_owned(),
            server: server.map(|id| ServerRef { id: id.to_owned() }),
            tags: Vec::new(),
        }
    }

    #[rstest]
    #[case("available", None, "available", None)]
    #[case("available", Some("srv-1"), "in-use", Some("srv-1"))]
    #[case("fetching", None, "creating", None)]
    #[case("snapshotting", Some("srv-1"), "snapshotting", None)]
    fn volume_state_maps_to_record(
        #[case] state: &str,
        #[case] server: Option<&str>,
        #[case] expected_status: &str,
        #[case] expected_instance: Option<&str>,
    ) {
        let record = VolumeRecord::from(volume(state, server));
        assert_eq!(record.status, expected_status);
        assert_eq!(
            record.attachment.as_ref().map(|att| att.instance_id.as_str()),
            expected_instance
        );
        assert_eq!(record.size_gib, 20);
    }

    #[test]
    fn snapshot_decodes_and_maps() {
        let body = r#"{"snapshot":{"id":"snap-1","name":"nightly","state":"available",
            "size":10000000000,"base_volume":{"id":"vol-1","name":"data"},"tags":[]}}"#;
        let envelope: SnapshotEnvelope =
            serde_json::from_str(body).unwrap_or_else(|err| panic!("decode: {err}"));
        let record = SnapshotRecord::from(envelope.snapshot);
        assert_eq!(record.volume_id.as_deref(), Some("vol-1"));
        assert_eq!(record.progress, 100);
        assert_eq!(record.volume_size_gib, 10);
        assert_eq!(record.description, "nightly");
    }

    #[test]
    fn create_request_omits_missing_snapshot() {
        let request = CreateVolumeRequest {
            name: String::from("ballast-x"),
            size: gb_to_bytes(5),
            volume_type: "b_ssd",
            project: "proj",
            base_snapshot: None,
            tags: vec![String::from("ballast")],
        };
        let json = serde_json::to_string(&request).unwrap_or_else(|err| panic!("encode: {err}"));
        assert!(!json.contains("base_snapshot"));
        assert!(json.contains(r#""size":5000000000"#));
    }
}
