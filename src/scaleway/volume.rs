//! Server volume map payloads used to attach and detach volumes.
//!
//! The Instances API has no per-volume attach call for this volume type; the
//! server's whole volume map is replaced with a `PATCH /servers/{id}`.

use std::collections::BTreeMap;

use serde::Serialize;

/// Volume reference for attachment in the Scaleway API.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct VolumeAttachment {
    /// Volume identifier (UUID).
    pub id: String,
    /// Whether this volume should be used for booting.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub boot: bool,
}

/// Request body for `PATCH /servers/{id}`.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct UpdateInstanceVolumesRequest {
    /// Volume map keyed by index ("0" for root, "1" for first additional, etc.).
    pub volumes: BTreeMap<String, VolumeAttachment>,
}

fn attachment(index: &str, id: String) -> VolumeAttachment {
    VolumeAttachment {
        id,
        boot: index == "0",
    }
}

/// Adds `volume_id` at the first free index, keeping existing entries.
pub(crate) fn with_volume(
    current: &BTreeMap<String, String>,
    volume_id: &str,
) -> UpdateInstanceVolumesRequest {
    let mut volumes: BTreeMap<String, VolumeAttachment> = current
        .iter()
        .map(|(index, id)| (index.clone(), attachment(index, id.clone())))
        .collect();
    if !current.values().any(|id| id == volume_id) {
        let free = (1_usize..)
            .map(|slot| slot.to_string())
            .find(|slot| !volumes.contains_key(slot))
            .unwrap_or_default();
        volumes.insert(free, attachment("", volume_id.to_owned()));
    }
    UpdateInstanceVolumesRequest { volumes }
}

/// Removes `volume_id`, keeping every other entry at its index.
pub(crate) fn without_volume(
    current: &BTreeMap<String, String>,
    volume_id: &str,
) -> UpdateInstanceVolumesRequest {
    let volumes = current
        .iter()
        .filter(|(_, id)| id.as_str() != volume_id)
        .map(|(index, id)| (index.clone(), attachment(index, id.clone())))
        .collect();
    UpdateInstanceVolumesRequest { volumes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current() -> BTreeMap<String, String> {
        BTreeMap::from([
            (String::from("0"), String::from("root-vol")),
            (String::from("1"), String::from("tools-vol")),
        ])
    }

    #[test]
    fn volume_attachment_serialises_without_boot_when_false() {
        let json = serde_json::to_string(&attachment("2", String::from("vol-123")))
            .unwrap_or_else(|err| panic!("serialise: {err}"));
        assert!(!json.contains("boot"));
    }

    #[test]
    fn attach_keeps_root_and_uses_next_free_index() {
        let request = with_volume(&current(), "data-vol");
        assert_eq!(
            request.volumes.get("0"),
            Some(&VolumeAttachment {
                id: String::from("root-vol"),
                boot: true,
            })
        );
        assert_eq!(
            request.volumes.get("2").map(|entry| entry.id.as_str()),
            Some("data-vol")
        );
        let json = serde_json::to_string(&request).unwrap_or_else(|err| panic!("serialise: {err}"));
        assert!(json.contains(r#""boot":true"#));
    }

    #[test]
    fn attach_is_idempotent_for_present_volume() {
        let request = with_volume(&current(), "tools-vol");
        assert_eq!(request.volumes.len(), 2);
    }

    #[test]
    fn detach_drops_only_the_volume() {
        let request = without_volume(&current(), "tools-vol");
        assert_eq!(request.volumes.len(), 1);
        assert!(request.volumes.contains_key("0"));
    }
}
