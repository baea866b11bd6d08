//! Unit tests for device naming and discovery.

use std::collections::BTreeSet;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use rstest::rstest;

use super::*;
use crate::backend::CloudKind;
use crate::test_support::FakeDevices;

const EC2_RULE: IncrementRule = IncrementRule::Reserved {
    xen_base: "/dev/xvd",
    api_base: "/dev/sd",
    floor: 'f',
};

fn paths(names: &[&str]) -> BTreeSet<Utf8PathBuf> {
    names.iter().map(|name| Utf8PathBuf::from(*name)).collect()
}

fn generic(names: &[&str]) -> DeviceDiscovery {
    DeviceDiscovery::new(
        Arc::new(FakeDevices::new("/dev", names)),
        DeviceNaming::for_instance(CloudKind::Generic, "DEV1-S"),
    )
}

fn requests(candidates: &[AttachCandidate]) -> Vec<&str> {
    candidates
        .iter()
        .map(|candidate| candidate.request.as_str())
        .collect()
}

#[rstest]
#[case("/dev/sdf", EC2_RULE, Some("/dev/sdg"))]
#[case("/dev/xvdb", EC2_RULE, Some("/dev/sdf"))]
#[case("/dev/xvdg", EC2_RULE, Some("/dev/sdh"))]
#[case("/dev/sda", EC2_RULE, Some("/dev/sdf"))]
#[case("/dev/vdc", IncrementRule::Plain, Some("/dev/vdd"))]
#[case("/dev/xvdb", IncrementRule::Plain, Some("/dev/xvdc"))]
#[case("/dev/sdg1", IncrementRule::Plain, Some("/dev/sdg2"))]
#[case("/dev/sdg9", EC2_RULE, Some("/dev/sdg10"))]
#[case("/dev/sdz", IncrementRule::Plain, None)]
#[case("/dev/", IncrementRule::Plain, None)]
#[case("", IncrementRule::Plain, None)]
fn increment_device_letter_advances_trailing_identifier(
    #[case] device: &str,
    #[case] rule: IncrementRule,
    #[case] expected: Option<&str>,
) {
    assert_eq!(
        increment_device_letter(device, rule).as_deref(),
        expected,
        "increment of {device:?}"
    );
}

#[rstest]
#[case("nvme0n1", Some(DeviceScheme::Nvme))]
#[case("xvdf", Some(DeviceScheme::Xen))]
#[case("vdb", Some(DeviceScheme::Virtio))]
#[case("sda", Some(DeviceScheme::Scsi))]
#[case("hda", None)]
fn classify_recognises_schemes(#[case] name: &str, #[case] expected: Option<DeviceScheme>) {
    assert_eq!(DeviceScheme::classify(name), expected);
}

#[rstest]
#[case(CloudKind::Ec2, "c5.large", true)]
#[case(CloudKind::Ec2, "M5.xlarge", true)]
#[case(CloudKind::Ec2, "t2.micro", false)]
#[case(CloudKind::OpenStack, "c5.large", false)]
#[case(CloudKind::Scaleway, "DEV1-S", false)]
fn naming_selects_nvme_by_instance_family(
    #[case] cloud: CloudKind,
    #[case] instance_type: &str,
    #[case] nvme: bool,
) {
    let naming = DeviceNaming::for_instance(cloud, instance_type);
    assert_eq!(naming.nvme, nvme);
    let expected = if nvme { "nvme[0-9]*n1" } else { "*d[a-z]" };
    assert_eq!(naming.listing_pattern(), expected);
}

#[test]
fn only_ec2_uses_reserved_range() {
    assert_eq!(
        DeviceNaming::for_instance(CloudKind::Ec2, "t2.micro").increment,
        EC2_RULE
    );
    assert_eq!(
        DeviceNaming::for_instance(CloudKind::OpenStack, "m1.small").increment,
        IncrementRule::Plain
    );
}

#[test]
fn list_devices_filters_by_pattern() {
    let discovery = generic(&["sda", "sda1", "vdb", "loop0", "nvme0n1", "tty"]);
    assert_eq!(discovery.list_devices(), paths(&["/dev/sda", "/dev/vdb"]));
}

#[test]
fn list_devices_uses_nvme_pattern_for_nitro_families() {
    let discovery = DeviceDiscovery::new(
        Arc::new(FakeDevices::new("/dev", &["nvme0n1", "nvme0n1p1", "nvme1n1", "xvda"])),
        DeviceNaming::for_instance(CloudKind::Ec2, "c5.large"),
    );
    assert_eq!(
        discovery.list_devices(),
        paths(&["/dev/nvme0n1", "/dev/nvme1n1"])
    );
}

#[test]
fn virtio_takes_priority_over_scsi() {
    let discovery = generic(&["sda", "vda", "vdc"]);
    let candidates = discovery.next_candidate_devices();
    assert_eq!(requests(&candidates), ["/dev/vdd"]);
    assert_eq!(
        candidates.first().map(|candidate| candidate.visible_as),
        Some(DeviceScheme::Virtio)
    );
}

#[test]
fn xen_devices_increment_highest() {
    let discovery = generic(&["xvda", "xvdb"]);
    assert_eq!(requests(&discovery.next_candidate_devices()), ["/dev/xvdc"]);
}

#[test]
fn xen_devices_on_ec2_request_reserved_scsi_letters() {
    let discovery = DeviceDiscovery::new(
        Arc::new(FakeDevices::new("/dev", &["xvda"])),
        DeviceNaming::for_instance(CloudKind::Ec2, "t2.micro"),
    );
    assert_eq!(requests(&discovery.next_candidate_devices()), ["/dev/sdf"]);
}

#[test]
fn scsi_only_hosts_also_offer_virtio_and_xen_bases() {
    let discovery = generic(&["sda"]);
    let candidates = discovery.next_candidate_devices();
    assert_eq!(requests(&candidates), ["/dev/sdb", "/dev/vda", "/dev/xvda"]);
    let schemes: Vec<DeviceScheme> = candidates.iter().map(|c| c.visible_as).collect();
    assert_eq!(
        schemes,
        [DeviceScheme::Scsi, DeviceScheme::Virtio, DeviceScheme::Xen]
    );
}

#[test]
fn no_recognised_devices_yields_no_candidates() {
    assert!(generic(&["loop0", "hda"]).next_candidate_devices().is_empty());
}

#[rstest]
#[case(1, Some("/dev/sdf"))]
#[case(3, Some("/dev/sdh"))]
#[case(6, Some("/dev/sdk"))]
#[case(7, None)]
fn nvme_requests_scsi_slot_by_device_count(#[case] present: usize, #[case] expected: Option<&str>) {
    let discovery = DeviceDiscovery::new(
        Arc::new(FakeDevices::new("/dev", &[])),
        DeviceNaming::for_instance(CloudKind::Ec2, "m5.large"),
    );
    let devices: BTreeSet<Utf8PathBuf> = (0..present)
        .map(|index| Utf8PathBuf::from(format!("/dev/nvme{index}n1")))
        .collect();
    let candidates = discovery.candidates_for(&devices);
    assert_eq!(requests(&candidates).first().copied(), expected);
    if expected.is_some() {
        assert!(
            candidates
                .iter()
                .all(|candidate| candidate.visible_as == DeviceScheme::Nvme)
        );
    }
}

#[test]
fn resolve_accepts_single_unexpected_device() {
    let before = paths(&["/dev/sda"]);
    let after = paths(&["/dev/sda", "/dev/sdf"]);
    assert_eq!(
        DeviceDiscovery::resolve_new_device(&before, &after),
        NewDevice::Single(Utf8PathBuf::from("/dev/sdf"))
    );
}

#[test]
fn resolve_reports_two_new_devices_as_ambiguous() {
    let before = paths(&["/dev/sda"]);
    let after = paths(&["/dev/sda", "/dev/sdf", "/dev/sdg"]);
    assert_eq!(
        DeviceDiscovery::resolve_new_device(&before, &after),
        NewDevice::Ambiguous(vec![
            Utf8PathBuf::from("/dev/sdf"),
            Utf8PathBuf::from("/dev/sdg"),
        ])
    );
}

#[test]
fn resolve_reports_missing_when_nothing_appeared() {
    let before = paths(&["/dev/sda"]);
    assert_eq!(
        DeviceDiscovery::resolve_new_device(&before, &before),
        NewDevice::Missing
    );
}

#[test]
fn dev_directory_lists_real_entries() {
    let temp = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("non UTF-8 temp path {}", path.display()));
    for name in ["vda", "vdb", "vda1"] {
        std::fs::write(root.join(name), b"")
            .unwrap_or_else(|err| panic!("create {name}: {err}"));
    }

    let namespace = DevDirectory::new(root.clone());
    let mut entries = namespace.entries();
    entries.sort();
    assert_eq!(entries, ["vda", "vda1", "vdb"]);
    assert!(namespace.exists(&root.join("vdb")));
    assert!(!namespace.exists(Utf8Path::new("/nonexistent/ballast/vdz")));
}

#[test]
fn dev_directory_missing_root_lists_nothing() {
    let namespace = DevDirectory::new("/nonexistent/ballast-dev");
    assert!(namespace.entries().is_empty());
}
