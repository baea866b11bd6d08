//! Device naming rules keyed by cloud family and instance family.
//!
//! Provider quirks live in the two tables below so new ones are added as
//! rows rather than branches.

use crate::backend::CloudKind;

/// Glob matching traditional block devices (`sda`, `vdb`, `xvdf`, ...).
pub(super) const GENERIC_PATTERN: &str = "*d[a-z]";
/// Glob matching NVMe namespaces exposed for network block volumes.
pub(super) const NVME_PATTERN: &str = "nvme[0-9]*n1";

/// Instance families whose network volumes surface as NVMe namespaces.
static NVME_FAMILIES: &[(CloudKind, &[&str])] = &[(CloudKind::Ec2, &["c5", "m5"])];

/// Providers that only accept attach names from a reserved letter range.
static RESERVED_RANGES: &[(CloudKind, IncrementRule)] = &[(
    CloudKind::Ec2,
    IncrementRule::Reserved {
        xen_base: "/dev/xvd",
        api_base: "/dev/sd",
        floor: 'f',
    },
)];

/// How the trailing letter of a device name advances.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IncrementRule {
    /// Advance the trailing letter or number as-is.
    Plain,
    /// Rewrite Xen names to the API base and never go below `floor`.
    Reserved {
        /// Device prefix the guest kernel exposes (`/dev/xvd`).
        xen_base: &'static str,
        /// Device prefix the provider API expects (`/dev/sd`).
        api_base: &'static str,
        /// Lowest letter the provider accepts for attachable devices.
        floor: char,
    },
}

/// Naming scheme a block device belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DeviceScheme {
    /// `/dev/nvme<N>n1`.
    Nvme,
    /// `/dev/vd?` (virtio).
    Virtio,
    /// `/dev/xvd?` (Xen).
    Xen,
    /// `/dev/sd?` (SCSI).
    Scsi,
}

impl DeviceScheme {
    /// Classifies a device file name such as `xvdf` or `nvme1n1`.
    #[must_use]
    pub fn classify(name: &str) -> Option<Self> {
        if name.starts_with("nvme") {
            Some(Self::Nvme)
        } else if name.starts_with("xv") {
            Some(Self::Xen)
        } else if name.starts_with('v') {
            Some(Self::Virtio)
        } else if name.starts_with('s') {
            Some(Self::Scsi)
        } else {
            None
        }
    }
}

/// Naming behaviour resolved for one instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeviceNaming {
    /// Whether attached volumes appear as NVMe namespaces.
    pub nvme: bool,
    /// Rule applied when computing the next device letter.
    pub increment: IncrementRule,
}

impl DeviceNaming {
    /// Looks up the naming rules for a cloud and instance type.
    #[must_use]
    pub fn for_instance(cloud: CloudKind, instance_type: &str) -> Self {
        let family = instance_type
            .split('.')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let nvme = NVME_FAMILIES
            .iter()
            .filter(|(kind, _)| *kind == cloud)
            .flat_map(|(_, families)| families.iter())
            .any(|prefix| family.starts_with(prefix));
        let increment = RESERVED_RANGES
            .iter()
            .find(|(kind, _)| *kind == cloud)
            .map_or(IncrementRule::Plain, |(_, rule)| *rule);
        Self { nvme, increment }
    }

    /// Glob used to enumerate attachable block devices.
    #[must_use]
    pub const fn listing_pattern(&self) -> &'static str {
        if self.nvme {
            NVME_PATTERN
        } else {
            GENERIC_PATTERN
        }
    }
}

/// Returns `device` with its trailing identifier advanced by one.
///
/// Letters advance alphabetically (`/dev/vdc` to `/dev/vdd`); trailing
/// numbers advance numerically (`/dev/sdg1` to `/dev/sdg2`). Under
/// [`IncrementRule::Reserved`] a Xen base is rewritten to the API base and
/// letters below the floor are raised to it, so `/dev/xvdb` yields
/// `/dev/sdf`. Returns `None` when the name has no identifier to advance or
/// the letter would run past `z`.
#[must_use]
pub fn increment_device_letter(device: &str, rule: IncrementRule) -> Option<String> {
    let last = device.chars().last()?;
    if last.is_ascii_digit() {
        let base = device.trim_end_matches(|ch: char| ch.is_ascii_digit());
        let number: u64 = device.strip_prefix(base)?.parse().ok()?;
        return Some(format!("{base}{}", number.checked_add(1)?));
    }
    if !last.is_ascii_lowercase() {
        return None;
    }

    let mut base = device.strip_suffix(last)?;
    let mut letter = last;
    if let IncrementRule::Reserved {
        xen_base,
        api_base,
        floor,
    } = rule
    {
        if base == xen_base {
            base = api_base;
        }
        if letter < floor {
            letter = char::from_u32(u32::from(floor).checked_sub(1)?)?;
        }
    }

    let next = char::from_u32(u32::from(letter).checked_add(1)?)?;
    if !next.is_ascii_lowercase() {
        return None;
    }
    Some(format!("{base}{next}"))
}
