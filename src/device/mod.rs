//! Block device discovery and attach-name prediction.
//!
//! Providers do not always expose a volume under the name requested at
//! attach time: EC2 remaps `/dev/sdf` to `/dev/xvdf`, Nitro instances expose
//! NVMe namespaces, and virtio guests number devices themselves. The
//! discovery therefore predicts a short list of names to request and, after
//! attaching, diffs the device set to learn what the kernel actually created.
//!
//! Candidate prediction is not safe against attachments made concurrently by
//! other processes on the same instance; see
//! [`DeviceAllocationLock`](crate::volume::DeviceAllocationLock).

use std::collections::BTreeSet;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use glob::Pattern;
use tracing::{debug, error, warn};

mod naming;

pub use naming::{DeviceNaming, DeviceScheme, IncrementRule, increment_device_letter};

/// Prefix the provider API uses for attach names, independent of where the
/// guest kernel places device nodes.
const API_DEVICE_PREFIX: &str = "/dev/";
/// Attach names accepted for NVMe-backed instances, one per extra volume.
const NVME_API_LETTERS: [char; 6] = ['f', 'g', 'h', 'i', 'j', 'k'];

/// Read access to the local device namespace.
pub trait DeviceNamespace: Send + Sync {
    /// Directory holding block device nodes (normally `/dev`).
    fn root(&self) -> &Utf8Path;

    /// File names directly under [`DeviceNamespace::root`].
    fn entries(&self) -> Vec<String>;

    /// Returns `true` when `path` exists (device node or symlink).
    fn exists(&self, path: &Utf8Path) -> bool;
}

/// Device namespace backed by a real directory.
#[derive(Clone, Debug)]
pub struct DevDirectory {
    root: Utf8PathBuf,
}

impl DevDirectory {
    /// Creates a namespace rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DeviceNamespace for DevDirectory {
    fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn entries(&self) -> Vec<String> {
        let listing: std::io::Result<Vec<String>> = Dir::open_ambient_dir(&self.root, ambient_authority())
            .and_then(|dir| dir.entries()?.map(|entry| entry?.file_name()).collect());
        match listing {
            Ok(names) => names,
            Err(err) => {
                warn!(root = %self.root, error = %err, "cannot list device directory");
                Vec::new()
            }
        }
    }

    fn exists(&self, path: &Utf8Path) -> bool {
        path.exists()
    }
}

/// A device name to request from the provider at attach time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachCandidate {
    /// Name passed to the provider attach call.
    pub request: String,
    /// Scheme the guest kernel is expected to expose the volume under. For
    /// NVMe instances this differs from the scheme of `request`.
    pub visible_as: DeviceScheme,
}

impl AttachCandidate {
    fn same_scheme(request: String) -> Option<Self> {
        let name = request.rsplit('/').next()?;
        let visible_as = DeviceScheme::classify(name)?;
        Some(Self {
            request,
            visible_as,
        })
    }
}

/// Outcome of diffing the device set across an attach.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NewDevice {
    /// Nothing appeared.
    Missing,
    /// Exactly one device appeared.
    Single(Utf8PathBuf),
    /// Several devices appeared; the attached one cannot be identified.
    Ambiguous(Vec<Utf8PathBuf>),
}

/// Enumerates block devices and predicts attach names for one instance.
#[derive(Clone)]
pub struct DeviceDiscovery {
    namespace: Arc<dyn DeviceNamespace>,
    naming: DeviceNaming,
}

impl std::fmt::Debug for DeviceDiscovery {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DeviceDiscovery")
            .field("root", &self.namespace.root())
            .field("naming", &self.naming)
            .finish()
    }
}

impl DeviceDiscovery {
    /// Creates a discovery over `namespace` using `naming` rules.
    #[must_use]
    pub fn new(namespace: Arc<dyn DeviceNamespace>, naming: DeviceNaming) -> Self {
        Self { namespace, naming }
    }

    /// Naming rules in effect.
    #[must_use]
    pub const fn naming(&self) -> DeviceNaming {
        self.naming
    }

    /// Lists block device paths matching the instance's naming pattern.
    #[must_use]
    pub fn list_devices(&self) -> BTreeSet<Utf8PathBuf> {
        let pattern = self.naming.listing_pattern();
        let Ok(matcher) = Pattern::new(pattern) else {
            error!(pattern, "invalid device pattern");
            return BTreeSet::new();
        };
        let root = self.namespace.root();
        self.namespace
            .entries()
            .into_iter()
            .filter(|name| matcher.matches(name))
            .map(|name| root.join(name))
            .collect()
    }

    /// Returns `true` when `device` exists in the namespace.
    #[must_use]
    pub fn device_present(&self, device: &Utf8Path) -> bool {
        self.namespace.exists(device)
    }

    /// Path of `name` inside the device namespace.
    #[must_use]
    pub fn path_for(&self, name: &str) -> Utf8PathBuf {
        self.namespace.root().join(name)
    }

    /// Predicts the names to request for the next attachment, most likely
    /// first, based on the devices currently present.
    #[must_use]
    pub fn next_candidate_devices(&self) -> Vec<AttachCandidate> {
        self.candidates_for(&self.list_devices())
    }

    /// Candidate prediction over an explicit device set.
    ///
    /// Preference order is NVMe, virtio, Xen, then SCSI. When only SCSI
    /// devices exist the virtio and Xen base names are offered as well, since
    /// the driver a first attachment will land on is unknown.
    #[must_use]
    pub fn candidates_for(&self, devices: &BTreeSet<Utf8PathBuf>) -> Vec<AttachCandidate> {
        let mut by_scheme: [Vec<&str>; 4] = Default::default();
        for name in devices.iter().filter_map(|path| path.file_name()) {
            if let Some(scheme) = DeviceScheme::classify(name)
                && let Some(bucket) = by_scheme.get_mut(scheme_slot(scheme))
            {
                bucket.push(name);
            }
        }
        let [nvme, virtio, xen, scsi] = by_scheme;

        if !nvme.is_empty() {
            return Self::nvme_candidate(nvme.len()).into_iter().collect();
        }
        if let Some(last) = virtio.iter().max() {
            return self.incremented(last).into_iter().collect();
        }
        if let Some(last) = xen.iter().max() {
            return self.incremented(last).into_iter().collect();
        }
        if let Some(last) = scsi.iter().max() {
            let mut candidates: Vec<AttachCandidate> = self.incremented(last).into_iter().collect();
            candidates.extend(
                ["vda", "xvda"]
                    .iter()
                    .filter_map(|name| AttachCandidate::same_scheme(api_name(name))),
            );
            return candidates;
        }

        error!(
            devices = ?devices,
            "could not determine next available device"
        );
        Vec::new()
    }

    fn nvme_candidate(present: usize) -> Option<AttachCandidate> {
        let Some(letter) = present
            .checked_sub(1)
            .and_then(|index| NVME_API_LETTERS.get(index))
        else {
            error!(present, "no attach slots left for NVMe-backed volumes");
            return None;
        };
        let request = format!("{API_DEVICE_PREFIX}sd{letter}");
        debug!(request, "likely next attach device");
        Some(AttachCandidate {
            request,
            visible_as: DeviceScheme::Nvme,
        })
    }

    fn incremented(&self, name: &str) -> Option<AttachCandidate> {
        let next = increment_device_letter(&api_name(name), self.naming.increment);
        if next.is_none() {
            warn!(device = name, "cannot advance device name");
        }
        next.and_then(AttachCandidate::same_scheme)
    }

    /// Diffs device sets captured before and after an attach.
    #[must_use]
    pub fn resolve_new_device(
        before: &BTreeSet<Utf8PathBuf>,
        after: &BTreeSet<Utf8PathBuf>,
    ) -> NewDevice {
        let mut appeared: Vec<Utf8PathBuf> = after.difference(before).cloned().collect();
        match appeared.len() {
            0 => NewDevice::Missing,
            1 => appeared.pop().map_or(NewDevice::Missing, NewDevice::Single),
            _ => NewDevice::Ambiguous(appeared),
        }
    }
}

const fn scheme_slot(scheme: DeviceScheme) -> usize {
    match scheme {
        DeviceScheme::Nvme => 0,
        DeviceScheme::Virtio => 1,
        DeviceScheme::Xen => 2,
        DeviceScheme::Scsi => 3,
    }
}

fn api_name(name: &str) -> String {
    format!("{API_DEVICE_PREFIX}{name}")
}

#[cfg(test)]
mod tests;
