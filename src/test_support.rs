//! Test doubles shared across unit and integration tests.
//!
//! Every double is `Send + Sync` and cheap to clone; clones share state so a
//! test can keep one handle while the code under test owns another.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::archive::{ArchiveDescriptor, ArchiveError, ArchiveExtractor};
use crate::backend::{
    AttachmentRecord, BackendFuture, CloudKind, CloudVolumeClient, ProviderFailure,
    SnapshotInfo, SnapshotRecord, TagTarget, VolumeRecord,
};
use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::device::DeviceNamespace;
use crate::filesystem::{Filesystem, FilesystemKind, ServiceRole, ServiceState};
use crate::volume::{ToolPaths, VolumeSettings};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn exit(code: Option<i32>, stderr: &str) -> CommandOutput {
    CommandOutput {
        code,
        stdout: String::new(),
        stderr: stderr.to_owned(),
    }
}

#[derive(Debug, Default)]
struct RunnerState {
    responses: VecDeque<CommandOutput>,
    per_program: BTreeMap<String, VecDeque<CommandOutput>>,
    fallback: Option<CommandOutput>,
    invocations: Vec<CommandInvocation>,
}

/// Scripted command runner.
///
/// Responses queued for a specific program are used first, then the shared
/// FIFO queue, then the fallback. Without any of these the runner reports a
/// spawn failure.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<RunnerState>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a runner that succeeds whenever nothing else is queued.
    #[must_use]
    pub fn succeeding() -> Self {
        let runner = Self::default();
        lock(&runner.state).fallback = Some(exit(Some(0), ""));
        runner
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.state).invocations.clone()
    }

    /// Invocations of `program`, rendered with [`CommandInvocation::command_string`].
    #[must_use]
    pub fn commands_for(&self, program: &str) -> Vec<String> {
        lock(&self.state)
            .invocations
            .iter()
            .filter(|call| call.program == program)
            .map(CommandInvocation::command_string)
            .collect()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.state).responses.push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    /// Makes the next call to `program` exit with `code`.
    pub fn fail_next(&self, program: &str, code: i32) {
        lock(&self.state)
            .per_program
            .entry(program.to_owned())
            .or_default()
            .push_back(exit(Some(code), "simulated failure"));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        let mut state = lock(&self.state);
        state.invocations.push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        let scripted = state
            .per_program
            .get_mut(program)
            .and_then(VecDeque::pop_front);
        scripted
            .or_else(|| state.responses.pop_front())
            .or_else(|| state.fallback.clone())
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// In-memory device namespace.
#[derive(Clone, Debug)]
pub struct FakeDevices {
    root: Utf8PathBuf,
    names: Arc<Mutex<BTreeSet<String>>>,
}

impl FakeDevices {
    /// Creates a namespace under `root` holding `names`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>, names: &[&str]) -> Self {
        Self {
            root: root.into(),
            names: Arc::new(Mutex::new(
                names.iter().map(|name| (*name).to_owned()).collect(),
            )),
        }
    }

    /// Adds a device node.
    pub fn plug(&self, name: &str) {
        lock(&self.names).insert(name.to_owned());
    }

    /// Removes a device node.
    pub fn unplug(&self, name: &str) {
        lock(&self.names).remove(name);
    }
}

impl DeviceNamespace for FakeDevices {
    fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn entries(&self) -> Vec<String> {
        lock(&self.names).iter().cloned().collect()
    }

    fn exists(&self, path: &Utf8Path) -> bool {
        path.parent() == Some(self.root.as_path())
            && path
                .file_name()
                .is_some_and(|name| lock(&self.names).contains(name))
    }
}

/// Errors produced by [`FakeCloud`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FakeCloudError {
    /// The volume lives in another zone.
    #[error("volume is in zone {0}")]
    WrongZone(String),
    /// Any other scripted failure.
    #[error("simulated provider failure: {0}")]
    Unavailable(String),
}

impl ProviderFailure for FakeCloudError {
    fn is_zone_mismatch(&self) -> bool {
        matches!(self, Self::WrongZone(_))
    }
}

/// How [`FakeCloud`] reacts to the next attach request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttachEffect {
    /// Attach and plug the given device names (relative to the namespace
    /// root).
    Appear(Vec<String>),
    /// Attach without any device node appearing.
    Invisible,
    /// Accept the request but leave the volume available.
    Ignore,
    /// Reject the request with a zone mismatch.
    WrongZone,
    /// Reject the request with a generic failure.
    Fail,
}

#[derive(Debug, Default)]
struct CloudState {
    volumes: BTreeMap<String, VolumeRecord>,
    snapshots: BTreeMap<String, SnapshotRecord>,
    pending_statuses: BTreeMap<String, VecDeque<String>>,
    plugged: BTreeMap<String, Vec<String>>,
    attach_effects: VecDeque<AttachEffect>,
    attach_requests: Vec<String>,
    sticky_detaches: usize,
    detach_calls: usize,
    describe_calls: usize,
    describe_failures: usize,
    created: Vec<String>,
    deleted: Vec<String>,
    tags: Vec<(String, String, String)>,
    next_id: usize,
    create_status: String,
}

/// In-memory block-storage provider.
///
/// Attached volumes plug their device nodes into the shared
/// [`FakeDevices`]; detaching unplugs them.
#[derive(Clone, Debug)]
pub struct FakeCloud {
    state: Arc<Mutex<CloudState>>,
    devices: FakeDevices,
    instance_id: String,
    zone: String,
    instance_type: String,
    cloud_kind: CloudKind,
}

impl FakeCloud {
    /// Creates a provider for instance `i-local` in zone `fr-par-1`.
    #[must_use]
    pub fn new(devices: FakeDevices) -> Self {
        Self {
            state: Arc::new(Mutex::new(CloudState {
                create_status: String::from("available"),
                ..CloudState::default()
            })),
            devices,
            instance_id: String::from("i-local"),
            zone: String::from("fr-par-1"),
            instance_type: String::from("DEV1-S"),
            cloud_kind: CloudKind::Generic,
        }
    }

    /// Reports `kind` and `instance_type` for the local instance.
    #[must_use]
    pub fn on(mut self, kind: CloudKind, instance_type: &str) -> Self {
        self.cloud_kind = kind;
        instance_type.clone_into(&mut self.instance_type);
        self
    }

    /// Status given to newly created volumes.
    pub fn set_create_status(&self, status: &str) {
        status.clone_into(&mut lock(&self.state).create_status);
    }

    /// Seeds an existing volume.
    pub fn insert_volume(&self, record: VolumeRecord) {
        lock(&self.state).volumes.insert(record.id.clone(), record);
    }

    /// Seeds an existing snapshot.
    pub fn insert_snapshot(&self, record: SnapshotRecord) {
        lock(&self.state).snapshots.insert(record.id.clone(), record);
    }

    /// Removes `snapshot_id` as if it were deleted out of band.
    pub fn forget_snapshot(&self, snapshot_id: &str) {
        lock(&self.state).snapshots.remove(snapshot_id);
    }

    /// Queues statuses applied to `volume_id` by successive describe calls.
    pub fn queue_statuses(&self, volume_id: &str, statuses: &[&str]) {
        lock(&self.state)
            .pending_statuses
            .entry(volume_id.to_owned())
            .or_default()
            .extend(statuses.iter().map(|status| (*status).to_owned()));
    }

    /// Overwrites the status of `volume_id`.
    pub fn set_status(&self, volume_id: &str, status: &str) {
        if let Some(volume) = lock(&self.state).volumes.get_mut(volume_id) {
            status.clone_into(&mut volume.status);
        }
    }

    /// Removes `volume_id` as if it were deleted out of band.
    pub fn vanish(&self, volume_id: &str) {
        lock(&self.state).volumes.remove(volume_id);
    }

    /// Fails the next `count` describe calls.
    pub fn fail_describes(&self, count: usize) {
        lock(&self.state).describe_failures = count;
    }

    /// Queues the reaction to the next attach request.
    pub fn push_attach(&self, effect: AttachEffect) {
        lock(&self.state).attach_effects.push_back(effect);
    }

    /// Ignores the next `count` detach requests.
    pub fn ignore_detaches(&self, count: usize) {
        lock(&self.state).sticky_detaches = count;
    }

    /// Updates a snapshot's progress and status.
    pub fn set_snapshot_progress(&self, snapshot_id: &str, progress: u8, status: &str) {
        if let Some(snapshot) = lock(&self.state).snapshots.get_mut(snapshot_id) {
            snapshot.progress = progress;
            status.clone_into(&mut snapshot.status);
        }
    }

    /// Current provider record for `volume_id`.
    #[must_use]
    pub fn volume(&self, volume_id: &str) -> Option<VolumeRecord> {
        lock(&self.state).volumes.get(volume_id).cloned()
    }

    /// Number of describe calls served.
    #[must_use]
    pub fn describe_calls(&self) -> usize {
        lock(&self.state).describe_calls
    }

    /// Device names requested by attach calls, in order.
    #[must_use]
    pub fn attach_requests(&self) -> Vec<String> {
        lock(&self.state).attach_requests.clone()
    }

    /// Number of detach calls received.
    #[must_use]
    pub fn detach_calls(&self) -> usize {
        lock(&self.state).detach_calls
    }

    /// Identifiers of volumes created so far.
    #[must_use]
    pub fn created(&self) -> Vec<String> {
        lock(&self.state).created.clone()
    }

    /// Identifiers of volumes deleted so far.
    #[must_use]
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.state).deleted.clone()
    }

    /// Tags applied so far as `(resource, key, value)`.
    #[must_use]
    pub fn tags(&self) -> Vec<(String, String, String)> {
        lock(&self.state).tags.clone()
    }

    fn next_id(state: &mut CloudState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{prefix}-{}", state.next_id)
    }

    fn describe(&self, ids: &[String]) -> Result<Vec<VolumeRecord>, FakeCloudError> {
        let mut state = lock(&self.state);
        state.describe_calls += 1;
        if state.describe_failures > 0 {
            state.describe_failures -= 1;
            return Err(FakeCloudError::Unavailable(String::from("describe")));
        }
        let mut found = Vec::new();
        for id in ids {
            let next = state
                .pending_statuses
                .get_mut(id)
                .and_then(VecDeque::pop_front);
            if let Some(volume) = state.volumes.get_mut(id) {
                if let Some(status) = next {
                    volume.status = status;
                }
                found.push(volume.clone());
            }
        }
        Ok(found)
    }

    fn do_attach(&self, volume_id: &str, device: &str) -> Result<(), FakeCloudError> {
        let mut state = lock(&self.state);
        state.attach_requests.push(device.to_owned());
        let effect = state.attach_effects.pop_front().unwrap_or_else(|| {
            let name = device.strip_prefix("/dev/").unwrap_or(device);
            AttachEffect::Appear(vec![name.to_owned()])
        });
        let appeared = match effect {
            AttachEffect::Appear(names) => names,
            AttachEffect::Invisible => Vec::new(),
            AttachEffect::Ignore => return Ok(()),
            AttachEffect::WrongZone => {
                return Err(FakeCloudError::WrongZone(String::from("nl-ams-1")));
            }
            AttachEffect::Fail => {
                return Err(FakeCloudError::Unavailable(String::from("attach")));
            }
        };
        let Some(volume) = state.volumes.get_mut(volume_id) else {
            return Err(FakeCloudError::Unavailable(String::from("no such volume")));
        };
        volume.status = String::from("in-use");
        volume.attachment = Some(AttachmentRecord {
            instance_id: self.instance_id.clone(),
            device: Some(device.to_owned()),
            state: String::from("attached"),
        });
        for name in &appeared {
            self.devices.plug(name);
        }
        state.plugged.insert(volume_id.to_owned(), appeared);
        Ok(())
    }

    fn do_detach(&self, volume_id: &str) {
        let mut state = lock(&self.state);
        state.detach_calls += 1;
        if state.sticky_detaches > 0 {
            state.sticky_detaches -= 1;
            return;
        }
        if let Some(volume) = state.volumes.get_mut(volume_id) {
            volume.status = String::from("available");
            volume.attachment = None;
        }
        for name in state.plugged.remove(volume_id).unwrap_or_default() {
            self.devices.unplug(&name);
        }
    }
}

impl CloudVolumeClient for FakeCloud {
    type Error = FakeCloudError;

    fn create_volume<'a>(
        &'a self,
        size_gib: u64,
        zone: &'a str,
        snapshot_id: Option<&'a str>,
    ) -> BackendFuture<'a, Option<VolumeRecord>, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let id = Self::next_id(&mut state, "vol");
            let record = VolumeRecord {
                id: id.clone(),
                size_gib,
                zone: zone.to_owned(),
                status: state.create_status.clone(),
                snapshot_id: snapshot_id.map(str::to_owned),
                attachment: None,
            };
            state.created.push(id.clone());
            state.volumes.insert(id, record.clone());
            Ok(Some(record))
        })
    }

    fn get_all_volumes<'a>(
        &'a self,
        ids: &'a [String],
    ) -> BackendFuture<'a, Vec<VolumeRecord>, Self::Error> {
        Box::pin(async move { self.describe(ids) })
    }

    fn get_snapshot<'a>(
        &'a self,
        id: &'a str,
    ) -> BackendFuture<'a, Option<SnapshotRecord>, Self::Error> {
        Box::pin(async move { Ok(lock(&self.state).snapshots.get(id).cloned()) })
    }

    fn get_snapshot_info<'a>(
        &'a self,
        id: &'a str,
    ) -> BackendFuture<'a, SnapshotInfo, Self::Error> {
        Box::pin(async move {
            lock(&self.state)
                .snapshots
                .get(id)
                .map(|snapshot| SnapshotInfo {
                    volume_size_gib: snapshot.volume_size_gib,
                })
                .ok_or_else(|| FakeCloudError::Unavailable(format!("snapshot {id}")))
        })
    }

    fn get_all_snapshots(&self) -> BackendFuture<'_, Vec<SnapshotRecord>, Self::Error> {
        Box::pin(async move { Ok(lock(&self.state).snapshots.values().cloned().collect()) })
    }

    fn delete_volume<'a>(&'a self, id: &'a str) -> BackendFuture<'a, bool, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let existed = state.volumes.remove(id).is_some();
            if existed {
                state.deleted.push(id.to_owned());
            }
            Ok(existed)
        })
    }

    fn add_tag<'a>(
        &'a self,
        target: TagTarget<'a>,
        key: &'a str,
        value: &'a str,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            lock(&self.state)
                .tags
                .push((target.id().to_owned(), key.to_owned(), value.to_owned()));
            Ok(())
        })
    }

    fn attach<'a>(
        &'a self,
        volume: &'a VolumeRecord,
        _instance_id: &'a str,
        device: &'a str,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move { self.do_attach(&volume.id, device) })
    }

    fn detach<'a>(&'a self, volume: &'a VolumeRecord) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.do_detach(&volume.id);
            Ok(())
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        volume: &'a VolumeRecord,
        description: &'a str,
    ) -> BackendFuture<'a, SnapshotRecord, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let id = Self::next_id(&mut state, "snap");
            let record = SnapshotRecord {
                id: id.clone(),
                volume_id: Some(volume.id.clone()),
                progress: 0,
                status: String::from("pending"),
                description: description.to_owned(),
                volume_size_gib: volume.size_gib,
            };
            state.snapshots.insert(id, record.clone());
            Ok(record)
        })
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn zone(&self) -> &str {
        &self.zone
    }

    fn instance_type(&self) -> &str {
        &self.instance_type
    }

    fn cloud_kind(&self) -> CloudKind {
        self.cloud_kind
    }
}

/// Builds a provider record for seeding [`FakeCloud`].
#[must_use]
pub fn volume_record(id: &str, size_gib: u64, status: &str) -> VolumeRecord {
    VolumeRecord {
        id: id.to_owned(),
        size_gib,
        zone: String::from("fr-par-1"),
        status: status.to_owned(),
        snapshot_id: None,
        attachment: None,
    }
}

/// Builds a completed snapshot record for seeding [`FakeCloud`].
#[must_use]
pub fn snapshot_record(id: &str, volume_id: Option<&str>, volume_size_gib: u64) -> SnapshotRecord {
    SnapshotRecord {
        id: id.to_owned(),
        volume_id: volume_id.map(str::to_owned),
        progress: 100,
        status: String::from("completed"),
        description: String::new(),
        volume_size_gib,
    }
}

/// Settings rooted at `data_root` with short tool names.
#[must_use]
pub fn settings_for(data_root: &Utf8Path) -> VolumeSettings {
    VolumeSettings {
        cluster_name: String::from("test-cluster"),
        bucket_name: String::from("test-bucket"),
        service_user: String::from("svc"),
        export_user: String::from("export"),
        data_root: data_root.to_path_buf(),
        tools: ToolPaths {
            mkfs: String::from("mkfs.xfs"),
            mount: String::from("mount"),
            umount: String::from("umount"),
            grow: String::from("xfs_growfs"),
            chown: String::from("chown"),
        },
    }
}

/// Filesystem double that records state changes and share calls.
#[derive(Debug)]
pub struct RecordingFilesystem {
    name: String,
    mount_point: Utf8PathBuf,
    roles: Vec<ServiceRole>,
    state: Mutex<ServiceState>,
    kind: Mutex<Option<FilesystemKind>>,
    shares: AtomicUsize,
    unshares: AtomicUsize,
    mounted: AtomicBool,
}

impl RecordingFilesystem {
    /// Creates a filesystem in [`ServiceState::Starting`].
    #[must_use]
    pub fn new(
        name: &str,
        mount_point: impl Into<Utf8PathBuf>,
        roles: Vec<ServiceRole>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            mount_point: mount_point.into(),
            roles,
            state: Mutex::new(ServiceState::Starting),
            kind: Mutex::new(None),
            shares: AtomicUsize::new(0),
            unshares: AtomicUsize::new(0),
            mounted: AtomicBool::new(false),
        }
    }

    /// Number of share calls.
    #[must_use]
    pub fn share_count(&self) -> usize {
        self.shares.load(Ordering::SeqCst)
    }

    /// Number of unshare calls.
    #[must_use]
    pub fn unshare_count(&self) -> usize {
        self.unshares.load(Ordering::SeqCst)
    }

    /// Provisioning kind recorded so far.
    #[must_use]
    pub fn kind(&self) -> Option<FilesystemKind> {
        *lock(&self.kind)
    }

    /// Controls what [`Filesystem::is_mounted`] reports.
    pub fn set_mounted(&self, mounted: bool) {
        self.mounted.store(mounted, Ordering::SeqCst);
    }
}

impl Filesystem for RecordingFilesystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn mount_point(&self) -> &Utf8Path {
        &self.mount_point
    }

    fn svc_roles(&self) -> &[ServiceRole] {
        &self.roles
    }

    fn state(&self) -> ServiceState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ServiceState) {
        *lock(&self.state) = state;
    }

    fn set_kind(&self, kind: FilesystemKind) {
        *lock(&self.kind) = Some(kind);
    }

    fn nfs_share_and_set_state(&self) {
        self.shares.fetch_add(1, Ordering::SeqCst);
        self.set_state(ServiceState::Running);
    }

    fn remove_nfs_share(&self) {
        self.unshares.fetch_add(1, Ordering::SeqCst);
    }

    fn is_mounted(&self, _mount_point: &Utf8Path) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }
}

/// Archive extractor double that records targets.
#[derive(Debug, Default)]
pub struct FakeExtractor {
    failure: Option<String>,
    targets: Mutex<Vec<Utf8PathBuf>>,
}

impl FakeExtractor {
    /// Extractor whose extractions succeed.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Extractor whose extractions fail with `message`.
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_owned()),
            targets: Mutex::new(Vec::new()),
        }
    }

    /// Targets extracted into so far.
    #[must_use]
    pub fn targets(&self) -> Vec<Utf8PathBuf> {
        lock(&self.targets).clone()
    }
}

impl ArchiveExtractor for FakeExtractor {
    fn extract<'a>(
        &'a self,
        archive: &'a ArchiveDescriptor,
        target: &'a Utf8Path,
    ) -> BackendFuture<'a, (), ArchiveError> {
        Box::pin(async move {
            lock(&self.targets).push(target.to_path_buf());
            self.failure.as_ref().map_or(Ok(()), |message| {
                Err(ArchiveError::Download {
                    url: archive.url.clone(),
                    message: message.clone(),
                })
            })
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: tokio::sync::MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }
        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
