//! Test support utilities shared across unit and integration tests.
//!
//! [`SimulatedCloud`] stands in for both the provider control plane and the
//! host's block-device view: attaching a volume makes a renamed NVMe device
//! appear, and every transitional state is reported once before it settles.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::future::ready;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::backend::BackendFuture;
use crate::cloud::{
    ATTACHMENT_ATTACHED, ATTACHMENT_ATTACHING, ApiError, ControlPlane, CreateVolumeInput,
    InstanceIdentity, SNAPSHOT_COMPLETED, SNAPSHOT_PENDING, SnapshotDescriptor, TagDescription,
    VOLUME_AVAILABLE, VOLUME_CREATING, VOLUME_IN_USE, VolumeAttachment, VolumeDescriptor,
    VolumeFilter,
};
use crate::device::{BlockDevices, DeviceError};
use crate::host::{CommandOutput, CommandRunner, HostError, Mounter};
use crate::size::GIB;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Clones share their queue and invocation log.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
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

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        locked(&self.invocations).clone()
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        locked(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, HostError> {
        locked(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        locked(&self.responses)
            .pop_front()
            .ok_or_else(|| HostError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
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
        for (key, old) in &self.previous {
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

/// Instance the simulated host runs as.
pub const SIM_INSTANCE_ID: &str = "i-0123456789abcdef0";
/// Home region of the simulated host.
pub const SIM_REGION: &str = "us-east-1";
/// Availability zone of the simulated host.
pub const SIM_ZONE: &str = "us-east-1a";
/// Root disk present on the simulated host before any attach.
pub const SIM_ROOT_DEVICE: &str = "xvda";

const SECTORS_PER_GIB: u64 = 1 << 21;
const CREATED_AT: &str = "2026-01-01T00:00:00Z";

struct SimVolume {
    descriptor: VolumeDescriptor,
    region: String,
    next_state: Option<String>,
    next_attachment_state: Option<String>,
    host_device: Option<String>,
}

struct SimSnapshot {
    descriptor: SnapshotDescriptor,
    region: String,
    next_state: Option<String>,
}

#[derive(Default)]
struct CloudState {
    volumes: BTreeMap<String, SimVolume>,
    snapshots: BTreeMap<String, SimSnapshot>,
    tags: BTreeMap<String, BTreeMap<String, String>>,
    host_devices: BTreeMap<String, u64>,
    failures: BTreeMap<String, VecDeque<ApiError>>,
    calls: Vec<String>,
    next_id: u64,
    next_nvme: u64,
    volume_outcome: Option<String>,
    snapshot_outcome: Option<String>,
}

impl CloudState {
    fn record(&mut self, call: &str) -> Result<(), ApiError> {
        self.calls.push(call.to_owned());
        match self
            .failures
            .get_mut(call)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:08x}", self.next_id)
    }

    fn volume_mut(&mut self, region: &str, volume_id: &str) -> Result<&mut SimVolume, ApiError> {
        self.volumes
            .get_mut(volume_id)
            .filter(|volume| volume.region == region)
            .ok_or_else(|| {
                ApiError::new(
                    "InvalidVolume.NotFound",
                    format!("The volume '{volume_id}' does not exist."),
                )
            })
    }

    fn snapshot_mut(
        &mut self,
        region: &str,
        snapshot_id: &str,
    ) -> Result<&mut SimSnapshot, ApiError> {
        self.snapshots
            .get_mut(snapshot_id)
            .filter(|snapshot| snapshot.region == region)
            .ok_or_else(|| {
                ApiError::new(
                    "InvalidSnapshot.NotFound",
                    format!("The snapshot '{snapshot_id}' does not exist."),
                )
            })
    }

    fn insert_snapshot(
        &mut self,
        region: &str,
        volume_id: &str,
        size_gib: u64,
        description: &str,
        settled: bool,
    ) -> String {
        let snapshot_id = self.allocate_id("snap");
        let next_state = if settled {
            None
        } else {
            Some(
                self.snapshot_outcome
                    .take()
                    .unwrap_or_else(|| SNAPSHOT_COMPLETED.to_owned()),
            )
        };
        let state = if settled { SNAPSHOT_COMPLETED } else { SNAPSHOT_PENDING };
        self.snapshots.insert(
            snapshot_id.clone(),
            SimSnapshot {
                descriptor: SnapshotDescriptor {
                    snapshot_id: snapshot_id.clone(),
                    volume_id: volume_id.to_owned(),
                    volume_size_gib: size_gib,
                    state: state.to_owned(),
                    progress: String::from(if settled { "100%" } else { "0%" }),
                    description: description.to_owned(),
                    start_time: CREATED_AT.to_owned(),
                    kms_key_id: None,
                },
                region: region.to_owned(),
                next_state,
            },
        );
        snapshot_id
    }
}

fn observe_volume(volume: &mut SimVolume) -> VolumeDescriptor {
    let observed = volume.descriptor.clone();
    if let Some(next) = volume.next_state.take() {
        volume.descriptor.state = next;
    }
    if let Some(next) = volume.next_attachment_state.take()
        && let Some(attachment) = volume.descriptor.attachments.first_mut()
    {
        attachment.state = next;
    }
    observed
}

/// In-memory provider and host block-device view.
pub struct SimulatedCloud {
    identity: InstanceIdentity,
    state: Mutex<CloudState>,
}

impl Default for SimulatedCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCloud {
    /// Creates a provider for [`SIM_INSTANCE_ID`] in [`SIM_ZONE`] whose host
    /// only has its root disk.
    #[must_use]
    pub fn new() -> Self {
        let state = CloudState {
            host_devices: BTreeMap::from([(SIM_ROOT_DEVICE.to_owned(), 8 * SECTORS_PER_GIB)]),
            ..CloudState::default()
        };
        Self {
            identity: InstanceIdentity {
                instance_id: SIM_INSTANCE_ID.to_owned(),
                region: SIM_REGION.to_owned(),
                availability_zone: SIM_ZONE.to_owned(),
            },
            state: Mutex::new(state),
        }
    }

    /// Makes the next `call` (for example `create_volume`) fail with `error`.
    pub fn fail_next(&self, call: &str, error: ApiError) {
        locked(&self.state)
            .failures
            .entry(call.to_owned())
            .or_default()
            .push_back(error);
    }

    /// Makes the next created volume settle in `state` instead of
    /// `available`.
    pub fn settle_next_volume_as(&self, state: &str) {
        locked(&self.state).volume_outcome = Some(state.to_owned());
    }

    /// Makes the next created snapshot settle in `state` instead of
    /// `completed`.
    pub fn settle_next_snapshot_as(&self, state: &str) {
        locked(&self.state).snapshot_outcome = Some(state.to_owned());
    }

    /// Adds an available, unattached volume and returns its identifier.
    #[must_use]
    pub fn seed_volume(&self, size_gib: u64) -> String {
        let mut state = locked(&self.state);
        let volume_id = state.allocate_id("vol");
        state.volumes.insert(
            volume_id.clone(),
            SimVolume {
                descriptor: VolumeDescriptor {
                    volume_id: volume_id.clone(),
                    size_gib,
                    state: VOLUME_AVAILABLE.to_owned(),
                    volume_type: String::from("gp2"),
                    iops: None,
                    kms_key_id: None,
                    availability_zone: self.identity.availability_zone.clone(),
                    snapshot_id: None,
                    create_time: CREATED_AT.to_owned(),
                    attachments: Vec::new(),
                },
                region: self.identity.region.clone(),
                next_state: None,
                next_attachment_state: None,
                host_device: None,
            },
        );
        volume_id
    }

    /// Adds a completed snapshot in `region` and returns its identifier.
    #[must_use]
    pub fn seed_snapshot(&self, region: &str, size_gib: u64) -> String {
        locked(&self.state).insert_snapshot(region, "vol-ffffffff", size_gib, "seeded", true)
    }

    /// Adds a block device to the host view.
    pub fn add_host_device(&self, name: &str, bytes: u64) {
        locked(&self.state)
            .host_devices
            .insert(name.to_owned(), bytes >> 9);
    }

    /// Current descriptor of a volume, without advancing its state.
    #[must_use]
    pub fn volume(&self, volume_id: &str) -> Option<VolumeDescriptor> {
        locked(&self.state)
            .volumes
            .get(volume_id)
            .map(|volume| volume.descriptor.clone())
    }

    /// Current descriptor of a snapshot, without advancing its state.
    #[must_use]
    pub fn snapshot(&self, snapshot_id: &str) -> Option<SnapshotDescriptor> {
        locked(&self.state)
            .snapshots
            .get(snapshot_id)
            .map(|snapshot| snapshot.descriptor.clone())
    }

    /// Tags currently set on a resource.
    #[must_use]
    pub fn tags(&self, resource_id: &str) -> BTreeMap<String, String> {
        locked(&self.state)
            .tags
            .get(resource_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Names of the control-plane calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        locked(&self.state).calls.clone()
    }

    /// Number of volumes the provider knows about.
    #[must_use]
    pub fn volume_count(&self) -> usize {
        locked(&self.state).volumes.len()
    }

    fn create_volume_now(
        &self,
        region: &str,
        input: &CreateVolumeInput,
    ) -> Result<String, ApiError> {
        let mut state = locked(&self.state);
        state.record("create_volume")?;
        if let Some(snapshot_id) = &input.snapshot_id {
            let source_gib = state.snapshot_mut(region, snapshot_id)?.descriptor.volume_size_gib;
            if input.size_gib < source_gib {
                return Err(ApiError::new(
                    "InvalidParameterValue",
                    format!("volume size {} is below snapshot size {source_gib}", input.size_gib),
                ));
            }
        }
        let volume_id = state.allocate_id("vol");
        let settled = state
            .volume_outcome
            .take()
            .unwrap_or_else(|| VOLUME_AVAILABLE.to_owned());
        state.volumes.insert(
            volume_id.clone(),
            SimVolume {
                descriptor: VolumeDescriptor {
                    volume_id: volume_id.clone(),
                    size_gib: input.size_gib,
                    state: VOLUME_CREATING.to_owned(),
                    volume_type: input
                        .volume_type
                        .clone()
                        .unwrap_or_else(|| String::from("gp2")),
                    iops: input.iops,
                    kms_key_id: input.kms_key_id.clone(),
                    availability_zone: input.availability_zone.clone(),
                    snapshot_id: input.snapshot_id.clone(),
                    create_time: CREATED_AT.to_owned(),
                    attachments: Vec::new(),
                },
                region: region.to_owned(),
                next_state: Some(settled),
                next_attachment_state: None,
                host_device: None,
            },
        );
        Ok(volume_id)
    }

    fn delete_volume_now(&self, region: &str, volume_id: &str) -> Result<(), ApiError> {
        let mut state = locked(&self.state);
        state.record("delete_volume")?;
        if !state.volume_mut(region, volume_id)?.descriptor.attachments.is_empty() {
            return Err(ApiError::new(
                "VolumeInUse",
                format!("Volume {volume_id} is currently attached"),
            ));
        }
        state.volumes.remove(volume_id);
        state.tags.remove(volume_id);
        Ok(())
    }

    fn describe_volumes_now(
        &self,
        region: &str,
        filter: &VolumeFilter,
    ) -> Result<Vec<VolumeDescriptor>, ApiError> {
        let mut state = locked(&self.state);
        state.record("describe_volumes")?;
        match filter {
            VolumeFilter::Ids(ids) => ids
                .iter()
                .map(|id| state.volume_mut(region, id).map(observe_volume))
                .collect(),
            VolumeFilter::AttachedTo(instance_id) => Ok(state
                .volumes
                .values()
                .filter(|volume| volume.region == region)
                .filter(|volume| {
                    volume
                        .descriptor
                        .attachments
                        .iter()
                        .any(|attachment| &attachment.instance_id == instance_id)
                })
                .map(|volume| volume.descriptor.clone())
                .collect()),
        }
    }

    fn attach_volume_now(
        &self,
        region: &str,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> Result<(), ApiError> {
        let mut state = locked(&self.state);
        state.record("attach_volume")?;
        state.next_nvme += 1;
        let host_device = format!("nvme{}n1", state.next_nvme);
        let volume = state.volume_mut(region, volume_id)?;
        if volume.descriptor.state != VOLUME_AVAILABLE {
            return Err(ApiError::new(
                "IncorrectState",
                format!("Volume {volume_id} is {}", volume.descriptor.state),
            ));
        }
        volume.descriptor.state = VOLUME_IN_USE.to_owned();
        volume.descriptor.attachments = vec![VolumeAttachment {
            instance_id: instance_id.to_owned(),
            device: device.to_owned(),
            state: ATTACHMENT_ATTACHING.to_owned(),
        }];
        volume.next_attachment_state = Some(ATTACHMENT_ATTACHED.to_owned());
        volume.host_device = Some(host_device.clone());
        let sectors = volume.descriptor.size_gib.saturating_mul(SECTORS_PER_GIB);
        state.host_devices.insert(host_device, sectors);
        Ok(())
    }

    fn detach_volume_now(
        &self,
        region: &str,
        volume_id: &str,
        instance_id: &str,
    ) -> Result<(), ApiError> {
        let mut state = locked(&self.state);
        state.record("detach_volume")?;
        let volume = state.volume_mut(region, volume_id)?;
        if !volume
            .descriptor
            .attachments
            .iter()
            .any(|attachment| attachment.instance_id == instance_id)
        {
            return Err(ApiError::new(
                "IncorrectState",
                format!("Volume {volume_id} is not attached to {instance_id}"),
            ));
        }
        volume.descriptor.attachments.clear();
        volume.next_state = Some(VOLUME_AVAILABLE.to_owned());
        if let Some(host_device) = volume.host_device.take() {
            state.host_devices.remove(&host_device);
        }
        Ok(())
    }

    fn create_snapshot_now(
        &self,
        region: &str,
        volume_id: &str,
        description: &str,
    ) -> Result<String, ApiError> {
        let mut state = locked(&self.state);
        state.record("create_snapshot")?;
        let size_gib = state.volume_mut(region, volume_id)?.descriptor.size_gib;
        Ok(state.insert_snapshot(region, volume_id, size_gib, description, false))
    }

    fn describe_snapshots_now(
        &self,
        region: &str,
        snapshot_ids: &[String],
    ) -> Result<Vec<SnapshotDescriptor>, ApiError> {
        let mut state = locked(&self.state);
        state.record("describe_snapshots")?;
        snapshot_ids
            .iter()
            .map(|id| -> Result<SnapshotDescriptor, ApiError> {
                let snapshot = state.snapshot_mut(region, id)?;
                let observed = snapshot.descriptor.clone();
                if let Some(next) = snapshot.next_state.take() {
                    snapshot.descriptor.state = next;
                    snapshot.descriptor.progress = String::from("100%");
                }
                Ok(observed)
            })
            .collect()
    }

    fn delete_snapshot_now(&self, region: &str, snapshot_id: &str) -> Result<(), ApiError> {
        let mut state = locked(&self.state);
        state.record("delete_snapshot")?;
        state.snapshot_mut(region, snapshot_id)?;
        state.snapshots.remove(snapshot_id);
        state.tags.remove(snapshot_id);
        Ok(())
    }

    fn copy_snapshot_now(
        &self,
        region: &str,
        source_region: &str,
        snapshot_id: &str,
    ) -> Result<String, ApiError> {
        let mut state = locked(&self.state);
        state.record("copy_snapshot")?;
        let source = state.snapshot_mut(source_region, snapshot_id)?.descriptor.clone();
        let description = format!("copy of {snapshot_id} from {source_region}");
        Ok(state.insert_snapshot(
            region,
            &source.volume_id,
            source.volume_size_gib,
            &description,
            false,
        ))
    }

    fn create_tags_now(
        &self,
        region: &str,
        resource_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ApiError> {
        let mut state = locked(&self.state);
        state.record("create_tags")?;
        let known = state.volume_mut(region, resource_id).is_ok()
            || state.snapshot_mut(region, resource_id).is_ok();
        if !known {
            return Err(ApiError::new(
                "InvalidID",
                format!("The ID '{resource_id}' is not valid"),
            ));
        }
        state
            .tags
            .entry(resource_id.to_owned())
            .or_default()
            .extend(tags.iter().map(|(key, value)| (key.clone(), value.clone())));
        Ok(())
    }

    fn describe_tags_now(&self, resource_id: &str) -> Result<Vec<TagDescription>, ApiError> {
        let mut state = locked(&self.state);
        state.record("describe_tags")?;
        Ok(state
            .tags
            .get(resource_id)
            .into_iter()
            .flatten()
            .map(|(key, value)| TagDescription {
                resource_id: resource_id.to_owned(),
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }
}

impl ControlPlane for SimulatedCloud {
    fn instance_identity(&self) -> BackendFuture<'_, InstanceIdentity, ApiError> {
        let result = locked(&self.state)
            .record("instance_identity")
            .map(|()| self.identity.clone());
        Box::pin(ready(result))
    }

    fn create_volume<'a>(
        &'a self,
        region: &'a str,
        input: &'a CreateVolumeInput,
    ) -> BackendFuture<'a, String, ApiError> {
        Box::pin(ready(self.create_volume_now(region, input)))
    }

    fn delete_volume<'a>(
        &'a self,
        region: &'a str,
        volume_id: &'a str,
    ) -> BackendFuture<'a, (), ApiError> {
        Box::pin(ready(self.delete_volume_now(region, volume_id)))
    }

    fn describe_volumes<'a>(
        &'a self,
        region: &'a str,
        filter: &'a VolumeFilter,
    ) -> BackendFuture<'a, Vec<VolumeDescriptor>, ApiError> {
        Box::pin(ready(self.describe_volumes_now(region, filter)))
    }

    fn attach_volume<'a>(
        &'a self,
        region: &'a str,
        volume_id: &'a str,
        instance_id: &'a str,
        device: &'a str,
    ) -> BackendFuture<'a, (), ApiError> {
        Box::pin(ready(
            self.attach_volume_now(region, volume_id, instance_id, device),
        ))
    }

    fn detach_volume<'a>(
        &'a self,
        region: &'a str,
        volume_id: &'a str,
        instance_id: &'a str,
    ) -> BackendFuture<'a, (), ApiError> {
        Box::pin(ready(self.detach_volume_now(region, volume_id, instance_id)))
    }

    fn create_snapshot<'a>(
        &'a self,
        region: &'a str,
        volume_id: &'a str,
        description: &'a str,
    ) -> BackendFuture<'a, String, ApiError> {
        Box::pin(ready(
            self.create_snapshot_now(region, volume_id, description),
        ))
    }

    fn describe_snapshots<'a>(
        &'a self,
        region: &'a str,
        snapshot_ids: &'a [String],
    ) -> BackendFuture<'a, Vec<SnapshotDescriptor>, ApiError> {
        Box::pin(ready(self.describe_snapshots_now(region, snapshot_ids)))
    }

    fn delete_snapshot<'a>(
        &'a self,
        region: &'a str,
        snapshot_id: &'a str,
    ) -> BackendFuture<'a, (), ApiError> {
        Box::pin(ready(self.delete_snapshot_now(region, snapshot_id)))
    }

    fn copy_snapshot<'a>(
        &'a self,
        region: &'a str,
        source_region: &'a str,
        snapshot_id: &'a str,
    ) -> BackendFuture<'a, String, ApiError> {
        Box::pin(ready(
            self.copy_snapshot_now(region, source_region, snapshot_id),
        ))
    }

    fn create_tags<'a>(
        &'a self,
        region: &'a str,
        resource_id: &'a str,
        tags: &'a BTreeMap<String, String>,
    ) -> BackendFuture<'a, (), ApiError> {
        Box::pin(ready(self.create_tags_now(region, resource_id, tags)))
    }

    fn describe_tags<'a>(
        &'a self,
        _region: &'a str,
        resource_id: &'a str,
    ) -> BackendFuture<'a, Vec<TagDescription>, ApiError> {
        Box::pin(ready(self.describe_tags_now(resource_id)))
    }
}

impl BlockDevices for SimulatedCloud {
    fn list(&self) -> Result<BTreeSet<String>, DeviceError> {
        Ok(locked(&self.state).host_devices.keys().cloned().collect())
    }

    fn sector_count(&self, device: &str) -> Result<u64, DeviceError> {
        locked(&self.state)
            .host_devices
            .get(device)
            .copied()
            .ok_or_else(|| DeviceError::Io {
                path: Utf8PathBuf::from(format!("/sys/block/{device}/size")),
                message: String::from("no such device"),
            })
    }
}

/// One operation observed by [`RecordingMounter`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MountOperation {
    /// `device` was mounted at the path.
    Mount(String, Utf8PathBuf),
    /// The path was unmounted.
    Umount(Utf8PathBuf),
    /// `device` was formatted with the filesystem.
    Format(String, String),
}

#[derive(Default)]
struct MounterState {
    operations: Vec<MountOperation>,
    mounted: BTreeMap<Utf8PathBuf, String>,
    failure: Option<HostError>,
}

/// [`Mounter`] that records operations and tracks mounts in memory.
#[derive(Clone, Default)]
pub struct RecordingMounter {
    state: Arc<Mutex<MounterState>>,
}

impl RecordingMounter {
    /// Creates a mounter with nothing mounted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations performed so far, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<MountOperation> {
        locked(&self.state).operations.clone()
    }

    /// Devices currently mounted, keyed by mount point.
    #[must_use]
    pub fn mounted(&self) -> BTreeMap<Utf8PathBuf, String> {
        locked(&self.state).mounted.clone()
    }

    /// Forgets every mount, as a reboot would.
    pub fn reboot(&self) {
        locked(&self.state).mounted.clear();
    }

    /// Makes the next operation fail with `error`.
    pub fn fail_next(&self, error: HostError) {
        locked(&self.state).failure = Some(error);
    }

    fn apply(&self, operation: MountOperation) -> Result<(), HostError> {
        let mut state = locked(&self.state);
        if let Some(err) = state.failure.take() {
            return Err(err);
        }
        match &operation {
            MountOperation::Mount(device, target) => {
                state.mounted.insert(target.clone(), device.clone());
            }
            MountOperation::Umount(target) => {
                state.mounted.remove(target);
            }
            MountOperation::Format(..) => {}
        }
        state.operations.push(operation);
        Ok(())
    }
}

impl Mounter for RecordingMounter {
    fn mount(&self, device: &str, mount_point: &Utf8Path) -> Result<(), HostError> {
        if self.is_mounted(mount_point)? {
            return Ok(());
        }
        self.apply(MountOperation::Mount(
            device.to_owned(),
            mount_point.to_owned(),
        ))
    }

    fn umount(&self, mount_point: &Utf8Path) -> Result<(), HostError> {
        if !self.is_mounted(mount_point)? {
            return Ok(());
        }
        self.apply(MountOperation::Umount(mount_point.to_owned()))
    }

    fn format(&self, device: &str, fs_type: &str) -> Result<(), HostError> {
        self.apply(MountOperation::Format(device.to_owned(), fs_type.to_owned()))
    }

    fn is_mounted(&self, mount_point: &Utf8Path) -> Result<bool, HostError> {
        Ok(locked(&self.state).mounted.contains_key(mount_point))
    }
}

/// Bytes of a volume of `size_gib` GiB.
#[must_use]
pub const fn gib(size_gib: u64) -> u64 {
    size_gib.saturating_mul(GIB)
}
