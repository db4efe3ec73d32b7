//! The `ebs` storage backend: cloud block volumes, their snapshots and
//! backup references, tracked in a local metadata store.
//!
//! Every operation that reads or writes volume records holds one
//! driver-wide lock for its full duration, so operations on different
//! volumes are also serialised. Waiting for a snapshot to complete during
//! backup creation happens after the lock is released.

mod backup;
mod backup_url;
mod error;
mod executors;
mod options;
mod snapshot;
mod types;
mod volume;

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backend::{BackendConfig, BackendError, Executor, StorageBackend};
use crate::cloud::{ControlPlane, PollPolicy, StorageClient, VolumeType};
use crate::device::BlockDevices;
use crate::host::Mounter;
use crate::registry::{DriverRegistry, ExecutorRegistry};
use crate::size::parse_size;
use crate::store::JsonStore;

pub use backup_url::BackupRef;
pub use error::EbsError;
pub use executors::{
    BACKUP_CREATE, BACKUP_LIST, BACKUP_READ, BACKUP_REMOVE, SNAPSHOT_CREATE, SNAPSHOT_LIST,
    SNAPSHOT_READ, SNAPSHOT_REMOVE, VOLUME_CREATE, VOLUME_LIST, VOLUME_MOUNT, VOLUME_READ,
    VOLUME_REMOVE, VOLUME_UMOUNT,
};
pub use options::{
    CreateVolumeOptions, ListSnapshotOptions, MountVolumeOptions, OPT_BACKUP_URL,
    OPT_MOUNT_POINT, OPT_REFERENCE_ONLY, OPT_SIZE, OPT_SNAPSHOT_CREATED_TIME, OPT_SNAPSHOT_NAME,
    OPT_VOLUME_CREATED_TIME, OPT_VOLUME_DRIVER_ID, OPT_VOLUME_IOPS, OPT_VOLUME_NAME,
    OPT_VOLUME_TYPE, RemoveVolumeOptions, SnapshotOptions, VolumeSource,
};
pub use snapshot::SnapshotInfo;
pub use types::{
    DEVICE_RECORD, Device, Snapshot, VOLUME_RECORD_PREFIX, VOLUME_RECORD_SUFFIX, Volume,
};
pub use volume::VolumeInfo;

/// Name the backend is registered under; also the backup URL scheme.
pub const BACKEND_NAME: &str = "ebs";
/// Configuration key of the default volume size.
pub const CONFIG_DEFAULT_VOLUME_SIZE: &str = "ebs.defaultvolumesize";
/// Configuration key of the default volume type.
pub const CONFIG_DEFAULT_VOLUME_TYPE: &str = "ebs.defaultvolumetype";
/// Configuration key of the default encryption key.
pub const CONFIG_DEFAULT_KMS_KEY_ID: &str = "ebs.defaultkmskeyid";
/// Default volume size when none is configured.
pub const DEFAULT_VOLUME_SIZE: &str = "4G";
/// Default volume type when none is configured.
pub const DEFAULT_VOLUME_TYPE: VolumeType = VolumeType::Gp2;

/// Provider and host collaborators handed to every driver instance.
#[derive(Clone)]
pub struct Collaborators {
    /// Cloud control plane.
    pub api: Arc<dyn ControlPlane>,
    /// Host block-device view used to identify attached volumes.
    pub devices: Arc<dyn BlockDevices>,
    /// Filesystem mounting and formatting.
    pub mounter: Arc<dyn Mounter>,
    /// Polling behaviour of state waits.
    pub poll: PollPolicy,
}

/// The EBS volume and snapshot driver.
pub struct EbsDriver {
    device: Device,
    client: StorageClient,
    mounter: Arc<dyn Mounter>,
    store: JsonStore,
    lock: Mutex<()>,
    executors: ExecutorRegistry<Self>,
}

fn config_value<'a>(config: &'a BackendConfig, key: &str) -> Option<&'a str> {
    config
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn invalid_config(key: &str, message: impl Into<String>) -> EbsError {
    EbsError::InvalidConfig {
        key: key.to_owned(),
        message: message.into(),
    }
}

/// Builds the driver configuration from `config` with built-in defaults.
///
/// # Errors
///
/// Returns [`EbsError::InvalidConfig`] naming the offending key.
pub fn device_from_config(root: &Utf8Path, config: &BackendConfig) -> Result<Device, EbsError> {
    let raw_size = config_value(config, CONFIG_DEFAULT_VOLUME_SIZE).unwrap_or(DEFAULT_VOLUME_SIZE);
    let default_volume_size = parse_size(raw_size)
        .map_err(|err| invalid_config(CONFIG_DEFAULT_VOLUME_SIZE, err.to_string()))?;
    let default_volume_type = config_value(config, CONFIG_DEFAULT_VOLUME_TYPE)
        .map(str::parse::<VolumeType>)
        .transpose()
        .map_err(|err| invalid_config(CONFIG_DEFAULT_VOLUME_TYPE, err.to_string()))?
        .unwrap_or(DEFAULT_VOLUME_TYPE);
    Ok(Device {
        root: root.to_owned(),
        default_volume_size,
        default_volume_type,
        default_kms_key_id: config_value(config, CONFIG_DEFAULT_KMS_KEY_ID).map(str::to_owned),
    })
}

fn load_or_create_device(
    store: &JsonStore,
    root: &Utf8Path,
    config: &BackendConfig,
) -> Result<Device, EbsError> {
    if store.exists(DEVICE_RECORD)? {
        debug!(%root, "loading existing driver configuration");
        return Ok(store.load(DEVICE_RECORD)?);
    }
    store.ensure_root()?;
    let device = device_from_config(root, config)?;
    store.save(DEVICE_RECORD, &device)?;
    Ok(device)
}

impl EbsDriver {
    /// Initialises a driver rooted at `root`.
    ///
    /// The driver configuration is read from `ebs.cfg` when present;
    /// otherwise it is built from `config` and written there. Volumes
    /// recorded as mounted are mounted again before the driver is returned.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Ebs`] when the configuration is invalid, the
    /// metadata store is unusable, the instance identity cannot be resolved
    /// or a remount fails.
    pub async fn init(
        root: Utf8PathBuf,
        config: &BackendConfig,
        collaborators: Collaborators,
    ) -> Result<Self, BackendError> {
        let store = JsonStore::new(root.clone());
        let device = load_or_create_device(&store, &root, config)?;
        let client =
            StorageClient::connect(collaborators.api, collaborators.devices, collaborators.poll)
                .await
                .map_err(EbsError::from)?;
        let driver = Self {
            device,
            client,
            mounter: collaborators.mounter,
            store,
            lock: Mutex::new(()),
            executors: executors::registry()?,
        };
        driver.remount_volumes()?;
        info!(
            %root,
            region = %driver.client.region(),
            instance_id = %driver.client.identity().instance_id,
            "ebs driver initialised"
        );
        Ok(driver)
    }

    /// The driver configuration in effect.
    #[must_use]
    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// The storage client used by the driver.
    #[must_use]
    pub const fn client(&self) -> &StorageClient {
        &self.client
    }

    fn list_volume_names(&self) -> Result<Vec<String>, EbsError> {
        Ok(self
            .store
            .list_ids(VOLUME_RECORD_PREFIX, VOLUME_RECORD_SUFFIX)?)
    }

    fn remount_volumes(&self) -> Result<(), EbsError> {
        for name in self.list_volume_names()? {
            let volume = self.load_volume(&name)?;
            if !volume.is_mounted() {
                continue;
            }
            debug!(volume = %name, mount_point = %volume.mount_point, "remounting volume");
            self.mount_locked(volume, None)?;
        }
        Ok(())
    }
}

impl StorageBackend for EbsDriver {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn info(&self) -> BTreeMap<String, String> {
        let identity = self.client.identity();
        BTreeMap::from([
            (
                String::from("DefaultVolumeSize"),
                self.device.default_volume_size.to_string(),
            ),
            (
                String::from("DefaultVolumeType"),
                self.device.default_volume_type.to_string(),
            ),
            (
                String::from("DefaultKmsKey"),
                self.device.default_kms_key_id.clone().unwrap_or_default(),
            ),
            (String::from("InstanceID"), identity.instance_id.clone()),
            (String::from("Region"), identity.region.clone()),
            (
                String::from("AvailabilityZone"),
                identity.availability_zone.clone(),
            ),
        ])
    }

    fn executors(
        self: Arc<Self>,
        hints: &[&str],
    ) -> Result<BTreeMap<String, Box<dyn Executor>>, BackendError> {
        self.executors.resolve(&self, hints)
    }
}

/// Registers the `ebs` backend with `registry`.
///
/// # Errors
///
/// Returns [`BackendError::DuplicateRegistration`] when `ebs` is taken.
pub fn register(
    registry: &mut DriverRegistry,
    collaborators: Collaborators,
) -> Result<(), BackendError> {
    registry.register(
        BACKEND_NAME,
        Box::new(move |root, config| {
            let parts = collaborators.clone();
            Box::pin(async move {
                let driver = EbsDriver::init(root, &config, parts).await?;
                let backend: Arc<dyn StorageBackend> = Arc::new(driver);
                Ok(backend)
            })
        }),
    )
}
