//! Executors exposing driver operations through the string-keyed request
//! and response maps.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::backend::{BackendError, BackendFuture, Executor, Request, Response};
use crate::registry::{ExecutorInit, ExecutorRegistry};
use crate::size::GIB;

use super::options::{
    CreateVolumeOptions, ListSnapshotOptions, MountVolumeOptions, OPT_BACKUP_URL,
    OPT_MOUNT_POINT, OPT_SIZE, OPT_SNAPSHOT_CREATED_TIME, OPT_SNAPSHOT_NAME,
    OPT_VOLUME_CREATED_TIME, OPT_VOLUME_NAME, RemoveVolumeOptions, SnapshotOptions, backup_from,
};
use super::{EbsDriver, SnapshotInfo, Volume, VolumeInfo};

/// Creates, attaches and records a volume.
pub const VOLUME_CREATE: &str = "ebs.volume.create.executor";
/// Reads one volume.
pub const VOLUME_READ: &str = "ebs.volume.read.executor";
/// Reads every volume.
pub const VOLUME_LIST: &str = "ebs.volume.list.executor";
/// Detaches and deletes a volume.
pub const VOLUME_REMOVE: &str = "ebs.volume.remove.executor";
/// Mounts a volume.
pub const VOLUME_MOUNT: &str = "ebs.volume.mount.executor";
/// Unmounts a volume.
pub const VOLUME_UMOUNT: &str = "ebs.volume.umount.executor";
/// Snapshots a volume.
pub const SNAPSHOT_CREATE: &str = "ebs.snapshot.create.executor";
/// Reads one snapshot.
pub const SNAPSHOT_READ: &str = "ebs.snapshot.read.executor";
/// Reads the snapshots of one or all volumes.
pub const SNAPSHOT_LIST: &str = "ebs.snapshot.list.executor";
/// Drops a snapshot record.
pub const SNAPSHOT_REMOVE: &str = "ebs.snapshot.remove.executor";
/// Turns a snapshot into a backup reference.
pub const BACKUP_CREATE: &str = "ebs.backup.create.executor";
/// Describes a backup.
pub const BACKUP_READ: &str = "ebs.backup.read.executor";
/// Deletes a backup.
pub const BACKUP_REMOVE: &str = "ebs.backup.remove.executor";
/// Lists backups; always empty.
pub const BACKUP_LIST: &str = "ebs.backup.list.executor";

macro_rules! driver_executor {
    ($name:ident, |$driver:ident, $request:ident| $body:block) => {
        struct $name(Arc<EbsDriver>);

        impl $name {
            async fn run(
                $driver: &EbsDriver,
                $request: &Request,
            ) -> Result<Response, BackendError> {
                $body
            }
        }

        impl Executor for $name {
            fn exec<'a>(
                &'a self,
                request: &'a Request,
            ) -> BackendFuture<'a, Response, BackendError> {
                Box::pin(Self::run(&self.0, request))
            }
        }
    };
}

fn volume_values(volume: &Volume) -> Response {
    Response::empty()
        .with(OPT_VOLUME_NAME, volume.name.clone())
        .with("EBSVolumeID", volume.ebs_id.clone())
        .with("Device", volume.device.clone())
        .with(OPT_MOUNT_POINT, volume.mount_point.clone())
}

fn volume_info_values(info: &VolumeInfo) -> Response {
    let descriptor = &info.descriptor;
    volume_values(&info.volume)
        .with("KmsKeyId", descriptor.kms_key_id.clone().unwrap_or_default())
        .with("AvailabilityZone", descriptor.availability_zone.clone())
        .with(OPT_VOLUME_CREATED_TIME, descriptor.create_time.clone())
        .with(
            OPT_SIZE,
            descriptor.size_gib.saturating_mul(GIB).to_string(),
        )
        .with("State", descriptor.state.clone())
        .with("Type", descriptor.volume_type.clone())
        .with(
            "IOPS",
            descriptor
                .iops
                .map(|iops| iops.to_string())
                .unwrap_or_default(),
        )
}

fn snapshot_info_value(info: &SnapshotInfo) -> Value {
    match info {
        SnapshotInfo::Present {
            snapshot,
            descriptor,
        } => json!({
            OPT_SNAPSHOT_NAME: snapshot.name,
            OPT_VOLUME_NAME: snapshot.volume_name,
            "EBSSnapshotID": descriptor.snapshot_id,
            "EBSVolumeID": descriptor.volume_id,
            "KmsKeyId": descriptor.kms_key_id.clone().unwrap_or_default(),
            OPT_SNAPSHOT_CREATED_TIME: descriptor.start_time,
            OPT_SIZE: descriptor.volume_size_gib.saturating_mul(GIB).to_string(),
            "State": descriptor.state,
        }),
        SnapshotInfo::Removed { snapshot } => json!({
            OPT_SNAPSHOT_NAME: snapshot.name,
            OPT_VOLUME_NAME: snapshot.volume_name,
            "State": "removed",
        }),
    }
}

driver_executor!(VolumeCreator, |driver, request| {
    let options = CreateVolumeOptions::parse(request)?;
    let volume = driver.create_volume(&options).await?;
    Ok(volume_values(&volume))
});

driver_executor!(VolumeReader, |driver, request| {
    let info = driver.read_volume(&request.name).await?;
    Ok(volume_info_values(&info))
});

driver_executor!(VolumeLister, |driver, _request| {
    let volumes = driver.list_volumes().await?;
    Ok(volumes
        .iter()
        .fold(Response::empty(), |response, (name, info)| {
            let fields = volume_info_values(info).values.into_iter().collect();
            response.with(name.clone(), Value::Object(fields))
        }))
});

driver_executor!(VolumeRemover, |driver, request| {
    let options = RemoveVolumeOptions::parse(request)?;
    driver.remove_volume(&options).await?;
    Ok(Response::empty())
});

driver_executor!(VolumeMounter, |driver, request| {
    let options = MountVolumeOptions::parse(request);
    let mount_point = driver.mount_volume(&options).await?;
    Ok(Response::empty().with(OPT_MOUNT_POINT, mount_point.to_string()))
});

driver_executor!(VolumeUnmounter, |driver, request| {
    driver.umount_volume(&request.name).await?;
    Ok(Response::empty())
});

driver_executor!(SnapshotCreator, |driver, request| {
    let options = SnapshotOptions::parse(request)?;
    let snapshot = driver.create_snapshot(&options).await?;
    Ok(Response::empty()
        .with(OPT_SNAPSHOT_NAME, snapshot.name)
        .with(OPT_VOLUME_NAME, snapshot.volume_name)
        .with("EBSSnapshotID", snapshot.ebs_id))
});

driver_executor!(SnapshotReader, |driver, request| {
    let options = SnapshotOptions::parse(request)?;
    let info = driver.snapshot_info(&options).await?;
    Ok(Response::empty().with(options.name, snapshot_info_value(&info)))
});

driver_executor!(SnapshotLister, |driver, request| {
    let snapshots = driver
        .list_snapshots(&ListSnapshotOptions::parse(request))
        .await?;
    Ok(snapshots
        .iter()
        .fold(Response::empty(), |response, (name, info)| {
            response.with(name.clone(), snapshot_info_value(info))
        }))
});

driver_executor!(SnapshotRemover, |driver, request| {
    let options = SnapshotOptions::parse(request)?;
    driver.remove_snapshot(&options).await?;
    Ok(Response::empty())
});

driver_executor!(BackupCreator, |driver, request| {
    let options = SnapshotOptions::parse_named(request)?;
    let backup = driver.create_backup(&options).await?;
    Ok(Response::empty().with(OPT_BACKUP_URL, backup.encode()))
});

driver_executor!(BackupReader, |driver, request| {
    let backup = backup_from(request)?;
    let snapshot = driver.backup_info(&backup).await?;
    Ok(Response::empty()
        .with("Region", backup.region)
        .with("EBSSnapshotID", snapshot.snapshot_id)
        .with("EBSVolumeID", snapshot.volume_id)
        .with("KmsKeyId", snapshot.kms_key_id.unwrap_or_default())
        .with("StartTime", snapshot.start_time)
        .with(
            OPT_SIZE,
            snapshot.volume_size_gib.saturating_mul(GIB).to_string(),
        )
        .with("State", snapshot.state))
});

driver_executor!(BackupRemover, |driver, request| {
    let backup = backup_from(request)?;
    driver.delete_backup(&backup).await?;
    Ok(Response::empty())
});

/// Backups are addressed by reference and cannot be enumerated.
struct BackupLister;

impl Executor for BackupLister {
    fn exec<'a>(&'a self, _request: &'a Request) -> BackendFuture<'a, Response, BackendError> {
        Box::pin(async { Ok(Response::empty()) })
    }
}

/// Builds the registry of every `ebs` executor.
///
/// # Errors
///
/// Returns [`BackendError::DuplicateRegistration`] if two executors share a
/// hint name.
pub(super) fn registry() -> Result<ExecutorRegistry<EbsDriver>, BackendError> {
    let entries: [(&str, ExecutorInit<EbsDriver>); 14] = [
        (VOLUME_CREATE, |driver| Ok(Box::new(VolumeCreator(driver)))),
        (VOLUME_READ, |driver| Ok(Box::new(VolumeReader(driver)))),
        (VOLUME_LIST, |driver| Ok(Box::new(VolumeLister(driver)))),
        (VOLUME_REMOVE, |driver| Ok(Box::new(VolumeRemover(driver)))),
        (VOLUME_MOUNT, |driver| Ok(Box::new(VolumeMounter(driver)))),
        (VOLUME_UMOUNT, |driver| Ok(Box::new(VolumeUnmounter(driver)))),
        (SNAPSHOT_CREATE, |driver| Ok(Box::new(SnapshotCreator(driver)))),
        (SNAPSHOT_READ, |driver| Ok(Box::new(SnapshotReader(driver)))),
        (SNAPSHOT_LIST, |driver| Ok(Box::new(SnapshotLister(driver)))),
        (SNAPSHOT_REMOVE, |driver| Ok(Box::new(SnapshotRemover(driver)))),
        (BACKUP_CREATE, |driver| Ok(Box::new(BackupCreator(driver)))),
        (BACKUP_READ, |driver| Ok(Box::new(BackupReader(driver)))),
        (BACKUP_REMOVE, |driver| Ok(Box::new(BackupRemover(driver)))),
        (BACKUP_LIST, |_driver| Ok(Box::new(BackupLister))),
    ];
    let mut registry = ExecutorRegistry::new();
    for (name, init) in entries {
        registry.register(name, init)?;
    }
    Ok(registry)
}
