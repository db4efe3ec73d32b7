//! Volume lifecycle: create, read, list, remove, mount and unmount.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::cloud::{CreateVolumeRequest, VolumeDescriptor, VolumeType, check_iops};
use crate::host::DEFAULT_FILESYSTEM;
use crate::size::{GIB, round_up_to_gib};

use super::options::{CreateVolumeOptions, MountVolumeOptions, RemoveVolumeOptions, VolumeSource};
use super::types::{check_name, default_mount_point};
use super::{BackupRef, EbsDriver, EbsError, Volume};

/// A volume record together with the provider's current view of it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeInfo {
    /// Local record.
    pub volume: Volume,
    /// Provider descriptor.
    pub descriptor: VolumeDescriptor,
}

/// Cloud volume obtained for a create request.
struct Provisioned {
    volume_id: String,
    size_bytes: u64,
    needs_format: bool,
}

impl EbsDriver {
    pub(super) fn load_volume(&self, name: &str) -> Result<Volume, EbsError> {
        check_name(name)?;
        let record = Volume::record_name(name);
        if !self.store.exists(&record)? {
            return Err(EbsError::VolumeNotFound(name.to_owned()));
        }
        Ok(self.store.load(&record)?)
    }

    pub(super) fn save_volume(&self, volume: &Volume) -> Result<(), EbsError> {
        Ok(self
            .store
            .save(&Volume::record_name(&volume.name), volume)?)
    }

    fn type_and_iops(
        &self,
        options: &CreateVolumeOptions,
    ) -> Result<(VolumeType, Option<u64>), EbsError> {
        let volume_type = options
            .volume_type
            .unwrap_or(self.device.default_volume_type);
        check_iops(Some(volume_type), options.iops)?;
        Ok((volume_type, options.iops.filter(|value| *value > 0)))
    }

    /// Creates, attaches and records a volume.
    ///
    /// Only fresh volumes are formatted; adopted and restored volumes keep
    /// their data. Type and IOPS are validated before any provider call and
    /// are ignored when adopting an existing volume. A failure after the cloud volume exists but before the
    /// record is written leaves the cloud volume behind.
    ///
    /// # Errors
    ///
    /// Returns [`EbsError::VolumeExists`] when the name is taken, validation
    /// errors for unusable sizes, types or backups, and any provider, host or
    /// store failure.
    pub async fn create_volume(&self, options: &CreateVolumeOptions) -> Result<Volume, EbsError> {
        let _guard = self.lock.lock().await;
        let name = options.name.as_str();
        check_name(name)?;
        if self.store.exists(&Volume::record_name(name))? {
            return Err(EbsError::VolumeExists(name.to_owned()));
        }

        let tags = BTreeMap::from([(String::from("Name"), name.to_owned())]);
        let provisioned = match &options.source {
            VolumeSource::Existing(volume_id) => {
                if options.volume_type.is_some() || options.iops.is_some() {
                    warn!(
                        volume = name,
                        volume_id = %volume_id,
                        "volume type and IOPS are ignored for an existing volume"
                    );
                }
                self.adopt_volume(volume_id, &tags).await?
            }
            VolumeSource::Backup(backup) => {
                let kind = self.type_and_iops(options)?;
                self.restore_volume(options.size, kind, backup, tags).await?
            }
            VolumeSource::Fresh => {
                let kind = self.type_and_iops(options)?;
                self.create_fresh_volume(options.size, kind, tags).await?
            }
        };

        let expected_bytes = round_up_to_gib(provisioned.size_bytes).saturating_mul(GIB);
        let device = self
            .client
            .attach_volume(&provisioned.volume_id, expected_bytes)
            .await?;
        if provisioned.needs_format {
            self.mounter.format(&device, DEFAULT_FILESYSTEM)?;
        }

        let volume = Volume {
            name: name.to_owned(),
            ebs_id: provisioned.volume_id,
            device,
            mount_point: String::new(),
            snapshots: BTreeMap::new(),
        };
        self.save_volume(&volume)?;
        debug!(volume = %volume.name, ebs_id = %volume.ebs_id, device = %volume.device, "created volume");
        Ok(volume)
    }

    async fn adopt_volume(
        &self,
        volume_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<Provisioned, EbsError> {
        let existing = self.client.get_volume(volume_id).await?;
        if let Err(err) = self.client.add_tags(volume_id, tags).await {
            warn!(volume_id, error = %err, "unable to tag existing volume, continuing");
        }
        Ok(Provisioned {
            volume_id: volume_id.to_owned(),
            size_bytes: existing.size_gib.saturating_mul(GIB),
            needs_format: false,
        })
    }

    async fn restore_volume(
        &self,
        size: Option<u64>,
        (volume_type, iops): (VolumeType, Option<u64>),
        backup: &BackupRef,
        tags: BTreeMap<String, String>,
    ) -> Result<Provisioned, EbsError> {
        if backup.region != self.client.region() {
            return Err(EbsError::RegionMismatch {
                backup_region: backup.region.clone(),
                client_region: self.client.region().to_owned(),
            });
        }
        self.client
            .wait_for_snapshot_complete(&backup.snapshot_id)
            .await?;
        let snapshot = self.client.get_snapshot(&backup.snapshot_id).await?;
        let snapshot_bytes = snapshot.volume_size_gib.saturating_mul(GIB);
        let size_bytes = size.unwrap_or(snapshot_bytes);
        if size_bytes < snapshot_bytes {
            return Err(EbsError::SizeBelowSnapshot {
                requested: size_bytes,
                snapshot: snapshot_bytes,
            });
        }

        let volume_id = self
            .client
            .create_volume(&CreateVolumeRequest {
                size_bytes,
                iops,
                snapshot_id: Some(backup.snapshot_id.clone()),
                volume_type: Some(volume_type),
                kms_key_id: None,
                tags,
            })
            .await?;
        Ok(Provisioned {
            volume_id,
            size_bytes,
            needs_format: false,
        })
    }

    async fn create_fresh_volume(
        &self,
        size: Option<u64>,
        (volume_type, iops): (VolumeType, Option<u64>),
        tags: BTreeMap<String, String>,
    ) -> Result<Provisioned, EbsError> {
        let size_bytes = size.unwrap_or(self.device.default_volume_size);
        let volume_id = self
            .client
            .create_volume(&CreateVolumeRequest {
                size_bytes,
                iops,
                snapshot_id: None,
                volume_type: Some(volume_type),
                kms_key_id: self.device.default_kms_key_id.clone(),
                tags,
            })
            .await?;
        Ok(Provisioned {
            volume_id,
            size_bytes,
            needs_format: true,
        })
    }

    async fn read_volume_locked(&self, name: &str) -> Result<VolumeInfo, EbsError> {
        let volume = self.load_volume(name)?;
        let descriptor = self.client.get_volume(&volume.ebs_id).await?;
        Ok(VolumeInfo { volume, descriptor })
    }

    /// Reads a volume record and its provider descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`EbsError::VolumeNotFound`] for unknown names and provider
    /// failures otherwise.
    pub async fn read_volume(&self, name: &str) -> Result<VolumeInfo, EbsError> {
        let _guard = self.lock.lock().await;
        self.read_volume_locked(name).await
    }

    /// Reads every known volume, keyed by name.
    ///
    /// # Errors
    ///
    /// Fails on the first volume that cannot be read.
    pub async fn list_volumes(&self) -> Result<BTreeMap<String, VolumeInfo>, EbsError> {
        let _guard = self.lock.lock().await;
        let mut volumes = BTreeMap::new();
        for name in self.list_volume_names()? {
            let volume = self.read_volume_locked(&name).await?;
            volumes.insert(name, volume);
        }
        Ok(volumes)
    }

    /// Detaches and deletes a volume, then drops its record.
    ///
    /// With `reference_only` a failed detach is tolerated and the cloud
    /// volume is kept.
    ///
    /// # Errors
    ///
    /// Returns [`EbsError::VolumeNotFound`] for unknown names and provider
    /// or store failures otherwise.
    pub async fn remove_volume(&self, options: &RemoveVolumeOptions) -> Result<(), EbsError> {
        let _guard = self.lock.lock().await;
        let volume = self.load_volume(&options.name)?;

        match self.client.detach_volume(&volume.ebs_id).await {
            Ok(()) => debug!(volume = %volume.name, ebs_id = %volume.ebs_id, device = %volume.device, "detached volume"),
            Err(err) if options.reference_only => warn!(
                volume = %volume.name,
                ebs_id = %volume.ebs_id,
                error = %err,
                "unable to detach volume, removing the reference anyway"
            ),
            Err(err) => return Err(err.into()),
        }

        if !options.reference_only {
            self.client.delete_volume(&volume.ebs_id).await?;
            debug!(volume = %volume.name, ebs_id = %volume.ebs_id, "deleted volume");
        }
        Ok(self.store.delete(&Volume::record_name(&volume.name))?)
    }

    pub(super) fn mount_locked(
        &self,
        mut volume: Volume,
        requested: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, EbsError> {
        let target = match requested {
            Some(path) if volume.is_mounted() && volume.mount_point != path.as_str() => {
                return Err(EbsError::MountPointConflict {
                    name: volume.name,
                    current: volume.mount_point,
                    requested: path.to_string(),
                });
            }
            Some(path) => path.to_owned(),
            None if volume.is_mounted() => Utf8PathBuf::from(&volume.mount_point),
            None => default_mount_point(&self.device.root, &volume.name),
        };

        self.mounter.mount(&volume.device, &target)?;
        volume.mount_point = target.to_string();
        self.save_volume(&volume)?;
        Ok(target)
    }

    /// Mounts a volume and records the mount point.
    ///
    /// Without a requested path the recorded mount point is reused, falling
    /// back to `<root>/mounts/<name>`.
    ///
    /// # Errors
    ///
    /// Returns [`EbsError::MountPointConflict`] when the volume is mounted
    /// elsewhere, and lookup, mount or store failures otherwise.
    pub async fn mount_volume(&self, options: &MountVolumeOptions) -> Result<Utf8PathBuf, EbsError> {
        let _guard = self.lock.lock().await;
        let volume = self.load_volume(&options.name)?;
        self.mount_locked(volume, options.mount_point.as_deref())
    }

    /// Unmounts a volume and clears its mount point. Unmounted volumes are
    /// left alone.
    ///
    /// # Errors
    ///
    /// Returns lookup, unmount or store failures.
    pub async fn umount_volume(&self, name: &str) -> Result<(), EbsError> {
        let _guard = self.lock.lock().await;
        let mut volume = self.load_volume(name)?;
        if !volume.is_mounted() {
            debug!(volume = %name, "volume is not mounted");
            return Ok(());
        }
        self.mounter.umount(Utf8Path::new(&volume.mount_point))?;
        volume.mount_point.clear();
        self.save_volume(&volume)
    }

    /// Recorded mount point of a volume; empty while unmounted.
    ///
    /// # Errors
    ///
    /// Returns [`EbsError::VolumeNotFound`] for unknown names.
    pub async fn mount_point(&self, name: &str) -> Result<String, EbsError> {
        let _guard = self.lock.lock().await;
        Ok(self.load_volume(name)?.mount_point)
    }
}
