//! Snapshot bookkeeping for managed volumes.

use std::collections::BTreeMap;

use tracing::debug;

use crate::cloud::{CreateSnapshotRequest, SnapshotDescriptor};

use super::options::{ListSnapshotOptions, SnapshotOptions};
use super::types::{TAG_SNAPSHOT_NAME, TAG_VOLUME_NAME, check_name, snapshot_description};
use super::{EbsDriver, EbsError, Snapshot, Volume};

/// A snapshot record and, unless the cloud snapshot is gone, its provider
/// descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SnapshotInfo {
    /// The cloud snapshot was found.
    Present {
        /// Local record.
        snapshot: Snapshot,
        /// Provider descriptor.
        descriptor: SnapshotDescriptor,
    },
    /// The cloud snapshot could not be looked up, for example after its
    /// backup was deleted.
    Removed {
        /// Local record.
        snapshot: Snapshot,
    },
}

impl SnapshotInfo {
    /// The local record.
    #[must_use]
    pub const fn snapshot(&self) -> &Snapshot {
        match self {
            Self::Present { snapshot, .. } | Self::Removed { snapshot } => snapshot,
        }
    }
}

fn find_snapshot(volume: &Volume, name: &str) -> Result<Snapshot, EbsError> {
    volume
        .snapshots
        .get(name)
        .cloned()
        .ok_or_else(|| EbsError::SnapshotNotFound {
            volume: volume.name.clone(),
            snapshot: name.to_owned(),
        })
}

impl EbsDriver {
    pub(super) fn load_snapshot(&self, options: &SnapshotOptions) -> Result<Snapshot, EbsError> {
        let volume = self.load_volume(&options.volume_name)?;
        find_snapshot(&volume, &options.name)
    }

    async fn snapshot_info_locked(
        &self,
        options: &SnapshotOptions,
    ) -> Result<SnapshotInfo, EbsError> {
        let snapshot = self.load_snapshot(options)?;
        match self.client.get_snapshot(&snapshot.ebs_id).await {
            Ok(descriptor) => Ok(SnapshotInfo::Present {
                snapshot,
                descriptor,
            }),
            Err(err) => {
                debug!(snapshot = %snapshot.name, ebs_id = %snapshot.ebs_id, error = %err, "snapshot lookup failed, reporting it as removed");
                Ok(SnapshotInfo::Removed { snapshot })
            }
        }
    }

    /// Starts a cloud snapshot of a volume and records it.
    ///
    /// The snapshot is tagged with the volume and snapshot names.
    ///
    /// # Errors
    ///
    /// Returns [`EbsError::SnapshotExists`] when the volume already holds a
    /// snapshot of that name, and lookup, provider or store failures
    /// otherwise.
    pub async fn create_snapshot(&self, options: &SnapshotOptions) -> Result<Snapshot, EbsError> {
        let _guard = self.lock.lock().await;
        check_name(&options.name)?;
        let mut volume = self.load_volume(&options.volume_name)?;
        if volume.snapshots.contains_key(&options.name) {
            return Err(EbsError::SnapshotExists {
                volume: volume.name,
                snapshot: options.name.clone(),
            });
        }

        let request = CreateSnapshotRequest {
            volume_id: volume.ebs_id.clone(),
            description: snapshot_description(),
            tags: BTreeMap::from([
                (TAG_VOLUME_NAME.to_owned(), volume.name.clone()),
                (TAG_SNAPSHOT_NAME.to_owned(), options.name.clone()),
            ]),
        };
        let ebs_id = self.client.create_snapshot(&request).await?;
        debug!(
            snapshot = %options.name,
            %ebs_id,
            volume = %volume.name,
            volume_ebs_id = %volume.ebs_id,
            "created snapshot"
        );

        let snapshot = Snapshot {
            name: options.name.clone(),
            volume_name: volume.name.clone(),
            ebs_id,
        };
        volume
            .snapshots
            .insert(snapshot.name.clone(), snapshot.clone());
        self.save_volume(&volume)?;
        Ok(snapshot)
    }

    /// Reads one snapshot.
    ///
    /// A snapshot whose cloud copy cannot be found is reported as
    /// [`SnapshotInfo::Removed`] rather than failing.
    ///
    /// # Errors
    ///
    /// Returns [`EbsError::VolumeNotFound`] or [`EbsError::SnapshotNotFound`]
    /// when the local record is missing.
    pub async fn snapshot_info(&self, options: &SnapshotOptions) -> Result<SnapshotInfo, EbsError> {
        let _guard = self.lock.lock().await;
        self.snapshot_info_locked(options).await
    }

    /// Reads the snapshots of one volume, or of every volume, keyed by
    /// snapshot name.
    ///
    /// # Errors
    ///
    /// Returns lookup or store failures of the local records.
    pub async fn list_snapshots(
        &self,
        options: &ListSnapshotOptions,
    ) -> Result<BTreeMap<String, SnapshotInfo>, EbsError> {
        let _guard = self.lock.lock().await;
        let volume_names = match &options.volume_name {
            Some(name) => vec![name.clone()],
            None => self.list_volume_names()?,
        };

        let mut snapshots = BTreeMap::new();
        for volume_name in volume_names {
            let volume = self.load_volume(&volume_name)?;
            for name in volume.snapshots.keys() {
                let info = self
                    .snapshot_info_locked(&SnapshotOptions::new(name.clone(), volume_name.clone()))
                    .await?;
                snapshots.insert(name.clone(), info);
            }
        }
        Ok(snapshots)
    }

    /// Drops a snapshot from its volume record. The cloud snapshot is left
    /// in place; it is deleted through its backup reference.
    ///
    /// # Errors
    ///
    /// Returns [`EbsError::SnapshotNotFound`] when no such snapshot is
    /// recorded, and lookup or store failures otherwise.
    pub async fn remove_snapshot(&self, options: &SnapshotOptions) -> Result<(), EbsError> {
        let _guard = self.lock.lock().await;
        let mut volume = self.load_volume(&options.volume_name)?;
        let snapshot = find_snapshot(&volume, &options.name)?;
        debug!(
            snapshot = %snapshot.name,
            ebs_id = %snapshot.ebs_id,
            volume = %volume.name,
            volume_ebs_id = %volume.ebs_id,
            "removing snapshot record"
        );
        volume.snapshots.remove(&snapshot.name);
        self.save_volume(&volume)
    }
}
