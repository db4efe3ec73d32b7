//! Backups are references to completed cloud snapshots.

use tracing::debug;

use crate::cloud::SnapshotDescriptor;

use super::options::SnapshotOptions;
use super::{BackupRef, EbsDriver, EbsError};

impl EbsDriver {
    /// Waits for a recorded snapshot to finish and returns its backup
    /// reference.
    ///
    /// The driver lock is only held while the snapshot record is read.
    ///
    /// # Errors
    ///
    /// Returns lookup failures for the snapshot record and provider or wait
    /// failures afterwards.
    pub async fn create_backup(&self, options: &SnapshotOptions) -> Result<BackupRef, EbsError> {
        let snapshot = {
            let _guard = self.lock.lock().await;
            self.load_snapshot(options)?
        };
        self.client
            .wait_for_snapshot_complete(&snapshot.ebs_id)
            .await?;
        let backup = BackupRef::new(self.client.region(), snapshot.ebs_id);
        debug!(snapshot = %options.name, volume = %options.volume_name, backup = %backup, "created backup");
        Ok(backup)
    }

    /// Describes the snapshot behind a backup, in the backup's region.
    ///
    /// # Errors
    ///
    /// Returns provider failures, including a missing snapshot.
    pub async fn backup_info(&self, backup: &BackupRef) -> Result<SnapshotDescriptor, EbsError> {
        Ok(self
            .client
            .get_snapshot_with_region(&backup.snapshot_id, &backup.region)
            .await?)
    }

    /// Deletes the snapshot behind a backup, in the backup's region.
    ///
    /// # Errors
    ///
    /// Returns provider failures.
    pub async fn delete_backup(&self, backup: &BackupRef) -> Result<(), EbsError> {
        self.client
            .delete_snapshot_with_region(&backup.snapshot_id, &backup.region)
            .await?;
        debug!(backup = %backup, "deleted backup");
        Ok(())
    }
}
