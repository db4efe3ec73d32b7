//! Errors raised by the EBS driver.

use thiserror::Error;

use crate::cloud::CloudError;
use crate::host::HostError;
use crate::size::SizeError;
use crate::store::StoreError;

/// Errors raised by [`super::EbsDriver`] operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EbsError {
    /// A driver configuration value was rejected at initialisation.
    #[error("invalid configuration {key}: {message}")]
    InvalidConfig {
        /// Configuration key.
        key: String,
        /// Why the value was rejected.
        message: String,
    },
    /// A volume or snapshot name cannot be used as a record key.
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// Offending name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// A volume record already exists.
    #[error("volume {0} already exists")]
    VolumeExists(String),
    /// No volume record exists.
    #[error("volume {0} does not exist")]
    VolumeNotFound(String),
    /// The volume already holds a snapshot of that name.
    #[error("snapshot {snapshot} of volume {volume} already exists")]
    SnapshotExists {
        /// Owning volume.
        volume: String,
        /// Snapshot name.
        snapshot: String,
    },
    /// The volume holds no snapshot of that name.
    #[error("cannot find snapshot {snapshot} of volume {volume}")]
    SnapshotNotFound {
        /// Owning volume.
        volume: String,
        /// Snapshot name.
        snapshot: String,
    },
    /// Both an existing cloud volume and a backup were supplied.
    #[error("cannot specify both an existing volume ({volume_id}) and a backup ({backup_url})")]
    ConflictingSource {
        /// Existing cloud volume identifier.
        volume_id: String,
        /// Backup reference.
        backup_url: String,
    },
    /// A backup lives outside the client's home region.
    #[error(
        "backup is in region {backup_region} but this host runs in {client_region}; copy the snapshot first"
    )]
    RegionMismatch {
        /// Region encoded in the backup reference.
        backup_region: String,
        /// Home region of the storage client.
        client_region: String,
    },
    /// A restore target is smaller than its source snapshot.
    #[error("requested size {requested} is smaller than snapshot size {snapshot}")]
    SizeBelowSnapshot {
        /// Requested size in bytes.
        requested: u64,
        /// Snapshot size in bytes.
        snapshot: u64,
    },
    /// A mount was requested at a different path than the current one.
    #[error("volume {name} is already mounted at {current}, cannot mount at {requested}")]
    MountPointConflict {
        /// Volume name.
        name: String,
        /// Recorded mount point.
        current: String,
        /// Mount point in the request.
        requested: String,
    },
    /// A backup reference could not be parsed.
    #[error("invalid backup URL {url}: {message}")]
    InvalidBackupUrl {
        /// Offending reference.
        url: String,
        /// Why it was rejected.
        message: String,
    },
    /// A backup reference with a foreign scheme reached this backend.
    #[error("BUG: backup URL with scheme {scheme} was dispatched to the ebs backend")]
    SchemeMismatch {
        /// Scheme of the reference.
        scheme: String,
    },
    /// Storage client failure.
    #[error(transparent)]
    Cloud(#[from] CloudError),
    /// Metadata store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Mount or format failure.
    #[error(transparent)]
    Host(#[from] HostError),
    /// Size parsing failure.
    #[error(transparent)]
    Size(#[from] SizeError),
}
