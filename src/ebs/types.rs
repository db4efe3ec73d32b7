//! Persisted driver records.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::cloud::VolumeType;

use super::{BACKEND_NAME, EbsError};

/// Record name of the driver configuration under the backend root.
pub const DEVICE_RECORD: &str = "ebs.cfg";
/// Prefix of every volume record name.
pub const VOLUME_RECORD_PREFIX: &str = "ebs_volume_";
/// Suffix of every volume record name.
pub const VOLUME_RECORD_SUFFIX: &str = ".json";

/// Per-backend configuration, written once at first initialisation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Device {
    /// Backend root directory.
    pub root: Utf8PathBuf,
    /// Size in bytes of volumes created without an explicit size.
    pub default_volume_size: u64,
    /// Type of volumes created without an explicit type.
    pub default_volume_type: VolumeType,
    /// Encryption key applied to fresh volumes, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_kms_key_id: Option<String>,
}

/// A managed volume.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Volume {
    /// Caller-chosen unique name.
    pub name: String,
    /// Cloud volume identifier.
    pub ebs_id: String,
    /// OS device the volume appeared as.
    pub device: String,
    /// Current mount point; empty while unmounted.
    #[serde(default)]
    pub mount_point: String,
    /// Snapshots keyed by name.
    #[serde(default)]
    pub snapshots: BTreeMap<String, Snapshot>,
}

impl Volume {
    /// Record name of the volume called `name`.
    #[must_use]
    pub fn record_name(name: &str) -> String {
        format!("{VOLUME_RECORD_PREFIX}{name}{VOLUME_RECORD_SUFFIX}")
    }

    /// Whether the volume is recorded as mounted.
    #[must_use]
    pub const fn is_mounted(&self) -> bool {
        !self.mount_point.is_empty()
    }
}

/// A point-in-time copy of a volume.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Snapshot {
    /// Snapshot name, unique within its volume.
    pub name: String,
    /// Name of the owning volume.
    pub volume_name: String,
    /// Cloud snapshot identifier.
    pub ebs_id: String,
}

/// Checks that `name` can be used as part of a record name.
pub(super) fn check_name(name: &str) -> Result<(), EbsError> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.contains('/') {
        "must not contain '/'"
    } else if name.starts_with('.') {
        "must not start with '.'"
    } else {
        return Ok(());
    };
    Err(EbsError::InvalidName {
        name: name.to_owned(),
        reason,
    })
}

/// Default mount point of the volume `name` under the backend root.
pub(super) fn default_mount_point(root: &Utf8Path, name: &str) -> Utf8PathBuf {
    root.join("mounts").join(name)
}

/// Tag key naming the owning volume of a snapshot.
pub(super) const TAG_VOLUME_NAME: &str = "VolumeName";
/// Tag key naming a snapshot.
pub(super) const TAG_SNAPSHOT_NAME: &str = "SnapshotName";

/// Description given to every snapshot the driver starts.
pub(super) fn snapshot_description() -> String {
    format!("{BACKEND_NAME} volume snapshot")
}
