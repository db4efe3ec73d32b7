//! Typed requests accepted by the storage client.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::CloudError;

/// Volume types offered by the provider.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    /// General purpose SSD.
    Gp2,
    /// Provisioned IOPS SSD; the only type accepting an IOPS value.
    Io1,
    /// Previous generation magnetic.
    Standard,
    /// Throughput optimised HDD.
    St1,
    /// Cold HDD.
    Sc1,
}

impl VolumeType {
    /// Every supported type.
    pub const ALL: [Self; 5] = [Self::Gp2, Self::Io1, Self::Standard, Self::St1, Self::Sc1];

    /// Provider name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gp2 => "gp2",
            Self::Io1 => "io1",
            Self::Standard => "standard",
            Self::St1 => "st1",
            Self::Sc1 => "sc1",
        }
    }

    /// Whether the type takes a provisioned IOPS value.
    #[must_use]
    pub const fn supports_iops(self) -> bool {
        matches!(self, Self::Io1)
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VolumeType {
    type Err = CloudError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| CloudError::Validation(format!("invalid volume type {value}")))
    }
}

/// Checks that IOPS is supplied for, and only for, the provisioned-IOPS type.
///
/// # Errors
///
/// Returns [`CloudError::Validation`] for any other combination.
pub fn check_iops(volume_type: Option<VolumeType>, iops: Option<u64>) -> Result<(), CloudError> {
    let requested = iops.filter(|value| *value > 0);
    let provisioned = volume_type.is_some_and(VolumeType::supports_iops);
    match (provisioned, requested) {
        (true, None) => Err(CloudError::Validation(format!(
            "invalid IOPS for volume type {}",
            VolumeType::Io1
        ))),
        (false, Some(_)) => Err(CloudError::Validation(format!(
            "IOPS only valid for volume type {}",
            VolumeType::Io1
        ))),
        _ => Ok(()),
    }
}

/// Parameters of [`super::StorageClient::create_volume`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateVolumeRequest {
    /// Requested size in bytes, rounded up to whole GiB.
    pub size_bytes: u64,
    /// Provisioned IOPS.
    pub iops: Option<u64>,
    /// Snapshot to restore from.
    pub snapshot_id: Option<String>,
    /// Volume type, provider default when absent.
    pub volume_type: Option<VolumeType>,
    /// Encryption key, ignored when restoring from a snapshot.
    pub kms_key_id: Option<String>,
    /// Tags applied once the volume is available.
    pub tags: BTreeMap<String, String>,
}

/// Parameters of [`super::StorageClient::create_snapshot`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateSnapshotRequest {
    /// Volume to snapshot.
    pub volume_id: String,
    /// Free-form description.
    pub description: String,
    /// Tags applied after creation.
    pub tags: BTreeMap<String, String>,
}
