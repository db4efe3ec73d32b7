//! Typed per-operation options parsed from the string-keyed request map.

use camino::Utf8PathBuf;

use crate::backend::{BackendError, Request};
use crate::cloud::VolumeType;
use crate::size::parse_size;

use super::{BackupRef, EbsError};

/// Mount point of a volume.
pub const OPT_MOUNT_POINT: &str = "MountPoint";
/// Requested volume size, for example `8G`.
pub const OPT_SIZE: &str = "Size";
/// Owning volume name.
pub const OPT_VOLUME_NAME: &str = "VolumeName";
/// Existing cloud volume to adopt.
pub const OPT_VOLUME_DRIVER_ID: &str = "VolumeDriverID";
/// Volume type.
pub const OPT_VOLUME_TYPE: &str = "VolumeType";
/// Provisioned IOPS.
pub const OPT_VOLUME_IOPS: &str = "VolumeIOPS";
/// Snapshot name.
pub const OPT_SNAPSHOT_NAME: &str = "SnapshotName";
/// Backup reference.
pub const OPT_BACKUP_URL: &str = "BackupURL";
/// Remove only the local record.
pub const OPT_REFERENCE_ONLY: &str = "ReferenceOnly";
/// Creation timestamp of a volume.
pub const OPT_VOLUME_CREATED_TIME: &str = "VolumeCreatedAt";
/// Creation timestamp of a snapshot.
pub const OPT_SNAPSHOT_CREATED_TIME: &str = "SnapshotCreatedAt";

fn invalid(key: &str, message: impl Into<String>) -> BackendError {
    BackendError::InvalidOption {
        key: key.to_owned(),
        message: message.into(),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, BackendError> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        other => Err(invalid(key, format!("'{other}' is not a boolean"))),
    }
}

/// Where the data of a new volume comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VolumeSource {
    /// A new, empty volume that is formatted after attach.
    Fresh,
    /// An existing cloud volume, adopted as is.
    Existing(String),
    /// A volume restored from a backup in the home region.
    Backup(BackupRef),
}

/// Options of the create-volume operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateVolumeOptions {
    /// Volume name.
    pub name: String,
    /// Requested size in bytes; `None` selects the source or driver default.
    pub size: Option<u64>,
    /// Requested type; `None` selects the driver default.
    pub volume_type: Option<VolumeType>,
    /// Provisioned IOPS.
    pub iops: Option<u64>,
    /// Data source.
    pub source: VolumeSource,
}

impl CreateVolumeOptions {
    /// Creates options for a fresh volume with driver defaults.
    #[must_use]
    pub fn fresh(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            volume_type: None,
            iops: None,
            source: VolumeSource::Fresh,
        }
    }

    /// Parses the options of `request`.
    ///
    /// A `Size` of `0` means "use the default", matching an absent size.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidOption`] for unparsable values and
    /// [`EbsError::ConflictingSource`] when both an existing volume and a
    /// backup are named.
    pub fn parse(request: &Request) -> Result<Self, BackendError> {
        let size = request
            .optional(OPT_SIZE)
            .filter(|raw| *raw != "0")
            .map(|raw| parse_size(raw).map_err(|err| invalid(OPT_SIZE, err.to_string())))
            .transpose()?;
        let volume_type = request
            .optional(OPT_VOLUME_TYPE)
            .map(|raw| {
                raw.parse::<VolumeType>()
                    .map_err(|err| invalid(OPT_VOLUME_TYPE, err.to_string()))
            })
            .transpose()?;
        let iops = request
            .optional(OPT_VOLUME_IOPS)
            .map(|raw| {
                raw.parse::<u64>()
                    .map_err(|err| invalid(OPT_VOLUME_IOPS, err.to_string()))
            })
            .transpose()?;

        let source = match (
            request.optional(OPT_VOLUME_DRIVER_ID),
            request.optional(OPT_BACKUP_URL),
        ) {
            (Some(volume_id), Some(backup_url)) => {
                return Err(EbsError::ConflictingSource {
                    volume_id: volume_id.to_owned(),
                    backup_url: backup_url.to_owned(),
                }
                .into());
            }
            (Some(volume_id), None) => VolumeSource::Existing(volume_id.to_owned()),
            (None, Some(backup_url)) => VolumeSource::Backup(BackupRef::decode(backup_url)?),
            (None, None) => VolumeSource::Fresh,
        };

        Ok(Self {
            name: request.name.clone(),
            size,
            volume_type,
            iops,
            source,
        })
    }
}

/// Options of the remove-volume operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoveVolumeOptions {
    /// Volume name.
    pub name: String,
    /// Keep the cloud volume and drop only the local record.
    pub reference_only: bool,
}

impl RemoveVolumeOptions {
    /// Parses the options of `request`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidOption`] when `ReferenceOnly` is not a
    /// boolean.
    pub fn parse(request: &Request) -> Result<Self, BackendError> {
        let reference_only = request
            .optional(OPT_REFERENCE_ONLY)
            .map(|raw| parse_bool(OPT_REFERENCE_ONLY, raw))
            .transpose()?
            .unwrap_or(false);
        Ok(Self {
            name: request.name.clone(),
            reference_only,
        })
    }
}

/// Options of the mount-volume operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountVolumeOptions {
    /// Volume name.
    pub name: String,
    /// Requested mount point; the recorded or default one when absent.
    pub mount_point: Option<Utf8PathBuf>,
}

impl MountVolumeOptions {
    /// Parses the options of `request`.
    #[must_use]
    pub fn parse(request: &Request) -> Self {
        Self {
            name: request.name.clone(),
            mount_point: request.optional(OPT_MOUNT_POINT).map(Utf8PathBuf::from),
        }
    }
}

/// Addresses one snapshot of one volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotOptions {
    /// Snapshot name.
    pub name: String,
    /// Owning volume name.
    pub volume_name: String,
}

impl SnapshotOptions {
    /// Creates options addressing `name` of `volume_name`.
    #[must_use]
    pub fn new(name: impl Into<String>, volume_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            volume_name: volume_name.into(),
        }
    }

    /// Parses a request whose name is the snapshot and whose `VolumeName`
    /// option is the owning volume.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::MissingOption`] without `VolumeName`.
    pub fn parse(request: &Request) -> Result<Self, BackendError> {
        Ok(Self::new(
            request.name.clone(),
            request.required(OPT_VOLUME_NAME)?,
        ))
    }

    /// Parses a request naming both parts through `SnapshotName` and
    /// `VolumeName` options, as backup creation does.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::MissingOption`] naming the absent key.
    pub fn parse_named(request: &Request) -> Result<Self, BackendError> {
        Ok(Self::new(
            request.required(OPT_SNAPSHOT_NAME)?,
            request.required(OPT_VOLUME_NAME)?,
        ))
    }
}

/// Options of the list-snapshot operation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ListSnapshotOptions {
    /// Restrict the listing to one volume.
    pub volume_name: Option<String>,
}

impl ListSnapshotOptions {
    /// Parses the options of `request`.
    #[must_use]
    pub fn parse(request: &Request) -> Self {
        Self {
            volume_name: request.optional(OPT_VOLUME_NAME).map(str::to_owned),
        }
    }
}

/// Parses the `BackupURL` option of `request`.
///
/// # Errors
///
/// Returns [`BackendError::MissingOption`] when absent and the decode
/// failure otherwise.
pub fn backup_from(request: &Request) -> Result<BackupRef, BackendError> {
    Ok(BackupRef::decode(request.required(OPT_BACKUP_URL)?)?)
}
