//! Raw control-plane API surface and its wire types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendFuture;

/// Volume state reported while the provider allocates storage.
pub const VOLUME_CREATING: &str = "creating";
/// Volume state reported once the volume can be attached.
pub const VOLUME_AVAILABLE: &str = "available";
/// Volume state reported while the volume is attached.
pub const VOLUME_IN_USE: &str = "in-use";
/// Attachment state reported while an attach is in flight.
pub const ATTACHMENT_ATTACHING: &str = "attaching";
/// Attachment state reported once the attach completed.
pub const ATTACHMENT_ATTACHED: &str = "attached";
/// Snapshot state reported while data is being copied.
pub const SNAPSHOT_PENDING: &str = "pending";
/// Snapshot state reported once the snapshot is usable.
pub const SNAPSHOT_COMPLETED: &str = "completed";

/// Failure reported by the provider.
#[derive(Clone, Debug, Deserialize, Error, Eq, PartialEq, Serialize)]
pub struct ApiError {
    /// Provider error code (for example `InvalidVolume.NotFound`).
    pub code: String,
    /// Provider error message.
    pub message: String,
    /// HTTP status of the failed request, when one was received.
    #[serde(default)]
    pub status: Option<u16>,
    /// Provider request identifier, when one was returned.
    #[serde(default)]
    pub request_id: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        match (self.status, self.request_id.as_deref()) {
            (Some(code), Some(id)) => write!(f, " (status {code}, request {id})"),
            (Some(code), None) => write!(f, " (status {code})"),
            (None, Some(id)) => write!(f, " (request {id})"),
            (None, None) => Ok(()),
        }
    }
}

impl ApiError {
    /// Builds an error without transport details.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: None,
            request_id: None,
        }
    }
}

/// Identity of the host instance, as reported by the metadata service.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct InstanceIdentity {
    /// Instance identifier.
    pub instance_id: String,
    /// Home region of the instance.
    pub region: String,
    /// Availability zone of the instance.
    pub availability_zone: String,
}

/// One attachment of a volume to an instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VolumeAttachment {
    /// Instance the volume is attached to.
    pub instance_id: String,
    /// Device name requested at attach time.
    pub device: String,
    /// Attachment state.
    pub state: String,
}

/// Provider view of a volume.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VolumeDescriptor {
    /// Volume identifier.
    pub volume_id: String,
    /// Size in GiB.
    pub size_gib: u64,
    /// Top-level volume state.
    pub state: String,
    /// Volume type.
    pub volume_type: String,
    /// Provisioned IOPS, if any.
    #[serde(default)]
    pub iops: Option<u64>,
    /// Encryption key identifier, if the volume is encrypted.
    #[serde(default)]
    pub kms_key_id: Option<String>,
    /// Availability zone holding the volume.
    pub availability_zone: String,
    /// Snapshot the volume was restored from, if any.
    #[serde(default)]
    pub snapshot_id: Option<String>,
    /// Creation timestamp as reported by the provider.
    #[serde(default)]
    pub create_time: String,
    /// Current attachments.
    #[serde(default)]
    pub attachments: Vec<VolumeAttachment>,
}

/// Provider view of a snapshot.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SnapshotDescriptor {
    /// Snapshot identifier.
    pub snapshot_id: String,
    /// Source volume identifier.
    pub volume_id: String,
    /// Size of the source volume in GiB.
    pub volume_size_gib: u64,
    /// Snapshot state.
    pub state: String,
    /// Copy progress as reported by the provider (for example `42%`).
    #[serde(default)]
    pub progress: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Start timestamp as reported by the provider.
    #[serde(default)]
    pub start_time: String,
    /// Encryption key identifier, if the snapshot is encrypted.
    #[serde(default)]
    pub kms_key_id: Option<String>,
}

/// Parameters of a create-volume call.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CreateVolumeInput {
    /// Zone to create the volume in.
    pub availability_zone: String,
    /// Size in GiB.
    pub size_gib: u64,
    /// Volume type, provider default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    /// Provisioned IOPS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<u64>,
    /// Snapshot to restore from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    /// Encryption key; implies encryption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
}

/// Selects volumes in a describe call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VolumeFilter {
    /// Volumes with these identifiers.
    Ids(Vec<String>),
    /// Volumes attached to this instance.
    AttachedTo(String),
}

/// A tag as returned by a describe-tags call.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TagDescription {
    /// Resource carrying the tag.
    pub resource_id: String,
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

/// Raw block-storage control plane. One method per provider call; no
/// retries, no waiting.
pub trait ControlPlane: Send + Sync {
    /// Queries the metadata service for the host instance identity.
    fn instance_identity(&self) -> BackendFuture<'_, InstanceIdentity, ApiError>;

    /// Creates a volume and returns its identifier.
    fn create_volume<'a>(
        &'a self,
        region: &'a str,
        input: &'a CreateVolumeInput,
    ) -> BackendFuture<'a, String, ApiError>;

    /// Deletes a volume.
    fn delete_volume<'a>(
        &'a self,
        region: &'a str,
        volume_id: &'a str,
    ) -> BackendFuture<'a, (), ApiError>;

    /// Describes the volumes selected by `filter`.
    fn describe_volumes<'a>(
        &'a self,
        region: &'a str,
        filter: &'a VolumeFilter,
    ) -> BackendFuture<'a, Vec<VolumeDescriptor>, ApiError>;

    /// Requests that `volume_id` be attached to `instance_id` as `device`.
    fn attach_volume<'a>(
        &'a self,
        region: &'a str,
        volume_id: &'a str,
        instance_id: &'a str,
        device: &'a str,
    ) -> BackendFuture<'a, (), ApiError>;

    /// Requests that `volume_id` be detached from `instance_id`.
    fn detach_volume<'a>(
        &'a self,
        region: &'a str,
        volume_id: &'a str,
        instance_id: &'a str,
    ) -> BackendFuture<'a, (), ApiError>;

    /// Starts a snapshot of `volume_id` and returns the snapshot identifier.
    fn create_snapshot<'a>(
        &'a self,
        region: &'a str,
        volume_id: &'a str,
        description: &'a str,
    ) -> BackendFuture<'a, String, ApiError>;

    /// Describes the snapshots with the given identifiers.
    fn describe_snapshots<'a>(
        &'a self,
        region: &'a str,
        snapshot_ids: &'a [String],
    ) -> BackendFuture<'a, Vec<SnapshotDescriptor>, ApiError>;

    /// Deletes a snapshot.
    fn delete_snapshot<'a>(
        &'a self,
        region: &'a str,
        snapshot_id: &'a str,
    ) -> BackendFuture<'a, (), ApiError>;

    /// Copies `snapshot_id` from `source_region` into `region`, returning the
    /// identifier of the copy.
    fn copy_snapshot<'a>(
        &'a self,
        region: &'a str,
        source_region: &'a str,
        snapshot_id: &'a str,
    ) -> BackendFuture<'a, String, ApiError>;

    /// Sets tags on a resource.
    fn create_tags<'a>(
        &'a self,
        region: &'a str,
        resource_id: &'a str,
        tags: &'a BTreeMap<String, String>,
    ) -> BackendFuture<'a, (), ApiError>;

    /// Lists the tags of a resource.
    fn describe_tags<'a>(
        &'a self,
        region: &'a str,
        resource_id: &'a str,
    ) -> BackendFuture<'a, Vec<TagDescription>, ApiError>;
}
