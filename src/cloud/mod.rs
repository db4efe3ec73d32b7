//! Block-storage control plane access.
//!
//! [`ControlPlane`] is the raw provider API. [`StorageClient`] layers
//! validation, error context, state polling and device negotiation on top of
//! it. The client owns no persisted state; it is bound to the identity of the
//! host instance when constructed.

mod api;
mod error;
mod http;
mod types;
mod wait;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::device::{self, BlockDevices};
use crate::size::round_up_to_gib;

pub use api::{
    ATTACHMENT_ATTACHED, ATTACHMENT_ATTACHING, ApiError, ControlPlane, CreateVolumeInput,
    InstanceIdentity, SNAPSHOT_COMPLETED, SNAPSHOT_PENDING, SnapshotDescriptor, TagDescription,
    VOLUME_AVAILABLE, VOLUME_CREATING, VOLUME_IN_USE, VolumeAttachment, VolumeDescriptor,
    VolumeFilter,
};
pub use error::CloudError;
pub use http::{HttpControlPlane, HttpSettings};
pub use types::{CreateSnapshotRequest, CreateVolumeRequest, VolumeType, check_iops};
pub use wait::{DEFAULT_POLL_INTERVAL, PollPolicy};

fn exactly_one<T>(mut items: Vec<T>, resource: &'static str, id: &str) -> Result<T, CloudError> {
    let count = items.len();
    match items.pop() {
        Some(item) if count == 1 => Ok(item),
        _ => Err(CloudError::Inconsistent {
            resource,
            id: id.to_owned(),
            count,
        }),
    }
}

/// Storage client bound to one host instance.
#[derive(Clone)]
pub struct StorageClient {
    api: Arc<dyn ControlPlane>,
    devices: Arc<dyn BlockDevices>,
    identity: InstanceIdentity,
    poll: PollPolicy,
}

impl StorageClient {
    /// Creates a client for an already known instance identity.
    #[must_use]
    pub fn new(
        api: Arc<dyn ControlPlane>,
        devices: Arc<dyn BlockDevices>,
        identity: InstanceIdentity,
        poll: PollPolicy,
    ) -> Self {
        Self {
            api,
            devices,
            identity,
            poll,
        }
    }

    /// Creates a client, resolving the instance identity from the metadata
    /// service.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Provider`] when the identity lookup fails.
    pub async fn connect(
        api: Arc<dyn ControlPlane>,
        devices: Arc<dyn BlockDevices>,
        poll: PollPolicy,
    ) -> Result<Self, CloudError> {
        let identity = api
            .instance_identity()
            .await
            .map_err(|err| CloudError::provider("query instance metadata", err))?;
        debug!(
            instance_id = %identity.instance_id,
            region = %identity.region,
            zone = %identity.availability_zone,
            "resolved instance identity"
        );
        Ok(Self::new(api, devices, identity, poll))
    }

    /// Identity of the host instance.
    #[must_use]
    pub const fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    /// Home region of the client.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.identity.region
    }

    /// Creates a volume and waits for it to become available.
    ///
    /// When the volume never becomes available it is deleted (best effort)
    /// before the original failure is returned. Tags are applied best effort.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Validation`] for invalid type, IOPS or size
    /// combinations before any provider call, and provider or wait failures
    /// afterwards.
    pub async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<String, CloudError> {
        check_iops(request.volume_type, request.iops)?;
        let size_gib = round_up_to_gib(request.size_bytes);
        if size_gib == 0 {
            return Err(CloudError::Validation(String::from(
                "volume size must be greater than zero",
            )));
        }

        let input = CreateVolumeInput {
            availability_zone: self.identity.availability_zone.clone(),
            size_gib,
            volume_type: request.volume_type.map(|kind| kind.as_str().to_owned()),
            iops: request
                .iops
                .filter(|value| *value > 0 && request.volume_type.is_some()),
            snapshot_id: request.snapshot_id.clone(),
            kms_key_id: request
                .kms_key_id
                .clone()
                .filter(|_| request.snapshot_id.is_none()),
        };
        let volume_id = self
            .api
            .create_volume(self.region(), &input)
            .await
            .map_err(|err| {
                CloudError::provider(
                    format!(
                        "create volume of {size_gib} GiB from snapshot {:?}",
                        request.snapshot_id
                    ),
                    err,
                )
            })?;

        if let Err(err) = self
            .wait_for_volume_transition(&volume_id, VOLUME_CREATING, VOLUME_AVAILABLE)
            .await
        {
            warn!(%volume_id, error = %err, "volume did not become available, deleting it");
            if let Err(cleanup) = self.delete_volume(&volume_id).await {
                warn!(%volume_id, error = %cleanup, "failed to delete partially created volume");
            }
            return Err(err);
        }

        if !request.tags.is_empty()
            && let Err(err) = self.add_tags(&volume_id, &request.tags).await
        {
            warn!(%volume_id, error = %err, "unable to tag volume, continuing");
        }
        Ok(volume_id)
    }

    /// Deletes a volume.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Provider`] when the provider rejects the call.
    pub async fn delete_volume(&self, volume_id: &str) -> Result<(), CloudError> {
        self.api
            .delete_volume(self.region(), volume_id)
            .await
            .map_err(|err| CloudError::provider(format!("delete volume {volume_id}"), err))
    }

    /// Fetches the current descriptor of a volume.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Inconsistent`] unless exactly one volume matches.
    pub async fn get_volume(&self, volume_id: &str) -> Result<VolumeDescriptor, CloudError> {
        let filter = VolumeFilter::Ids(vec![volume_id.to_owned()]);
        let volumes = self
            .api
            .describe_volumes(self.region(), &filter)
            .await
            .map_err(|err| CloudError::provider(format!("describe volume {volume_id}"), err))?;
        exactly_one(volumes, "volume", volume_id)
    }

    async fn attached_devices(&self) -> Result<BTreeSet<String>, CloudError> {
        let filter = VolumeFilter::AttachedTo(self.identity.instance_id.clone());
        let volumes = self
            .api
            .describe_volumes(self.region(), &filter)
            .await
            .map_err(|err| {
                CloudError::provider(
                    format!("list volumes attached to {}", self.identity.instance_id),
                    err,
                )
            })?;
        Ok(volumes
            .into_iter()
            .filter_map(|volume| volume.attachments.into_iter().next())
            .map(|attachment| attachment.device)
            .collect())
    }

    /// Attaches a volume to the host and returns the OS device it appeared
    /// as, identified by `expected_bytes` of capacity.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Device`] when no device name is free or the new
    /// device cannot be identified, and provider or wait failures otherwise.
    pub async fn attach_volume(
        &self,
        volume_id: &str,
        expected_bytes: u64,
    ) -> Result<String, CloudError> {
        let attached = self.attached_devices().await?;
        let requested = device::find_free_device(&attached, &self.identity.instance_id)?;
        let before = self.devices.list()?;

        debug!(volume_id, instance_id = %self.identity.instance_id, device = %requested, "attaching volume");
        self.api
            .attach_volume(
                self.region(),
                volume_id,
                &self.identity.instance_id,
                &requested,
            )
            .await
            .map_err(|err| {
                CloudError::provider(
                    format!(
                        "attach volume {volume_id} to {} as {requested}",
                        self.identity.instance_id
                    ),
                    err,
                )
            })?;
        self.wait_for_attachment(volume_id).await?;

        let after = self.devices.list()?;
        let found = device::diff_attached_device(&before, &after, expected_bytes, |name| {
            self.devices.sector_count(name)
        })?;
        debug!(volume_id, device = %found, "volume attached");
        Ok(found)
    }

    /// Detaches a volume from the host and waits until it is available.
    ///
    /// # Errors
    ///
    /// Returns provider or wait failures.
    pub async fn detach_volume(&self, volume_id: &str) -> Result<(), CloudError> {
        self.api
            .detach_volume(self.region(), volume_id, &self.identity.instance_id)
            .await
            .map_err(|err| {
                CloudError::provider(
                    format!(
                        "detach volume {volume_id} from {}",
                        self.identity.instance_id
                    ),
                    err,
                )
            })?;
        self.wait_for_volume_transition(volume_id, VOLUME_IN_USE, VOLUME_AVAILABLE)
            .await
    }

    /// Starts a snapshot and returns its identifier. Tags are applied best
    /// effort.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Provider`] when the snapshot cannot be started.
    pub async fn create_snapshot(
        &self,
        request: &CreateSnapshotRequest,
    ) -> Result<String, CloudError> {
        let snapshot_id = self
            .api
            .create_snapshot(self.region(), &request.volume_id, &request.description)
            .await
            .map_err(|err| {
                CloudError::provider(format!("snapshot volume {}", request.volume_id), err)
            })?;
        if !request.tags.is_empty()
            && let Err(err) = self.add_tags(&snapshot_id, &request.tags).await
        {
            warn!(%snapshot_id, error = %err, "unable to tag snapshot, continuing");
        }
        Ok(snapshot_id)
    }

    /// Fetches a snapshot from the home region.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Inconsistent`] unless exactly one snapshot
    /// matches.
    pub async fn get_snapshot(&self, snapshot_id: &str) -> Result<SnapshotDescriptor, CloudError> {
        self.get_snapshot_with_region(snapshot_id, self.region())
            .await
    }

    /// Fetches a snapshot from `region`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Inconsistent`] unless exactly one snapshot
    /// matches.
    pub async fn get_snapshot_with_region(
        &self,
        snapshot_id: &str,
        region: &str,
    ) -> Result<SnapshotDescriptor, CloudError> {
        let ids = [snapshot_id.to_owned()];
        let snapshots = self
            .api
            .describe_snapshots(region, &ids)
            .await
            .map_err(|err| {
                CloudError::provider(format!("describe snapshot {snapshot_id} in {region}"), err)
            })?;
        exactly_one(snapshots, "snapshot", snapshot_id)
    }

    /// Copies a snapshot from `source_region` into the home region and
    /// returns the identifier of the copy.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Provider`] when the copy is rejected.
    pub async fn copy_snapshot(
        &self,
        snapshot_id: &str,
        source_region: &str,
    ) -> Result<String, CloudError> {
        self.api
            .copy_snapshot(self.region(), source_region, snapshot_id)
            .await
            .map_err(|err| {
                CloudError::provider(
                    format!(
                        "copy snapshot {snapshot_id} from {source_region} to {}",
                        self.region()
                    ),
                    err,
                )
            })
    }

    /// Deletes a snapshot in the home region.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Provider`] when the provider rejects the call.
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), CloudError> {
        self.delete_snapshot_with_region(snapshot_id, self.region())
            .await
    }

    /// Deletes a snapshot in `region`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Provider`] when the provider rejects the call.
    pub async fn delete_snapshot_with_region(
        &self,
        snapshot_id: &str,
        region: &str,
    ) -> Result<(), CloudError> {
        self.api
            .delete_snapshot(region, snapshot_id)
            .await
            .map_err(|err| {
                CloudError::provider(format!("delete snapshot {snapshot_id} in {region}"), err)
            })
    }

    /// Sets tags on a resource.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Provider`] when the provider rejects the call.
    pub async fn add_tags(
        &self,
        resource_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), CloudError> {
        debug!(resource_id, ?tags, "adding tags");
        self.api
            .create_tags(self.region(), resource_id, tags)
            .await
            .map_err(|err| CloudError::provider(format!("tag {resource_id}"), err))
    }

    /// Reads the tags of a resource.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::TagMismatch`] when the provider answers for a
    /// different resource.
    pub async fn get_tags(&self, resource_id: &str) -> Result<BTreeMap<String, String>, CloudError> {
        let tags = self
            .api
            .describe_tags(self.region(), resource_id)
            .await
            .map_err(|err| CloudError::provider(format!("describe tags of {resource_id}"), err))?;
        let mut result = BTreeMap::new();
        for tag in tags {
            if tag.resource_id != resource_id {
                return Err(CloudError::TagMismatch {
                    expected: resource_id.to_owned(),
                    found: tag.resource_id,
                });
            }
            result.insert(tag.key, tag.value);
        }
        Ok(result)
    }
}
