//! JSON-over-HTTP control plane.
//!
//! Regional calls go to `{endpoint}/{region}/…`; instance identity comes from
//! the metadata service at `{metadata_endpoint}/meta-data/…`.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::api::{
    ApiError, ControlPlane, CreateVolumeInput, InstanceIdentity, SnapshotDescriptor,
    TagDescription, VolumeDescriptor, VolumeFilter,
};
use crate::backend::BackendFuture;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Connection settings for [`HttpControlPlane`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpSettings {
    /// Base URL of the control-plane API.
    pub endpoint: String,
    /// Base URL of the instance metadata service.
    pub metadata_endpoint: String,
    /// Region override; derived from the availability zone when absent.
    pub region: Option<String>,
    /// Bearer token sent with control-plane calls.
    pub token: Option<String>,
}

/// [`ControlPlane`] speaking JSON over HTTP.
#[derive(Clone, Debug)]
pub struct HttpControlPlane {
    settings: HttpSettings,
}

#[derive(Deserialize)]
struct IdReply {
    id: String,
}

#[derive(Deserialize)]
struct VolumesReply {
    #[serde(default)]
    volumes: Vec<VolumeDescriptor>,
}

#[derive(Deserialize)]
struct SnapshotsReply {
    #[serde(default)]
    snapshots: Vec<SnapshotDescriptor>,
}

#[derive(Deserialize)]
struct TagsReply {
    #[serde(default)]
    tags: Vec<TagDescription>,
}

#[derive(Serialize)]
struct AttachBody<'a> {
    instance_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a str>,
}

#[derive(Serialize)]
struct SnapshotBody<'a> {
    volume_id: &'a str,
    description: &'a str,
}

#[derive(Serialize)]
struct CopyBody<'a> {
    source_region: &'a str,
    source_snapshot_id: &'a str,
}

#[derive(Serialize)]
struct TagsBody<'a> {
    tags: &'a BTreeMap<String, String>,
}

/// Strips the trailing zone letter: `us-east-1a` → `us-east-1`.
fn region_from_zone(zone: &str) -> &str {
    zone.strip_suffix(|letter: char| letter.is_ascii_lowercase())
        .unwrap_or(zone)
}

fn transport_error(err: &reqwest::Error) -> ApiError {
    ApiError {
        status: err.status().map(|status| status.as_u16()),
        ..ApiError::new("RequestFailed", err.to_string())
    }
}

async fn reply_error(response: Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let mut error = serde_json::from_str::<ApiError>(&body)
        .unwrap_or_else(|_| ApiError::new(format!("Http{}", status.as_u16()), body.trim()));
    error.status = Some(status.as_u16());
    error
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    if !response.status().is_success() {
        return Err(reply_error(response).await);
    }
    response.json::<T>().await.map_err(|err| ApiError {
        status: err.status().map(|status| status.as_u16()),
        ..ApiError::new("InvalidResponse", err.to_string())
    })
}

async fn expect_success(response: Response) -> Result<(), ApiError> {
    if response.status().is_success() {
        return Ok(());
    }
    Err(reply_error(response).await)
}

impl HttpControlPlane {
    /// Creates a control plane client.
    #[must_use]
    pub const fn new(settings: HttpSettings) -> Self {
        Self { settings }
    }

    fn url(&self, region: &str, path: &str) -> String {
        format!(
            "{}/{region}/{path}",
            self.settings.endpoint.trim_end_matches('/')
        )
    }

    fn request(&self, method: Method, region: &str, path: &str) -> RequestBuilder {
        let url = self.url(region, path);
        debug!(%method, %url, "control plane request");
        let builder = HTTP_CLIENT.request(method, url);
        match &self.settings.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder) -> Result<Response, ApiError> {
        builder.send().await.map_err(|err| transport_error(&err))
    }

    async fn metadata(&self, path: &str) -> Result<String, ApiError> {
        let url = format!(
            "{}/meta-data/{path}",
            self.settings.metadata_endpoint.trim_end_matches('/')
        );
        let response = Self::send(HTTP_CLIENT.get(url)).await?;
        if !response.status().is_success() {
            return Err(reply_error(response).await);
        }
        let text = response.text().await.map_err(|err| transport_error(&err))?;
        Ok(text.trim().to_owned())
    }
}

impl ControlPlane for HttpControlPlane {
    fn instance_identity(&self) -> BackendFuture<'_, InstanceIdentity, ApiError> {
        Box::pin(async move {
            let instance_id = self.metadata("instance-id").await?;
            let availability_zone = self.metadata("placement/availability-zone").await?;
            let region = self
                .settings
                .region
                .clone()
                .unwrap_or_else(|| region_from_zone(&availability_zone).to_owned());
            Ok(InstanceIdentity {
                instance_id,
                region,
                availability_zone,
            })
        })
    }

    fn create_volume<'a>(
        &'a self,
        region: &'a str,
        input: &'a CreateVolumeInput,
    ) -> BackendFuture<'a, String, ApiError> {
        Box::pin(async move {
            let builder = self.request(Method::POST, region, "volumes").json(input);
            let reply: IdReply = read_json(Self::send(builder).await?).await?;
            Ok(reply.id)
        })
    }

    fn delete_volume<'a>(
        &'a self,
        region: &'a str,
        volume_id: &'a str,
    ) -> BackendFuture<'a, (), ApiError> {
        Box::pin(async move {
            let builder = self.request(Method::DELETE, region, &format!("volumes/{volume_id}"));
            expect_success(Self::send(builder).await?).await
        })
    }

    fn describe_volumes<'a>(
        &'a self,
        region: &'a str,
        filter: &'a VolumeFilter,
    ) -> BackendFuture<'a, Vec<VolumeDescriptor>, ApiError> {
        Box::pin(async move {
            let query: Vec<(&str, &str)> = match filter {
                VolumeFilter::Ids(ids) => ids.iter().map(|id| ("volume-id", id.as_str())).collect(),
                VolumeFilter::AttachedTo(instance_id) => {
                    vec![("attachment.instance-id", instance_id.as_str())]
                }
            };
            let builder = self.request(Method::GET, region, "volumes").query(&query);
            let reply: VolumesReply = read_json(Self::send(builder).await?).await?;
            Ok(reply.volumes)
        })
    }

    fn attach_volume<'a>(
        &'a self,
        region: &'a str,
        volume_id: &'a str,
        instance_id: &'a str,
        device: &'a str,
    ) -> BackendFuture<'a, (), ApiError> {
        Box::pin(async move {
            let builder = self
                .request(Method::POST, region, &format!("volumes/{volume_id}/attach"))
                .json(&AttachBody {
                    instance_id,
                    device: Some(device),
                });
            expect_success(Self::send(builder).await?).await
        })
    }

    fn detach_volume<'a>(
        &'a self,
        region: &'a str,
        volume_id: &'a str,
        instance_id: &'a str,
    ) -> BackendFuture<'a, (), ApiError> {
        Box::pin(async move {
            let builder = self
                .request(Method::POST, region, &format!("volumes/{volume_id}/detach"))
                .json(&AttachBody {
                    instance_id,
                    device: None,
                });
            expect_success(Self::send(builder).await?).await
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        region: &'a str,
        volume_id: &'a str,
        description: &'a str,
    ) -> BackendFuture<'a, String, ApiError> {
        Box::pin(async move {
            let builder = self
                .request(Method::POST, region, "snapshots")
                .json(&SnapshotBody {
                    volume_id,
                    description,
                });
            let reply: IdReply = read_json(Self::send(builder).await?).await?;
            Ok(reply.id)
        })
    }

    fn describe_snapshots<'a>(
        &'a self,
        region: &'a str,
        snapshot_ids: &'a [String],
    ) -> BackendFuture<'a, Vec<SnapshotDescriptor>, ApiError> {
        Box::pin(async move {
            let query: Vec<(&str, &str)> = snapshot_ids
                .iter()
                .map(|id| ("snapshot-id", id.as_str()))
                .collect();
            let builder = self.request(Method::GET, region, "snapshots").query(&query);
            let reply: SnapshotsReply = read_json(Self::send(builder).await?).await?;
            Ok(reply.snapshots)
        })
    }

    fn delete_snapshot<'a>(
        &'a self,
        region: &'a str,
        snapshot_id: &'a str,
    ) -> BackendFuture<'a, (), ApiError> {
        Box::pin(async move {
            let builder = self.request(
                Method::DELETE,
                region,
                &format!("snapshots/{snapshot_id}"),
            );
            expect_success(Self::send(builder).await?).await
        })
    }

    fn copy_snapshot<'a>(
        &'a self,
        region: &'a str,
        source_region: &'a str,
        snapshot_id: &'a str,
    ) -> BackendFuture<'a, String, ApiError> {
        Box::pin(async move {
            let builder = self
                .request(Method::POST, region, "snapshots/copy")
                .json(&CopyBody {
                    source_region,
                    source_snapshot_id: snapshot_id,
                });
            let reply: IdReply = read_json(Self::send(builder).await?).await?;
            Ok(reply.id)
        })
    }

    fn create_tags<'a>(
        &'a self,
        region: &'a str,
        resource_id: &'a str,
        tags: &'a BTreeMap<String, String>,
    ) -> BackendFuture<'a, (), ApiError> {
        Box::pin(async move {
            let builder = self
                .request(Method::PUT, region, &format!("tags/{resource_id}"))
                .json(&TagsBody { tags });
            expect_success(Self::send(builder).await?).await
        })
    }

    fn describe_tags<'a>(
        &'a self,
        region: &'a str,
        resource_id: &'a str,
    ) -> BackendFuture<'a, Vec<TagDescription>, ApiError> {
        Box::pin(async move {
            let builder = self
                .request(Method::GET, region, "tags")
                .query(&[("resource-id", resource_id)]);
            let reply: TagsReply = read_json(Self::send(builder).await?).await?;
            Ok(reply.tags)
        })
    }
}
