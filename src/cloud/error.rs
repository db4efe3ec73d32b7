//! Errors raised by the storage client.

use thiserror::Error;

use super::ApiError;
use crate::device::DeviceError;

/// Errors raised by [`super::StorageClient`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudError {
    /// Request parameters were rejected before any provider call.
    #[error("invalid request: {0}")]
    Validation(String),
    /// A provider call failed.
    #[error("{context}: {source}")]
    Provider {
        /// Call and identifiers involved.
        context: String,
        /// Provider failure.
        #[source]
        source: ApiError,
    },
    /// A lookup by identifier did not return exactly one result.
    #[error("expected exactly one {resource} with id {id}, found {count}")]
    Inconsistent {
        /// Resource kind (`volume` or `snapshot`).
        resource: &'static str,
        /// Identifier that was looked up.
        id: String,
        /// Number of results returned.
        count: usize,
    },
    /// A describe-tags result referenced another resource.
    #[error("BUG: tags requested for {expected} but the result refers to {found}")]
    TagMismatch {
        /// Resource the tags were requested for.
        expected: String,
        /// Resource named by the result.
        found: String,
    },
    /// A wait observed a state outside the expected transition.
    #[error("{resource_id} did not reach {expected}: final state {found}")]
    UnexpectedState {
        /// Resource being waited on.
        resource_id: String,
        /// State the wait was expecting.
        expected: String,
        /// State actually observed.
        found: String,
    },
    /// A wait exceeded its configured deadline.
    #[error("timed out waiting to {action} {resource_id}")]
    Timeout {
        /// Action being awaited.
        action: String,
        /// Resource being waited on.
        resource_id: String,
    },
    /// Host device negotiation failed.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl CloudError {
    pub(super) fn provider(context: impl Into<String>, source: ApiError) -> Self {
        Self::Provider {
            context: context.into(),
            source,
        }
    }
}
