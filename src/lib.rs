//! Core library for the volsnap block-storage orchestrator.
//!
//! The crate exposes a backend abstraction for cloud block volumes and an
//! `ebs` implementation that creates, attaches, formats, mounts, snapshots
//! and backs up volumes for the host it runs on. Local bookkeeping lives in
//! JSON records under a metadata root; the provider is reached through the
//! [`cloud::ControlPlane`] seam.

pub mod backend;
pub mod cloud;
pub mod config;
pub mod device;
pub mod ebs;
pub mod host;
pub mod registry;
pub mod size;
pub mod store;
pub mod test_support;

pub use backend::{
    BackendConfig, BackendError, BackendFuture, Executor, Request, Response, StorageBackend,
};
pub use cloud::{CloudError, ControlPlane, HttpControlPlane, PollPolicy, StorageClient};
pub use config::{ConfigError, VolsnapConfig};
pub use ebs::{BackupRef, Collaborators, EbsDriver, EbsError};
pub use registry::{DriverRegistry, ExecutorRegistry};
