//! Shared driver harness for behavioural tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Include this module via:
//!
//! ```rust
//! #[path = "common/harness.rs"]
//! mod harness;
//! ```

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use volsnap::backend::{BackendConfig, StorageBackend};
use volsnap::cloud::PollPolicy;
use volsnap::ebs::{BACKEND_NAME, Collaborators, EbsDriver, register};
use volsnap::registry::DriverRegistry;
use volsnap::test_support::{RecordingMounter, SimulatedCloud};

/// A simulated host with a metadata root in a temporary directory.
pub struct Harness {
    pub cloud: Arc<SimulatedCloud>,
    pub mounter: RecordingMounter,
    pub root: Utf8PathBuf,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().join("ebs")).expect("utf8 temp path");
        Self {
            cloud: Arc::new(SimulatedCloud::new()),
            mounter: RecordingMounter::new(),
            root,
            _dir: dir,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            api: self.cloud.clone(),
            devices: self.cloud.clone(),
            mounter: Arc::new(self.mounter.clone()),
            poll: PollPolicy::immediate().with_timeout(Duration::from_secs(5)),
        }
    }

    pub async fn driver(&self) -> EbsDriver {
        self.driver_with(&BackendConfig::new()).await
    }

    pub async fn driver_with(&self, config: &BackendConfig) -> EbsDriver {
        EbsDriver::init(self.root.clone(), config, self.collaborators())
            .await
            .expect("driver should initialise")
    }

    /// Builds the backend the way the binary does, through the registry.
    pub async fn backend(&self) -> Arc<dyn StorageBackend> {
        let parent = self.root.parent().expect("root has a parent").to_owned();
        let mut registry = DriverRegistry::new();
        register(&mut registry, self.collaborators()).expect("register ebs");
        registry
            .get_driver(BACKEND_NAME, &parent, BackendConfig::new())
            .await
            .expect("backend should initialise")
    }
}
