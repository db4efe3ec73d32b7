//! Explicit name → initializer registries for backends and executors.
//!
//! Both registries are built once during start-up and then only read. A
//! duplicate name is rejected as a defect rather than silently replaced.

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

use crate::backend::{BackendConfig, BackendError, BackendFuture, Executor, StorageBackend};

/// Initializer invoked with the backend root directory and its configuration.
pub type DriverInit = Box<
    dyn Fn(Utf8PathBuf, BackendConfig) -> BackendFuture<'static, Arc<dyn StorageBackend>, BackendError>
        + Send
        + Sync,
>;

/// Initializer producing one executor bound to a driver instance.
pub type ExecutorInit<D> = fn(Arc<D>) -> Result<Box<dyn Executor>, BackendError>;

fn duplicate(kind: &str, name: &str) -> BackendError {
    BackendError::DuplicateRegistration {
        kind: kind.to_owned(),
        name: name.to_owned(),
    }
}

/// Registry of storage backends keyed by backend name.
#[derive(Default)]
pub struct DriverRegistry {
    initializers: BTreeMap<String, DriverInit>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `init` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::DuplicateRegistration`] when `name` is taken.
    pub fn register(&mut self, name: &str, init: DriverInit) -> Result<(), BackendError> {
        if self.initializers.contains_key(name) {
            return Err(duplicate("backend", name));
        }
        self.initializers.insert(name.to_owned(), init);
        Ok(())
    }

    /// Returns the registered backend names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.initializers.keys().map(String::as_str).collect()
    }

    /// Initializes the backend `name`, rooted at `<root>/<name>`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UnknownBackend`] when nothing is registered
    /// under `name`, or the initializer's own failure.
    pub async fn get_driver(
        &self,
        name: &str,
        root: &Utf8Path,
        config: BackendConfig,
    ) -> Result<Arc<dyn StorageBackend>, BackendError> {
        let init = self
            .initializers
            .get(name)
            .ok_or_else(|| BackendError::UnknownBackend(name.to_owned()))?;
        init(root.join(name), config).await
    }
}

/// Registry of executors offered by a driver type `D`.
pub struct ExecutorRegistry<D> {
    initializers: BTreeMap<String, ExecutorInit<D>>,
}

impl<D> Default for ExecutorRegistry<D> {
    fn default() -> Self {
        Self {
            initializers: BTreeMap::new(),
        }
    }
}

impl<D> ExecutorRegistry<D> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `init` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::DuplicateRegistration`] when `name` is taken.
    pub fn register(&mut self, name: &str, init: ExecutorInit<D>) -> Result<(), BackendError> {
        if self.initializers.contains_key(name) {
            return Err(duplicate("executor", name));
        }
        self.initializers.insert(name.to_owned(), init);
        Ok(())
    }

    /// Returns the registered executor names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.initializers.keys().map(String::as_str).collect()
    }

    /// Builds the executors named by `hints` for `driver`.
    ///
    /// Unknown hints and failing initializers are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NoExecutors`] when nothing resolves.
    pub fn resolve(
        &self,
        driver: &Arc<D>,
        hints: &[&str],
    ) -> Result<BTreeMap<String, Box<dyn Executor>>, BackendError> {
        let mut executors = BTreeMap::new();
        for hint in hints {
            let Some(init) = self.initializers.get(*hint) else {
                warn!(hint, "executor not registered");
                continue;
            };
            match init(Arc::clone(driver)) {
                Ok(executor) => {
                    executors.insert((*hint).to_owned(), executor);
                }
                Err(err) => warn!(hint, error = %err, "failed to initialise executor"),
            }
        }

        if executors.is_empty() {
            return Err(BackendError::NoExecutors {
                hints: hints.iter().map(|hint| (*hint).to_owned()).collect(),
            });
        }
        Ok(executors)
    }
}
