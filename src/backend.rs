//! Backend abstraction: named storage backends hand out executors that run
//! a single operation each.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::ebs::EbsError;

/// String-keyed configuration passed to a backend initializer.
pub type BackendConfig = BTreeMap<String, String>;

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Input of a single executor invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Request {
    /// Primary subject of the operation, usually a volume or snapshot name.
    pub name: String,
    /// Operation specific options.
    pub options: BTreeMap<String, String>,
}

impl Request {
    /// Creates a request for `name` with no options.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: BTreeMap::new(),
        }
    }

    /// Adds an option, replacing any previous value for `key`.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Returns the trimmed value of `key` when present and non-blank.
    #[must_use]
    pub fn optional(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Returns the trimmed value of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::MissingOption`] naming `key` when the option is
    /// absent or blank.
    pub fn required(&self, key: &str) -> Result<&str, BackendError> {
        self.optional(key)
            .ok_or_else(|| BackendError::MissingOption(key.to_owned()))
    }
}

/// Output of a single executor invocation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Response {
    /// Loosely typed result values keyed by field name.
    pub values: BTreeMap<String, Value>,
}

impl Response {
    /// Creates a response without values.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds a value to the response.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Returns the string stored under `key`, if any.
    #[must_use]
    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }
}

/// Errors raised at the backend boundary.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when a required option is absent.
    #[error("missing required option: {0}")]
    MissingOption(String),
    /// Raised when an option cannot be interpreted.
    #[error("invalid value for option {key}: {message}")]
    InvalidOption {
        /// Option key.
        key: String,
        /// Why the value was rejected.
        message: String,
    },
    /// Raised when a name is registered twice. Registrations happen once at
    /// start-up, so this is a programming defect.
    #[error("BUG: {kind} '{name}' has already been registered")]
    DuplicateRegistration {
        /// Registry kind (`backend` or `executor`).
        kind: String,
        /// Duplicated name.
        name: String,
    },
    /// Raised when no backend is registered under the requested name.
    #[error("storage backend '{0}' is not supported")]
    UnknownBackend(String),
    /// Raised when none of the hints resolve to an executor.
    #[error("no executors found with hints {hints:?}")]
    NoExecutors {
        /// Hints supplied by the caller.
        hints: Vec<String>,
    },
    /// Failure reported by the EBS driver.
    #[error(transparent)]
    Ebs(#[from] EbsError),
}

/// A single named operation obtained from a backend.
pub trait Executor: Send + Sync {
    /// Runs the operation.
    fn exec<'a>(&'a self, request: &'a Request) -> BackendFuture<'a, Response, BackendError>;
}

/// A storage provider integration registered under a unique name.
pub trait StorageBackend: Send + Sync {
    /// Unique backend name.
    fn name(&self) -> &'static str;

    /// Descriptive key/value information about the backend instance.
    fn info(&self) -> BTreeMap<String, String>;

    /// Resolves executors by hint. Unknown hints are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NoExecutors`] when no hint resolves.
    fn executors(
        self: Arc<Self>,
        hints: &[&str],
    ) -> Result<BTreeMap<String, Box<dyn Executor>>, BackendError>;
}
