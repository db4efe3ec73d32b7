//! Local metadata persistence: one JSON document per record under a root
//! directory.
//!
//! Writes go to a uniquely named temporary file that is then renamed over the
//! target, so readers observe either the previous or the new record.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Errors raised by [`JsonStore`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a record cannot be encoded or decoded.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path of the offending record.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a record does not exist.
    #[error("record {path} does not exist")]
    NotFound {
        /// Path of the missing record.
        path: Utf8PathBuf,
    },
}

/// Directory of JSON records addressed by file name.
#[derive(Clone, Debug)]
pub struct JsonStore {
    root: Utf8PathBuf,
}

impl JsonStore {
    /// Creates a store rooted at `root`. Nothing is touched on disk until
    /// [`JsonStore::ensure_root`] or a write.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn io_error(&self, name: &str, err: &io::Error) -> StoreError {
        let path = self.root.join(name);
        if err.kind() == io::ErrorKind::NotFound {
            return StoreError::NotFound { path };
        }
        StoreError::Io {
            path,
            message: err.to_string(),
        }
    }

    fn open(&self) -> Result<Dir, StoreError> {
        Dir::open_ambient_dir(&self.root, ambient_authority()).map_err(|err| StoreError::Io {
            path: self.root.clone(),
            message: err.to_string(),
        })
    }

    /// Creates the root directory and any missing parents.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory cannot be created.
    pub fn ensure_root(&self) -> Result<(), StoreError> {
        Dir::create_ambient_dir_all(&self.root, ambient_authority()).map_err(|err| {
            StoreError::Io {
                path: self.root.clone(),
                message: err.to_string(),
            }
        })
    }

    /// Reports whether the record `name` exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the root cannot be inspected.
    pub fn exists(&self, name: &str) -> Result<bool, StoreError> {
        match Dir::open_ambient_dir(&self.root, ambient_authority()) {
            Ok(dir) => dir.try_exists(name).map_err(|err| self.io_error(name, &err)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::Io {
                path: self.root.clone(),
                message: err.to_string(),
            }),
        }
    }

    /// Loads and decodes the record `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the record is absent and
    /// [`StoreError::Parse`] when it is not valid JSON for `T`.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T, StoreError> {
        let contents = self
            .open()?
            .read_to_string(name)
            .map_err(|err| self.io_error(name, &err))?;
        serde_json::from_str(&contents).map_err(|err| StoreError::Parse {
            path: self.root.join(name),
            message: err.to_string(),
        })
    }

    /// Encodes and atomically replaces the record `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when encoding or any file operation fails.
    pub fn save<T: Serialize>(&self, name: &str, record: &T) -> Result<(), StoreError> {
        let rendered = serde_json::to_string_pretty(record).map_err(|err| StoreError::Parse {
            path: self.root.join(name),
            message: err.to_string(),
        })?;
        self.ensure_root()?;
        let dir = self.open()?;
        let temp_name = format!(".{name}.{}.tmp", Uuid::new_v4().simple());
        dir.write(&temp_name, rendered)
            .map_err(|err| self.io_error(&temp_name, &err))?;
        dir.rename(&temp_name, &dir, name).map_err(|err| {
            if let Err(cleanup) = dir.remove_file(&temp_name) {
                debug!(%temp_name, error = %cleanup, "failed to remove temporary record");
            }
            self.io_error(name, &err)
        })
    }

    /// Deletes the record `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the record is absent.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.open()?
            .remove_file(name)
            .map_err(|err| self.io_error(name, &err))
    }

    /// Lists record names starting with `prefix` and ending with `suffix`,
    /// returning the part in between in sorted order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory cannot be read.
    pub fn list_ids(&self, prefix: &str, suffix: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.open()?;
        let entries = dir.entries().map_err(|err| self.io_error("", &err))?;
        let mut ids = Vec::new();
        for entry in entries {
            let name = entry
                .and_then(|item| item.file_name())
                .map_err(|err| self.io_error("", &err))?;
            if let Some(id) = name
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(suffix))
                && !id.is_empty()
            {
                ids.push(id.to_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
    struct Record {
        name: String,
        size: u64,
    }

    fn temp_store(tmp: &TempDir) -> JsonStore {
        let root = Utf8PathBuf::from_path_buf(tmp.path().join("ebs"))
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        JsonStore::new(root)
    }

    fn record(name: &str) -> Record {
        Record {
            name: name.to_owned(),
            size: 4,
        }
    }

    #[test]
    fn save_then_load_returns_record() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let store = temp_store(&tmp);

        store
            .save("ebs_volume_vol1.json", &record("vol1"))
            .unwrap_or_else(|err| panic!("save: {err}"));

        assert_eq!(store.exists("ebs_volume_vol1.json"), Ok(true));
        let loaded: Record = store
            .load("ebs_volume_vol1.json")
            .unwrap_or_else(|err| panic!("load: {err}"));
        assert_eq!(loaded, record("vol1"));
    }

    #[test]
    fn save_leaves_no_temporary_files() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let store = temp_store(&tmp);
        store
            .save("ebs.cfg", &record("device"))
            .unwrap_or_else(|err| panic!("save: {err}"));
        store
            .save("ebs.cfg", &record("device"))
            .unwrap_or_else(|err| panic!("overwrite: {err}"));

        let names: Vec<_> = std::fs::read_dir(store.root())
            .expect("read root")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("ebs.cfg")]);
    }

    #[test]
    fn missing_records_report_not_found() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let store = temp_store(&tmp);
        store.ensure_root().unwrap_or_else(|err| panic!("root: {err}"));

        assert_eq!(store.exists("ebs.cfg"), Ok(false));
        assert!(matches!(
            store.load::<Record>("ebs.cfg"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete("ebs.cfg"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn exists_is_false_before_root_is_created() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        assert_eq!(temp_store(&tmp).exists("ebs.cfg"), Ok(false));
    }

    #[test]
    fn load_rejects_invalid_json() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let store = temp_store(&tmp);
        store.ensure_root().unwrap_or_else(|err| panic!("root: {err}"));
        std::fs::write(store.root().join("ebs.cfg"), "{not json").expect("seed");

        assert!(matches!(
            store.load::<Record>("ebs.cfg"),
            Err(StoreError::Parse { .. })
        ));
    }

    #[test]
    fn list_ids_filters_and_sorts() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let store = temp_store(&tmp);
        for name in ["vol2", "vol1"] {
            store
                .save(&format!("ebs_volume_{name}.json"), &record(name))
                .unwrap_or_else(|err| panic!("save: {err}"));
        }
        store
            .save("ebs.cfg", &record("device"))
            .unwrap_or_else(|err| panic!("save: {err}"));

        assert_eq!(
            store.list_ids("ebs_volume_", ".json"),
            Ok(vec![String::from("vol1"), String::from("vol2")])
        );
    }

    #[test]
    fn delete_removes_record() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let store = temp_store(&tmp);
        store
            .save("ebs_volume_vol1.json", &record("vol1"))
            .unwrap_or_else(|err| panic!("save: {err}"));
        store
            .delete("ebs_volume_vol1.json")
            .unwrap_or_else(|err| panic!("delete: {err}"));
        assert_eq!(store.exists("ebs_volume_vol1.json"), Ok(false));
    }
}
