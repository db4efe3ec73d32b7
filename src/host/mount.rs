//! Filesystem mount, unmount and format wrappers.

use std::ffi::OsString;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::debug;

use super::{CommandRunner, HostError};

/// Filesystem created on freshly provisioned volumes.
pub const DEFAULT_FILESYSTEM: &str = "ext4";

const MOUNT_BIN: &str = "mount";
const UMOUNT_BIN: &str = "umount";
const MKFS_BIN: &str = "mkfs";
const MOUNT_TABLE: &str = "/proc/self/mounts";

/// Mounts, unmounts and formats block devices.
pub trait Mounter: Send + Sync {
    /// Mounts `device` at `mount_point`, creating the directory when needed.
    /// Mounting an already mounted point is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the directory or the mount command fails.
    fn mount(&self, device: &str, mount_point: &Utf8Path) -> Result<(), HostError>;

    /// Unmounts `mount_point`. Unmounting a point that is not mounted is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the unmount command fails.
    fn umount(&self, mount_point: &Utf8Path) -> Result<(), HostError>;

    /// Creates a `fs_type` filesystem on `device`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when `mkfs` fails.
    fn format(&self, device: &str, fs_type: &str) -> Result<(), HostError>;

    /// Reports whether something is mounted at `mount_point`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] when the mount table cannot be read.
    fn is_mounted(&self, mount_point: &Utf8Path) -> Result<bool, HostError>;
}

/// [`Mounter`] shelling out to `mount`, `umount` and `mkfs`.
#[derive(Clone, Debug)]
pub struct CommandMounter<R: CommandRunner> {
    runner: R,
    mount_table: Utf8PathBuf,
}

impl<R: CommandRunner> CommandMounter<R> {
    /// Creates a mounter reading `/proc/self/mounts`.
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self::with_mount_table(runner, MOUNT_TABLE)
    }

    /// Creates a mounter reading an alternative mount table.
    #[must_use]
    pub fn with_mount_table(runner: R, mount_table: impl Into<Utf8PathBuf>) -> Self {
        Self {
            runner,
            mount_table: mount_table.into(),
        }
    }

    fn run(&self, program: &str, args: Vec<OsString>) -> Result<(), HostError> {
        debug!(program, ?args, "running host command");
        self.runner.run(program, &args)?.into_result(program)?;
        Ok(())
    }

    fn read_mount_table(&self) -> Result<String, HostError> {
        let io_error = |err: io::Error| HostError::Io {
            path: self.mount_table.clone(),
            message: err.to_string(),
        };
        let parent = self
            .mount_table
            .parent()
            .unwrap_or_else(|| Utf8Path::new("/"));
        let file_name = self.mount_table.file_name().ok_or_else(|| HostError::Io {
            path: self.mount_table.clone(),
            message: String::from("mount table path is missing a filename"),
        })?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(io_error)?;
        dir.read_to_string(file_name).map_err(io_error)
    }
}

fn escape_mount_point(mount_point: &Utf8Path) -> String {
    mount_point
        .as_str()
        .replace('\\', "\\134")
        .replace(' ', "\\040")
        .replace('\t', "\\011")
        .replace('\n', "\\012")
}

fn ensure_dir(path: &Utf8Path) -> Result<(), HostError> {
    Dir::create_ambient_dir_all(path, ambient_authority()).map_err(|err| HostError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

impl<R: CommandRunner> Mounter for CommandMounter<R> {
    fn mount(&self, device: &str, mount_point: &Utf8Path) -> Result<(), HostError> {
        ensure_dir(mount_point)?;
        if self.is_mounted(mount_point)? {
            debug!(%mount_point, "already mounted");
            return Ok(());
        }
        self.run(
            MOUNT_BIN,
            vec![OsString::from(device), OsString::from(mount_point.as_str())],
        )
    }

    fn umount(&self, mount_point: &Utf8Path) -> Result<(), HostError> {
        if !self.is_mounted(mount_point)? {
            debug!(%mount_point, "not mounted, nothing to unmount");
            return Ok(());
        }
        self.run(UMOUNT_BIN, vec![OsString::from(mount_point.as_str())])
    }

    fn format(&self, device: &str, fs_type: &str) -> Result<(), HostError> {
        self.run(
            MKFS_BIN,
            vec![
                OsString::from("-t"),
                OsString::from(fs_type),
                OsString::from(device),
            ],
        )
    }

    fn is_mounted(&self, mount_point: &Utf8Path) -> Result<bool, HostError> {
        let table = self.read_mount_table()?;
        let wanted = escape_mount_point(mount_point);
        Ok(table
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|target| target == wanted))
    }
}
