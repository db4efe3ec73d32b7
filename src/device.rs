//! Device negotiation for newly attached cloud volumes.
//!
//! The provider accepts a requested device name during attach, but the guest
//! kernel is free to expose the disk under another name (NVMe instances rename
//! everything). The requested name therefore only has to be unused on the
//! provider side, and the real OS device is re-derived afterwards by diffing
//! the host's block-device list and matching on capacity.

use std::collections::BTreeSet;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Bytes per sector reported by `/sys/block/<dev>/size`.
pub const SECTOR_SIZE: u64 = 512;

/// Prefix of device names recommended by the provider for data volumes.
pub const DEVICE_PREFIX: &str = "/dev/sd";

const DEVICE_LETTERS: &str = "fghijklmnop";
const SYS_BLOCK: &str = "/sys/block";

/// Errors raised while negotiating or discovering devices.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DeviceError {
    /// Every recommended device name is already in use.
    #[error("cannot find an available device for instance {instance_id}")]
    NoFreeDevice {
        /// Instance whose attachments exhausted the pool.
        instance_id: String,
    },
    /// No newly appeared device matched the expected size.
    #[error("cannot find a newly attached device of {expected_bytes} bytes")]
    NoMatchingDevice {
        /// Capacity the device was expected to report.
        expected_bytes: u64,
    },
    /// More than one newly appeared device matched the expected size.
    #[error("found more than one device matching {expected_bytes} bytes: {first} and {second}")]
    AmbiguousDevice {
        /// Capacity the devices reported.
        expected_bytes: u64,
        /// First matching device.
        first: String,
        /// Second matching device.
        second: String,
    },
    /// Reading the host block-device view failed.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// A device reported a size that is not a sector count.
    #[error("device {device} reported an invalid sector count '{raw}'")]
    InvalidSectorCount {
        /// Device name.
        device: String,
        /// Raw value read from the host.
        raw: String,
    },
}

/// Returns the device names recommended for data volumes, in preference order.
#[must_use]
pub fn recommended_devices() -> Vec<String> {
    DEVICE_LETTERS
        .chars()
        .map(|letter| format!("{DEVICE_PREFIX}{letter}"))
        .collect()
}

/// Returns the first recommended device not present in `attached`.
///
/// # Errors
///
/// Returns [`DeviceError::NoFreeDevice`] when the pool is exhausted.
pub fn find_free_device(
    attached: &BTreeSet<String>,
    instance_id: &str,
) -> Result<String, DeviceError> {
    recommended_devices()
        .into_iter()
        .find(|device| !attached.contains(device))
        .ok_or_else(|| DeviceError::NoFreeDevice {
            instance_id: instance_id.to_owned(),
        })
}

/// Identifies the single device that appeared between `before` and `after`
/// with a capacity of exactly `expected_bytes`.
///
/// `sector_count` is consulted only for devices absent from `before`. The
/// returned path is prefixed with `/dev/`.
///
/// # Errors
///
/// Returns [`DeviceError::NoMatchingDevice`] or
/// [`DeviceError::AmbiguousDevice`] when zero or several devices match, and
/// propagates failures from `sector_count`.
pub fn diff_attached_device<F>(
    before: &BTreeSet<String>,
    after: &BTreeSet<String>,
    expected_bytes: u64,
    mut sector_count: F,
) -> Result<String, DeviceError>
where
    F: FnMut(&str) -> Result<u64, DeviceError>,
{
    let mut matched: Option<&str> = None;
    for device in after.difference(before) {
        let bytes = sector_count(device)?.saturating_mul(SECTOR_SIZE);
        if bytes != expected_bytes {
            continue;
        }
        if let Some(first) = matched {
            return Err(DeviceError::AmbiguousDevice {
                expected_bytes,
                first: first.to_owned(),
                second: device.clone(),
            });
        }
        matched = Some(device);
    }

    matched
        .map(|device| format!("/dev/{device}"))
        .ok_or(DeviceError::NoMatchingDevice { expected_bytes })
}

/// Read-only view of the host's block devices.
pub trait BlockDevices: Send + Sync {
    /// Lists block-device names (for example `xvdf` or `nvme1n1`).
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Io`] when the listing cannot be read.
    fn list(&self) -> Result<BTreeSet<String>, DeviceError>;

    /// Returns the size of `device` in sectors.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] when the size cannot be read or parsed.
    fn sector_count(&self, device: &str) -> Result<u64, DeviceError>;
}

/// [`BlockDevices`] backed by the kernel's `/sys/block` directory.
#[derive(Clone, Debug)]
pub struct SysfsBlockDevices {
    root: Utf8PathBuf,
}

impl SysfsBlockDevices {
    /// Reads devices from `/sys/block`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root(SYS_BLOCK)
    }

    /// Reads devices from an alternative sysfs-style directory.
    #[must_use]
    pub fn with_root(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn open(&self) -> Result<Dir, DeviceError> {
        Dir::open_ambient_dir(&self.root, ambient_authority())
            .map_err(|err| io_error(&self.root, &err))
    }
}

impl Default for SysfsBlockDevices {
    fn default() -> Self {
        Self::new()
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> DeviceError {
    DeviceError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

impl BlockDevices for SysfsBlockDevices {
    fn list(&self) -> Result<BTreeSet<String>, DeviceError> {
        let dir = self.open()?;
        let entries = dir.entries().map_err(|err| io_error(&self.root, &err))?;
        let mut devices = BTreeSet::new();
        for entry in entries {
            let name = entry
                .and_then(|item| item.file_name())
                .map_err(|err| io_error(&self.root, &err))?;
            devices.insert(name);
        }
        Ok(devices)
    }

    fn sector_count(&self, device: &str) -> Result<u64, DeviceError> {
        let relative = Utf8PathBuf::from(device).join("size");
        let raw = self
            .open()?
            .read_to_string(&relative)
            .map_err(|err| io_error(&self.root.join(&relative), &err))?;
        raw.trim()
            .parse()
            .map_err(|_| DeviceError::InvalidSectorCount {
                device: device.to_owned(),
                raw: raw.trim().to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|item| (*item).to_owned()).collect()
    }

    #[test]
    fn recommended_devices_cover_f_to_p() {
        let devices = recommended_devices();
        assert_eq!(devices.len(), 11);
        assert_eq!(devices.first().map(String::as_str), Some("/dev/sdf"));
        assert_eq!(devices.last().map(String::as_str), Some("/dev/sdp"));
    }

    #[rstest]
    #[case(&[], "/dev/sdf")]
    #[case(&["/dev/sdf", "/dev/sdg"], "/dev/sdh")]
    #[case(&["/dev/sda1", "/dev/xvdf", "/dev/sdf"], "/dev/sdg")]
    fn find_free_device_skips_attached(#[case] attached: &[&str], #[case] expected: &str) {
        assert_eq!(find_free_device(&set(attached), "i-1").as_deref(), Ok(expected));
    }

    #[test]
    fn find_free_device_fails_when_pool_is_exhausted() {
        let attached: BTreeSet<String> = recommended_devices().into_iter().collect();
        assert_eq!(
            find_free_device(&attached, "i-1"),
            Err(DeviceError::NoFreeDevice {
                instance_id: String::from("i-1")
            })
        );
    }

    fn sectors(device: &str) -> Result<u64, DeviceError> {
        match device {
            "xvdf" | "nvme1n1" => Ok(8_388_608),
            _ => Ok(2_097_152),
        }
    }

    #[test]
    fn diff_returns_single_matching_device() {
        let before = set(&["xvda", "loop0"]);
        let after = set(&["xvda", "loop0", "xvdf"]);
        let found = diff_attached_device(&before, &after, 4 << 30, sectors);
        assert_eq!(found.as_deref(), Ok("/dev/xvdf"));
    }

    #[test]
    fn diff_ignores_devices_present_before_attach() {
        let before = set(&["xvdf"]);
        let after = set(&["xvdf", "xvdg"]);
        assert_eq!(
            diff_attached_device(&before, &after, 4 << 30, sectors),
            Err(DeviceError::NoMatchingDevice {
                expected_bytes: 4 << 30
            })
        );
    }

    #[test]
    fn diff_rejects_ambiguous_matches() {
        let before = set(&["xvda"]);
        let after = set(&["xvda", "nvme1n1", "xvdf"]);
        let err = diff_attached_device(&before, &after, 4 << 30, sectors)
            .expect_err("two devices share the capacity");
        assert!(matches!(err, DeviceError::AmbiguousDevice { .. }));
    }

    #[test]
    fn diff_propagates_sector_errors() {
        let before = set(&[]);
        let after = set(&["xvdf"]);
        let err = diff_attached_device(&before, &after, 1, |device| {
            Err(DeviceError::InvalidSectorCount {
                device: device.to_owned(),
                raw: String::from("x"),
            })
        })
        .expect_err("sector failure should surface");
        assert!(matches!(err, DeviceError::InvalidSectorCount { .. }));
    }

    #[test]
    fn sysfs_reads_names_and_sizes() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        let dir = Dir::open_ambient_dir(&root, ambient_authority())
            .unwrap_or_else(|err| panic!("open tempdir: {err}"));
        dir.create_dir("xvdf").expect("create device dir");
        dir.write("xvdf/size", "8388608\n").expect("write size");
        dir.create_dir("loop0").expect("create loop dir");
        dir.write("loop0/size", "garbage").expect("write size");

        let devices = SysfsBlockDevices::with_root(root);
        assert_eq!(devices.list(), Ok(set(&["loop0", "xvdf"])));
        assert_eq!(devices.sector_count("xvdf"), Ok(8_388_608));
        assert!(matches!(
            devices.sector_count("loop0"),
            Err(DeviceError::InvalidSectorCount { .. })
        ));
        assert!(matches!(
            devices.sector_count("missing"),
            Err(DeviceError::Io { .. })
        ));
    }
}
