//! Reads the size of a DAX device via the platform's block/char
//! sysfs-equivalent attribute, mirroring how the kernel itself reports it
//! to `stat`-like tools.

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::error::{Error, Result};

/// Returns the size in bytes of the DAX device at `path`.
///
/// `path` must be a block or character device. Block device sizes are read
/// from `/sys/class/block/<name>/size` (a count of 512-byte sectors, so the
/// result is multiplied by 512); character device sizes are read from
/// `/sys/dev/char/<major>:<minor>/size` (already byte-granular in the
/// reference implementation this crate mirrors).
pub fn get_device_size(path: &Path) -> Result<u64> {
    let metadata = fs::metadata(path)?;
    let file_type = metadata.file_type();

    if file_type.is_block_device() {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
        let sysfs_path = format!("/sys/class/block/{name}/size");
        log::debug!("reading block device size from {sysfs_path}");
        let sectors = read_sysfs_u64(&sysfs_path)?;
        Ok(sectors * 512)
    } else if file_type.is_char_device() {
        let rdev = metadata.rdev();
        let major = unsafe { libc::major(rdev) };
        let minor = unsafe { libc::minor(rdev) };
        let sysfs_path = format!("/sys/dev/char/{major}:{minor}/size");
        log::debug!("reading char device size from {sysfs_path}");
        read_sysfs_u64(&sysfs_path)
    } else {
        Err(Error::InvalidPath(format!(
            "{}: not a block or character device",
            path.display()
        )))
    }
}

fn read_sysfs_u64(path: &str) -> Result<u64> {
    let contents = fs::read_to_string(path)
        .map_err(|_| Error::InvalidPath(format!("failed to read {path}")))?;
    contents
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::InvalidPath(format!("unparseable size in {path}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_regular_files() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let err = get_device_size(f.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }
}
