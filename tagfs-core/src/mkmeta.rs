//! Bootstraps the `.meta/.superblock` and `.meta/.log` alias files on a
//! freshly mounted tagfs instance, so user space can reach the raw
//! superblock and log as ordinary files instead of the DAX device.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::ioctl::{ExtentBinder, FileType};
use crate::layout::{Extent, SUPERBLOCK_SIZE};
use crate::mapping;

/// Creates `<mount>/.meta`, mode `0700`, and binds the superblock and log
/// alias files to their device extents. Returns the mount point.
///
/// `device` must currently be mounted as `tagfs` (resolved via
/// `/proc/mounts`); otherwise this fails with [`Error::InvalidPath`].
pub fn bootstrap<B: ExtentBinder>(device: &Path, binder: &B) -> Result<PathBuf> {
    let mpt = mapping::mount_point_for_device(device)?
        .ok_or_else(|| Error::InvalidPath(format!("{}: not mounted as tagfs", device.display())))?;

    let meta_dir = mpt.join(mapping::META_DIR_NAME);
    fs::create_dir_all(&meta_dir)?;
    fs::set_permissions(&meta_dir, fs::Permissions::from_mode(0o700))?;

    let (sb_map, _log_map) = mapping::map_superblock_and_log_raw(device, true)?;
    let sb = sb_map.sb();
    if !sb.is_valid() {
        return Err(Error::InvalidSuperblock);
    }
    let log_offset = sb.log_offset;
    let log_len = sb.log_len;

    ensure_meta_file(
        &meta_dir.join(mapping::SUPERBLOCK_FILE_NAME),
        SUPERBLOCK_SIZE,
        FileType::Superblock,
        0,
        SUPERBLOCK_SIZE,
        binder,
    )?;
    ensure_meta_file(
        &meta_dir.join(mapping::LOG_FILE_NAME),
        log_len,
        FileType::Log,
        log_offset,
        log_len,
        binder,
    )?;

    log::info!("mkmeta bootstrapped {}", meta_dir.display());
    Ok(mpt)
}

/// Ensures a single meta-file exists with the right size and is bound to
/// `[extent_offset, extent_offset + extent_len)`. A pre-existing file of
/// the wrong size is unlinked and rebuilt; a correctly-sized one is left
/// alone (it is already bound from a previous boot).
fn ensure_meta_file<B: ExtentBinder>(
    path: &Path,
    size: u64,
    file_type: FileType,
    extent_offset: u64,
    extent_len: u64,
    binder: &B,
) -> Result<()> {
    if let Ok(meta) = fs::metadata(path) {
        if meta.len() == size {
            log::debug!("{}: already present at the right size", path.display());
            return Ok(());
        }
        log::warn!(
            "{}: wrong size ({} != {size}), recreating",
            path.display(),
            meta.len()
        );
        fs::remove_file(path)?;
    }

    let file: File = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.set_len(size)?;

    binder
        .map_create(
            &file,
            file_type,
            size,
            &[Extent {
                offset: extent_offset,
                len: extent_len,
            }],
        )
        .map_err(Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ioctl::fake::FakeBinder;
    use crate::layout::{RawLog, RawSuperblock, LOG_LEN, SUPERBLOCK_MAGIC};
    use std::mem::size_of;

    fn make_device(tmp: &Path, device_size: u64) -> PathBuf {
        let dev = tmp.join("dax0");
        let mut buf = vec![0u8; (SUPERBLOCK_SIZE + LOG_LEN) as usize];
        {
            let sb = unsafe { &mut *(buf.as_mut_ptr() as *mut RawSuperblock) };
            sb.magic = SUPERBLOCK_MAGIC;
            sb.num_daxdevs = 1;
            sb.devlist[0].size = device_size;
            sb.log_offset = SUPERBLOCK_SIZE;
            sb.log_len = LOG_LEN;
        }
        {
            let log_ptr = unsafe { buf.as_mut_ptr().add(SUPERBLOCK_SIZE as usize) as *mut RawLog };
            unsafe { (*log_ptr).init() };
        }
        fs::write(&dev, &buf).unwrap();
        dev
    }

    #[test]
    fn ensure_meta_file_is_idempotent_when_size_matches() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".superblock");
        let binder = FakeBinder::default();
        ensure_meta_file(&path, SUPERBLOCK_SIZE, FileType::Superblock, 0, SUPERBLOCK_SIZE, &binder)
            .unwrap();
        assert_eq!(binder.bound.borrow().len(), 1);
        ensure_meta_file(&path, SUPERBLOCK_SIZE, FileType::Superblock, 0, SUPERBLOCK_SIZE, &binder)
            .unwrap();
        assert_eq!(binder.bound.borrow().len(), 1, "second call should be a no-op");
    }

    #[test]
    fn ensure_meta_file_rebuilds_when_size_diverges() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".log");
        fs::write(&path, vec![0u8; 4]).unwrap();
        let binder = FakeBinder::default();
        ensure_meta_file(&path, LOG_LEN, FileType::Log, SUPERBLOCK_SIZE, LOG_LEN, &binder).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), LOG_LEN);
        assert_eq!(binder.bound.borrow().len(), 1);
    }

    #[test]
    fn bootstrap_requires_a_mounted_device() {
        let tmp = tempfile::tempdir().unwrap();
        let dev = make_device(tmp.path(), 64 * 1024 * 1024);
        let binder = FakeBinder::default();
        let err = bootstrap(&dev, &binder).unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }
}
