//! File and directory creation: binding a new file to allocated extents
//! via the kernel ioctl and persisting the binding in the log.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::alloc;
use crate::error::{Error, Result};
use crate::ioctl::{ExtentBinder, FileType};
use crate::layout::{Extent, ALLOC_UNIT};
use crate::log as logmod;
use crate::mapping;

fn ceil_div(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Creates an empty regular file at `path` and probes it with the NOP
/// ioctl to confirm it landed on a tagfs mount.
///
/// Fails with [`Error::AlreadyExists`] if `path` already exists, and with
/// [`Error::NotTagfs`] if the NOP probe fails (the partially-created file
/// is removed in that case).
pub fn create_file<B: ExtentBinder>(
    path: &Path,
    mode: u32,
    uid: u32,
    gid: u32,
    binder: &B,
) -> Result<File> {
    if path.exists() {
        return Err(Error::AlreadyExists(path.to_path_buf()));
    }

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)?;

    if let Err(e) = binder.nop(&file) {
        log::warn!("{}: not a tagfs file ({e})", path.display());
        drop(file);
        let _ = fs::remove_file(path);
        return Err(Error::NotTagfs);
    }

    if uid != 0 && gid != 0 {
        chown(path, uid, gid)?;
    }

    Ok(file)
}

fn chown(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::InvalidPath(path.display().to_string()))?;
    let rc = unsafe { libc::chown(c_path.as_ptr(), uid, gid) };
    if rc < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Allocates `size` bytes for the already-created `file` at `path`,
/// appends the corresponding FILE log entry, and issues the map-create
/// ioctl. `path` must resolve to a location under a tagfs mount.
pub fn allocate_file<B: ExtentBinder>(
    file: &File,
    path: &Path,
    mode: u32,
    uid: u32,
    gid: u32,
    size: u64,
    binder: &B,
) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
    let (mpt, sb_map) = mapping::map_superblock_by_path(parent, true)?;
    let device_size = sb_map.sb().primary_dev_size();

    let (_, mut log_map) = mapping::map_log_by_path(parent, false)?;
    let log = log_map
        .log_mut()
        .ok_or_else(|| Error::InvalidPath("log mapping is read-only".to_string()))?;

    let relpath = path
        .strip_prefix(&mpt)
        .map_err(|_| Error::InvalidPath(path.display().to_string()))?
        .to_string_lossy()
        .into_owned();

    let report = alloc::build_bitmap(log, device_size);
    let mut bitmap = report.bitmap;
    let nbits = alloc::total_units(device_size);
    let offset = alloc::alloc_contiguous(&mut bitmap, nbits, size);
    if offset == 0 {
        return Err(Error::AllocationFailed);
    }

    let rounded_len = ceil_div(size, ALLOC_UNIT) * ALLOC_UNIT;
    let extents = [Extent {
        offset,
        len: rounded_len,
    }];

    logmod::append_file(log, &relpath, size, mode, uid, gid, &extents)?;
    binder
        .map_create(file, FileType::Reg, size, &extents)
        .map_err(Error::Io)?;
    Ok(())
}

/// Creates `path` as a `size`-byte file bound to freshly allocated
/// extents, unlinking the file if allocation or ioctl binding fails after
/// creation.
pub fn make_file<B: ExtentBinder>(
    path: &Path,
    mode: u32,
    uid: u32,
    gid: u32,
    size: u64,
    binder: &B,
) -> Result<()> {
    let file = create_file(path, mode, uid, gid, binder)?;
    if let Err(e) = allocate_file(&file, path, mode, uid, gid, size, binder) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(e);
    }
    Ok(())
}

/// Creates `dirpath` as a physical directory and appends the
/// corresponding MKDIR log entry. If the log append fails after the
/// directory was physically created, the directory is removed so no
/// unlogged directory is left behind.
pub fn make_dir(dirpath: &Path, mode: u32, uid: u32, gid: u32) -> Result<()> {
    let parent = dirpath
        .parent()
        .ok_or_else(|| Error::InvalidPath(dirpath.display().to_string()))?;
    if !parent.is_dir() {
        return Err(Error::InvalidPath(dirpath.display().to_string()));
    }
    let parent_canon = parent.canonicalize()?;
    let name = dirpath
        .file_name()
        .ok_or_else(|| Error::InvalidPath(dirpath.display().to_string()))?;
    let full: PathBuf = parent_canon.join(name);

    if full.exists() {
        return Err(Error::AlreadyExists(full));
    }

    let (mpt, mut log_map) = mapping::map_log_by_path(&parent_canon, false)?;
    let log = log_map
        .log_mut()
        .ok_or_else(|| Error::InvalidPath("log mapping is read-only".to_string()))?;

    let relpath = full
        .strip_prefix(&mpt)
        .map_err(|_| Error::InvalidPath(full.display().to_string()))?
        .to_string_lossy()
        .into_owned();

    fs::create_dir(&full)?;
    fs::set_permissions(&full, fs::Permissions::from_mode(mode))?;

    if let Err(e) = logmod::append_mkdir(log, &relpath, mode, uid, gid) {
        log::warn!("{}: log append failed after mkdir, removing: {e}", full.display());
        let _ = fs::remove_dir(&full);
        return Err(e);
    }

    Ok(())
}
