//! Memory-mapping the persistent region, either directly from the DAX
//! device or indirectly through the `.meta/.superblock` and `.meta/.log`
//! alias files, plus the upward path walk and `/proc/mounts` lookups used
//! to find a mount point.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::error::{Error, Result};
use crate::layout::{RawLog, RawSuperblock, LOG_LEN, SUPERBLOCK_SIZE};

/// Name of the log meta-file, relative to `.meta/`.
pub const LOG_FILE_NAME: &str = ".log";
/// Name of the superblock meta-file, relative to `.meta/`.
pub const SUPERBLOCK_FILE_NAME: &str = ".superblock";
/// Name of the directory holding the two meta-files, relative to the
/// mount point.
pub const META_DIR_NAME: &str = ".meta";

enum MappedMem {
    Ro(Mmap),
    Rw(MmapMut),
}

impl MappedMem {
    fn as_slice(&self) -> &[u8] {
        match self {
            MappedMem::Ro(m) => m,
            MappedMem::Rw(m) => m,
        }
    }

    fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self {
            MappedMem::Ro(_) => None,
            MappedMem::Rw(m) => Some(m),
        }
    }
}

/// An owned mapping of the superblock region, from either the raw device
/// or the `.meta/.superblock` alias file.
pub struct SuperblockMapping {
    mem: MappedMem,
    _file: File,
}

impl SuperblockMapping {
    fn from_file(file: File, offset: u64, read_only: bool) -> Result<Self> {
        let mem = if read_only {
            let mmap = unsafe {
                MmapOptions::new()
                    .offset(offset)
                    .len(SUPERBLOCK_SIZE as usize)
                    .map(&file)?
            };
            MappedMem::Ro(mmap)
        } else {
            let mmap = unsafe {
                MmapOptions::new()
                    .offset(offset)
                    .len(SUPERBLOCK_SIZE as usize)
                    .map_mut(&file)?
            };
            MappedMem::Rw(mmap)
        };
        Ok(Self { mem, _file: file })
    }

    pub fn sb(&self) -> &RawSuperblock {
        debug_assert_eq!(self.mem.as_slice().len(), SUPERBLOCK_SIZE as usize);
        unsafe { &*(self.mem.as_slice().as_ptr() as *const RawSuperblock) }
    }

    pub fn sb_mut(&mut self) -> Option<&mut RawSuperblock> {
        self.mem
            .as_mut_slice()
            .map(|s| unsafe { &mut *(s.as_mut_ptr() as *mut RawSuperblock) })
    }
}

/// An owned mapping of the log region, from either the raw device or the
/// `.meta/.log` alias file.
pub struct LogMapping {
    mem: MappedMem,
    _file: File,
}

impl LogMapping {
    fn from_file(file: File, offset: u64, len: u64, read_only: bool) -> Result<Self> {
        let mem = if read_only {
            let mmap = unsafe {
                MmapOptions::new()
                    .offset(offset)
                    .len(len as usize)
                    .map(&file)?
            };
            MappedMem::Ro(mmap)
        } else {
            let mmap = unsafe {
                MmapOptions::new()
                    .offset(offset)
                    .len(len as usize)
                    .map_mut(&file)?
            };
            MappedMem::Rw(mmap)
        };
        Ok(Self { mem, _file: file })
    }

    pub fn log(&self) -> &RawLog {
        unsafe { &*(self.mem.as_slice().as_ptr() as *const RawLog) }
    }

    pub fn log_mut(&mut self) -> Option<&mut RawLog> {
        self.mem
            .as_mut_slice()
            .map(|s| unsafe { &mut *(s.as_mut_ptr() as *mut RawLog) })
    }
}

/// Maps the superblock and log directly from the DAX device at `path`.
///
/// This is the path used by `fsck` and `mkmeta`, which need access before
/// (or without) the `.meta` alias files existing.
pub fn map_superblock_and_log_raw(
    path: &Path,
    read_only: bool,
) -> Result<(SuperblockMapping, LogMapping)> {
    let file = OpenOptions::new()
        .read(true)
        .write(!read_only)
        .open(path)?;
    let sb = SuperblockMapping::from_file(file.try_clone()?, 0, read_only)?;
    let log = LogMapping::from_file(file, SUPERBLOCK_SIZE, LOG_LEN, read_only)?;
    Ok((sb, log))
}

/// Walks upward from `start`, at each directory testing for the presence
/// of `.meta/.superblock` and `.meta/.log`. Returns the directory at which
/// both are found (the mount point), or `None` if the walk reaches `/`
/// without finding them. This is a bounded loop and "not found" is not an
/// error — plenty of paths are legitimately outside any tagfs mount.
pub fn find_mount_point(start: &Path) -> io::Result<Option<PathBuf>> {
    let mut cur = fs::canonicalize(start)?;
    loop {
        let meta = cur.join(META_DIR_NAME);
        if meta.join(SUPERBLOCK_FILE_NAME).is_file() && meta.join(LOG_FILE_NAME).is_file() {
            return Ok(Some(cur));
        }
        match cur.parent() {
            Some(parent) if parent != cur => cur = parent.to_path_buf(),
            _ => return Ok(None),
        }
    }
}

/// Opens the `.meta/.log` file beneath `mount_point` for mapping.
pub fn open_log_file(mount_point: &Path, read_only: bool) -> io::Result<File> {
    let path = mount_point.join(META_DIR_NAME).join(LOG_FILE_NAME);
    OpenOptions::new().read(true).write(!read_only).open(path)
}

/// Opens the `.meta/.superblock` file beneath `mount_point` for mapping.
pub fn open_superblock_file(mount_point: &Path, read_only: bool) -> io::Result<File> {
    let path = mount_point.join(META_DIR_NAME).join(SUPERBLOCK_FILE_NAME);
    OpenOptions::new().read(true).write(!read_only).open(path)
}

/// Maps the log via the meta-file found by walking upward from any path
/// under the mount.
pub fn map_log_by_path(path: &Path, read_only: bool) -> Result<(PathBuf, LogMapping)> {
    let mpt = find_mount_point(path)?
        .ok_or_else(|| Error::InvalidPath(format!("{}: not under a tagfs mount", path.display())))?;
    let file = open_log_file(&mpt, read_only)?;
    let len = file.metadata()?.len();
    let log = LogMapping::from_file(file, 0, len, read_only)?;
    Ok((mpt, log))
}

/// Maps the superblock via the meta-file found by walking upward from any
/// path under the mount.
pub fn map_superblock_by_path(path: &Path, read_only: bool) -> Result<(PathBuf, SuperblockMapping)> {
    let mpt = find_mount_point(path)?
        .ok_or_else(|| Error::InvalidPath(format!("{}: not under a tagfs mount", path.display())))?;
    let file = open_superblock_file(&mpt, read_only)?;
    let sb = SuperblockMapping::from_file(file, 0, read_only)?;
    Ok((mpt, sb))
}

/// Reads `/proc/mounts` and returns the mount point of the `tagfs`
/// filesystem backed by `device` (compared by canonical path), if any.
pub fn mount_point_for_device(device: &Path) -> io::Result<Option<PathBuf>> {
    let device = fs::canonicalize(device)?;
    let contents = fs::read_to_string("/proc/mounts")?;
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let dev_field = fields.next();
        let mpt_field = fields.next();
        let fstype_field = fields.next();
        if fstype_field != Some("tagfs") {
            continue;
        }
        if let (Some(dev), Some(mpt)) = (dev_field, mpt_field) {
            if let Ok(dev_canon) = fs::canonicalize(dev) {
                if dev_canon == device {
                    return Ok(Some(PathBuf::from(mpt)));
                }
            }
        }
    }
    Ok(None)
}

/// Returns `true` iff `device` is currently mounted as `tagfs` anywhere.
pub fn device_is_mounted(device: &Path) -> io::Result<bool> {
    Ok(mount_point_for_device(device)?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::create_dir_all;

    #[test]
    fn find_mount_point_walks_upward() {
        let tmp = tempfile::tempdir().unwrap();
        let mpt = tmp.path().join("mnt");
        let deep = mpt.join("a").join("b").join("c");
        create_dir_all(&deep).unwrap();
        create_dir_all(mpt.join(META_DIR_NAME)).unwrap();
        fs::write(mpt.join(META_DIR_NAME).join(SUPERBLOCK_FILE_NAME), []).unwrap();
        fs::write(mpt.join(META_DIR_NAME).join(LOG_FILE_NAME), []).unwrap();

        let found = find_mount_point(&deep).unwrap().unwrap();
        assert_eq!(fs::canonicalize(&found).unwrap(), fs::canonicalize(&mpt).unwrap());
    }

    #[test]
    fn find_mount_point_returns_none_outside_any_mount() {
        let tmp = tempfile::tempdir().unwrap();
        let deep = tmp.path().join("a").join("b");
        create_dir_all(&deep).unwrap();
        assert!(find_mount_point(&deep).unwrap().is_none());
    }
}
