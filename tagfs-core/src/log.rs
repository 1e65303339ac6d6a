//! Appending entries to the log and replaying it to recreate files and
//! directories on a freshly-mounted instance.

use std::fs::{self, OpenOptions};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::ioctl::{ExtentBinder, FileType};
use crate::layout::{
    read_cstr_from, write_cstr_into, Extent, LogEntryType, RawFileCreation, RawLog, RawLogEntry,
    RawMkdir,
};

/// Appends a FILE creation entry for `relpath` with `nextents` extents.
/// Stamps the entry with the log's next sequence number and advances
/// `next_index`. Returns [`Error::LogFull`] if no slot remains.
pub fn append_file(
    log: &mut RawLog,
    relpath: &str,
    size: u64,
    mode: u32,
    uid: u32,
    gid: u32,
    extents: &[Extent],
) -> Result<()> {
    if log.is_full() {
        return Err(Error::LogFull);
    }
    let mut fc: RawFileCreation = unsafe { std::mem::zeroed() };
    write_cstr_into(&mut fc.relpath, relpath);
    fc.size = size;
    fc.mode = mode;
    fc.uid = uid;
    fc.gid = gid;
    fc.nextents = extents.len() as u32;
    for (dst, src) in fc.extents.iter_mut().zip(extents.iter()) {
        *dst = (*src).into();
    }

    let idx = log.next_index as usize;
    log.entries[idx].set_file(fc);
    log.entries[idx].seqnum = log.next_seqnum;
    log.next_seqnum += 1;
    log.next_index += 1;
    Ok(())
}

/// Appends a MKDIR entry for `relpath`. Returns [`Error::LogFull`] if no
/// slot remains.
pub fn append_mkdir(log: &mut RawLog, relpath: &str, mode: u32, uid: u32, gid: u32) -> Result<()> {
    if log.is_full() {
        return Err(Error::LogFull);
    }
    let mut md: RawMkdir = unsafe { std::mem::zeroed() };
    write_cstr_into(&mut md.relpath, relpath);
    md.mode = mode;
    md.uid = uid;
    md.gid = gid;

    let idx = log.next_index as usize;
    log.entries[idx].set_mkdir(md);
    log.entries[idx].seqnum = log.next_seqnum;
    log.next_seqnum += 1;
    log.next_index += 1;
    Ok(())
}

/// Outcome of replaying a single log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Created,
    /// The target path already existed; the entry was a no-op.
    AlreadyExists,
    /// The entry's discriminator or path failed validation and was
    /// skipped without touching the filesystem.
    Invalid,
}

/// Tallied result of a full log replay.
#[derive(Debug, Default)]
pub struct ReplayReport {
    pub created: u64,
    pub already_exists: u64,
    pub invalid: u64,
}

impl ReplayReport {
    fn record(&mut self, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::Created => self.created += 1,
            EntryOutcome::AlreadyExists => self.already_exists += 1,
            EntryOutcome::Invalid => self.invalid += 1,
        }
    }
}

/// Replays every entry in `log` (indices `0..next_index`) under
/// `mount_point`, recreating directories and binding files to their
/// logged extents via `binder`. Replay is idempotent: an entry whose
/// target already exists is counted as [`EntryOutcome::AlreadyExists`]
/// rather than treated as an error, so mounting an already-populated
/// device twice is harmless.
///
/// When `dry_run` is set, no filesystem mutation happens; entries are
/// only classified, which is what `fsck` uses this function for.
pub fn replay<B: ExtentBinder>(
    log: &RawLog,
    mount_point: &Path,
    binder: &B,
    dry_run: bool,
) -> Result<ReplayReport> {
    let mut report = ReplayReport::default();
    for i in 0..log.next_index as usize {
        let entry = &log.entries[i];
        let outcome = replay_one(entry, mount_point, binder, dry_run)?;
        report.record(outcome);
    }
    Ok(report)
}

fn resolve_relpath(mount_point: &Path, relpath: &str) -> Result<PathBuf> {
    if relpath.is_empty() || relpath.starts_with('/') {
        return Err(Error::InvalidPath(relpath.to_string()));
    }
    if Path::new(relpath)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::InvalidPath(relpath.to_string()));
    }
    Ok(mount_point.join(relpath))
}

fn replay_one<B: ExtentBinder>(
    entry: &RawLogEntry,
    mount_point: &Path,
    binder: &B,
    dry_run: bool,
) -> Result<EntryOutcome> {
    match entry.entry_type() {
        Some(LogEntryType::File) => {
            let fc = entry.as_file();
            let relpath = read_cstr_from(&fc.relpath);
            let path = match resolve_relpath(mount_point, &relpath) {
                Ok(p) => p,
                Err(_) => return Ok(EntryOutcome::Invalid),
            };
            let extents: Vec<Extent> = (0..fc.nextents as usize)
                .map(|i| Extent::from(&fc.extents[i]))
                .collect();
            if extents.iter().any(|e| e.offset == 0) {
                log::warn!("{}: extent at offset 0, skipping", path.display());
                return Ok(EntryOutcome::Invalid);
            }
            if path.exists() {
                return Ok(EntryOutcome::AlreadyExists);
            }
            if dry_run {
                return Ok(EntryOutcome::Created);
            }
            match create_and_bind_file(&path, fc, &extents, binder) {
                Ok(()) => Ok(EntryOutcome::Created),
                Err(e) => {
                    let _ = fs::remove_file(&path);
                    Err(e)
                }
            }
        }
        Some(LogEntryType::Mkdir) => {
            let md = entry.as_mkdir();
            let relpath = read_cstr_from(&md.relpath);
            let path = match resolve_relpath(mount_point, &relpath) {
                Ok(p) => p,
                Err(_) => return Ok(EntryOutcome::Invalid),
            };
            if path.exists() {
                return Ok(EntryOutcome::AlreadyExists);
            }
            if dry_run {
                return Ok(EntryOutcome::Created);
            }
            fs::create_dir(&path)?;
            fs::set_permissions(&path, fs::Permissions::from_mode(md.mode))?;
            Ok(EntryOutcome::Created)
        }
        Some(LogEntryType::Access) => Ok(EntryOutcome::AlreadyExists),
        None => Ok(EntryOutcome::Invalid),
    }
}

/// Creates the empty regular file at `path`, sizes and binds it to
/// `extents`, and sets its final permissions. The caller is responsible
/// for removing `path` if this returns an error, since the file is
/// already created by the time any of these steps can fail.
fn create_and_bind_file<B: ExtentBinder>(
    path: &Path,
    fc: &RawFileCreation,
    extents: &[Extent],
    binder: &B,
) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(fc.mode)
        .open(path)?;
    file.set_len(fc.size)?;
    binder
        .map_create(&file, FileType::Reg, fc.size, extents)
        .map_err(Error::Io)?;
    fs::set_permissions(path, fs::Permissions::from_mode(fc.mode))?;
    Ok(())
}

/// Returns the uid/gid of the calling process, for stamping new log
/// entries the way the reference implementation does (the creating
/// process's real ids, not the target file's desired owner).
pub fn caller_ids() -> (u32, u32) {
    let meta = fs::metadata("/proc/self").ok();
    match meta {
        Some(m) => (m.uid(), m.gid()),
        None => (0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ioctl::fake::FakeBinder;
    use crate::layout::LOG_MAX_ENTRIES;
    use std::mem::size_of;

    fn empty_log() -> Box<RawLog> {
        let mut buf = vec![0u8; size_of::<RawLog>()].into_boxed_slice();
        let ptr = Box::into_raw(buf) as *mut RawLog;
        unsafe {
            (*ptr).init();
            Box::from_raw(ptr)
        }
    }

    #[test]
    fn append_file_then_mkdir_advance_index_and_seqnum() {
        let mut log = empty_log();
        append_file(&mut log, "a/b.txt", 10, 0o644, 1000, 1000, &[Extent { offset: 0, len: 0 }])
            .unwrap();
        append_mkdir(&mut log, "a", 0o755, 1000, 1000).unwrap();
        assert_eq!(log.next_index, 2);
        assert_eq!(log.next_seqnum, 2);
        assert_eq!(log.entries[0].seqnum, 0);
        assert_eq!(log.entries[1].seqnum, 1);
    }

    #[test]
    fn append_fails_once_log_is_full() {
        let mut log = empty_log();
        log.next_index = LOG_MAX_ENTRIES as u64;
        let err = append_mkdir(&mut log, "x", 0o755, 0, 0).unwrap_err();
        assert!(matches!(err, Error::LogFull));
    }

    #[test]
    fn replay_creates_directory_then_file_under_it() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = empty_log();
        append_mkdir(&mut log, "sub", 0o755, 0, 0).unwrap();
        append_file(
            &mut log,
            "sub/f.bin",
            4096,
            0o644,
            0,
            0,
            &[Extent { offset: crate::layout::ALLOC_UNIT, len: 4096 }],
        )
        .unwrap();

        let binder = FakeBinder::default();
        let report = replay(&log, tmp.path(), &binder, false).unwrap();
        assert_eq!(report.created, 2);
        assert!(tmp.path().join("sub").is_dir());
        assert!(tmp.path().join("sub/f.bin").is_file());
        assert_eq!(binder.bound.borrow().len(), 1);
    }

    #[test]
    fn replay_rejects_zero_offset_extent_as_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = empty_log();
        append_file(&mut log, "bad", 4096, 0o644, 0, 0, &[Extent { offset: 0, len: 4096 }])
            .unwrap();

        let binder = FakeBinder::default();
        let report = replay(&log, tmp.path(), &binder, false).unwrap();
        assert_eq!(report.invalid, 1);
        assert_eq!(report.created, 0);
        assert!(!tmp.path().join("bad").exists());
    }

    #[test]
    fn replay_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = empty_log();
        append_mkdir(&mut log, "sub", 0o755, 0, 0).unwrap();

        let binder = FakeBinder::default();
        replay(&log, tmp.path(), &binder, false).unwrap();
        let second = replay(&log, tmp.path(), &binder, false).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.already_exists, 1);
    }

    #[test]
    fn replay_rejects_escaping_paths_as_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = empty_log();
        append_mkdir(&mut log, "../escape", 0o755, 0, 0).unwrap();

        let binder = FakeBinder::default();
        let report = replay(&log, tmp.path(), &binder, false).unwrap();
        assert_eq!(report.invalid, 1);
        assert_eq!(report.created, 0);
    }
}
