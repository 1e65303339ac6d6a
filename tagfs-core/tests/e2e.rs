//! End-to-end scenarios exercised against `tempfile`-backed fixtures
//! standing in for a DAX device and its `.meta` alias files, using the
//! fake ioctl binder in place of a live kernel module.

use std::fs;
use std::mem::size_of;

use tagfs_core::ioctl::fake::FakeBinder;
use tagfs_core::ioctl::FileType;
use tagfs_core::layout::{
    Extent, RawLog, RawSuperblock, ALLOC_UNIT, LOG_LEN, LOG_MAGIC, SUPERBLOCK_MAGIC,
    SUPERBLOCK_SIZE,
};
use tagfs_core::{alloc, create, fsck, log as logmod, mapping};

const ONE_GIB: u64 = 1024 * 1024 * 1024;

/// Builds a mount directory with `.meta/.superblock` and `.meta/.log`
/// files reflecting a freshly-formatted, empty device of `device_size`
/// bytes. Mirrors what `mkmeta` would have produced.
fn format_mount(mpt: &std::path::Path, device_size: u64) {
    fs::create_dir_all(mpt.join(".meta")).unwrap();

    let mut sb_buf = vec![0u8; size_of::<RawSuperblock>()];
    {
        let sb = unsafe { &mut *(sb_buf.as_mut_ptr() as *mut RawSuperblock) };
        sb.magic = SUPERBLOCK_MAGIC;
        sb.num_daxdevs = 1;
        sb.devlist[0].set_name("dax0.0");
        sb.devlist[0].size = device_size;
        sb.log_offset = SUPERBLOCK_SIZE;
        sb.log_len = LOG_LEN;
    }
    fs::write(mpt.join(".meta").join(".superblock"), &sb_buf).unwrap();
    assert_eq!(fs::metadata(mpt.join(".meta").join(".superblock")).unwrap().len(), SUPERBLOCK_SIZE);

    let mut log_buf = vec![0u8; size_of::<RawLog>()];
    {
        let log = unsafe { &mut *(log_buf.as_mut_ptr() as *mut RawLog) };
        log.init();
    }
    fs::write(mpt.join(".meta").join(".log"), &log_buf).unwrap();
    assert_eq!(fs::metadata(mpt.join(".meta").join(".log")).unwrap().len(), LOG_LEN);
}

#[test]
fn scenario_1_empty_mount_reports_nothing_allocated() {
    let tmp = tempfile::tempdir().unwrap();
    let mpt = tmp.path().join("mnt");
    format_mount(&mpt, ONE_GIB);

    let report = fsck::run(&mpt).unwrap();
    assert_eq!(report.collisions, 0);
    assert_eq!(report.alloc_total, 0);
    assert_eq!(report.size_total, 0);
}

#[test]
fn scenario_2_single_file_extent_and_amplification() {
    let tmp = tempfile::tempdir().unwrap();
    let mpt = tmp.path().join("mnt");
    format_mount(&mpt, ONE_GIB);

    let binder = FakeBinder::default();
    create::make_file(&mpt.join("foo"), 0o644, 1000, 1000, 3 * 1024 * 1024, &binder).unwrap();

    let (_, file_type, file_size, extents) = binder.bound.borrow()[0].clone();
    assert_eq!(file_type, FileType::Reg);
    assert_eq!(file_size, 3 * 1024 * 1024);
    assert_eq!(extents.len(), 1);
    assert_eq!(extents[0].offset, SUPERBLOCK_SIZE + LOG_LEN);
    assert_eq!(extents[0].len, 4 * 1024 * 1024);

    let report = fsck::run(&mpt).unwrap();
    assert_eq!(report.collisions, 0);
    assert_eq!(report.alloc_total, 4 * 1024 * 1024);
    assert_eq!(report.size_total, 3 * 1024 * 1024);
    assert!((report.amplification - 4.0 / 3.0).abs() < 0.01);
}

fn empty_log_box() -> Box<RawLog> {
    let buf = vec![0u8; size_of::<RawLog>()].into_boxed_slice();
    let ptr = Box::into_raw(buf) as *mut RawLog;
    unsafe {
        (*ptr).init();
        Box::from_raw(ptr)
    }
}

#[test]
fn scenario_3_colliding_extents_counted_by_fsck_not_replay() {
    let mut log = empty_log_box();
    let shared = Extent {
        offset: SUPERBLOCK_SIZE + LOG_LEN,
        len: ALLOC_UNIT,
    };

    logmod::append_file(&mut log, "a", ALLOC_UNIT, 0o644, 0, 0, &[shared]).unwrap();
    logmod::append_file(&mut log, "b", ALLOC_UNIT, 0o644, 0, 0, &[shared]).unwrap();

    let bitmap_report = alloc::build_bitmap(&log, ONE_GIB);
    assert_eq!(bitmap_report.errors, 1);

    let tmp = tempfile::tempdir().unwrap();
    let binder = FakeBinder::default();
    let report = logmod::replay(&log, tmp.path(), &binder, false).unwrap();
    assert_eq!(report.created, 2);
    assert!(tmp.path().join("a").is_file());
    assert!(tmp.path().join("b").is_file());
}

#[test]
fn scenario_4_idempotent_replay() {
    let mut log = empty_log_box();
    logmod::append_mkdir(&mut log, "d", 0o755, 0, 0).unwrap();
    logmod::append_file(
        &mut log,
        "d/f1",
        ALLOC_UNIT,
        0o644,
        0,
        0,
        &[Extent {
            offset: SUPERBLOCK_SIZE + LOG_LEN,
            len: ALLOC_UNIT,
        }],
    )
    .unwrap();
    logmod::append_file(
        &mut log,
        "d/f2",
        ALLOC_UNIT,
        0o644,
        0,
        0,
        &[Extent {
            offset: SUPERBLOCK_SIZE + LOG_LEN + ALLOC_UNIT,
            len: ALLOC_UNIT,
        }],
    )
    .unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let binder = FakeBinder::default();

    let first = logmod::replay(&log, tmp.path(), &binder, false).unwrap();
    assert_eq!(first.created, 3);

    let second = logmod::replay(&log, tmp.path(), &binder, false).unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.already_exists, 3);

    assert!(tmp.path().join("d/f1").is_file());
    assert!(tmp.path().join("d/f2").is_file());
}

#[test]
fn scenario_5_mount_discovery_walks_upward() {
    let tmp = tempfile::tempdir().unwrap();
    let mpt = tmp.path().join("t");
    let deep = mpt.join("a").join("b").join("c");
    fs::create_dir_all(&deep).unwrap();
    format_mount(&mpt, ONE_GIB);

    let found = mapping::find_mount_point(&deep).unwrap().unwrap();
    assert_eq!(fs::canonicalize(found).unwrap(), fs::canonicalize(&mpt).unwrap());
}

#[test]
fn scenario_6_full_log_rejects_the_fifth_append() {
    let mut log = empty_log_box();
    log.magic = LOG_MAGIC;
    log.last_index = 3;

    for i in 0..4 {
        logmod::append_mkdir(&mut log, &format!("d{i}"), 0o755, 0, 0).unwrap();
    }
    assert_eq!(log.next_seqnum, 4);

    let err = logmod::append_mkdir(&mut log, "d4", 0o755, 0, 0).unwrap_err();
    assert!(matches!(err, tagfs_core::Error::LogFull));
}
