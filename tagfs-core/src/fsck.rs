//! Consistency check: rebuilds the allocation bitmap from the log and
//! reports collisions and space amplification, without mutating anything.

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use crate::alloc;
use crate::devsize;
use crate::error::{Error, Result};
use crate::mapping;

/// Structured result of a fsck run. The binary front-end prints this and
/// uses `collisions` (and `out_of_range`) as its process exit code.
#[derive(Debug)]
pub struct FsckReport {
    pub alloc_total: u64,
    pub size_total: u64,
    pub collisions: u64,
    pub out_of_range: u64,
    /// `alloc_total / size_total`, or `0.0` on an empty filesystem.
    pub amplification: f64,
}

/// Runs fsck against `path`, which may name either the raw DAX device or
/// any file/directory under a mounted instance.
///
/// A device currently mounted as `tagfs` is refused with
/// [`Error::DeviceBusy`] — fsck only runs against raw devices that are
/// not live.
pub fn run(path: &Path) -> Result<FsckReport> {
    let meta = fs::metadata(path)?;
    let ft = meta.file_type();

    let (sb_map, log_map, device_size) = if ft.is_block_device() || ft.is_char_device() {
        if mapping::device_is_mounted(path)? {
            return Err(Error::DeviceBusy);
        }
        let device_size = devsize::get_device_size(path)?;
        let (sb_map, log_map) = mapping::map_superblock_and_log_raw(path, true)?;
        (sb_map, log_map, device_size)
    } else {
        let (_, sb_map) = mapping::map_superblock_by_path(path, true)?;
        let (_, log_map) = mapping::map_log_by_path(path, true)?;
        let device_size = sb_map.sb().primary_dev_size();
        (sb_map, log_map, device_size)
    };

    if !sb_map.sb().is_valid() {
        return Err(Error::InvalidSuperblock);
    }

    log::info!(
        "fsck: device_size={device_size}, next_index={}",
        log_map.log().next_index
    );

    let bitmap_report = alloc::build_bitmap(log_map.log(), device_size);
    let amplification = if bitmap_report.size_total == 0 {
        0.0
    } else {
        bitmap_report.alloc_total as f64 / bitmap_report.size_total as f64
    };

    if bitmap_report.errors > 0 {
        log::error!("fsck: {} allocation collisions found", bitmap_report.errors);
    }

    Ok(FsckReport {
        alloc_total: bitmap_report.alloc_total,
        size_total: bitmap_report.size_total,
        collisions: bitmap_report.errors,
        out_of_range: bitmap_report.out_of_range,
        amplification,
    })
}
