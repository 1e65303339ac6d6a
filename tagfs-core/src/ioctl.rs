//! The wire contract between user space and the kernel's tagfs driver.
//!
//! Two opcodes are specified: `NOP`, a cheap "is this file on a tagfs
//! mount" probe, and `MAP_CREATE`, which binds an already-open file to a
//! list of device extents. The ioctl numbers follow the same encoding
//! macros the donor workspace uses for its own block-device ioctls.

use std::ffi::c_long;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;

use crate::layout::Extent;

/// ioctl direction/size encoding, matching the kernel's `_IOC` macro.
macro_rules! ioc {
    ($dir:expr, $ty:expr, $nr:expr, $size:expr) => {
        (($dir) << 30) | (($ty) << 8) | ($nr) | (($size) << 16)
    };
}

/// A "no payload" ioctl command (`_IO`).
macro_rules! io {
    ($ty:expr, $nr:expr) => {
        ioc!(0, $ty, $nr, 0)
    };
}

/// A write-to-kernel ioctl command (`_IOW`).
macro_rules! iow {
    ($ty:expr, $nr:expr, $arg:ty) => {
        ioc!(1, $ty, $nr, std::mem::size_of::<$arg>() as c_long)
    };
}

const TAGFS_IOCTL_TYPE: c_long = 0xf5;

/// Returns success iff the file resides on a tagfs mount. Takes no
/// payload.
const TAGFSIOC_NOP: c_long = io!(TAGFS_IOCTL_TYPE, 1);

/// Binds an open file to a list of device extents.
const TAGFSIOC_MAP_CREATE: c_long = iow!(TAGFS_IOCTL_TYPE, 2, IocMapCreate);

/// The kind of object a [`MAP_CREATE`](TAGFSIOC_MAP_CREATE) call is
/// binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FileType {
    Reg = 0,
    Superblock = 1,
    Log = 2,
}

/// Extent encoding used on the MAP_CREATE wire payload. Only `Fsdax` is
/// defined today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WireExtentType {
    Fsdax = 0,
}

/// Raw MAP_CREATE ioctl argument. Mirrors `struct tagfs_ioc_map` in the
/// kernel header: a file type, the logical file size, the extent
/// encoding, and an inline extent list.
#[repr(C)]
struct IocMapCreate {
    file_type: u32,
    extent_type: u32,
    file_size: u64,
    ext_list_count: u32,
    _pad: u32,
    ext_list: [RawWireExtent; crate::layout::MAX_NEXTENTS],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct RawWireExtent {
    offset: u64,
    len: u64,
}

/// Abstracts the two ioctl opcodes so allocator/replay/create logic can be
/// exercised without a live tagfs kernel module: production code uses
/// [`KernelBinder`], tests use a fake that always succeeds (or is made to
/// fail, to exercise the unwind-on-failure paths).
pub trait ExtentBinder {
    /// Probes whether `file` resides on a tagfs mount.
    fn nop(&self, file: &File) -> io::Result<()>;

    /// Binds `file` to `extents`, recording `file_type` and the logical
    /// `file_size`. May be called at most once per file.
    fn map_create(
        &self,
        file: &File,
        file_type: FileType,
        file_size: u64,
        extents: &[Extent],
    ) -> io::Result<()>;
}

/// The real binder, issuing `ioctl(2)` against the kernel driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelBinder;

impl ExtentBinder for KernelBinder {
    fn nop(&self, file: &File) -> io::Result<()> {
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), TAGFSIOC_NOP as _, 0) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn map_create(
        &self,
        file: &File,
        file_type: FileType,
        file_size: u64,
        extents: &[Extent],
    ) -> io::Result<()> {
        assert!(!extents.is_empty());
        assert!(extents.len() <= crate::layout::MAX_NEXTENTS);

        let mut ext_list = [RawWireExtent { offset: 0, len: 0 }; crate::layout::MAX_NEXTENTS];
        for (dst, src) in ext_list.iter_mut().zip(extents.iter()) {
            dst.offset = src.offset;
            dst.len = src.len;
        }

        let arg = IocMapCreate {
            file_type: file_type as u32,
            extent_type: WireExtentType::Fsdax as u32,
            file_size,
            ext_list_count: extents.len() as u32,
            _pad: 0,
            ext_list,
        };

        let rc = unsafe { libc::ioctl(file.as_raw_fd(), TAGFSIOC_MAP_CREATE as _, &arg) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            log::warn!("MAP_CREATE failed: {err}");
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod fake {
    use super::*;
    use std::cell::RefCell;
    use std::os::fd::RawFd;

    /// A test double that never touches the kernel: `nop` and
    /// `map_create` both succeed unconditionally and record every call,
    /// so replay/allocation tests can assert on what would have been
    /// bound without a live tagfs mount.
    #[derive(Default)]
    pub struct FakeBinder {
        pub bound: RefCell<Vec<(RawFd, FileType, u64, Vec<Extent>)>>,
    }

    impl ExtentBinder for FakeBinder {
        fn nop(&self, _file: &File) -> io::Result<()> {
            Ok(())
        }

        fn map_create(
            &self,
            file: &File,
            file_type: FileType,
            file_size: u64,
            extents: &[Extent],
        ) -> io::Result<()> {
            self.bound.borrow_mut().push((
                file.as_raw_fd(),
                file_type,
                file_size,
                extents.to_vec(),
            ));
            Ok(())
        }
    }
}
