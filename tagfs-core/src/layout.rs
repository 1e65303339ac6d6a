//! On-device structures, magic constants and offsets.
//!
//! The superblock and log are read and written in place over a memory
//! mapping of the DAX device (or of the `.meta` alias files), so every
//! type in this module is `#[repr(C)]` and fixed-size: `entries[i]` must
//! remain a pure offset computation with no indirection.

use std::ffi::CStr;
use std::mem::size_of;

/// Size in bytes of the allocation unit (the system's huge-page size in
/// practice). All persisted extent offsets and lengths are multiples of
/// this.
pub const ALLOC_UNIT: u64 = 2 * 1024 * 1024;

/// Size in bytes of the superblock region, starting at device offset 0.
pub const SUPERBLOCK_SIZE: u64 = ALLOC_UNIT;

/// Length in bytes of the log region.
pub const LOG_LEN: u64 = 4 * ALLOC_UNIT;

/// Offset of the log region from the start of the device. Equal to
/// `SUPERBLOCK_SIZE` in the reference layout, leaving no padding between
/// the superblock and the log.
pub const LOG_OFFSET: u64 = SUPERBLOCK_SIZE;

/// Maximum number of bytes (including the terminating nul) in a relative
/// path stored in a log entry.
pub const MAX_PATHLEN: usize = 256;

/// Maximum number of extents a single FILE log entry can carry.
pub const MAX_NEXTENTS: usize = 4;

/// Maximum number of DAX devices recorded in the superblock's device list.
pub const MAX_DAXDEVS: usize = 2;

/// Maximum number of bytes (including the terminating nul) in a device
/// name stored in the superblock's device list.
pub const DEV_NAME_LEN: usize = 256;

/// Number of log entry slots backing the fixed-size `entries` array.
pub const LOG_MAX_ENTRIES: usize = 16384;

const fn magic_from_str(s: &str) -> u64 {
    let b = s.as_bytes();
    u64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ])
}

/// Sentinel identifying a valid tagfs superblock.
pub const SUPERBLOCK_MAGIC: u64 = magic_from_str("TAGFSSB0");

/// Sentinel identifying a valid tagfs log region.
pub const LOG_MAGIC: u64 = magic_from_str("TAGFSLG0");

/// A plain in-memory extent, used wherever code needs to pass extents
/// around without the on-disk padding/tag baggage of [`RawExtent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub offset: u64,
    pub len: u64,
}

impl From<&RawExtent> for Extent {
    fn from(e: &RawExtent) -> Self {
        Self {
            offset: e.offset,
            len: e.len,
        }
    }
}

impl From<Extent> for RawExtent {
    fn from(e: Extent) -> Self {
        RawExtent::simple(e.offset, e.len)
    }
}

/// Extent type tag. Only `Simple` is currently defined; the field exists
/// so the wire format can grow new extent encodings later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ExtentType {
    Simple = 0,
}

/// A single `{offset, length}` extent, as persisted in a FILE log entry.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct RawExtent {
    pub extent_type: u32,
    _pad: u32,
    pub offset: u64,
    pub len: u64,
}

impl RawExtent {
    pub fn simple(offset: u64, len: u64) -> Self {
        Self {
            extent_type: ExtentType::Simple as u32,
            _pad: 0,
            offset,
            len,
        }
    }
}

/// One DAX device entry in the superblock's device list.
#[repr(C)]
pub struct RawDaxDev {
    pub name: [u8; DEV_NAME_LEN],
    pub size: u64,
}

impl RawDaxDev {
    pub fn name_str(&self) -> &str {
        CStr::from_bytes_until_nul(&self.name)
            .ok()
            .and_then(|c| c.to_str().ok())
            .unwrap_or("")
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = [0u8; DEV_NAME_LEN];
        let bytes = name.as_bytes();
        let n = bytes.len().min(DEV_NAME_LEN - 1);
        self.name[..n].copy_from_slice(&bytes[..n]);
    }
}

/// The fixed-offset superblock at device offset 0.
///
/// The struct is padded out to exactly [`SUPERBLOCK_SIZE`] bytes so it can
/// be cast directly over a mapping of the superblock region.
#[repr(C)]
pub struct RawSuperblock {
    pub magic: u64,
    pub uuid: [u8; 16],
    pub num_daxdevs: u32,
    _pad0: u32,
    pub devlist: [RawDaxDev; MAX_DAXDEVS],
    pub log_offset: u64,
    pub log_len: u64,
    _reserved: [u8; SUPERBLOCK_SIZE as usize - SUPERBLOCK_HEADER_LEN],
}

const SUPERBLOCK_HEADER_LEN: usize = 8 // magic
    + 16 // uuid
    + 4 // num_daxdevs
    + 4 // pad
    + MAX_DAXDEVS * (DEV_NAME_LEN + 8)
    + 8 // log_offset
    + 8; // log_len

impl RawSuperblock {
    /// Returns `true` iff the magic number identifies a valid tagfs
    /// superblock. No further field validation is performed; CRC/version
    /// checks are reserved for a future format revision.
    pub fn is_valid(&self) -> bool {
        self.magic == SUPERBLOCK_MAGIC
    }

    /// Size in bytes of the primary (first) DAX device, or 0 if none is
    /// recorded.
    pub fn primary_dev_size(&self) -> u64 {
        if self.num_daxdevs == 0 {
            0
        } else {
            self.devlist[0].size
        }
    }
}

/// Discriminator for a log entry's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LogEntryType {
    Access = 0,
    File = 1,
    Mkdir = 2,
}

impl LogEntryType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Access),
            1 => Some(Self::File),
            2 => Some(Self::Mkdir),
            _ => None,
        }
    }
}

/// On-disk FILE payload: a relative path plus ownership/mode metadata and
/// an extent list.
#[repr(C)]
pub struct RawFileCreation {
    pub relpath: [u8; MAX_PATHLEN],
    pub size: u64,
    pub flags: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nextents: u32,
    _pad: u32,
    pub extents: [RawExtent; MAX_NEXTENTS],
}

/// On-disk MKDIR payload: a relative path plus ownership/mode metadata.
#[repr(C)]
pub struct RawMkdir {
    pub relpath: [u8; MAX_PATHLEN],
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    _pad: u32,
}

/// Size in bytes of the union-like payload buffer backing every log
/// entry, regardless of its actual discriminator. Sized to the larger of
/// the two real payloads.
pub const ENTRY_PAYLOAD_SIZE: usize = {
    let file_size = size_of::<RawFileCreation>();
    let mkdir_size = size_of::<RawMkdir>();
    if file_size > mkdir_size {
        file_size
    } else {
        mkdir_size
    }
};

/// A single fixed-size log entry slot. The payload bytes are interpreted
/// according to `entry_type` by the accessor methods below; this keeps
/// `entries[i]` a pure offset computation while avoiding an unsafe Rust
/// `union`.
#[repr(C)]
pub struct RawLogEntry {
    pub entry_type: u32,
    _pad0: u32,
    pub seqnum: u64,
    payload: [u8; ENTRY_PAYLOAD_SIZE],
}

impl RawLogEntry {
    /// Zeroes the entry and writes a FILE payload into it.
    pub fn set_file(&mut self, fc: RawFileCreation) {
        self.entry_type = LogEntryType::File as u32;
        let bytes = unsafe {
            std::slice::from_raw_parts(&fc as *const _ as *const u8, size_of::<RawFileCreation>())
        };
        self.payload[..bytes.len()].copy_from_slice(bytes);
    }

    /// Zeroes the entry and writes a MKDIR payload into it.
    pub fn set_mkdir(&mut self, md: RawMkdir) {
        self.entry_type = LogEntryType::Mkdir as u32;
        let bytes = unsafe {
            std::slice::from_raw_parts(&md as *const _ as *const u8, size_of::<RawMkdir>())
        };
        self.payload[..bytes.len()].copy_from_slice(bytes);
    }

    pub fn entry_type(&self) -> Option<LogEntryType> {
        LogEntryType::from_u32(self.entry_type)
    }

    /// Interprets the payload as a FILE creation record. Caller must have
    /// checked `entry_type() == Some(LogEntryType::File)`.
    pub fn as_file(&self) -> &RawFileCreation {
        unsafe { &*(self.payload.as_ptr() as *const RawFileCreation) }
    }

    /// Interprets the payload as a MKDIR record. Caller must have checked
    /// `entry_type() == Some(LogEntryType::Mkdir)`.
    pub fn as_mkdir(&self) -> &RawMkdir {
        unsafe { &*(self.payload.as_ptr() as *const RawMkdir) }
    }
}

/// The append-only log region, mapped starting at [`LOG_OFFSET`].
#[repr(C)]
pub struct RawLog {
    pub magic: u64,
    pub next_seqnum: u64,
    pub next_index: u64,
    pub last_index: u64,
    pub entries: [RawLogEntry; LOG_MAX_ENTRIES],
}

impl RawLog {
    pub fn is_valid(&self) -> bool {
        self.magic == LOG_MAGIC
    }

    pub fn is_full(&self) -> bool {
        self.next_index > self.last_index
    }

    /// Initializes an in-place log header over zeroed storage. `last_index`
    /// is clamped to the fixed entry array's capacity.
    pub fn init(&mut self) {
        self.magic = LOG_MAGIC;
        self.next_seqnum = 0;
        self.next_index = 0;
        self.last_index = LOG_MAX_ENTRIES as u64 - 1;
    }
}

/// Writes `s` into a fixed-size nul-terminated byte buffer, truncating if
/// necessary.
pub fn write_cstr_into(buf: &mut [u8], s: &str) {
    buf.fill(0);
    let bytes = s.as_bytes();
    let n = bytes.len().min(buf.len() - 1);
    buf[..n].copy_from_slice(&bytes[..n]);
}

/// Reads a nul-terminated string out of a fixed-size byte buffer.
pub fn read_cstr_from(buf: &[u8]) -> String {
    CStr::from_bytes_until_nul(buf)
        .ok()
        .and_then(|c| c.to_str().ok())
        .unwrap_or("")
        .to_owned()
}
