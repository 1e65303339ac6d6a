//! On-device layout, allocator, and log replay engine for tagfs: a
//! log-structured, shared-memory filesystem over DAX devices.
//!
//! This crate is the user-space management core. The filesystem's file
//! → extent mapping is performed by a kernel driver; this crate talks to
//! it over the ioctl contract in [`ioctl`] and otherwise owns everything
//! that can live in user space: the on-device layout ([`layout`]), the
//! bitmap allocator ([`alloc`]), the log writer/replayer ([`log`]),
//! file/directory creation ([`create`]), `mkmeta` bootstrap
//! ([`mkmeta`]), and `fsck` ([`fsck`]).

pub mod alloc;
pub mod bitmap;
pub mod create;
pub mod devsize;
pub mod error;
pub mod fsck;
pub mod ioctl;
pub mod layout;
pub mod log;
pub mod mapping;
pub mod mkmeta;

pub use error::{Error, Result};
