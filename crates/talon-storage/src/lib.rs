//! Disk-resident page storage for TalonDB.
//!
//! This crate provides page-granular file I/O beneath the buffer pool.

pub mod disk;

pub use disk::{DiskManager, DiskManagerConfig};
