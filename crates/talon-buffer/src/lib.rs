//! Buffer pool management for TalonDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - LRU-K eviction policy
//! - Pin counting with scoped page guards
//! - Dirty page tracking and write-back on eviction

mod frame;
mod guard;
mod pool;
mod replacer;
mod stats;

pub use frame::{Frame, FrameId};
pub use guard::{PageGuard, ReadPageGuard, WritePageGuard};
pub use pool::{BufferPoolConfig, BufferPoolManager};
pub use replacer::{AccessType, LruKReplacer, Replacer};
pub use stats::{BufferPoolStats, StatsSnapshot};
