//! Buffer pool manager.

use crate::frame::{Frame, FrameId};
use crate::guard::{PageGuard, ReadPageGuard, WritePageGuard};
use crate::replacer::{AccessType, LruKReplacer, Replacer};
use crate::stats::{BufferPoolStats, StatsSnapshot};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use sysinfo::System;
use talon_common::page::{PageId, PAGE_SIZE};
use talon_common::{Result, StorageConfig, TalonError};
use talon_storage::DiskManager;

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
    /// K parameter of the LRU-K replacement policy.
    pub replacer_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            num_frames: 1024,
            replacer_k: 2,
        }
    }
}

impl From<&StorageConfig> for BufferPoolConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            num_frames: config.buffer_pool_frames,
            replacer_k: config.replacer_k,
        }
    }
}

/// Buffer pool manager.
///
/// Caches disk pages in a fixed array of frames with:
/// - Page ID to frame ID mapping for resident pages
/// - Free frame list for unused slots
/// - LRU-K replacement for eviction
/// - Pin counting for concurrent access
///
/// One mutex guards the page table, the free list, and the page-id
/// allocator; every public operation holds it from entry to return,
/// including during disk I/O. Frame metadata is only mutated under that
/// lock. The per-frame data latch is separate and is taken by page guards
/// after a fetch returns.
pub struct BufferPoolManager {
    /// Number of frames (immutable after construction).
    pool_size: usize,
    /// Frame array, allocated once and never moved.
    frames: Box<[Frame]>,
    /// Bookkeeping state behind the pool lock.
    state: Mutex<PoolState>,
    /// Eviction policy; internally synchronized, driven under the pool lock.
    replacer: LruKReplacer,
    /// Handles all disk I/O.
    disk: Arc<DiskManager>,
    /// Performance counters.
    stats: BufferPoolStats,
}

struct PoolState {
    /// Maps resident page ids to their frame.
    page_table: HashMap<PageId, FrameId>,
    /// Frames with no page assigned, reused front-first.
    free_list: VecDeque<FrameId>,
    /// Monotonic page-id allocator; ids are never reused.
    next_page_id: i32,
}

impl BufferPoolManager {
    /// Creates a new buffer pool manager.
    ///
    /// # Panics
    /// Panics if the configured frame count is 0.
    pub fn new(config: BufferPoolConfig, disk: Arc<DiskManager>) -> Self {
        let num_frames = config.num_frames;
        assert!(num_frames > 0, "buffer pool must have at least one frame");

        let frames: Vec<Frame> = (0..num_frames)
            .map(|i| Frame::new(FrameId(i as i32)))
            .collect();

        // All frames start on the free list.
        let free_list: VecDeque<FrameId> = (0..num_frames).map(|i| FrameId(i as i32)).collect();

        Self {
            pool_size: num_frames,
            frames: frames.into_boxed_slice(),
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                next_page_id: 0,
            }),
            replacer: LruKReplacer::new(num_frames, config.replacer_k),
            disk,
            stats: BufferPoolStats::new(),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames so the cache stays useful on low-memory
    /// systems; no upper limit.
    pub fn auto_sized(replacer_k: usize, disk: Arc<DiskManager>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(
            BufferPoolConfig {
                num_frames,
                replacer_k,
            },
            disk,
        )
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Returns the number of resident frames the replacer may reclaim.
    pub fn evictable_count(&self) -> usize {
        self.replacer.size()
    }

    /// Checks if a page is resident in the pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Returns a snapshot of the pool's counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ------------------------------------------------------------------
    // Core operations
    // ------------------------------------------------------------------

    /// Allocates a fresh page and pins it into a frame.
    ///
    /// Returns `Ok(None)` when every frame is pinned (no free frame and
    /// nothing evictable). The returned frame holds one pin on behalf of
    /// the caller; its buffer is zeroed and its page id freshly assigned.
    pub fn new_page(&self) -> Result<Option<&Frame>> {
        let mut state = self.state.lock();

        let Some(frame_id) = self.acquire_frame(&mut state)? else {
            return Ok(None);
        };

        let page_id = PageId::new(state.next_page_id);
        state.next_page_id += 1;

        let frame = &self.frames[frame_id.index()];
        frame.write_data().fill(0);
        frame.set_page_id(page_id);
        frame.set_dirty(false);

        state.page_table.insert(page_id, frame_id);
        self.pin_frame(frame, frame_id, AccessType::Unknown)?;

        Ok(Some(frame))
    }

    /// Fetches a page, reading it from disk if it is not resident.
    ///
    /// Returns `Ok(None)` when the page is not resident and every frame is
    /// pinned. The returned frame holds one pin on behalf of the caller.
    /// The frame latch is not touched here; the guard variants acquire it
    /// after this returns.
    pub fn fetch_page(&self, page_id: PageId, access_type: AccessType) -> Result<Option<&Frame>> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.index()];
            self.pin_frame(frame, frame_id, access_type)?;
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(frame));
        }

        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let Some(frame_id) = self.acquire_frame(&mut state)? else {
            return Ok(None);
        };

        let frame = &self.frames[frame_id.index()];
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        state.page_table.insert(page_id, frame_id);
        self.pin_frame(frame, frame_id, access_type)?;

        // Synchronous read into the frame, still under the pool lock.
        {
            let mut data = frame.write_data();
            if let Err(err) = self.disk.read_page(page_id, &mut data) {
                drop(data);
                self.discard_failed_fetch(&mut state, page_id, frame_id);
                return Err(err.for_page(page_id));
            }
        }

        self.stats.pages_read.fetch_add(1, Ordering::Relaxed);
        Ok(Some(frame))
    }

    /// Drops one pin on a resident page, OR-ing in the dirty flag.
    ///
    /// Returns false if the page is not resident or its pin count is
    /// already zero. Never performs I/O.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool, _access_type: AccessType) -> bool {
        let state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let frame = &self.frames[frame_id.index()];
        if frame.pin_count() == 0 {
            return false;
        }

        if frame.unpin() == 0 {
            // The frame id came out of the page table, always in range.
            let _ = self.replacer.set_evictable(frame_id, true);
        }

        if is_dirty {
            frame.set_dirty(true);
        }

        true
    }

    /// Writes a resident page back to disk and clears its dirty flag.
    ///
    /// The write is unconditional: a clean page is written too. Returns
    /// false if the page is not resident; `PageId::INVALID` is rejected.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let state = self.state.lock();
        self.flush_locked(&state, page_id)
    }

    /// Writes every resident page back to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let state = self.state.lock();

        let page_ids: Vec<PageId> = state.page_table.keys().copied().collect();
        for page_id in page_ids {
            self.flush_locked(&state, page_id)?;
        }

        Ok(())
    }

    /// Drops a page from the pool, returning its frame to the free list.
    ///
    /// Returns `Ok(true)` if the page was deleted or was not resident to
    /// begin with, `Ok(false)` if it is pinned. The page id is retired,
    /// not recycled.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(true);
        };

        let frame = &self.frames[frame_id.index()];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        state.page_table.remove(&page_id);
        self.replacer.remove(frame_id)?;
        state.free_list.push_back(frame_id);
        frame.reset();

        Self::deallocate_page(page_id);

        Ok(true)
    }

    // ------------------------------------------------------------------
    // Guarded variants
    // ------------------------------------------------------------------

    /// [`Self::new_page`] wrapped in a scope guard that unpins on drop.
    pub fn new_page_guarded(&self) -> Result<Option<PageGuard<'_>>> {
        let Some(frame) = self.new_page()? else {
            return Ok(None);
        };
        Ok(Some(PageGuard::new(self, frame)))
    }

    /// Fetches a page behind a scope guard that unpins on drop.
    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<Option<PageGuard<'_>>> {
        let Some(frame) = self.fetch_page(page_id, AccessType::Unknown)? else {
            return Ok(None);
        };
        Ok(Some(PageGuard::new(self, frame)))
    }

    /// Fetches a page and takes its read latch for the guard's lifetime.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<Option<ReadPageGuard<'_>>> {
        let Some(frame) = self.fetch_page(page_id, AccessType::Unknown)? else {
            return Ok(None);
        };
        Ok(Some(ReadPageGuard::new(self, frame)))
    }

    /// Fetches a page and takes its write latch for the guard's lifetime.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<Option<WritePageGuard<'_>>> {
        let Some(frame) = self.fetch_page(page_id, AccessType::Unknown)? else {
            return Ok(None);
        };
        Ok(Some(WritePageGuard::new(self, frame)))
    }

    // ------------------------------------------------------------------
    // Internals (pool lock held)
    // ------------------------------------------------------------------

    /// Obtains a reusable frame: free list first, then eviction.
    ///
    /// A dirty victim is written back before its slot is handed out, and
    /// its page-table entry is erased. `Ok(None)` means nothing is free
    /// and nothing is evictable.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<Option<FrameId>> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let Some(frame_id) = self.replacer.evict() else {
            return Ok(None);
        };

        let frame = &self.frames[frame_id.index()];
        let old_page_id = frame.page_id();
        debug_assert!(old_page_id.is_valid(), "evicted a frame with no page");

        if frame.is_dirty() {
            self.flush_locked(state, old_page_id)?;
        }
        state.page_table.remove(&old_page_id);
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);

        Ok(Some(frame_id))
    }

    /// Pins a frame and registers the access with the replacer.
    fn pin_frame(&self, frame: &Frame, frame_id: FrameId, access_type: AccessType) -> Result<()> {
        frame.pin();
        self.replacer.record_access(frame_id, access_type)?;
        self.replacer.set_evictable(frame_id, false)?;
        Ok(())
    }

    /// Flush body shared by the public entry points and the victim path,
    /// which already holds the pool lock.
    fn flush_locked(&self, state: &PoolState, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Err(TalonError::InvalidArgument(
                "cannot flush the invalid page id".to_string(),
            ));
        }

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };

        let frame = &self.frames[frame_id.index()];
        {
            let data = frame.read_data();
            self.disk
                .write_page(page_id, &data)
                .map_err(|err| err.for_page(page_id))?;
        }
        frame.set_dirty(false);
        self.stats.pages_written.fetch_add(1, Ordering::Relaxed);

        Ok(true)
    }

    /// Rolls back a fetch whose disk read failed: the half-initialized
    /// frame goes back to the free list instead of staying resident with
    /// garbage bytes.
    fn discard_failed_fetch(&self, state: &mut PoolState, page_id: PageId, frame_id: FrameId) {
        state.page_table.remove(&page_id);
        let _ = self.replacer.set_evictable(frame_id, true);
        let _ = self.replacer.remove(frame_id);
        self.frames[frame_id.index()].reset();
        state.free_list.push_back(frame_id);
    }

    /// Page ids are allocated append-only; a deleted page's id is retired,
    /// never handed out again.
    fn deallocate_page(_page_id: PageId) {}
}
