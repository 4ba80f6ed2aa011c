//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use talon_common::{Result, TalonError};

/// How a page access reached the buffer pool.
///
/// Recorded with every access. The LRU-K ordering does not currently branch
/// on it; it exists so access-pattern-aware policies can slot in behind the
/// same interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessType {
    #[default]
    Unknown,
    Lookup,
    Scan,
    Index,
}

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId, access_type: AccessType) -> Result<()>;

    /// Marks a frame as evictable or pins it against eviction.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<()>;

    /// Selects a victim frame and drops it from the replacer.
    ///
    /// Returns None if no frames are evictable.
    fn evict(&self) -> Option<FrameId>;

    /// Drops a frame's access state entirely.
    ///
    /// The frame must be evictable; unknown frames are a no-op.
    fn remove(&self, frame_id: FrameId) -> Result<()>;

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// LRU-K replacement policy.
///
/// Orders eviction candidates by their backward K-distance: the age of the
/// K-th most recent access. Frames with fewer than K recorded accesses have
/// infinite backward K-distance and are always preferred as victims, in
/// first-recorded order. Among fully-observed frames the one whose K-th most
/// recent access is oldest goes first.
///
/// Internally each tracked frame owns a bounded history of its last K access
/// timestamps and sits in one of two buckets:
/// - `cold`: fewer than K accesses, insertion order;
/// - `warm`: exactly K retained accesses, ascending by oldest retained
///   timestamp.
pub struct LruKReplacer {
    /// Number of frames this replacer tracks (the pool size).
    capacity: usize,
    /// The K in LRU-K.
    k: usize,
    /// Bucket and history state, guarded by a single mutex.
    state: Mutex<LruKState>,
}

struct LruKNode {
    /// Most recent access timestamps, oldest at the front, at most K long.
    history: VecDeque<u64>,
    /// Whether the policy may choose this frame as a victim.
    evictable: bool,
}

struct LruKState {
    /// Per-frame access state for every tracked frame.
    nodes: HashMap<FrameId, LruKNode>,
    /// Frames with fewer than K accesses, in first-recorded order.
    cold: VecDeque<FrameId>,
    /// Frames with K retained accesses, ascending by oldest retained stamp.
    warm: Vec<FrameId>,
    /// Logical clock, bumped once per recorded access.
    current_ts: u64,
    /// Count of tracked frames with the evictable flag set.
    evictable_count: usize,
}

impl LruKReplacer {
    /// Creates a replacer tracking `capacity` frames with the given K.
    ///
    /// # Panics
    /// Panics if `k` is 0.
    pub fn new(capacity: usize, k: usize) -> Self {
        assert!(k > 0, "k must be > 0");
        Self {
            capacity,
            k,
            state: Mutex::new(LruKState {
                nodes: HashMap::new(),
                cold: VecDeque::new(),
                warm: Vec::new(),
                current_ts: 0,
                evictable_count: 0,
            }),
        }
    }

    /// Returns the number of frames this replacer tracks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the K parameter.
    pub fn k(&self) -> usize {
        self.k
    }

    fn check_frame_id(&self, frame_id: FrameId) -> Result<()> {
        if !frame_id.is_valid() || frame_id.index() >= self.capacity {
            return Err(TalonError::InvalidArgument(format!(
                "{frame_id} out of range for replacer capacity {}",
                self.capacity
            )));
        }
        Ok(())
    }

    /// Removes `frame_id` from whichever bucket currently holds it.
    fn detach(state: &mut LruKState, frame_id: FrameId) {
        if let Some(pos) = state.cold.iter().position(|&f| f == frame_id) {
            let _ = state.cold.remove(pos);
        } else if let Some(pos) = state.warm.iter().position(|&f| f == frame_id) {
            state.warm.remove(pos);
        }
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&self, frame_id: FrameId, _access_type: AccessType) -> Result<()> {
        self.check_frame_id(frame_id)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        state.current_ts += 1;
        let now = state.current_ts;

        let kth = match state.nodes.get_mut(&frame_id) {
            None => {
                // First sighting: every frame starts in the cold bucket.
                let mut history = VecDeque::with_capacity(self.k);
                history.push_back(now);
                state.nodes.insert(
                    frame_id,
                    LruKNode {
                        history,
                        evictable: false,
                    },
                );
                state.cold.push_back(frame_id);
                return Ok(());
            }
            Some(node) => {
                node.history.push_back(now);
                if node.history.len() < self.k {
                    // Still cold; cold ordering is by first sighting, so the
                    // node keeps its position.
                    return Ok(());
                }
                if node.history.len() > self.k {
                    node.history.pop_front();
                }
                node.history[0]
            }
        };

        // The node now retains exactly K stamps: move it to its sorted slot
        // in the warm bucket.
        Self::detach(state, frame_id);
        let LruKState { nodes, warm, .. } = state;
        let pos = warm
            .iter()
            .position(|f| nodes[f].history[0] > kth)
            .unwrap_or(warm.len());
        warm.insert(pos, frame_id);

        Ok(())
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<()> {
        self.check_frame_id(frame_id)?;

        let mut guard = self.state.lock();
        let LruKState {
            nodes,
            evictable_count,
            ..
        } = &mut *guard;

        // Unknown frames are a silent no-op.
        let Some(node) = nodes.get_mut(&frame_id) else {
            return Ok(());
        };

        if node.evictable != evictable {
            node.evictable = evictable;
            if evictable {
                *evictable_count += 1;
            } else {
                *evictable_count -= 1;
            }
        }

        Ok(())
    }

    fn evict(&self) -> Option<FrameId> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        // Cold frames have infinite backward K-distance and always go first,
        // oldest sighting first. Warm frames follow in bucket order, which is
        // ascending by oldest retained stamp.
        let victim = {
            let LruKState {
                nodes, cold, warm, ..
            } = &*state;
            cold.iter()
                .find(|f| nodes[*f].evictable)
                .copied()
                .or_else(|| warm.iter().find(|f| nodes[*f].evictable).copied())
        }?;

        Self::detach(state, victim);
        state.nodes.remove(&victim);
        state.evictable_count -= 1;

        Some(victim)
    }

    fn remove(&self, frame_id: FrameId) -> Result<()> {
        self.check_frame_id(frame_id)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        // Unknown frames are a silent no-op.
        let Some(node) = state.nodes.get(&frame_id) else {
            return Ok(());
        };

        if !node.evictable {
            return Err(TalonError::InvalidArgument(format!(
                "{frame_id} is pinned and cannot be dropped from the replacer"
            )));
        }

        Self::detach(state, frame_id);
        state.nodes.remove(&frame_id);
        state.evictable_count -= 1;

        Ok(())
    }

    fn size(&self) -> usize {
        self.state.lock().evictable_count
    }
}
