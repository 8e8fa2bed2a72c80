use log::trace;
use parking_lot::Mutex;

use crate::common::{FrameId, Result, TesseraError};

const NIL: usize = usize::MAX;

/// Doubly linked list threaded through per-frame link slots.
///
/// The front is the most recently inserted frame, the back the oldest, so
/// victims are searched from the back. Every operation is O(1) except
/// iteration.
#[derive(Debug)]
struct FrameList {
    head: usize,
    tail: usize,
    prev: Vec<usize>,
    next: Vec<usize>,
    linked: Vec<bool>,
}

impl FrameList {
    fn new(capacity: usize) -> Self {
        Self {
            head: NIL,
            tail: NIL,
            prev: vec![NIL; capacity],
            next: vec![NIL; capacity],
            linked: vec![false; capacity],
        }
    }

    fn contains(&self, idx: usize) -> bool {
        self.linked[idx]
    }

    fn push_front(&mut self, idx: usize) {
        debug_assert!(!self.linked[idx]);
        self.prev[idx] = NIL;
        self.next[idx] = self.head;
        if self.head != NIL {
            self.prev[self.head] = idx;
        } else {
            self.tail = idx;
        }
        self.head = idx;
        self.linked[idx] = true;
    }

    fn remove(&mut self, idx: usize) {
        if !self.linked[idx] {
            return;
        }
        let (p, n) = (self.prev[idx], self.next[idx]);
        if p != NIL {
            self.next[p] = n;
        } else {
            self.head = n;
        }
        if n != NIL {
            self.prev[n] = p;
        } else {
            self.tail = p;
        }
        self.prev[idx] = NIL;
        self.next[idx] = NIL;
        self.linked[idx] = false;
    }

    /// Walks from the oldest entry towards the newest.
    fn iter_from_back(&self) -> impl Iterator<Item = usize> + '_ {
        let mut cursor = self.tail;
        std::iter::from_fn(move || {
            if cursor == NIL {
                return None;
            }
            let current = cursor;
            cursor = self.prev[current];
            Some(current)
        })
    }
}

#[derive(Debug)]
struct ReplacerState {
    /// Frames with fewer than k accesses, FIFO by first access
    history: FrameList,
    /// Frames with k or more accesses, most recently used at the front
    cache: FrameList,
    access_count: Vec<usize>,
    evictable: Vec<bool>,
    /// Number of evictable frames across both lists
    curr_size: usize,
}

/// LRU-K Replacement Policy
///
/// Frames with fewer than k recorded accesses have an infinite backward
/// k-distance and are evicted first, oldest first. Only when none of them is
/// evictable does the replacer fall back to the frames with k or more
/// accesses, least recently used first.
pub struct LruKReplacer {
    k: usize,
    num_frames: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer with the given k value and frame count.
    pub fn new(k: usize, num_frames: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            k,
            num_frames,
            state: Mutex::new(ReplacerState {
                history: FrameList::new(num_frames),
                cache: FrameList::new(num_frames),
                access_count: vec![0; num_frames],
                evictable: vec![false; num_frames],
                curr_size: 0,
            }),
        }
    }

    fn check_frame(&self, frame_id: FrameId) -> usize {
        let idx = frame_id.as_usize();
        assert!(
            idx < self.num_frames,
            "{} out of range for replacer of {} frames",
            frame_id,
            self.num_frames
        );
        idx
    }

    /// Picks a victim among the evictable frames and stops tracking it.
    /// Returns None if no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.curr_size == 0 {
            return None;
        }

        let victim = state
            .history
            .iter_from_back()
            .find(|&idx| state.evictable[idx])
            .or_else(|| {
                state
                    .cache
                    .iter_from_back()
                    .find(|&idx| state.evictable[idx])
            })?;

        state.history.remove(victim);
        state.cache.remove(victim);
        state.access_count[victim] = 0;
        state.evictable[victim] = false;
        state.curr_size -= 1;

        let frame_id = FrameId::new(victim as u32);
        trace!("replacer evicted {}", frame_id);
        Some(frame_id)
    }

    /// Records an access to the given frame.
    /// This should be called after a page is pinned in the BufferPoolManager.
    pub fn record_access(&self, frame_id: FrameId) {
        let idx = self.check_frame(frame_id);
        let mut state = self.state.lock();

        state.access_count[idx] += 1;
        let count = state.access_count[idx];

        if count == self.k {
            state.history.remove(idx);
            state.cache.push_front(idx);
        } else if count > self.k {
            state.cache.remove(idx);
            state.cache.push_front(idx);
        } else if !state.history.contains(idx) {
            state.history.push_front(idx);
        }
    }

    /// Sets whether a frame is evictable.
    /// Frames without any recorded access are ignored.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) {
        let idx = self.check_frame(frame_id);
        let mut state = self.state.lock();

        if state.access_count[idx] == 0 {
            return;
        }
        match (state.evictable[idx], is_evictable) {
            (false, true) => state.curr_size += 1,
            (true, false) => state.curr_size -= 1,
            _ => {}
        }
        state.evictable[idx] = is_evictable;
    }

    /// Removes a frame from the replacer entirely, discarding its history.
    /// This is called when a page is deleted from the BufferPoolManager.
    ///
    /// Removing an untracked frame is a no-op. Removing a tracked frame that
    /// is not evictable is an error.
    pub fn remove(&self, frame_id: FrameId) -> Result<()> {
        let idx = self.check_frame(frame_id);
        let mut state = self.state.lock();

        if state.access_count[idx] == 0 {
            return Ok(());
        }
        if !state.evictable[idx] {
            return Err(TesseraError::FrameNotEvictable(frame_id));
        }

        state.history.remove(idx);
        state.cache.remove(idx);
        state.access_count[idx] = 0;
        state.evictable[idx] = false;
        state.curr_size -= 1;
        Ok(())
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().curr_size
    }

    /// Returns the k value of this replacer.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Evictability of a tracked frame, None if the frame has no history.
    pub fn evictable_of(&self, frame_id: FrameId) -> Option<bool> {
        let idx = self.check_frame(frame_id);
        let state = self.state.lock();
        (state.access_count[idx] > 0).then(|| state.evictable[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: u32) -> FrameId {
        FrameId::new(id)
    }

    #[test]
    fn test_lru_k_replacer_new() {
        let replacer = LruKReplacer::new(2, 10);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.k(), 2);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_k_replacer_history_is_fifo() {
        let replacer = LruKReplacer::new(2, 10);

        for id in [0, 1, 2] {
            replacer.record_access(frame(id));
            replacer.set_evictable(frame(id), true);
        }
        replacer.record_access(frame(3));
        replacer.set_evictable(frame(3), true);

        assert_eq!(replacer.size(), 4);
        assert_eq!(replacer.evict(), Some(frame(0)));
        assert_eq!(replacer.evict(), Some(frame(1)));
        assert_eq!(replacer.size(), 2);
    }

    #[test]
    fn test_lru_k_replacer_history_before_cache() {
        let replacer = LruKReplacer::new(2, 10);

        replacer.record_access(frame(0));
        replacer.record_access(frame(0));
        replacer.record_access(frame(1));

        replacer.set_evictable(frame(0), true);
        replacer.set_evictable(frame(1), true);

        // frame 1 has an infinite k-distance
        assert_eq!(replacer.evict(), Some(frame(1)));
        assert_eq!(replacer.evict(), Some(frame(0)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_k_replacer_cache_is_lru() {
        let replacer = LruKReplacer::new(2, 10);

        for id in [0, 1, 2] {
            replacer.record_access(frame(id));
            replacer.record_access(frame(id));
            replacer.set_evictable(frame(id), true);
        }
        // touching frame 0 again makes frame 1 the least recently used
        replacer.record_access(frame(0));

        assert_eq!(replacer.evict(), Some(frame(1)));
        assert_eq!(replacer.evict(), Some(frame(2)));
        assert_eq!(replacer.evict(), Some(frame(0)));
    }

    #[test]
    fn test_lru_k_replacer_set_evictable_untracked_is_noop() {
        let replacer = LruKReplacer::new(2, 10);
        replacer.set_evictable(frame(4), true);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evictable_of(frame(4)), None);
    }

    #[test]
    fn test_lru_k_replacer_toggle_evictable() {
        let replacer = LruKReplacer::new(2, 10);

        replacer.record_access(frame(0));
        replacer.set_evictable(frame(0), true);
        replacer.set_evictable(frame(0), true);
        assert_eq!(replacer.size(), 1);

        replacer.set_evictable(frame(0), false);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);

        replacer.set_evictable(frame(0), true);
        assert_eq!(replacer.evict(), Some(frame(0)));
        assert_eq!(replacer.evictable_of(frame(0)), None);
    }

    #[test]
    fn test_lru_k_replacer_remove() {
        let replacer = LruKReplacer::new(2, 10);

        // untracked
        assert!(replacer.remove(frame(3)).is_ok());

        replacer.record_access(frame(0));
        assert!(matches!(
            replacer.remove(frame(0)),
            Err(TesseraError::FrameNotEvictable(_))
        ));

        replacer.set_evictable(frame(0), true);
        assert_eq!(replacer.size(), 1);
        replacer.remove(frame(0)).unwrap();
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_k_replacer_k_of_one_is_plain_lru() {
        let replacer = LruKReplacer::new(1, 4);
        for id in [0, 1, 2] {
            replacer.record_access(frame(id));
            replacer.set_evictable(frame(id), true);
        }
        replacer.record_access(frame(0));
        assert_eq!(replacer.evict(), Some(frame(1)));
    }

    #[test]
    #[should_panic]
    fn test_lru_k_replacer_out_of_range_frame() {
        let replacer = LruKReplacer::new(2, 4);
        replacer.record_access(frame(4));
    }
}
