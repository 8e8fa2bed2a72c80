use std::collections::LinkedList;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::common::{
    BufferPoolConfig, FrameId, PageId, Result, TesseraError, DEFAULT_BUCKET_SIZE,
    FLUSH_LATCH_TIMEOUT, PAGE_SIZE,
};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::page_guard::ReleaseCallback;
use super::{BasicPageGuard, FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// State shared between the manager and the release callbacks of its guards
struct PoolCore {
    /// The buffer pool frames
    frames: Vec<Arc<FrameHeader>>,
    /// Page table: maps resident page IDs to frame IDs
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// Frames that hold no page. Its mutex is the pool-wide latch: every
    /// operation that touches residency holds it for its whole duration.
    free_list: Mutex<LinkedList<FrameId>>,
    /// LRU-K replacer for eviction decisions
    replacer: LruKReplacer,
    /// Disk scheduler for page I/O
    disk_scheduler: DiskScheduler,
}

impl PoolCore {
    fn frame(&self, frame_id: FrameId) -> &Arc<FrameHeader> {
        &self.frames[frame_id.as_usize()]
    }

    /// Takes a frame from the free list, or evicts one.
    /// A dirty victim is written back before its frame is reused.
    fn acquire_frame(&self, free_list: &mut LinkedList<FrameId>) -> Result<FrameId> {
        if let Some(frame_id) = free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.evict().ok_or(TesseraError::BufferPoolFull)?;
        let frame = self.frame(frame_id);
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            if let Err(e) = self.disk_scheduler.schedule_write_sync(old_page_id, &data) {
                // keep the victim resident and evictable
                self.replacer.record_access(frame_id);
                self.replacer.set_evictable(frame_id, true);
                return Err(e);
            }
        }

        self.page_table.remove(&old_page_id);
        frame.reset();
        debug!("evicted {} from {}", old_page_id, frame_id);
        Ok(frame_id)
    }

    /// Maps `page_id` to `frame_id` and pins it once.
    fn install(&self, frame_id: FrameId, page_id: PageId) -> Arc<FrameHeader> {
        let frame = self.frame(frame_id);
        frame.set_page_id(page_id);
        frame.pin();
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        Arc::clone(frame)
    }

    fn new_page(&self) -> Result<(PageId, Arc<FrameHeader>)> {
        let mut free_list = self.free_list.lock();
        let frame_id = self.acquire_frame(&mut free_list)?;

        let page_id = match self.disk_scheduler.disk_manager().allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                free_list.push_back(frame_id);
                return Err(e);
            }
        };

        Ok((page_id, self.install(frame_id, page_id)))
    }

    fn fetch_page(&self, page_id: PageId) -> Result<Arc<FrameHeader>> {
        if !page_id.is_valid() {
            return Err(TesseraError::InvalidPageId(page_id));
        }

        let mut free_list = self.free_list.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = self.frame(frame_id);
            frame.pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut free_list)?;
        let mut data = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk_scheduler.schedule_read_sync(page_id, &mut data) {
            free_list.push_back(frame_id);
            return Err(e);
        }
        self.frame(frame_id).copy_from(&data);

        Ok(self.install(frame_id, page_id))
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _latch = self.free_list.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = self.frame(frame_id);
        if frame.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            frame.set_dirty(true);
        }
        if let Some(0) = frame.unpin() {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    fn release_callback(self: &Arc<Self>) -> ReleaseCallback {
        let core = Arc::clone(self);
        Box::new(move |page_id, is_dirty| {
            if !core.unpin_page(page_id, is_dirty) {
                warn!("released guard on {} that was not pinned", page_id);
            }
        })
    }
}

/// BufferPoolManager is responsible for fetching database pages from disk
/// and storing them in memory. It manages a fixed number of frames and uses
/// the LRU-K replacement policy to decide which pages to evict.
///
/// Pages are leased in two ways. The raw calls (`new_page`, `fetch_page`)
/// pin a frame and leave it to the caller to `unpin_page` it. The guarded
/// calls return RAII guards that unpin on drop, optionally holding the
/// page latch.
///
/// Calls never wait for a pin to be released: when every frame is pinned,
/// they fail with `BufferPoolFull`.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// Shared state
    core: Arc<PoolCore>,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size, k value for LRU-K,
    /// and disk manager.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let config = BufferPoolConfig {
            pool_size,
            replacer_k: k,
            bucket_size: DEFAULT_BUCKET_SIZE,
        };
        Self::with_config(config, disk_manager)
    }

    pub fn with_config(config: BufferPoolConfig, disk_manager: Arc<DiskManager>) -> Self {
        let pool_size = config.pool_size;
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = LinkedList::new();

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let core = Arc::new(PoolCore {
            frames,
            page_table: ExtendibleHashTable::new(config.bucket_size),
            free_list: Mutex::new(free_list),
            replacer: LruKReplacer::new(config.replacer_k, pool_size),
            disk_scheduler: DiskScheduler::new(disk_manager),
        });

        debug!(
            "buffer pool with {} frames, LRU-{}",
            pool_size, config.replacer_k
        );
        Self { pool_size, core }
    }

    /// Allocates a fresh page and pins it in a zeroed frame.
    /// The caller must `unpin_page` it when done.
    pub fn new_page(&self) -> Result<(PageId, Arc<FrameHeader>)> {
        self.core.new_page()
    }

    /// Pins the page, reading it from disk if it isn't resident.
    /// The caller must `unpin_page` it when done.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<FrameHeader>> {
        self.core.fetch_page(page_id)
    }

    /// Drops one pin on the page. A true `is_dirty` marks the page dirty; a
    /// false one leaves an existing dirty flag alone.
    /// Returns false if the page isn't resident or isn't pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.core.unpin_page(page_id, is_dirty)
    }

    /// Allocates a fresh page and returns it write-latched.
    pub fn new_page_guarded(&self) -> Result<WritePageGuard> {
        let (page_id, frame) = self.core.new_page()?;
        Ok(WritePageGuard::new(
            page_id,
            frame,
            self.core.release_callback(),
        ))
    }

    /// Fetches a page pinned but not latched.
    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<BasicPageGuard> {
        let frame = self.core.fetch_page(page_id)?;
        Ok(BasicPageGuard::new(
            page_id,
            frame,
            self.core.release_callback(),
        ))
    }

    /// Fetches a page for read access.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.core.fetch_page(page_id)?;
        Ok(ReadPageGuard::new(
            page_id,
            frame,
            self.core.release_callback(),
        ))
    }

    /// Fetches a page for write access.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.core.fetch_page(page_id)?;
        Ok(WritePageGuard::new(
            page_id,
            frame,
            self.core.release_callback(),
        ))
    }

    /// Writes the page to disk whether or not it is dirty, and clears its
    /// dirty flag. Returns false if the page isn't resident.
    ///
    /// The bytes are copied under the page's read latch. A page that stays
    /// write-latched for longer than `FLUSH_LATCH_TIMEOUT` is not flushed
    /// and yields `PageLatched`; its writer leaves it dirty.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Err(TesseraError::InvalidPageId(page_id));
        }

        let frame = {
            let _latch = self.core.free_list.lock();
            match self.core.page_table.find(&page_id) {
                Some(frame_id) => {
                    let frame = self.core.frame(frame_id);
                    frame.pin();
                    self.core.replacer.set_evictable(frame_id, false);
                    Arc::clone(frame)
                }
                None => return Ok(false),
            }
        };

        let mut data = [0u8; PAGE_SIZE];
        let result = match frame.try_read_data_for(FLUSH_LATCH_TIMEOUT) {
            Some(latch) => {
                frame.set_dirty(false);
                data.copy_from_slice(&latch[..]);
                self.core.disk_scheduler.schedule_write_sync(page_id, &data)
            }
            None => Err(TesseraError::PageLatched(page_id)),
        };
        if result.is_err() && !matches!(result, Err(TesseraError::PageLatched(_))) {
            frame.set_dirty(true);
        }

        self.core.unpin_page(page_id, false);
        result.map(|_| true)
    }

    /// Flushes every resident page to disk. Pages held write-latched
    /// throughout the flush are skipped and stay dirty.
    pub fn flush_all_pages(&self) -> Result<()> {
        let resident: Vec<PageId> = {
            let _latch = self.core.free_list.lock();
            self.core
                .frames
                .iter()
                .map(|frame| frame.page_id())
                .filter(|page_id| page_id.is_valid())
                .collect()
        };

        for page_id in resident {
            match self.flush_page(page_id) {
                Ok(_) => {}
                Err(TesseraError::PageLatched(_)) => {
                    warn!("skipped flushing {}, it is write-latched", page_id)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Removes a page from the pool and deallocates it on disk.
    ///
    /// Returns true if the page was deleted or wasn't resident to begin
    /// with, false if it is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Err(TesseraError::InvalidPageId(page_id));
        }

        let mut free_list = self.core.free_list.lock();

        if let Some(frame_id) = self.core.page_table.find(&page_id) {
            let frame = self.core.frame(frame_id);
            if frame.pin_count() > 0 {
                return Ok(false);
            }

            self.core.replacer.remove(frame_id)?;
            self.core.page_table.remove(&page_id);
            frame.reset();
            free_list.push_back(frame_id);
            debug!("deleted {} from {}", page_id, frame_id);
        }

        self.core.disk_scheduler.disk_manager().deallocate_page(page_id)?;
        Ok(true)
    }

    /// Returns the pin count for a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let _latch = self.core.free_list.lock();
        self.core
            .page_table
            .find(&page_id)
            .map(|frame_id| self.core.frame(frame_id).pin_count())
    }

    /// Returns the dirty flag for a resident page.
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let _latch = self.core.free_list.lock();
        self.core
            .page_table
            .find(&page_id)
            .map(|frame_id| self.core.frame(frame_id).is_dirty())
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.core.free_list.lock().len()
    }

    /// Returns the number of frames that could be evicted right now.
    pub fn evictable_count(&self) -> usize {
        self.core.replacer.size()
    }

    /// Returns the underlying disk manager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.core.disk_scheduler.disk_manager()
    }
}
