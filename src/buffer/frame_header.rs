use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Raw bytes of one page
pub type PageData = [u8; PAGE_SIZE];

/// FrameHeader manages a single buffer frame in the buffer pool.
/// It stores metadata about the frame and the actual page data.
///
/// The data lock doubles as the page latch. It lives behind an `Arc` so page
/// guards can own their latch for as long as they hold the pin.
pub struct FrameHeader {
    /// The frame ID (index in the buffer pool)
    frame_id: FrameId,
    /// The page ID stored in this frame (INVALID_PAGE_ID if empty)
    page_id: RwLock<PageId>,
    /// Pin count - number of holders currently using this frame
    pin_count: AtomicU32,
    /// Whether the page has been modified since it was last written out
    is_dirty: AtomicBool,
    /// The page data and its latch
    pub(crate) data: Arc<RwLock<PageData>>,
}

impl FrameHeader {
    /// Creates a new FrameHeader for the given frame ID.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: RwLock::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: Arc::new(RwLock::new([0u8; PAGE_SIZE])),
        }
    }

    /// Returns the frame ID.
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page ID stored in this frame.
    pub fn page_id(&self) -> PageId {
        *self.page_id.read()
    }

    /// Sets the page ID stored in this frame.
    pub fn set_page_id(&self, page_id: PageId) {
        *self.page_id.write() = page_id;
    }

    /// Returns the current pin count.
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops one pin and returns the remaining count, or `None` if the
    /// frame was not pinned.
    pub fn unpin(&self) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pins| pins.checked_sub(1))
            .ok()
            .map(|previous| previous - 1)
    }

    /// Returns whether the page is dirty.
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Sets the dirty flag.
    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Read-latches the page data for the lifetime of the returned guard.
    pub fn read_data(&self) -> RwLockReadGuard<'_, PageData> {
        self.data.read()
    }

    /// Read-latches the page data, giving up after `timeout`.
    pub fn try_read_data_for(&self, timeout: Duration) -> Option<RwLockReadGuard<'_, PageData>> {
        self.data.try_read_for(timeout)
    }

    /// Write-latches the page data for the lifetime of the returned guard.
    pub fn write_data(&self) -> RwLockWriteGuard<'_, PageData> {
        self.data.write()
    }

    /// Copies data from the given slice into the frame.
    pub fn copy_from(&self, data: &[u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        self.data.write().copy_from_slice(data);
    }

    /// Copies data from the frame into the given slice.
    pub fn copy_to(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        data.copy_from_slice(&self.data.read()[..]);
    }

    /// Resets the frame to its initial state.
    pub fn reset(&self) {
        *self.page_id.write() = INVALID_PAGE_ID;
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}
