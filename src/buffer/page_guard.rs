use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::PageId;

use super::{FrameHeader, PageData};

/// Callback type for releasing a page guard: receives the page and whether
/// the holder dirtied it.
pub(crate) type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

/// A single pin on a frame. Dropping it hands the pin back to the pool.
struct PageGuardBase {
    /// The page ID being guarded
    page_id: PageId,
    /// Reference to the frame header (kept alive for the guard's lifetime)
    frame: Arc<FrameHeader>,
    /// Callback to release the pin
    release_callback: Option<ReleaseCallback>,
    /// Whether the page was modified through this guard
    is_dirty: bool,
}

impl PageGuardBase {
    fn new(page_id: PageId, frame: Arc<FrameHeader>, release_callback: ReleaseCallback) -> Self {
        Self {
            page_id,
            frame,
            release_callback: Some(release_callback),
            is_dirty: false,
        }
    }
}

impl Drop for PageGuardBase {
    fn drop(&mut self) {
        if let Some(callback) = self.release_callback.take() {
            callback(self.page_id, self.is_dirty);
        }
    }
}

/// Pins a page without latching it.
///
/// The page cannot be evicted while this guard lives, but readers and
/// writers may still latch it. Use `read`/`write` for short latched
/// sections, or upgrade to a latched guard.
pub struct BasicPageGuard {
    base: PageGuardBase,
}

impl BasicPageGuard {
    pub(crate) fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        Self {
            base: PageGuardBase::new(page_id, frame, release_callback),
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    /// Read-latches the page until the returned guard is dropped.
    pub fn read(&self) -> RwLockReadGuard<'_, PageData> {
        self.base.frame.read_data()
    }

    /// Write-latches the page until the returned guard is dropped.
    /// The page is marked dirty.
    pub fn write(&mut self) -> RwLockWriteGuard<'_, PageData> {
        self.base.is_dirty = true;
        self.base.frame.write_data()
    }

    /// Takes the read latch, keeping the pin.
    pub fn upgrade_read(self) -> ReadPageGuard {
        let latch = self.base.frame.data.read_arc();
        ReadPageGuard {
            latch,
            base: self.base,
        }
    }

    /// Takes the write latch, keeping the pin.
    pub fn upgrade_write(self) -> WritePageGuard {
        let latch = self.base.frame.data.write_arc();
        WritePageGuard {
            latch,
            base: self.base,
        }
    }

    /// Drops this guard, releasing the page.
    pub fn drop_guard(self) {
        drop(self);
    }
}

/// RAII guard for read-only access to a page.
/// Releases the read latch, then unpins the page when dropped.
pub struct ReadPageGuard {
    // declared first so the latch is released before the pin
    latch: ArcRwLockReadGuard<RawRwLock, PageData>,
    base: PageGuardBase,
}

impl ReadPageGuard {
    pub(crate) fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        BasicPageGuard::new(page_id, frame, release_callback).upgrade_read()
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }

    /// Releases the latch but keeps the page pinned.
    pub fn into_basic(self) -> BasicPageGuard {
        let ReadPageGuard { latch, base } = self;
        drop(latch);
        BasicPageGuard { base }
    }

    /// Drops this guard, releasing the page.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

/// RAII guard for read-write access to a page.
/// The first mutable access marks the page dirty. Releases the write latch,
/// then unpins the page when dropped.
pub struct WritePageGuard {
    latch: ArcRwLockWriteGuard<RawRwLock, PageData>,
    base: PageGuardBase,
}

impl WritePageGuard {
    pub(crate) fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        BasicPageGuard::new(page_id, frame, release_callback).upgrade_write()
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }

    /// Returns a mutable reference to the page data.
    /// Automatically marks the page as dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.base.is_dirty = true;
        &mut self.latch[..]
    }

    /// Whether this guard has handed out mutable access.
    pub fn is_dirty(&self) -> bool {
        self.base.is_dirty
    }

    /// Releases the latch but keeps the page pinned.
    pub fn into_basic(self) -> BasicPageGuard {
        let WritePageGuard { latch, base } = self;
        drop(latch);
        BasicPageGuard { base }
    }

    /// Drops this guard, releasing the page.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{FrameId, PAGE_SIZE};
    use parking_lot::Mutex;

    type Releases = Arc<Mutex<Vec<(PageId, bool)>>>;

    fn recording_callback(releases: &Releases) -> ReleaseCallback {
        let releases = Arc::clone(releases);
        Box::new(move |pid, dirty| releases.lock().push((pid, dirty)))
    }

    fn frame_with_page(page_id: i32) -> Arc<FrameHeader> {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(page_id));
        frame
    }

    #[test]
    fn test_read_page_guard() {
        let frame = frame_with_page(1);
        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        frame.copy_from(&data);

        let releases = Releases::default();
        let guard = ReadPageGuard::new(
            PageId::new(1),
            frame.clone(),
            recording_callback(&releases),
        );

        assert_eq!(guard.page_id(), PageId::new(1));
        assert_eq!(guard[0], 42);
        // other readers are not blocked
        assert_eq!(frame.read_data()[0], 42);
        assert!(releases.lock().is_empty());

        drop(guard);
        assert_eq!(*releases.lock(), vec![(PageId::new(1), false)]);
    }

    #[test]
    fn test_write_page_guard_marks_dirty() {
        let frame = frame_with_page(1);
        let releases = Releases::default();

        let mut guard = WritePageGuard::new(
            PageId::new(1),
            frame.clone(),
            recording_callback(&releases),
        );
        assert!(!guard.is_dirty());
        guard.data_mut()[0] = 42;
        assert!(guard.is_dirty());
        assert!(frame.data.try_read().is_none());

        drop(guard);
        assert_eq!(*releases.lock(), vec![(PageId::new(1), true)]);
        assert_eq!(frame.read_data()[0], 42);
    }

    #[test]
    fn test_write_page_guard_without_mutation_is_clean() {
        let frame = frame_with_page(2);
        let releases = Releases::default();

        let guard = WritePageGuard::new(PageId::new(2), frame, recording_callback(&releases));
        assert_eq!(guard.data()[0], 0);
        drop(guard);

        assert_eq!(*releases.lock(), vec![(PageId::new(2), false)]);
    }

    #[test]
    fn test_basic_guard_upgrade_and_downgrade() {
        let frame = frame_with_page(3);
        let releases = Releases::default();

        let mut basic = BasicPageGuard::new(
            PageId::new(3),
            frame.clone(),
            recording_callback(&releases),
        );
        basic.write()[7] = 9;
        assert_eq!(basic.read()[7], 9);

        let read = basic.upgrade_read();
        assert!(frame.data.try_write().is_none());
        let basic = read.into_basic();
        // latch released, pin still held
        assert!(frame.data.try_write().is_some());
        assert!(releases.lock().is_empty());

        let write = basic.upgrade_write();
        assert_eq!(write[7], 9);
        write.drop_guard();

        assert_eq!(*releases.lock(), vec![(PageId::new(3), true)]);
    }
}
