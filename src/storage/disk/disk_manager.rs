use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use log::{debug, info};
use parking_lot::Mutex;

use crate::common::{PageId, Result, TesseraError, HEADER_PAGE_ID, PAGE_SIZE};
use crate::storage::page::{HeaderPage, HeaderPageRef};

/// DiskManager is responsible for reading and writing pages to/from disk.
/// It manages a single database file and tracks the number of pages allocated.
///
/// Page 0 always holds the header page. A fresh file gets an initialized
/// header on creation, so the first page handed out by `allocate_page` is 1.
pub struct DiskManager {
    /// The database file
    db_file: Mutex<File>,
    /// Path to the database file
    db_path: String,
    /// Number of pages currently allocated
    num_pages: AtomicI32,
    /// Pages released through `deallocate_page`
    freed_pages: Mutex<HashSet<PageId>>,
    /// Number of page reads performed
    num_reads: AtomicU32,
    /// Number of page writes performed
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens the database file at `db_path`, creating and formatting it if it
    /// doesn't exist. An existing file must start with a valid header page.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let file_size = file.metadata()?.len();
        let num_pages = file_size.div_ceil(PAGE_SIZE as u64) as i32;

        let dm = Self {
            db_file: Mutex::new(file),
            db_path: path_str,
            num_pages: AtomicI32::new(num_pages),
            freed_pages: Mutex::new(HashSet::new()),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        };

        let mut header = [0u8; PAGE_SIZE];
        if num_pages == 0 {
            HeaderPage::new(&mut header).init();
            dm.write_at(HEADER_PAGE_ID, &header)?;
            dm.num_pages.store(1, Ordering::SeqCst);
            info!("created database file {}", dm.db_path);
        } else {
            dm.read_at(HEADER_PAGE_ID, &mut header)?;
            if !HeaderPageRef::new(&header).is_valid() {
                return Err(TesseraError::InvalidDatabaseFile);
            }
            info!("opened database file {} with {} pages", dm.db_path, num_pages);
        }

        Ok(dm)
    }

    fn check_page_id(page_id: PageId) -> Result<()> {
        if page_id.is_valid() {
            Ok(())
        } else {
            Err(TesseraError::InvalidPageId(page_id))
        }
    }

    fn read_at(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(page_id.file_offset(PAGE_SIZE)))?;

        // Reading beyond the end of the file yields zeros
        let mut filled = 0;
        while filled < data.len() {
            let n = file.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data[filled..].fill(0);
        Ok(())
    }

    fn write_at(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(page_id.file_offset(PAGE_SIZE)))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    /// Reads a page from disk into the provided buffer.
    /// The buffer must be exactly PAGE_SIZE bytes.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        Self::check_page_id(page_id)?;

        self.read_at(page_id, data)?;
        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a page to disk from the provided buffer.
    /// The buffer must be exactly PAGE_SIZE bytes.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        Self::check_page_id(page_id)?;

        self.write_at(page_id, data)?;
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Hands out the next page ID. Page IDs grow monotonically and are never
    /// reused. The page is zero-initialized on disk.
    pub fn allocate_page(&self) -> Result<PageId> {
        let page_id = PageId::new(self.num_pages.fetch_add(1, Ordering::SeqCst));

        let zeros = [0u8; PAGE_SIZE];
        self.write_page(page_id, &zeros)?;

        debug!("allocated {}", page_id);
        Ok(page_id)
    }

    /// Marks a page as no longer in use. Its space is not reclaimed.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        Self::check_page_id(page_id)?;
        self.freed_pages.lock().insert(page_id);
        debug!("deallocated {}", page_id);
        Ok(())
    }

    /// Whether `page_id` has been released through `deallocate_page`.
    pub fn is_deallocated(&self, page_id: PageId) -> bool {
        self.freed_pages.lock().contains(&page_id)
    }

    /// Returns the number of pages currently allocated, header included.
    pub fn get_num_pages(&self) -> i32 {
        self.num_pages.load(Ordering::Relaxed)
    }

    /// Returns the number of page reads performed.
    pub fn get_num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of page writes performed.
    pub fn get_num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    /// Returns the path to the database file.
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }

    /// Flushes any buffered writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.db_file.lock().sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.db_file.get_mut().sync_all();
    }
}
