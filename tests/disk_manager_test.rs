//! Integration tests for the disk manager and scheduler

use std::sync::Arc;
use std::thread;

use tempfile::NamedTempFile;
use tessera::common::{PageId, TesseraError, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE};
use tessera::storage::disk::{DiskManager, DiskRequest, DiskScheduler};
use tessera::storage::page::{HeaderPage, HeaderPageRef, MAX_HEADER_RECORDS};

fn read_header(dm: &DiskManager) -> [u8; PAGE_SIZE] {
    let mut data = [0u8; PAGE_SIZE];
    dm.read_page(HEADER_PAGE_ID, &mut data).unwrap();
    data
}

fn stamped(page_id: PageId, fill: u8) -> [u8; PAGE_SIZE] {
    let mut data = [fill; PAGE_SIZE];
    data[..4].copy_from_slice(&page_id.as_i32().to_le_bytes());
    data
}

#[test]
fn test_fresh_file_starts_with_empty_header() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    assert_eq!(dm.get_num_pages(), 1);
    assert_eq!(
        std::fs::metadata(temp_file.path()).unwrap().len(),
        PAGE_SIZE as u64
    );
    // formatting page 0 is not a counted write
    assert_eq!(dm.get_num_writes(), 0);

    let data = read_header(&dm);
    let header = HeaderPageRef::new(&data);
    assert!(header.is_valid());
    assert_eq!(header.record_count(), 0);
    assert!(header.records().is_empty());
    assert_eq!(dm.get_num_reads(), 1);
}

#[test]
fn test_allocation_skips_header_and_never_reuses_ids() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    let first = dm.allocate_page().unwrap();
    assert_eq!(first, PageId::new(1));
    let second = dm.allocate_page().unwrap();

    dm.deallocate_page(first).unwrap();
    dm.deallocate_page(second).unwrap();
    assert!(dm.is_deallocated(first));
    assert!(!dm.is_deallocated(HEADER_PAGE_ID));

    let third = dm.allocate_page().unwrap();
    assert_eq!(third, PageId::new(3));
    assert!(!dm.is_deallocated(third));
    assert_eq!(dm.get_num_pages(), 4);

    assert!(matches!(
        dm.deallocate_page(INVALID_PAGE_ID),
        Err(TesseraError::InvalidPageId(_))
    ));
}

#[test]
fn test_allocated_page_is_zeroed_and_counted() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    let page_id = dm.allocate_page().unwrap();
    assert_eq!(dm.get_num_writes(), 1);

    let mut data = [0xAAu8; PAGE_SIZE];
    dm.read_page(page_id, &mut data).unwrap();
    assert!(data.iter().all(|&b| b == 0));
    assert_eq!(dm.get_num_reads(), 1);
}

#[test]
fn test_read_beyond_end_of_file_is_zeroed() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    let mut data = [0x55u8; PAGE_SIZE];
    dm.read_page(PageId::new(40), &mut data).unwrap();
    assert!(data.iter().all(|&b| b == 0));
    // reading does not grow the file
    assert_eq!(dm.get_num_pages(), 1);
}

#[test]
fn test_pages_and_header_survive_reopen() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let pages = {
        let dm = DiskManager::new(&path).unwrap();
        let pages: Vec<_> = (0..3).map(|_| dm.allocate_page().unwrap()).collect();
        for (i, &page_id) in pages.iter().enumerate() {
            dm.write_page(page_id, &stamped(page_id, i as u8)).unwrap();
        }

        let mut data = read_header(&dm);
        let mut header = HeaderPage::new(&mut data);
        header.insert_record("orders_pk", pages[2]).unwrap();
        header.insert_record("users_pk", pages[0]).unwrap();
        dm.write_page(HEADER_PAGE_ID, &data).unwrap();
        dm.sync().unwrap();
        pages
    };

    let dm = DiskManager::new(&path).unwrap();
    assert_eq!(dm.get_num_pages(), 4);
    // a reopened file keeps handing out fresh ids
    assert_eq!(dm.allocate_page().unwrap(), PageId::new(4));

    for (i, &page_id) in pages.iter().enumerate() {
        let mut data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut data).unwrap();
        assert_eq!(data, stamped(page_id, i as u8));
    }

    let data = read_header(&dm);
    let header = HeaderPageRef::new(&data);
    assert_eq!(header.get_root_id("orders_pk"), Some(pages[2]));
    assert_eq!(header.get_root_id("users_pk"), Some(pages[0]));
    assert_eq!(header.get_root_id("missing"), None);
}

#[test]
fn test_open_rejects_foreign_header() {
    let temp_file = NamedTempFile::new().unwrap();
    std::fs::write(temp_file.path(), vec![0x42u8; PAGE_SIZE * 2]).unwrap();

    assert!(matches!(
        DiskManager::new(temp_file.path()),
        Err(TesseraError::InvalidDatabaseFile)
    ));
}

#[test]
fn test_open_rejects_header_with_impossible_record_count() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    {
        let dm = DiskManager::new(&path).unwrap();
        let mut data = read_header(&dm);
        HeaderPage::new(&mut data)
            .insert_record("idx", PageId::new(1))
            .unwrap();
        // record count sits right after the magic and version words
        data[8..12].copy_from_slice(&(MAX_HEADER_RECORDS as u32 + 1).to_le_bytes());
        dm.write_page(HEADER_PAGE_ID, &data).unwrap();
    }

    assert!(matches!(
        DiskManager::new(&path),
        Err(TesseraError::InvalidDatabaseFile)
    ));
}

#[test]
fn test_scheduler_serves_requests_in_submission_order() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let scheduler = DiskScheduler::new(dm);
    let page_id = scheduler.disk_manager().allocate_page().unwrap();

    let (tx, rx) = crossbeam_channel::unbounded();
    for fill in 1..=3u8 {
        scheduler
            .schedule(DiskRequest::write(page_id, &stamped(page_id, fill)))
            .unwrap();
        scheduler
            .schedule(DiskRequest::read(page_id).with_callback(tx.clone()))
            .unwrap();
    }

    // each read sees the write queued right before it
    for fill in 1..=3u8 {
        let response = rx.recv().unwrap();
        response.result.unwrap();
        assert_eq!(response.data[..], stamped(page_id, fill)[..]);
    }
}

#[test]
fn test_scheduler_reports_failed_requests() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let scheduler = DiskScheduler::new(dm);

    let mut data = [0u8; PAGE_SIZE];
    assert!(matches!(
        scheduler.schedule_read_sync(INVALID_PAGE_ID, &mut data),
        Err(TesseraError::InvalidPageId(_))
    ));

    // the worker keeps going after a failure
    let page_id = scheduler.disk_manager().allocate_page().unwrap();
    scheduler
        .schedule_write_sync(page_id, &stamped(page_id, 9))
        .unwrap();
    scheduler.schedule_read_sync(page_id, &mut data).unwrap();
    assert_eq!(data, stamped(page_id, 9));
}

#[test]
fn test_scheduler_drains_queue_on_drop() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());

    let pages: Vec<_> = (0..8).map(|_| dm.allocate_page().unwrap()).collect();
    {
        let scheduler = DiskScheduler::new(Arc::clone(&dm));
        for &page_id in &pages {
            scheduler
                .schedule(DiskRequest::write(page_id, &stamped(page_id, 7)))
                .unwrap();
        }
    }

    for &page_id in &pages {
        let mut data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut data).unwrap();
        assert_eq!(data, stamped(page_id, 7));
    }
    assert_eq!(dm.get_num_writes(), 16);
}

#[test]
fn test_scheduler_shared_between_threads() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let scheduler = Arc::new(DiskScheduler::new(dm));

    let handles: Vec<_> = (0..4u8)
        .map(|t| {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                let mut owned = Vec::new();
                for _ in 0..8 {
                    let page_id = scheduler.disk_manager().allocate_page().unwrap();
                    scheduler
                        .schedule_write_sync(page_id, &stamped(page_id, t))
                        .unwrap();
                    owned.push(page_id);
                }
                (t, owned)
            })
        })
        .collect();

    let mut seen = Vec::new();
    for handle in handles {
        let (t, owned) = handle.join().unwrap();
        for page_id in owned {
            let mut data = [0u8; PAGE_SIZE];
            scheduler.schedule_read_sync(page_id, &mut data).unwrap();
            assert_eq!(data, stamped(page_id, t));
            seen.push(page_id.as_i32());
        }
    }

    seen.sort_unstable();
    assert_eq!(seen, (1..=32).collect::<Vec<_>>());
}
