use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{error, trace};

use crate::common::{PageId, Result, TesseraError, DISK_QUEUE_DEPTH, PAGE_SIZE};

use super::DiskManager;

/// Owned page-sized buffer travelling between callers and the worker
pub type PageBuffer = Box<[u8; PAGE_SIZE]>;

/// Completion of a disk request. The buffer is handed back to the caller,
/// holding the page bytes for reads.
pub struct DiskResponse {
    pub data: PageBuffer,
    pub result: Result<()>,
}

/// Represents a disk I/O request
pub struct DiskRequest {
    /// Whether this is a write (true) or read (false) request
    pub is_write: bool,
    /// The page to read/write
    pub page_id: PageId,
    /// Source bytes for writes, destination for reads
    pub data: PageBuffer,
    /// Where to signal completion
    pub callback: Option<Sender<DiskResponse>>,
}

impl DiskRequest {
    /// Creates a new read request
    pub fn read(page_id: PageId) -> Self {
        Self {
            is_write: false,
            page_id,
            data: Box::new([0u8; PAGE_SIZE]),
            callback: None,
        }
    }

    /// Creates a new write request carrying a copy of `data`
    pub fn write(page_id: PageId, data: &[u8]) -> Self {
        let mut buf = Box::new([0u8; PAGE_SIZE]);
        buf.copy_from_slice(data);
        Self {
            is_write: true,
            page_id,
            data: buf,
            callback: None,
        }
    }

    /// Sets the callback for this request
    pub fn with_callback(mut self, callback: Sender<DiskResponse>) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// DiskScheduler manages a background worker thread that processes disk I/O requests.
/// Requests are queued on a bounded channel and served in order.
pub struct DiskScheduler {
    /// The disk manager for actual I/O operations
    disk_manager: Arc<DiskManager>,
    /// Channel sender for queuing requests
    request_sender: Sender<DiskRequest>,
    /// Flag to signal shutdown
    shutdown: Arc<AtomicBool>,
    /// Handle to the background worker thread
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler with the given DiskManager.
    /// Spawns a background worker thread to process requests.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(DISK_QUEUE_DEPTH);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm_clone = Arc::clone(&disk_manager);
        let shutdown_clone = Arc::clone(&shutdown);

        let worker_handle = thread::Builder::new()
            .name("disk-scheduler".to_string())
            .spawn(move || Self::start_worker_thread(dm_clone, receiver, shutdown_clone))
            .ok();
        if worker_handle.is_none() {
            error!("failed to spawn disk scheduler worker");
        }

        Self {
            disk_manager,
            request_sender: sender,
            shutdown,
            worker_handle,
        }
    }

    /// Schedules a disk request for processing by the background worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        if self.worker_handle.is_none() {
            return Err(TesseraError::DiskScheduler("worker not running".to_string()));
        }
        self.request_sender
            .send(request)
            .map_err(|e| TesseraError::DiskScheduler(format!("Failed to schedule request: {}", e)))
    }

    fn schedule_and_wait(&self, request: DiskRequest) -> Result<DiskResponse> {
        let (tx, rx) = bounded(1);
        self.schedule(request.with_callback(tx))?;
        rx.recv().map_err(|e| {
            TesseraError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })
    }

    /// Schedules a read request and waits for completion.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let response = self.schedule_and_wait(DiskRequest::read(page_id))?;
        response.result?;
        data.copy_from_slice(&response.data[..]);
        Ok(())
    }

    /// Schedules a write request and waits for completion.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let response = self.schedule_and_wait(DiskRequest::write(page_id, data))?;
        response.result
    }

    /// Worker thread main loop.
    /// Processes requests from the queue until shutdown is signaled.
    fn start_worker_thread(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                // Drain remaining requests before exiting
                while let Ok(request) = receiver.try_recv() {
                    Self::process_request(&disk_manager, request);
                }
                break;
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(request) => Self::process_request(&disk_manager, request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Processes a single disk request.
    fn process_request(disk_manager: &DiskManager, request: DiskRequest) {
        let DiskRequest {
            is_write,
            page_id,
            mut data,
            callback,
        } = request;

        trace!(
            "disk {} {}",
            if is_write { "write" } else { "read" },
            page_id
        );
        let result = if is_write {
            disk_manager.write_page(page_id, &data[..])
        } else {
            disk_manager.read_page(page_id, &mut data[..])
        };
        if let Err(e) = &result {
            error!("disk request on {} failed: {}", page_id, e);
        }

        if let Some(callback) = callback {
            let _ = callback.send(DiskResponse { data, result });
        }
    }

    /// Returns a reference to the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
