//! Tessera - the buffer pool and index layers of a disk-oriented storage engine
//!
//! The database lives in a single file of fixed-size pages. A buffer pool
//! caches pages in memory, and B+ tree indexes are built on top of it.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): Handles disk I/O and page formats
//!   - `DiskManager`: Reads and writes pages to/from disk
//!   - `DiskScheduler`: Background worker that serves page I/O requests
//!   - `HeaderPage`: Page 0, mapping index names to their root pages
//!
//! - **Containers** (`container`): `ExtendibleHashTable`, the buffer pool's page table
//!
//! - **Buffer Pool** (`buffer`): Memory management for database pages
//!   - `BufferPoolManager`: Fetches pages from disk and caches them in memory
//!   - `LruKReplacer`: LRU-K page replacement policy
//!   - `FrameHeader`: Per-frame metadata and data storage
//!   - `BasicPageGuard`/`ReadPageGuard`/`WritePageGuard`: RAII pins and latches
//!
//! - **Index** (`index`): `BPlusTree`, a concurrent B+ tree over unique keys
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tessera::buffer::BufferPoolManager;
//! use tessera::index::BPlusTree;
//! use tessera::storage::disk::DiskManager;
//! use tessera::{PageId, RecordId, SlotId};
//!
//! // Create a disk manager for a database file
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//!
//! // Create a buffer pool with 100 frames and LRU-2 replacement
//! let bpm = Arc::new(BufferPoolManager::new(100, 2, disk_manager));
//!
//! // Open (or create) an index and insert a key
//! let tree = BPlusTree::<i64>::new("users_pk", Arc::clone(&bpm)).unwrap();
//! tree.insert(42, RecordId::new(PageId::new(7), SlotId::new(3))).unwrap();
//! assert_eq!(tree.get_value(&42).unwrap().len(), 1);
//!
//! // Flush changes to disk
//! bpm.flush_all_pages().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{PageId, RecordId, Result, SlotId, TesseraError};
