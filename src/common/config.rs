use std::time::Duration;

use super::types::PageId;

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(-1);

/// Page 0 is reserved for the header page holding index roots
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default K value for LRU-K replacement policy
pub const DEFAULT_LRUK_K: usize = 2;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Default bucket capacity of the page table
pub const DEFAULT_BUCKET_SIZE: usize = 8;

/// How long a flush waits for a write-latched page
pub const FLUSH_LATCH_TIMEOUT: Duration = Duration::from_millis(50);

/// Depth of the disk scheduler request queue
pub const DISK_QUEUE_DEPTH: usize = 128;

/// Tunables for a buffer pool instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Number of frames
    pub pool_size: usize,
    /// K of the LRU-K replacer
    pub replacer_k: usize,
    /// Entries per page-table bucket
    pub bucket_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_BUFFER_POOL_SIZE,
            replacer_k: DEFAULT_LRUK_K,
            bucket_size: DEFAULT_BUCKET_SIZE,
        }
    }
}

impl BufferPoolConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_replacer_k(mut self, k: usize) -> Self {
        self.replacer_k = k;
        self
    }
}

/// Node fan-out of a B+ tree.
///
/// `leaf_max_size` is the entry count at which a leaf splits and
/// `internal_max_size` the child count an internal node may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeConfig {
    pub leaf_max_size: usize,
    pub internal_max_size: usize,
}

impl BTreeConfig {
    pub fn new(leaf_max_size: usize, internal_max_size: usize) -> Self {
        Self {
            leaf_max_size,
            internal_max_size,
        }
    }
}
