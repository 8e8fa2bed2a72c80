use thiserror::Error;

use super::types::{FrameId, PageId};

/// Storage engine error types
#[derive(Error, Debug)]
pub enum TesseraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Page {0} is write-latched")]
    PageLatched(PageId),

    #[error("Frame {0} is not evictable")]
    FrameNotEvictable(FrameId),

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Invalid database file")]
    InvalidDatabaseFile,

    #[error("Header page is full")]
    HeaderPageFull,

    #[error("Invalid index name: {0:?}")]
    InvalidIndexName(String),

    #[error("Index {0} already exists")]
    IndexAlreadyExists(String),

    #[error("Index {0} not found")]
    IndexNotFound(String),

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),
}

pub type Result<T> = std::result::Result<T, TesseraError>;
