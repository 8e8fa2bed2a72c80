use crate::common::{PageId, Result, TesseraError, PAGE_SIZE};

use super::bytes::{read_i32, read_u32, write_i32, write_u32};

const MAGIC_NUMBER: u32 = 0x5453_5241; // "TSRA"
const VERSION: u32 = 1;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const RECORD_COUNT_OFFSET: usize = 8;
const RECORDS_OFFSET: usize = 12;

/// Longest index name a record can hold
pub const MAX_INDEX_NAME_LEN: usize = 32;
const RECORD_SIZE: usize = MAX_INDEX_NAME_LEN + 4; // name + root page id
pub const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// One index registered in the header page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    pub name: String,
    pub root_page_id: PageId,
}

fn record_offset(index: usize) -> usize {
    RECORDS_OFFSET + index * RECORD_SIZE
}

fn record_name(data: &[u8], index: usize) -> &[u8] {
    let offset = record_offset(index);
    let raw = &data[offset..offset + MAX_INDEX_NAME_LEN];
    let len = raw.iter().position(|&b| b == 0).unwrap_or(MAX_INDEX_NAME_LEN);
    &raw[..len]
}

fn record_root(data: &[u8], index: usize) -> PageId {
    PageId::new(read_i32(data, record_offset(index) + MAX_INDEX_NAME_LEN))
}

fn stored_count(data: &[u8]) -> usize {
    read_u32(data, RECORD_COUNT_OFFSET) as usize
}

/// Record count, never past the records the page can hold.
fn record_count(data: &[u8]) -> usize {
    stored_count(data).min(MAX_HEADER_RECORDS)
}

fn is_valid(data: &[u8]) -> bool {
    read_u32(data, MAGIC_OFFSET) == MAGIC_NUMBER && stored_count(data) <= MAX_HEADER_RECORDS
}

fn find_record(data: &[u8], name: &str) -> Option<usize> {
    (0..record_count(data)).find(|&i| record_name(data, i) == name.as_bytes())
}

fn record_at(data: &[u8], index: usize) -> HeaderRecord {
    HeaderRecord {
        name: String::from_utf8_lossy(record_name(data, index)).into_owned(),
        root_page_id: record_root(data, index),
    }
}

/// Page 0 of every database file: maps index names to their root pages.
///
/// Layout: magic, version, record count, then fixed-width records of a
/// zero-padded name followed by the root page id.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn init(&mut self) {
        self.data.fill(0);
        write_u32(self.data, MAGIC_OFFSET, MAGIC_NUMBER);
        write_u32(self.data, VERSION_OFFSET, VERSION);
        self.set_record_count(0);
    }

    /// Whether the page carries the header magic and a sane record count.
    pub fn is_valid(&self) -> bool {
        is_valid(self.data)
    }

    pub fn record_count(&self) -> usize {
        record_count(self.data)
    }

    fn set_record_count(&mut self, count: usize) {
        write_u32(self.data, RECORD_COUNT_OFFSET, count as u32);
    }

    fn write_record(&mut self, index: usize, name: &str, root_page_id: PageId) {
        let offset = record_offset(index);
        let slot = &mut self.data[offset..offset + MAX_INDEX_NAME_LEN];
        slot.fill(0);
        slot[..name.len()].copy_from_slice(name.as_bytes());
        write_i32(self.data, offset + MAX_INDEX_NAME_LEN, root_page_id.as_i32());
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        find_record(self.data, name).map(|i| record_root(self.data, i))
    }

    /// Registers a new index.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> Result<()> {
        if name.is_empty() || name.len() > MAX_INDEX_NAME_LEN || name.as_bytes().contains(&0) {
            return Err(TesseraError::InvalidIndexName(name.to_string()));
        }
        if find_record(self.data, name).is_some() {
            return Err(TesseraError::IndexAlreadyExists(name.to_string()));
        }

        let count = self.record_count();
        if count >= MAX_HEADER_RECORDS {
            return Err(TesseraError::HeaderPageFull);
        }

        self.write_record(count, name, root_page_id);
        self.set_record_count(count + 1);
        Ok(())
    }

    /// Points an existing index at a new root page.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> Result<()> {
        let index = find_record(self.data, name)
            .ok_or_else(|| TesseraError::IndexNotFound(name.to_string()))?;
        let offset = record_offset(index) + MAX_INDEX_NAME_LEN;
        write_i32(self.data, offset, root_page_id.as_i32());
        Ok(())
    }

    /// Unregisters an index, returning its last root.
    pub fn delete_record(&mut self, name: &str) -> Result<PageId> {
        let index = find_record(self.data, name)
            .ok_or_else(|| TesseraError::IndexNotFound(name.to_string()))?;
        let root = record_root(self.data, index);

        let count = self.record_count();
        if index < count - 1 {
            let last = record_at(self.data, count - 1);
            self.write_record(index, &last.name, last.root_page_id);
        }
        self.set_record_count(count - 1);
        Ok(root)
    }

    pub fn records(&self) -> Vec<HeaderRecord> {
        (0..self.record_count())
            .map(|i| record_at(self.data, i))
            .collect()
    }
}

/// Read-only view of the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    /// Whether the page carries the header magic and a sane record count.
    pub fn is_valid(&self) -> bool {
        is_valid(self.data)
    }

    pub fn version(&self) -> u32 {
        read_u32(self.data, VERSION_OFFSET)
    }

    pub fn record_count(&self) -> usize {
        record_count(self.data)
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        find_record(self.data, name).map(|i| record_root(self.data, i))
    }

    pub fn records(&self) -> Vec<HeaderRecord> {
        (0..self.record_count())
            .map(|i| record_at(self.data, i))
            .collect()
    }
}
