//! Common header shared by B+ tree pages.
//!
//! Every tree page starts with the same 20-byte header, all fields little
//! endian:
//!
//! | offset | field        |
//! |--------|--------------|
//! | 0      | page type u8 |
//! | 4      | size u32     |
//! | 8      | max size u32 |
//! | 12     | parent i32   |
//! | 16     | page id i32  |
//!
//! Leaf pages append a next-leaf pointer at 20. Entries follow the header.

use crate::common::{BTreeConfig, PageId, RecordId, Result, TesseraError, PAGE_SIZE};
use crate::storage::page::bytes::{read_i32, read_u32, write_i32, write_u32};

use super::{IndexKey, InternalPage, LeafPage};

const PAGE_TYPE_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 4;
const MAX_SIZE_OFFSET: usize = 8;
const PARENT_PAGE_OFFSET: usize = 12;
const PAGE_ID_OFFSET: usize = 16;

/// Size of the header common to every tree page
pub const BTREE_PAGE_HEADER_SIZE: usize = 20;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPageType {
    Invalid = 0,
    Leaf = 1,
    Internal = 2,
}

impl IndexPageType {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => IndexPageType::Leaf,
            2 => IndexPageType::Internal,
            _ => IndexPageType::Invalid,
        }
    }
}

/// Minimum occupancy of a non-root page.
pub fn min_size_of(page_type: IndexPageType, max_size: usize) -> usize {
    match page_type {
        IndexPageType::Internal => (max_size + 1) / 2,
        _ => max_size / 2,
    }
}

/// Read-only view of the common header.
#[derive(Clone, Copy)]
pub struct BTreePage<'a> {
    data: &'a [u8],
}

impl<'a> BTreePage<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn page_type(&self) -> IndexPageType {
        IndexPageType::from_u8(self.data[PAGE_TYPE_OFFSET])
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type() == IndexPageType::Leaf
    }

    pub fn is_root(&self) -> bool {
        !self.parent_page_id().is_valid()
    }

    pub fn size(&self) -> usize {
        read_u32(self.data, SIZE_OFFSET) as usize
    }

    pub fn max_size(&self) -> usize {
        read_u32(self.data, MAX_SIZE_OFFSET) as usize
    }

    pub fn min_size(&self) -> usize {
        min_size_of(self.page_type(), self.max_size())
    }

    pub fn parent_page_id(&self) -> PageId {
        PageId::new(read_i32(self.data, PARENT_PAGE_OFFSET))
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(read_i32(self.data, PAGE_ID_OFFSET))
    }
}

/// Mutable view of the common header.
pub struct BTreePageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> BTreePageMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn as_ref(&self) -> BTreePage<'_> {
        BTreePage { data: self.data }
    }

    /// Writes a fresh header for an empty page.
    pub fn init(&mut self, page_type: IndexPageType, page_id: PageId, parent: PageId, max_size: usize) {
        self.data[PAGE_TYPE_OFFSET] = page_type as u8;
        self.set_size(0);
        write_u32(self.data, MAX_SIZE_OFFSET, max_size as u32);
        self.set_parent_page_id(parent);
        write_i32(self.data, PAGE_ID_OFFSET, page_id.as_i32());
    }

    pub fn set_size(&mut self, size: usize) {
        write_u32(self.data, SIZE_OFFSET, size as u32);
    }

    pub fn set_parent_page_id(&mut self, parent: PageId) {
        write_i32(self.data, PARENT_PAGE_OFFSET, parent.as_i32());
    }
}

/// A tree page parsed by its type tag.
pub enum NodeRef<'a, K: IndexKey> {
    Leaf(LeafPage<'a, K>),
    Internal(InternalPage<'a, K>),
}

impl<'a, K: IndexKey> NodeRef<'a, K> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = BTreePage::new(data);
        match header.page_type() {
            IndexPageType::Leaf => Ok(NodeRef::Leaf(LeafPage::new(data))),
            IndexPageType::Internal => Ok(NodeRef::Internal(InternalPage::new(data))),
            IndexPageType::Invalid => Err(TesseraError::IndexCorrupted(format!(
                "page {} is not a tree page",
                header.page_id()
            ))),
        }
    }

    pub fn header(&self) -> BTreePage<'a> {
        match self {
            NodeRef::Leaf(leaf) => leaf.header(),
            NodeRef::Internal(internal) => internal.header(),
        }
    }
}

/// Largest leaf entry count a page can hold for key type `K`.
pub fn leaf_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - super::leaf_page::LEAF_PAGE_HEADER_SIZE) / (K::ENCODED_SIZE + RecordId::ENCODED_SIZE)
}

/// Largest child count an internal page can hold for key type `K`.
pub fn internal_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - BTREE_PAGE_HEADER_SIZE) / (K::ENCODED_SIZE + 4)
}

impl BTreeConfig {
    /// The widest fan-out a page can hold for key type `K`.
    pub fn for_key<K: IndexKey>() -> Self {
        Self::new(leaf_capacity::<K>(), internal_capacity::<K>())
    }

    /// Checks the sizes against what a page can hold for key type `K`.
    pub fn validate<K: IndexKey>(&self) -> Result<()> {
        if self.leaf_max_size < 2 || self.leaf_max_size > leaf_capacity::<K>() {
            return Err(TesseraError::InvalidConfig(format!(
                "leaf max size {} outside 2..={}",
                self.leaf_max_size,
                leaf_capacity::<K>()
            )));
        }
        if self.internal_max_size < 3 || self.internal_max_size > internal_capacity::<K>() {
            return Err(TesseraError::InvalidConfig(format!(
                "internal max size {} outside 3..={}",
                self.internal_max_size,
                internal_capacity::<K>()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::INVALID_PAGE_ID;

    #[test]
    fn test_btree_page_header() {
        let mut data = [0u8; PAGE_SIZE];
        let mut page = BTreePageMut::new(&mut data);
        page.init(IndexPageType::Internal, PageId::new(7), INVALID_PAGE_ID, 5);
        page.set_size(2);

        let header = BTreePage::new(&data);
        assert_eq!(header.page_type(), IndexPageType::Internal);
        assert!(!header.is_leaf());
        assert!(header.is_root());
        assert_eq!(header.size(), 2);
        assert_eq!(header.max_size(), 5);
        assert_eq!(header.min_size(), 3);
        assert_eq!(header.page_id(), PageId::new(7));
    }

    #[test]
    fn test_min_sizes() {
        assert_eq!(min_size_of(IndexPageType::Leaf, 4), 2);
        assert_eq!(min_size_of(IndexPageType::Leaf, 5), 2);
        assert_eq!(min_size_of(IndexPageType::Internal, 4), 2);
        assert_eq!(min_size_of(IndexPageType::Internal, 5), 3);
    }

    #[test]
    fn test_node_ref_rejects_unformatted_page() {
        let data = [0u8; PAGE_SIZE];
        assert!(matches!(
            NodeRef::<i64>::parse(&data),
            Err(TesseraError::IndexCorrupted(_))
        ));
    }

    #[test]
    fn test_config_for_key() {
        let config = BTreeConfig::for_key::<i64>();
        assert!(config.validate::<i64>().is_ok());
        assert_eq!(config.leaf_max_size, (PAGE_SIZE - 24) / 14);
        assert_eq!(config.internal_max_size, (PAGE_SIZE - 20) / 12);

        assert!(BTreeConfig::new(1, 4).validate::<i64>().is_err());
        assert!(BTreeConfig::new(4, 2).validate::<i64>().is_err());
        assert!(BTreeConfig::new(10_000, 4).validate::<i64>().is_err());
    }
}
