use std::marker::PhantomData;

use crate::common::{PageId, RecordId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::page::bytes::{read_i32, write_i32};

use super::btree_page::{BTreePage, BTreePageMut, IndexPageType, BTREE_PAGE_HEADER_SIZE};
use super::IndexKey;

const NEXT_PAGE_OFFSET: usize = BTREE_PAGE_HEADER_SIZE;

/// Leaf header: common header plus the next-leaf pointer
pub const LEAF_PAGE_HEADER_SIZE: usize = BTREE_PAGE_HEADER_SIZE + 4;

fn entry_size<K: IndexKey>() -> usize {
    K::ENCODED_SIZE + RecordId::ENCODED_SIZE
}

fn entry_offset<K: IndexKey>(index: usize) -> usize {
    LEAF_PAGE_HEADER_SIZE + index * entry_size::<K>()
}

/// Read-only view of a leaf page.
///
/// Entries are `(key, record id)` pairs kept in ascending key order. Leaves
/// are chained left to right through their next-page pointers.
pub struct LeafPage<'a, K> {
    data: &'a [u8],
    _marker: PhantomData<K>,
}

impl<'a, K> Clone for LeafPage<'a, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, K> Copy for LeafPage<'a, K> {}

impl<'a, K: IndexKey> LeafPage<'a, K> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn header(&self) -> BTreePage<'a> {
        BTreePage::new(self.data)
    }

    pub fn page_id(&self) -> PageId {
        self.header().page_id()
    }

    pub fn size(&self) -> usize {
        self.header().size()
    }

    pub fn max_size(&self) -> usize {
        self.header().max_size()
    }

    pub fn min_size(&self) -> usize {
        self.header().min_size()
    }

    pub fn next_page_id(&self) -> PageId {
        PageId::new(read_i32(self.data, NEXT_PAGE_OFFSET))
    }

    pub fn key_at(&self, index: usize) -> K {
        K::decode(&self.data[entry_offset::<K>(index)..])
    }

    pub fn value_at(&self, index: usize) -> RecordId {
        RecordId::decode(&self.data[entry_offset::<K>(index) + K::ENCODED_SIZE..])
    }

    pub fn item(&self, index: usize) -> (K, RecordId) {
        (self.key_at(index), self.value_at(index))
    }

    /// Index of the first entry whose key is not less than `key`.
    pub fn key_index(&self, key: &K) -> usize {
        let (mut lo, mut hi) = (0, self.size());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid) < *key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    pub fn lookup(&self, key: &K) -> Option<RecordId> {
        let index = self.key_index(key);
        if index < self.size() && self.key_at(index) == *key {
            Some(self.value_at(index))
        } else {
            None
        }
    }

    pub fn entries(&self) -> Vec<(K, RecordId)> {
        (0..self.size()).map(|i| self.item(i)).collect()
    }
}

/// Mutable view of a leaf page.
pub struct LeafPageMut<'a, K> {
    data: &'a mut [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> LeafPageMut<'a, K> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn as_ref(&self) -> LeafPage<'_, K> {
        LeafPage::new(self.data)
    }

    fn header_mut(&mut self) -> BTreePageMut<'_> {
        BTreePageMut::new(self.data)
    }

    pub fn init(&mut self, page_id: PageId, parent: PageId, max_size: usize) {
        self.header_mut()
            .init(IndexPageType::Leaf, page_id, parent, max_size);
        self.set_next_page_id(INVALID_PAGE_ID);
    }

    pub fn size(&self) -> usize {
        self.as_ref().size()
    }

    fn set_size(&mut self, size: usize) {
        self.header_mut().set_size(size);
    }

    pub fn set_parent_page_id(&mut self, parent: PageId) {
        self.header_mut().set_parent_page_id(parent);
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        write_i32(self.data, NEXT_PAGE_OFFSET, next.as_i32());
    }

    fn set_item(&mut self, index: usize, key: &K, value: &RecordId) {
        let offset = entry_offset::<K>(index);
        key.encode(&mut self.data[offset..]);
        value.encode(&mut self.data[offset + K::ENCODED_SIZE..]);
    }

    /// Appends raw entries copied from another leaf of the same key type.
    fn append_raw(&mut self, entries: &[u8]) {
        let size = self.size();
        let start = entry_offset::<K>(size);
        self.data[start..start + entries.len()].copy_from_slice(entries);
        self.set_size(size + entries.len() / entry_size::<K>());
    }

    /// Inserts `key` in order and returns the new size. A key already
    /// present leaves the page untouched.
    pub fn insert(&mut self, key: &K, value: &RecordId) -> usize {
        let size = self.size();
        let index = self.as_ref().key_index(key);
        if index < size && self.as_ref().key_at(index) == *key {
            return size;
        }
        let start = entry_offset::<K>(index);
        let end = entry_offset::<K>(size);
        self.data.copy_within(start..end, start + entry_size::<K>());
        self.set_item(index, key, value);
        self.set_size(size + 1);
        size + 1
    }

    /// Removes `key` if present and returns the new size.
    pub fn remove_record(&mut self, key: &K) -> usize {
        let size = self.size();
        let index = self.as_ref().key_index(key);
        if index >= size || self.as_ref().key_at(index) != *key {
            return size;
        }
        self.remove_at(index);
        size - 1
    }

    fn remove_at(&mut self, index: usize) {
        let size = self.size();
        let start = entry_offset::<K>(index + 1);
        let end = entry_offset::<K>(size);
        self.data
            .copy_within(start..end, entry_offset::<K>(index));
        self.set_size(size - 1);
    }

    /// Moves the upper half of the entries into an empty `recipient`.
    pub fn move_half_to(&mut self, recipient: &mut LeafPageMut<'_, K>) {
        let size = self.size();
        let keep = self.as_ref().min_size();
        recipient.append_raw(&self.data[entry_offset::<K>(keep)..entry_offset::<K>(size)]);
        self.set_size(keep);
    }

    /// Moves every entry to the end of `recipient`, the left sibling, which
    /// also takes over the next-leaf pointer.
    pub fn move_all_to(&mut self, recipient: &mut LeafPageMut<'_, K>) {
        let size = self.size();
        recipient.append_raw(&self.data[entry_offset::<K>(0)..entry_offset::<K>(size)]);
        recipient.set_next_page_id(self.as_ref().next_page_id());
        self.set_size(0);
    }

    /// Moves the first entry to the end of `recipient`, the left sibling.
    pub fn move_first_to_end_of(&mut self, recipient: &mut LeafPageMut<'_, K>) {
        let (key, value) = self.as_ref().item(0);
        self.remove_at(0);
        let size = recipient.size();
        recipient.set_item(size, &key, &value);
        recipient.set_size(size + 1);
    }

    /// Moves the last entry to the front of `recipient`, the right sibling.
    pub fn move_last_to_front_of(&mut self, recipient: &mut LeafPageMut<'_, K>) {
        let size = self.size();
        let (key, value) = self.as_ref().item(size - 1);
        self.set_size(size - 1);
        recipient.insert(&key, &value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SlotId;

    fn rid(n: i64) -> RecordId {
        RecordId::new(PageId::new(n as i32), SlotId::new(n as u16))
    }

    fn keys(page: &LeafPage<'_, i64>) -> Vec<i64> {
        page.entries().into_iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn test_leaf_insert_keeps_order() {
        let mut data = [0u8; PAGE_SIZE];
        let mut leaf = LeafPageMut::<i64>::new(&mut data);
        leaf.init(PageId::new(3), INVALID_PAGE_ID, 8);

        for k in [5, 1, 4, 2, 3] {
            leaf.insert(&k, &rid(k));
        }
        // duplicate is ignored
        assert_eq!(leaf.insert(&4, &rid(99)), 5);

        let page = leaf.as_ref();
        assert_eq!(keys(&page), vec![1, 2, 3, 4, 5]);
        assert_eq!(page.lookup(&4), Some(rid(4)));
        assert_eq!(page.lookup(&6), None);
        assert_eq!(page.key_index(&0), 0);
        assert_eq!(page.key_index(&6), 5);
        assert_eq!(page.next_page_id(), INVALID_PAGE_ID);
        assert!(page.header().is_leaf());
    }

    #[test]
    fn test_leaf_remove_record() {
        let mut data = [0u8; PAGE_SIZE];
        let mut leaf = LeafPageMut::<i64>::new(&mut data);
        leaf.init(PageId::new(3), INVALID_PAGE_ID, 8);
        for k in 1..=4 {
            leaf.insert(&k, &rid(k));
        }

        assert_eq!(leaf.remove_record(&2), 3);
        assert_eq!(leaf.remove_record(&2), 3);
        assert_eq!(keys(&leaf.as_ref()), vec![1, 3, 4]);
    }

    #[test]
    fn test_leaf_split_and_merge() {
        let mut left_data = [0u8; PAGE_SIZE];
        let mut right_data = [0u8; PAGE_SIZE];
        let mut left = LeafPageMut::<i64>::new(&mut left_data);
        let mut right = LeafPageMut::<i64>::new(&mut right_data);
        left.init(PageId::new(1), PageId::new(9), 4);
        right.init(PageId::new(2), PageId::new(9), 4);
        right.set_next_page_id(PageId::new(7));

        for k in 1..=4 {
            left.insert(&k, &rid(k));
        }
        left.move_half_to(&mut right);
        assert_eq!(keys(&left.as_ref()), vec![1, 2]);
        assert_eq!(keys(&right.as_ref()), vec![3, 4]);

        right.move_all_to(&mut left);
        assert_eq!(keys(&left.as_ref()), vec![1, 2, 3, 4]);
        assert_eq!(right.size(), 0);
        assert_eq!(left.as_ref().next_page_id(), PageId::new(7));
    }

    #[test]
    fn test_leaf_borrow_from_siblings() {
        let mut left_data = [0u8; PAGE_SIZE];
        let mut right_data = [0u8; PAGE_SIZE];
        let mut left = LeafPageMut::<i64>::new(&mut left_data);
        let mut right = LeafPageMut::<i64>::new(&mut right_data);
        left.init(PageId::new(1), INVALID_PAGE_ID, 4);
        right.init(PageId::new(2), INVALID_PAGE_ID, 4);
        for k in [1, 2, 3] {
            left.insert(&k, &rid(k));
        }
        right.insert(&10, &rid(10));

        left.move_last_to_front_of(&mut right);
        assert_eq!(keys(&left.as_ref()), vec![1, 2]);
        assert_eq!(keys(&right.as_ref()), vec![3, 10]);

        right.move_first_to_end_of(&mut left);
        assert_eq!(keys(&left.as_ref()), vec![1, 2, 3]);
        assert_eq!(keys(&right.as_ref()), vec![10]);
        assert_eq!(left.as_ref().value_at(2), rid(3));
    }
}
