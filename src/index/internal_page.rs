use std::marker::PhantomData;

use crate::common::{PageId, PAGE_SIZE};
use crate::storage::page::bytes::{read_i32, write_i32};

use super::btree_page::{BTreePage, BTreePageMut, IndexPageType, BTREE_PAGE_HEADER_SIZE};
use super::IndexKey;

fn entry_size<K: IndexKey>() -> usize {
    K::ENCODED_SIZE + 4
}

fn entry_offset<K: IndexKey>(index: usize) -> usize {
    BTREE_PAGE_HEADER_SIZE + index * entry_size::<K>()
}

/// Read-only view of an internal page.
///
/// Holds `size` child pointers and `size - 1` separator keys. The key in
/// slot 0 is unused: child `i` covers keys in `[key_at(i), key_at(i + 1))`.
pub struct InternalPage<'a, K> {
    data: &'a [u8],
    _marker: PhantomData<K>,
}

impl<'a, K> Clone for InternalPage<'a, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, K> Copy for InternalPage<'a, K> {}

impl<'a, K: IndexKey> InternalPage<'a, K> {
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

    pub fn key_at(&self, index: usize) -> K {
        K::decode(&self.data[entry_offset::<K>(index)..])
    }

    pub fn value_at(&self, index: usize) -> PageId {
        PageId::new(read_i32(
            self.data,
            entry_offset::<K>(index) + K::ENCODED_SIZE,
        ))
    }

    /// Slot holding the pointer to `child`.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    /// Child whose subtree covers `key`.
    pub fn lookup(&self, key: &K) -> PageId {
        // first separator strictly greater than key, over slots [1, size)
        let (mut lo, mut hi) = (1, self.size());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid) <= *key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        self.value_at(lo - 1)
    }

    pub fn entries(&self) -> Vec<(K, PageId)> {
        (0..self.size())
            .map(|i| (self.key_at(i), self.value_at(i)))
            .collect()
    }

    pub fn children(&self) -> Vec<PageId> {
        (0..self.size()).map(|i| self.value_at(i)).collect()
    }
}

/// Mutable view of an internal page.
///
/// The moves between siblings return the child pointers that changed
/// parent; the caller rewrites their parent ids.
pub struct InternalPageMut<'a, K> {
    data: &'a mut [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> InternalPageMut<'a, K> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn as_ref(&self) -> InternalPage<'_, K> {
        InternalPage::new(self.data)
    }

    fn header_mut(&mut self) -> BTreePageMut<'_> {
        BTreePageMut::new(self.data)
    }

    pub fn init(&mut self, page_id: PageId, parent: PageId, max_size: usize) {
        self.header_mut()
            .init(IndexPageType::Internal, page_id, parent, max_size);
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

    pub fn set_key_at(&mut self, index: usize, key: &K) {
        key.encode(&mut self.data[entry_offset::<K>(index)..]);
    }

    pub fn set_value_at(&mut self, index: usize, child: PageId) {
        write_i32(
            self.data,
            entry_offset::<K>(index) + K::ENCODED_SIZE,
            child.as_i32(),
        );
    }

    fn shift_right_from(&mut self, index: usize) {
        let size = self.size();
        let start = entry_offset::<K>(index);
        let end = entry_offset::<K>(size);
        self.data
            .copy_within(start..end, start + entry_size::<K>());
        self.set_size(size + 1);
    }

    /// Turns an empty page into a root with two children.
    pub fn populate_new_root(&mut self, left: PageId, key: &K, right: PageId) {
        self.set_value_at(0, left);
        self.set_key_at(1, key);
        self.set_value_at(1, right);
        self.set_size(2);
    }

    /// Inserts `(key, new_child)` right after the slot pointing at
    /// `old_child` and returns the new size.
    pub fn insert_node_after(&mut self, old_child: PageId, key: &K, new_child: PageId) -> usize {
        let index = match self.as_ref().value_index(old_child) {
            Some(index) => index + 1,
            None => self.size(),
        };
        self.shift_right_from(index);
        self.set_key_at(index, key);
        self.set_value_at(index, new_child);
        self.size()
    }

    pub fn remove(&mut self, index: usize) {
        let size = self.size();
        let start = entry_offset::<K>(index + 1);
        let end = entry_offset::<K>(size);
        self.data
            .copy_within(start..end, entry_offset::<K>(index));
        self.set_size(size - 1);
    }

    /// Empties a root that has a single child and returns that child.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        let child = self.as_ref().value_at(0);
        self.set_size(0);
        child
    }

    /// Replaces the whole content of the page.
    pub fn set_entries(&mut self, entries: &[(K, PageId)]) {
        for (i, (key, child)) in entries.iter().enumerate() {
            self.set_key_at(i, key);
            self.set_value_at(i, *child);
        }
        self.set_size(entries.len());
    }

    /// Moves every entry to the end of `recipient`, the left sibling.
    /// `middle_key` is the separator pulled down from the parent.
    pub fn move_all_to(&mut self, recipient: &mut InternalPageMut<'_, K>, middle_key: &K) -> Vec<PageId> {
        self.set_key_at(0, middle_key);
        let size = self.size();
        let base = recipient.size();
        let start = entry_offset::<K>(0);
        let end = entry_offset::<K>(size);
        let dst = entry_offset::<K>(base);
        recipient.data[dst..dst + (end - start)].copy_from_slice(&self.data[start..end]);
        recipient.set_size(base + size);

        let moved = self.as_ref().children();
        self.set_size(0);
        moved
    }

    /// Moves the first child to the end of `recipient`, the left sibling.
    /// The caller replaces the parent separator with the new `key_at(0)`.
    pub fn move_first_to_end_of(&mut self, recipient: &mut InternalPageMut<'_, K>, middle_key: &K) -> PageId {
        let child = self.as_ref().value_at(0);
        let size = recipient.size();
        recipient.set_key_at(size, middle_key);
        recipient.set_value_at(size, child);
        recipient.set_size(size + 1);
        self.remove(0);
        child
    }

    /// Moves the last child to the front of `recipient`, the right sibling.
    /// Afterwards `recipient.key_at(0)` holds the key to push up into the
    /// parent.
    pub fn move_last_to_front_of(&mut self, recipient: &mut InternalPageMut<'_, K>, middle_key: &K) -> PageId {
        let last = self.size() - 1;
        let key = self.as_ref().key_at(last);
        let child = self.as_ref().value_at(last);
        self.set_size(last);

        recipient.set_key_at(0, middle_key);
        recipient.shift_right_from(0);
        recipient.set_key_at(0, &key);
        recipient.set_value_at(0, child);
        child
    }
}
