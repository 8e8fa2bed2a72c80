use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{
    BTreeConfig, PageId, RecordId, Result, TesseraError, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::btree_page::{BTreePage, BTreePageMut, NodeRef};
use super::{IndexIterator, IndexKey, InternalPage, InternalPageMut, LeafPage, LeafPageMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Insert,
    Remove,
}

/// Which leaf a read-only descent ends at
enum Target<'k, K> {
    Leftmost,
    Rightmost,
    Key(&'k K),
}

/// Latches held by one insert or remove.
///
/// Ancestors are kept top-down in `write_set`, so the back is always the
/// parent of the page being worked on. The tree root latch is only held
/// while the root page itself might change.
struct Context<'a> {
    root_guard: Option<RwLockWriteGuard<'a, PageId>>,
    write_set: VecDeque<WritePageGuard>,
    deleted_pages: Vec<PageId>,
    /// Pages allocated up front for the splits an insert will make
    spare_pages: Vec<WritePageGuard>,
}

impl<'a> Context<'a> {
    fn new(root_guard: RwLockWriteGuard<'a, PageId>) -> Self {
        Self {
            root_guard: Some(root_guard),
            write_set: VecDeque::new(),
            deleted_pages: Vec::new(),
            spare_pages: Vec::new(),
        }
    }

    /// Pages a split of the current leaf will allocate: one per page that
    /// splits, plus a new root if every latched ancestor is full.
    fn pages_for_split(&self) -> usize {
        let mut pages = 1;
        for guard in self.write_set.iter().rev() {
            let page = BTreePage::new(guard.data());
            if page.size() < page.max_size() {
                return pages;
            }
            pages += 1;
        }
        pages + 1
    }

    fn release_ancestors(&mut self) {
        self.write_set.clear();
        self.root_guard = None;
    }
}

fn out_of_memory(err: TesseraError) -> TesseraError {
    match err {
        TesseraError::BufferPoolFull => {
            TesseraError::OutOfMemory("buffer pool has no frame for an index page".to_string())
        }
        other => other,
    }
}

/// A B+ tree mapping unique keys to record ids.
///
/// Pages are latched with crabbing: readers hold at most a parent and a
/// child, writers hold the path from the highest unsafe ancestor down. The
/// `root_page_id` latch protects the root pointer, and the current root is
/// mirrored in the header page under the index name.
pub struct BPlusTree<K: IndexKey> {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    root_page_id: RwLock<PageId>,
    leaf_max_size: usize,
    internal_max_size: usize,
    _marker: PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Opens the index `index_name` with pages as wide as `K` allows.
    pub fn new(index_name: &str, bpm: Arc<BufferPoolManager>) -> Result<Self> {
        Self::with_config(index_name, bpm, BTreeConfig::for_key::<K>())
    }

    pub fn with_max_sizes(
        index_name: &str,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        Self::with_config(
            index_name,
            bpm,
            BTreeConfig::new(leaf_max_size, internal_max_size),
        )
    }

    /// Opens the index `index_name`. An index already registered in the
    /// header page resumes from its stored root; otherwise it is registered
    /// empty.
    pub fn with_config(
        index_name: &str,
        bpm: Arc<BufferPoolManager>,
        config: BTreeConfig,
    ) -> Result<Self> {
        config.validate::<K>()?;

        let root_page_id = {
            let mut guard = bpm.fetch_page_write(HEADER_PAGE_ID).map_err(out_of_memory)?;
            let existing = HeaderPageRef::new(guard.data()).get_root_id(index_name);
            match existing {
                Some(root) => {
                    info!("opened index {} with root {}", index_name, root);
                    root
                }
                None => {
                    HeaderPage::new(guard.data_mut()).insert_record(index_name, INVALID_PAGE_ID)?;
                    info!("created index {}", index_name);
                    INVALID_PAGE_ID
                }
            }
        };

        Ok(Self {
            index_name: index_name.to_string(),
            bpm,
            root_page_id: RwLock::new(root_page_id),
            leaf_max_size: config.leaf_max_size,
            internal_max_size: config.internal_max_size,
            _marker: PhantomData,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn get_root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    pub fn is_empty(&self) -> bool {
        !self.get_root_page_id().is_valid()
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub fn leaf_max_size(&self) -> usize {
        self.leaf_max_size
    }

    pub fn internal_max_size(&self) -> usize {
        self.internal_max_size
    }

    fn fetch_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        self.bpm.fetch_page_read(page_id).map_err(out_of_memory)
    }

    fn fetch_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        self.bpm.fetch_page_write(page_id).map_err(out_of_memory)
    }

    fn allocate_page(&self) -> Result<WritePageGuard> {
        self.bpm.new_page_guarded().map_err(out_of_memory)
    }

    /// Allocates `count` pages, or none at all.
    fn allocate_pages(&self, count: usize) -> Result<Vec<WritePageGuard>> {
        let mut pages = Vec::with_capacity(count);
        for _ in 0..count {
            match self.allocate_page() {
                Ok(guard) => pages.push(guard),
                Err(e) => {
                    self.discard_pages(pages);
                    return Err(e);
                }
            }
        }
        Ok(pages)
    }

    fn discard_pages(&self, pages: Vec<WritePageGuard>) {
        let ids: Vec<PageId> = pages.iter().map(WritePageGuard::page_id).collect();
        drop(pages);
        for page_id in ids {
            self.delete_tree_page(page_id);
        }
    }

    fn take_spare_page(&self, ctx: &mut Context<'_>) -> Result<WritePageGuard> {
        match ctx.spare_pages.pop() {
            Some(guard) => Ok(guard),
            None => self.allocate_page(),
        }
    }

    /*
     * Search
     */

    /// Returns the record ids stored under `key`: at most one, since keys
    /// are unique.
    pub fn get_value(&self, key: &K) -> Result<Vec<RecordId>> {
        let Some(guard) = self.find_leaf_read(Target::Key(key))? else {
            return Ok(Vec::new());
        };
        let leaf = LeafPage::<K>::new(guard.data());
        Ok(leaf.lookup(key).into_iter().collect())
    }

    /// Read-latches its way down to a leaf, releasing each parent once the
    /// child is latched. Returns `None` for an empty tree.
    fn find_leaf_read(&self, target: Target<'_, K>) -> Result<Option<ReadPageGuard>> {
        let root_guard = self.root_page_id.read();
        if !root_guard.is_valid() {
            return Ok(None);
        }
        let mut guard = self.fetch_read(*root_guard)?;
        drop(root_guard);

        loop {
            let child = match NodeRef::<K>::parse(guard.data())? {
                NodeRef::Leaf(_) => None,
                NodeRef::Internal(internal) => Some(match &target {
                    Target::Leftmost => internal.value_at(0),
                    Target::Rightmost => internal.value_at(internal.size() - 1),
                    Target::Key(key) => internal.lookup(key),
                }),
            };
            match child {
                None => return Ok(Some(guard)),
                Some(child) => guard = self.fetch_read(child)?,
            }
        }
    }

    /// Whether an operation on this page cannot spread to its parent.
    fn is_safe(page: BTreePage<'_>, op: Operation) -> bool {
        match op {
            Operation::Insert if page.is_leaf() => page.size() + 1 < page.max_size(),
            Operation::Insert => page.size() < page.max_size(),
            Operation::Remove if page.is_root() => {
                page.size() > if page.is_leaf() { 1 } else { 2 }
            }
            Operation::Remove => page.size() > page.min_size(),
        }
    }

    /// Write-latches the path to the leaf covering `key`. Every ancestor
    /// above a safe page is released on the way down.
    fn find_leaf_for_write(
        &self,
        root_id: PageId,
        key: &K,
        op: Operation,
        ctx: &mut Context<'_>,
    ) -> Result<WritePageGuard> {
        let mut guard = self.fetch_write(root_id)?;

        loop {
            let (safe, child) = match NodeRef::<K>::parse(guard.data())? {
                NodeRef::Leaf(leaf) => (Self::is_safe(leaf.header(), op), None),
                NodeRef::Internal(internal) => {
                    (Self::is_safe(internal.header(), op), Some(internal.lookup(key)))
                }
            };
            if safe {
                ctx.release_ancestors();
            }
            match child {
                None => return Ok(guard),
                Some(child) => {
                    ctx.write_set.push_back(guard);
                    guard = self.fetch_write(child)?;
                }
            }
        }
    }

    /// Points the tree and its header record at `root_id`.
    fn set_root(&self, ctx: &mut Context<'_>, root_id: PageId) -> Result<()> {
        let Some(root) = ctx.root_guard.as_mut() else {
            return Err(TesseraError::IndexCorrupted(format!(
                "root of {} changed without the root latch",
                self.index_name
            )));
        };
        **root = root_id;

        let mut guard = self.fetch_write(HEADER_PAGE_ID)?;
        HeaderPage::new(guard.data_mut()).update_record(&self.index_name, root_id)?;
        debug!("index {} root is now {}", self.index_name, root_id);
        Ok(())
    }

    fn reparent(&self, child: PageId, parent: PageId) -> Result<()> {
        let mut guard = self.fetch_write(child)?;
        BTreePageMut::new(guard.data_mut()).set_parent_page_id(parent);
        Ok(())
    }

    /*
     * Insertion
     */

    /// Inserts a unique key. Returns false, changing nothing, if the key is
    /// already present.
    pub fn insert(&self, key: K, value: RecordId) -> Result<bool> {
        let root_guard = self.root_page_id.write();
        let root_id = *root_guard;
        let mut ctx = Context::new(root_guard);

        if !root_id.is_valid() {
            self.start_new_tree(&mut ctx, &key, &value)?;
            return Ok(true);
        }

        let mut leaf_guard = self.find_leaf_for_write(root_id, &key, Operation::Insert, &mut ctx)?;
        let leaf = LeafPage::<K>::new(leaf_guard.data());
        if leaf.lookup(&key).is_some() {
            return Ok(false);
        }
        let max_size = leaf.max_size();

        // a split must not fail halfway, so its pages come first
        if leaf.size() + 1 >= max_size {
            ctx.spare_pages = self.allocate_pages(ctx.pages_for_split())?;
        }

        let size = LeafPageMut::<K>::new(leaf_guard.data_mut()).insert(&key, &value);
        if size < max_size {
            return Ok(true);
        }

        let mut sibling_guard = self.take_spare_page(&mut ctx)?;
        let sibling_id = sibling_guard.page_id();
        {
            let mut leaf = LeafPageMut::<K>::new(leaf_guard.data_mut());
            let mut sibling = LeafPageMut::<K>::new(sibling_guard.data_mut());
            let parent = leaf.as_ref().header().parent_page_id();
            sibling.init(sibling_id, parent, max_size);
            leaf.move_half_to(&mut sibling);
            sibling.set_next_page_id(leaf.as_ref().next_page_id());
            leaf.set_next_page_id(sibling_id);
        }
        let separator = LeafPage::<K>::new(sibling_guard.data()).key_at(0);
        debug!("split leaf {} into {}", leaf_guard.page_id(), sibling_id);

        self.insert_into_parent(&mut ctx, leaf_guard, separator, sibling_guard)?;
        let unused = std::mem::take(&mut ctx.spare_pages);
        if !unused.is_empty() {
            warn!("index {} allocated {} pages it did not use", self.index_name, unused.len());
            self.discard_pages(unused);
        }
        Ok(true)
    }

    fn start_new_tree(&self, ctx: &mut Context<'_>, key: &K, value: &RecordId) -> Result<()> {
        let mut guard = self.allocate_page()?;
        let root_id = guard.page_id();
        {
            let mut leaf = LeafPageMut::<K>::new(guard.data_mut());
            leaf.init(root_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, value);
        }
        drop(guard);
        self.set_root(ctx, root_id)
    }

    /// Hooks `right`, freshly split off `left`, into the parent, splitting
    /// ancestors upward for as long as they overflow.
    fn insert_into_parent(
        &self,
        ctx: &mut Context<'_>,
        mut left: WritePageGuard,
        mut key: K,
        mut right: WritePageGuard,
    ) -> Result<()> {
        loop {
            let left_id = left.page_id();
            let right_id = right.page_id();

            let Some(mut parent_guard) = ctx.write_set.pop_back() else {
                let mut root_guard = self.take_spare_page(ctx)?;
                let root_id = root_guard.page_id();
                {
                    let mut root = InternalPageMut::<K>::new(root_guard.data_mut());
                    root.init(root_id, INVALID_PAGE_ID, self.internal_max_size);
                    root.populate_new_root(left_id, &key, right_id);
                }
                BTreePageMut::new(left.data_mut()).set_parent_page_id(root_id);
                BTreePageMut::new(right.data_mut()).set_parent_page_id(root_id);
                drop(left);
                drop(right);
                drop(root_guard);
                return self.set_root(ctx, root_id);
            };

            // children may get reparented below
            drop(left);
            drop(right);

            let parent = InternalPage::<K>::new(parent_guard.data());
            let max_size = parent.max_size();
            if parent.size() < max_size {
                InternalPageMut::<K>::new(parent_guard.data_mut())
                    .insert_node_after(left_id, &key, right_id);
                return Ok(());
            }

            let mut entries = parent.entries();
            let grandparent = parent.header().parent_page_id();
            let position = entries
                .iter()
                .position(|(_, child)| *child == left_id)
                .map_or(entries.len(), |i| i + 1);
            entries.insert(position, (key, right_id));
            let split_at = (max_size + 1) / 2;

            let mut sibling_guard = self.take_spare_page(ctx)?;
            let sibling_id = sibling_guard.page_id();
            InternalPageMut::<K>::new(parent_guard.data_mut()).set_entries(&entries[..split_at]);
            {
                let mut sibling = InternalPageMut::<K>::new(sibling_guard.data_mut());
                sibling.init(sibling_id, grandparent, max_size);
                sibling.set_entries(&entries[split_at..]);
            }
            for (_, child) in &entries[split_at..] {
                self.reparent(*child, sibling_id)?;
            }
            debug!(
                "split internal {} into {}",
                parent_guard.page_id(),
                sibling_id
            );

            key = entries[split_at].0;
            left = parent_guard;
            right = sibling_guard;
        }
    }

    /*
     * Removal
     */

    /// Removes `key`. Returns false if it wasn't present.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let root_guard = self.root_page_id.write();
        let root_id = *root_guard;
        if !root_id.is_valid() {
            return Ok(false);
        }
        let mut ctx = Context::new(root_guard);

        let mut leaf_guard = self.find_leaf_for_write(root_id, key, Operation::Remove, &mut ctx)?;
        if LeafPage::<K>::new(leaf_guard.data()).lookup(key).is_none() {
            return Ok(false);
        }
        LeafPageMut::<K>::new(leaf_guard.data_mut()).remove_record(key);

        if Self::is_underflow(BTreePage::new(leaf_guard.data())) {
            self.coalesce_or_redistribute(&mut ctx, leaf_guard)?;
        } else {
            drop(leaf_guard);
        }

        let deleted = std::mem::take(&mut ctx.deleted_pages);
        drop(ctx);
        for page_id in deleted {
            self.delete_tree_page(page_id);
        }
        Ok(true)
    }

    fn is_underflow(page: BTreePage<'_>) -> bool {
        match (page.is_root(), page.is_leaf()) {
            (true, true) => page.size() == 0,
            (true, false) => page.size() == 1,
            (false, _) => page.size() < page.min_size(),
        }
    }

    fn delete_tree_page(&self, page_id: PageId) {
        match self.bpm.delete_page(page_id) {
            Ok(true) => debug!("deleted index page {}", page_id),
            Ok(false) => warn!("index page {} was freed while still pinned", page_id),
            Err(e) => warn!("failed to delete index page {}: {}", page_id, e),
        }
    }

    /// Restores minimum occupancy of `node` by borrowing from or merging
    /// with a sibling, walking up while parents underflow in turn.
    fn coalesce_or_redistribute(&self, ctx: &mut Context<'_>, mut node: WritePageGuard) -> Result<()> {
        loop {
            if BTreePage::new(node.data()).is_root() {
                return self.adjust_root(ctx, node);
            }

            let node_id = node.page_id();
            let Some(mut parent) = ctx.write_set.pop_back() else {
                return Err(TesseraError::IndexCorrupted(format!(
                    "underfull page {} has no latched parent",
                    node_id
                )));
            };

            let (index, sibling_id) = {
                let parent_page = InternalPage::<K>::new(parent.data());
                let index = parent_page.value_index(node_id).ok_or_else(|| {
                    TesseraError::IndexCorrupted(format!(
                        "page {} is missing from its parent {}",
                        node_id,
                        parent.page_id()
                    ))
                })?;
                let sibling_index = if index == 0 { 1 } else { index - 1 };
                (index, parent_page.value_at(sibling_index))
            };

            let mut sibling = self.fetch_write(sibling_id)?;
            let sibling_page = BTreePage::new(sibling.data());
            if sibling_page.size() > sibling_page.min_size() {
                return self.redistribute(&mut sibling, &mut node, &mut parent, index);
            }

            // the left page absorbs the right one
            let (mut left, mut right, right_index) = if index == 0 {
                (node, sibling, 1)
            } else {
                (sibling, node, index)
            };
            let left_id = left.page_id();
            let right_id = right.page_id();

            if BTreePage::new(left.data()).is_leaf() {
                let mut recipient = LeafPageMut::<K>::new(left.data_mut());
                LeafPageMut::<K>::new(right.data_mut()).move_all_to(&mut recipient);
            } else {
                let middle_key = InternalPage::<K>::new(parent.data()).key_at(right_index);
                let mut recipient = InternalPageMut::<K>::new(left.data_mut());
                let moved = InternalPageMut::<K>::new(right.data_mut())
                    .move_all_to(&mut recipient, &middle_key);
                for child in moved {
                    self.reparent(child, left_id)?;
                }
            }
            ctx.deleted_pages.push(right_id);
            debug!("merged {} into {}", right_id, left_id);
            drop(left);
            drop(right);

            InternalPageMut::<K>::new(parent.data_mut()).remove(right_index);
            if !Self::is_underflow(BTreePage::new(parent.data())) {
                return Ok(());
            }
            node = parent;
        }
    }

    /// Moves one entry from `sibling` into `node`. `index` is the slot of
    /// `node` in `parent`; the sibling sits to the right only when it is 0.
    fn redistribute(
        &self,
        sibling: &mut WritePageGuard,
        node: &mut WritePageGuard,
        parent: &mut WritePageGuard,
        index: usize,
    ) -> Result<()> {
        let node_id = node.page_id();
        let is_leaf = BTreePage::new(node.data()).is_leaf();
        let mut parent_page = InternalPageMut::<K>::new(parent.data_mut());

        if index == 0 {
            if is_leaf {
                let mut recipient = LeafPageMut::<K>::new(node.data_mut());
                LeafPageMut::<K>::new(sibling.data_mut()).move_first_to_end_of(&mut recipient);
            } else {
                let middle_key = parent_page.as_ref().key_at(1);
                let mut recipient = InternalPageMut::<K>::new(node.data_mut());
                let child = InternalPageMut::<K>::new(sibling.data_mut())
                    .move_first_to_end_of(&mut recipient, &middle_key);
                self.reparent(child, node_id)?;
            }
            // the sibling's new first key separates the two
            let separator = if is_leaf {
                LeafPage::<K>::new(sibling.data()).key_at(0)
            } else {
                InternalPage::<K>::new(sibling.data()).key_at(0)
            };
            parent_page.set_key_at(1, &separator);
        } else {
            if is_leaf {
                let mut recipient = LeafPageMut::<K>::new(node.data_mut());
                LeafPageMut::<K>::new(sibling.data_mut()).move_last_to_front_of(&mut recipient);
            } else {
                let middle_key = parent_page.as_ref().key_at(index);
                let mut recipient = InternalPageMut::<K>::new(node.data_mut());
                let child = InternalPageMut::<K>::new(sibling.data_mut())
                    .move_last_to_front_of(&mut recipient, &middle_key);
                self.reparent(child, node_id)?;
            }
            let separator = if is_leaf {
                LeafPage::<K>::new(node.data()).key_at(0)
            } else {
                InternalPage::<K>::new(node.data()).key_at(0)
            };
            parent_page.set_key_at(index, &separator);
        }

        debug!("redistributed between {} and {}", sibling.page_id(), node_id);
        Ok(())
    }

    /// Shrinks the tree at the root: an empty root leaf empties the tree,
    /// and an internal root left with one child hands the root to it.
    fn adjust_root(&self, ctx: &mut Context<'_>, mut root: WritePageGuard) -> Result<()> {
        let root_id = root.page_id();
        let page = BTreePage::new(root.data());

        if page.is_leaf() {
            if page.size() == 0 {
                drop(root);
                ctx.deleted_pages.push(root_id);
                self.set_root(ctx, INVALID_PAGE_ID)?;
            }
            return Ok(());
        }

        if page.size() == 1 {
            let child = InternalPageMut::<K>::new(root.data_mut()).remove_and_return_only_child();
            drop(root);
            self.reparent(child, INVALID_PAGE_ID)?;
            ctx.deleted_pages.push(root_id);
            self.set_root(ctx, child)?;
        }
        Ok(())
    }

    /*
     * Iteration
     */

    /// Positions at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator<K>> {
        let leaf = self.find_leaf_read(Target::Leftmost)?;
        IndexIterator::new(Arc::clone(&self.bpm), leaf.map(ReadPageGuard::into_basic), 0)
    }

    /// Positions at the first key not less than `key`.
    pub fn begin_at(&self, key: &K) -> Result<IndexIterator<K>> {
        let Some(leaf) = self.find_leaf_read(Target::Key(key))? else {
            return IndexIterator::new(Arc::clone(&self.bpm), None, 0);
        };
        let index = LeafPage::<K>::new(leaf.data()).key_index(key);
        IndexIterator::new(Arc::clone(&self.bpm), Some(leaf.into_basic()), index)
    }

    /// Positions one past the largest key.
    pub fn end(&self) -> Result<IndexIterator<K>> {
        let Some(leaf) = self.find_leaf_read(Target::Rightmost)? else {
            return IndexIterator::new(Arc::clone(&self.bpm), None, 0);
        };
        let size = LeafPage::<K>::new(leaf.data()).size();
        IndexIterator::new(Arc::clone(&self.bpm), Some(leaf.into_basic()), size)
    }

    /*
     * Utilities
     */

    /// Inserts every whitespace-separated integer in the file, each with
    /// the record id `rid_fn` derives from it. Returns how many were new.
    pub fn insert_from_file<P, F>(&self, path: P, rid_fn: F) -> Result<usize>
    where
        P: AsRef<Path>,
        F: Fn(i64) -> RecordId,
    {
        let mut inserted = 0;
        for value in Self::read_integers(path.as_ref())? {
            if self.insert(K::from_integer(value), rid_fn(value))? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Removes every whitespace-separated integer in the file. Returns how
    /// many were present.
    pub fn remove_from_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let mut removed = 0;
        for value in Self::read_integers(path.as_ref())? {
            if self.remove(&K::from_integer(value))? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn read_integers(path: &Path) -> Result<Vec<i64>> {
        fs::read_to_string(path)?
            .split_whitespace()
            .map(|token| {
                token.parse::<i64>().map_err(|e| {
                    TesseraError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("bad key {:?} in {}: {}", token, path.display(), e),
                    ))
                })
            })
            .collect()
    }

    /// One line per level: internal pages as `[separators]`, leaves as
    /// `(keys)`.
    pub fn to_pretty_string(&self) -> Result<String> {
        let root_guard = self.root_page_id.read();
        if !root_guard.is_valid() {
            warn!("index {} is empty", self.index_name);
            return Ok(String::new());
        }

        let mut out = String::new();
        let mut level = vec![*root_guard];
        while !level.is_empty() {
            let mut next_level = Vec::new();
            let mut nodes = Vec::with_capacity(level.len());
            for page_id in level {
                let guard = self.fetch_read(page_id)?;
                match NodeRef::<K>::parse(guard.data())? {
                    NodeRef::Leaf(leaf) => {
                        let keys: Vec<String> =
                            leaf.entries().iter().map(|(k, _)| k.to_string()).collect();
                        nodes.push(format!("({})", keys.join(",")));
                    }
                    NodeRef::Internal(internal) => {
                        let keys: Vec<String> = (1..internal.size())
                            .map(|i| internal.key_at(i).to_string())
                            .collect();
                        nodes.push(format!("[{}]", keys.join(",")));
                        next_level.extend(internal.children());
                    }
                }
            }
            out.push_str(&nodes.join(" "));
            out.push('\n');
            level = next_level;
        }
        Ok(out)
    }

    /// Writes the tree as a Graphviz digraph.
    pub fn draw<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let root_guard = self.root_page_id.read();
        if !root_guard.is_valid() {
            warn!("index {} is empty, nothing to draw", self.index_name);
            return Ok(());
        }

        let mut dot = String::from("digraph G {\n  node [shape=record];\n");
        let mut pending = vec![*root_guard];
        while let Some(page_id) = pending.pop() {
            let guard = self.fetch_read(page_id)?;
            let id = page_id.as_i32();
            match NodeRef::<K>::parse(guard.data())? {
                NodeRef::Leaf(leaf) => {
                    let keys: Vec<String> =
                        leaf.entries().iter().map(|(k, _)| k.to_string()).collect();
                    let _ = writeln!(
                        dot,
                        "  P{} [label=\"P{}|{}\" style=filled fillcolor=lightgreen];",
                        id,
                        id,
                        keys.join("|")
                    );
                    let next = leaf.next_page_id();
                    if next.is_valid() {
                        let _ = writeln!(dot, "  P{} -> P{} [style=dashed];", id, next.as_i32());
                        let _ = writeln!(dot, "  {{rank=same P{} P{}}};", id, next.as_i32());
                    }
                }
                NodeRef::Internal(internal) => {
                    let slots: Vec<String> = (0..internal.size())
                        .map(|i| {
                            if i == 0 {
                                "<c0> ".to_string()
                            } else {
                                format!("<c{}> {}", i, internal.key_at(i))
                            }
                        })
                        .collect();
                    let _ = writeln!(
                        dot,
                        "  P{} [label=\"P{}|{}\" style=filled fillcolor=pink];",
                        id,
                        id,
                        slots.join("|")
                    );
                    for (i, child) in internal.children().into_iter().enumerate() {
                        let _ = writeln!(dot, "  P{}:c{} -> P{};", id, i, child.as_i32());
                        pending.push(child);
                    }
                }
            }
        }
        dot.push_str("}\n");

        fs::write(path, dot)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SlotId;
    use crate::storage::disk::DiskManager;
    use tempfile::NamedTempFile;

    fn create_tree(leaf_max: usize, internal_max: usize) -> (BPlusTree<i64>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(32, 2, dm));
        let tree = BPlusTree::with_max_sizes("test_index", bpm, leaf_max, internal_max).unwrap();
        (tree, temp_file)
    }

    fn rid(key: i64) -> RecordId {
        RecordId::new(PageId::new(key as i32), SlotId::new(key as u16))
    }

    #[test]
    fn test_empty_tree() {
        let (tree, _temp) = create_tree(4, 4);
        assert!(tree.is_empty());
        assert!(tree.get_value(&1).unwrap().is_empty());
        assert!(!tree.remove(&1).unwrap());
        assert_eq!(tree.to_pretty_string().unwrap(), "");
        assert!(tree.begin().unwrap().is_end());
    }

    #[test]
    fn test_first_insert_creates_root_leaf() {
        let (tree, _temp) = create_tree(4, 4);
        assert!(tree.insert(7, rid(7)).unwrap());
        assert!(!tree.is_empty());
        assert_eq!(tree.get_value(&7).unwrap(), vec![rid(7)]);
        assert_eq!(tree.to_pretty_string().unwrap(), "(7)\n");
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let (tree, _temp) = create_tree(4, 4);
        assert!(tree.insert(1, rid(1)).unwrap());
        assert!(!tree.insert(1, rid(2)).unwrap());
        assert_eq!(tree.get_value(&1).unwrap(), vec![rid(1)]);
    }

    #[test]
    fn test_leaf_split_builds_root() {
        let (tree, _temp) = create_tree(4, 4);
        for key in 1..=5 {
            tree.insert(key, rid(key)).unwrap();
        }
        assert_eq!(tree.to_pretty_string().unwrap(), "[3]\n(1,2) (3,4,5)\n");
    }

    #[test]
    fn test_internal_split() {
        let (tree, _temp) = create_tree(2, 3);
        for key in 1..=5 {
            tree.insert(key, rid(key)).unwrap();
        }
        // leaves split at two entries, internal pages at three children
        assert_eq!(
            tree.to_pretty_string().unwrap(),
            "[3]\n[2] [4,5]\n(1) (2) (3) (4) (5)\n"
        );
        for key in 1..=5 {
            assert_eq!(tree.get_value(&key).unwrap(), vec![rid(key)]);
        }
    }

    #[test]
    fn test_remove_redistributes_from_left() {
        let (tree, _temp) = create_tree(4, 4);
        for key in [1, 2, 3, 4, 5, 6] {
            tree.insert(key, rid(key)).unwrap();
        }
        // the right leaf splits a second time when 6 arrives
        let before = tree.to_pretty_string().unwrap();
        assert_eq!(before, "[3,5]\n(1,2) (3,4) (5,6)\n");

        tree.insert(0, rid(0)).unwrap();
        assert!(tree.remove(&3).unwrap());
        assert_eq!(tree.to_pretty_string().unwrap(), "[2,5]\n(0,1) (2,4) (5,6)\n");
    }

    #[test]
    fn test_remove_coalesces_and_collapses_root() {
        let (tree, _temp) = create_tree(4, 4);
        for key in 1..=5 {
            tree.insert(key, rid(key)).unwrap();
        }
        assert!(tree.remove(&1).unwrap());
        // (2) borrows 3 from its right sibling
        assert_eq!(tree.to_pretty_string().unwrap(), "[4]\n(2,3) (4,5)\n");

        assert!(tree.remove(&5).unwrap());
        // merging leaves the root with a single child
        assert_eq!(tree.to_pretty_string().unwrap(), "(2,3,4)\n");
        assert!(tree.get_value(&5).unwrap().is_empty());
    }

    #[test]
    fn test_remove_everything_empties_tree() {
        let (tree, _temp) = create_tree(3, 3);
        for key in 0..30 {
            tree.insert(key, rid(key)).unwrap();
        }
        for key in 0..30 {
            assert!(tree.remove(&key).unwrap(), "key {}", key);
        }
        assert!(tree.is_empty());
        assert!(tree.begin().unwrap().is_end());
        // the tree grows again from scratch
        assert!(tree.insert(3, rid(3)).unwrap());
        assert_eq!(tree.get_value(&3).unwrap(), vec![rid(3)]);
    }

    #[test]
    fn test_root_is_recorded_in_header() {
        let (tree, _temp) = create_tree(4, 4);
        for key in 1..=10 {
            tree.insert(key, rid(key)).unwrap();
        }
        let guard = tree.bpm.fetch_page_read(HEADER_PAGE_ID).unwrap();
        assert_eq!(
            HeaderPageRef::new(guard.data()).get_root_id("test_index"),
            Some(tree.get_root_page_id())
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(8, 2, dm));
        assert!(matches!(
            BPlusTree::<i64>::with_max_sizes("bad", Arc::clone(&bpm), 1, 4),
            Err(TesseraError::InvalidConfig(_))
        ));
        assert!(matches!(
            BPlusTree::<i64>::with_max_sizes("bad", bpm, 4, 2),
            Err(TesseraError::InvalidConfig(_))
        ));
    }
}
