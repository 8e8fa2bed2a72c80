use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer::{BasicPageGuard, BufferPoolManager};
use crate::common::{PageId, RecordId, Result, TesseraError, HEADER_PAGE_ID, INVALID_PAGE_ID};

use super::{IndexKey, LeafPage, NodeRef};

/// Forward cursor over the leaf chain.
///
/// The current leaf stays pinned but not latched between steps; each step
/// read-latches it just long enough to copy one entry out. Moving to the
/// next leaf unpins the current one first.
///
/// Pages are checked to be leaves as they are reached. A chain that leads
/// anywhere else, as it can when a concurrent remove frees the next leaf,
/// ends the scan with `IndexCorrupted`.
pub struct IndexIterator<K: IndexKey> {
    bpm: Arc<BufferPoolManager>,
    page: Option<BasicPageGuard>,
    index: usize,
    /// Error hit while moving past the entry last returned
    failed: Option<TesseraError>,
    _marker: PhantomData<K>,
}

fn as_leaf<K: IndexKey>(page_id: PageId, data: &[u8]) -> Result<LeafPage<'_, K>> {
    match NodeRef::<K>::parse(data)? {
        NodeRef::Leaf(leaf) if leaf.page_id() == page_id => Ok(leaf),
        _ => Err(TesseraError::IndexCorrupted(format!(
            "leaf chain reached page {}, which is not a leaf",
            page_id
        ))),
    }
}

impl<K: IndexKey> IndexIterator<K> {
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        page: Option<BasicPageGuard>,
        index: usize,
    ) -> Result<Self> {
        let mut iter = Self {
            bpm,
            page,
            index,
            failed: None,
            _marker: PhantomData,
        };
        iter.skip_exhausted_leaves()?;
        Ok(iter)
    }

    /// Page and offset of the current position.
    pub fn position(&self) -> (PageId, usize) {
        let page_id = self
            .page
            .as_ref()
            .map_or(INVALID_PAGE_ID, |page| page.page_id());
        (page_id, self.index)
    }

    /// Whether the cursor is past the last entry of the last leaf. A cursor
    /// resting on a page that is no longer a leaf is at its end too.
    pub fn is_end(&self) -> bool {
        let Some(page) = &self.page else {
            return true;
        };
        let data = page.read();
        match as_leaf::<K>(page.page_id(), &data[..]) {
            Ok(leaf) => self.index >= leaf.size() && !leaf.next_page_id().is_valid(),
            Err(_) => true,
        }
    }

    /// Hops over leaves with nothing left at the cursor, so equal positions
    /// compare equal.
    fn skip_exhausted_leaves(&mut self) -> Result<()> {
        loop {
            let Some(page) = &self.page else {
                return Ok(());
            };
            let next_page_id = {
                let data = page.read();
                let leaf = as_leaf::<K>(page.page_id(), &data[..])?;
                if self.index < leaf.size() {
                    return Ok(());
                }
                leaf.next_page_id()
            };
            if !next_page_id.is_valid() {
                return Ok(());
            }
            if next_page_id == HEADER_PAGE_ID {
                return Err(TesseraError::IndexCorrupted(format!(
                    "leaf {} links to the header page",
                    page.page_id()
                )));
            }

            self.page = None;
            self.page = Some(self.bpm.fetch_page_basic(next_page_id)?);
            self.index = 0;
        }
    }

    pub fn next(&mut self) -> Result<Option<(K, RecordId)>> {
        if let Some(e) = self.failed.take() {
            return Err(e);
        }
        let Some(page) = &self.page else {
            return Ok(None);
        };
        let item = {
            let data = page.read();
            let leaf = as_leaf::<K>(page.page_id(), &data[..])?;
            if self.index >= leaf.size() {
                return Ok(None);
            }
            leaf.item(self.index)
        };

        self.index += 1;
        // the entry is already read; report a broken chain on the next call
        if let Err(e) = self.skip_exhausted_leaves() {
            self.page = None;
            self.failed = Some(e);
        }
        Ok(Some(item))
    }
}

impl<K: IndexKey> Iterator for IndexIterator<K> {
    type Item = Result<(K, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match IndexIterator::next(self) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.page = None;
                Some(Err(e))
            }
        }
    }
}

impl<K: IndexKey> PartialEq for IndexIterator<K> {
    fn eq(&self, other: &Self) -> bool {
        self.position() == other.position()
    }
}
