mod b_plus_tree;
pub mod btree_page;
mod btree_iterator;
mod index_key;
pub mod internal_page;
pub mod leaf_page;

pub use b_plus_tree::BPlusTree;
pub use btree_iterator::IndexIterator;
pub use btree_page::{BTreePage, IndexPageType, NodeRef};
pub use index_key::{GenericKey, IndexKey};
pub use internal_page::{InternalPage, InternalPageMut};
pub use leaf_page::{LeafPage, LeafPageMut};
