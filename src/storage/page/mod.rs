pub(crate) mod bytes;
mod header_page;

pub use header_page::*;
