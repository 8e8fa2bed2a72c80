use std::fmt;

/// Page identifier type - uniquely identifies a page on disk.
/// Negative values never name a real page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub i32);

impl PageId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn as_i32(&self) -> i32 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }

    /// Byte offset of this page in the database file.
    pub fn file_offset(&self, page_size: usize) -> u64 {
        self.0 as u64 * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

/// Frame identifier type - identifies a buffer frame in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl FrameId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameId({})", self.0)
    }
}

/// Slot identifier within a table page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u16);

impl SlotId {
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

/// Record identifier - combination of page ID and slot ID.
/// This is the value type stored in B+ tree leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_id: SlotId,
}

impl RecordId {
    /// Encoded width: 4 bytes page id + 2 bytes slot id
    pub const ENCODED_SIZE: usize = 6;

    pub fn new(page_id: PageId, slot_id: SlotId) -> Self {
        Self { page_id, slot_id }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.0.to_le_bytes());
        buf[4..6].copy_from_slice(&self.slot_id.0.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Self {
        let page_id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let slot_id = u16::from_le_bytes([buf[4], buf[5]]);
        Self::new(PageId(page_id), SlotId(slot_id))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id.0, self.slot_id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_id_validity() {
        assert!(PageId::new(0).is_valid());
        assert!(!PageId::new(-1).is_valid());
        assert_eq!(PageId::new(3).file_offset(4096), 3 * 4096);
    }

    #[test]
    fn test_record_id_encoding() {
        let rid = RecordId::new(PageId::new(-7), SlotId::new(513));
        let mut buf = [0u8; RecordId::ENCODED_SIZE];
        rid.encode(&mut buf);
        assert_eq!(RecordId::decode(&buf), rid);
    }
}
