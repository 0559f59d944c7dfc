use crate::PAGE_SIZE;
use common::{DbError, DbResult, PageId};

const HEADER_SIZE: usize = 20;
const SLOT_SIZE: usize = 8;
const TOMBSTONE: u32 = u32::MAX;

/// A slotted page in the table heap. The header tracks links to the
/// previous/next page in the heap's linked list, a free-space pointer, and a
/// slot count. The slot directory grows downward from the header; tuple
/// bytes are packed upward from the end of the page. A tombstoned slot keeps
/// its directory entry (so existing `RecordId`s stay valid) but its size is
/// set to `TOMBSTONE` and its bytes are reclaimed.
pub struct TablePage<'a> {
    buf: &'a mut [u8; PAGE_SIZE],
}

impl<'a> TablePage<'a> {
    pub fn new(buf: &'a mut [u8; PAGE_SIZE]) -> Self {
        Self { buf }
    }

    pub fn init(&mut self, page_id: PageId, prev_page_id: PageId) {
        self.set_page_id(page_id);
        self.set_prev_page_id(prev_page_id);
        self.set_next_page_id(PageId::INVALID);
        self.set_free_space_pointer(PAGE_SIZE as u32);
        self.set_tuple_count(0);
    }

    pub fn page_id(&self) -> PageId {
        PageId(i32::from_le_bytes(self.buf[0..4].try_into().unwrap()))
    }

    pub fn set_page_id(&mut self, id: PageId) {
        self.buf[0..4].copy_from_slice(&id.0.to_le_bytes());
    }

    pub fn prev_page_id(&self) -> PageId {
        PageId(i32::from_le_bytes(self.buf[4..8].try_into().unwrap()))
    }

    pub fn set_prev_page_id(&mut self, id: PageId) {
        self.buf[4..8].copy_from_slice(&id.0.to_le_bytes());
    }

    pub fn next_page_id(&self) -> PageId {
        PageId(i32::from_le_bytes(self.buf[8..12].try_into().unwrap()))
    }

    pub fn set_next_page_id(&mut self, id: PageId) {
        self.buf[8..12].copy_from_slice(&id.0.to_le_bytes());
    }

    fn free_space_pointer(&self) -> u32 {
        u32::from_le_bytes(self.buf[12..16].try_into().unwrap())
    }

    fn set_free_space_pointer(&mut self, offset: u32) {
        self.buf[12..16].copy_from_slice(&offset.to_le_bytes());
    }

    pub fn tuple_count(&self) -> u32 {
        u32::from_le_bytes(self.buf[16..20].try_into().unwrap())
    }

    fn set_tuple_count(&mut self, count: u32) {
        self.buf[16..20].copy_from_slice(&count.to_le_bytes());
    }

    fn slot_offset(index: u32) -> usize {
        HEADER_SIZE + index as usize * SLOT_SIZE
    }

    fn slot(&self, index: u32) -> Option<(u32, u32)> {
        if index >= self.tuple_count() {
            return None;
        }
        let off = Self::slot_offset(index);
        let offset = u32::from_le_bytes(self.buf[off..off + 4].try_into().unwrap());
        let size = u32::from_le_bytes(self.buf[off + 4..off + 8].try_into().unwrap());
        Some((offset, size))
    }

    fn set_slot(&mut self, index: u32, offset: u32, size: u32) {
        let off = Self::slot_offset(index);
        self.buf[off..off + 4].copy_from_slice(&offset.to_le_bytes());
        self.buf[off + 4..off + 8].copy_from_slice(&size.to_le_bytes());
    }

    fn free_space_remaining(&self) -> usize {
        let directory_end = Self::slot_offset(self.tuple_count()) + SLOT_SIZE;
        (self.free_space_pointer() as usize).saturating_sub(directory_end)
    }

    /// Finds the lowest-indexed tombstoned slot, if any.
    fn find_tombstoned_slot(&self) -> Option<u32> {
        (0..self.tuple_count()).find(|&i| matches!(self.slot(i), Some((_, TOMBSTONE))))
    }

    /// Writes `data` into the page's tuple-bytes region and returns its
    /// offset, or `None` if there isn't enough contiguous free space.
    fn write_tuple_bytes(&mut self, data: &[u8]) -> Option<u32> {
        if data.len() > self.free_space_remaining() {
            return None;
        }
        let new_offset = self.free_space_pointer() as usize - data.len();
        self.buf[new_offset..new_offset + data.len()].copy_from_slice(data);
        self.set_free_space_pointer(new_offset as u32);
        Some(new_offset as u32)
    }

    /// Inserts `data`, reusing a tombstoned slot's directory entry if one
    /// exists, or appending a new slot at `tuple_count()` otherwise. Returns
    /// the slot index, or `None` if there isn't enough contiguous free space.
    pub fn insert_tuple(&mut self, data: &[u8]) -> Option<u32> {
        if let Some(index) = self.find_tombstoned_slot() {
            let offset = self.write_tuple_bytes(data)?;
            self.set_slot(index, offset, data.len() as u32);
            return Some(index);
        }
        let offset = self.write_tuple_bytes(data)?;
        let index = self.tuple_count();
        self.set_slot(index, offset, data.len() as u32);
        self.set_tuple_count(index + 1);
        Some(index)
    }

    pub fn get_tuple(&self, index: u32) -> Option<Vec<u8>> {
        let (offset, size) = self.slot(index)?;
        if size == TOMBSTONE {
            return None;
        }
        Some(self.buf[offset as usize..offset as usize + size as usize].to_vec())
    }

    pub fn is_deleted(&self, index: u32) -> bool {
        matches!(self.slot(index), Some((_, TOMBSTONE)) | None)
    }

    /// Tombstones the slot. The old tuple's bytes aren't reclaimed (this page
    /// format never compacts its byte region), but the slot's directory entry
    /// becomes eligible for reuse by a later `insert_tuple`.
    pub fn mark_delete(&mut self, index: u32) -> DbResult<()> {
        let (offset, size) = self
            .slot(index)
            .ok_or_else(|| DbError::Failed(format!("no slot {index}")))?;
        if size == TOMBSTONE {
            return Err(DbError::Failed(format!("slot {index} already deleted")));
        }
        self.set_slot(index, offset, TOMBSTONE);
        Ok(())
    }

    /// Replaces the tuple at `index` in place if it still fits in the same
    /// slot's space (no other writers rely on the slot shrinking); otherwise
    /// the caller must delete and re-insert (producing a new `RecordId`).
    pub fn update_tuple(&mut self, index: u32, data: &[u8]) -> DbResult<bool> {
        let (offset, size) = self
            .slot(index)
            .ok_or_else(|| DbError::Failed(format!("no slot {index}")))?;
        if size == TOMBSTONE {
            return Err(DbError::Failed(format!("slot {index} is deleted")));
        }
        if data.len() > size as usize {
            return Ok(false);
        }
        self.buf[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        self.set_slot(index, offset, data.len() as u32);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_page() -> Box<[u8; PAGE_SIZE]> {
        Box::new([0u8; PAGE_SIZE])
    }

    #[test]
    fn insert_and_get_round_trips() {
        let mut buf = new_page();
        let mut page = TablePage::new(&mut buf);
        page.init(PageId(0), PageId::INVALID);

        let slot = page.insert_tuple(b"hello").unwrap();
        assert_eq!(page.get_tuple(slot).unwrap(), b"hello");
        assert_eq!(page.tuple_count(), 1);
    }

    #[test]
    fn delete_tombstones_slot() {
        let mut buf = new_page();
        let mut page = TablePage::new(&mut buf);
        page.init(PageId(0), PageId::INVALID);
        let slot = page.insert_tuple(b"hello").unwrap();

        page.mark_delete(slot).unwrap();
        assert!(page.is_deleted(slot));
        assert_eq!(page.get_tuple(slot), None);
        assert!(page.mark_delete(slot).is_err());
    }

    #[test]
    fn update_in_place_when_it_fits() {
        let mut buf = new_page();
        let mut page = TablePage::new(&mut buf);
        page.init(PageId(0), PageId::INVALID);
        let slot = page.insert_tuple(b"hello").unwrap();

        assert!(page.update_tuple(slot, b"hi").unwrap());
        assert_eq!(page.get_tuple(slot).unwrap(), b"hi");
    }

    #[test]
    fn update_refuses_to_grow_in_place() {
        let mut buf = new_page();
        let mut page = TablePage::new(&mut buf);
        page.init(PageId(0), PageId::INVALID);
        let slot = page.insert_tuple(b"hi").unwrap();

        assert!(!page.update_tuple(slot, b"hello there").unwrap());
    }

    #[test]
    fn insert_reuses_tombstoned_slot() {
        let mut buf = new_page();
        let mut page = TablePage::new(&mut buf);
        page.init(PageId(0), PageId::INVALID);

        let slot_a = page.insert_tuple(b"aaa").unwrap();
        let _slot_b = page.insert_tuple(b"bbb").unwrap();
        page.mark_delete(slot_a).unwrap();

        let count_before = page.tuple_count();
        let reused = page.insert_tuple(b"cc").unwrap();
        assert_eq!(reused, slot_a, "reinsert should reuse the tombstoned slot index");
        assert_eq!(page.tuple_count(), count_before, "reuse must not grow the slot directory");
        assert_eq!(page.get_tuple(reused).unwrap(), b"cc");
    }

    #[test]
    fn insert_fails_when_full() {
        let mut buf = new_page();
        let mut page = TablePage::new(&mut buf);
        page.init(PageId(0), PageId::INVALID);

        let big = vec![0u8; PAGE_SIZE];
        assert!(page.insert_tuple(&big).is_none());
    }

    #[test]
    fn links_round_trip() {
        let mut buf = new_page();
        let mut page = TablePage::new(&mut buf);
        page.init(PageId(3), PageId(2));
        page.set_next_page_id(PageId(4));

        assert_eq!(page.page_id(), PageId(3));
        assert_eq!(page.prev_page_id(), PageId(2));
        assert_eq!(page.next_page_id(), PageId(4));
    }
}
