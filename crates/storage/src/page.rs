use crate::PAGE_SIZE;
use common::PageId;

/// One fixed-size page's worth of bytes, tagged with the logical id it was
/// read for. This is the unit the buffer pool moves in and out of frames;
/// every page kind (table page, B+-tree node, bitmap page, meta page) is
/// just an interpretation of `data`.
#[derive(Clone)]
pub struct Page {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    pub fn from_bytes(page_id: PageId, bytes: [u8; PAGE_SIZE]) -> Self {
        Self {
            page_id,
            data: Box::new(bytes),
        }
    }

    pub fn reset(&mut self, page_id: PageId) {
        self.page_id = page_id;
        self.data.fill(0);
    }
}
