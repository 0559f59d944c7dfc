use crate::PAGE_SIZE;
use common::PageId;

const HEADER_BYTES: usize = 4;
const ENTRY_BYTES: usize = 8;

/// Maximum number of indexes whose root page id this page can track.
pub const MAX_ENTRIES: usize = (PAGE_SIZE - HEADER_BYTES) / ENTRY_BYTES;

/// Physical page 1's content: a fixed-capacity `index_id -> root_page_id`
/// table, bootstrapped once and updated in place whenever a B+-tree splits
/// or shrinks its root.
pub struct IndexRootsPage {
    entries: Vec<(u32, PageId)>,
}

impl IndexRootsPage {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn from_page_bytes(buf: &[u8; PAGE_SIZE]) -> Self {
        let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let off = HEADER_BYTES + i * ENTRY_BYTES;
            let index_id = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
            let root = i32::from_le_bytes(buf[off + 4..off + 8].try_into().unwrap());
            entries.push((index_id, PageId(root)));
        }
        Self { entries }
    }

    pub fn write_into(&self, buf: &mut [u8; PAGE_SIZE]) {
        buf[0..4].copy_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (i, (index_id, root)) in self.entries.iter().enumerate() {
            let off = HEADER_BYTES + i * ENTRY_BYTES;
            buf[off..off + 4].copy_from_slice(&index_id.to_le_bytes());
            buf[off + 4..off + 8].copy_from_slice(&root.0.to_le_bytes());
        }
    }

    pub fn get(&self, index_id: u32) -> Option<PageId> {
        self.entries
            .iter()
            .find(|(id, _)| *id == index_id)
            .map(|(_, root)| *root)
    }

    /// Inserts or overwrites the root page id for `index_id`. Returns `false`
    /// if the page is already at capacity and `index_id` is new.
    pub fn insert(&mut self, index_id: u32, root: PageId) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|(id, _)| *id == index_id) {
            entry.1 = root;
            return true;
        }
        if self.entries.len() >= MAX_ENTRIES {
            return false;
        }
        self.entries.push((index_id, root));
        true
    }

    pub fn remove(&mut self, index_id: u32) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(id, _)| *id != index_id);
        self.entries.len() != before
    }

    pub fn entries(&self) -> impl Iterator<Item = (u32, PageId)> + '_ {
        self.entries.iter().copied()
    }
}

impl Default for IndexRootsPage {
    fn default() -> Self {
        Self::new()
    }
}
