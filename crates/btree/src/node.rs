use common::{PageId, RecordId};
use storage::PAGE_SIZE;

const COMMON_HEADER: usize = 20;
const LEAF_HEADER: usize = COMMON_HEADER + 4;
const LEAF_ENTRY_EXTRA: usize = 8;
const INTERNAL_ENTRY_EXTRA: usize = 4;

fn is_leaf_byte(buf: &[u8; PAGE_SIZE]) -> bool {
    buf[8] != 0
}

/// Inspects a node page's common header to tell a leaf from an internal
/// page before constructing the matching wrapper.
pub fn page_is_leaf(buf: &[u8; PAGE_SIZE]) -> bool {
    is_leaf_byte(buf)
}

/// Maximum entries a leaf page with `key_len`-byte keys can hold.
pub fn leaf_max_entries(key_len: usize) -> u32 {
    ((PAGE_SIZE - LEAF_HEADER) / (key_len + LEAF_ENTRY_EXTRA)) as u32
}

/// Maximum entries an internal page with `key_len`-byte keys can hold.
pub fn internal_max_entries(key_len: usize) -> u32 {
    ((PAGE_SIZE - COMMON_HEADER) / (key_len + INTERNAL_ENTRY_EXTRA)) as u32
}

pub fn page_size(buf: &[u8; PAGE_SIZE]) -> u32 {
    u32::from_le_bytes(buf[12..16].try_into().unwrap())
}

pub fn page_parent_id(buf: &[u8; PAGE_SIZE]) -> PageId {
    PageId(i32::from_le_bytes(buf[4..8].try_into().unwrap()))
}

/// A B+-tree leaf page: header, then `size` entries of `(key bytes,
/// RecordId)`, tightly packed. Leaves are linked left to right via
/// `next_page_id` for range iteration.
pub struct LeafPage<'a> {
    buf: &'a mut [u8; PAGE_SIZE],
    key_len: usize,
}

impl<'a> LeafPage<'a> {
    pub fn new(buf: &'a mut [u8; PAGE_SIZE], key_len: usize) -> Self {
        Self { buf, key_len }
    }

    pub fn init(&mut self, page_id: PageId, parent_id: PageId, max_size: u32) {
        self.set_page_id(page_id);
        self.set_parent_page_id(parent_id);
        self.buf[8] = 1;
        self.set_size(0);
        self.set_max_size(max_size);
        self.set_next_page_id(PageId::INVALID);
    }

    fn entry_len(&self) -> usize {
        self.key_len + LEAF_ENTRY_EXTRA
    }

    pub fn page_id(&self) -> PageId {
        PageId(i32::from_le_bytes(self.buf[0..4].try_into().unwrap()))
    }

    pub fn set_page_id(&mut self, id: PageId) {
        self.buf[0..4].copy_from_slice(&id.0.to_le_bytes());
    }

    pub fn parent_page_id(&self) -> PageId {
        page_parent_id(self.buf)
    }

    pub fn set_parent_page_id(&mut self, id: PageId) {
        self.buf[4..8].copy_from_slice(&id.0.to_le_bytes());
    }

    pub fn size(&self) -> u32 {
        page_size(self.buf)
    }

    fn set_size(&mut self, size: u32) {
        self.buf[12..16].copy_from_slice(&size.to_le_bytes());
    }

    pub fn max_size(&self) -> u32 {
        u32::from_le_bytes(self.buf[16..20].try_into().unwrap())
    }

    fn set_max_size(&mut self, max_size: u32) {
        self.buf[16..20].copy_from_slice(&max_size.to_le_bytes());
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.max_size()
    }

    pub fn next_page_id(&self) -> PageId {
        PageId(i32::from_le_bytes(self.buf[20..24].try_into().unwrap()))
    }

    pub fn set_next_page_id(&mut self, id: PageId) {
        self.buf[20..24].copy_from_slice(&id.0.to_le_bytes());
    }

    fn entry_offset(&self, index: u32) -> usize {
        LEAF_HEADER + index as usize * self.entry_len()
    }

    pub fn key_at(&self, index: u32) -> &[u8] {
        let off = self.entry_offset(index);
        &self.buf[off..off + self.key_len]
    }

    pub fn value_at(&self, index: u32) -> RecordId {
        let off = self.entry_offset(index) + self.key_len;
        let page_id = PageId(i32::from_le_bytes(self.buf[off..off + 4].try_into().unwrap()));
        let slot = u32::from_le_bytes(self.buf[off + 4..off + 8].try_into().unwrap());
        RecordId::new(page_id, slot)
    }

    fn set_entry(&mut self, index: u32, key: &[u8], value: RecordId) {
        let off = self.entry_offset(index);
        self.buf[off..off + self.key_len].copy_from_slice(key);
        self.buf[off + self.key_len..off + self.key_len + 4]
            .copy_from_slice(&value.page_id.0.to_le_bytes());
        self.buf[off + self.key_len + 4..off + self.key_len + 8]
            .copy_from_slice(&value.slot.to_le_bytes());
    }

    /// Finds the first index whose key is `>= key`, using `cmp`.
    pub fn lower_bound(&self, key: &[u8], cmp: impl Fn(&[u8], &[u8]) -> std::cmp::Ordering) -> u32 {
        let mut lo = 0u32;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp(self.key_at(mid), key) == std::cmp::Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Inserts `(key, value)` keeping entries sorted by `cmp`. Caller must
    /// ensure the page isn't full.
    pub fn insert(&mut self, key: &[u8], value: RecordId, cmp: impl Fn(&[u8], &[u8]) -> std::cmp::Ordering) {
        let index = self.lower_bound(key, cmp);
        let size = self.size();
        for i in (index..size).rev() {
            let k = self.key_at(i).to_vec();
            let v = self.value_at(i);
            self.set_entry(i + 1, &k, v);
        }
        self.set_entry(index, key, value);
        self.set_size(size + 1);
    }

    pub fn remove_at(&mut self, index: u32) {
        let size = self.size();
        for i in index..size - 1 {
            let k = self.key_at(i + 1).to_vec();
            let v = self.value_at(i + 1);
            self.set_entry(i, &k, v);
        }
        self.set_size(size - 1);
    }

    pub fn all_entries(&self) -> Vec<(Vec<u8>, RecordId)> {
        (0..self.size())
            .map(|i| (self.key_at(i).to_vec(), self.value_at(i)))
            .collect()
    }

    /// Overwrites the page's entries with `entries`. Caller guarantees
    /// `entries.len()` fits within `max_size`.
    pub fn load_entries(&mut self, entries: &[(Vec<u8>, RecordId)]) {
        for (i, (key, value)) in entries.iter().enumerate() {
            self.set_entry(i as u32, key, *value);
        }
        self.set_size(entries.len() as u32);
    }

    /// Moves the upper half of entries to `dest`, used when splitting.
    pub fn move_half_to(&mut self, dest: &mut LeafPage<'_>) {
        let size = self.size();
        let split_at = size / 2;
        for i in split_at..size {
            dest.set_entry(i - split_at, self.key_at(i), self.value_at(i));
        }
        dest.set_size(size - split_at);
        self.set_size(split_at);
    }

    /// Merges all of `src`'s entries onto the end of `self`.
    pub fn absorb(&mut self, src: &LeafPage<'_>) {
        let base = self.size();
        for i in 0..src.size() {
            self.set_entry(base + i, src.key_at(i), src.value_at(i));
        }
        self.set_size(base + src.size());
        self.set_next_page_id(src.next_page_id());
    }
}

/// A B+-tree internal page: header, then `size` entries of `(key bytes,
/// child PageId)`. The key at index 0 is a placeholder (never compared
/// against); the child at index 0 leads to keys less than entry 1's key.
pub struct InternalPage<'a> {
    buf: &'a mut [u8; PAGE_SIZE],
    key_len: usize,
}

impl<'a> InternalPage<'a> {
    pub fn new(buf: &'a mut [u8; PAGE_SIZE], key_len: usize) -> Self {
        Self { buf, key_len }
    }

    pub fn init(&mut self, page_id: PageId, parent_id: PageId, max_size: u32) {
        self.set_page_id(page_id);
        self.set_parent_page_id(parent_id);
        self.buf[8] = 0;
        self.set_size(0);
        self.set_max_size(max_size);
    }

    fn entry_len(&self) -> usize {
        self.key_len + INTERNAL_ENTRY_EXTRA
    }

    pub fn page_id(&self) -> PageId {
        PageId(i32::from_le_bytes(self.buf[0..4].try_into().unwrap()))
    }

    pub fn set_page_id(&mut self, id: PageId) {
        self.buf[0..4].copy_from_slice(&id.0.to_le_bytes());
    }

    pub fn parent_page_id(&self) -> PageId {
        page_parent_id(self.buf)
    }

    pub fn set_parent_page_id(&mut self, id: PageId) {
        self.buf[4..8].copy_from_slice(&id.0.to_le_bytes());
    }

    pub fn size(&self) -> u32 {
        page_size(self.buf)
    }

    fn set_size(&mut self, size: u32) {
        self.buf[12..16].copy_from_slice(&size.to_le_bytes());
    }

    pub fn max_size(&self) -> u32 {
        u32::from_le_bytes(self.buf[16..20].try_into().unwrap())
    }

    fn set_max_size(&mut self, max_size: u32) {
        self.buf[16..20].copy_from_slice(&max_size.to_le_bytes());
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.max_size()
    }

    fn entry_offset(&self, index: u32) -> usize {
        COMMON_HEADER + index as usize * self.entry_len()
    }

    pub fn key_at(&self, index: u32) -> &[u8] {
        let off = self.entry_offset(index);
        &self.buf[off..off + self.key_len]
    }

    pub fn value_at(&self, index: u32) -> PageId {
        let off = self.entry_offset(index) + self.key_len;
        PageId(i32::from_le_bytes(self.buf[off..off + 4].try_into().unwrap()))
    }

    fn set_entry(&mut self, index: u32, key: &[u8], value: PageId) {
        let off = self.entry_offset(index);
        self.buf[off..off + self.key_len].copy_from_slice(key);
        self.buf[off + self.key_len..off + self.key_len + 4]
            .copy_from_slice(&value.0.to_le_bytes());
    }

    pub fn set_key_at(&mut self, index: u32, key: &[u8]) {
        let off = self.entry_offset(index);
        self.buf[off..off + self.key_len].copy_from_slice(key);
    }

    /// Returns the index of the child to follow for `key`: the last entry
    /// whose key is `<= key`, treating entry 0's key as `-infinity`.
    pub fn lookup(&self, key: &[u8], cmp: impl Fn(&[u8], &[u8]) -> std::cmp::Ordering) -> u32 {
        let mut lo = 1u32;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp(self.key_at(mid), key) != std::cmp::Ordering::Greater {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo - 1
    }

    pub fn value_index(&self, child: PageId) -> Option<u32> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    /// Builds the root after the very first split: child 0 holds keys
    /// less than `key`, child 1 holds the rest.
    pub fn populate_new_root(&mut self, left: PageId, key: &[u8], right: PageId) {
        self.set_entry(0, &vec![0u8; self.key_len], left);
        self.set_entry(1, key, right);
        self.set_size(2);
    }

    /// Inserts `(key, child)` right after `after`.
    pub fn insert_after(&mut self, after: PageId, key: &[u8], child: PageId) {
        let index = self.value_index(after).expect("after must be present") + 1;
        let size = self.size();
        for i in (index..size).rev() {
            let k = self.key_at(i).to_vec();
            let v = self.value_at(i);
            self.set_entry(i + 1, &k, v);
        }
        self.set_entry(index, key, child);
        self.set_size(size + 1);
    }

    pub fn remove_at(&mut self, index: u32) {
        let size = self.size();
        for i in index..size - 1 {
            let k = self.key_at(i + 1).to_vec();
            let v = self.value_at(i + 1);
            self.set_entry(i, &k, v);
        }
        self.set_size(size - 1);
    }

    pub fn all_entries(&self) -> Vec<(Vec<u8>, PageId)> {
        (0..self.size())
            .map(|i| (self.key_at(i).to_vec(), self.value_at(i)))
            .collect()
    }

    pub fn load_entries(&mut self, entries: &[(Vec<u8>, PageId)]) {
        for (i, (key, value)) in entries.iter().enumerate() {
            self.set_entry(i as u32, key, *value);
        }
        self.set_size(entries.len() as u32);
    }

    /// Moves the upper half of entries to `dest`. `dest`'s entry 0 key stays
    /// a placeholder; the caller is responsible for re-parenting the moved
    /// children and for propagating the separator key upward.
    pub fn move_half_to(&mut self, dest: &mut InternalPage<'_>) {
        let size = self.size();
        let split_at = size / 2;
        for i in split_at..size {
            dest.set_entry(i - split_at, self.key_at(i), self.value_at(i));
        }
        dest.set_size(size - split_at);
        self.set_size(split_at);
    }

    /// Merges `src` onto the end of `self`. `separator` replaces `src`'s
    /// placeholder key-0, matching the source's convention that the parent
    /// separator key becomes meaningful once absorbed into a sibling.
    pub fn absorb(&mut self, src: &InternalPage<'_>, separator: &[u8]) {
        let base = self.size();
        self.set_entry(base, separator, src.value_at(0));
        for i in 1..src.size() {
            self.set_entry(base + i, src.key_at(i), src.value_at(i));
        }
        self.set_size(base + src.size());
    }

    pub fn children(&self) -> impl Iterator<Item = PageId> + '_ {
        (0..self.size()).map(|i| self.value_at(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp_i32(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
        i32::from_le_bytes(a.try_into().unwrap()).cmp(&i32::from_le_bytes(b.try_into().unwrap()))
    }

    fn key(v: i32) -> Vec<u8> {
        v.to_le_bytes().to_vec()
    }

    #[test]
    fn leaf_insert_keeps_sorted_order() {
        let mut buf = Box::new([0u8; PAGE_SIZE]);
        let mut leaf = LeafPage::new(&mut buf, 4);
        leaf.init(PageId(0), PageId::INVALID, 10);

        leaf.insert(&key(5), RecordId::new(PageId(0), 0), cmp_i32);
        leaf.insert(&key(1), RecordId::new(PageId(0), 1), cmp_i32);
        leaf.insert(&key(3), RecordId::new(PageId(0), 2), cmp_i32);

        assert_eq!(leaf.key_at(0), key(1).as_slice());
        assert_eq!(leaf.key_at(1), key(3).as_slice());
        assert_eq!(leaf.key_at(2), key(5).as_slice());
    }

    #[test]
    fn leaf_split_distributes_entries() {
        let mut buf_a = Box::new([0u8; PAGE_SIZE]);
        let mut leaf_a = LeafPage::new(&mut buf_a, 4);
        leaf_a.init(PageId(0), PageId::INVALID, 10);
        for i in 0..6 {
            leaf_a.insert(&key(i), RecordId::new(PageId(0), i as u32), cmp_i32);
        }

        let mut buf_b = Box::new([0u8; PAGE_SIZE]);
        let mut leaf_b = LeafPage::new(&mut buf_b, 4);
        leaf_b.init(PageId(1), PageId::INVALID, 10);

        leaf_a.move_half_to(&mut leaf_b);
        assert_eq!(leaf_a.size(), 3);
        assert_eq!(leaf_b.size(), 3);
        assert_eq!(leaf_b.key_at(0), key(3).as_slice());
    }

    #[test]
    fn internal_lookup_finds_child_index() {
        let mut buf = Box::new([0u8; PAGE_SIZE]);
        let mut internal = InternalPage::new(&mut buf, 4);
        internal.init(PageId(0), PageId::INVALID, 10);
        internal.populate_new_root(PageId(1), &key(10), PageId(2));
        internal.insert_after(PageId(2), &key(20), PageId(3));

        assert_eq!(internal.lookup(&key(5), cmp_i32), 0);
        assert_eq!(internal.lookup(&key(15), cmp_i32), 1);
        assert_eq!(internal.lookup(&key(25), cmp_i32), 2);
    }
}
