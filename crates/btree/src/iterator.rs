use crate::key::KeySchema;
use crate::node::LeafPage;
use buffer::SharedBufferPool;
use common::{DbResult, PageId, RecordId};
use types::Value;

/// Forward cursor over a range of leaf entries, following `next_page_id`
/// links once a leaf is exhausted. Mirrors the source's iterator: it pins
/// the current leaf for as long as it's positioned there and releases it
/// before moving to the next one.
pub struct IndexIterator<'a> {
    pool: &'a SharedBufferPool,
    key_schema: &'a KeySchema,
    page_id: PageId,
    index: u32,
}

impl<'a> IndexIterator<'a> {
    pub(crate) fn new(pool: &'a SharedBufferPool, key_schema: &'a KeySchema, page_id: PageId, index: u32) -> Self {
        Self {
            pool,
            key_schema,
            page_id,
            index,
        }
    }

    fn step(&mut self) -> DbResult<Option<(Vec<Value>, RecordId)>> {
        if !self.page_id.is_valid() {
            return Ok(None);
        }

        let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
        let frame = guard.fetch_page(self.page_id)?;
        let buf = guard.page_data_mut(frame);
        let leaf = LeafPage::new(buf, self.key_schema.byte_len());

        if self.index >= leaf.size() {
            let next = leaf.next_page_id();
            guard.unpin_page(self.page_id, false)?;
            drop(guard);
            self.page_id = next;
            self.index = 0;
            return self.step();
        }

        let key = self.key_schema.decode(leaf.key_at(self.index))?;
        let rid = leaf.value_at(self.index);
        guard.unpin_page(self.page_id, false)?;

        self.index += 1;
        Ok(Some((key, rid)))
    }
}

impl<'a> Iterator for IndexIterator<'a> {
    type Item = DbResult<(Vec<Value>, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step().transpose()
    }
}
