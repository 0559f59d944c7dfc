use crate::table_heap::SharedBufferPool;
use common::{DbResult, PageId, RecordId, Row};
use storage::record::Schema;
use storage::table_page::TablePage;

/// Forward cursor over a table heap's live (non-tombstoned) tuples, walking
/// the page chain and each page's slot directory in order.
pub struct TableIterator<'a> {
    pool: &'a SharedBufferPool,
    schema: &'a Schema,
    page_id: PageId,
    slot: u32,
}

impl<'a> TableIterator<'a> {
    pub(crate) fn new(pool: &'a SharedBufferPool, schema: &'a Schema, first_page_id: PageId) -> Self {
        Self {
            pool,
            schema,
            page_id: first_page_id,
            slot: 0,
        }
    }

    fn advance_to_next_live_tuple(&mut self) -> DbResult<Option<(RecordId, Row)>> {
        loop {
            if !self.page_id.is_valid() {
                return Ok(None);
            }

            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            let frame = guard.fetch_page(self.page_id)?;
            let buf = guard.page_data_mut(frame);
            let page = TablePage::new(buf);

            if self.slot >= page.tuple_count() {
                let next = page.next_page_id();
                guard.unpin_page(self.page_id, false)?;
                drop(guard);
                self.page_id = next;
                self.slot = 0;
                continue;
            }

            let bytes = page.get_tuple(self.slot);
            let rid = RecordId::new(self.page_id, self.slot);
            guard.unpin_page(self.page_id, false)?;
            drop(guard);
            self.slot += 1;

            if let Some(bytes) = bytes {
                let row = storage::record::row::decode(&bytes, self.schema)?;
                return Ok(Some((rid, row)));
            }
        }
    }
}

impl<'a> Iterator for TableIterator<'a> {
    type Item = DbResult<(RecordId, Row)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance_to_next_live_tuple().transpose()
    }
}

#[cfg(test)]
mod tests {
    use crate::pool::BufferPoolManager;
    use crate::table_heap::{SharedBufferPool, TableHeap};
    use std::sync::{Arc, Mutex};
    use storage::record::{Column, Schema};
    use storage::DiskManager;
    use types::{SqlType, Value};

    fn schema() -> Schema {
        Schema::new(vec![Column::new("id", SqlType::Int32, 0).not_null()])
    }

    fn heap() -> (tempfile::TempDir, TableHeap) {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("db.dat")).unwrap());
        let pool: SharedBufferPool = Arc::new(Mutex::new(BufferPoolManager::new(16, disk)));
        (dir, TableHeap::create(pool, schema()).unwrap())
    }

    #[test]
    fn iterates_in_insertion_order() {
        let (_dir, heap) = heap();
        for i in 0..5 {
            heap.insert_tuple(&common::Row::new(vec![Some(Value::Int32(i))]))
                .unwrap();
        }

        let values: Vec<i32> = heap
            .iter()
            .map(|r| match r.unwrap().1.fields[0].clone().unwrap() {
                Value::Int32(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn skips_deleted_tuples() {
        let (_dir, heap) = heap();
        let rid0 = heap
            .insert_tuple(&common::Row::new(vec![Some(Value::Int32(0))]))
            .unwrap();
        heap.insert_tuple(&common::Row::new(vec![Some(Value::Int32(1))]))
            .unwrap();
        heap.mark_delete(rid0).unwrap();

        let values: Vec<i32> = heap
            .iter()
            .map(|r| match r.unwrap().1.fields[0].clone().unwrap() {
                Value::Int32(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, vec![1]);
    }
}
