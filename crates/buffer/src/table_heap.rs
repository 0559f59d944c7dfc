use crate::pool::BufferPoolManager;
use crate::table_iterator::TableIterator;
use common::{DbError, DbResult, PageId, RecordId, Row};
use std::sync::{Arc, Mutex};
use storage::record::Schema;
use storage::table_page::TablePage;

/// Shared handle to the pool backing one open database: every table heap,
/// B+-tree, and the catalog itself fetch pages through the same pool, which
/// serializes access behind one coarse lock.
pub type SharedBufferPool = Arc<Mutex<BufferPoolManager>>;

/// Heap-organized table storage: an append-mostly linked list of slotted
/// pages. Tuples are identified by the `RecordId` they were inserted at,
/// which stays valid (though possibly tombstoned) for the tuple's lifetime.
pub struct TableHeap {
    pool: SharedBufferPool,
    schema: Schema,
    first_page_id: PageId,
}

impl TableHeap {
    /// Allocates the heap's first page and returns a new, empty heap.
    #[tracing::instrument(skip(pool, schema))]
    pub fn create(pool: SharedBufferPool, schema: Schema) -> DbResult<Self> {
        let (first_page_id, frame) = {
            let mut guard = pool.lock().expect("buffer pool mutex poisoned");
            guard.new_page()?
        };
        {
            let mut guard = pool.lock().expect("buffer pool mutex poisoned");
            let buf = guard.page_data_mut(frame);
            TablePage::new(buf).init(first_page_id, PageId::INVALID);
            guard.unpin_page(first_page_id, true)?;
        }
        Ok(Self {
            pool,
            schema,
            first_page_id,
        })
    }

    /// Reopens a heap whose first page id is already known, from the
    /// catalog's stored metadata.
    pub fn open(pool: SharedBufferPool, schema: Schema, first_page_id: PageId) -> Self {
        Self {
            pool,
            schema,
            first_page_id,
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[tracing::instrument(skip(self, row))]
    pub fn insert_tuple(&self, row: &Row) -> DbResult<RecordId> {
        let data = storage::record::row::encode(row, &self.schema)?;

        let mut page_id = self.first_page_id;
        loop {
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            let frame = guard.fetch_page(page_id)?;
            let buf = guard.page_data_mut(frame);
            let mut page = TablePage::new(buf);

            if let Some(slot) = page.insert_tuple(&data) {
                guard.unpin_page(page_id, true)?;
                return Ok(RecordId::new(page_id, slot));
            }

            let next = page.next_page_id();
            if next.is_valid() {
                guard.unpin_page(page_id, false)?;
                page_id = next;
                continue;
            }

            guard.unpin_page(page_id, false)?;
            drop(guard);
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            let (new_page_id, new_frame) = guard.new_page()?;
            {
                let buf = guard.page_data_mut(new_frame);
                TablePage::new(buf).init(new_page_id, page_id);
            }

            let frame = guard.fetch_page(page_id)?;
            let buf = guard.page_data_mut(frame);
            TablePage::new(buf).set_next_page_id(new_page_id);
            guard.unpin_page(page_id, true)?;
            guard.unpin_page(new_page_id, true)?;

            tracing::debug!(?new_page_id, "extended table heap with a new page");
            page_id = new_page_id;
        }
    }

    pub fn get_tuple(&self, rid: RecordId) -> DbResult<Row> {
        let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
        let frame = guard.fetch_page(rid.page_id)?;
        let buf = guard.page_data_mut(frame);
        let page = TablePage::new(buf);
        let bytes = page.get_tuple(rid.slot);
        guard.unpin_page(rid.page_id, false)?;

        let bytes = bytes.ok_or_else(|| {
            DbError::Failed(format!("tuple {rid:?} does not exist or was deleted"))
        })?;
        storage::record::row::decode(&bytes, &self.schema)
    }

    pub fn mark_delete(&self, rid: RecordId) -> DbResult<()> {
        let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
        let frame = guard.fetch_page(rid.page_id)?;
        let buf = guard.page_data_mut(frame);
        let mut page = TablePage::new(buf);
        page.mark_delete(rid.slot)?;
        guard.unpin_page(rid.page_id, true)
    }

    /// Updates the tuple at `rid`, rewriting it in place when the new
    /// encoding still fits the existing slot. Otherwise marks the old slot
    /// deleted and inserts the row fresh, possibly onto a different page, and
    /// returns its new `RecordId`. Callers must update any index entries that
    /// referenced the old `RecordId` when the returned id differs from `rid`.
    #[tracing::instrument(skip(self, row))]
    pub fn update_tuple(&self, rid: RecordId, row: &Row) -> DbResult<RecordId> {
        let data = storage::record::row::encode(row, &self.schema)?;
        let updated_in_place = {
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            let frame = guard.fetch_page(rid.page_id)?;
            let buf = guard.page_data_mut(frame);
            let mut page = TablePage::new(buf);
            let updated = page.update_tuple(rid.slot, &data)?;
            guard.unpin_page(rid.page_id, updated)?;
            updated
        };
        if updated_in_place {
            return Ok(rid);
        }

        tracing::debug!(?rid, "update no longer fits in place, marking deleted and reinserting");
        self.mark_delete(rid)?;
        self.insert_tuple(row)
    }

    /// Walks the heap's page chain, deallocating each page. Called when a
    /// table is dropped from the catalog.
    #[tracing::instrument(skip(self))]
    pub fn delete_table(&self) -> DbResult<()> {
        let mut page_id = self.first_page_id;
        while page_id.is_valid() {
            let next = {
                let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
                let frame = guard.fetch_page(page_id)?;
                let buf = guard.page_data_mut(frame);
                let next = TablePage::new(buf).next_page_id();
                guard.unpin_page(page_id, false)?;
                next
            };
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            guard.delete_page(page_id)?;
            page_id = next;
        }
        Ok(())
    }

    pub fn iter(&self) -> TableIterator<'_> {
        TableIterator::new(&self.pool, &self.schema, self.first_page_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::record::Column;
    use storage::DiskManager;
    use types::{SqlType, Value};

    fn schema() -> Schema {
        Schema::new(vec![Column::new("id", SqlType::Int32, 0).not_null()])
    }

    fn heap() -> (tempfile::TempDir, TableHeap) {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("db.dat")).unwrap());
        let pool: SharedBufferPool = Arc::new(Mutex::new(BufferPoolManager::new(16, disk)));
        let heap = TableHeap::create(pool, schema()).unwrap();
        (dir, heap)
    }

    #[test]
    fn insert_then_get_round_trips() {
        let (_dir, heap) = heap();
        let row = Row::new(vec![Some(Value::Int32(42))]);
        let rid = heap.insert_tuple(&row).unwrap();
        assert_eq!(heap.get_tuple(rid).unwrap(), row);
    }

    #[test]
    fn mark_delete_then_get_fails() {
        let (_dir, heap) = heap();
        let row = Row::new(vec![Some(Value::Int32(1))]);
        let rid = heap.insert_tuple(&row).unwrap();
        heap.mark_delete(rid).unwrap();
        assert!(heap.get_tuple(rid).is_err());
    }

    #[test]
    fn update_in_place_preserves_rid() {
        let (_dir, heap) = heap();
        let row = Row::new(vec![Some(Value::Int32(1))]);
        let rid = heap.insert_tuple(&row).unwrap();

        let updated = Row::new(vec![Some(Value::Int32(2))]);
        let new_rid = heap.update_tuple(rid, &updated).unwrap();
        assert_eq!(new_rid, rid);
        assert_eq!(heap.get_tuple(rid).unwrap(), updated);
    }

    #[test]
    fn update_falls_back_to_reinsert_when_it_no_longer_fits() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("db.dat")).unwrap());
        let pool: SharedBufferPool = Arc::new(Mutex::new(BufferPoolManager::new(16, disk)));
        let schema = Schema::new(vec![
            Column::new("id", SqlType::Int32, 0).not_null(),
            Column::new("note", SqlType::FixedChar(64), 1),
        ]);
        let heap = TableHeap::create(pool, schema).unwrap();

        let rid = heap
            .insert_tuple(&Row::new(vec![Some(Value::Int32(0)), None]))
            .unwrap();
        let first_page = rid.page_id;

        // Fill the rest of the first page so the row has no room to grow in place.
        loop {
            let filler = heap
                .insert_tuple(&Row::new(vec![Some(Value::Int32(1)), None]))
                .unwrap();
            if filler.page_id != first_page {
                break;
            }
        }

        let grown = Row::new(vec![
            Some(Value::Int32(0)),
            Some(Value::Char("now much longer than nothing".into())),
        ]);
        let new_rid = heap.update_tuple(rid, &grown).unwrap();

        assert_ne!(new_rid, rid);
        assert!(heap.get_tuple(rid).is_err(), "old slot must be tombstoned");
        assert_eq!(heap.get_tuple(new_rid).unwrap(), grown);
    }

    #[test]
    fn spills_onto_additional_pages() {
        let (_dir, heap) = heap();
        let mut rids = Vec::new();
        for i in 0..2000 {
            let row = Row::new(vec![Some(Value::Int32(i))]);
            rids.push(heap.insert_tuple(&row).unwrap());
        }
        assert!(rids.iter().any(|r| r.page_id != heap.first_page_id()));
        for (i, rid) in rids.iter().enumerate() {
            assert_eq!(
                heap.get_tuple(*rid).unwrap(),
                Row::new(vec![Some(Value::Int32(i as i32))])
            );
        }
    }
}
