//! Persistent catalog: owns the database's set of tables and indexes,
//! rebuilding in-memory handles for both from their meta pages whenever the
//! engine reopens a database file.
//!
//! Every table and index meta page, plus the catalog's own root page
//! (logical page 0), is read and written through the shared buffer pool, the
//! same as any heap or B+-tree page.

pub mod meta;

use ahash::RandomState;
use btree::{BPlusTree, KeySchema};
use buffer::{SharedBufferPool, TableHeap};
use common::{ColumnId, DbError, DbResult, IndexId, PageId, TableId};
use hashbrown::HashMap;
use meta::{CatalogMeta, IndexMeta, TableMeta};
use std::sync::Arc;
use storage::record::{row, Schema};

type Map<K, V> = HashMap<K, V, RandomState>;

/// The catalog's own root page. Always the first page ever allocated in a
/// fresh database file.
pub const CATALOG_META_PAGE_ID: PageId = PageId(0);

/// An open table: its schema and the heap backing it.
pub struct TableInfo {
    pub table_id: TableId,
    pub name: String,
    pub schema: Arc<Schema>,
    pub heap: TableHeap,
    meta_page_id: PageId,
}

/// An open index: the columns it covers and the tree backing it.
pub struct IndexInfo {
    pub index_id: IndexId,
    pub name: String,
    pub table_id: TableId,
    pub key_columns: Vec<ColumnId>,
    pub tree: BPlusTree,
    meta_page_id: PageId,
}

pub struct Catalog {
    pool: SharedBufferPool,
    next_table_id: u32,
    next_index_id: u32,
    tables: Map<TableId, TableInfo>,
    table_name_index: Map<String, TableId>,
    indexes: Map<IndexId, IndexInfo>,
    table_indexes: Map<TableId, Vec<IndexId>>,
}

impl Catalog {
    /// Bootstraps a fresh catalog (`is_new = true`, allocating the meta
    /// page) or reconstructs one from an existing database file.
    #[tracing::instrument(skip(pool))]
    pub fn init(pool: SharedBufferPool, is_new: bool) -> DbResult<Self> {
        if is_new {
            let meta = CatalogMeta::new();
            let page_id = {
                let mut guard = pool.lock().expect("buffer pool mutex poisoned");
                let (page_id, frame) = guard.new_page()?;
                meta.write_into(guard.page_data_mut(frame))?;
                guard.unpin_page(page_id, true)?;
                page_id
            };
            if page_id != CATALOG_META_PAGE_ID {
                return Err(DbError::Failed(format!(
                    "catalog meta page must be the first page allocated, got {page_id:?}"
                )));
            }
            tracing::info!("initialized new catalog");
            return Ok(Self {
                pool,
                next_table_id: 0,
                next_index_id: 0,
                tables: Map::default(),
                table_name_index: Map::default(),
                indexes: Map::default(),
                table_indexes: Map::default(),
            });
        }

        let meta = {
            let mut guard = pool.lock().expect("buffer pool mutex poisoned");
            let frame = guard.fetch_page(CATALOG_META_PAGE_ID)?;
            let meta = CatalogMeta::from_page_bytes(guard.page_data_mut(frame))?;
            guard.unpin_page(CATALOG_META_PAGE_ID, false)?;
            meta
        };

        let mut catalog = Self {
            pool,
            next_table_id: meta.next_table_id,
            next_index_id: meta.next_index_id,
            tables: Map::default(),
            table_name_index: Map::default(),
            indexes: Map::default(),
            table_indexes: Map::default(),
        };

        for (table_id, meta_page_id) in &meta.tables {
            catalog.load_table(*table_id, *meta_page_id)?;
        }
        for (index_id, meta_page_id) in &meta.indexes {
            catalog.load_index(*index_id, *meta_page_id)?;
        }

        tracing::info!(
            tables = catalog.tables.len(),
            indexes = catalog.indexes.len(),
            "reopened catalog"
        );
        Ok(catalog)
    }

    fn load_table(&mut self, table_id: TableId, meta_page_id: PageId) -> DbResult<()> {
        let table_meta = {
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            let frame = guard.fetch_page(meta_page_id)?;
            let table_meta = TableMeta::from_page_bytes(guard.page_data_mut(frame))?;
            guard.unpin_page(meta_page_id, false)?;
            table_meta
        };

        let heap = TableHeap::open(
            self.pool.clone(),
            table_meta.schema.clone(),
            table_meta.first_page_id,
        );
        self.table_name_index
            .insert(table_meta.name.clone(), table_id);
        self.tables.insert(
            table_id,
            TableInfo {
                table_id,
                name: table_meta.name,
                schema: Arc::new(table_meta.schema),
                heap,
                meta_page_id,
            },
        );
        Ok(())
    }

    fn load_index(&mut self, index_id: IndexId, meta_page_id: PageId) -> DbResult<()> {
        let index_meta = {
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            let frame = guard.fetch_page(meta_page_id)?;
            let index_meta = IndexMeta::from_page_bytes(guard.page_data_mut(frame))?;
            guard.unpin_page(meta_page_id, false)?;
            index_meta
        };

        let table = self.tables.get(&index_meta.table_id).ok_or_else(|| {
            DbError::Failed(format!(
                "index {index_id:?} references missing table {:?}",
                index_meta.table_id
            ))
        })?;
        let key_types = index_meta
            .key_columns
            .iter()
            .map(|&ord| {
                table
                    .schema
                    .column(ord as usize)
                    .map(|c| c.sql_type)
                    .ok_or_else(|| DbError::ColumnNotFound(format!("ordinal {ord}")))
            })
            .collect::<DbResult<Vec<_>>>()?;

        let key_schema = KeySchema::new(key_types);
        let tree = BPlusTree::new(index_id.0, self.pool.clone(), key_schema)?;

        self.table_indexes
            .entry(index_meta.table_id)
            .or_default()
            .push(index_id);
        self.indexes.insert(
            index_id,
            IndexInfo {
                index_id,
                name: index_meta.name,
                table_id: index_meta.table_id,
                key_columns: index_meta.key_columns,
                tree,
                meta_page_id,
            },
        );
        Ok(())
    }

    /// Re-serializes the catalog's root page. Called after every structural
    /// change (create/drop of a table or index).
    pub fn flush_catalog_meta_page(&self) -> DbResult<()> {
        let meta = CatalogMeta {
            next_table_id: self.next_table_id,
            next_index_id: self.next_index_id,
            tables: self
                .tables
                .values()
                .map(|t| (t.table_id, t.meta_page_id))
                .collect(),
            indexes: self
                .indexes
                .values()
                .map(|i| (i.index_id, i.meta_page_id))
                .collect(),
        };
        let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
        let frame = guard.fetch_page(CATALOG_META_PAGE_ID)?;
        meta.write_into(guard.page_data_mut(frame))?;
        guard.unpin_page(CATALOG_META_PAGE_ID, true)
    }

    #[tracing::instrument(skip(self, schema))]
    pub fn create_table(&mut self, name: &str, schema: Schema) -> DbResult<TableId> {
        if self.table_name_index.contains_key(name) {
            return Err(DbError::TableAlreadyExist(name.to_string()));
        }

        let table_id = TableId(self.next_table_id);
        self.next_table_id += 1;

        let heap = TableHeap::create(self.pool.clone(), schema.clone())?;
        let first_page_id = heap.first_page_id();

        let table_meta = TableMeta {
            table_id,
            name: name.to_string(),
            first_page_id,
            schema: schema.clone(),
        };
        let meta_page_id = {
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            let (page_id, frame) = guard.new_page()?;
            table_meta.write_into(guard.page_data_mut(frame))?;
            guard.unpin_page(page_id, true)?;
            page_id
        };

        self.table_name_index.insert(name.to_string(), table_id);
        self.tables.insert(
            table_id,
            TableInfo {
                table_id,
                name: name.to_string(),
                schema: Arc::new(schema),
                heap,
                meta_page_id,
            },
        );

        self.flush_catalog_meta_page()?;
        tracing::info!(%name, ?table_id, "created table");
        Ok(table_id)
    }

    #[tracing::instrument(skip(self, column_names))]
    pub fn create_index(
        &mut self,
        table_name: &str,
        index_name: &str,
        column_names: &[String],
    ) -> DbResult<IndexId> {
        let table_id = *self
            .table_name_index
            .get(table_name)
            .ok_or_else(|| DbError::TableNotExist(table_name.to_string()))?;

        let already_exists = self
            .table_indexes
            .get(&table_id)
            .map(|ids| ids.iter().any(|id| self.indexes[id].name == index_name))
            .unwrap_or(false);
        if already_exists {
            return Err(DbError::IndexAlreadyExist(index_name.to_string()));
        }

        let (key_columns, key_types) = {
            let table = &self.tables[&table_id];
            let mut key_columns = Vec::with_capacity(column_names.len());
            let mut key_types = Vec::with_capacity(column_names.len());
            for name in column_names {
                let ord = table
                    .schema
                    .index_of(name)
                    .ok_or_else(|| DbError::ColumnNameNotExist(name.clone()))?;
                key_columns.push(ord as u32);
                key_types.push(table.schema.column(ord).unwrap().sql_type);
            }
            (key_columns, key_types)
        };

        let index_id = IndexId(self.next_index_id);
        self.next_index_id += 1;

        let key_schema = KeySchema::new(key_types);
        let tree = BPlusTree::new(index_id.0, self.pool.clone(), key_schema)?;

        let key_indices: Vec<usize> = key_columns.iter().map(|&c| c as usize).collect();
        {
            let table = &self.tables[&table_id];
            for item in table.heap.iter() {
                let (rid, tuple) = item?;
                let key = row::key_fields(&tuple, &key_indices)?;
                tree.insert(&key, rid)?;
            }
        }

        let index_meta = IndexMeta {
            index_id,
            name: index_name.to_string(),
            table_id,
            key_columns: key_columns.clone(),
        };
        let meta_page_id = {
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            let (page_id, frame) = guard.new_page()?;
            index_meta.write_into(guard.page_data_mut(frame))?;
            guard.unpin_page(page_id, true)?;
            page_id
        };

        self.table_indexes.entry(table_id).or_default().push(index_id);
        self.indexes.insert(
            index_id,
            IndexInfo {
                index_id,
                name: index_name.to_string(),
                table_id,
                key_columns,
                tree,
                meta_page_id,
            },
        );

        self.flush_catalog_meta_page()?;
        tracing::info!(%index_name, ?table_id, "created index");
        Ok(index_id)
    }

    /// Drops `name` and every index built on it, reclaiming all of their
    /// pages.
    #[tracing::instrument(skip(self))]
    pub fn drop_table(&mut self, name: &str) -> DbResult<()> {
        let table_id = self
            .table_name_index
            .remove(name)
            .ok_or_else(|| DbError::TableNotExist(name.to_string()))?;

        if let Some(index_ids) = self.table_indexes.remove(&table_id) {
            for index_id in index_ids {
                self.drop_index_by_id(index_id)?;
            }
        }

        let table = self
            .tables
            .remove(&table_id)
            .expect("table_name_index and tables must agree");
        table.heap.delete_table()?;

        {
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            guard.delete_page(table.meta_page_id)?;
        }

        self.flush_catalog_meta_page()?;
        tracing::info!(%name, ?table_id, "dropped table");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn drop_index(&mut self, table_name: &str, index_name: &str) -> DbResult<()> {
        let table_id = *self
            .table_name_index
            .get(table_name)
            .ok_or_else(|| DbError::TableNotExist(table_name.to_string()))?;
        let index_id = self
            .table_indexes
            .get(&table_id)
            .and_then(|ids| {
                ids.iter()
                    .copied()
                    .find(|id| self.indexes[id].name == index_name)
            })
            .ok_or_else(|| DbError::IndexNotFound(index_name.to_string()))?;

        self.drop_index_by_id(index_id)?;
        if let Some(ids) = self.table_indexes.get_mut(&table_id) {
            ids.retain(|&id| id != index_id);
        }

        self.flush_catalog_meta_page()?;
        tracing::info!(%table_name, %index_name, "dropped index");
        Ok(())
    }

    fn drop_index_by_id(&mut self, index_id: IndexId) -> DbResult<()> {
        let index = self
            .indexes
            .remove(&index_id)
            .ok_or_else(|| DbError::IndexNotFound(format!("{index_id:?}")))?;
        index.tree.destroy()?;
        let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
        guard.delete_page(index.meta_page_id)
    }

    pub fn get_table(&self, name: &str) -> DbResult<&TableInfo> {
        let id = self
            .table_name_index
            .get(name)
            .ok_or_else(|| DbError::TableNotExist(name.to_string()))?;
        Ok(&self.tables[id])
    }

    pub fn get_tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values()
    }

    pub fn get_table_indexes(&self, table_name: &str) -> DbResult<Vec<&IndexInfo>> {
        let table_id = *self
            .table_name_index
            .get(table_name)
            .ok_or_else(|| DbError::TableNotExist(table_name.to_string()))?;
        Ok(self
            .table_indexes
            .get(&table_id)
            .map(|ids| ids.iter().map(|id| &self.indexes[id]).collect())
            .unwrap_or_default())
    }

    pub fn get_index(&self, index_id: IndexId) -> Option<&IndexInfo> {
        self.indexes.get(&index_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buffer::BufferPoolManager;
    use common::Row;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use storage::record::Column;
    use storage::DiskManager;
    use types::{SqlType, Value};

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", SqlType::Int32, 0).not_null().unique(),
            Column::new("name", SqlType::FixedChar(16), 1),
        ])
    }

    fn open_pool(path: &std::path::Path) -> SharedBufferPool {
        let disk = Arc::new(DiskManager::open(path).unwrap());
        Arc::new(Mutex::new(BufferPoolManager::new(32, disk)))
    }

    #[test]
    fn create_table_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("db.dat"));
        let mut catalog = Catalog::init(pool, true).unwrap();

        let table_id = catalog.create_table("widgets", schema()).unwrap();
        let info = catalog.get_table("widgets").unwrap();
        assert_eq!(info.table_id, table_id);
        assert_eq!(info.schema.column_count(), 2);
    }

    #[test]
    fn duplicate_table_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("db.dat"));
        let mut catalog = Catalog::init(pool, true).unwrap();
        catalog.create_table("widgets", schema()).unwrap();
        assert!(catalog.create_table("widgets", schema()).is_err());
    }

    #[test]
    fn create_index_backfills_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("db.dat"));
        let mut catalog = Catalog::init(pool, true).unwrap();
        catalog.create_table("widgets", schema()).unwrap();

        {
            let table = catalog.get_table("widgets").unwrap();
            for i in 0..50 {
                table
                    .heap
                    .insert_tuple(&Row::new(vec![
                        Some(Value::Int32(i)),
                        Some(Value::Char("x".into())),
                    ]))
                    .unwrap();
            }
        }

        catalog
            .create_index("widgets", "widgets_by_id", &["id".to_string()])
            .unwrap();
        let indexes = catalog.get_table_indexes("widgets").unwrap();
        assert_eq!(indexes.len(), 1);
        assert!(indexes[0]
            .tree
            .get_value(&[Value::Int32(10)])
            .unwrap()
            .is_some());
        assert!(indexes[0]
            .tree
            .get_value(&[Value::Int32(999)])
            .unwrap()
            .is_none());
    }

    #[test]
    fn drop_table_cascades_its_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("db.dat"));
        let mut catalog = Catalog::init(pool, true).unwrap();
        catalog.create_table("widgets", schema()).unwrap();
        catalog
            .create_index("widgets", "widgets_by_id", &["id".to_string()])
            .unwrap();

        catalog.drop_table("widgets").unwrap();
        assert!(catalog.get_table("widgets").is_err());
        assert!(catalog.get_table_indexes("widgets").is_err());
    }

    #[test]
    fn reopen_restores_tables_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.dat");
        {
            let pool = open_pool(&path);
            let mut catalog = Catalog::init(pool, true).unwrap();
            catalog.create_table("widgets", schema()).unwrap();
            let table = catalog.get_table("widgets").unwrap();
            for i in 0..20 {
                table
                    .heap
                    .insert_tuple(&Row::new(vec![
                        Some(Value::Int32(i)),
                        Some(Value::Char("y".into())),
                    ]))
                    .unwrap();
            }
            catalog
                .create_index("widgets", "widgets_by_id", &["id".to_string()])
                .unwrap();
        }

        let pool = open_pool(&path);
        let catalog = Catalog::init(pool, false).unwrap();
        let info = catalog.get_table("widgets").unwrap();
        assert_eq!(info.schema.column_count(), 2);

        let mut seen = 0;
        for item in info.heap.iter() {
            item.unwrap();
            seen += 1;
        }
        assert_eq!(seen, 20);

        let indexes = catalog.get_table_indexes("widgets").unwrap();
        assert_eq!(indexes.len(), 1);
        assert!(indexes[0]
            .tree
            .get_value(&[Value::Int32(5)])
            .unwrap()
            .is_some());
    }
}
