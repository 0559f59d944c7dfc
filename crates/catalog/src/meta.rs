//! On-disk layouts for the catalog's own bookkeeping pages: the single
//! catalog meta page (logical page 0) and the per-table/per-index meta
//! pages it points at.

use common::{DbError, DbResult, IndexId, PageId, TableId};
use storage::record::Schema;
use storage::PAGE_SIZE;

const CATALOG_META_MAGIC: u32 = 0x2021_0901;
const TABLE_META_MAGIC: u32 = 0x2021_0902;
const INDEX_META_MAGIC: u32 = 0x2021_0903;

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn read_u32(buf: &[u8], pos: &mut usize) -> DbResult<u32> {
    let bytes = buf
        .get(*pos..*pos + 4)
        .ok_or_else(|| DbError::Failed("catalog page truncated".into()))?;
    *pos += 4;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_string(buf: &[u8], pos: &mut usize) -> DbResult<String> {
    let len = read_u32(buf, pos)? as usize;
    let bytes = buf
        .get(*pos..*pos + len)
        .ok_or_else(|| DbError::Failed("catalog page truncated".into()))?;
    *pos += len;
    String::from_utf8(bytes.to_vec()).map_err(|e| DbError::Failed(format!("name not utf8: {e}")))
}

fn check_magic(got: u32, want: u32, what: &str) -> DbResult<()> {
    if got != want {
        return Err(DbError::Failed(format!("{what} has bad magic")));
    }
    Ok(())
}

fn check_page_fit(buf: &[u8], what: &str) -> DbResult<()> {
    if buf.len() > PAGE_SIZE {
        return Err(DbError::Failed(format!(
            "{what} of {} bytes does not fit in one page",
            buf.len()
        )));
    }
    Ok(())
}

/// Logical page 0: the root the catalog rediscovers on reopen. Tracks every
/// live table and index as `(id, meta_page_id)` pairs plus the id counters.
pub struct CatalogMeta {
    pub next_table_id: u32,
    pub next_index_id: u32,
    pub tables: Vec<(TableId, PageId)>,
    pub indexes: Vec<(IndexId, PageId)>,
}

impl CatalogMeta {
    pub fn new() -> Self {
        Self {
            next_table_id: 0,
            next_index_id: 0,
            tables: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn from_page_bytes(buf: &[u8; PAGE_SIZE]) -> DbResult<Self> {
        let mut pos = 0usize;
        check_magic(read_u32(buf, &mut pos)?, CATALOG_META_MAGIC, "catalog meta")?;
        let next_table_id = read_u32(buf, &mut pos)?;
        let next_index_id = read_u32(buf, &mut pos)?;

        let table_count = read_u32(buf, &mut pos)?;
        let mut tables = Vec::with_capacity(table_count as usize);
        for _ in 0..table_count {
            let id = TableId(read_u32(buf, &mut pos)?);
            let page = PageId(read_u32(buf, &mut pos)? as i32);
            tables.push((id, page));
        }

        let index_count = read_u32(buf, &mut pos)?;
        let mut indexes = Vec::with_capacity(index_count as usize);
        for _ in 0..index_count {
            let id = IndexId(read_u32(buf, &mut pos)?);
            let page = PageId(read_u32(buf, &mut pos)? as i32);
            indexes.push((id, page));
        }

        Ok(Self {
            next_table_id,
            next_index_id,
            tables,
            indexes,
        })
    }

    pub fn write_into(&self, buf: &mut [u8; PAGE_SIZE]) -> DbResult<()> {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, CATALOG_META_MAGIC);
        write_u32(&mut bytes, self.next_table_id);
        write_u32(&mut bytes, self.next_index_id);

        write_u32(&mut bytes, self.tables.len() as u32);
        for (id, page) in &self.tables {
            write_u32(&mut bytes, id.0);
            write_u32(&mut bytes, page.0 as u32);
        }

        write_u32(&mut bytes, self.indexes.len() as u32);
        for (id, page) in &self.indexes {
            write_u32(&mut bytes, id.0);
            write_u32(&mut bytes, page.0 as u32);
        }

        check_page_fit(&bytes, "catalog meta")?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        buf[bytes.len()..].fill(0);
        Ok(())
    }
}

impl Default for CatalogMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-table meta page: enough to reconstruct a `TableHeap` without
/// rescanning anything.
pub struct TableMeta {
    pub table_id: TableId,
    pub name: String,
    pub first_page_id: PageId,
    pub schema: Schema,
}

impl TableMeta {
    pub fn from_page_bytes(buf: &[u8; PAGE_SIZE]) -> DbResult<Self> {
        let mut pos = 0usize;
        check_magic(read_u32(buf, &mut pos)?, TABLE_META_MAGIC, "table meta")?;
        let table_id = TableId(read_u32(buf, &mut pos)?);
        let first_page_id = PageId(read_u32(buf, &mut pos)? as i32);
        let name = read_string(buf, &mut pos)?;
        let (schema, _) = Schema::decode(&buf[pos..])?;
        Ok(Self {
            table_id,
            name,
            first_page_id,
            schema,
        })
    }

    pub fn write_into(&self, buf: &mut [u8; PAGE_SIZE]) -> DbResult<()> {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, TABLE_META_MAGIC);
        write_u32(&mut bytes, self.table_id.0);
        write_u32(&mut bytes, self.first_page_id.0 as u32);
        write_string(&mut bytes, &self.name);
        self.schema.encode(&mut bytes);

        check_page_fit(&bytes, "table meta")?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        buf[bytes.len()..].fill(0);
        Ok(())
    }
}

/// Per-index meta page: the table it's built over and the ordinal positions
/// of its key columns. Key column SQL types are looked up from the table's
/// schema at load time rather than duplicated here.
pub struct IndexMeta {
    pub index_id: IndexId,
    pub name: String,
    pub table_id: TableId,
    pub key_columns: Vec<u32>,
}

impl IndexMeta {
    pub fn from_page_bytes(buf: &[u8; PAGE_SIZE]) -> DbResult<Self> {
        let mut pos = 0usize;
        check_magic(read_u32(buf, &mut pos)?, INDEX_META_MAGIC, "index meta")?;
        let index_id = IndexId(read_u32(buf, &mut pos)?);
        let table_id = TableId(read_u32(buf, &mut pos)?);
        let name = read_string(buf, &mut pos)?;
        let key_count = read_u32(buf, &mut pos)?;
        let mut key_columns = Vec::with_capacity(key_count as usize);
        for _ in 0..key_count {
            key_columns.push(read_u32(buf, &mut pos)?);
        }
        Ok(Self {
            index_id,
            name,
            table_id,
            key_columns,
        })
    }

    pub fn write_into(&self, buf: &mut [u8; PAGE_SIZE]) -> DbResult<()> {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, INDEX_META_MAGIC);
        write_u32(&mut bytes, self.index_id.0);
        write_u32(&mut bytes, self.table_id.0);
        write_string(&mut bytes, &self.name);
        write_u32(&mut bytes, self.key_columns.len() as u32);
        for col in &self.key_columns {
            write_u32(&mut bytes, *col);
        }

        check_page_fit(&bytes, "index meta")?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        buf[bytes.len()..].fill(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::record::Column;
    use types::SqlType;

    #[test]
    fn catalog_meta_round_trips() {
        let meta = CatalogMeta {
            next_table_id: 3,
            next_index_id: 2,
            tables: vec![(TableId(0), PageId(5)), (TableId(1), PageId(9))],
            indexes: vec![(IndexId(0), PageId(12))],
        };
        let mut buf = [0u8; PAGE_SIZE];
        meta.write_into(&mut buf).unwrap();
        let restored = CatalogMeta::from_page_bytes(&buf).unwrap();
        assert_eq!(restored.next_table_id, 3);
        assert_eq!(restored.tables, meta.tables);
        assert_eq!(restored.indexes, meta.indexes);
    }

    #[test]
    fn table_meta_round_trips() {
        let schema = Schema::new(vec![Column::new("id", SqlType::Int32, 0).not_null()]);
        let meta = TableMeta {
            table_id: TableId(7),
            name: "widgets".into(),
            first_page_id: PageId(4),
            schema,
        };
        let mut buf = [0u8; PAGE_SIZE];
        meta.write_into(&mut buf).unwrap();
        let restored = TableMeta::from_page_bytes(&buf).unwrap();
        assert_eq!(restored.table_id, meta.table_id);
        assert_eq!(restored.name, "widgets");
        assert_eq!(restored.first_page_id, PageId(4));
        assert_eq!(restored.schema, meta.schema);
    }

    #[test]
    fn index_meta_round_trips() {
        let meta = IndexMeta {
            index_id: IndexId(2),
            name: "widgets_by_id".into(),
            table_id: TableId(7),
            key_columns: vec![0, 2],
        };
        let mut buf = [0u8; PAGE_SIZE];
        meta.write_into(&mut buf).unwrap();
        let restored = IndexMeta::from_page_bytes(&buf).unwrap();
        assert_eq!(restored.index_id, meta.index_id);
        assert_eq!(restored.key_columns, vec![0, 2]);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = [0u8; PAGE_SIZE];
        assert!(CatalogMeta::from_page_bytes(&buf).is_err());
        assert!(TableMeta::from_page_bytes(&buf).is_err());
        assert!(IndexMeta::from_page_bytes(&buf).is_err());
    }
}
