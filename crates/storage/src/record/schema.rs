use super::column::Column;
use common::{DbError, DbResult};

const MAGIC: u32 = 0x2021_0806;

/// An ordered set of [`Column`]s describing one table's tuple layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn serialized_size(&self) -> usize {
        4 + 4 + self.columns.iter().map(Column::serialized_size).sum::<usize>()
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&(self.columns.len() as u32).to_le_bytes());
        for column in &self.columns {
            column.encode(buf);
        }
    }

    pub fn decode(buf: &[u8]) -> DbResult<(Self, usize)> {
        let magic = u32::from_le_bytes(
            buf.get(0..4)
                .ok_or_else(|| DbError::Failed("schema truncated".into()))?
                .try_into()
                .unwrap(),
        );
        if magic != MAGIC {
            return Err(DbError::Failed("schema has bad magic".into()));
        }
        let count = u32::from_le_bytes(
            buf.get(4..8)
                .ok_or_else(|| DbError::Failed("schema truncated".into()))?
                .try_into()
                .unwrap(),
        ) as usize;

        let mut pos = 8usize;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            let (column, consumed) = Column::decode(&buf[pos..])?;
            pos += consumed;
            columns.push(column);
        }

        Ok((Self { columns }, pos))
    }
}
