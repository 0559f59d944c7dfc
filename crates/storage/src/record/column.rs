use common::{ColumnId, DbError, DbResult};
use types::SqlType;

const MAGIC: u32 = 0x2021_0805;

/// One column's definition within a [`super::Schema`]: its name, SQL type,
/// nullability, uniqueness, and its ordinal position among the table's
/// columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub table_ind: ColumnId,
    pub nullable: bool,
    pub unique: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: SqlType, table_ind: ColumnId) -> Self {
        Self {
            name: name.into(),
            sql_type,
            table_ind,
            nullable: true,
            unique: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn serialized_size(&self) -> usize {
        // magic + name_len + name bytes + type tag + type payload + table_ind + nullable + unique
        4 + 4 + self.name.len() + type_tag_size(&self.sql_type) + 4 + 1 + 1
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&(self.name.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        encode_sql_type(&self.sql_type, buf);
        buf.extend_from_slice(&self.table_ind.to_le_bytes());
        buf.push(self.nullable as u8);
        buf.push(self.unique as u8);
    }

    pub fn decode(buf: &[u8]) -> DbResult<(Self, usize)> {
        let mut pos = 0usize;
        let magic = read_u32(buf, &mut pos)?;
        if magic != MAGIC {
            return Err(DbError::Failed("column has bad magic".into()));
        }
        let name_len = read_u32(buf, &mut pos)? as usize;
        let name_bytes = buf
            .get(pos..pos + name_len)
            .ok_or_else(|| DbError::Failed("column name truncated".into()))?;
        let name = String::from_utf8(name_bytes.to_vec())
            .map_err(|e| DbError::Failed(format!("column name not utf8: {e}")))?;
        pos += name_len;

        let sql_type = decode_sql_type(buf, &mut pos)?;
        let table_ind = read_u32(buf, &mut pos)?;
        let nullable = read_u8(buf, &mut pos)? != 0;
        let unique = read_u8(buf, &mut pos)? != 0;

        Ok((
            Self {
                name,
                sql_type,
                table_ind,
                nullable,
                unique,
            },
            pos,
        ))
    }
}

fn type_tag_size(ty: &SqlType) -> usize {
    match ty {
        SqlType::Int32 | SqlType::Float32 => 1,
        SqlType::FixedChar(_) => 1 + 4,
    }
}

fn encode_sql_type(ty: &SqlType, buf: &mut Vec<u8>) {
    match ty {
        SqlType::Int32 => buf.push(0),
        SqlType::Float32 => buf.push(1),
        SqlType::FixedChar(n) => {
            buf.push(2);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
}

fn decode_sql_type(buf: &[u8], pos: &mut usize) -> DbResult<SqlType> {
    let tag = read_u8(buf, pos)?;
    match tag {
        0 => Ok(SqlType::Int32),
        1 => Ok(SqlType::Float32),
        2 => {
            let n = read_u32(buf, pos)?;
            Ok(SqlType::FixedChar(n))
        }
        other => Err(DbError::Failed(format!("unknown sql type tag {other}"))),
    }
}

fn read_u32(buf: &[u8], pos: &mut usize) -> DbResult<u32> {
    let bytes = buf
        .get(*pos..*pos + 4)
        .ok_or_else(|| DbError::Failed("buffer truncated reading u32".into()))?;
    *pos += 4;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u8(buf: &[u8], pos: &mut usize) -> DbResult<u8> {
    let b = *buf
        .get(*pos)
        .ok_or_else(|| DbError::Failed("buffer truncated reading u8".into()))?;
    *pos += 1;
    Ok(b)
}
