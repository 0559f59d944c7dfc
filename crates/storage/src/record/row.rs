use super::schema::Schema;
use common::{DbError, DbResult, Row};
use types::{SqlType, Value};

/// Serializes `row` according to `schema`: a field-count header, a null
/// bitmap (one bit per column, set when the field is absent), followed by
/// the fixed-width encoding of each non-null field in column order.
pub fn encode(row: &Row, schema: &Schema) -> DbResult<Vec<u8>> {
    if row.field_count() != schema.column_count() {
        return Err(DbError::Failed(format!(
            "row has {} fields but schema has {}",
            row.field_count(),
            schema.column_count()
        )));
    }

    let bitmap_bytes = schema.column_count().div_ceil(8);
    let mut buf = Vec::with_capacity(4 + bitmap_bytes + schema.serialized_size());
    buf.extend_from_slice(&(row.field_count() as u32).to_le_bytes());

    let mut bitmap = vec![0u8; bitmap_bytes];
    for (i, field) in row.fields.iter().enumerate() {
        if field.is_none() {
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    buf.extend_from_slice(&bitmap);

    for (field, column) in row.fields.iter().zip(&schema.columns) {
        if let Some(value) = field {
            encode_value(value, &column.sql_type, &mut buf)?;
        }
    }

    Ok(buf)
}

pub fn decode(buf: &[u8], schema: &Schema) -> DbResult<Row> {
    let field_count = u32::from_le_bytes(
        buf.get(0..4)
            .ok_or_else(|| DbError::Failed("row truncated".into()))?
            .try_into()
            .unwrap(),
    ) as usize;
    if field_count != schema.column_count() {
        return Err(DbError::Failed("row field count mismatches schema".into()));
    }

    let bitmap_bytes = field_count.div_ceil(8);
    let bitmap = buf
        .get(4..4 + bitmap_bytes)
        .ok_or_else(|| DbError::Failed("row null bitmap truncated".into()))?;

    let mut pos = 4 + bitmap_bytes;
    let mut fields = Vec::with_capacity(field_count);
    for (i, column) in schema.columns.iter().enumerate() {
        let is_null = (bitmap[i / 8] & (1 << (i % 8))) != 0;
        if is_null {
            fields.push(None);
        } else {
            let (value, consumed) = decode_value(&buf[pos..], &column.sql_type)?;
            pos += consumed;
            fields.push(Some(value));
        }
    }

    Ok(Row::new(fields))
}

/// Fixed-width encoding of one composite index key, column by column, with
/// no null bitmap: index keys never contain nulls (enforced by
/// `key_fields`).
pub fn encode_key(values: &[Value], types: &[SqlType]) -> DbResult<Vec<u8>> {
    if values.len() != types.len() {
        return Err(DbError::Failed("key arity mismatches key schema".into()));
    }
    let mut buf = Vec::with_capacity(types.iter().map(SqlType::byte_len).sum::<u32>() as usize);
    for (value, ty) in values.iter().zip(types) {
        encode_value(value, ty, &mut buf)?;
    }
    Ok(buf)
}

pub fn decode_key(buf: &[u8], types: &[SqlType]) -> DbResult<Vec<Value>> {
    let mut pos = 0usize;
    let mut values = Vec::with_capacity(types.len());
    for ty in types {
        let (value, consumed) = decode_value(&buf[pos..], ty)?;
        pos += consumed;
        values.push(value);
    }
    Ok(values)
}

pub fn key_byte_len(types: &[SqlType]) -> usize {
    types.iter().map(|t| t.byte_len() as usize).sum()
}

/// Extracts the subset of `row`'s fields at `key_indices`, in order, to build
/// an index key. Used by `CreateIndex` backfill and by index maintenance on
/// insert/delete.
pub fn key_fields(row: &Row, key_indices: &[usize]) -> DbResult<Vec<Value>> {
    key_indices
        .iter()
        .map(|&i| {
            row.fields
                .get(i)
                .cloned()
                .flatten()
                .ok_or_else(|| DbError::Failed(format!("key column {i} is null or missing")))
        })
        .collect()
}

fn encode_value(value: &Value, expected: &SqlType, buf: &mut Vec<u8>) -> DbResult<()> {
    match (value, expected) {
        (Value::Int32(v), SqlType::Int32) => {
            buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }
        (Value::Float32(v), SqlType::Float32) => {
            buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }
        (Value::Char(s), SqlType::FixedChar(n)) => {
            let n = *n as usize;
            if s.len() > n {
                return Err(DbError::Failed(format!(
                    "char value of length {} exceeds column width {n}",
                    s.len()
                )));
            }
            buf.extend_from_slice(s.as_bytes());
            buf.resize(buf.len() + (n - s.len()), 0);
            Ok(())
        }
        _ => Err(DbError::Failed("value does not match column type".into())),
    }
}

fn decode_value(buf: &[u8], ty: &SqlType) -> DbResult<(Value, usize)> {
    match ty {
        SqlType::Int32 => {
            let bytes = buf
                .get(0..4)
                .ok_or_else(|| DbError::Failed("int32 field truncated".into()))?;
            Ok((Value::Int32(i32::from_le_bytes(bytes.try_into().unwrap())), 4))
        }
        SqlType::Float32 => {
            let bytes = buf
                .get(0..4)
                .ok_or_else(|| DbError::Failed("float32 field truncated".into()))?;
            Ok((
                Value::Float32(f32::from_le_bytes(bytes.try_into().unwrap())),
                4,
            ))
        }
        SqlType::FixedChar(n) => {
            let n = *n as usize;
            let bytes = buf
                .get(0..n)
                .ok_or_else(|| DbError::Failed("char field truncated".into()))?;
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(n);
            let s = String::from_utf8(bytes[..end].to_vec())
                .map_err(|e| DbError::Failed(format!("char field not utf8: {e}")))?;
            Ok((Value::Char(s), n))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::column::Column;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", SqlType::Int32, 0).not_null(),
            Column::new("name", SqlType::FixedChar(8), 1),
            Column::new("score", SqlType::Float32, 2),
        ])
    }

    #[test]
    fn round_trips_row_with_no_nulls() {
        let schema = schema();
        let row = Row::new(vec![
            Some(Value::Int32(7)),
            Some(Value::Char("abc".into())),
            Some(Value::Float32(1.5)),
        ]);
        let buf = encode(&row, &schema).unwrap();
        let decoded = decode(&buf, &schema).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn round_trips_row_with_nulls() {
        let schema = schema();
        let row = Row::new(vec![Some(Value::Int32(7)), None, None]);
        let buf = encode(&row, &schema).unwrap();
        let decoded = decode(&buf, &schema).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn rejects_field_count_mismatch() {
        let schema = schema();
        let row = Row::new(vec![Some(Value::Int32(1))]);
        assert!(encode(&row, &schema).is_err());
    }

    #[test]
    fn rejects_char_value_too_long() {
        let schema = schema();
        let row = Row::new(vec![
            Some(Value::Int32(1)),
            Some(Value::Char("way too long".into())),
            None,
        ]);
        assert!(encode(&row, &schema).is_err());
    }

    #[test]
    fn key_fields_extracts_requested_columns() {
        let row = Row::new(vec![
            Some(Value::Int32(7)),
            Some(Value::Char("abc".into())),
            Some(Value::Float32(1.5)),
        ]);
        let key = key_fields(&row, &[0]).unwrap();
        assert_eq!(key, vec![Value::Int32(7)]);
    }

    #[test]
    fn key_fields_rejects_null_key_column() {
        let row = Row::new(vec![Some(Value::Int32(7)), None, None]);
        assert!(key_fields(&row, &[1]).is_err());
    }

    #[test]
    fn composite_key_round_trips() {
        let types = vec![SqlType::Int32, SqlType::FixedChar(4)];
        let values = vec![Value::Int32(9), Value::Char("ab".into())];
        let buf = encode_key(&values, &types).unwrap();
        assert_eq!(buf.len(), key_byte_len(&types));

        let decoded = decode_key(&buf, &types).unwrap();
        assert_eq!(decoded, values);
    }
}
