use common::{DbError, DbResult};
use std::cmp::Ordering;
use storage::record::row::{decode_key, encode_key, key_byte_len};
use types::{SqlType, Value};

/// Describes the composite key an index is built over: the SQL types of the
/// indexed columns, in order. Encodes/decodes/compares keys as fixed-width
/// byte strings so they can be stored directly in B+-tree pages.
#[derive(Clone, Debug)]
pub struct KeySchema {
    types: Vec<SqlType>,
}

impl KeySchema {
    pub fn new(types: Vec<SqlType>) -> Self {
        Self { types }
    }

    pub fn byte_len(&self) -> usize {
        key_byte_len(&self.types)
    }

    pub fn encode(&self, values: &[Value]) -> DbResult<Vec<u8>> {
        encode_key(values, &self.types)
    }

    pub fn decode(&self, buf: &[u8]) -> DbResult<Vec<Value>> {
        decode_key(buf, &self.types)
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> DbResult<Ordering> {
        let av = self.decode(a)?;
        let bv = self.decode(b)?;
        for (x, y) in av.iter().zip(bv.iter()) {
            let ord = x
                .cmp_same_type(y)
                .ok_or_else(|| DbError::Failed("index key fields not comparable".into()))?;
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(Ordering::Equal)
    }
}
