use std::cmp::Ordering;

/// A column's declared type. `FixedChar(n)` carries its fixed byte width,
/// matching the source's `kTypeChar` columns which are always given an
/// explicit length at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SqlType {
    Int32,
    Float32,
    FixedChar(u32),
}

impl SqlType {
    /// Byte width of a non-null value of this type, as stored in a row.
    pub fn byte_len(&self) -> u32 {
        match self {
            SqlType::Int32 => 4,
            SqlType::Float32 => 4,
            SqlType::FixedChar(n) => *n,
        }
    }
}

/// A single field value. There is no `Null` variant here: nullability is
/// carried by `Option<Value>` at the row level via the null bitmap, mirroring
/// the source's separate null-bitmap mechanism rather than an in-band tag.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Int32(i32),
    Float32(f32),
    Char(String),
}

impl Value {
    pub fn sql_type(&self) -> SqlType {
        match self {
            Value::Int32(_) => SqlType::Int32,
            Value::Float32(_) => SqlType::Float32,
            Value::Char(s) => SqlType::FixedChar(s.len() as u32),
        }
    }

    pub fn cmp_same_type(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::Float32(a), Value::Float32(b)) => a.partial_cmp(b),
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn eq_same_type(&self, other: &Value) -> Option<bool> {
        self.cmp_same_type(other).map(|o| o == Ordering::Equal)
    }
}

// Manual PartialEq/Eq so `Value` can be used as a map key and in assertions
// without requiring `f32: Eq`. Equality compares bit patterns for floats,
// which is what a fixed-width on-disk key comparator does in practice.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Float32(a), Value::Float32(b)) => a.to_bits() == b.to_bits(),
            (Value::Char(a), Value::Char(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Value {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering::{Equal, Greater, Less};

    #[test]
    fn cmp_same_type_works() {
        assert_eq!(Value::Int32(1).cmp_same_type(&Value::Int32(2)), Some(Less));
        assert_eq!(
            Value::Int32(1).cmp_same_type(&Value::Char("1".into())),
            None
        );
    }

    #[test]
    fn byte_len_matches_fixed_width_types() {
        assert_eq!(SqlType::Int32.byte_len(), 4);
        assert_eq!(SqlType::Float32.byte_len(), 4);
        assert_eq!(SqlType::FixedChar(10).byte_len(), 10);
    }

    #[test]
    fn comparisons_require_same_type() {
        assert_eq!(Value::Int32(1).cmp_same_type(&Value::Int32(2)), Some(Less));
        assert_eq!(
            Value::Char("a".into()).cmp_same_type(&Value::Char("a".into())),
            Some(Equal)
        );
        assert_eq!(
            Value::Float32(2.0).cmp_same_type(&Value::Float32(1.0)),
            Some(Greater)
        );
        assert_eq!(Value::Int32(1).cmp_same_type(&Value::Char("1".into())), None);
    }

    #[test]
    fn equality_requires_same_type() {
        assert_eq!(Value::Int32(1).eq_same_type(&Value::Int32(1)), Some(true));
        assert_eq!(Value::Int32(1).eq_same_type(&Value::Int32(2)), Some(false));
        assert_eq!(
            Value::Char("abc".into()).eq_same_type(&Value::Char("abc".into())),
            Some(true)
        );
        assert_eq!(Value::Char("1".into()).eq_same_type(&Value::Int32(1)), None);
    }

    #[test]
    fn ordering_is_consistent() {
        let a = Value::Int32(5);
        let b = Value::Int32(7);
        let c = Value::Int32(5);

        assert_eq!(a.cmp_same_type(&b), Some(Less));
        assert_eq!(b.cmp_same_type(&a), Some(Greater));
        assert_eq!(a.cmp_same_type(&c), Some(Equal));
    }

    proptest! {
        #[test]
        fn order_is_antisymmetric(i in any::<i32>(), j in any::<i32>()) {
            let a = Value::Int32(i);
            let b = Value::Int32(j);
            let ord1 = a.cmp_same_type(&b);
            let ord2 = b.cmp_same_type(&a);
            match (ord1, ord2) {
                (Some(o1), Some(o2)) => assert_eq!(o1, o2.reverse()),
                _ => prop_assert!(true),
            }
        }

        #[test]
        fn eq_reflexive(val in any::<i32>()) {
            let v = Value::Int32(val);
            assert_eq!(v.eq_same_type(&v), Some(true));
        }

        #[test]
        fn char_cmp_matches_std(a in ".*", b in ".*") {
            let va = Value::Char(a.clone());
            let vb = Value::Char(b.clone());
            assert_eq!(va.cmp_same_type(&vb), Some(a.cmp(&b)));
        }
    }
}
