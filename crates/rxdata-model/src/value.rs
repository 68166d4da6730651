#![forbid(unsafe_code)]

//! Tagged cell values.
//!
//! [`Value`] is the unit of data stored in snapshot cells and carried by
//! pending writes. It is deliberately small and closed: the conflict
//! resolver's merge strategy needs to know every shape it can encounter
//! (numeric mean, list concatenation, map merge), so open-ended payloads
//! are out.
//!
//! Content hashing goes through [`Value::feed_hash`] rather than a `Hash`
//! impl because `Float` holds an `f64`: hashing the bit pattern keeps the
//! hash deterministic without pretending the type is `Eq`.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Absent / null.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// String-keyed map with deterministic (sorted) iteration order.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Numeric view of this value, if it is `Int` or `Float`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Whether this value is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Feed this value's content into a hasher, deterministically.
    ///
    /// Each variant writes a discriminant tag first so that, for example,
    /// `Int(0)` and `Null` cannot collide structurally. Floats hash their
    /// IEEE bit pattern.
    pub fn feed_hash<H: Hasher>(&self, h: &mut H) {
        match self {
            Self::Null => h.write_u8(0),
            Self::Bool(b) => {
                h.write_u8(1);
                h.write_u8(u8::from(*b));
            }
            Self::Int(i) => {
                h.write_u8(2);
                h.write_i64(*i);
            }
            Self::Float(f) => {
                h.write_u8(3);
                h.write_u64(f.to_bits());
            }
            Self::Text(s) => {
                h.write_u8(4);
                h.write_usize(s.len());
                h.write(s.as_bytes());
            }
            Self::List(items) => {
                h.write_u8(5);
                h.write_usize(items.len());
                for item in items {
                    item.feed_hash(h);
                }
            }
            Self::Map(map) => {
                h.write_u8(6);
                h.write_usize(map.len());
                for (k, v) in map {
                    h.write_usize(k.len());
                    h.write(k.as_bytes());
                    v.feed_hash(h);
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Map(map)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &Value) -> u64 {
        let mut h = DefaultHasher::new();
        v.feed_hash(&mut h);
        h.finish()
    }

    #[test]
    fn as_f64_numeric_views() {
        assert_eq!(Value::Int(7).as_f64(), Some(7.0));
        assert_eq!(Value::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::Text("7".into()).as_f64(), None);
        assert_eq!(Value::Null.as_f64(), None);
    }

    #[test]
    fn equal_values_hash_equal() {
        let a = Value::List(vec![Value::Int(1), Value::Text("x".into())]);
        let b = Value::List(vec![Value::Int(1), Value::Text("x".into())]);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn variant_tags_prevent_structural_collisions() {
        // Int(0) writes different bytes than Null + nothing.
        assert_ne!(hash_of(&Value::Int(0)), hash_of(&Value::Null));
        // Text("1") vs Int(1).
        assert_ne!(hash_of(&Value::Text("1".into())), hash_of(&Value::Int(1)));
    }

    #[test]
    fn float_hashes_bit_pattern() {
        assert_eq!(hash_of(&Value::Float(1.5)), hash_of(&Value::Float(1.5)));
        assert_ne!(hash_of(&Value::Float(1.5)), hash_of(&Value::Float(-1.5)));
    }

    #[test]
    fn display_round_trip_shapes() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        let v = Value::List(vec![Value::Map(map), Value::Bool(true)]);
        assert_eq!(v.to_string(), "[{a: 1}, true]");
    }

    #[test]
    fn from_conversions() {
        assert_eq!(Value::from(3i64), Value::Int(3));
        assert_eq!(Value::from(0.5f64), Value::Float(0.5));
        assert_eq!(Value::from("hi"), Value::Text("hi".into()));
        assert_eq!(Value::from(true), Value::Bool(true));
    }
}
