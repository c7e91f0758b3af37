//! Property values stored on entities.
//!
//! [`Value`] is the closed set of types an entity property can hold. Values of
//! different types are totally ordered by a fixed type rank so that filters
//! and sort orders behave deterministically on mixed data.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::Key;

/// Properties of an embedded entity.
pub type PropertyMap = BTreeMap<String, Value>;

/// A single property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Blob(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Key(Key),
    /// An embedded entity without a key of its own.
    Entity(PropertyMap),
    Array(Vec<Value>),
}

/// The type tag of a [`Value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueType {
    Null,
    Boolean,
    Integer,
    Double,
    String,
    Blob,
    Timestamp,
    Key,
    Entity,
    Array,
}

impl ValueType {
    /// Sort rank across types. Integers and doubles share a rank and compare
    /// numerically.
    pub const fn rank(self) -> u8 {
        match self {
            ValueType::Null => 0,
            ValueType::Integer | ValueType::Double => 1,
            ValueType::Timestamp => 2,
            ValueType::Boolean => 3,
            ValueType::String => 4,
            ValueType::Blob => 5,
            ValueType::Key => 6,
            ValueType::Entity => 7,
            ValueType::Array => 8,
        }
    }

    /// Whether range comparisons (`<`, `>=`, ...) are meaningful for this type.
    pub const fn is_orderable(self) -> bool {
        !matches!(self, ValueType::Null | ValueType::Entity | ValueType::Array)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Null => "null",
            ValueType::Boolean => "boolean",
            ValueType::Integer => "integer",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::Blob => "blob",
            ValueType::Timestamp => "timestamp",
            ValueType::Key => "key",
            ValueType::Entity => "entity",
            ValueType::Array => "array",
        };
        f.write_str(name)
    }
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Integer(_) => ValueType::Integer,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Blob(_) => ValueType::Blob,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Key(_) => ValueType::Key,
            Value::Entity(_) => ValueType::Entity,
            Value::Array(_) => ValueType::Array,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&PropertyMap> {
        match self {
            Value::Entity(properties) => Some(properties),
            _ => None,
        }
    }

    /// Total order across all values: type rank first, then the value.
    pub fn compare(&self, other: &Value) -> Ordering {
        let rank = self.value_type().rank().cmp(&other.value_type().rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Integer(a), Value::Double(b)) => compare_int_double(*a, *b),
            (Value::Double(a), Value::Integer(b)) => compare_int_double(*b, *a).reverse(),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Key(a), Value::Key(b)) => a.cmp(b),
            (Value::Entity(a), Value::Entity(b)) => compare_maps(a, b),
            (Value::Array(a), Value::Array(b)) => compare_lists(a, b),
            // Same rank implies one of the pairs above.
            _ => Ordering::Equal,
        }
    }
}

/// Exact comparison of an integer with a double. Casting the integer to
/// `f64` would lose precision above 2^53.
fn compare_int_double(int: i64, double: f64) -> Ordering {
    // -2^63 is exactly representable; 2^63 is the first double past i64::MAX.
    const LOWER: f64 = -9_223_372_036_854_775_808.0;
    const UPPER: f64 = 9_223_372_036_854_775_808.0;

    if double.is_nan() {
        return (int as f64).total_cmp(&double);
    }
    if double >= UPPER {
        return Ordering::Less;
    }
    if double < LOWER {
        return Ordering::Greater;
    }
    let whole = double.trunc();
    match int.cmp(&(whole as i64)) {
        Ordering::Equal => {
            let fraction = double - whole;
            if fraction > 0.0 {
                Ordering::Less
            } else if fraction < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        other => other,
    }
}

fn compare_lists(a: &[Value], b: &[Value]) -> Ordering {
    for (left, right) in a.iter().zip(b) {
        let ord = left.compare(right);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_maps(a: &PropertyMap, b: &PropertyMap) -> Ordering {
    for ((ka, va), (kb, vb)) in a.iter().zip(b) {
        let ord = ka.cmp(kb).then_with(|| va.compare(vb));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Blob(bytes) => write!(f, "0x{}", hex::encode(bytes)),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Value::Key(key) => write!(f, "{key}"),
            Value::Entity(properties) => {
                f.write_str("{")?;
                for (i, (name, value)) in properties.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
            Value::Array(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Integer(i64::from(v))
                }
            }
        )*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Double(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Key> for Value {
    fn from(v: Key) -> Self {
        Value::Key(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<PropertyMap> for Value {
    fn from(v: PropertyMap) -> Self {
        Value::Entity(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
