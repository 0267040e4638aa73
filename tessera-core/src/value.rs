//! Property values and the typed conversions in and out of them.
//!
//! A backend only understands a handful of value shapes. Every Rust field
//! stored through the codec maps onto one of them via [`Scalar`] (a single
//! value) or [`FieldValue`] (zero or more values under one property name).
//!
//! Reads coerce to the exact destination width. A stored value that does not
//! fit the destination is a schema/storage mismatch and panics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
        }
    }

    /// Whether this equals the zero value of its type.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !*b,
            Value::Int(i) => *i == 0,
            Value::Float(f) => *f == 0.0,
            Value::Text(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Timestamp(t) => *t == DateTime::<Utc>::default(),
        }
    }

    /// Ordering between comparable values. Ints and floats compare numerically.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

/// Opaque byte payload. Never indexed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blob(pub Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Blob(bytes)
    }
}

// ============================================================================
// SCALAR
// ============================================================================

/// A Rust type stored as exactly one [`Value`].
pub trait Scalar: Clone + Default + PartialEq {
    const TYPE_NAME: &'static str;

    fn to_value(&self) -> Value;

    /// Convert a stored value back. `None` means the value has the wrong shape.
    ///
    /// # Panics
    ///
    /// Panics when a numeric value overflows the destination width.
    fn from_value(value: &Value) -> Option<Self>;
}

/// A field stored as zero or more values under one property name.
pub trait FieldValue: Sized {
    /// Whether each value is one element of a repeated property.
    const MULTIPLE: bool = false;

    fn type_label() -> String;

    fn to_values(&self) -> Vec<Value>;

    /// Whether the field holds the zero value of its type.
    fn is_empty_value(&self) -> bool;

    /// Rebuild from every value recorded under the property name, in order.
    fn from_values(values: &[&Value]) -> Option<Self>;
}

fn overflow(value: impl std::fmt::Display, target: &str) -> ! {
    panic!("stored value {} overflows destination type {}", value, target)
}

macro_rules! field_value_for_scalar {
    ($($t:ty),* $(,)?) => {$(
        impl FieldValue for $t {
            fn type_label() -> String {
                <$t as Scalar>::TYPE_NAME.to_string()
            }

            fn to_values(&self) -> Vec<Value> {
                vec![self.to_value()]
            }

            fn is_empty_value(&self) -> bool {
                *self == <$t>::default()
            }

            fn from_values(values: &[&Value]) -> Option<Self> {
                values.first().and_then(|v| <$t as Scalar>::from_value(v))
            }
        }
    )*};
}

macro_rules! scalar_int {
    ($($t:ty),* $(,)?) => {$(
        impl Scalar for $t {
            const TYPE_NAME: &'static str = stringify!($t);

            fn to_value(&self) -> Value {
                Value::Int(i64::from(*self))
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::Int(i) => {
                        Some(<$t>::try_from(*i).unwrap_or_else(|_| overflow(i, stringify!($t))))
                    }
                    _ => None,
                }
            }
        }
    )*};
}

scalar_int!(i8, i16, i32, i64, u8, u16, u32);

// u64 travels through the signed 64-bit slot bit-for-bit.
impl Scalar for u64 {
    const TYPE_NAME: &'static str = "u64";

    fn to_value(&self) -> Value {
        Value::Int(*self as i64)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(*i as u64),
            _ => None,
        }
    }
}

impl Scalar for f64 {
    const TYPE_NAME: &'static str = "f64";

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(x) => Some(*x),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl Scalar for f32 {
    const TYPE_NAME: &'static str = "f32";

    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }

    fn from_value(value: &Value) -> Option<Self> {
        let x = match value {
            Value::Float(x) => *x,
            Value::Int(i) => *i as f64,
            _ => return None,
        };
        if x.is_finite() && x.abs() > f64::from(f32::MAX) {
            overflow(x, "f32");
        }
        Some(x as f32)
    }
}

impl Scalar for bool {
    const TYPE_NAME: &'static str = "bool";

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl Scalar for String {
    const TYPE_NAME: &'static str = "string";

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl Scalar for DateTime<Utc> {
    const TYPE_NAME: &'static str = "timestamp";

    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }
}

impl Scalar for Blob {
    const TYPE_NAME: &'static str = "blob";

    fn to_value(&self) -> Value {
        Value::Bytes(self.0.clone())
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bytes(b) => Some(Blob(b.clone())),
            _ => None,
        }
    }
}

/// `None` is stored as an explicit null so positional runs stay aligned.
impl<T: Scalar> Scalar for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

field_value_for_scalar!(
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    bool,
    String,
    DateTime<Utc>,
    Blob,
);

impl<T: Scalar> FieldValue for Option<T> {
    fn type_label() -> String {
        format!("option<{}>", T::TYPE_NAME)
    }

    fn to_values(&self) -> Vec<Value> {
        match self {
            Some(v) => vec![v.to_value()],
            None => Vec::new(),
        }
    }

    fn is_empty_value(&self) -> bool {
        match self {
            Some(v) => *v == T::default(),
            None => true,
        }
    }

    fn from_values(values: &[&Value]) -> Option<Self> {
        match values.first() {
            Some(v) => <Option<T> as Scalar>::from_value(v),
            None => Some(None),
        }
    }
}

impl<T: Scalar> FieldValue for Vec<T> {
    const MULTIPLE: bool = true;

    fn type_label() -> String {
        format!("list<{}>", T::TYPE_NAME)
    }

    fn to_values(&self) -> Vec<Value> {
        self.iter().map(Scalar::to_value).collect()
    }

    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }

    fn from_values(values: &[&Value]) -> Option<Self> {
        values.iter().map(|v| T::from_value(v)).collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
