//! Field values and entity identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A dynamic field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// Null value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Text string.
    Text(String),
    /// Globally unique identifier.
    Uuid(Uuid),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Ordered list of values (child collections, arrays).
    List(Vec<Value>),
}

impl Value {
    /// Returns true for `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the text content, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content, if this is an integer value.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the list content, if this is a list value.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(items) => write!(f, "[{} items]", items.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

/// The logical identifier of an entity.
///
/// Composite keys are surfaced as a single opaque value holding one part
/// per key field, in key order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Identifier {
    /// Numeric key.
    Integer(i64),
    /// GUID key.
    Uuid(Uuid),
    /// Text key.
    Text(String),
    /// Multi-field key.
    Composite(Vec<Identifier>),
}

impl Identifier {
    /// Reads an identifier from a key field value.
    ///
    /// Returns `None` for null and for value kinds that cannot act as keys.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(n) => Some(Identifier::Integer(*n)),
            Value::Uuid(u) => Some(Identifier::Uuid(*u)),
            Value::Text(s) => Some(Identifier::Text(s.clone())),
            _ => None,
        }
    }

    /// Returns true if this identifier can designate a persisted entity.
    ///
    /// Numeric identifiers must be strictly positive; a composite is valid
    /// only when every part is.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self {
            Identifier::Integer(n) => *n > 0,
            Identifier::Uuid(_) | Identifier::Text(_) => true,
            Identifier::Composite(parts) => {
                !parts.is_empty() && parts.iter().all(Identifier::is_valid)
            }
        }
    }

    /// Converts the identifier back into field values, one per key part.
    #[must_use]
    pub fn to_values(&self) -> Vec<Value> {
        match self {
            Identifier::Integer(n) => vec![Value::Integer(*n)],
            Identifier::Uuid(u) => vec![Value::Uuid(*u)],
            Identifier::Text(s) => vec![Value::Text(s.clone())],
            Identifier::Composite(parts) => parts
                .iter()
                .flat_map(Identifier::to_values)
                .collect(),
        }
    }
}

/// Returns true if `identifier` is present and valid.
#[must_use]
pub fn is_valid_identifier(identifier: Option<&Identifier>) -> bool {
    identifier.is_some_and(Identifier::is_valid)
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Integer(n) => write!(f, "{n}"),
            Identifier::Uuid(u) => write!(f, "{u}"),
            Identifier::Text(s) => write!(f, "{s}"),
            Identifier::Composite(parts) => {
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{part}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<i64> for Identifier {
    fn from(n: i64) -> Self {
        Identifier::Integer(n)
    }
}

impl From<i32> for Identifier {
    fn from(n: i32) -> Self {
        Identifier::Integer(i64::from(n))
    }
}

impl From<Uuid> for Identifier {
    fn from(u: Uuid) -> Self {
        Identifier::Uuid(u)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier::Text(s.to_string())
    }
}
