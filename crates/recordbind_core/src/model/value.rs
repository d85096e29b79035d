//! Dynamic attribute values.
//!
//! # Responsibility
//! - Define the closed set of runtime values an entity attribute can hold.
//! - Provide the "blank" notion shared by casting, soft-delete and
//!   requiredness checks.
//!
//! # Invariants
//! - `Value::Null` is the only representation of "no value".
//! - `Value::Secret` always carries an already-hashed PHC string.

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use std::any::Any;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Text layout used when a timestamp crosses a text boundary.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A value produced by a nominal (named type) cast.
///
/// Implementations are registered per schema through a converter function
/// and must be able to render themselves back to raw text for binding.
pub trait CustomValue: Debug + Send + Sync {
    /// Name the type is registered under in a schema.
    fn type_name(&self) -> &str;
    /// Raw text form used for parameter binding and serialization.
    fn to_raw(&self) -> String;
    fn as_any(&self) -> &dyn Any;
}

impl CustomValue for Uuid {
    fn type_name(&self) -> &str {
        "Uuid"
    }

    fn to_raw(&self) -> String {
        self.to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Attribute value held by an entity or passed as a bound parameter.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Text(String),
    Timestamp(NaiveDateTime),
    /// One-way hash (PHC string); never the plain secret.
    Secret(String),
    Custom(Arc<dyn CustomValue>),
}

impl Value {
    /// Returns whether this value counts as empty/absent.
    ///
    /// Only `Null` and empty text are blank; `0`, `false` and `"0"` are not.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(text) => text.is_empty(),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    /// Downcasts a custom value to its concrete type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self {
            Self::Custom(custom) => custom.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Name of the custom type held, if any.
    pub fn custom_type_name(&self) -> Option<&str> {
        match self {
            Self::Custom(custom) => Some(custom.type_name()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Secret(a), Self::Secret(b)) => a == b,
            (Self::Custom(a), Self::Custom(b)) => {
                a.type_name() == b.type_name() && a.to_raw() == b.to_raw()
            }
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
            Self::Timestamp(value) => write!(f, "{}", value.format(TIMESTAMP_FORMAT)),
            Self::Secret(_) => write!(f, "<secret>"),
            Self::Custom(custom) => write!(f, "{}", custom.to_raw()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Integer(value) => serializer.serialize_i64(*value),
            Self::Real(value) => serializer.serialize_f64(*value),
            Self::Boolean(value) => serializer.serialize_bool(*value),
            Self::Text(value) | Self::Secret(value) => serializer.serialize_str(value),
            Self::Timestamp(value) => {
                serializer.collect_str(&value.format(TIMESTAMP_FORMAT))
            }
            Self::Custom(custom) => serializer.serialize_str(&custom.to_raw()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Self::Custom(Arc::new(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::Value;
    use uuid::Uuid;

    #[test]
    fn blank_covers_null_and_empty_text_only() {
        assert!(Value::Null.is_blank());
        assert!(Value::from("").is_blank());
        assert!(!Value::from("0").is_blank());
        assert!(!Value::from(0_i64).is_blank());
        assert!(!Value::from(false).is_blank());
    }

    #[test]
    fn custom_values_compare_by_type_and_raw_text() {
        let id = Uuid::new_v4();
        assert_eq!(Value::from(id), Value::from(id));
        assert_ne!(Value::from(id), Value::from(id.to_string()));
        assert_eq!(Value::from(id).downcast_ref::<Uuid>(), Some(&id));
    }

    #[test]
    fn option_none_maps_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::from("x"));
    }
}
