//! Casting engine: raw input/stored values to typed attribute values.
//!
//! # Responsibility
//! - Define the closed set of per-field type descriptors.
//! - Convert raw values according to the descriptor resolved by a schema.
//!
//! # Invariants
//! - A nullable descriptor maps blank input to `Value::Null` without
//!   running the underlying conversion.
//! - Only nominal casts and secret hashing can fail; every other
//!   conversion is total.
//! - Casting an already-cast value yields the same value (secrets are
//!   never hashed twice).
//! - A secret value that is not a PHC hash string is hashed like plain
//!   input.

use crate::model::schema::Schema;
use crate::model::secret::{hash_secret, is_secret_hash};
use crate::model::value::{Value, TIMESTAMP_FORMAT};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::warn;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Per-field type descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cast {
    Text,
    Integer,
    Boolean,
    Timestamp,
    /// One-way salted hash.
    Secret,
    /// Backend-generated identity; stripped by `Entity::cast_all`.
    AutoIncrement,
    /// Named type built by the converter registered in the schema.
    Nominal(String),
    Nullable(Box<Cast>),
}

/// Native parameter kind used when binding a value to a backend statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Integer,
    Text,
}

impl Cast {
    pub fn nominal(type_name: impl Into<String>) -> Self {
        Self::Nominal(type_name.into())
    }

    /// Wraps this descriptor as nullable.
    ///
    /// Already-nullable and auto-increment descriptors are returned as-is.
    pub fn nullable(self) -> Self {
        match self {
            Self::Nullable(_) | Self::AutoIncrement => self,
            other => Self::Nullable(Box::new(other)),
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Self::Nullable(_))
    }

    /// Descriptor with any nullable wrapper removed.
    pub fn base(&self) -> &Cast {
        match self {
            Self::Nullable(inner) => inner.base(),
            other => other,
        }
    }

    pub fn param_kind(&self) -> ParamKind {
        match self.base() {
            Self::Integer | Self::AutoIncrement | Self::Boolean => ParamKind::Integer,
            _ => ParamKind::Text,
        }
    }
}

/// Conversion failure for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CastError {
    UnregisteredType {
        field: String,
        type_name: String,
    },
    Conversion {
        field: String,
        type_name: String,
        message: String,
    },
    Hashing {
        field: String,
        message: String,
    },
}

impl Display for CastError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnregisteredType { field, type_name } => write!(
                f,
                "no converter registered for type `{type_name}` (field `{field}`)"
            ),
            Self::Conversion {
                field,
                type_name,
                message,
            } => write!(f, "cannot cast field `{field}` to `{type_name}`: {message}"),
            Self::Hashing { field, message } => {
                write!(f, "cannot hash secret field `{field}`: {message}")
            }
        }
    }
}

impl Error for CastError {}

/// Casts an input value for `field` using the schema's resolved descriptor.
pub fn cast_value(schema: &Schema, field: &str, raw: Value) -> Result<Value, CastError> {
    let cast = schema.resolve_cast(field);
    apply(schema, field, &cast, raw)
}

/// Casts a value read back from a backend.
///
/// Text arriving for a secret field is the stored hash and is kept as-is.
pub fn cast_stored(schema: &Schema, field: &str, raw: Value) -> Result<Value, CastError> {
    let cast = schema.resolve_cast(field);
    match (cast.base(), raw) {
        (Cast::Secret, Value::Text(hash)) if !hash.is_empty() => Ok(Value::Secret(hash)),
        (_, raw) => apply(schema, field, &cast, raw),
    }
}

fn apply(schema: &Schema, field: &str, cast: &Cast, raw: Value) -> Result<Value, CastError> {
    match cast {
        Cast::Nullable(_) if raw.is_blank() => Ok(Value::Null),
        Cast::Nullable(inner) => match apply(schema, field, inner, raw) {
            Err(CastError::Conversion { .. }) => Ok(Value::Null),
            other => other,
        },
        Cast::Text => Ok(match raw {
            Value::Text(_) => raw,
            other => Value::Text(coerce_text(&other)),
        }),
        Cast::Integer | Cast::AutoIncrement => Ok(Value::Integer(coerce_integer(&raw))),
        Cast::Boolean => Ok(Value::Boolean(coerce_bool(&raw))),
        Cast::Timestamp => Ok(coerce_timestamp(field, &raw).map_or(Value::Null, Value::Timestamp)),
        Cast::Secret => match raw {
            Value::Secret(hash) if is_secret_hash(&hash) => Ok(Value::Secret(hash)),
            other => hash_secret(&coerce_text(&other))
                .map(Value::Secret)
                .map_err(|message| CastError::Hashing {
                    field: field.to_string(),
                    message,
                }),
        },
        Cast::Nominal(type_name) => {
            if raw.custom_type_name() == Some(type_name.as_str()) {
                return Ok(raw);
            }
            let converter =
                schema
                    .converter(type_name)
                    .ok_or_else(|| CastError::UnregisteredType {
                        field: field.to_string(),
                        type_name: type_name.clone(),
                    })?;
            converter(&raw)
                .map(Value::Custom)
                .map_err(|message| CastError::Conversion {
                    field: field.to_string(),
                    type_name: type_name.clone(),
                    message,
                })
        }
    }
}

/// Numeric coercion. Never fails; unreadable input becomes `0`.
pub fn coerce_integer(raw: &Value) -> i64 {
    match raw {
        Value::Null => 0,
        Value::Integer(value) => *value,
        Value::Real(value) => *value as i64,
        Value::Boolean(value) => i64::from(*value),
        Value::Text(text) => parse_integer_prefix(text),
        Value::Timestamp(value) => value.and_utc().timestamp(),
        Value::Secret(_) => 0,
        Value::Custom(custom) => parse_integer_prefix(&custom.to_raw()),
    }
}

/// Truthiness coercion.
pub fn coerce_bool(raw: &Value) -> bool {
    match raw {
        Value::Null => false,
        Value::Integer(value) => *value != 0,
        Value::Real(value) => *value != 0.0,
        Value::Boolean(value) => *value,
        Value::Text(text) => !(text.is_empty() || text == "0"),
        Value::Timestamp(_) | Value::Secret(_) | Value::Custom(_) => true,
    }
}

/// Text coercion.
pub fn coerce_text(raw: &Value) -> String {
    match raw {
        Value::Null => String::new(),
        Value::Integer(value) => value.to_string(),
        Value::Real(value) => value.to_string(),
        Value::Boolean(true) => "1".to_string(),
        Value::Boolean(false) => String::new(),
        Value::Text(text) | Value::Secret(text) => text.clone(),
        Value::Timestamp(value) => value.format(TIMESTAMP_FORMAT).to_string(),
        Value::Custom(custom) => custom.to_raw(),
    }
}

fn coerce_timestamp(field: &str, raw: &Value) -> Option<NaiveDateTime> {
    let parsed = match raw {
        _ if raw.is_blank() => return None,
        Value::Timestamp(value) => Some(*value),
        Value::Integer(seconds) => DateTime::from_timestamp(*seconds, 0).map(|dt| dt.naive_utc()),
        Value::Real(seconds) => {
            DateTime::from_timestamp(seconds.trunc() as i64, 0).map(|dt| dt.naive_utc())
        }
        Value::Text(text) => parse_timestamp_text(text),
        Value::Custom(custom) => parse_timestamp_text(&custom.to_raw()),
        Value::Boolean(_) | Value::Secret(_) | Value::Null => None,
    };

    if parsed.is_none() {
        warn!(
            "event=cast_timestamp module=model status=error field={} error_code=unparseable_timestamp",
            field
        );
    }
    parsed
}

/// Parses the text layouts accepted for timestamp fields.
pub fn parse_timestamp_text(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim();
    for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(value) = NaiveDateTime::parse_from_str(trimmed, layout) {
            return Some(value);
        }
    }
    if let Ok(value) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(value.naive_utc());
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn parse_integer_prefix(text: &str) -> i64 {
    let trimmed = text.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return value;
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        if value.is_finite() {
            return value as i64;
        }
    }

    let mut end = 0;
    for (index, ch) in trimmed.char_indices() {
        if ch.is_ascii_digit() || (index == 0 && (ch == '-' || ch == '+')) {
            end = index + ch.len_utf8();
        } else {
            break;
        }
    }
    trimmed[..end].parse::<i64>().unwrap_or(0)
}
