//! Entity schema declaration.
//!
//! # Responsibility
//! - Hold the per-type declaration: fillable, required and hidden field
//!   names, castings, soft-delete field and nominal converters.
//! - Resolve the effective type descriptor for a field name.
//!
//! # Invariants
//! - A schema is immutable once built.
//! - The soft-delete field is implicitly fillable and always resolves to a
//!   nullable timestamp, overriding any declared casting for that name.
//! - Castings keep declaration order.

use crate::model::cast::Cast;
use crate::model::value::{CustomValue, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Builds a custom value of one nominal type from a raw value.
pub type Converter = fn(&Value) -> Result<Arc<dyn CustomValue>, String>;

/// Type name the built-in UUID converter is registered under.
pub const UUID_TYPE: &str = "Uuid";

/// Declared shape of one entity type.
#[derive(Clone)]
pub struct Schema {
    fields: BTreeSet<String>,
    required: Vec<String>,
    hidden: BTreeSet<String>,
    castings: Vec<(String, Cast)>,
    deleted_at: Option<String>,
    converters: BTreeMap<String, Converter>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Returns whether `name` may be written through the generic setter.
    pub fn is_fillable(&self, name: &str) -> bool {
        self.fields.contains(name) || self.deleted_at.as_deref() == Some(name)
    }

    pub fn is_hidden(&self, name: &str) -> bool {
        self.hidden.contains(name)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|field| field == name)
    }

    /// Required field names in declaration order.
    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn deleted_at_field(&self) -> Option<&str> {
        self.deleted_at.as_deref()
    }

    /// Resolves the effective type descriptor for `name`.
    ///
    /// Undeclared fields resolve to `Cast::Text`.
    pub fn resolve_cast(&self, name: &str) -> Cast {
        if self.deleted_at.as_deref() == Some(name) {
            return Cast::Timestamp.nullable();
        }

        self.castings
            .iter()
            .find(|(field, _)| field == name)
            .map_or(Cast::Text, |(_, cast)| cast.clone())
    }

    /// Effective castings in declaration order.
    ///
    /// The soft-delete field is appended when it was not declared explicitly.
    pub fn castings(&self) -> Vec<(String, Cast)> {
        let mut castings: Vec<(String, Cast)> = self
            .castings
            .iter()
            .map(|(field, _)| (field.clone(), self.resolve_cast(field)))
            .collect();

        if let Some(deleted_at) = &self.deleted_at {
            if !castings.iter().any(|(field, _)| field == deleted_at) {
                castings.push((deleted_at.clone(), Cast::Timestamp.nullable()));
            }
        }

        castings
    }

    pub fn has_auto_increment_key(&self) -> bool {
        self.castings
            .iter()
            .any(|(_, cast)| matches!(cast, Cast::AutoIncrement))
    }

    /// First field declared as `Cast::Secret` (nullable or not).
    pub fn first_secret_field(&self) -> Option<&str> {
        self.castings
            .iter()
            .find(|(_, cast)| cast.base() == &Cast::Secret)
            .map(|(field, _)| field.as_str())
    }

    pub fn converter(&self, type_name: &str) -> Option<Converter> {
        self.converters.get(type_name).copied()
    }
}

impl Debug for Schema {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("fields", &self.fields)
            .field("required", &self.required)
            .field("hidden", &self.hidden)
            .field("castings", &self.castings)
            .field("deleted_at", &self.deleted_at)
            .field("converters", &self.converters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Incremental builder for [`Schema`].
pub struct SchemaBuilder {
    schema: Schema,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        let mut converters: BTreeMap<String, Converter> = BTreeMap::new();
        converters.insert(UUID_TYPE.to_string(), convert_uuid);

        Self {
            schema: Schema {
                fields: BTreeSet::new(),
                required: Vec::new(),
                hidden: BTreeSet::new(),
                castings: Vec::new(),
                deleted_at: None,
                converters,
            },
        }
    }
}

impl SchemaBuilder {
    pub fn fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema.fields.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.schema.required.contains(&name) {
                self.schema.required.push(name);
            }
        }
        self
    }

    pub fn hidden<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema.hidden.extend(names.into_iter().map(Into::into));
        self
    }

    /// Declares the casting for one field; redeclaring replaces in place.
    pub fn cast(mut self, name: impl Into<String>, cast: Cast) -> Self {
        let name = name.into();
        match self.schema.castings.iter_mut().find(|(field, _)| *field == name) {
            Some((_, existing)) => *existing = cast,
            None => self.schema.castings.push((name, cast)),
        }
        self
    }

    /// Names the soft-delete timestamp field.
    pub fn soft_delete(mut self, name: impl Into<String>) -> Self {
        self.schema.deleted_at = Some(name.into());
        self
    }

    /// Registers the converter used by `Cast::Nominal(type_name)`.
    pub fn converter(mut self, type_name: impl Into<String>, converter: Converter) -> Self {
        self.schema.converters.insert(type_name.into(), converter);
        self
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}

fn convert_uuid(raw: &Value) -> Result<Arc<dyn CustomValue>, String> {
    let text = match raw {
        Value::Text(text) => text.as_str(),
        other => return Err(format!("cannot build Uuid from `{other}`")),
    };

    Uuid::parse_str(text.trim())
        .map(|uuid| Arc::new(uuid) as Arc<dyn CustomValue>)
        .map_err(|err| format!("invalid uuid `{text}`: {err}"))
}

#[cfg(test)]
mod tests {
    use super::Schema;
    use crate::model::cast::Cast;

    fn user_schema() -> Schema {
        Schema::builder()
            .fields(["id", "email", "password"])
            .required(["email", "password"])
            .hidden(["email"])
            .cast("id", Cast::AutoIncrement)
            .cast("password", Cast::Secret)
            .cast("deleted_at", Cast::Integer)
            .soft_delete("deleted_at")
            .build()
    }

    #[test]
    fn soft_delete_field_is_fillable_and_forced_to_nullable_timestamp() {
        let schema = user_schema();

        assert!(schema.is_fillable("deleted_at"));
        assert_eq!(
            schema.resolve_cast("deleted_at"),
            Cast::Nullable(Box::new(Cast::Timestamp))
        );
    }

    #[test]
    fn undeclared_fields_resolve_to_text() {
        assert_eq!(user_schema().resolve_cast("email"), Cast::Text);
    }

    #[test]
    fn castings_keep_declaration_order() {
        let names: Vec<String> = user_schema()
            .castings()
            .into_iter()
            .map(|(field, _)| field)
            .collect();
        assert_eq!(names, ["id", "password", "deleted_at"]);
    }

    #[test]
    fn secret_and_auto_increment_are_detected() {
        let schema = user_schema();
        assert!(schema.has_auto_increment_key());
        assert_eq!(schema.first_secret_field(), Some("password"));
        assert!(schema.converter("Uuid").is_some());
    }
}
