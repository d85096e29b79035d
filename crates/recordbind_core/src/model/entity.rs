//! Schema-aware attribute bag bound to a repository.
//!
//! # Responsibility
//! - Enforce fillability, visibility and requiredness declared by a
//!   [`Model`]'s schema on a dynamic attribute map.
//! - Delegate fetch/persist to the bound [`Repository`].
//!
//! # Invariants
//! - Names outside the fillable set are never written by `set_attribute`.
//! - Hidden and secret-typed fields never surface through `get_attribute`
//!   or `serialize`.
//! - A bound repository is only replaced through `rebind_repository`.
//! - `persist` rejects missing required values before touching the backend.
//! - `check_required` reads through the public accessor; only secret fields
//!   are checked against the stored hash.

use crate::model::cast::{cast_stored, cast_value, Cast, CastError};
use crate::model::schema::Schema;
use crate::model::secret;
use crate::model::value::Value;
use crate::repo::{Fetched, Params, RepoError, RepoResult, Repository, StateError, ValidationError};
use log::debug;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::rc::Rc;

/// Declaration hook implemented by every concrete entity type.
pub trait Model: 'static {
    /// Returns the schema shared by all instances of this type.
    fn schema() -> Schema;
}

/// One schema-typed record of model `M`.
///
/// `'r` is the lifetime of the bound repository.
pub struct Entity<'r, M: Model> {
    schema: Rc<Schema>,
    attributes: BTreeMap<String, Value>,
    repository: Option<&'r dyn Repository<M>>,
    trashed_included: bool,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Default for Entity<'_, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> Clone for Entity<'_, M> {
    fn clone(&self) -> Self {
        Self {
            schema: Rc::clone(&self.schema),
            attributes: self.attributes.clone(),
            repository: self.repository,
            trashed_included: self.trashed_included,
            _model: PhantomData,
        }
    }
}

impl<M: Model> Debug for Entity<'_, M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("model", &model_name::<M>())
            .field("attributes", &self.serialize())
            .field("bound", &self.repository.is_some())
            .field("trashed_included", &self.trashed_included)
            .finish()
    }
}

impl<'r, M: Model> Entity<'r, M> {
    /// Creates a bare, unbound entity.
    pub fn new() -> Self {
        Self::from_schema(Rc::new(M::schema()))
    }

    /// Creates an entity already bound to `repository`.
    pub fn with_repository(repository: &'r dyn Repository<M>) -> Self {
        let mut entity = Self::new();
        entity.repository = Some(repository);
        entity
    }

    fn from_schema(schema: Rc<Schema>) -> Self {
        Self {
            schema,
            attributes: BTreeMap::new(),
            repository: None,
            trashed_included: false,
            _model: PhantomData,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Resolved type descriptor for `name`.
    pub fn cast_for(&self, name: &str) -> Cast {
        self.schema.resolve_cast(name)
    }

    /// Runs the casting engine for `name` without storing the result.
    pub fn cast(&self, name: &str, raw: impl Into<Value>) -> Result<Value, CastError> {
        cast_value(&self.schema, name, raw.into())
    }

    /// Casts and stores `raw` under `name`.
    ///
    /// Non-fillable names are ignored silently.
    pub fn set_attribute(&mut self, name: &str, raw: impl Into<Value>) -> Result<(), CastError> {
        if !self.schema.is_fillable(name) {
            debug!(
                "event=attribute_ignored module=model model={} field={}",
                model_name::<M>(),
                name
            );
            return Ok(());
        }

        let value = cast_value(&self.schema, name, raw.into())?;
        self.attributes.insert(name.to_string(), value);
        Ok(())
    }

    /// Public read of one attribute.
    ///
    /// Returns `None` for hidden and secret fields, unset fields and nulls.
    pub fn get_attribute(&self, name: &str) -> Option<&Value> {
        if !self.is_publicly_visible(name) {
            return None;
        }
        self.attributes.get(name).filter(|value| !value.is_null())
    }

    /// Returns whether `name` was written, hidden or not.
    pub fn is_set(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn unset(&mut self, name: &str) {
        self.attributes.remove(name);
    }

    /// Public attribute mapping, without hidden or secret fields.
    pub fn serialize(&self) -> BTreeMap<String, Value> {
        self.public_attributes()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Re-casts every declared field present in the bag and strips
    /// auto-increment fields.
    pub fn cast_all(&mut self) -> Result<(), CastError> {
        for (field, cast) in self.schema.castings() {
            if cast == Cast::AutoIncrement {
                self.attributes.remove(&field);
                continue;
            }

            if let Some(current) = self.attributes.get(&field).cloned() {
                let value = cast_value(&self.schema, &field, current)?;
                self.attributes.insert(field, value);
            }
        }
        Ok(())
    }

    pub fn has_auto_increment_key(&self) -> bool {
        self.schema.has_auto_increment_key()
    }

    /// False once `include_trashed` was called on this instance.
    pub fn is_soft_deletable(&self) -> bool {
        !self.trashed_included && self.schema.deleted_at_field().is_some()
    }

    pub fn is_soft_deleted(&self) -> bool {
        if !self.is_soft_deletable() {
            return false;
        }
        self.schema
            .deleted_at_field()
            .and_then(|field| self.attributes.get(field))
            .is_some_and(|value| !value.is_blank())
    }

    /// Stops soft-delete filtering for fetches made through this instance.
    pub fn include_trashed(&mut self) -> &mut Self {
        self.trashed_included = true;
        self
    }

    /// Returns whether every required field reads as a non-blank value.
    ///
    /// Hidden required fields never pass. Secret fields pass once a hash
    /// is stored.
    pub fn check_required(&self) -> bool {
        self.schema.required().iter().all(|field| {
            let value = if self.is_secret_field(field) && !self.schema.is_hidden(field) {
                self.attributes.get(field.as_str())
            } else {
                self.get_attribute(field)
            };
            value.is_some_and(|value| !value.is_blank())
        })
    }

    /// Verifies `candidate` against the hash stored in `field`, or in the
    /// first secret-typed field when `field` is `None`.
    pub fn verify_secret(&self, candidate: &str, field: Option<&str>) -> bool {
        let Some(field) = field.or_else(|| self.schema.first_secret_field()) else {
            return false;
        };

        match self.attributes.get(field) {
            Some(Value::Secret(hash)) => secret::verify_secret(candidate, hash),
            _ => false,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.repository.is_some()
    }

    /// Binds `repository` unless one is already bound.
    pub fn bind_repository(&mut self, repository: &'r dyn Repository<M>) -> &mut Self {
        if self.repository.is_some() {
            debug!(
                "event=bind_ignored module=model model={} reason=already_bound",
                model_name::<M>()
            );
            return self;
        }
        self.repository = Some(repository);
        self
    }

    /// Replaces the bound repository unconditionally.
    pub fn rebind_repository(&mut self, repository: &'r dyn Repository<M>) -> &mut Self {
        self.repository = Some(repository);
        self
    }

    /// Fetches entities through the bound repository.
    ///
    /// `consume` receives the lazy row sequence; the backend cursor is
    /// released as soon as it returns.
    ///
    /// # Errors
    /// - `StateError::Unbound` / `StateError::MissingReadInstruction` before
    ///   any backend call.
    /// - Errors returned by the repository or by `consume`.
    pub fn fetch<T, F>(&self, params: Option<&Params>, consume: F) -> RepoResult<T>
    where
        F: FnOnce(&mut Fetched<'_, M>) -> RepoResult<T>,
    {
        let repository = self.repository.ok_or(StateError::Unbound)?;
        if !repository.is_diagnosed() {
            return Err(StateError::MissingReadInstruction.into());
        }

        let mut consume = Some(consume);
        let mut output = None;
        repository.get(self, params, &mut |rows: &mut Fetched<'_, M>| {
            if let Some(consume) = consume.take() {
                output = Some(consume(rows)?);
            }
            Ok(())
        })?;

        output.ok_or_else(|| {
            RepoError::InvalidData("repository completed fetch without yielding rows".to_string())
        })
    }

    /// Fetches and collects every entity.
    pub fn fetch_all(&self, params: Option<&Params>) -> RepoResult<Vec<Entity<'static, M>>> {
        self.fetch(params, |rows| rows.collect())
    }

    /// Replaces the bound repository's read instruction, then fetches.
    ///
    /// The new instruction stays set for later calls.
    pub fn fetch_with<T, F>(
        &self,
        instruction: impl Into<String>,
        params: Option<&Params>,
        consume: F,
    ) -> RepoResult<T>
    where
        F: FnOnce(&mut Fetched<'_, M>) -> RepoResult<T>,
    {
        let repository = self.repository.ok_or(StateError::Unbound)?;
        repository.instructions().set_read(instruction.into());
        self.fetch(params, consume)
    }

    /// Persists `values` through the bound repository.
    ///
    /// # Errors
    /// - `StateError` when unbound or without a write instruction.
    /// - `ValidationError::MissingRequired` when a required field is absent
    ///   from `values`; no backend call is made.
    pub fn persist(&self, values: &Params) -> RepoResult<i64> {
        let repository = self.repository.ok_or(StateError::Unbound)?;
        if !repository.is_prescribed() {
            return Err(StateError::MissingWriteInstruction.into());
        }

        for field in self.schema.required() {
            let present = values
                .keys()
                .any(|key| key.trim_start_matches(':') == field.as_str());
            if !present {
                return Err(ValidationError::MissingRequired {
                    entity: model_name::<M>(),
                    field: field.clone(),
                }
                .into());
            }
        }

        repository.set(self, values)
    }

    /// Replaces the bound repository's write instruction, then persists.
    ///
    /// The new instruction stays set for later calls.
    pub fn persist_with(
        &self,
        instruction: impl Into<String>,
        values: &Params,
    ) -> RepoResult<i64> {
        let repository = self.repository.ok_or(StateError::Unbound)?;
        repository.instructions().set_write(instruction.into());
        self.persist(values)
    }

    /// Builds a fresh, unbound entity of the same type from stored values.
    ///
    /// Columns outside the fillable set are skipped.
    pub fn hydrate<I, K>(&self, row: I) -> Result<Entity<'static, M>, CastError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut entity = Entity::from_schema(Rc::clone(&self.schema));
        for (name, raw) in row {
            let name = name.into();
            if !entity.schema.is_fillable(&name) {
                continue;
            }
            let value = cast_stored(&entity.schema, &name, raw)?;
            entity.attributes.insert(name, value);
        }
        Ok(entity)
    }

    fn is_publicly_visible(&self, name: &str) -> bool {
        !self.schema.is_hidden(name) && !self.is_secret_field(name)
    }

    fn is_secret_field(&self, name: &str) -> bool {
        self.schema.resolve_cast(name).base() == &Cast::Secret
    }

    fn public_attributes(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.attributes
            .iter()
            .filter(|(name, _)| self.is_publicly_visible(name))
    }
}

impl<M: Model> Serialize for Entity<'_, M> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (name, value) in self.public_attributes() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Short type name of `M` used in logs and error messages.
pub(crate) fn model_name<M: Model>() -> &'static str {
    let full = std::any::type_name::<M>();
    full.rsplit("::").next().unwrap_or(full)
}
