//! Repository contract between entities and storage backends.
//!
//! # Responsibility
//! - Define how an entity fetches (`get`) and persists (`set`) its own
//!   instances without knowing the backend.
//! - Hold the read/write instructions a backend executes.
//! - Define the error taxonomy surfaced by fetch/persist.
//!
//! # Invariants
//! - `get` never runs while the read instruction is unset; `set` never runs
//!   while the write instruction is unset.
//! - Instructions are never defaulted; they are only ever set by the caller.
//! - Entities yielded by `get` are fresh instances, never the caller's.

use crate::db::DbError;
use crate::model::cast::CastError;
use crate::model::entity::{Entity, Model};
use crate::model::value::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod sqlite_repo;

/// Named parameters handed to `get`/`set`, keyed by field name.
pub type Params = BTreeMap<String, Value>;

pub type RepoResult<T> = Result<T, RepoError>;

/// Builds a [`Params`] map from name/value pairs.
pub fn params<I, K, V>(pairs: I) -> Params
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(name, value)| (name.into(), value.into()))
        .collect()
}

/// Fetch/persist attempted before the entity or repository was ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    Unbound,
    MissingReadInstruction,
    MissingWriteInstruction,
}

impl Display for StateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbound => write!(f, "entity is not bound to a repository"),
            Self::MissingReadInstruction => write!(f, "repository has no read instruction"),
            Self::MissingWriteInstruction => write!(f, "repository has no write instruction"),
        }
    }
}

impl Error for StateError {}

/// Persist values rejected before any backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingRequired { entity: &'static str, field: String },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { entity, field } => {
                write!(f, "{entity} requires `{field}` attribute")
            }
        }
    }
}

impl Error for ValidationError {}

/// Repository error for fetch and persist operations.
#[derive(Debug)]
pub enum RepoError {
    State(StateError),
    Validation(ValidationError),
    Conversion(CastError),
    Db(DbError),
    /// Failure raised by a non-SQLite backend binding.
    Backend(Box<dyn Error + Send + Sync + 'static>),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Conversion(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Backend(err) => write!(f, "backend error: {err}"),
            Self::InvalidData(message) => write!(f, "invalid backend data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::State(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Conversion(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Backend(err) => Some(err.as_ref()),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<StateError> for RepoError {
    fn from(value: StateError) -> Self {
        Self::State(value)
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<CastError> for RepoError {
    fn from(value: CastError) -> Self {
        Self::Conversion(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Read/write instruction slots shared by every backend binding.
///
/// Interior mutability lets callers reconfigure a repository that entities
/// already hold a shared reference to. Not thread-safe.
#[derive(Debug, Default)]
pub struct Instructions {
    read: RefCell<Option<String>>,
    write: RefCell<Option<String>>,
}

impl Instructions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> Option<String> {
        self.read.borrow().clone()
    }

    pub fn write(&self) -> Option<String> {
        self.write.borrow().clone()
    }

    pub fn set_read(&self, instruction: String) {
        *self.read.borrow_mut() = Some(instruction);
    }

    pub fn set_write(&self, instruction: String) {
        *self.write.borrow_mut() = Some(instruction);
    }
}

/// Forward-only sequence of entities read from a live backend cursor.
///
/// Only valid inside the scope a repository hands it to; the cursor is
/// released when that scope returns.
pub struct Fetched<'a, M: Model> {
    rows: Box<dyn Iterator<Item = RepoResult<Entity<'static, M>>> + 'a>,
}

impl<'a, M: Model> Fetched<'a, M> {
    pub fn new(rows: impl Iterator<Item = RepoResult<Entity<'static, M>>> + 'a) -> Self {
        Self {
            rows: Box::new(rows),
        }
    }
}

impl<M: Model> Iterator for Fetched<'_, M> {
    type Item = RepoResult<Entity<'static, M>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

/// Callback a repository invokes with the live row sequence.
pub type FetchScope<'s, M> = dyn FnMut(&mut Fetched<'_, M>) -> RepoResult<()> + 's;

/// Backend binding that moves `M` entities in and out of storage.
pub trait Repository<M: Model> {
    fn instructions(&self) -> &Instructions;

    /// Executes the read instruction and hands the resulting entities to
    /// `scope` as a lazy sequence.
    ///
    /// # Errors
    /// - `StateError::MissingReadInstruction` when no read instruction is set.
    /// - Conversion and backend errors from binding and execution.
    fn get(
        &self,
        entity: &Entity<'_, M>,
        params: Option<&Params>,
        scope: &mut FetchScope<'_, M>,
    ) -> RepoResult<()>;

    /// Executes the write instruction.
    ///
    /// Returns the generated identity for insertions into a schema with an
    /// auto-increment field, otherwise the number of affected records.
    fn set(&self, entity: &Entity<'_, M>, params: &Params) -> RepoResult<i64>;

    fn is_diagnosed(&self) -> bool {
        self.instructions().read().is_some()
    }

    fn is_prescribed(&self) -> bool {
        self.instructions().write().is_some()
    }

    fn read_instruction(&self) -> Option<String> {
        self.instructions().read()
    }

    fn write_instruction(&self) -> Option<String> {
        self.instructions().write()
    }

    fn set_read_instruction(&self, instruction: impl Into<String>) -> &Self
    where
        Self: Sized,
    {
        self.instructions().set_read(instruction.into());
        self
    }

    fn set_write_instruction(&self, instruction: impl Into<String>) -> &Self
    where
        Self: Sized,
    {
        self.instructions().set_write(instruction.into());
        self
    }

    /// Alias of `set_read_instruction`.
    fn diagnose(&self, instruction: impl Into<String>) -> &Self
    where
        Self: Sized,
    {
        self.set_read_instruction(instruction)
    }

    /// Alias of `set_write_instruction`.
    fn prescribe(&self, instruction: impl Into<String>) -> &Self
    where
        Self: Sized,
    {
        self.set_write_instruction(instruction)
    }
}
