//! Typed-attribute entities with pluggable repositories.
//!
//! An entity type declares its schema (fillable, required and hidden
//! fields, castings, soft-delete field) and stays ignorant of storage; a
//! [`Repository`] decides how records are fetched and persisted.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;

pub use logging::{default_log_level, init_logging, logging_status, LogConfig};
pub use model::cast::{Cast, CastError, ParamKind};
pub use model::entity::{Entity, Model};
pub use model::schema::{Converter, Schema, SchemaBuilder};
pub use model::value::{CustomValue, Value};
pub use repo::sqlite_repo::SqliteRepository;
pub use repo::{
    params, FetchScope, Fetched, Instructions, Params, RepoError, RepoResult, Repository,
    StateError, ValidationError,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
