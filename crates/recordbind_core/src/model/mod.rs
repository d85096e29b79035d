//! Typed-attribute record model.
//!
//! # Responsibility
//! - Declare entity schemas and the per-field type descriptors.
//! - Convert raw input and stored values through one casting engine.
//! - Hold entity attributes behind schema-enforced access rules.
//!
//! # Invariants
//! - Entities never learn how records are fetched or persisted; they only
//!   delegate to a bound `Repository`.
//! - Soft deletion is a timestamp field, never a hard delete.

pub mod cast;
pub mod entity;
pub mod schema;
pub mod secret;
pub mod value;
