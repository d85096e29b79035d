//! SQLite repository binding.
//!
//! # Responsibility
//! - Execute caller-supplied read/write instructions on a borrowed
//!   connection.
//! - Bind named parameters using the entity's casting metadata.
//! - Rebuild typed entities from result rows, lazily.
//!
//! # Invariants
//! - A `:name` placeholder is bound only when the instruction references it;
//!   other params are ignored.
//! - Rows whose stored soft-delete column is non-blank are skipped unless
//!   the calling entity included trashed records.
//! - The prepared statement lives only for the duration of one call.

use crate::model::cast::{coerce_integer, coerce_text, ParamKind};
use crate::model::entity::{model_name, Entity, Model};
use crate::model::value::Value;
use crate::repo::{
    FetchScope, Fetched, Instructions, Params, RepoError, RepoResult, Repository, StateError,
};
use log::{debug, error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, Rows, Statement};
use std::time::Instant;

static INSERT_INSTRUCTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bINSERT\s+(?:OR\s+[A-Z]+\s+)?INTO\s+").expect("valid insert regex")
});

/// SQLite-backed repository for any [`Model`].
pub struct SqliteRepository<'conn> {
    conn: &'conn Connection,
    instructions: Instructions,
}

impl<'conn> SqliteRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            instructions: Instructions::new(),
        }
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    /// Sets the SQL executed by `get`. Chainable.
    pub fn set_read_instruction(&self, sql: impl Into<String>) -> &Self {
        self.instructions.set_read(sql.into());
        self
    }

    /// Sets the SQL executed by `set`. Chainable.
    pub fn set_write_instruction(&self, sql: impl Into<String>) -> &Self {
        self.instructions.set_write(sql.into());
        self
    }

    /// Alias of [`Self::set_read_instruction`].
    pub fn diagnose(&self, sql: impl Into<String>) -> &Self {
        self.set_read_instruction(sql)
    }

    /// Alias of [`Self::set_write_instruction`].
    pub fn prescribe(&self, sql: impl Into<String>) -> &Self {
        self.set_write_instruction(sql)
    }

    pub fn is_diagnosed(&self) -> bool {
        self.instructions.read().is_some()
    }

    pub fn is_prescribed(&self) -> bool {
        self.instructions.write().is_some()
    }
}

impl<M: Model> Repository<M> for SqliteRepository<'_> {
    fn instructions(&self) -> &Instructions {
        &self.instructions
    }

    fn get(
        &self,
        entity: &Entity<'_, M>,
        params: Option<&Params>,
        scope: &mut FetchScope<'_, M>,
    ) -> RepoResult<()> {
        let sql = self
            .instructions
            .read()
            .ok_or(StateError::MissingReadInstruction)?;
        let started_at = Instant::now();
        info!(
            "event=repo_get module=repo status=start model={}",
            model_name::<M>()
        );

        let result = self.run_get(entity, &sql, params, scope);
        match &result {
            Ok(yielded) => info!(
                "event=repo_get module=repo status=ok model={} rows={} duration_ms={}",
                model_name::<M>(),
                yielded,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=repo_get module=repo status=error model={} duration_ms={} error={}",
                model_name::<M>(),
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result.map(|_| ())
    }

    fn set(&self, entity: &Entity<'_, M>, params: &Params) -> RepoResult<i64> {
        let sql = self
            .instructions
            .write()
            .ok_or(StateError::MissingWriteInstruction)?;
        let started_at = Instant::now();
        info!(
            "event=repo_set module=repo status=start model={}",
            model_name::<M>()
        );

        let result = self.run_set(entity, &sql, params);
        match &result {
            Ok(outcome) => info!(
                "event=repo_set module=repo status=ok model={} result={} duration_ms={}",
                model_name::<M>(),
                outcome,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=repo_set module=repo status=error model={} duration_ms={} error={}",
                model_name::<M>(),
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }
}

impl SqliteRepository<'_> {
    fn run_get<M: Model>(
        &self,
        entity: &Entity<'_, M>,
        sql: &str,
        params: Option<&Params>,
        scope: &mut FetchScope<'_, M>,
    ) -> RepoResult<usize> {
        let mut stmt = self.conn.prepare(sql)?;
        if let Some(params) = params {
            bind_params(&mut stmt, entity, params)?;
        }

        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut cursor = EntityCursor {
            rows: stmt.raw_query(),
            columns,
            prototype: entity,
            skip_trashed: entity.is_soft_deletable(),
            yielded: 0,
            finished: false,
        };

        let mut fetched = Fetched::new(&mut cursor);
        scope(&mut fetched)?;
        drop(fetched);
        Ok(cursor.yielded)
    }

    fn run_set<M: Model>(
        &self,
        entity: &Entity<'_, M>,
        sql: &str,
        params: &Params,
    ) -> RepoResult<i64> {
        let mut stmt = self.conn.prepare(sql)?;
        bind_params(&mut stmt, entity, params)?;
        let changed = stmt.raw_execute()?;

        if is_insert_instruction(sql) && entity.has_auto_increment_key() {
            return Ok(self.conn.last_insert_rowid());
        }
        Ok(i64::try_from(changed).unwrap_or(i64::MAX))
    }
}

/// Forward-only row cursor that rebuilds entities from a live statement.
struct EntityCursor<'stmt, 'p, 'r, M: Model> {
    rows: Rows<'stmt>,
    columns: Vec<String>,
    prototype: &'p Entity<'r, M>,
    skip_trashed: bool,
    yielded: usize,
    finished: bool,
}

impl<M: Model> EntityCursor<'_, '_, '_, M> {
    fn next_entity(&mut self) -> RepoResult<Option<Entity<'static, M>>> {
        while let Some(row) = self.rows.next()? {
            let mut values = Vec::with_capacity(self.columns.len());
            for (index, column) in self.columns.iter().enumerate() {
                values.push((column.clone(), read_column(row.get_ref(index)?, column)?));
            }

            if self.skip_trashed && self.is_trashed_row(&values) {
                debug!(
                    "event=row_skipped module=repo model={} reason=soft_deleted",
                    model_name::<M>()
                );
                continue;
            }
            return Ok(Some(self.prototype.hydrate(values)?));
        }
        Ok(None)
    }

    /// Checks the stored soft-delete column before casting, so text the
    /// timestamp cast cannot parse still marks the row as deleted.
    fn is_trashed_row(&self, values: &[(String, Value)]) -> bool {
        let Some(deleted_at) = self.prototype.schema().deleted_at_field() else {
            return false;
        };
        values
            .iter()
            .any(|(column, value)| column == deleted_at && !value.is_blank())
    }
}

impl<M: Model> Iterator for EntityCursor<'_, '_, '_, M> {
    type Item = RepoResult<Entity<'static, M>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.next_entity() {
            Ok(Some(entity)) => {
                self.yielded += 1;
                Some(Ok(entity))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

/// Binds every param the statement references, cast through the entity.
fn bind_params<M: Model>(
    stmt: &mut Statement<'_>,
    entity: &Entity<'_, M>,
    params: &Params,
) -> RepoResult<()> {
    for (key, raw) in params {
        let name = key.trim_start_matches(':');
        let Some(index) = stmt.parameter_index(&format!(":{name}"))? else {
            continue;
        };

        let value = entity.cast(name, raw.clone())?;
        let kind = entity.cast_for(name).param_kind();
        stmt.raw_bind_parameter(index, to_sql_value(&value, kind))?;
    }
    Ok(())
}

fn to_sql_value(value: &Value, kind: ParamKind) -> SqlValue {
    if value.is_null() {
        return SqlValue::Null;
    }
    match kind {
        ParamKind::Integer => SqlValue::Integer(coerce_integer(value)),
        ParamKind::Text => SqlValue::Text(coerce_text(value)),
    }
}

fn read_column(value: ValueRef<'_>, column: &str) -> RepoResult<Value> {
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(value) => Ok(Value::Integer(value)),
        ValueRef::Real(value) => Ok(Value::Real(value)),
        ValueRef::Text(bytes) => String::from_utf8(bytes.to_vec())
            .map(Value::Text)
            .map_err(|_| RepoError::InvalidData(format!("column `{column}` is not valid UTF-8"))),
        ValueRef::Blob(_) => Err(RepoError::InvalidData(format!(
            "column `{column}` holds a blob, which has no attribute representation"
        ))),
    }
}

/// Structural check for insert instructions; not a SQL parser.
pub fn is_insert_instruction(sql: &str) -> bool {
    INSERT_INSTRUCTION_RE.is_match(sql)
}

#[cfg(test)]
mod tests {
    use super::{is_insert_instruction, to_sql_value};
    use crate::model::cast::ParamKind;
    use crate::model::value::Value;
    use rusqlite::types::Value as SqlValue;

    #[test]
    fn insert_detection_is_case_insensitive_and_structural() {
        assert!(is_insert_instruction("INSERT INTO users (email) VALUES (:email)"));
        assert!(is_insert_instruction("insert  into users values (1)"));
        assert!(is_insert_instruction("INSERT OR REPLACE INTO users VALUES (1)"));
        assert!(!is_insert_instruction("UPDATE users SET email = :email"));
        assert!(!is_insert_instruction("SELECT * FROM inserts"));
    }

    #[test]
    fn sql_values_follow_param_kind() {
        assert_eq!(
            to_sql_value(&Value::from("12"), ParamKind::Integer),
            SqlValue::Integer(12)
        );
        assert_eq!(
            to_sql_value(&Value::from(true), ParamKind::Integer),
            SqlValue::Integer(1)
        );
        assert_eq!(
            to_sql_value(&Value::from(5_i64), ParamKind::Text),
            SqlValue::Text("5".to_string())
        );
        assert_eq!(to_sql_value(&Value::Null, ParamKind::Text), SqlValue::Null);
    }
}
