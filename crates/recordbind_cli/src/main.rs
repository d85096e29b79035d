//! CLI smoke entry point.
//!
//! # Responsibility
//! - Exercise `recordbind_core` end to end against an in-memory database.
//! - Keep output deterministic apart from the generated identity.

use log::info;
use recordbind_core::db::open_db_in_memory;
use recordbind_core::{
    init_logging, params, Cast, Entity, LogConfig, Model, Schema, SqliteRepository,
};
use std::error::Error;

struct User;

impl Model for User {
    fn schema() -> Schema {
        Schema::builder()
            .fields(["id", "email", "name", "password", "created_at"])
            .required(["email", "password"])
            .cast("id", Cast::AutoIncrement)
            .cast("password", Cast::Secret)
            .cast("created_at", Cast::Timestamp)
            .soft_delete("deleted_at")
            .build()
    }
}

const CREATE_USERS: &str = "CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL,
    name TEXT,
    password TEXT NOT NULL,
    created_at TEXT,
    deleted_at TEXT
)";

fn main() -> Result<(), Box<dyn Error>> {
    init_logging(&LogConfig::from_env())?;

    let conn = open_db_in_memory()?;
    conn.execute_batch(CREATE_USERS)?;

    let repo = SqliteRepository::new(&conn);
    repo.set_write_instruction(
        "INSERT INTO users (email, name, password, created_at)
         VALUES (:email, :name, :password, :created_at)",
    )
    .set_read_instruction("SELECT * FROM users WHERE id = :id");

    let user = Entity::<User>::with_repository(&repo);
    let id = user.persist(&params([
        ("email", "smoke@recordbind.dev"),
        ("name", "Smoke"),
        ("password", "smoke-secret"),
        ("created_at", "2024-01-01 00:00:00"),
    ]))?;
    info!("event=cli_smoke module=cli status=persisted id={}", id);

    let fetched = user.fetch_all(Some(&params([("id", id)])))?;
    for entity in &fetched {
        println!("{}", serde_json::to_string(entity)?);
        println!(
            "secret_verified={}",
            entity.verify_secret("smoke-secret", None)
        );
    }
    println!("recordbind_core version={}", recordbind_core::core_version());
    Ok(())
}
